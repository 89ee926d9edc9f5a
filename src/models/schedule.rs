use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ids::{DbId, deserialize_id, deserialize_opt_id};
use super::interval::{ClockTime, IntervalError, TimeInterval, Weekday};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CourseSchedule {
    pub id: DbId,
    pub course_id: DbId,
    pub room_id: DbId,
    pub instructor_id: DbId,
    pub cohort_id: DbId,
    pub term_id: DbId,
    #[sqlx(try_from = "String")]
    pub day: Weekday,
    #[sqlx(try_from = "String")]
    pub start_time: ClockTime,
    #[sqlx(try_from = "String")]
    pub end_time: ClockTime,
    pub capacity: i64,
    pub enrolled: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseSchedule {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval {
            day: self.day,
            start: self.start_time,
            end: self.end_time,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduleRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub course_id: DbId,
    #[serde(deserialize_with = "deserialize_id")]
    pub room_id: DbId,
    /// Explicit instructor override; resolved from lecturer assignments when absent.
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub instructor_id: Option<DbId>,
    #[serde(deserialize_with = "deserialize_id")]
    pub cohort_id: DbId,
    #[serde(deserialize_with = "deserialize_id")]
    pub term_id: DbId,
    pub day: Weekday,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub capacity: i64,
    #[serde(default)]
    pub enrolled: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateScheduleRequest {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub course_id: Option<DbId>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub room_id: Option<DbId>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub instructor_id: Option<DbId>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub cohort_id: Option<DbId>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub term_id: Option<DbId>,
    pub day: Option<Weekday>,
    pub start_time: Option<ClockTime>,
    pub end_time: Option<ClockTime>,
    pub capacity: Option<i64>,
    pub enrolled: Option<i64>,
}

/// Fully resolved values for a schedule write, after instructor resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDraft {
    pub course_id: DbId,
    pub room_id: DbId,
    pub instructor_id: DbId,
    pub cohort_id: DbId,
    pub term_id: DbId,
    pub interval: TimeInterval,
    pub capacity: i64,
    pub enrolled: i64,
}

impl ScheduleDraft {
    pub fn candidate(&self) -> ConflictCandidate {
        ConflictCandidate {
            room_id: self.room_id,
            instructor_id: self.instructor_id,
            cohort_id: self.cohort_id,
            interval: self.interval,
        }
    }
}

/// The resource bindings a schedule would occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictCandidate {
    pub room_id: DbId,
    pub instructor_id: DbId,
    pub cohort_id: DbId,
    pub interval: TimeInterval,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictCheckRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub room_id: DbId,
    #[serde(deserialize_with = "deserialize_id")]
    pub instructor_id: DbId,
    #[serde(deserialize_with = "deserialize_id")]
    pub cohort_id: DbId,
    pub day: Weekday,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub exclude_schedule_id: Option<DbId>,
}

impl ConflictCheckRequest {
    pub fn candidate(&self) -> Result<ConflictCandidate, IntervalError> {
        Ok(ConflictCandidate {
            room_id: self.room_id,
            instructor_id: self.instructor_id,
            cohort_id: self.cohort_id,
            interval: TimeInterval::new(self.day, self.start_time, self.end_time)?,
        })
    }
}

/// Per-dimension double-booking result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFlags {
    pub room: bool,
    pub instructor: bool,
    pub cohort: bool,
}

impl ConflictFlags {
    pub fn any(&self) -> bool {
        self.room || self.instructor || self.cohort
    }

    pub fn dimensions(&self) -> Vec<&'static str> {
        let mut dims = Vec::new();
        if self.room {
            dims.push("room");
        }
        if self.instructor {
            dims.push("instructor");
        }
        if self.cohort {
            dims.push("cohort");
        }
        dims
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleFilter {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub term_id: Option<DbId>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub instructor_id: Option<DbId>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub room_id: Option<DbId>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub cohort_id: Option<DbId>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub course_id: Option<DbId>,
    pub day: Option<Weekday>,
}
