use async_trait::async_trait;
use sqlx::SqliteConnection;

use crate::db::repository;
use crate::error::AppError;
use crate::models::{ConflictCandidate, ConflictFlags, CourseSchedule, DbId, TimeInterval, Weekday};

/// An existing schedule reduced to what the detector compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedSlot {
    pub schedule_id: DbId,
    pub interval: TimeInterval,
}

impl From<&CourseSchedule> for BookedSlot {
    fn from(schedule: &CourseSchedule) -> Self {
        BookedSlot {
            schedule_id: schedule.id,
            interval: schedule.interval(),
        }
    }
}

/// Source of the schedules already booked against one resource on one day.
///
/// Implemented for a live connection so the lookup can run inside the same
/// write transaction as the insert or update it guards.
#[async_trait]
pub trait ScheduleLookup: Send {
    async fn find_by_room_and_day(&mut self, room_id: DbId, day: Weekday) -> Result<Vec<BookedSlot>, AppError>;
    async fn find_by_instructor_and_day(&mut self, instructor_id: DbId, day: Weekday) -> Result<Vec<BookedSlot>, AppError>;
    async fn find_by_cohort_and_day(&mut self, cohort_id: DbId, day: Weekday) -> Result<Vec<BookedSlot>, AppError>;
}

fn to_slots(schedules: Vec<CourseSchedule>) -> Vec<BookedSlot> {
    schedules.iter().map(BookedSlot::from).collect()
}

#[async_trait]
impl ScheduleLookup for SqliteConnection {
    async fn find_by_room_and_day(&mut self, room_id: DbId, day: Weekday) -> Result<Vec<BookedSlot>, AppError> {
        let schedules = repository::find_schedules_by_room_and_day(&mut *self, room_id, day).await?;
        Ok(to_slots(schedules))
    }

    async fn find_by_instructor_and_day(&mut self, instructor_id: DbId, day: Weekday) -> Result<Vec<BookedSlot>, AppError> {
        let schedules = repository::find_schedules_by_instructor_and_day(&mut *self, instructor_id, day).await?;
        Ok(to_slots(schedules))
    }

    async fn find_by_cohort_and_day(&mut self, cohort_id: DbId, day: Weekday) -> Result<Vec<BookedSlot>, AppError> {
        let schedules = repository::find_schedules_by_cohort_and_day(&mut *self, cohort_id, day).await?;
        Ok(to_slots(schedules))
    }
}

fn clashes(slots: &[BookedSlot], interval: &TimeInterval, exclude: Option<DbId>) -> bool {
    slots
        .iter()
        .filter(|slot| Some(slot.schedule_id) != exclude)
        .any(|slot| slot.interval.overlaps(interval))
}

/// Checks every resource dimension of `candidate` against booked schedules.
///
/// All three dimensions are always evaluated. A lookup failure aborts the
/// whole check rather than reporting a dimension as free.
pub async fn find_conflicts<L>(
    lookup: &mut L,
    candidate: &ConflictCandidate,
    exclude_schedule_id: Option<DbId>,
) -> Result<ConflictFlags, AppError>
where
    L: ScheduleLookup + ?Sized,
{
    let day = candidate.interval.day;
    let interval = &candidate.interval;

    let by_room = lookup.find_by_room_and_day(candidate.room_id, day).await?;
    let by_instructor = lookup.find_by_instructor_and_day(candidate.instructor_id, day).await?;
    let by_cohort = lookup.find_by_cohort_and_day(candidate.cohort_id, day).await?;

    Ok(ConflictFlags {
        room: clashes(&by_room, interval, exclude_schedule_id),
        instructor: clashes(&by_instructor, interval, exclude_schedule_id),
        cohort: clashes(&by_cohort, interval, exclude_schedule_id),
    })
}

/// Only the instructor dimension, used when a schedule is re-pointed to a
/// different lecturer without moving room, cohort or time.
pub async fn instructor_conflicts<L>(
    lookup: &mut L,
    instructor_id: DbId,
    interval: &TimeInterval,
    exclude_schedule_id: Option<DbId>,
) -> Result<bool, AppError>
where
    L: ScheduleLookup + ?Sized,
{
    let booked = lookup.find_by_instructor_and_day(instructor_id, interval.day).await?;
    Ok(clashes(&booked, interval, exclude_schedule_id))
}
