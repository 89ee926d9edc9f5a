use std::collections::HashSet;

use sqlx::SqlitePool;

use crate::db::repository::{self, StatusTally};
use crate::error::AppError;
use crate::models::{AttendanceSession, AttendanceStatistics, AttendanceStatus, DbId, SessionStatus};

/// Sums attendance over the non-canceled `sessions` of one schedule.
///
/// `enrolled` is the schedule's enrolment snapshot. The average is
/// `100 * (present + late) / (sessions * enrolled)`, rounded to two
/// decimals, and 0 when either factor is 0.
pub fn aggregate(
    sessions: &[AttendanceSession],
    tallies: &[StatusTally],
    enrolled: i64,
) -> AttendanceStatistics {
    let counted: HashSet<DbId> = sessions
        .iter()
        .filter(|s| s.status != SessionStatus::Canceled)
        .map(|s| s.id)
        .collect();

    let mut stats = AttendanceStatistics {
        total_sessions: counted.len() as i64,
        total_students: enrolled,
        ..Default::default()
    };

    for tally in tallies.iter().filter(|t| counted.contains(&t.session_id)) {
        match tally.status {
            AttendanceStatus::Present => stats.total_present += tally.count,
            AttendanceStatus::Late => stats.total_late += tally.count,
            AttendanceStatus::Absent => stats.total_absent += tally.count,
            AttendanceStatus::Excused => stats.total_excused += tally.count,
        }
    }

    let possible = stats.total_sessions * stats.total_students;
    if possible > 0 {
        let attended = (stats.total_present + stats.total_late) as f64;
        let percent = 100.0 * attended / possible as f64;
        stats.average_attendance_percent = (percent * 100.0).round() / 100.0;
    }
    stats
}

pub struct StatisticsService {
    db: SqlitePool,
}

impl StatisticsService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn compute(&self, schedule_id: DbId) -> Result<AttendanceStatistics, AppError> {
        let schedule = repository::find_schedule_by_id(&self.db, schedule_id)
            .await?
            .ok_or(AppError::not_found("schedule", schedule_id))?;
        let sessions = repository::fetch_sessions_by_schedule(&self.db, schedule_id).await?;
        let tallies = repository::fetch_status_tallies(&self.db, schedule_id).await?;

        Ok(aggregate(&sessions, &tallies, schedule.enrolled))
    }
}
