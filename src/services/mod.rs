pub mod assignments;
pub mod attendance;
pub mod conflict;
pub mod schedules;
pub mod statistics;

pub use assignments::AssignmentService;
pub use attendance::AttendanceService;
pub use conflict::{BookedSlot, ScheduleLookup, find_conflicts};
pub use schedules::ScheduleService;
pub use statistics::{StatisticsService, aggregate};

use crate::db::WriteTx;
use crate::error::AppError;

/// Commits `tx` when `result` is Ok and rolls it back otherwise, handing the
/// original result back to the caller.
pub(crate) async fn settle<T>(tx: WriteTx, result: Result<T, AppError>) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tx.rollback().await?;
            Err(err)
        }
    }
}
