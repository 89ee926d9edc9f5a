use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::db::{WriteTx, repository};
use crate::error::AppError;
use crate::models::{
    Actor, CatalogKind, ConflictCheckRequest, ConflictFlags, CourseSchedule, DbId,
    NewScheduleRequest, Role, ScheduleDraft, ScheduleFilter, TimeInterval, UpdateScheduleRequest,
};
use crate::services::assignments::{require_catalog_entry, require_lecturer, require_resolved, resolve_instructor};
use crate::services::conflict::find_conflicts;
use crate::services::settle;

fn require_admin(actor: &Actor) -> Result<(), AppError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("only administrators manage schedules".to_string()))
    }
}

fn validate_seats(capacity: i64, enrolled: i64) -> Result<(), AppError> {
    if capacity < 0 || enrolled < 0 {
        return Err(AppError::Validation("capacity and enrolled must not be negative".to_string()));
    }
    if enrolled > capacity {
        return Err(AppError::Validation(format!(
            "enrolled ({}) exceeds capacity ({})",
            enrolled, capacity
        )));
    }
    Ok(())
}

async fn validate_references(conn: &mut SqliteConnection, draft: &ScheduleDraft) -> Result<(), AppError> {
    require_catalog_entry(conn, CatalogKind::Course, draft.course_id).await?;
    require_catalog_entry(conn, CatalogKind::Room, draft.room_id).await?;
    require_catalog_entry(conn, CatalogKind::Cohort, draft.cohort_id).await?;
    require_catalog_entry(conn, CatalogKind::Term, draft.term_id).await?;
    require_lecturer(conn, draft.instructor_id).await?;
    Ok(())
}

/// Rejects the draft if any resource it needs is already booked.
async fn ensure_free(
    conn: &mut SqliteConnection,
    draft: &ScheduleDraft,
    exclude_schedule_id: Option<DbId>,
) -> Result<(), AppError> {
    let flags = find_conflicts(conn, &draft.candidate(), exclude_schedule_id).await?;
    if flags.any() {
        info!(
            "rejected {} {}-{}: conflict on {}",
            draft.interval.day,
            draft.interval.start,
            draft.interval.end,
            flags.dimensions().join(", ")
        );
        return Err(AppError::ScheduleConflict(flags));
    }
    Ok(())
}

/// Creates, changes and removes weekly schedules. Every write runs the
/// conflict check inside the same exclusive transaction as the write itself.
pub struct ScheduleService {
    db: SqlitePool,
}

impl ScheduleService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(&self, actor: &Actor, req: NewScheduleRequest) -> Result<CourseSchedule, AppError> {
        require_admin(actor)?;
        let interval = TimeInterval::new(req.day, req.start_time, req.end_time)?;
        validate_seats(req.capacity, req.enrolled)?;

        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::create_in(tx.conn(), &req, interval).await;
        let schedule = settle(tx, result).await?;

        info!(
            "created schedule {} (course {}, room {}, {} {}-{})",
            schedule.id, schedule.course_id, schedule.room_id, schedule.day, schedule.start_time, schedule.end_time
        );
        Ok(schedule)
    }

    async fn create_in(
        conn: &mut SqliteConnection,
        req: &NewScheduleRequest,
        interval: TimeInterval,
    ) -> Result<CourseSchedule, AppError> {
        let resolution = resolve_instructor(conn, req.course_id, req.term_id, req.instructor_id).await?;
        let instructor_id = require_resolved(resolution, req.course_id, req.term_id)?;

        let draft = ScheduleDraft {
            course_id: req.course_id,
            room_id: req.room_id,
            instructor_id,
            cohort_id: req.cohort_id,
            term_id: req.term_id,
            interval,
            capacity: req.capacity,
            enrolled: req.enrolled,
        };
        validate_references(conn, &draft).await?;
        ensure_free(conn, &draft, None).await?;

        Ok(repository::insert_schedule(&mut *conn, &draft, Utc::now()).await?)
    }

    /// Applies the given changes on top of the stored schedule. The schedule
    /// is excluded from its own conflict check.
    pub async fn update(
        &self,
        actor: &Actor,
        id: DbId,
        req: UpdateScheduleRequest,
    ) -> Result<CourseSchedule, AppError> {
        require_admin(actor)?;

        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::update_in(tx.conn(), id, &req).await;
        let schedule = settle(tx, result).await?;

        info!("updated schedule {}", schedule.id);
        Ok(schedule)
    }

    async fn update_in(
        conn: &mut SqliteConnection,
        id: DbId,
        req: &UpdateScheduleRequest,
    ) -> Result<CourseSchedule, AppError> {
        let current = repository::find_schedule_by_id(&mut *conn, id)
            .await?
            .ok_or(AppError::not_found("schedule", id))?;

        let course_id = req.course_id.unwrap_or(current.course_id);
        let term_id = req.term_id.unwrap_or(current.term_id);
        let instructor_id = match req.instructor_id {
            Some(raw) => {
                let resolution = resolve_instructor(conn, course_id, term_id, Some(raw)).await?;
                require_resolved(resolution, course_id, term_id)?
            }
            None => current.instructor_id,
        };

        let interval = TimeInterval::new(
            req.day.unwrap_or(current.day),
            req.start_time.unwrap_or(current.start_time),
            req.end_time.unwrap_or(current.end_time),
        )?;

        let draft = ScheduleDraft {
            course_id,
            room_id: req.room_id.unwrap_or(current.room_id),
            instructor_id,
            cohort_id: req.cohort_id.unwrap_or(current.cohort_id),
            term_id,
            interval,
            capacity: req.capacity.unwrap_or(current.capacity),
            enrolled: req.enrolled.unwrap_or(current.enrolled),
        };
        validate_seats(draft.capacity, draft.enrolled)?;
        validate_references(conn, &draft).await?;
        ensure_free(conn, &draft, Some(id)).await?;

        repository::update_schedule(&mut *conn, id, &draft, Utc::now())
            .await?
            .ok_or(AppError::not_found("schedule", id))
    }

    /// Schedules that already have attendance sessions are kept.
    pub async fn delete(&self, actor: &Actor, id: DbId) -> Result<(), AppError> {
        require_admin(actor)?;

        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::delete_in(tx.conn(), id).await;
        settle(tx, result).await?;

        info!("deleted schedule {}", id);
        Ok(())
    }

    async fn delete_in(conn: &mut SqliteConnection, id: DbId) -> Result<(), AppError> {
        if repository::find_schedule_by_id(&mut *conn, id).await?.is_none() {
            return Err(AppError::not_found("schedule", id));
        }
        let sessions = repository::count_sessions_for_schedule(&mut *conn, id).await?;
        if sessions > 0 {
            return Err(AppError::Conflict(format!(
                "schedule {} has {} attendance session(s) and cannot be deleted",
                id, sessions
            )));
        }
        repository::delete_schedule(&mut *conn, id).await?;
        Ok(())
    }

    pub async fn get(&self, id: DbId) -> Result<CourseSchedule, AppError> {
        repository::find_schedule_by_id(&self.db, id)
            .await?
            .ok_or(AppError::not_found("schedule", id))
    }

    pub async fn list(&self, filter: &ScheduleFilter) -> Result<Vec<CourseSchedule>, AppError> {
        Ok(repository::fetch_schedules(&self.db, filter).await?)
    }

    /// Dry-run conflict check; nothing is written.
    pub async fn check_conflicts(&self, req: &ConflictCheckRequest) -> Result<ConflictFlags, AppError> {
        let candidate = req.candidate()?;
        let mut conn = self.db.acquire().await?;
        find_conflicts(&mut *conn, &candidate, req.exclude_schedule_id).await
    }

    /// Lets `user_id` run attendance for the schedule. Allowed for admins and
    /// the schedule's own instructor.
    pub async fn grant_assistant(&self, actor: &Actor, schedule_id: DbId, user_id: DbId) -> Result<(), AppError> {
        let schedule = self.get(schedule_id).await?;
        if !actor.is_admin() && actor.user_id != schedule.instructor_id {
            return Err(AppError::Forbidden(format!(
                "user {} cannot delegate schedule {}",
                actor.user_id, schedule_id
            )));
        }

        let user = repository::find_user_by_id(&self.db, user_id)
            .await?
            .ok_or(AppError::not_found("user", user_id))?;
        if user.role == Role::Student {
            return Err(AppError::Validation(format!(
                "user {} is a student and cannot assist",
                user_id
            )));
        }

        if repository::grant_assistant(&self.db, schedule_id, user_id, Utc::now()).await? {
            info!("user {} may now run attendance for schedule {}", user_id, schedule_id);
        }
        Ok(())
    }

    pub async fn revoke_assistant(&self, actor: &Actor, schedule_id: DbId, user_id: DbId) -> Result<(), AppError> {
        let schedule = self.get(schedule_id).await?;
        if !actor.is_admin() && actor.user_id != schedule.instructor_id {
            return Err(AppError::Forbidden(format!(
                "user {} cannot delegate schedule {}",
                actor.user_id, schedule_id
            )));
        }

        if !repository::revoke_assistant(&self.db, schedule_id, user_id).await? {
            return Err(AppError::not_found("assistant", user_id));
        }
        info!("revoked user {} from schedule {}", user_id, schedule_id);
        Ok(())
    }
}
