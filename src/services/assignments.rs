use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::db::{WriteTx, repository};
use crate::error::AppError;
use crate::models::{
    Actor, CatalogKind, ConflictFlags, DbId, InstructorResolution, LecturerAssignment,
    NewAssignmentRequest, Role, UpdateAssignmentRequest, User,
};
use crate::services::conflict::instructor_conflicts;
use crate::services::settle;

/// Works out who teaches `course_id` in `term_id`.
///
/// An explicit `raw_instructor_id` overrides the assignment table. It is
/// matched against the campus-directory id first and the internal id second;
/// when those name two different lecturers, the assignment table decides if
/// exactly one of them is assigned. Without an explicit id the earliest
/// assignment for the course and term wins.
pub async fn resolve_instructor(
    conn: &mut SqliteConnection,
    course_id: DbId,
    term_id: DbId,
    raw_instructor_id: Option<DbId>,
) -> Result<InstructorResolution, AppError> {
    let assignments = repository::find_assignments_by_course_and_term(&mut *conn, course_id, term_id).await?;

    let Some(raw) = raw_instructor_id else {
        return Ok(match assignments.first() {
            Some(first) => InstructorResolution::Resolved(first.instructor_id),
            None => InstructorResolution::NoAssignment,
        });
    };

    let mut matched: Vec<User> = Vec::with_capacity(2);
    if let Some(user) = repository::find_user_by_external_id(&mut *conn, raw).await? {
        matched.push(user);
    }
    if let Some(user) = repository::find_user_by_id(&mut *conn, raw).await? {
        if matched.iter().all(|m| m.id != user.id) {
            matched.push(user);
        }
    }

    let lecturers: Vec<DbId> = matched
        .iter()
        .filter(|user| user.role == Role::Lecturer)
        .map(|user| user.id)
        .collect();

    match lecturers.as_slice() {
        [] if matched.is_empty() => Err(AppError::not_found("lecturer", raw)),
        [] => Err(AppError::Validation(format!("user {} is not a lecturer", raw))),
        [only] => Ok(InstructorResolution::Resolved(*only)),
        candidates => {
            let assigned: Vec<DbId> = candidates
                .iter()
                .copied()
                .filter(|id| assignments.iter().any(|a| a.instructor_id == *id))
                .collect();
            match assigned.as_slice() {
                [only] => Ok(InstructorResolution::Resolved(*only)),
                _ => {
                    warn!("instructor id {} matches lecturers {:?}", raw, candidates);
                    Ok(InstructorResolution::Ambiguous(candidates.to_vec()))
                }
            }
        }
    }
}

/// Turns a resolution into an instructor id or the matching client error.
pub fn require_resolved(
    resolution: InstructorResolution,
    course_id: DbId,
    term_id: DbId,
) -> Result<DbId, AppError> {
    match resolution {
        InstructorResolution::Resolved(id) => Ok(id),
        InstructorResolution::NoAssignment => Err(AppError::Validation(format!(
            "no lecturer is assigned to course {} in term {}",
            course_id, term_id
        ))),
        InstructorResolution::Ambiguous(candidates) => Err(AppError::Conflict(format!(
            "instructor id is ambiguous between users {:?}",
            candidates
        ))),
    }
}

pub(crate) async fn require_lecturer(conn: &mut SqliteConnection, user_id: DbId) -> Result<User, AppError> {
    let user = repository::find_user_by_id(&mut *conn, user_id)
        .await?
        .ok_or(AppError::not_found("lecturer", user_id))?;
    if user.role != Role::Lecturer {
        return Err(AppError::Validation(format!("user {} is not a lecturer", user_id)));
    }
    Ok(user)
}

pub(crate) async fn require_catalog_entry(
    conn: &mut SqliteConnection,
    kind: CatalogKind,
    id: DbId,
) -> Result<(), AppError> {
    if repository::catalog_entry_exists(&mut *conn, kind, id).await? {
        Ok(())
    } else {
        Err(AppError::not_found(kind.entity(), id))
    }
}

fn require_admin(actor: &Actor) -> Result<(), AppError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("only administrators manage lecturer assignments".to_string()))
    }
}

pub struct AssignmentService {
    db: SqlitePool,
}

impl AssignmentService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        actor: &Actor,
        req: NewAssignmentRequest,
    ) -> Result<LecturerAssignment, AppError> {
        require_admin(actor)?;

        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::create_in(tx.conn(), &req).await;
        let assignment = settle(tx, result).await?;

        info!(
            "assigned lecturer {} to course {} (term {})",
            assignment.instructor_id, assignment.course_id, assignment.term_id
        );
        Ok(assignment)
    }

    async fn create_in(
        conn: &mut SqliteConnection,
        req: &NewAssignmentRequest,
    ) -> Result<LecturerAssignment, AppError> {
        require_lecturer(conn, req.instructor_id).await?;
        require_catalog_entry(conn, CatalogKind::Course, req.course_id).await?;
        require_catalog_entry(conn, CatalogKind::Term, req.term_id).await?;

        if repository::assignment_exists(&mut *conn, req.instructor_id, req.course_id).await? {
            return Err(AppError::Conflict(format!(
                "lecturer {} is already assigned to course {}",
                req.instructor_id, req.course_id
            )));
        }

        repository::insert_assignment(&mut *conn, req.instructor_id, req.course_id, req.term_id, Utc::now())
            .await
            .map_err(|e| AppError::from_unique_violation(e, "lecturer is already assigned to this course"))
    }

    pub async fn get(&self, id: DbId) -> Result<LecturerAssignment, AppError> {
        repository::find_assignment_by_id(&self.db, id)
            .await?
            .ok_or(AppError::not_found("assignment", id))
    }

    pub async fn list(&self, term_id: Option<DbId>) -> Result<Vec<LecturerAssignment>, AppError> {
        Ok(repository::fetch_assignments(&self.db, term_id).await?)
    }

    pub async fn list_for_course(
        &self,
        course_id: DbId,
        term_id: DbId,
    ) -> Result<Vec<LecturerAssignment>, AppError> {
        Ok(repository::find_assignments_by_course_and_term(&self.db, course_id, term_id).await?)
    }

    /// Lecturers who could still be assigned to the course in the term.
    /// A lecturer holding the course in any term is excluded.
    pub async fn available_lecturers(&self, course_id: DbId, term_id: DbId) -> Result<Vec<User>, AppError> {
        let mut conn = self.db.acquire().await?;
        require_catalog_entry(&mut conn, CatalogKind::Course, course_id).await?;
        require_catalog_entry(&mut conn, CatalogKind::Term, term_id).await?;
        Ok(repository::fetch_available_lecturers(&mut *conn, course_id).await?)
    }

    /// Hands the assignment to another lecturer and re-points the schedules
    /// of that course and term the previous lecturer was teaching. Nothing
    /// changes if the new lecturer is already booked at any of those times.
    pub async fn update(
        &self,
        actor: &Actor,
        id: DbId,
        req: UpdateAssignmentRequest,
    ) -> Result<LecturerAssignment, AppError> {
        require_admin(actor)?;

        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::update_in(tx.conn(), id, req.instructor_id).await;
        settle(tx, result).await
    }

    async fn update_in(
        conn: &mut SqliteConnection,
        id: DbId,
        instructor_id: DbId,
    ) -> Result<LecturerAssignment, AppError> {
        let current = repository::find_assignment_by_id(&mut *conn, id)
            .await?
            .ok_or(AppError::not_found("assignment", id))?;
        if current.instructor_id == instructor_id {
            return Ok(current);
        }

        require_lecturer(conn, instructor_id).await?;
        if repository::assignment_exists(&mut *conn, instructor_id, current.course_id).await? {
            return Err(AppError::Conflict(format!(
                "lecturer {} is already assigned to course {}",
                instructor_id, current.course_id
            )));
        }

        let schedules =
            repository::find_schedules_by_course_and_term(&mut *conn, current.course_id, current.term_id).await?;
        let now = Utc::now();

        for schedule in schedules.iter().filter(|s| s.instructor_id == current.instructor_id) {
            if instructor_conflicts(conn, instructor_id, &schedule.interval(), Some(schedule.id)).await? {
                warn!(
                    "lecturer {} is already teaching during schedule {}",
                    instructor_id, schedule.id
                );
                return Err(AppError::ScheduleConflict(ConflictFlags {
                    instructor: true,
                    ..Default::default()
                }));
            }
            repository::set_schedule_instructor(&mut *conn, schedule.id, instructor_id, now).await?;
        }

        let updated = repository::update_assignment_instructor(&mut *conn, id, instructor_id, now)
            .await
            .map_err(|e| AppError::from_unique_violation(e, "lecturer is already assigned to this course"))?
            .ok_or(AppError::not_found("assignment", id))?;

        info!(
            "assignment {} moved from lecturer {} to {}",
            id, current.instructor_id, instructor_id
        );
        Ok(updated)
    }

    pub async fn delete(&self, actor: &Actor, id: DbId) -> Result<(), AppError> {
        require_admin(actor)?;
        if !repository::delete_assignment(&self.db, id).await? {
            return Err(AppError::not_found("assignment", id));
        }
        info!("deleted assignment {}", id);
        Ok(())
    }
}
