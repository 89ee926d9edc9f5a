use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AttendancePolicy;
use crate::db::repository::{self, AttendanceUpsert, NewSessionRow};
use crate::db::WriteTx;
use crate::error::AppError;
use crate::models::{
    Actor, AttendanceHistoryEntry, AttendanceSession, AttendanceStatus, CheckInOutcome,
    CheckInProof, CourseSchedule, DbId, MarkAttendanceRequest, OpenSessionRequest, Role,
    SessionDetail, SessionSettings, SessionStatus, StudentAttendance, VerificationType, Weekday,
};
use crate::services::settle;
use crate::verification::{FaceVerifier, QrTokenValidator, issue_qr_token};

/// Drives attendance sessions through `Active -> Closed | Canceled` and
/// records student check-ins and manual marks while a session is active.
///
/// Every mutation runs in one exclusive write transaction: the state check,
/// the row upsert and the counter update commit together or not at all.
pub struct AttendanceService {
    db: SqlitePool,
    policy: AttendancePolicy,
    qr: Arc<dyn QrTokenValidator>,
    face: Option<Arc<dyn FaceVerifier>>,
}

impl AttendanceService {
    pub fn new(
        db: SqlitePool,
        policy: AttendancePolicy,
        qr: Arc<dyn QrTokenValidator>,
        face: Option<Arc<dyn FaceVerifier>>,
    ) -> Self {
        Self { db, policy, qr, face }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn open(
        &self,
        actor: &Actor,
        req: OpenSessionRequest,
        at: NaiveDateTime,
    ) -> Result<AttendanceSession, AppError> {
        validate_settings(&req.settings)?;
        let settings_json = serde_json::to_string(&req.settings)
            .map_err(|e| AppError::Validation(format!("invalid session settings: {}", e)))?;
        let nonce = Uuid::new_v4().to_string();

        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::open_in(tx.conn(), actor, &req, &settings_json, &nonce, at).await;
        let session = settle(tx, result).await?;

        info!(
            "session {} opened for schedule {} on {} by user {}",
            session.id, session.schedule_id, session.date, actor.user_id
        );
        Ok(session)
    }

    async fn open_in(
        conn: &mut SqliteConnection,
        actor: &Actor,
        req: &OpenSessionRequest,
        settings_json: &str,
        nonce: &str,
        at: NaiveDateTime,
    ) -> Result<AttendanceSession, AppError> {
        let schedule = load_schedule(conn, req.schedule_id).await?;
        authorize(conn, actor, &schedule, None).await?;

        if Weekday::of(req.date) != schedule.day {
            return Err(AppError::Validation(format!(
                "{} is a {}, schedule {} meets on {}",
                req.date,
                Weekday::of(req.date),
                schedule.id,
                schedule.day
            )));
        }

        if let Some(active) = repository::find_active_session(&mut *conn, schedule.id, req.date).await? {
            return Err(AppError::Conflict(format!(
                "session {} is already active for schedule {} on {}",
                active.id, schedule.id, req.date
            )));
        }

        let row = NewSessionRow {
            schedule_id: schedule.id,
            instructor_id: actor.user_id,
            date: req.date,
            opened_at: at,
            verification_type: req.verification_type,
            settings_json,
            qr_nonce: nonce,
            now: Utc::now(),
        };
        repository::insert_session(&mut *conn, &row).await.map_err(|e| {
            AppError::from_unique_violation(
                e,
                format!("an active session already exists for schedule {} on {}", schedule.id, req.date),
            )
        })
    }

    pub async fn close(&self, actor: &Actor, session_id: DbId, at: NaiveDateTime) -> Result<AttendanceSession, AppError> {
        self.finish(actor, session_id, SessionStatus::Closed, at).await
    }

    /// Ends the session without it counting towards statistics.
    pub async fn cancel(&self, actor: &Actor, session_id: DbId, at: NaiveDateTime) -> Result<AttendanceSession, AppError> {
        self.finish(actor, session_id, SessionStatus::Canceled, at).await
    }

    async fn finish(
        &self,
        actor: &Actor,
        session_id: DbId,
        status: SessionStatus,
        at: NaiveDateTime,
    ) -> Result<AttendanceSession, AppError> {
        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::finish_in(tx.conn(), actor, session_id, status, at).await;
        let session = settle(tx, result).await?;

        info!("session {} is now {}", session.id, session.status);
        Ok(session)
    }

    async fn finish_in(
        conn: &mut SqliteConnection,
        actor: &Actor,
        session_id: DbId,
        status: SessionStatus,
        at: NaiveDateTime,
    ) -> Result<AttendanceSession, AppError> {
        let session = load_session(conn, session_id).await?;
        let schedule = load_schedule(conn, session.schedule_id).await?;
        authorize(conn, actor, &schedule, Some(&session)).await?;
        require_active(&session)?;

        repository::finish_session(&mut *conn, session_id, status, at, Utc::now()).await?;
        load_session(conn, session_id).await
    }

    // -----------------------------------------------------------------------
    // Check-in
    // -----------------------------------------------------------------------

    /// Records a student's own check-in. The proof is verified before
    /// anything is written; a rejected proof leaves the session untouched.
    pub async fn check_in(
        &self,
        session_id: DbId,
        student_id: DbId,
        proof: CheckInProof,
        at: NaiveDateTime,
    ) -> Result<CheckInOutcome, AppError> {
        let session = self.preflight(session_id, student_id, proof.method(), at).await?;
        self.verify(&session, student_id, &proof, at).await?;

        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::record_check_in(tx.conn(), &self.policy, session_id, student_id, proof.method(), at).await;
        let outcome = settle(tx, result).await?;

        info!(
            "student {} checked in to session {} as {} ({})",
            student_id,
            session_id,
            outcome.attendance.status,
            if outcome.created { "new" } else { "repeat" }
        );
        Ok(outcome)
    }

    /// Sends `image` to the face service and checks the student in on a match.
    pub async fn face_check_in(
        &self,
        session_id: DbId,
        student_id: DbId,
        image: &str,
        at: NaiveDateTime,
    ) -> Result<CheckInOutcome, AppError> {
        let Some(face) = &self.face else {
            return Err(AppError::External("face recognition is not configured".to_string()));
        };
        self.preflight(session_id, student_id, VerificationType::FaceRecognition, at)
            .await?;

        let matched = face.identify(image).await?;
        self.check_in(session_id, student_id, CheckInProof::Face(matched), at).await
    }

    /// Cheap checks done before calling out to any verifier, so a closed
    /// session reports a state error rather than a verification failure.
    async fn preflight(
        &self,
        session_id: DbId,
        student_id: DbId,
        method: VerificationType,
        at: NaiveDateTime,
    ) -> Result<AttendanceSession, AppError> {
        let session = repository::find_session_by_id(&self.db, session_id)
            .await?
            .ok_or(AppError::not_found("session", session_id))?;
        require_active(&session)?;
        require_session_date(&session, at)?;

        let accepted = match method {
            VerificationType::QrCode => session.verification_type.accepts_qr(),
            VerificationType::FaceRecognition => session.verification_type.accepts_face(),
            _ => false,
        };
        if !accepted {
            return Err(AppError::Validation(format!(
                "session {} takes {} attendance, not {}",
                session.id, session.verification_type, method
            )));
        }

        let student = repository::find_user_by_id(&self.db, student_id)
            .await?
            .ok_or(AppError::not_found("student", student_id))?;
        if student.role != Role::Student {
            return Err(AppError::Validation(format!("user {} is not a student", student_id)));
        }
        Ok(session)
    }

    async fn verify(
        &self,
        session: &AttendanceSession,
        student_id: DbId,
        proof: &CheckInProof,
        at: NaiveDateTime,
    ) -> Result<(), AppError> {
        match proof {
            CheckInProof::QrToken(token) => {
                if !self.qr.validate(token, session, at).await? {
                    warn!("rejected QR token for session {} from student {}", session.id, student_id);
                    return Err(AppError::Validation("QR token is not valid for this session".to_string()));
                }
            }
            CheckInProof::Face(matched) => {
                if !matched.matched || matched.subject_id != Some(student_id) {
                    warn!("face did not match student {} in session {}", student_id, session.id);
                    return Err(AppError::Validation("face did not match the student".to_string()));
                }
                if matched.confidence < self.policy.min_face_confidence {
                    return Err(AppError::Validation(format!(
                        "face match confidence {:.2} is below {:.2}",
                        matched.confidence, self.policy.min_face_confidence
                    )));
                }
            }
        }
        Ok(())
    }

    async fn record_check_in(
        conn: &mut SqliteConnection,
        policy: &AttendancePolicy,
        session_id: DbId,
        student_id: DbId,
        method: VerificationType,
        at: NaiveDateTime,
    ) -> Result<CheckInOutcome, AppError> {
        // The session may have been closed while the proof was being checked.
        let session = load_session(conn, session_id).await?;
        require_active(&session)?;
        require_session_date(&session, at)?;

        let now = Utc::now();
        let existing = repository::find_student_attendance(&mut *conn, session_id, student_id).await?;

        // A repeat check-in only refreshes time and method. A student marked
        // absent in advance is upgraded as if checking in for the first time.
        if let Some(row) = existing.as_ref().filter(|row| row.status != AttendanceStatus::Absent) {
            let attendance = repository::upsert_student_attendance(
                &mut *conn,
                &AttendanceUpsert {
                    session_id,
                    student_id,
                    status: row.status,
                    check_in_time: Some(at),
                    verification_method: Some(method.as_str()),
                    notes: row.notes.as_deref(),
                    marked_by: row.marked_by,
                    now,
                },
            )
            .await?;
            return Ok(CheckInOutcome {
                attendance,
                created: false,
            });
        }

        let status = lateness(&session, policy, at)?;
        let previous = existing;
        let attendance = repository::upsert_student_attendance(
            &mut *conn,
            &AttendanceUpsert {
                session_id,
                student_id,
                status,
                check_in_time: Some(at),
                verification_method: Some(method.as_str()),
                notes: previous.as_ref().and_then(|row| row.notes.as_deref()),
                marked_by: None,
                now,
            },
        )
        .await?;

        if let Some(previous) = &previous {
            repository::adjust_session_counter(&mut *conn, session_id, previous.status, -1, now).await?;
        }
        repository::adjust_session_counter(&mut *conn, session_id, status, 1, now).await?;

        Ok(CheckInOutcome {
            attendance,
            created: previous.is_none(),
        })
    }

    // -----------------------------------------------------------------------
    // Manual marks
    // -----------------------------------------------------------------------

    /// Staff sets a student's status directly. Counters follow the change.
    pub async fn mark(
        &self,
        actor: &Actor,
        session_id: DbId,
        student_id: DbId,
        req: MarkAttendanceRequest,
        at: NaiveDateTime,
    ) -> Result<StudentAttendance, AppError> {
        let mut tx = WriteTx::begin(&self.db).await?;
        let result = Self::mark_in(tx.conn(), actor, session_id, student_id, &req, at).await;
        let attendance = settle(tx, result).await?;

        info!(
            "user {} marked student {} {} in session {}",
            actor.user_id, student_id, attendance.status, session_id
        );
        Ok(attendance)
    }

    async fn mark_in(
        conn: &mut SqliteConnection,
        actor: &Actor,
        session_id: DbId,
        student_id: DbId,
        req: &MarkAttendanceRequest,
        at: NaiveDateTime,
    ) -> Result<StudentAttendance, AppError> {
        let session = load_session(conn, session_id).await?;
        let schedule = load_schedule(conn, session.schedule_id).await?;
        authorize(conn, actor, &schedule, Some(&session)).await?;
        require_active(&session)?;

        let student = repository::find_user_by_id(&mut *conn, student_id)
            .await?
            .ok_or(AppError::not_found("student", student_id))?;
        if student.role != Role::Student {
            return Err(AppError::Validation(format!("user {} is not a student", student_id)));
        }

        let now = Utc::now();
        let existing = repository::find_student_attendance(&mut *conn, session_id, student_id).await?;

        let check_in_time = match (&existing, req.status) {
            (Some(row), _) if row.check_in_time.is_some() => row.check_in_time,
            (_, AttendanceStatus::Present | AttendanceStatus::Late) => Some(at),
            _ => None,
        };
        let method = req
            .verification_method
            .as_deref()
            .unwrap_or(VerificationType::Manual.as_str());
        let notes = req
            .notes
            .as_deref()
            .or_else(|| existing.as_ref().and_then(|row| row.notes.as_deref()));

        let attendance = repository::upsert_student_attendance(
            &mut *conn,
            &AttendanceUpsert {
                session_id,
                student_id,
                status: req.status,
                check_in_time,
                verification_method: Some(method),
                notes,
                marked_by: Some(actor.user_id),
                now,
            },
        )
        .await?;

        match existing.map(|row| row.status) {
            Some(old) if old == req.status => {}
            Some(old) => {
                repository::adjust_session_counter(&mut *conn, session_id, old, -1, now).await?;
                repository::adjust_session_counter(&mut *conn, session_id, req.status, 1, now).await?;
            }
            None => {
                repository::adjust_session_counter(&mut *conn, session_id, req.status, 1, now).await?;
            }
        }

        Ok(attendance)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn detail(&self, actor: &Actor, session_id: DbId) -> Result<SessionDetail, AppError> {
        let mut conn = self.db.acquire().await?;
        let session = load_session(&mut conn, session_id).await?;
        let schedule = load_schedule(&mut conn, session.schedule_id).await?;
        authorize(&mut conn, actor, &schedule, Some(&session)).await?;

        let attendances = repository::fetch_student_attendances(&mut *conn, session_id).await?;
        Ok(SessionDetail { session, attendances })
    }

    /// Sessions the actor opened that are still taking attendance.
    pub async fn active_sessions(&self, actor: &Actor) -> Result<Vec<AttendanceSession>, AppError> {
        Ok(repository::fetch_active_sessions_by_instructor(&self.db, actor.user_id).await?)
    }

    /// Sessions the actor opened between `from` and `to`, both inclusive.
    pub async fn sessions_in_range(
        &self,
        actor: &Actor,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceSession>, AppError> {
        if from > to {
            return Err(AppError::Validation(format!(
                "start date {} is after end date {}",
                from, to
            )));
        }
        Ok(repository::fetch_sessions_by_instructor_and_dates(&self.db, actor.user_id, from, to).await?)
    }

    pub async fn sessions_for_schedule(&self, actor: &Actor, schedule_id: DbId) -> Result<Vec<AttendanceSession>, AppError> {
        let mut conn = self.db.acquire().await?;
        let schedule = load_schedule(&mut conn, schedule_id).await?;
        authorize(&mut conn, actor, &schedule, None).await?;

        Ok(repository::fetch_sessions_by_schedule(&mut *conn, schedule_id).await?)
    }

    /// A student's attendance across non-canceled sessions, newest first.
    /// Students may only read their own history.
    pub async fn student_history(&self, actor: &Actor, student_id: DbId) -> Result<Vec<AttendanceHistoryEntry>, AppError> {
        if actor.role == Role::Student && actor.user_id != student_id {
            return Err(AppError::Forbidden("students may only view their own attendance".to_string()));
        }
        if repository::find_user_by_id(&self.db, student_id).await?.is_none() {
            return Err(AppError::not_found("student", student_id));
        }
        Ok(repository::fetch_student_history(&self.db, student_id).await?)
    }

    /// Payload to render as the session's QR code.
    pub async fn qr_token(&self, actor: &Actor, session_id: DbId, at: NaiveDateTime) -> Result<String, AppError> {
        let mut conn = self.db.acquire().await?;
        let session = load_session(&mut conn, session_id).await?;
        let schedule = load_schedule(&mut conn, session.schedule_id).await?;
        authorize(&mut conn, actor, &schedule, Some(&session)).await?;
        require_active(&session)?;
        if !session.verification_type.accepts_qr() {
            return Err(AppError::Validation(format!(
                "session {} does not use QR check-in",
                session.id
            )));
        }

        debug!("issuing QR token for session {}", session.id);
        issue_qr_token(&session, at)
    }
}

async fn load_session(conn: &mut SqliteConnection, id: DbId) -> Result<AttendanceSession, AppError> {
    repository::find_session_by_id(&mut *conn, id)
        .await?
        .ok_or(AppError::not_found("session", id))
}

async fn load_schedule(conn: &mut SqliteConnection, id: DbId) -> Result<CourseSchedule, AppError> {
    repository::find_schedule_by_id(&mut *conn, id)
        .await?
        .ok_or(AppError::not_found("schedule", id))
}

/// Admins, the schedule's instructor, whoever opened the session and
/// delegated assistants may act on a schedule's attendance.
async fn authorize(
    conn: &mut SqliteConnection,
    actor: &Actor,
    schedule: &CourseSchedule,
    session: Option<&AttendanceSession>,
) -> Result<(), AppError> {
    if actor.is_admin()
        || actor.user_id == schedule.instructor_id
        || session.is_some_and(|s| s.instructor_id == actor.user_id)
    {
        return Ok(());
    }
    if repository::is_schedule_assistant(&mut *conn, schedule.id, actor.user_id).await? {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "user {} has no access to schedule {}",
        actor.user_id, schedule.id
    )))
}

fn require_active(session: &AttendanceSession) -> Result<(), AppError> {
    if session.status.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "session {} is {}",
            session.id, session.status
        )));
    }
    Ok(())
}

fn require_session_date(session: &AttendanceSession, at: NaiveDateTime) -> Result<(), AppError> {
    if at.date() != session.date {
        return Err(AppError::InvalidState(format!(
            "session {} takes attendance on {}, not {}",
            session.id,
            session.date,
            at.date()
        )));
    }
    Ok(())
}

/// Longest grace window or session a day can hold.
const MAX_SESSION_MINUTES: i64 = 24 * 60;
const MAX_QR_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Range-checks the knobs a session is opened with.
fn validate_settings(settings: &SessionSettings) -> Result<(), AppError> {
    fn check(name: &str, value: Option<i64>, min: i64, max: i64) -> Result<(), AppError> {
        match value {
            Some(v) if v < min || v > max => Err(AppError::Validation(format!(
                "{} must be between {} and {}, got {}",
                name, min, max, v
            ))),
            _ => Ok(()),
        }
    }

    check("late_threshold_minutes", settings.late_threshold_minutes, 0, MAX_SESSION_MINUTES)?;
    check("duration_minutes", settings.duration_minutes, 1, MAX_SESSION_MINUTES)?;
    check("qr_token_lifetime_secs", settings.qr_token_lifetime_secs, 1, MAX_QR_LIFETIME_SECS)?;
    Ok(())
}

/// `Present` within the grace window after the session opened, `Late` after
/// it. Late arrivals are refused when the session disallows them.
fn lateness(
    session: &AttendanceSession,
    policy: &AttendancePolicy,
    at: NaiveDateTime,
) -> Result<AttendanceStatus, AppError> {
    let threshold = session
        .settings
        .late_threshold_minutes
        .unwrap_or(policy.late_threshold_minutes);
    let allow_late = session.settings.allow_late.unwrap_or(policy.allow_late);

    // A deadline past chrono's range never expires.
    let deadline = Duration::try_minutes(threshold.max(0))
        .and_then(|grace| session.opened_at.checked_add_signed(grace));
    if deadline.is_none_or(|deadline| at <= deadline) {
        return Ok(AttendanceStatus::Present);
    }
    if !allow_late {
        return Err(AppError::InvalidState(format!(
            "check-in closed {} minutes after session {} opened",
            threshold, session.id
        )));
    }
    Ok(AttendanceStatus::Late)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(settings: SessionSettings) -> AttendanceSession {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        AttendanceSession {
            id: 1,
            schedule_id: 1,
            instructor_id: 5,
            date,
            opened_at: date.and_hms_opt(8, 0, 0).unwrap(),
            closed_at: None,
            verification_type: VerificationType::QrCode,
            status: SessionStatus::Active,
            attended_count: 0,
            late_count: 0,
            absent_count: 0,
            excused_count: 0,
            settings,
            qr_nonce: "n".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_grace_window_boundary() {
        let session = session_with(SessionSettings::default());
        let policy = AttendancePolicy::default();

        assert_eq!(lateness(&session, &policy, at(8, 0)).unwrap(), AttendanceStatus::Present);
        assert_eq!(lateness(&session, &policy, at(8, 10)).unwrap(), AttendanceStatus::Present);
        assert_eq!(lateness(&session, &policy, at(8, 11)).unwrap(), AttendanceStatus::Late);
    }

    #[test]
    fn test_session_settings_override_policy() {
        let session = session_with(SessionSettings {
            late_threshold_minutes: Some(2),
            allow_late: Some(false),
            ..Default::default()
        });
        let policy = AttendancePolicy::default();

        assert_eq!(lateness(&session, &policy, at(8, 2)).unwrap(), AttendanceStatus::Present);
        assert!(matches!(lateness(&session, &policy, at(8, 3)), Err(AppError::InvalidState(_))));
    }

    #[test]
    fn test_out_of_range_threshold_does_not_overflow() {
        let policy = AttendancePolicy::default();

        let huge = session_with(SessionSettings {
            late_threshold_minutes: Some(i64::MAX / 2),
            ..Default::default()
        });
        assert_eq!(lateness(&huge, &policy, at(8, 1)).unwrap(), AttendanceStatus::Present);

        let negative = session_with(SessionSettings {
            late_threshold_minutes: Some(-5),
            ..Default::default()
        });
        assert_eq!(lateness(&negative, &policy, at(8, 0)).unwrap(), AttendanceStatus::Present);
        assert_eq!(lateness(&negative, &policy, at(8, 1)).unwrap(), AttendanceStatus::Late);
    }

    #[test]
    fn test_settings_ranges() {
        assert!(validate_settings(&SessionSettings::default()).is_ok());

        let edges = SessionSettings {
            late_threshold_minutes: Some(0),
            duration_minutes: Some(MAX_SESSION_MINUTES),
            qr_token_lifetime_secs: Some(1),
            ..Default::default()
        };
        assert!(validate_settings(&edges).is_ok());

        let cases = [
            SessionSettings { late_threshold_minutes: Some(-1), ..Default::default() },
            SessionSettings { late_threshold_minutes: Some(MAX_SESSION_MINUTES + 1), ..Default::default() },
            SessionSettings { duration_minutes: Some(0), ..Default::default() },
            SessionSettings { qr_token_lifetime_secs: Some(-30), ..Default::default() },
            SessionSettings { qr_token_lifetime_secs: Some(i64::MAX), ..Default::default() },
        ];
        for settings in &cases {
            assert!(
                matches!(validate_settings(settings), Err(AppError::Validation(_))),
                "accepted {:?}",
                settings
            );
        }
    }

    #[test]
    fn test_terminal_sessions_are_rejected() {
        let mut session = session_with(SessionSettings::default());
        assert!(require_active(&session).is_ok());
        session.status = SessionStatus::Closed;
        assert!(matches!(require_active(&session), Err(AppError::InvalidState(_))));
        session.status = SessionStatus::Canceled;
        assert!(matches!(require_active(&session), Err(AppError::InvalidState(_))));
    }

    #[test]
    fn test_check_in_must_fall_on_session_date() {
        let session = session_with(SessionSettings::default());
        assert!(require_session_date(&session, at(17, 0)).is_ok());

        let next_day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(8, 0, 0).unwrap();
        assert!(matches!(require_session_date(&session, next_day), Err(AppError::InvalidState(_))));
    }
}
