use axum::extract::{FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::routing::{delete, post, put};
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::repository;
use crate::error::AppError;
use crate::models::ids::parse_id;
use crate::models::*;
use crate::state::AppState;

pub const USER_HEADER: &str = "x-user-id";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/conflicts", post(check_conflicts))
        .route(
            "/schedules/{id}",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/schedules/{id}/statistics", get(schedule_statistics))
        .route("/schedules/{id}/sessions", get(schedule_sessions))
        .route("/schedules/{id}/assistants", post(grant_assistant))
        .route("/schedules/{id}/assistants/{user_id}", delete(revoke_assistant))
        .route("/assignments", get(list_assignments).post(create_assignment))
        .route("/assignments/available", get(available_lecturers))
        .route("/assignments/{id}", put(update_assignment).delete(delete_assignment))
        .route("/sessions", get(list_sessions).post(open_session))
        .route("/sessions/active", get(active_sessions))
        .route("/sessions/{id}", get(session_detail))
        .route("/sessions/{id}/close", post(close_session))
        .route("/sessions/{id}/cancel", post(cancel_session))
        .route("/sessions/{id}/qr-token", get(qr_token))
        .route("/sessions/{id}/check-in", post(qr_check_in))
        .route("/sessions/{id}/face-check-in", post(face_check_in))
        .route("/sessions/{id}/students/{student_id}", put(mark_student))
        .route("/students/{id}/attendance", get(student_history))
        .with_state(state)
}

/// The caller, named by the `X-User-Id` header. Unknown users are refused.
impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Forbidden("missing X-User-Id header".to_string()))?;
        let user_id = parse_id(raw).map_err(AppError::Validation)?;

        let user = repository::find_user_by_id(&state.db, user_id)
            .await?
            .ok_or_else(|| AppError::Forbidden(format!("unknown user {}", user_id)))?;
        Ok(Actor::from(&user))
    }
}

fn path_id(raw: &str) -> Result<DbId, AppError> {
    parse_id(raw).map_err(AppError::Validation)
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

async fn list_schedules(
    State(state): State<AppState>,
    _actor: Actor,
    Query(filter): Query<ScheduleFilter>,
) -> Result<Json<Vec<CourseSchedule>>, AppError> {
    let schedules = state.schedules().list(&filter).await?;
    Ok(Json(schedules))
}

async fn create_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<NewScheduleRequest>,
) -> Result<(StatusCode, Json<CourseSchedule>), AppError> {
    let schedule = state.schedules().create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn get_schedule(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<CourseSchedule>, AppError> {
    let schedule = state.schedules().get(path_id(&id)?).await?;
    Ok(Json(schedule))
}

async fn update_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<UpdateScheduleRequest>,
) -> Result<Json<CourseSchedule>, AppError> {
    let schedule = state.schedules().update(&actor, path_id(&id)?, req).await?;
    Ok(Json(schedule))
}

async fn delete_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.schedules().delete(&actor, path_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check_conflicts(
    State(state): State<AppState>,
    _actor: Actor,
    Json(req): Json<ConflictCheckRequest>,
) -> Result<Json<ConflictFlags>, AppError> {
    let flags = state.schedules().check_conflicts(&req).await?;
    Ok(Json(flags))
}

async fn schedule_statistics(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<AttendanceStatistics>, AppError> {
    let stats = state.statistics().compute(path_id(&id)?).await?;
    Ok(Json(stats))
}

async fn schedule_sessions(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Vec<AttendanceSession>>, AppError> {
    let sessions = state.attendance().sessions_for_schedule(&actor, path_id(&id)?).await?;
    Ok(Json(sessions))
}

async fn grant_assistant(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<GrantAssistantRequest>,
) -> Result<StatusCode, AppError> {
    state
        .schedules()
        .grant_assistant(&actor, path_id(&id)?, req.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_assistant(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .schedules()
        .revoke_assistant(&actor, path_id(&id)?, path_id(&user_id)?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Lecturer assignments
// ---------------------------------------------------------------------------

async fn list_assignments(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<AssignmentQuery>,
) -> Result<Json<Vec<LecturerAssignment>>, AppError> {
    let assignments = state.assignments().list(query.term_id).await?;
    Ok(Json(assignments))
}

async fn create_assignment(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<NewAssignmentRequest>,
) -> Result<(StatusCode, Json<LecturerAssignment>), AppError> {
    let assignment = state.assignments().create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn update_assignment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<UpdateAssignmentRequest>,
) -> Result<Json<LecturerAssignment>, AppError> {
    let assignment = state.assignments().update(&actor, path_id(&id)?, req).await?;
    Ok(Json(assignment))
}

async fn delete_assignment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.assignments().delete(&actor, path_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn available_lecturers(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<CourseTermQuery>,
) -> Result<Json<Vec<User>>, AppError> {
    let lecturers = state
        .assignments()
        .available_lecturers(query.course_id, query.term_id)
        .await?;
    Ok(Json(lecturers))
}

// ---------------------------------------------------------------------------
// Attendance sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct QrTokenResponse {
    pub session_id: DbId,
    pub qr_data: String,
}

async fn open_session(
    State(state): State<AppState>,
    actor: Actor,
    Json(req): Json<OpenSessionRequest>,
) -> Result<(StatusCode, Json<AttendanceSession>), AppError> {
    let session = state.attendance().open(&actor, req, now()).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Sessions the caller opened in a date window, today by default.
async fn list_sessions(
    State(state): State<AppState>,
    actor: Actor,
    Query(range): Query<SessionRangeQuery>,
) -> Result<Json<Vec<AttendanceSession>>, AppError> {
    let today = now().date();
    let sessions = state
        .attendance()
        .sessions_in_range(
            &actor,
            range.start_date.unwrap_or(today),
            range.end_date.unwrap_or(today),
        )
        .await?;
    Ok(Json(sessions))
}

async fn active_sessions(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<AttendanceSession>>, AppError> {
    let sessions = state.attendance().active_sessions(&actor).await?;
    Ok(Json(sessions))
}

async fn session_detail(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, AppError> {
    let detail = state.attendance().detail(&actor, path_id(&id)?).await?;
    Ok(Json(detail))
}

async fn close_session(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<AttendanceSession>, AppError> {
    let session = state.attendance().close(&actor, path_id(&id)?, now()).await?;
    Ok(Json(session))
}

async fn cancel_session(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<AttendanceSession>, AppError> {
    let session = state.attendance().cancel(&actor, path_id(&id)?, now()).await?;
    Ok(Json(session))
}

async fn qr_token(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<QrTokenResponse>, AppError> {
    let session_id = path_id(&id)?;
    let qr_data = state.attendance().qr_token(&actor, session_id, now()).await?;
    Ok(Json(QrTokenResponse { session_id, qr_data }))
}

/// Students check themselves in; the student id is the caller's.
async fn qr_check_in(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<QrCheckInRequest>,
) -> Result<Json<CheckInOutcome>, AppError> {
    let outcome = state
        .attendance()
        .check_in(path_id(&id)?, actor.user_id, CheckInProof::QrToken(req.qr_data), now())
        .await?;
    Ok(Json(outcome))
}

async fn face_check_in(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(req): Json<FaceCheckInRequest>,
) -> Result<Json<CheckInOutcome>, AppError> {
    let outcome = state
        .attendance()
        .face_check_in(path_id(&id)?, actor.user_id, &req.image, now())
        .await?;
    Ok(Json(outcome))
}

async fn mark_student(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, student_id)): Path<(String, String)>,
    Json(req): Json<MarkAttendanceRequest>,
) -> Result<Json<StudentAttendance>, AppError> {
    let attendance = state
        .attendance()
        .mark(&actor, path_id(&id)?, path_id(&student_id)?, req, now())
        .await?;
    Ok(Json(attendance))
}

async fn student_history(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Vec<AttendanceHistoryEntry>>, AppError> {
    let history = state.attendance().student_history(&actor, path_id(&id)?).await?;
    Ok(Json(history))
}
