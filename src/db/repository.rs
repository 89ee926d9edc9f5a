use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite};

use crate::models::{
    AttendanceHistoryEntry, AttendanceSession, AttendanceStatus, CatalogKind, CourseSchedule,
    DbId, LecturerAssignment, Role, ScheduleDraft, ScheduleFilter, SessionStatus,
    StudentAttendance, User, VerificationType, Weekday,
};

const USER_COLUMNS: &str = "id, external_id, full_name, role";

const SCHEDULE_COLUMNS: &str = "\
    id, course_id, room_id, instructor_id, cohort_id, term_id, \
    day, start_time, end_time, capacity, enrolled, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str = "id, instructor_id, course_id, term_id, created_at, updated_at";

const SESSION_COLUMNS: &str = "\
    id, schedule_id, instructor_id, date, opened_at, closed_at, \
    verification_type, status, attended_count, late_count, absent_count, excused_count, \
    settings, qr_nonce, created_at, updated_at";

const ATTENDANCE_COLUMNS: &str = "\
    id, session_id, student_id, status, check_in_time, verification_method, \
    notes, marked_by, created_at, updated_at";

// ---------------------------------------------------------------------------
// Users and reference data
// ---------------------------------------------------------------------------

pub async fn insert_user<'e, E>(
    db: E,
    external_id: Option<i64>,
    full_name: &str,
    role: Role,
) -> Result<User, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "INSERT INTO users (external_id, full_name, role) VALUES (?, ?, ?) RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, User>(&query)
        .bind(external_id)
        .bind(full_name)
        .bind(role.as_str())
        .fetch_one(db)
        .await
}

pub async fn find_user_by_id<'e, E>(db: E, id: DbId) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    sqlx::query_as::<_, User>(&query)
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_user_by_external_id<'e, E>(
    db: E,
    external_id: i64,
) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = ?");
    sqlx::query_as::<_, User>(&query)
        .bind(external_id)
        .fetch_optional(db)
        .await
}

pub async fn insert_catalog_entry<'e, E>(
    db: E,
    kind: CatalogKind,
    name: &str,
) -> Result<DbId, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("INSERT INTO {} (name) VALUES (?) RETURNING id", kind.table());
    sqlx::query_scalar::<_, DbId>(&query)
        .bind(name)
        .fetch_one(db)
        .await
}

pub async fn catalog_entry_exists<'e, E>(
    db: E,
    kind: CatalogKind,
    id: DbId,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id = ?)", kind.table());
    sqlx::query_scalar::<_, bool>(&query)
        .bind(id)
        .fetch_one(db)
        .await
}

// ---------------------------------------------------------------------------
// Course schedules
// ---------------------------------------------------------------------------

/// `CASE` expression ranking the `day` column Monday first.
fn day_order() -> String {
    let arms: String = Weekday::ALL
        .iter()
        .enumerate()
        .map(|(rank, day)| format!(" WHEN '{}' THEN {}", day.as_str(), rank))
        .collect();
    format!("CASE day{} END", arms)
}

pub async fn fetch_schedules<'e, E>(
    db: E,
    filter: &ScheduleFilter,
) -> Result<Vec<CourseSchedule>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {SCHEDULE_COLUMNS} FROM course_schedules WHERE 1 = 1"
    ));
    if let Some(term_id) = filter.term_id {
        qb.push(" AND term_id = ").push_bind(term_id);
    }
    if let Some(instructor_id) = filter.instructor_id {
        qb.push(" AND instructor_id = ").push_bind(instructor_id);
    }
    if let Some(room_id) = filter.room_id {
        qb.push(" AND room_id = ").push_bind(room_id);
    }
    if let Some(cohort_id) = filter.cohort_id {
        qb.push(" AND cohort_id = ").push_bind(cohort_id);
    }
    if let Some(course_id) = filter.course_id {
        qb.push(" AND course_id = ").push_bind(course_id);
    }
    if let Some(day) = filter.day {
        qb.push(" AND day = ").push_bind(day.as_str());
    }
    qb.push(" ORDER BY ").push(day_order()).push(", start_time, id");

    qb.build_query_as::<CourseSchedule>().fetch_all(db).await
}

pub async fn find_schedule_by_id<'e, E>(
    db: E,
    id: DbId,
) -> Result<Option<CourseSchedule>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {SCHEDULE_COLUMNS} FROM course_schedules WHERE id = ?");
    sqlx::query_as::<_, CourseSchedule>(&query)
        .bind(id)
        .fetch_optional(db)
        .await
}

async fn fetch_schedules_by_column_and_day<'e, E>(
    db: E,
    column: &'static str,
    value: DbId,
    day: Weekday,
) -> Result<Vec<CourseSchedule>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {SCHEDULE_COLUMNS} FROM course_schedules \
         WHERE {column} = ? AND day = ? ORDER BY start_time, id"
    );
    sqlx::query_as::<_, CourseSchedule>(&query)
        .bind(value)
        .bind(day.as_str())
        .fetch_all(db)
        .await
}

pub async fn find_schedules_by_room_and_day<'e, E>(
    db: E,
    room_id: DbId,
    day: Weekday,
) -> Result<Vec<CourseSchedule>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    fetch_schedules_by_column_and_day(db, "room_id", room_id, day).await
}

pub async fn find_schedules_by_instructor_and_day<'e, E>(
    db: E,
    instructor_id: DbId,
    day: Weekday,
) -> Result<Vec<CourseSchedule>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    fetch_schedules_by_column_and_day(db, "instructor_id", instructor_id, day).await
}

pub async fn find_schedules_by_cohort_and_day<'e, E>(
    db: E,
    cohort_id: DbId,
    day: Weekday,
) -> Result<Vec<CourseSchedule>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    fetch_schedules_by_column_and_day(db, "cohort_id", cohort_id, day).await
}

pub async fn find_schedules_by_course_and_term<'e, E>(
    db: E,
    course_id: DbId,
    term_id: DbId,
) -> Result<Vec<CourseSchedule>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {SCHEDULE_COLUMNS} FROM course_schedules \
         WHERE course_id = ? AND term_id = ? ORDER BY id"
    );
    sqlx::query_as::<_, CourseSchedule>(&query)
        .bind(course_id)
        .bind(term_id)
        .fetch_all(db)
        .await
}

pub async fn insert_schedule<'e, E>(
    db: E,
    draft: &ScheduleDraft,
    now: DateTime<Utc>,
) -> Result<CourseSchedule, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "INSERT INTO course_schedules \
            (course_id, room_id, instructor_id, cohort_id, term_id, \
             day, start_time, end_time, capacity, enrolled, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING {SCHEDULE_COLUMNS}"
    );
    sqlx::query_as::<_, CourseSchedule>(&query)
        .bind(draft.course_id)
        .bind(draft.room_id)
        .bind(draft.instructor_id)
        .bind(draft.cohort_id)
        .bind(draft.term_id)
        .bind(draft.interval.day.as_str())
        .bind(draft.interval.start.to_string())
        .bind(draft.interval.end.to_string())
        .bind(draft.capacity)
        .bind(draft.enrolled)
        .bind(now)
        .bind(now)
        .fetch_one(db)
        .await
}

pub async fn update_schedule<'e, E>(
    db: E,
    id: DbId,
    draft: &ScheduleDraft,
    now: DateTime<Utc>,
) -> Result<Option<CourseSchedule>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "UPDATE course_schedules \
         SET course_id = ?, room_id = ?, instructor_id = ?, cohort_id = ?, term_id = ?, \
             day = ?, start_time = ?, end_time = ?, capacity = ?, enrolled = ?, updated_at = ? \
         WHERE id = ? \
         RETURNING {SCHEDULE_COLUMNS}"
    );
    sqlx::query_as::<_, CourseSchedule>(&query)
        .bind(draft.course_id)
        .bind(draft.room_id)
        .bind(draft.instructor_id)
        .bind(draft.cohort_id)
        .bind(draft.term_id)
        .bind(draft.interval.day.as_str())
        .bind(draft.interval.start.to_string())
        .bind(draft.interval.end.to_string())
        .bind(draft.capacity)
        .bind(draft.enrolled)
        .bind(now)
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn set_schedule_instructor<'e, E>(
    db: E,
    id: DbId,
    instructor_id: DbId,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE course_schedules SET instructor_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(instructor_id)
    .bind(now)
    .bind(id)
    .execute(db)
    .await?
    .rows_affected();

    Ok(result > 0)
}

pub async fn delete_schedule<'e, E>(db: E, id: DbId) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM course_schedules WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

pub async fn count_sessions_for_schedule<'e, E>(db: E, schedule_id: DbId) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM attendance_sessions WHERE schedule_id = ?")
        .bind(schedule_id)
        .fetch_one(db)
        .await
}

// ---------------------------------------------------------------------------
// Assistant delegation
// ---------------------------------------------------------------------------

pub async fn grant_assistant<'e, E>(
    db: E,
    schedule_id: DbId,
    user_id: DbId,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO schedule_assistants (schedule_id, user_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(schedule_id)
    .bind(user_id)
    .bind(now)
    .execute(db)
    .await?
    .rows_affected();

    Ok(result > 0)
}

pub async fn revoke_assistant<'e, E>(
    db: E,
    schedule_id: DbId,
    user_id: DbId,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM schedule_assistants WHERE schedule_id = ? AND user_id = ?")
        .bind(schedule_id)
        .bind(user_id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

pub async fn is_schedule_assistant<'e, E>(
    db: E,
    schedule_id: DbId,
    user_id: DbId,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM schedule_assistants WHERE schedule_id = ? AND user_id = ?)",
    )
    .bind(schedule_id)
    .bind(user_id)
    .fetch_one(db)
    .await
}

// ---------------------------------------------------------------------------
// Lecturer assignments
// ---------------------------------------------------------------------------

pub async fn insert_assignment<'e, E>(
    db: E,
    instructor_id: DbId,
    course_id: DbId,
    term_id: DbId,
    now: DateTime<Utc>,
) -> Result<LecturerAssignment, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "INSERT INTO lecturer_assignments (instructor_id, course_id, term_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING {ASSIGNMENT_COLUMNS}"
    );
    sqlx::query_as::<_, LecturerAssignment>(&query)
        .bind(instructor_id)
        .bind(course_id)
        .bind(term_id)
        .bind(now)
        .bind(now)
        .fetch_one(db)
        .await
}

pub async fn find_assignment_by_id<'e, E>(
    db: E,
    id: DbId,
) -> Result<Option<LecturerAssignment>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {ASSIGNMENT_COLUMNS} FROM lecturer_assignments WHERE id = ?");
    sqlx::query_as::<_, LecturerAssignment>(&query)
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Whether the instructor already holds an assignment for the course in any term.
pub async fn assignment_exists<'e, E>(
    db: E,
    instructor_id: DbId,
    course_id: DbId,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM lecturer_assignments WHERE instructor_id = ? AND course_id = ?)",
    )
    .bind(instructor_id)
    .bind(course_id)
    .fetch_one(db)
    .await
}

pub async fn fetch_assignments<'e, E>(
    db: E,
    term_id: Option<DbId>,
) -> Result<Vec<LecturerAssignment>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM lecturer_assignments"
    ));
    if let Some(term_id) = term_id {
        qb.push(" WHERE term_id = ").push_bind(term_id);
    }
    qb.push(" ORDER BY id");

    qb.build_query_as::<LecturerAssignment>().fetch_all(db).await
}

/// Assignments for a course in a term, oldest first.
pub async fn find_assignments_by_course_and_term<'e, E>(
    db: E,
    course_id: DbId,
    term_id: DbId,
) -> Result<Vec<LecturerAssignment>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM lecturer_assignments \
         WHERE course_id = ? AND term_id = ? ORDER BY id"
    );
    sqlx::query_as::<_, LecturerAssignment>(&query)
        .bind(course_id)
        .bind(term_id)
        .fetch_all(db)
        .await
}

pub async fn update_assignment_instructor<'e, E>(
    db: E,
    id: DbId,
    instructor_id: DbId,
    now: DateTime<Utc>,
) -> Result<Option<LecturerAssignment>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "UPDATE lecturer_assignments SET instructor_id = ?, updated_at = ? \
         WHERE id = ? RETURNING {ASSIGNMENT_COLUMNS}"
    );
    sqlx::query_as::<_, LecturerAssignment>(&query)
        .bind(instructor_id)
        .bind(now)
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn delete_assignment<'e, E>(db: E, id: DbId) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM lecturer_assignments WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

/// Lecturers with no assignment for the course in any term, matching the
/// `(instructor_id, course_id)` uniqueness of assignments.
pub async fn fetch_available_lecturers<'e, E>(
    db: E,
    course_id: DbId,
) -> Result<Vec<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {USER_COLUMNS} FROM users \
         WHERE role = 'LECTURER' AND id NOT IN ( \
             SELECT instructor_id FROM lecturer_assignments WHERE course_id = ?) \
         ORDER BY full_name, id"
    );
    sqlx::query_as::<_, User>(&query)
        .bind(course_id)
        .fetch_all(db)
        .await
}

// ---------------------------------------------------------------------------
// Attendance sessions
// ---------------------------------------------------------------------------

pub struct NewSessionRow<'a> {
    pub schedule_id: DbId,
    pub instructor_id: DbId,
    pub date: NaiveDate,
    pub opened_at: NaiveDateTime,
    pub verification_type: VerificationType,
    pub settings_json: &'a str,
    pub qr_nonce: &'a str,
    pub now: DateTime<Utc>,
}

/// Fails with a unique violation if the schedule already has an active
/// session on that date.
pub async fn insert_session<'e, E>(
    db: E,
    row: &NewSessionRow<'_>,
) -> Result<AttendanceSession, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "INSERT INTO attendance_sessions \
            (schedule_id, instructor_id, date, opened_at, verification_type, status, \
             settings, qr_nonce, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 'ACTIVE', ?, ?, ?, ?) \
         RETURNING {SESSION_COLUMNS}"
    );
    sqlx::query_as::<_, AttendanceSession>(&query)
        .bind(row.schedule_id)
        .bind(row.instructor_id)
        .bind(row.date)
        .bind(row.opened_at)
        .bind(row.verification_type.as_str())
        .bind(row.settings_json)
        .bind(row.qr_nonce)
        .bind(row.now)
        .bind(row.now)
        .fetch_one(db)
        .await
}

pub async fn find_session_by_id<'e, E>(
    db: E,
    id: DbId,
) -> Result<Option<AttendanceSession>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {SESSION_COLUMNS} FROM attendance_sessions WHERE id = ?");
    sqlx::query_as::<_, AttendanceSession>(&query)
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_active_session<'e, E>(
    db: E,
    schedule_id: DbId,
    date: NaiveDate,
) -> Result<Option<AttendanceSession>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions \
         WHERE schedule_id = ? AND date = ? AND status = 'ACTIVE'"
    );
    sqlx::query_as::<_, AttendanceSession>(&query)
        .bind(schedule_id)
        .bind(date)
        .fetch_optional(db)
        .await
}

pub async fn fetch_sessions_by_schedule<'e, E>(
    db: E,
    schedule_id: DbId,
) -> Result<Vec<AttendanceSession>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions \
         WHERE schedule_id = ? ORDER BY date DESC, opened_at DESC, id DESC"
    );
    sqlx::query_as::<_, AttendanceSession>(&query)
        .bind(schedule_id)
        .fetch_all(db)
        .await
}

pub async fn fetch_active_sessions_by_instructor<'e, E>(
    db: E,
    instructor_id: DbId,
) -> Result<Vec<AttendanceSession>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions \
         WHERE instructor_id = ? AND status = 'ACTIVE' ORDER BY opened_at DESC, id DESC"
    );
    sqlx::query_as::<_, AttendanceSession>(&query)
        .bind(instructor_id)
        .fetch_all(db)
        .await
}

/// Sessions opened by `instructor_id` dated within `[from, to]`, newest first.
pub async fn fetch_sessions_by_instructor_and_dates<'e, E>(
    db: E,
    instructor_id: DbId,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<AttendanceSession>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {SESSION_COLUMNS} FROM attendance_sessions \
         WHERE instructor_id = ? AND date BETWEEN ? AND ? \
         ORDER BY date DESC, opened_at DESC, id DESC"
    );
    sqlx::query_as::<_, AttendanceSession>(&query)
        .bind(instructor_id)
        .bind(from)
        .bind(to)
        .fetch_all(db)
        .await
}

/// Moves an active session to a terminal status. Returns false when the
/// session was no longer active.
pub async fn finish_session<'e, E>(
    db: E,
    id: DbId,
    status: SessionStatus,
    closed_at: NaiveDateTime,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE attendance_sessions SET status = ?, closed_at = ?, updated_at = ? \
         WHERE id = ? AND status = 'ACTIVE'",
    )
    .bind(status.as_str())
    .bind(closed_at)
    .bind(now)
    .bind(id)
    .execute(db)
    .await?
    .rows_affected();

    Ok(result > 0)
}

/// Adds `delta` to the session counter that tracks `status`.
pub async fn adjust_session_counter<'e, E>(
    db: E,
    session_id: DbId,
    status: AttendanceStatus,
    delta: i64,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let column = match status {
        AttendanceStatus::Present => "attended_count",
        AttendanceStatus::Late => "late_count",
        AttendanceStatus::Absent => "absent_count",
        AttendanceStatus::Excused => "excused_count",
    };
    let query = format!(
        "UPDATE attendance_sessions SET {column} = {column} + ?, updated_at = ? WHERE id = ?"
    );
    sqlx::query(&query)
        .bind(delta)
        .bind(now)
        .bind(session_id)
        .execute(db)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Student attendance
// ---------------------------------------------------------------------------

pub struct AttendanceUpsert<'a> {
    pub session_id: DbId,
    pub student_id: DbId,
    pub status: AttendanceStatus,
    pub check_in_time: Option<NaiveDateTime>,
    pub verification_method: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub marked_by: Option<DbId>,
    pub now: DateTime<Utc>,
}

pub async fn find_student_attendance<'e, E>(
    db: E,
    session_id: DbId,
    student_id: DbId,
) -> Result<Option<StudentAttendance>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM student_attendances \
         WHERE session_id = ? AND student_id = ?"
    );
    sqlx::query_as::<_, StudentAttendance>(&query)
        .bind(session_id)
        .bind(student_id)
        .fetch_optional(db)
        .await
}

pub async fn fetch_student_attendances<'e, E>(
    db: E,
    session_id: DbId,
) -> Result<Vec<StudentAttendance>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM student_attendances WHERE session_id = ? ORDER BY id"
    );
    sqlx::query_as::<_, StudentAttendance>(&query)
        .bind(session_id)
        .fetch_all(db)
        .await
}

/// Inserts the row for (session, student) or overwrites the existing one.
pub async fn upsert_student_attendance<'e, E>(
    db: E,
    row: &AttendanceUpsert<'_>,
) -> Result<StudentAttendance, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "INSERT INTO student_attendances \
            (session_id, student_id, status, check_in_time, verification_method, \
             notes, marked_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (session_id, student_id) DO UPDATE SET \
             status = excluded.status, \
             check_in_time = excluded.check_in_time, \
             verification_method = excluded.verification_method, \
             notes = excluded.notes, \
             marked_by = excluded.marked_by, \
             updated_at = excluded.updated_at \
         RETURNING {ATTENDANCE_COLUMNS}"
    );
    sqlx::query_as::<_, StudentAttendance>(&query)
        .bind(row.session_id)
        .bind(row.student_id)
        .bind(row.status.as_str())
        .bind(row.check_in_time)
        .bind(row.verification_method)
        .bind(row.notes)
        .bind(row.marked_by)
        .bind(row.now)
        .bind(row.now)
        .fetch_one(db)
        .await
}

/// Count of attendance rows per status for one session.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StatusTally {
    pub session_id: DbId,
    #[sqlx(try_from = "String")]
    pub status: AttendanceStatus,
    pub count: i64,
}

pub async fn fetch_status_tallies<'e, E>(
    db: E,
    schedule_id: DbId,
) -> Result<Vec<StatusTally>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, StatusTally>(
        "SELECT sa.session_id AS session_id, sa.status AS status, COUNT(*) AS count \
         FROM student_attendances sa \
         JOIN attendance_sessions s ON s.id = sa.session_id \
         WHERE s.schedule_id = ? \
         GROUP BY sa.session_id, sa.status \
         ORDER BY sa.session_id",
    )
    .bind(schedule_id)
    .fetch_all(db)
    .await
}

pub async fn fetch_student_history<'e, E>(
    db: E,
    student_id: DbId,
) -> Result<Vec<AttendanceHistoryEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, AttendanceHistoryEntry>(
        "SELECT sa.id AS attendance_id, sa.session_id AS session_id, \
                s.schedule_id AS schedule_id, cs.course_id AS course_id, s.date AS date, \
                sa.status AS status, sa.check_in_time AS check_in_time, \
                sa.verification_method AS verification_method \
         FROM student_attendances sa \
         JOIN attendance_sessions s ON s.id = sa.session_id \
         JOIN course_schedules cs ON cs.id = s.schedule_id \
         WHERE sa.student_id = ? AND s.status != 'CANCELED' \
         ORDER BY s.date DESC, s.opened_at DESC",
    )
    .bind(student_id)
    .fetch_all(db)
    .await
}
