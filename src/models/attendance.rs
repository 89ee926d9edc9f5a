use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ids::{DbId, deserialize_id};
use super::status::{AttendanceStatus, SessionStatus, VerificationType};

/// Per-session knobs chosen by whoever opens the session. Unknown keys are
/// kept so clients can round-trip their own settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub late_threshold_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_late: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_token_lifetime_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TryFrom<String> for SessionSettings {
    type Error = serde_json::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        serde_json::from_str(&value)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AttendanceSession {
    pub id: DbId,
    pub schedule_id: DbId,
    /// The user who opened the session; may be an assistant rather than the
    /// schedule's instructor.
    pub instructor_id: DbId,
    pub date: NaiveDate,
    pub opened_at: NaiveDateTime,
    pub closed_at: Option<NaiveDateTime>,
    #[sqlx(try_from = "String")]
    pub verification_type: VerificationType,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    pub attended_count: i64,
    pub late_count: i64,
    pub absent_count: i64,
    pub excused_count: i64,
    #[sqlx(try_from = "String")]
    pub settings: SessionSettings,
    #[serde(skip_serializing)]
    pub qr_nonce: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StudentAttendance {
    pub id: DbId,
    pub session_id: DbId,
    pub student_id: DbId,
    #[sqlx(try_from = "String")]
    pub status: AttendanceStatus,
    pub check_in_time: Option<NaiveDateTime>,
    pub verification_method: Option<String>,
    pub notes: Option<String>,
    /// Set when the row was written by staff rather than by the student.
    pub marked_by: Option<DbId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenSessionRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub schedule_id: DbId,
    pub date: NaiveDate,
    pub verification_type: VerificationType,
    #[serde(default)]
    pub settings: SessionSettings,
}

/// Date window for listing sessions; either end defaults to today.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionRangeQuery {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Outcome reported by the external face-match service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub matched: bool,
    pub subject_id: Option<DbId>,
    pub confidence: f64,
}

/// Evidence a student presents when checking in.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInProof {
    QrToken(String),
    Face(FaceMatch),
}

impl CheckInProof {
    pub fn method(&self) -> VerificationType {
        match self {
            CheckInProof::QrToken(_) => VerificationType::QrCode,
            CheckInProof::Face(_) => VerificationType::FaceRecognition,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QrCheckInRequest {
    pub qr_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceCheckInRequest {
    /// Base64-encoded image forwarded to the face service.
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkAttendanceRequest {
    pub status: AttendanceStatus,
    #[serde(default)]
    pub verification_method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Result of recording a check-in.
#[derive(Debug, Clone, Serialize)]
pub struct CheckInOutcome {
    pub attendance: StudentAttendance,
    /// False when the student had already checked in and only the timestamp
    /// and method were refreshed.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: AttendanceSession,
    pub attendances: Vec<StudentAttendance>,
}

/// Payload rendered into the QR code shown in class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPayload {
    pub session_id: DbId,
    pub schedule_id: DbId,
    pub nonce: String,
    pub issued_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AttendanceHistoryEntry {
    pub attendance_id: DbId,
    pub session_id: DbId,
    pub schedule_id: DbId,
    pub course_id: DbId,
    pub date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: AttendanceStatus,
    pub check_in_time: Option<NaiveDateTime>,
    pub verification_method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttendanceStatistics {
    pub total_sessions: i64,
    pub total_students: i64,
    pub total_present: i64,
    pub total_late: i64,
    pub total_absent: i64,
    pub total_excused: i64,
    pub average_attendance_percent: f64,
}
