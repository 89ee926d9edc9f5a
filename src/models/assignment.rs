use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ids::{DbId, deserialize_id, deserialize_opt_id};

/// Binds a lecturer to a course for an academic term.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LecturerAssignment {
    pub id: DbId,
    pub instructor_id: DbId,
    pub course_id: DbId,
    pub term_id: DbId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssignmentRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub instructor_id: DbId,
    #[serde(deserialize_with = "deserialize_id")]
    pub course_id: DbId,
    #[serde(deserialize_with = "deserialize_id")]
    pub term_id: DbId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAssignmentRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub instructor_id: DbId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentQuery {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub term_id: Option<DbId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CourseTermQuery {
    #[serde(deserialize_with = "deserialize_id")]
    pub course_id: DbId,
    #[serde(deserialize_with = "deserialize_id")]
    pub term_id: DbId,
}

/// Outcome of resolving who teaches a course in a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructorResolution {
    Resolved(DbId),
    NoAssignment,
    /// The raw id named more than one lecturer and the assignment table did
    /// not single one out.
    Ambiguous(Vec<DbId>),
}
