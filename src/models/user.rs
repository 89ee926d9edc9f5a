use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ids::{DbId, deserialize_id};
use super::status::Role;

/// A person known to the system, mirrored from the campus directory.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: DbId,
    /// Identifier in the campus system, when the record was imported from it.
    pub external_id: Option<i64>,
    pub full_name: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
}

/// Whoever is performing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: DbId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: DbId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Actor::new(user.id, user.role)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrantAssistantRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: DbId,
}

/// Reference data a schedule points at. Maintained elsewhere; the core only
/// checks existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Course,
    Room,
    Cohort,
    Term,
}

impl CatalogKind {
    pub fn table(self) -> &'static str {
        match self {
            CatalogKind::Course => "courses",
            CatalogKind::Room => "rooms",
            CatalogKind::Cohort => "cohorts",
            CatalogKind::Term => "academic_terms",
        }
    }

    pub fn entity(self) -> &'static str {
        match self {
            CatalogKind::Course => "course",
            CatalogKind::Room => "room",
            CatalogKind::Cohort => "cohort",
            CatalogKind::Term => "term",
        }
    }
}
