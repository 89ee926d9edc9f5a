#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime, Utc};
use presence::db::{self, repository};
use presence::models::*;
use sqlx::SqlitePool;

/// Reference data shared by the integration tests. External ids start high so
/// they never collide with internal ids.
pub struct Campus {
    pub pool: SqlitePool,
    pub admin: User,
    pub lecturer: User,
    pub other_lecturer: User,
    pub assistant: User,
    pub course_id: DbId,
    pub other_course_id: DbId,
    pub room_id: DbId,
    pub other_room_id: DbId,
    pub cohort_id: DbId,
    pub other_cohort_id: DbId,
    pub term_id: DbId,
    pub other_term_id: DbId,
}

impl Campus {
    pub fn admin_actor(&self) -> Actor {
        Actor::from(&self.admin)
    }

    pub fn lecturer_actor(&self) -> Actor {
        Actor::from(&self.lecturer)
    }

    /// Monday slot in the main room and cohort, taught by whoever is assigned.
    pub fn monday(&self, start: &str, end: &str) -> NewScheduleRequest {
        NewScheduleRequest {
            course_id: self.course_id,
            room_id: self.room_id,
            instructor_id: None,
            cohort_id: self.cohort_id,
            term_id: self.term_id,
            day: Weekday::Monday,
            start_time: start.parse().expect("Failed to parse start"),
            end_time: end.parse().expect("Failed to parse end"),
            capacity: 40,
            enrolled: 3,
        }
    }
}

pub async fn setup_test_db() -> SqlitePool {
    db::connect_in_memory()
        .await
        .expect("Failed to create test database")
}

/// Seeds catalog rows, staff and one assignment of `lecturer` to the main
/// course and term.
pub async fn seed_campus(pool: SqlitePool) -> Campus {
    let course_id = repository::insert_catalog_entry(&pool, CatalogKind::Course, "Data Structures")
        .await
        .expect("Failed to insert course");
    let other_course_id = repository::insert_catalog_entry(&pool, CatalogKind::Course, "Operating Systems")
        .await
        .expect("Failed to insert course");
    let room_id = repository::insert_catalog_entry(&pool, CatalogKind::Room, "Room 101")
        .await
        .expect("Failed to insert room");
    let other_room_id = repository::insert_catalog_entry(&pool, CatalogKind::Room, "Room 202")
        .await
        .expect("Failed to insert room");
    let cohort_id = repository::insert_catalog_entry(&pool, CatalogKind::Cohort, "CS-2022-A")
        .await
        .expect("Failed to insert cohort");
    let other_cohort_id = repository::insert_catalog_entry(&pool, CatalogKind::Cohort, "CS-2022-B")
        .await
        .expect("Failed to insert cohort");
    let term_id = repository::insert_catalog_entry(&pool, CatalogKind::Term, "2023/2024 Even")
        .await
        .expect("Failed to insert term");
    let other_term_id = repository::insert_catalog_entry(&pool, CatalogKind::Term, "2024/2025 Odd")
        .await
        .expect("Failed to insert term");

    let admin = repository::insert_user(&pool, Some(900_001), "Registrar", Role::Admin)
        .await
        .expect("Failed to insert admin");
    let lecturer = repository::insert_user(&pool, Some(900_002), "Dr. Hutapea", Role::Lecturer)
        .await
        .expect("Failed to insert lecturer");
    let other_lecturer = repository::insert_user(&pool, Some(900_003), "Dr. Simanjuntak", Role::Lecturer)
        .await
        .expect("Failed to insert lecturer");
    let assistant = repository::insert_user(&pool, Some(900_004), "Rina (TA)", Role::Assistant)
        .await
        .expect("Failed to insert assistant");

    repository::insert_assignment(&pool, lecturer.id, course_id, term_id, Utc::now())
        .await
        .expect("Failed to insert assignment");

    Campus {
        pool,
        admin,
        lecturer,
        other_lecturer,
        assistant,
        course_id,
        other_course_id,
        room_id,
        other_room_id,
        cohort_id,
        other_cohort_id,
        term_id,
        other_term_id,
    }
}

pub async fn add_student(pool: &SqlitePool, external_id: i64, name: &str) -> User {
    repository::insert_user(pool, Some(external_id), name, Role::Student)
        .await
        .expect("Failed to insert student")
}

/// 2024-03-04 is a Monday.
pub fn monday_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).expect("valid date")
}

pub fn monday_at(hour: u32, minute: u32) -> NaiveDateTime {
    monday_date()
        .and_hms_opt(hour, minute, 0)
        .expect("valid time")
}
