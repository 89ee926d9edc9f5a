mod common;

use chrono::Utc;
use presence::db::repository;
use presence::error::AppError;
use presence::models::*;
use presence::services::assignments::resolve_instructor;
use presence::services::{AssignmentService, ScheduleService};

use common::{seed_campus, setup_test_db};

#[tokio::test]
async fn test_room_only_conflict_is_reported_per_dimension() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = ScheduleService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    service
        .create(&admin, campus.monday("08:00", "10:00"))
        .await
        .expect("Failed to create schedule A");

    let mut b = campus.monday("09:00", "11:00");
    b.instructor_id = Some(campus.other_lecturer.id);
    b.cohort_id = campus.other_cohort_id;

    let expected = ConflictFlags {
        room: true,
        instructor: false,
        cohort: false,
    };
    match service.create(&admin, b.clone()).await {
        Err(AppError::ScheduleConflict(flags)) => assert_eq!(flags, expected),
        other => panic!("expected a schedule conflict, got {:?}", other),
    }

    // The dry run agrees and nothing was written.
    let dry_run = ConflictCheckRequest {
        room_id: b.room_id,
        instructor_id: campus.other_lecturer.id,
        cohort_id: b.cohort_id,
        day: b.day,
        start_time: b.start_time,
        end_time: b.end_time,
        exclude_schedule_id: None,
    };
    assert_eq!(service.check_conflicts(&dry_run).await.unwrap(), expected);
    assert_eq!(service.list(&ScheduleFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_back_to_back_slots_are_allowed() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = ScheduleService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    service.create(&admin, campus.monday("08:00", "10:00")).await.unwrap();
    let next = service
        .create(&admin, campus.monday("10:00", "12:00"))
        .await
        .expect("Adjacent slot must not conflict");
    assert_eq!(next.start_time.to_string(), "10:00");
}

#[tokio::test]
async fn test_update_never_conflicts_with_itself() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = ScheduleService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    let a = service.create(&admin, campus.monday("08:00", "10:00")).await.unwrap();

    let updated = service
        .update(
            &admin,
            a.id,
            UpdateScheduleRequest {
                start_time: Some("09:00".parse().unwrap()),
                end_time: Some("11:00".parse().unwrap()),
                enrolled: Some(25),
                ..Default::default()
            },
        )
        .await
        .expect("Moving over its own slot must succeed");

    assert_eq!(updated.start_time.to_string(), "09:00");
    assert_eq!(updated.end_time.to_string(), "11:00");
    assert_eq!(updated.enrolled, 25);
}

#[tokio::test]
async fn test_update_into_another_schedule_is_rejected() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = ScheduleService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    let a = service.create(&admin, campus.monday("08:00", "10:00")).await.unwrap();
    let mut elsewhere = campus.monday("13:00", "15:00");
    elsewhere.room_id = campus.other_room_id;
    elsewhere.cohort_id = campus.other_cohort_id;
    let b = service.create(&admin, elsewhere).await.unwrap();

    let result = service
        .update(
            &admin,
            b.id,
            UpdateScheduleRequest {
                start_time: Some("09:30".parse().unwrap()),
                end_time: Some("11:00".parse().unwrap()),
                ..Default::default()
            },
        )
        .await;

    match result {
        Err(AppError::ScheduleConflict(flags)) => {
            assert!(flags.instructor);
            assert!(!flags.room);
            assert!(!flags.cohort);
        }
        other => panic!("expected a schedule conflict, got {:?}", other),
    }

    let unchanged = service.get(b.id).await.unwrap();
    assert_eq!(unchanged.start_time.to_string(), "13:00");
    assert_eq!(service.get(a.id).await.unwrap().start_time.to_string(), "08:00");
}

#[tokio::test]
async fn test_invalid_requests() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = ScheduleService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    let backwards = campus.monday("10:00", "09:00");
    assert!(matches!(service.create(&admin, backwards).await, Err(AppError::Validation(_))));

    let mut crowded = campus.monday("08:00", "10:00");
    crowded.enrolled = 41;
    assert!(matches!(service.create(&admin, crowded).await, Err(AppError::Validation(_))));

    let mut nowhere = campus.monday("08:00", "10:00");
    nowhere.room_id = 9_999;
    match service.create(&admin, nowhere).await {
        Err(AppError::NotFound { entity, id }) => {
            assert_eq!(entity, "room");
            assert_eq!(id, 9_999);
        }
        other => panic!("expected not found, got {:?}", other),
    }

    let mut by_assistant = campus.monday("08:00", "10:00");
    by_assistant.instructor_id = Some(campus.assistant.id);
    assert!(matches!(service.create(&admin, by_assistant).await, Err(AppError::Validation(_))));

    let lecturer = campus.lecturer_actor();
    assert!(matches!(
        service.create(&lecturer, campus.monday("08:00", "10:00")).await,
        Err(AppError::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_course_without_assignment_needs_explicit_instructor() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = ScheduleService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    let mut req = campus.monday("08:00", "10:00");
    req.course_id = campus.other_course_id;
    assert!(matches!(service.create(&admin, req.clone()).await, Err(AppError::Validation(_))));

    // An administrator may name the lecturer by campus-directory id.
    req.instructor_id = campus.other_lecturer.external_id;
    let created = service.create(&admin, req).await.expect("Override must resolve");
    assert_eq!(created.instructor_id, campus.other_lecturer.id);
}

#[tokio::test]
async fn test_ambiguous_instructor_id_uses_assignment_table() {
    let campus = seed_campus(setup_test_db().await).await;
    // A lecturer whose campus id equals another lecturer's internal id.
    let clash = repository::insert_user(&campus.pool, Some(campus.other_lecturer.id), "Dr. Clash", Role::Lecturer)
        .await
        .unwrap();

    let mut conn = campus.pool.acquire().await.unwrap();

    // Neither candidate is assigned to the other course.
    let resolution = resolve_instructor(&mut conn, campus.other_course_id, campus.term_id, Some(campus.other_lecturer.id))
        .await
        .unwrap();
    match resolution {
        InstructorResolution::Ambiguous(mut candidates) => {
            candidates.sort();
            let mut expected = vec![clash.id, campus.other_lecturer.id];
            expected.sort();
            assert_eq!(candidates, expected);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }

    repository::insert_assignment(&mut *conn, clash.id, campus.other_course_id, campus.term_id, Utc::now())
        .await
        .unwrap();
    let resolution = resolve_instructor(&mut conn, campus.other_course_id, campus.term_id, Some(campus.other_lecturer.id))
        .await
        .unwrap();
    assert_eq!(resolution, InstructorResolution::Resolved(clash.id));

    let resolution = resolve_instructor(&mut conn, campus.course_id, campus.term_id, None).await.unwrap();
    assert_eq!(resolution, InstructorResolution::Resolved(campus.lecturer.id));

    let resolution = resolve_instructor(&mut conn, campus.course_id, campus.other_term_id, None).await.unwrap();
    assert_eq!(resolution, InstructorResolution::NoAssignment);

    assert!(matches!(
        resolve_instructor(&mut conn, campus.course_id, campus.term_id, Some(123_456)).await,
        Err(AppError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_delete_keeps_schedules_with_sessions() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = ScheduleService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    let kept = service.create(&admin, campus.monday("08:00", "10:00")).await.unwrap();
    let dropped = service.create(&admin, campus.monday("13:00", "14:00")).await.unwrap();

    sqlx::query(
        "INSERT INTO attendance_sessions \
            (schedule_id, instructor_id, date, opened_at, verification_type, qr_nonce, created_at, updated_at) \
         VALUES (?, ?, '2024-03-04', '2024-03-04 08:00:00', 'MANUAL', 'n', ?, ?)",
    )
    .bind(kept.id)
    .bind(campus.lecturer.id)
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(&campus.pool)
    .await
    .expect("Failed to insert session");

    assert!(matches!(service.delete(&admin, kept.id).await, Err(AppError::Conflict(_))));
    service.delete(&admin, dropped.id).await.expect("Failed to delete");
    assert!(matches!(service.get(dropped.id).await, Err(AppError::NotFound { .. })));
    assert!(matches!(service.delete(&admin, dropped.id).await, Err(AppError::NotFound { .. })));
}

#[tokio::test]
async fn test_list_filters() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = ScheduleService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    service.create(&admin, campus.monday("08:00", "10:00")).await.unwrap();
    let mut friday = campus.monday("08:00", "10:00");
    friday.day = "jumat".parse().unwrap();
    service.create(&admin, friday).await.unwrap();

    let fridays = service
        .list(&ScheduleFilter {
            day: Some(Weekday::Friday),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(fridays.len(), 1);

    let by_lecturer = service
        .list(&ScheduleFilter {
            instructor_id: Some(campus.lecturer.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_lecturer.len(), 2);
}

#[tokio::test]
async fn test_assignment_is_unique_per_course_across_terms() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = AssignmentService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    let result = service
        .create(
            &admin,
            NewAssignmentRequest {
                instructor_id: campus.lecturer.id,
                course_id: campus.course_id,
                term_id: campus.other_term_id,
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let second = service
        .create(
            &admin,
            NewAssignmentRequest {
                instructor_id: campus.other_lecturer.id,
                course_id: campus.course_id,
                term_id: campus.term_id,
            },
        )
        .await
        .expect("A second lecturer may share the course");

    // Resolution still prefers the earliest assignment.
    let listed = service.list_for_course(campus.course_id, campus.term_id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].instructor_id, campus.lecturer.id);
    assert_eq!(listed[1].id, second.id);

    let available = service.available_lecturers(campus.course_id, campus.term_id).await.unwrap();
    assert!(available.is_empty());

    let lecturer = campus.lecturer_actor();
    assert!(matches!(
        service.delete(&lecturer, second.id).await,
        Err(AppError::Forbidden(_))
    ));
    service.delete(&admin, second.id).await.unwrap();
    let available = service.available_lecturers(campus.course_id, campus.term_id).await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, campus.other_lecturer.id);
}

#[tokio::test]
async fn test_reassignment_moves_schedules_unless_busy() {
    let campus = seed_campus(setup_test_db().await).await;
    let schedules = ScheduleService::new(campus.pool.clone());
    let assignments = AssignmentService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    let a = schedules.create(&admin, campus.monday("08:00", "10:00")).await.unwrap();
    let assignment = assignments
        .list_for_course(campus.course_id, campus.term_id)
        .await
        .unwrap()
        .remove(0);

    // The new lecturer already teaches elsewhere on Monday morning.
    let mut busy = campus.monday("09:00", "10:00");
    busy.room_id = campus.other_room_id;
    busy.cohort_id = campus.other_cohort_id;
    busy.course_id = campus.other_course_id;
    busy.instructor_id = Some(campus.other_lecturer.id);
    let busy = schedules.create(&admin, busy).await.unwrap();

    let result = assignments
        .update(
            &admin,
            assignment.id,
            UpdateAssignmentRequest {
                instructor_id: campus.other_lecturer.id,
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::ScheduleConflict(flags)) if flags.instructor));
    assert_eq!(schedules.get(a.id).await.unwrap().instructor_id, campus.lecturer.id);
    assert_eq!(assignments.get(assignment.id).await.unwrap().instructor_id, campus.lecturer.id);

    schedules.delete(&admin, busy.id).await.unwrap();
    let moved = assignments
        .update(
            &admin,
            assignment.id,
            UpdateAssignmentRequest {
                instructor_id: campus.other_lecturer.id,
            },
        )
        .await
        .expect("Failed to reassign");
    assert_eq!(moved.instructor_id, campus.other_lecturer.id);
    assert_eq!(schedules.get(a.id).await.unwrap().instructor_id, campus.other_lecturer.id);
}

#[tokio::test]
async fn test_available_lecturers_can_all_be_assigned() {
    let campus = seed_campus(setup_test_db().await).await;
    let service = AssignmentService::new(campus.pool.clone());
    let admin = campus.admin_actor();

    // The lecturer holds the course in the main term, so is not offered for
    // the other term either.
    let available = service
        .available_lecturers(campus.course_id, campus.other_term_id)
        .await
        .unwrap();
    let ids: Vec<DbId> = available.iter().map(|user| user.id).collect();
    assert_eq!(ids, vec![campus.other_lecturer.id]);

    for lecturer in &available {
        service
            .create(
                &admin,
                NewAssignmentRequest {
                    instructor_id: lecturer.id,
                    course_id: campus.course_id,
                    term_id: campus.other_term_id,
                },
            )
            .await
            .expect("Listed lecturer must be assignable");
    }
    assert!(
        service
            .available_lecturers(campus.course_id, campus.other_term_id)
            .await
            .unwrap()
            .is_empty()
    );

    assert!(matches!(
        service.available_lecturers(campus.course_id, 9_999).await,
        Err(AppError::NotFound { .. })
    ));
}
