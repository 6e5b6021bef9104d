mod test_support;

use serde_json::json;
use test_support::{
    create_course, login, provision_student, request_err, request_ok, seed_catalog,
    select_workspace, spawn_sidecar, temp_dir, ADMIN_PASSWORD, DEFAULT_PASSWORD,
};

#[test]
fn calls_require_workspace_then_session() {
    let workspace = temp_dir("enrolld-gates-session");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    assert_eq!(
        request_err(&mut stdin, &mut reader, "1", "courses.list", json!({})),
        "no_workspace"
    );
    select_workspace(&mut stdin, &mut reader, &workspace);
    assert_eq!(
        request_err(&mut stdin, &mut reader, "2", "courses.list", json!({})),
        "unauthenticated"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "3",
            "auth.login",
            json!({ "username": "admin", "password": "wrong" }),
        ),
        "invalid_credentials"
    );
    login(&mut stdin, &mut reader, "admin", "admin123");
    let who = request_ok(&mut stdin, &mut reader, "4", "auth.whoami", json!({}));
    assert_eq!(who["role"], "admin");
    assert!(who["personId"].is_null());

    let out = request_ok(&mut stdin, &mut reader, "5", "auth.logout", json!({}));
    assert_eq!(out["loggedOut"], true);
    assert_eq!(
        request_err(&mut stdin, &mut reader, "6", "auth.whoami", json!({})),
        "unauthenticated"
    );
}

#[test]
fn roles_are_confined_to_their_own_records() {
    let workspace = temp_dir("enrolld-gates-roles");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let seeded = seed_catalog(&mut stdin, &mut reader);
    let course = create_course(&mut stdin, &mut reader, &seeded, "Databases", 5);
    let mine = provision_student(&mut stdin, &mut reader, seeded.class_id, "Counseled");
    let other = provision_student(&mut stdin, &mut reader, seeded.other_class_id, "Elsewhere");
    for sid in [&mine, &other] {
        request_ok(
            &mut stdin,
            &mut reader,
            "seat",
            "enrollment.enroll",
            json!({ "courseId": course, "studentId": sid }),
        );
    }

    // Students: no admin operations, no acting for someone else.
    login(&mut stdin, &mut reader, &mine, DEFAULT_PASSWORD);
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "s1",
            "majors.create",
            json!({ "name": "X", "department": "Y" }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "s2",
            "enrollment.drop",
            json!({ "courseId": course, "studentId": other }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "s3",
            "grades.input",
            json!({ "courseId": course, "studentId": mine, "score": 100, "gradeType": "final" }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(&mut stdin, &mut reader, "s4", "logs.list", json!({})),
        "forbidden"
    );

    // Teachers: only their own courses.
    login(&mut stdin, &mut reader, &seeded.other_teacher_id, DEFAULT_PASSWORD);
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "t1",
            "grades.input",
            json!({ "courseId": course, "studentId": mine, "score": 90, "gradeType": "final" }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "t2",
            "grades.roster",
            json!({ "courseId": course }),
        ),
        "forbidden"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "t3",
            "enrollment.enroll",
            json!({ "courseId": course, "studentId": mine }),
        ),
        "forbidden"
    );

    // Counselors: only students of classes they counsel.
    login(&mut stdin, &mut reader, &seeded.counselor_id, DEFAULT_PASSWORD);
    let toggled = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "counselor.focusToggle",
        json!({ "studentId": mine, "reason": "attendance" }),
    );
    assert_eq!(toggled["focused"], true);
    let toggled = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "counselor.focusToggle",
        json!({ "studentId": mine }),
    );
    assert_eq!(toggled["focused"], false);
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "c3",
            "counselor.focusToggle",
            json!({ "studentId": other }),
        ),
        "forbidden"
    );
    let courses = request_ok(
        &mut stdin,
        &mut reader,
        "c4",
        "counselor.studentCourses",
        json!({ "studentId": mine }),
    );
    let rows = courses["courses"].as_array().expect("courses");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["courseId"], course.as_str());
    assert!(rows[0]["score"].is_null());
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "c5",
            "counselor.studentCourses",
            json!({ "studentId": other }),
        ),
        "forbidden"
    );

    // Admins may analyze any existing course but never enter grades.
    login(&mut stdin, &mut reader, "admin", ADMIN_PASSWORD);
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "a1",
            "grades.input",
            json!({ "courseId": course, "studentId": mine, "score": 70, "gradeType": "final" }),
        ),
        "forbidden"
    );
    let analysis = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "grades.analyze",
        json!({ "courseId": course }),
    );
    assert!(analysis["analysis"].is_null());
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "a3",
            "grades.analyze",
            json!({ "courseId": "C999" }),
        ),
        "not_found"
    );
}
