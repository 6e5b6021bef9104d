use crate::auth::{Role, Session};
use crate::calc;
use crate::catalog;
use crate::ipc::error::{err, ledger_err};
use crate::ipc::handlers::setup::pass_score;
use crate::ipc::helpers::{
    forbidden, i64_param, opt_str_param, person_id, require_db, require_db_mut, require_role,
    respond, str_param, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::views;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Counselors only see students of the classes they counsel.
fn ensure_counsels(
    conn: &Connection,
    req: &Request,
    session: &Session,
    student_id: &str,
) -> Result<(), Value> {
    let counselor_id = person_id(req, session)?;
    let owns = catalog::counselor_owns_student(conn, counselor_id, student_id)
        .map_err(|e| ledger_err(&req.id, &e))?;
    if !owns {
        return Err(forbidden(
            req,
            format!("student {student_id} is not in a class counseled by {counselor_id}"),
        ));
    }
    Ok(())
}

/// The class must exist and be counseled by the caller.
fn ensure_counsels_class(
    conn: &Connection,
    req: &Request,
    session: &Session,
    class_id: i64,
) -> Result<(), Value> {
    let counselor_id = person_id(req, session)?;
    let assigned = catalog::class_counselor(conn, class_id).map_err(|e| ledger_err(&req.id, &e))?;
    if assigned.as_deref() != Some(counselor_id) {
        return Err(forbidden(
            req,
            format!("class {class_id} is not counseled by {counselor_id}"),
        ));
    }
    Ok(())
}

fn handle_focus_toggle(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Counselor])?;
    let student_id = str_param(req, "studentId")?;
    let reason = opt_str_param(req, "reason")?.unwrap_or("");
    let retries = state.config.tx_retries;
    let conn = require_db_mut(state, req)?;
    ensure_counsels(conn, req, &session, student_id)?;
    let counselor_id = person_id(req, &session)?;
    let focused = catalog::toggle_student_focus(
        conn,
        retries,
        Some(&session.user_id),
        counselor_id,
        student_id,
        reason,
    )
    .map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "studentId": student_id, "focused": focused }))
}

fn handle_student_courses(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Counselor])?;
    let student_id = str_param(req, "studentId")?;
    let conn = require_db(state, req)?;
    ensure_counsels(conn, req, &session, student_id)?;
    let courses = views::student_grades(conn, student_id)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "studentId": student_id, "courses": courses }))
}

fn handle_classes(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Counselor])?;
    let counselor_id = person_id(req, &session)?;
    let conn = require_db(state, req)?;
    let classes = views::counselor_classes(conn, counselor_id)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "classes": classes }))
}

fn handle_class_students(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Counselor])?;
    let class_id = i64_param(req, "classId")?;
    let conn = require_db(state, req)?;
    ensure_counsels_class(conn, req, &session, class_id)?;
    let counselor_id = person_id(req, &session)?;
    let pass = pass_score(conn).map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    let students = views::class_students(conn, class_id, counselor_id, pass)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "classId": class_id, "passScore": pass, "students": students }))
}

fn handle_class_distribution(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Counselor])?;
    let class_id = i64_param(req, "classId")?;
    let conn = require_db(state, req)?;
    ensure_counsels_class(conn, req, &session, class_id)?;
    let pass = pass_score(conn).map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    let stats = calc::class_grade_stats(conn, class_id, pass)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "classId": class_id, "passScore": pass, "stats": stats }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "counselor.focusToggle" => handle_focus_toggle(state, req),
        "counselor.studentCourses" => handle_student_courses(state, req),
        "counselor.classes" => handle_classes(state, req),
        "counselor.classStudents" => handle_class_students(state, req),
        "counselor.classDistribution" => handle_class_distribution(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
