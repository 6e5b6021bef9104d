use crate::auth::{Role, Session};
use crate::calc;
use crate::catalog;
use crate::ipc::error::{err, ledger_err};
use crate::ipc::handlers::setup::pass_score;
use crate::ipc::helpers::{
    bad_params, f64_param, forbidden, opt_i64_param, opt_str_param, person_id, require_db,
    require_db_mut, require_role, respond, str_param, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::Ledger;
use crate::views;
use rusqlite::Connection;
use serde_json::{json, Value};

/// The course must exist; teachers may only touch courses they teach.
/// Admins pass through, which only `grades.analyze` can reach: every other
/// grades method is teacher-only.
fn ensure_course_access(
    conn: &Connection,
    req: &Request,
    session: &Session,
    course_id: &str,
) -> Result<(), Value> {
    let owner = catalog::course_teacher(conn, course_id).map_err(|e| ledger_err(&req.id, &e))?;
    if session.role == Role::Admin {
        return Ok(());
    }
    let teacher_id = person_id(req, session)?;
    if owner != teacher_id {
        return Err(forbidden(
            req,
            format!("course {course_id} is not taught by {teacher_id}"),
        ));
    }
    Ok(())
}

enum GradeTarget {
    Selection(i64),
    Enrollment { course_id: String, student_id: String },
}

fn parse_target(req: &Request) -> Result<GradeTarget, Value> {
    match opt_i64_param(req, "selectionId")? {
        Some(selection_id) => Ok(GradeTarget::Selection(selection_id)),
        None => {
            let course_id = opt_str_param(req, "courseId")?;
            let student_id = opt_str_param(req, "studentId")?;
            match (course_id, student_id) {
                (Some(c), Some(s)) => Ok(GradeTarget::Enrollment {
                    course_id: c.to_string(),
                    student_id: s.to_string(),
                }),
                _ => Err(bad_params(
                    req,
                    "provide selectionId, or courseId and studentId",
                )),
            }
        }
    }
}

fn handle_input(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Teacher])?;
    let target = parse_target(req)?;
    let score = f64_param(req, "score")?;
    let grade_type = str_param(req, "gradeType")?;

    let retries = state.config.tx_retries;
    let conn = require_db_mut(state, req)?;
    let course_id = match &target {
        GradeTarget::Selection(selection_id) => catalog::selection_course(conn, *selection_id)
            .map_err(|e| ledger_err(&req.id, &e))?,
        GradeTarget::Enrollment { course_id, .. } => course_id.clone(),
    };
    ensure_course_access(conn, req, &session, &course_id)?;

    let mut ledger = Ledger::new(conn, retries);
    let actor = Some(session.user_id.as_str());
    let written = match &target {
        GradeTarget::Selection(selection_id) => {
            ledger.input_grade(actor, *selection_id, score, grade_type)
        }
        GradeTarget::Enrollment {
            course_id,
            student_id,
        } => ledger.input_grade_for(actor, course_id, student_id, score, grade_type),
    }
    .map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "grade": written.grade, "created": written.created }))
}

fn handle_mine(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Student])?;
    let student_id = person_id(req, &session)?;
    let conn = require_db(state, req)?;
    let grades = views::student_grades(conn, student_id)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "grades": grades }))
}

fn handle_roster(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Teacher])?;
    let course_id = str_param(req, "courseId")?;
    let conn = require_db(state, req)?;
    ensure_course_access(conn, req, &session, course_id)?;
    let roster = views::course_roster(conn, course_id)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "courseId": course_id, "students": roster }))
}

fn handle_analyze(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Teacher, Role::Admin])?;
    let course_id = str_param(req, "courseId")?;
    let conn = require_db(state, req)?;
    ensure_course_access(conn, req, &session, course_id)?;
    let pass = pass_score(conn).map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    let analysis = calc::course_analysis(conn, course_id, pass)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({
        "courseId": course_id,
        "passScore": pass,
        "analysis": analysis
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "grades.input" => handle_input(state, req),
        "grades.mine" => handle_mine(state, req),
        "grades.roster" => handle_roster(state, req),
        "grades.analyze" => handle_analyze(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
