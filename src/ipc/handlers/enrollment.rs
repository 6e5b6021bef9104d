use crate::auth::{Role, Session};
use crate::ipc::error::{err, ledger_err};
use crate::ipc::helpers::{
    forbidden, opt_str_param, person_id, require_db, require_db_mut, require_role, respond,
    str_param, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::Ledger;
use crate::views;
use serde_json::{json, Value};

const CALLERS: &[Role] = &[Role::Student, Role::Admin];

/// Students act on themselves; admins name the student explicitly.
fn target_student(req: &Request, session: &Session) -> Result<String, Value> {
    match session.role {
        Role::Student => {
            let own = person_id(req, session)?;
            if let Some(requested) = opt_str_param(req, "studentId")? {
                if requested != own {
                    return Err(forbidden(req, "students may only act on their own record"));
                }
            }
            Ok(own.to_string())
        }
        Role::Admin => Ok(str_param(req, "studentId")?.to_string()),
        Role::Teacher | Role::Counselor => Err(forbidden(
            req,
            format!("{} may not call {}", session.role.as_str(), req.method),
        )),
    }
}

fn handle_available(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, CALLERS)?;
    let student_id = target_student(req, &session)?;
    let conn = require_db(state, req)?;
    let courses = views::available_courses(conn, &student_id)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "courses": courses }))
}

fn handle_enroll(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, CALLERS)?;
    let student_id = target_student(req, &session)?;
    let course_id = str_param(req, "courseId")?;
    let retries = state.config.tx_retries;
    let conn = require_db_mut(state, req)?;
    let selection = Ledger::new(conn, retries)
        .enroll(Some(&session.user_id), &student_id, course_id)
        .map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "selection": selection }))
}

fn handle_drop(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, CALLERS)?;
    let student_id = target_student(req, &session)?;
    let course_id = str_param(req, "courseId")?;
    let retries = state.config.tx_retries;
    let conn = require_db_mut(state, req)?;
    let selection = Ledger::new(conn, retries)
        .drop_course(Some(&session.user_id), &student_id, course_id)
        .map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "selection": selection }))
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, CALLERS)?;
    let student_id = target_student(req, &session)?;
    let conn = require_db(state, req)?;
    let selections = views::student_selections(conn, &student_id)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "selections": selections }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "enrollment.available" => handle_available(state, req),
        "enrollment.enroll" => handle_enroll(state, req),
        "enrollment.drop" => handle_drop(state, req),
        "enrollment.list" => handle_list(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
