use crate::auth::Role;
use crate::ipc::error::err;
use crate::ipc::helpers::{require_db, require_role, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::views;
use serde_json::json;

fn handle_teacher_workload(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(state, req, &[Role::Admin])?;
    let conn = require_db(state, req)?;
    let teachers = views::teacher_workload(conn)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "teachers": teachers }))
}

// `report` is null until some semester is active.
fn handle_course_selection(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(state, req, &[Role::Admin])?;
    let conn = require_db(state, req)?;
    let report = views::course_selection_report(conn)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "report": report }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "reports.teacherWorkload" => handle_teacher_workload(state, req),
        "reports.courseSelection" => handle_course_selection(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
