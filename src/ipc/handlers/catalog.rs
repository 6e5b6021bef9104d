use crate::auth::Role;
use crate::catalog::{self, CoursePatch, NewCourse};
use crate::ipc::error::{err, ledger_err};
use crate::ipc::helpers::{
    bad_params, f64_param, i64_param, opt_i64_param, opt_str_param, person_id, require_db,
    require_db_mut, require_role, require_session, respond, str_param, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::views;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

const ADMIN: &[Role] = &[Role::Admin];

fn handle_majors_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(state, req, ADMIN)?;
    let conn = require_db(state, req)?;
    let name = str_param(req, "name")?;
    let department = str_param(req, "department")?;
    let major_id =
        catalog::create_major(conn, name, department).map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "majorId": major_id }))
}

fn handle_majors_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_session(state, req)?;
    let conn = require_db(state, req)?;
    let majors = catalog::list_majors(conn).map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "majors": majors }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(state, req, ADMIN)?;
    let conn = require_db(state, req)?;
    let name = str_param(req, "name")?;
    let major_id = i64_param(req, "majorId")?;
    let grade_year = i64_param(req, "gradeYear")?;
    let counselor_id = opt_str_param(req, "counselorId")?;
    let class_id = catalog::create_class(conn, name, major_id, grade_year, counselor_id)
        .map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "classId": class_id }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_session(state, req)?;
    let conn = require_db(state, req)?;
    let classes = catalog::list_classes(conn).map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "classes": classes }))
}

fn parse_date(req: &Request, key: &str) -> Result<NaiveDate, Value> {
    let raw = str_param(req, key)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| bad_params(req, format!("{key} must be YYYY-MM-DD")))
}

fn handle_semesters_create(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(state, req, ADMIN)?;
    let conn = require_db(state, req)?;
    let name = str_param(req, "name")?;
    let start = parse_date(req, "startDate")?;
    let end = parse_date(req, "endDate")?;
    if end < start {
        return Err(bad_params(req, "endDate must not be before startDate"));
    }
    let status = opt_i64_param(req, "status")?.unwrap_or(1);
    if status != 0 && status != 1 {
        return Err(bad_params(req, "status must be 0 or 1"));
    }
    let semester_id = catalog::create_semester(
        conn,
        name,
        &start.format("%Y-%m-%d").to_string(),
        &end.format("%Y-%m-%d").to_string(),
        status,
    )
    .map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "semesterId": semester_id }))
}

fn handle_semesters_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_session(state, req)?;
    let conn = require_db(state, req)?;
    let semesters = catalog::list_semesters(conn).map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "semesters": semesters }))
}

fn non_negative_f64(req: &Request, key: &str, v: f64) -> Result<f64, Value> {
    if !v.is_finite() || v < 0.0 {
        return Err(bad_params(req, format!("{key} must be >= 0")));
    }
    Ok(v)
}

fn non_negative_i64(req: &Request, key: &str, v: i64) -> Result<i64, Value> {
    if v < 0 {
        return Err(bad_params(req, format!("{key} must be >= 0")));
    }
    Ok(v)
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, ADMIN)?;
    let course = NewCourse {
        name: str_param(req, "name")?.to_string(),
        credits: non_negative_f64(req, "credits", f64_param(req, "credits")?)?,
        hours: non_negative_i64(req, "hours", i64_param(req, "hours")?)?,
        semester_id: i64_param(req, "semesterId")?,
        teacher_id: str_param(req, "teacherId")?.to_string(),
        max_students: non_negative_i64(req, "maxStudents", i64_param(req, "maxStudents")?)?,
        description: opt_str_param(req, "description")?.map(str::to_string),
    };
    let retries = state.config.tx_retries;
    let conn = require_db_mut(state, req)?;
    let course_id = catalog::create_course(conn, retries, Some(&session.user_id), &course)
        .map_err(|e| ledger_err(&req.id, &e))?;
    let info = catalog::get_course(conn, &course_id).map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "course": info }))
}

/// Builds a typed patch from the request object; unknown keys are rejected.
fn parse_course_patch(req: &Request, patch: &Map<String, Value>) -> Result<CoursePatch, Value> {
    let mut out = CoursePatch::default();
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let s = v
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| bad_params(req, "name must be a non-empty string"))?;
                out.name = Some(s.to_string());
            }
            "credits" => {
                let n = v
                    .as_f64()
                    .ok_or_else(|| bad_params(req, "credits must be a number"))?;
                out.credits = Some(non_negative_f64(req, k, n)?);
            }
            "hours" | "maxStudents" => {
                let n = v
                    .as_i64()
                    .ok_or_else(|| bad_params(req, format!("{k} must be an integer")))?;
                let n = non_negative_i64(req, k, n)?;
                if k == "hours" {
                    out.hours = Some(n);
                } else {
                    out.max_students = Some(n);
                }
            }
            "semesterId" => {
                out.semester_id = Some(
                    v.as_i64()
                        .ok_or_else(|| bad_params(req, "semesterId must be an integer"))?,
                );
            }
            "teacherId" => {
                let s = v
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| bad_params(req, "teacherId must be a non-empty string"))?;
                out.teacher_id = Some(s.to_string());
            }
            "description" => {
                out.description = Some(match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    _ => return Err(bad_params(req, "description must be a string or null")),
                });
            }
            _ => return Err(bad_params(req, format!("unknown course field: {k}"))),
        }
    }
    if out.is_empty() {
        return Err(bad_params(req, "patch must not be empty"));
    }
    Ok(out)
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, ADMIN)?;
    let course_id = str_param(req, "courseId")?;
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(bad_params(req, "patch must be an object"));
    };
    let patch = parse_course_patch(req, patch_obj)?;
    let retries = state.config.tx_retries;
    let conn = require_db_mut(state, req)?;
    let info = catalog::update_course(conn, retries, Some(&session.user_id), course_id, &patch)
        .map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "course": info }))
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> HandlerResult {
    require_session(state, req)?;
    let conn = require_db(state, req)?;
    let course_id = str_param(req, "courseId")?;
    let info = catalog::get_course(conn, course_id).map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "course": info }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_session(state, req)?;
    let conn = require_db(state, req)?;
    let courses = catalog::list_courses(conn).map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "courses": courses }))
}

fn handle_courses_mine(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Teacher])?;
    let teacher_id = person_id(req, &session)?;
    let conn = require_db(state, req)?;
    let courses = views::teacher_courses(conn, teacher_id)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "teacherId": teacher_id, "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "majors.create" => handle_majors_create(state, req),
        "majors.list" => handle_majors_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.list" => handle_classes_list(state, req),
        "semesters.create" => handle_semesters_create(state, req),
        "semesters.list" => handle_semesters_list(state, req),
        "courses.create" => handle_courses_create(state, req),
        "courses.update" => handle_courses_update(state, req),
        "courses.get" => handle_courses_get(state, req),
        "courses.list" => handle_courses_list(state, req),
        "courses.mine" => handle_courses_mine(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
