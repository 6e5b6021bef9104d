use crate::auth::{self, Role};
use crate::ipc::error::{auth_err, err, ledger_err};
use crate::ipc::handlers::setup::{default_password, min_password_length};
use crate::ipc::helpers::{
    bad_params, i64_param, opt_str_param, require_db_mut, require_role, respond, str_param,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Ledger, PersonProfile};
use serde_json::{json, Value};

fn parse_profile(req: &Request) -> Result<PersonProfile, Value> {
    let role_raw = str_param(req, "role")?;
    let name = str_param(req, "name")?.to_string();
    match Role::parse(role_raw) {
        Some(Role::Student) => {
            let gender = opt_str_param(req, "gender")?.map(str::to_string);
            Ok(PersonProfile::Student {
                name,
                gender,
                class_id: i64_param(req, "classId")?,
            })
        }
        Some(Role::Teacher) => Ok(PersonProfile::Teacher {
            name,
            title: opt_str_param(req, "title")?.map(str::to_string),
            department: opt_str_param(req, "department")?.map(str::to_string),
        }),
        Some(Role::Counselor) => Ok(PersonProfile::Counselor {
            name,
            department: opt_str_param(req, "department")?.map(str::to_string),
        }),
        Some(Role::Admin) | None => Err(bad_params(
            req,
            "role must be one of: student, teacher, counselor",
        )),
    }
}

fn handle_provision(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_role(state, req, &[Role::Admin])?;
    let profile = parse_profile(req)?;
    let explicit_password = match req.params.get("password") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_str() {
            Some(s) if !s.is_empty() => Some(s.to_string()),
            _ => return Err(bad_params(req, "password must be a non-empty string")),
        },
    };

    let retries = state.config.tx_retries;
    let conn = require_db_mut(state, req)?;
    let password = match explicit_password {
        Some(p) => p,
        None => default_password(conn)
            .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?,
    };
    // Settings written before the length rule may still hold a short default.
    let min_len = min_password_length(conn)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    auth::check_password_strength(&password, min_len).map_err(|e| auth_err(&req.id, &e))?;
    let person = Ledger::new(conn, retries)
        .provision(Some(&session.user_id), &profile, &password)
        .map_err(|e| ledger_err(&req.id, &e))?;
    Ok(json!({ "person": person }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "people.provision" => handle_provision(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
