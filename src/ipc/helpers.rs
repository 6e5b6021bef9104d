use rusqlite::Connection;
use serde_json::Value;

use crate::auth::{Role, Session};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

/// Handler bodies return the error envelope as `Err` so they can use `?`.
pub type HandlerResult = Result<Value, Value>;

pub fn respond(req: &Request, res: HandlerResult) -> Value {
    match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e,
    }
}

pub fn bad_params(req: &Request, message: impl Into<String>) -> Value {
    err(&req.id, "bad_params", message, None)
}

pub fn require_db<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn require_db_mut<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Connection, Value> {
    state
        .db
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn require_session(state: &AppState, req: &Request) -> Result<Session, Value> {
    if state.db.is_none() {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    }
    state
        .session
        .clone()
        .ok_or_else(|| err(&req.id, "unauthenticated", "log in first", None))
}

pub fn require_role(state: &AppState, req: &Request, allowed: &[Role]) -> Result<Session, Value> {
    let session = require_session(state, req)?;
    if !allowed.contains(&session.role) {
        return Err(forbidden(
            req,
            format!("{} may not call {}", session.role.as_str(), req.method),
        ));
    }
    Ok(session)
}

pub fn forbidden(req: &Request, message: impl Into<String>) -> Value {
    err(&req.id, "forbidden", message, None)
}

/// Role-scoped id of the caller (student, teacher or counselor id).
pub fn person_id<'s>(req: &Request, session: &'s Session) -> Result<&'s str, Value> {
    session
        .person_id
        .as_deref()
        .ok_or_else(|| forbidden(req, "account has no linked person record"))
}

pub fn str_param<'r>(req: &'r Request, key: &str) -> Result<&'r str, Value> {
    match opt_str_param(req, key)? {
        Some(s) => Ok(s),
        None => Err(bad_params(req, format!("missing {key}"))),
    }
}

pub fn opt_str_param<'r>(req: &'r Request, key: &str) -> Result<Option<&'r str>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .map(str::trim)
                .ok_or_else(|| bad_params(req, format!("{key} must be a string")))?;
            if s.is_empty() {
                return Err(bad_params(req, format!("{key} must not be empty")));
            }
            Ok(Some(s))
        }
    }
}

pub fn i64_param(req: &Request, key: &str) -> Result<i64, Value> {
    match opt_i64_param(req, key)? {
        Some(n) => Ok(n),
        None => Err(bad_params(req, format!("missing {key}"))),
    }
}

pub fn opt_i64_param(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{key} must be an integer"))),
    }
}

pub fn f64_param(req: &Request, key: &str) -> Result<f64, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Err(bad_params(req, format!("missing {key}"))),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| bad_params(req, format!("{key} must be a number"))),
    }
}
