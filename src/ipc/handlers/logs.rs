use crate::audit;
use crate::auth::Role;
use crate::ipc::error::err;
use crate::ipc::helpers::{bad_params, opt_i64_param, require_db, require_role, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    require_role(state, req, &[Role::Admin])?;
    let conn = require_db(state, req)?;
    let limit = opt_i64_param(req, "limit")?.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(bad_params(req, format!("limit must be in 1..={MAX_LIMIT}")));
    }
    let entries = audit::recent(conn, limit)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;
    Ok(json!({ "logs": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "logs.list" => handle_list(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
