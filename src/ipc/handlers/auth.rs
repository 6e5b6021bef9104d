use crate::auth;
use crate::ipc::error::{auth_err, err};
use crate::ipc::handlers::setup::min_password_length;
use crate::ipc::helpers::{require_db, require_session, respond, str_param, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::{info, warn};

fn handle_login(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let username = str_param(req, "username")?;
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", "missing password", None));
    };

    match auth::login(conn, username, password) {
        Ok(session) => {
            info!(user_id = %session.user_id, role = session.role.as_str(), "login");
            let out = json!(session);
            state.session = Some(session);
            Ok(out)
        }
        Err(e) => {
            warn!(username, code = e.code(), "login rejected");
            Err(auth_err(&req.id, &e))
        }
    }
}

fn handle_logout(state: &mut AppState, _req: &Request) -> HandlerResult {
    let was_logged_in = state.session.take().is_some();
    Ok(json!({ "loggedOut": was_logged_in }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(state, req)?;
    Ok(json!(session))
}

fn handle_change_password(state: &mut AppState, req: &Request) -> HandlerResult {
    let session = require_session(state, req)?;
    let conn = require_db(state, req)?;
    let (Some(old), Some(new)) = (
        req.params.get("oldPassword").and_then(|v| v.as_str()),
        req.params.get("newPassword").and_then(|v| v.as_str()),
    ) else {
        return Err(err(
            &req.id,
            "bad_params",
            "missing oldPassword or newPassword",
            None,
        ));
    };

    let min_len = min_password_length(conn)
        .map_err(|e| err(&req.id, "storage_error", e.to_string(), None))?;

    auth::change_password(conn, &session.user_id, old, new, min_len)
        .map_err(|e| auth_err(&req.id, &e))?;
    info!(user_id = %session.user_id, "password changed");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "auth.login" => handle_login(state, req),
        "auth.logout" => handle_logout(state, req),
        "auth.whoami" => handle_whoami(state, req),
        "auth.changePassword" => handle_change_password(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
