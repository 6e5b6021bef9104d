use crate::auth;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "authenticated": state.session.is_some()
        }),
    )
}

/// Opens (creating if needed) the workspace database and makes it current.
/// Returns whether a fresh admin account was bootstrapped.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<bool> {
    let conn = db::open_db(path, state.config.busy_timeout)?;
    let admin_created = auth::bootstrap_admin(&conn, &state.config.admin_password)
        .context("failed to bootstrap admin account")?;
    if admin_created {
        info!(workspace = %path.display(), "bootstrapped admin account");
    }

    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.session = None;
    info!(workspace = %path.display(), "workspace opened");
    Ok(admin_created)
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, &path) {
        Ok(admin_created) => ok(
            &req.id,
            json!({
                "workspacePath": path.to_string_lossy(),
                "adminCreated": admin_created
            }),
        ),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
