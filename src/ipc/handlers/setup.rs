use crate::auth::Role;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_role, require_session};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{MAX_SCORE, MIN_SCORE};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Accounts,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "accounts" => Some(Self::Accounts),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Accounts => "setup.accounts",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "passScore": 60.0
        }),
        SetupSection::Accounts => json!({
            "defaultPassword": "123456",
            "minPasswordLength": 6
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_password(v: &Value, key: &str) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let len = s.chars().count();
    if !(1..=64).contains(&len) {
        return Err(format!("{} length must be in 1..=64", key));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "passScore" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, MIN_SCORE, MAX_SCORE)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Accounts => match k.as_str() {
                "defaultPassword" => {
                    obj.insert(k.clone(), Value::String(parse_password(v, k)?));
                }
                "minPasswordLength" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 64)?));
                }
                _ => return Err(format!("unknown accounts field: {}", k)),
            },
        }
    }
    Ok(())
}

/// Rules spanning several fields of one section; checked on update only.
fn check_section(section: SetupSection, current: &Value) -> Result<(), String> {
    if let SetupSection::Accounts = section {
        let min_len = current
            .get("minPasswordLength")
            .and_then(Value::as_u64)
            .unwrap_or(6);
        let password_len = current
            .get("defaultPassword")
            .and_then(Value::as_str)
            .map(|p| p.chars().count() as u64)
            .unwrap_or(0);
        if password_len < min_len {
            return Err(format!(
                "defaultPassword must be at least minPasswordLength ({}) characters",
                min_len
            ));
        }
    }
    Ok(())
}

fn load_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Field by field, so one malformed historical value only resets itself.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

/// Pass threshold used by grade analysis.
pub(crate) fn pass_score(conn: &rusqlite::Connection) -> anyhow::Result<f64> {
    let grading = load_section(conn, SetupSection::Grading)?;
    Ok(grading
        .get("passScore")
        .and_then(Value::as_f64)
        .unwrap_or(60.0))
}

/// Initial password handed to newly provisioned accounts.
pub(crate) fn default_password(conn: &rusqlite::Connection) -> anyhow::Result<String> {
    let accounts = load_section(conn, SetupSection::Accounts)?;
    Ok(accounts
        .get("defaultPassword")
        .and_then(Value::as_str)
        .unwrap_or("123456")
        .to_string())
}

/// Minimum length enforced on every password the workspace accepts.
pub(crate) fn min_password_length(conn: &rusqlite::Connection) -> anyhow::Result<usize> {
    let accounts = load_section(conn, SetupSection::Accounts)?;
    Ok(accounts
        .get("minPasswordLength")
        .and_then(Value::as_u64)
        .unwrap_or(6) as usize)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_session(state, req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "storage_error", e.to_string(), None),
    };
    let mut accounts = match load_section(conn, SetupSection::Accounts) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "storage_error", e.to_string(), None),
    };
    // Only admins see the initial password.
    let is_admin = state
        .session
        .as_ref()
        .is_some_and(|s| s.role == Role::Admin);
    if !is_admin {
        if let Some(obj) = accounts.as_object_mut() {
            obj.remove("defaultPassword");
        }
    }

    ok(
        &req.id,
        json!({
            "grading": grading,
            "accounts": accounts
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, &[Role::Admin]) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "storage_error", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj)
        .and_then(|()| check_section(section, &current))
    {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "storage_error", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grading_patch_validates_range() {
        let mut current = default_section(SetupSection::Grading);
        let patch = json!({ "passScore": 50 });
        merge_section_patch(SetupSection::Grading, &mut current, patch.as_object().expect("obj"))
            .expect("merge");
        assert_eq!(current["passScore"], json!(50.0));

        let bad = json!({ "passScore": 101 });
        assert!(
            merge_section_patch(SetupSection::Grading, &mut current, bad.as_object().expect("obj"))
                .is_err()
        );
        let unknown = json!({ "maxScore": 90 });
        assert!(merge_section_patch(
            SetupSection::Grading,
            &mut current,
            unknown.as_object().expect("obj")
        )
        .is_err());
    }

    #[test]
    fn saved_sections_merge_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path(), std::time::Duration::from_millis(500)).expect("open");
        assert_eq!(pass_score(&conn).expect("default"), 60.0);
        assert_eq!(default_password(&conn).expect("default"), "123456");

        db::settings_set_json(&conn, "setup.grading", &json!({ "passScore": 55.5 }))
            .expect("save");
        db::settings_set_json(
            &conn,
            "setup.accounts",
            &json!({ "defaultPassword": "", "minPasswordLength": 8 }),
        )
        .expect("save");
        assert_eq!(pass_score(&conn).expect("saved"), 55.5);
        // The invalid password falls back to the default; other fields still apply.
        let accounts = load_section(&conn, SetupSection::Accounts).expect("load");
        assert_eq!(accounts["defaultPassword"], "123456");
        assert_eq!(accounts["minPasswordLength"], 8);
        assert_eq!(min_password_length(&conn).expect("saved"), 8);
    }

    #[test]
    fn default_password_must_satisfy_min_length() {
        let mut current = default_section(SetupSection::Accounts);
        let short = json!({ "defaultPassword": "x" });
        merge_section_patch(SetupSection::Accounts, &mut current, short.as_object().expect("obj"))
            .expect("field is well-formed");
        assert!(check_section(SetupSection::Accounts, &current).is_err());

        let mut current = default_section(SetupSection::Accounts);
        let raise = json!({ "minPasswordLength": 10 });
        merge_section_patch(SetupSection::Accounts, &mut current, raise.as_object().expect("obj"))
            .expect("field is well-formed");
        assert!(check_section(SetupSection::Accounts, &current).is_err());

        let both = json!({ "defaultPassword": "ten-chars!", "minPasswordLength": 10 });
        merge_section_patch(SetupSection::Accounts, &mut current, both.as_object().expect("obj"))
            .expect("merge");
        assert!(check_section(SetupSection::Accounts, &current).is_ok());
        assert!(check_section(SetupSection::Grading, &default_section(SetupSection::Grading)).is_ok());
    }
}
