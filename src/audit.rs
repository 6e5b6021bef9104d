use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub log_id: i64,
    pub user_id: Option<String>,
    pub action_type: String,
    pub target_type: String,
    pub target_id: String,
    pub details: Option<String>,
    pub created_at: String,
}

/// Appends a `system_logs` row. Called with the open transaction so the
/// entry commits or rolls back together with the change it describes.
pub fn record(
    conn: &Connection,
    user_id: Option<&str>,
    action_type: &str,
    target_type: &str,
    target_id: &str,
    details: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO system_logs(user_id, action_type, target_type, target_id, details, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            user_id,
            action_type,
            target_type,
            target_id,
            details,
            crate::db::now_stamp(),
        ),
    )?;
    Ok(())
}

pub fn recent(conn: &Connection, limit: i64) -> rusqlite::Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT log_id, user_id, action_type, target_type, target_id, details, created_at
         FROM system_logs
         ORDER BY log_id DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit], |r| {
            Ok(LogEntry {
                log_id: r.get(0)?,
                user_id: r.get(1)?,
                action_type: r.get(2)?,
                target_type: r.get(3)?,
                target_id: r.get(4)?,
                details: r.get(5)?,
                created_at: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
