use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE: &str = "enrolld.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // journal_mode returns the resulting mode as a row.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            user_id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            role TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            status INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS majors(
            major_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            department TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS counselors(
            counselor_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            department TEXT,
            FOREIGN KEY(user_id) REFERENCES users(user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            class_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            major_id INTEGER NOT NULL,
            grade_year INTEGER NOT NULL,
            counselor_id TEXT,
            FOREIGN KEY(major_id) REFERENCES majors(major_id),
            FOREIGN KEY(counselor_id) REFERENCES counselors(counselor_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_counselor ON classes(counselor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            student_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            gender TEXT,
            class_id INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(user_id),
            FOREIGN KEY(class_id) REFERENCES classes(class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            teacher_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            title TEXT,
            department TEXT,
            FOREIGN KEY(user_id) REFERENCES users(user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            semester_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            course_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            credits REAL NOT NULL,
            hours INTEGER NOT NULL,
            semester_id INTEGER NOT NULL,
            teacher_id TEXT NOT NULL,
            max_students INTEGER NOT NULL CHECK(max_students >= 0),
            description TEXT,
            FOREIGN KEY(semester_id) REFERENCES semesters(semester_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(teacher_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_teacher ON courses(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_selections(
            selection_id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            semester_id INTEGER NOT NULL,
            select_time TEXT NOT NULL,
            status INTEGER NOT NULL,
            drop_time TEXT,
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            FOREIGN KEY(course_id) REFERENCES courses(course_id),
            FOREIGN KEY(semester_id) REFERENCES semesters(semester_id)
        )",
        [],
    )?;
    // Older workspaces predate the separate drop timestamp.
    ensure_selections_drop_time(&conn)?;
    // One ACTIVE selection per (student, course); DROPPED rows are history.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_selections_active
         ON course_selections(student_id, course_id) WHERE status = 1",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_selections_course_status
         ON course_selections(course_id, status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_selections_student ON course_selections(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            grade_id INTEGER PRIMARY KEY AUTOINCREMENT,
            selection_id INTEGER NOT NULL UNIQUE,
            score REAL NOT NULL,
            grade_type TEXT NOT NULL,
            input_time TEXT NOT NULL,
            FOREIGN KEY(selection_id) REFERENCES course_selections(selection_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_focus(
            focus_id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            counselor_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            FOREIGN KEY(counselor_id) REFERENCES counselors(counselor_id),
            UNIQUE(student_id, counselor_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS system_logs(
            log_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT,
            action_type TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            details TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_selections_drop_time(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "course_selections", "drop_time")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE course_selections ADD COLUMN drop_time TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| r.get(0))
        .optional()?;
    match raw {
        Some(text) => {
            let value = serde_json::from_str(&text)
                .with_context(|| format!("setting {} is not valid JSON", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Wall-clock timestamp in the format stored across all tables.
pub fn now_stamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn open_is_idempotent_and_migrates_drop_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let conn = Connection::open(dir.path().join(DB_FILE)).expect("open raw");
            conn.execute(
                "CREATE TABLE course_selections(
                    selection_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id TEXT NOT NULL,
                    course_id TEXT NOT NULL,
                    semester_id INTEGER NOT NULL,
                    select_time TEXT NOT NULL,
                    status INTEGER NOT NULL
                )",
                [],
            )
            .expect("legacy table");
        }

        let conn = open_db(dir.path(), Duration::from_millis(500)).expect("open");
        assert!(table_has_column(&conn, "course_selections", "drop_time").expect("pragma"));
        drop(conn);
        let conn = open_db(dir.path(), Duration::from_millis(500)).expect("reopen");
        assert!(table_has_column(&conn, "course_selections", "drop_time").expect("pragma"));
    }

    #[test]
    fn settings_roundtrip_overwrites_existing_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path(), Duration::from_millis(500)).expect("open");
        assert!(settings_get_json(&conn, "setup.grading").expect("get").is_none());

        settings_set_json(&conn, "setup.grading", &json!({ "passScore": 50 })).expect("set");
        settings_set_json(&conn, "setup.grading", &json!({ "passScore": 65 })).expect("set");
        assert_eq!(
            settings_get_json(&conn, "setup.grading").expect("get"),
            Some(json!({ "passScore": 65 }))
        );
    }
}
