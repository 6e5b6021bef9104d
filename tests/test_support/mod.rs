#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_PASSWORD: &str = "123456";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_enrolld");
    let mut child = Command::new(exe)
        .env_remove("ENROLLD_WORKSPACE")
        .env_remove("ENROLLD_ADMIN_PASSWORD")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn enrolld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

/// Sends a request that must fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &Path,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    )
}

pub fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    username: &str,
    password: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "username": username, "password": password }),
    )
}

pub struct Seeded {
    pub class_id: i64,
    pub other_class_id: i64,
    pub semester_id: i64,
    pub teacher_id: String,
    pub other_teacher_id: String,
    pub counselor_id: String,
}

fn provision(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    params: serde_json::Value,
) -> String {
    let out = request_ok(stdin, reader, id, "people.provision", params);
    out["person"]["personId"]
        .as_str()
        .expect("personId")
        .to_string()
}

/// Logs in as admin and creates a counselor, a major, two classes (the
/// first counseled), a semester and two teachers.
pub fn seed_catalog(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    login(stdin, reader, "admin", ADMIN_PASSWORD);

    let counselor_id = provision(
        stdin,
        reader,
        "seed-1",
        json!({ "role": "counselor", "name": "Grace", "department": "Student Affairs" }),
    );
    let major = request_ok(
        stdin,
        reader,
        "seed-2",
        "majors.create",
        json!({ "name": "Computer Science", "department": "Engineering" }),
    );
    let major_id = major["majorId"].as_i64().expect("majorId");
    let class = request_ok(
        stdin,
        reader,
        "seed-3",
        "classes.create",
        json!({
            "name": "CS-1",
            "majorId": major_id,
            "gradeYear": 2024,
            "counselorId": counselor_id
        }),
    );
    let other_class = request_ok(
        stdin,
        reader,
        "seed-4",
        "classes.create",
        json!({ "name": "CS-2", "majorId": major_id, "gradeYear": 2024 }),
    );
    let semester = request_ok(
        stdin,
        reader,
        "seed-5",
        "semesters.create",
        json!({ "name": "2024 Fall", "startDate": "2024-09-01", "endDate": "2025-01-15" }),
    );
    let teacher_id = provision(
        stdin,
        reader,
        "seed-6",
        json!({ "role": "teacher", "name": "Ada", "title": "Professor" }),
    );
    let other_teacher_id = provision(
        stdin,
        reader,
        "seed-7",
        json!({ "role": "teacher", "name": "Edsger" }),
    );

    Seeded {
        class_id: class["classId"].as_i64().expect("classId"),
        other_class_id: other_class["classId"].as_i64().expect("classId"),
        semester_id: semester["semesterId"].as_i64().expect("semesterId"),
        teacher_id,
        other_teacher_id,
        counselor_id,
    }
}

pub fn create_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    seeded: &Seeded,
    name: &str,
    capacity: i64,
) -> String {
    let out = request_ok(
        stdin,
        reader,
        "course",
        "courses.create",
        json!({
            "name": name,
            "credits": 3.0,
            "hours": 48,
            "semesterId": seeded.semester_id,
            "teacherId": seeded.teacher_id,
            "maxStudents": capacity
        }),
    );
    out["course"]["courseId"]
        .as_str()
        .expect("courseId")
        .to_string()
}

pub fn provision_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: i64,
    name: &str,
) -> String {
    provision(
        stdin,
        reader,
        "student",
        json!({ "role": "student", "name": name, "classId": class_id }),
    )
}
