//! Enrollment ledger: course selection, drop, grade entry and person
//! provisioning.
//!
//! Every write runs in a `BEGIN IMMEDIATE` transaction so the read half of a
//! check-then-act sequence (capacity, existing selection, existing grade,
//! next identifier) happens under the database write lock. The storage
//! constraints (`ux_selections_active`, `grades.selection_id UNIQUE`) back
//! the same invariants up at the schema level.

use crate::audit;
use crate::auth::{self, Role};
use crate::db;
use rusqlite::{ffi, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("student {student_id} is already enrolled in course {course_id}")]
    AlreadyEnrolled {
        student_id: String,
        course_id: String,
    },
    #[error("course {course_id} is full ({capacity} seats)")]
    CourseFull { course_id: String, capacity: i64 },
    #[error("student {student_id} has no active selection for course {course_id}")]
    NotEnrolled {
        student_id: String,
        course_id: String,
    },
    #[error("selection {selection_id} already has a recorded grade")]
    GradeAlreadyRecorded { selection_id: i64 },
    #[error("invalid grade type {0:?}: must be one of final, makeup, resit")]
    InvalidGradeType(String),
    #[error("invalid score {0}: must be between 0 and 100")]
    InvalidScore(f64),
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: String },
    #[error("capacity {requested} is below the {active} active selections of course {course_id}")]
    CapacityBelowEnrollment {
        course_id: String,
        requested: i64,
        active: i64,
    },
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyEnrolled { .. } => "already_enrolled",
            Self::CourseFull { .. } => "course_full",
            Self::NotEnrolled { .. } => "not_enrolled",
            Self::GradeAlreadyRecorded { .. } => "grade_already_recorded",
            Self::InvalidGradeType(_) => "invalid_grade_type",
            Self::InvalidScore(_) => "invalid_score",
            Self::EntityNotFound { .. } => "not_found",
            Self::CapacityBelowEnrollment { .. } => "capacity_below_enrollment",
            Self::ProvisioningFailed(_) => "provisioning_failed",
            Self::Storage(_) => "storage_error",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeType {
    Regular,
    Final,
    Makeup,
    Resit,
}

impl GradeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Final => "final",
            Self::Makeup => "makeup",
            Self::Resit => "resit",
        }
    }

    /// Accepts the tags a grader may enter. `regular` only exists on rows
    /// written before typed entry and is rejected here.
    pub fn parse_input(raw: &str) -> LedgerResult<Self> {
        match raw {
            "final" => Ok(Self::Final),
            "makeup" => Ok(Self::Makeup),
            "resit" => Ok(Self::Resit),
            other => Err(LedgerError::InvalidGradeType(other.to_string())),
        }
    }

    pub fn parse_stored(raw: &str) -> Option<Self> {
        match raw {
            "regular" => Some(Self::Regular),
            other => Self::parse_input(other).ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStatus {
    Dropped,
    Active,
}

impl SelectionStatus {
    pub fn from_db(v: i64) -> Self {
        if v == 1 {
            Self::Active
        } else {
            Self::Dropped
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub selection_id: i64,
    pub student_id: String,
    pub course_id: String,
    pub semester_id: i64,
    pub select_time: String,
    pub status: SelectionStatus,
    pub drop_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub grade_id: i64,
    pub selection_id: i64,
    pub score: f64,
    pub grade_type: String,
    pub input_time: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeWrite {
    pub grade: Grade,
    pub created: bool,
}

/// Profile fields for a person that gets a paired login account.
#[derive(Debug, Clone)]
pub enum PersonProfile {
    Student {
        name: String,
        gender: Option<String>,
        class_id: i64,
    },
    Teacher {
        name: String,
        title: Option<String>,
        department: Option<String>,
    },
    Counselor {
        name: String,
        department: Option<String>,
    },
}

impl PersonProfile {
    pub fn role(&self) -> Role {
        match self {
            Self::Student { .. } => Role::Student,
            Self::Teacher { .. } => Role::Teacher,
            Self::Counselor { .. } => Role::Counselor,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedPerson {
    pub person_id: String,
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

/// Runs `f` inside an IMMEDIATE transaction, committing on `Ok`. The
/// transaction rolls back when dropped, so any error path leaves no writes.
/// `SQLITE_BUSY` that outlasts the connection's busy timeout is retried up
/// to `retries` times.
pub fn with_immediate_tx<T, F>(conn: &mut Connection, retries: u32, mut f: F) -> LedgerResult<T>
where
    F: FnMut(&Transaction<'_>) -> LedgerResult<T>,
{
    let mut attempt: u32 = 0;
    loop {
        match run_once(conn, &mut f) {
            Err(LedgerError::Storage(e)) if is_busy(&e) && attempt < retries => {
                attempt += 1;
                warn!(attempt, "database busy; retrying transaction");
                std::thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
            }
            other => return other,
        }
    }
}

fn run_once<T, F>(conn: &mut Connection, f: &mut F) -> LedgerResult<T>
where
    F: FnMut(&Transaction<'_>) -> LedgerResult<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

/// Ledger operations bound to one connection. Each call opens and closes
/// its own transaction.
pub struct Ledger<'c> {
    conn: &'c mut Connection,
    retries: u32,
}

impl<'c> Ledger<'c> {
    pub fn new(conn: &'c mut Connection, retries: u32) -> Self {
        Self { conn, retries }
    }

    pub fn enroll(
        &mut self,
        actor: Option<&str>,
        student_id: &str,
        course_id: &str,
    ) -> LedgerResult<Selection> {
        let res = with_immediate_tx(self.conn, self.retries, |tx| {
            enroll_in(tx, actor, student_id, course_id)
        });
        match &res {
            Ok(sel) => info!(
                selection_id = sel.selection_id,
                student_id, course_id, "enrolled"
            ),
            Err(e) => warn!(student_id, course_id, code = e.code(), "enroll rejected: {e}"),
        }
        res
    }

    pub fn drop_course(
        &mut self,
        actor: Option<&str>,
        student_id: &str,
        course_id: &str,
    ) -> LedgerResult<Selection> {
        let res = with_immediate_tx(self.conn, self.retries, |tx| {
            drop_in(tx, actor, student_id, course_id)
        });
        match &res {
            Ok(sel) => info!(
                selection_id = sel.selection_id,
                student_id, course_id, "dropped"
            ),
            Err(e) => warn!(student_id, course_id, code = e.code(), "drop rejected: {e}"),
        }
        res
    }

    pub fn input_grade(
        &mut self,
        actor: Option<&str>,
        selection_id: i64,
        score: f64,
        grade_type: &str,
    ) -> LedgerResult<GradeWrite> {
        let grade_type = GradeType::parse_input(grade_type)?;
        validate_score(score)?;
        let res = with_immediate_tx(self.conn, self.retries, |tx| {
            input_grade_in(tx, actor, selection_id, score, grade_type)
        });
        log_grade_result(&res, selection_id);
        res
    }

    /// Grades the ACTIVE selection of `student_id` in `course_id`.
    pub fn input_grade_for(
        &mut self,
        actor: Option<&str>,
        course_id: &str,
        student_id: &str,
        score: f64,
        grade_type: &str,
    ) -> LedgerResult<GradeWrite> {
        let grade_type = GradeType::parse_input(grade_type)?;
        validate_score(score)?;
        let mut resolved: i64 = -1;
        let res = with_immediate_tx(self.conn, self.retries, |tx| {
            let selection_id = active_selection_id(tx, student_id, course_id)?.ok_or_else(|| {
                LedgerError::NotEnrolled {
                    student_id: student_id.to_string(),
                    course_id: course_id.to_string(),
                }
            })?;
            resolved = selection_id;
            input_grade_in(tx, actor, selection_id, score, grade_type)
        });
        log_grade_result(&res, resolved);
        res
    }

    /// Creates the person row and its login account together. A failed
    /// write is reported as `ProvisioningFailed` after a full rollback;
    /// storage failures such as an exhausted busy retry stay `Storage`.
    pub fn provision(
        &mut self,
        actor: Option<&str>,
        profile: &PersonProfile,
        initial_password: &str,
    ) -> LedgerResult<ProvisionedPerson> {
        let password_hash = auth::hash_password(initial_password);
        let res = with_immediate_tx(self.conn, self.retries, |tx| {
            provision_in(tx, actor, profile, &password_hash)
        });
        match res {
            Ok(p) => {
                info!(person_id = %p.person_id, user_id = %p.user_id, role = p.role.as_str(), "provisioned");
                Ok(p)
            }
            Err(e) => {
                warn!(role = profile.role().as_str(), "provisioning failed: {e}");
                Err(match e {
                    LedgerError::ProvisioningFailed(_) | LedgerError::Storage(_) => e,
                    other => LedgerError::ProvisioningFailed(other.to_string()),
                })
            }
        }
    }
}

fn log_grade_result(res: &LedgerResult<GradeWrite>, selection_id: i64) {
    match res {
        Ok(w) => info!(
            selection_id = w.grade.selection_id,
            score = w.grade.score,
            grade_type = %w.grade.grade_type,
            created = w.created,
            "grade recorded"
        ),
        Err(e) => warn!(selection_id, code = e.code(), "grade input rejected: {e}"),
    }
}

pub fn validate_score(score: f64) -> LedgerResult<()> {
    if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(LedgerError::InvalidScore(score));
    }
    Ok(())
}

fn active_selection_id(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> LedgerResult<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT selection_id FROM course_selections
             WHERE student_id = ? AND course_id = ? AND status = 1",
            (student_id, course_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn load_selection(conn: &Connection, selection_id: i64) -> LedgerResult<Selection> {
    conn.query_row(
        "SELECT selection_id, student_id, course_id, semester_id, select_time, status, drop_time
         FROM course_selections WHERE selection_id = ?",
        [selection_id],
        |r| {
            Ok(Selection {
                selection_id: r.get(0)?,
                student_id: r.get(1)?,
                course_id: r.get(2)?,
                semester_id: r.get(3)?,
                select_time: r.get(4)?,
                status: SelectionStatus::from_db(r.get(5)?),
                drop_time: r.get(6)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("selection", selection_id.to_string()))
}

pub fn load_grade(conn: &Connection, selection_id: i64) -> LedgerResult<Option<Grade>> {
    let grade = conn
        .query_row(
            "SELECT grade_id, selection_id, score, grade_type, input_time
             FROM grades WHERE selection_id = ?",
            [selection_id],
            |r| {
                Ok(Grade {
                    grade_id: r.get(0)?,
                    selection_id: r.get(1)?,
                    score: r.get(2)?,
                    grade_type: r.get(3)?,
                    input_time: r.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(grade)
}

pub fn enroll_in(
    tx: &Transaction<'_>,
    actor: Option<&str>,
    student_id: &str,
    course_id: &str,
) -> LedgerResult<Selection> {
    let student: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM students WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    if student.is_none() {
        return Err(LedgerError::not_found("student", student_id));
    }

    let capacity: Option<i64> = tx
        .query_row(
            "SELECT max_students FROM courses WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(capacity) = capacity else {
        return Err(LedgerError::not_found("course", course_id));
    };

    if active_selection_id(tx, student_id, course_id)?.is_some() {
        return Err(LedgerError::AlreadyEnrolled {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
        });
    }

    // Capacity check and insert are one statement.
    let inserted = tx.execute(
        "INSERT INTO course_selections(student_id, course_id, semester_id, select_time, status)
         SELECT ?1, c.course_id, c.semester_id, ?3, 1
         FROM courses c
         WHERE c.course_id = ?2
           AND (SELECT COUNT(*) FROM course_selections cs
                WHERE cs.course_id = c.course_id AND cs.status = 1) < c.max_students",
        (student_id, course_id, db::now_stamp()),
    );
    let inserted = match inserted {
        Ok(n) => n,
        Err(e) if is_unique_violation(&e) => {
            return Err(LedgerError::AlreadyEnrolled {
                student_id: student_id.to_string(),
                course_id: course_id.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    if inserted == 0 {
        return Err(LedgerError::CourseFull {
            course_id: course_id.to_string(),
            capacity,
        });
    }

    let selection_id = tx.last_insert_rowid();
    audit::record(
        tx,
        actor,
        "enroll",
        "selection",
        &selection_id.to_string(),
        Some(&format!("student={} course={}", student_id, course_id)),
    )?;
    load_selection(tx, selection_id)
}

pub fn drop_in(
    tx: &Transaction<'_>,
    actor: Option<&str>,
    student_id: &str,
    course_id: &str,
) -> LedgerResult<Selection> {
    let row: Option<(i64, Option<i64>)> = tx
        .query_row(
            "SELECT cs.selection_id, g.grade_id
             FROM course_selections cs
             LEFT JOIN grades g ON g.selection_id = cs.selection_id
             WHERE cs.student_id = ? AND cs.course_id = ? AND cs.status = 1",
            (student_id, course_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let Some((selection_id, grade_id)) = row else {
        return Err(LedgerError::NotEnrolled {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
        });
    };
    if grade_id.is_some() {
        return Err(LedgerError::GradeAlreadyRecorded { selection_id });
    }

    tx.execute(
        "UPDATE course_selections SET status = 0, drop_time = ?
         WHERE selection_id = ? AND status = 1",
        (db::now_stamp(), selection_id),
    )?;
    audit::record(
        tx,
        actor,
        "drop",
        "selection",
        &selection_id.to_string(),
        Some(&format!("student={} course={}", student_id, course_id)),
    )?;
    load_selection(tx, selection_id)
}

pub fn input_grade_in(
    tx: &Transaction<'_>,
    actor: Option<&str>,
    selection_id: i64,
    score: f64,
    grade_type: GradeType,
) -> LedgerResult<GradeWrite> {
    // Every stored selection was ACTIVE when created, so existence is enough.
    let exists: Option<i64> = tx
        .query_row(
            "SELECT selection_id FROM course_selections WHERE selection_id = ?",
            [selection_id],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(LedgerError::not_found("selection", selection_id.to_string()));
    }

    let prior: Option<i64> = tx
        .query_row(
            "SELECT grade_id FROM grades WHERE selection_id = ?",
            [selection_id],
            |r| r.get(0),
        )
        .optional()?;

    tx.execute(
        "INSERT INTO grades(selection_id, score, grade_type, input_time)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(selection_id) DO UPDATE SET
           score = excluded.score,
           grade_type = excluded.grade_type,
           input_time = excluded.input_time",
        (selection_id, score, grade_type.as_str(), db::now_stamp()),
    )?;

    let grade = load_grade(tx, selection_id)?
        .ok_or_else(|| LedgerError::not_found("grade", selection_id.to_string()))?;
    audit::record(
        tx,
        actor,
        if prior.is_none() { "grade_insert" } else { "grade_update" },
        "grade",
        &grade.grade_id.to_string(),
        Some(&format!(
            "selection={} score={} type={}",
            selection_id,
            score,
            grade_type.as_str()
        )),
    )?;

    Ok(GradeWrite {
        grade,
        created: prior.is_none(),
    })
}

fn next_sequence(conn: &Connection, sql: &str) -> LedgerResult<i64> {
    let max: Option<i64> = conn.query_row(sql, [], |r| r.get(0))?;
    Ok(max.unwrap_or(0) + 1)
}

pub fn provision_in(
    tx: &Transaction<'_>,
    actor: Option<&str>,
    profile: &PersonProfile,
    password_hash: &str,
) -> LedgerResult<ProvisionedPerson> {
    let (prefix, next) = match profile {
        PersonProfile::Student { .. } => (
            'S',
            next_sequence(
                tx,
                "SELECT MAX(CAST(SUBSTR(student_id, 2) AS INTEGER))
                 FROM students WHERE student_id LIKE 'S%'",
            )?,
        ),
        PersonProfile::Teacher { .. } => (
            'T',
            next_sequence(
                tx,
                "SELECT MAX(CAST(SUBSTR(teacher_id, 2) AS INTEGER))
                 FROM teachers WHERE teacher_id LIKE 'T%'",
            )?,
        ),
        PersonProfile::Counselor { .. } => (
            'C',
            next_sequence(
                tx,
                "SELECT MAX(CAST(SUBSTR(counselor_id, 2) AS INTEGER))
                 FROM counselors WHERE counselor_id LIKE 'C%'",
            )?,
        ),
    };
    let person_id = format!("{}{:06}", prefix, next);

    let user_seq = next_sequence(
        tx,
        "SELECT MAX(CAST(SUBSTR(user_id, 2) AS INTEGER))
         FROM users WHERE user_id LIKE 'U%'",
    )?;
    let user_id = format!("U{:06}", user_seq);
    let username = person_id.clone();
    let role = profile.role();

    tx.execute(
        "INSERT INTO users(user_id, username, password, role, status, created_at)
         VALUES(?, ?, ?, ?, 1, ?)",
        (
            &user_id,
            &username,
            password_hash,
            role.as_str(),
            db::now_stamp(),
        ),
    )
    .map_err(|e| LedgerError::ProvisioningFailed(format!("users insert: {}", e)))?;

    let person_insert = match profile {
        PersonProfile::Student {
            name,
            gender,
            class_id,
        } => tx.execute(
            "INSERT INTO students(student_id, user_id, name, gender, class_id)
             VALUES(?, ?, ?, ?, ?)",
            (&person_id, &user_id, name, gender, class_id),
        ),
        PersonProfile::Teacher {
            name,
            title,
            department,
        } => tx.execute(
            "INSERT INTO teachers(teacher_id, user_id, name, title, department)
             VALUES(?, ?, ?, ?, ?)",
            (&person_id, &user_id, name, title, department),
        ),
        PersonProfile::Counselor { name, department } => tx.execute(
            "INSERT INTO counselors(counselor_id, user_id, name, department)
             VALUES(?, ?, ?, ?)",
            (&person_id, &user_id, name, department),
        ),
    };
    person_insert.map_err(|e| {
        LedgerError::ProvisioningFailed(format!("{} insert: {}", role.as_str(), e))
    })?;

    audit::record(
        tx,
        actor,
        "provision",
        role.as_str(),
        &person_id,
        Some(&format!("user={}", user_id)),
    )?;

    Ok(ProvisionedPerson {
        person_id,
        user_id,
        username,
        role,
    })
}
