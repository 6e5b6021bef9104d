use crate::audit;
use crate::ledger::{with_immediate_tx, LedgerError, LedgerResult};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Major {
    pub major_id: i64,
    pub name: String,
    pub department: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub class_id: i64,
    pub name: String,
    pub major_id: i64,
    pub major_name: String,
    pub grade_year: i64,
    pub counselor_id: Option<String>,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub semester_id: i64,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub status: i64,
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub name: String,
    pub credits: f64,
    pub hours: i64,
    pub semester_id: i64,
    pub teacher_id: String,
    pub max_students: i64,
    pub description: Option<String>,
}

/// Fields absent from the patch are left untouched. `description:
/// Some(None)` clears the column.
#[derive(Debug, Clone, Default)]
pub struct CoursePatch {
    pub name: Option<String>,
    pub credits: Option<f64>,
    pub hours: Option<i64>,
    pub semester_id: Option<i64>,
    pub teacher_id: Option<String>,
    pub max_students: Option<i64>,
    pub description: Option<Option<String>>,
}

impl CoursePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.credits.is_none()
            && self.hours.is_none()
            && self.semester_id.is_none()
            && self.teacher_id.is_none()
            && self.max_students.is_none()
            && self.description.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    pub course_id: String,
    pub name: String,
    pub credits: f64,
    pub hours: i64,
    pub semester_id: i64,
    pub semester_name: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub max_students: i64,
    pub active_count: i64,
    pub description: Option<String>,
}

pub(crate) const COURSE_SELECT: &str = "SELECT
       c.course_id,
       c.name,
       c.credits,
       c.hours,
       c.semester_id,
       s.name,
       c.teacher_id,
       t.name,
       c.max_students,
       (SELECT COUNT(*) FROM course_selections cs
        WHERE cs.course_id = c.course_id AND cs.status = 1) AS active_count,
       c.description
     FROM courses c
     JOIN semesters s ON s.semester_id = c.semester_id
     JOIN teachers t ON t.teacher_id = c.teacher_id";

pub(crate) fn course_from_row(r: &Row<'_>) -> rusqlite::Result<CourseInfo> {
    Ok(CourseInfo {
        course_id: r.get(0)?,
        name: r.get(1)?,
        credits: r.get(2)?,
        hours: r.get(3)?,
        semester_id: r.get(4)?,
        semester_name: r.get(5)?,
        teacher_id: r.get(6)?,
        teacher_name: r.get(7)?,
        max_students: r.get(8)?,
        active_count: r.get(9)?,
        description: r.get(10)?,
    })
}

pub fn create_major(conn: &Connection, name: &str, department: &str) -> LedgerResult<i64> {
    conn.execute(
        "INSERT INTO majors(name, department) VALUES(?, ?)",
        (name, department),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_majors(conn: &Connection) -> LedgerResult<Vec<Major>> {
    let mut stmt =
        conn.prepare("SELECT major_id, name, department FROM majors ORDER BY major_id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Major {
                major_id: r.get(0)?,
                name: r.get(1)?,
                department: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_class(
    conn: &Connection,
    name: &str,
    major_id: i64,
    grade_year: i64,
    counselor_id: Option<&str>,
) -> LedgerResult<i64> {
    let major: Option<i64> = conn
        .query_row("SELECT 1 FROM majors WHERE major_id = ?", [major_id], |r| {
            r.get(0)
        })
        .optional()?;
    if major.is_none() {
        return Err(LedgerError::not_found("major", major_id.to_string()));
    }
    if let Some(cid) = counselor_id {
        let counselor: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM counselors WHERE counselor_id = ?",
                [cid],
                |r| r.get(0),
            )
            .optional()?;
        if counselor.is_none() {
            return Err(LedgerError::not_found("counselor", cid));
        }
    }

    conn.execute(
        "INSERT INTO classes(name, major_id, grade_year, counselor_id) VALUES(?, ?, ?, ?)",
        (name, major_id, grade_year, counselor_id),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_classes(conn: &Connection) -> LedgerResult<Vec<ClassInfo>> {
    // Correlated count avoids double counting through joins.
    let mut stmt = conn.prepare(
        "SELECT
           c.class_id,
           c.name,
           c.major_id,
           m.name,
           c.grade_year,
           c.counselor_id,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.class_id)
         FROM classes c
         JOIN majors m ON m.major_id = c.major_id
         ORDER BY c.class_id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ClassInfo {
                class_id: r.get(0)?,
                name: r.get(1)?,
                major_id: r.get(2)?,
                major_name: r.get(3)?,
                grade_year: r.get(4)?,
                counselor_id: r.get(5)?,
                student_count: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_semester(
    conn: &Connection,
    name: &str,
    start_date: &str,
    end_date: &str,
    status: i64,
) -> LedgerResult<i64> {
    conn.execute(
        "INSERT INTO semesters(name, start_date, end_date, status) VALUES(?, ?, ?, ?)",
        (name, start_date, end_date, status),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_semesters(conn: &Connection) -> LedgerResult<Vec<Semester>> {
    let mut stmt = conn.prepare(
        "SELECT semester_id, name, start_date, end_date, status
         FROM semesters
         ORDER BY start_date DESC, semester_id DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Semester {
                semester_id: r.get(0)?,
                name: r.get(1)?,
                start_date: r.get(2)?,
                end_date: r.get(3)?,
                status: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn ensure_teacher(conn: &Connection, teacher_id: &str) -> LedgerResult<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM teachers WHERE teacher_id = ?",
            [teacher_id],
            |r| r.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(LedgerError::not_found("teacher", teacher_id)),
    }
}

fn ensure_semester(conn: &Connection, semester_id: i64) -> LedgerResult<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM semesters WHERE semester_id = ?",
            [semester_id],
            |r| r.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(LedgerError::not_found("semester", semester_id.to_string())),
    }
}

/// Inserts a course under the next `C%03d` identifier.
pub fn create_course(
    conn: &mut Connection,
    retries: u32,
    actor: Option<&str>,
    course: &NewCourse,
) -> LedgerResult<String> {
    let course_id = with_immediate_tx(conn, retries, |tx| {
        ensure_teacher(tx, &course.teacher_id)?;
        ensure_semester(tx, course.semester_id)?;

        let max: Option<i64> = tx.query_row(
            "SELECT MAX(CAST(SUBSTR(course_id, 2) AS INTEGER))
             FROM courses WHERE course_id LIKE 'C%'",
            [],
            |r| r.get(0),
        )?;
        let course_id = format!("C{:03}", max.unwrap_or(0) + 1);

        tx.execute(
            "INSERT INTO courses(course_id, name, credits, hours, semester_id,
                                 teacher_id, max_students, description)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &course_id,
                &course.name,
                course.credits,
                course.hours,
                course.semester_id,
                &course.teacher_id,
                course.max_students,
                &course.description,
            ),
        )?;
        audit::record(tx, actor, "create", "course", &course_id, Some(&course.name))?;
        Ok(course_id)
    })?;
    info!(course_id = %course_id, "course created");
    Ok(course_id)
}

pub fn get_course(conn: &Connection, course_id: &str) -> LedgerResult<CourseInfo> {
    let sql = format!("{} WHERE c.course_id = ?", COURSE_SELECT);
    conn.query_row(&sql, [course_id], course_from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("course", course_id))
}

pub fn list_courses(conn: &Connection) -> LedgerResult<Vec<CourseInfo>> {
    let sql = format!("{} ORDER BY c.course_id", COURSE_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Applies each present field with its own fixed statement inside one
/// transaction. Capacity may not drop below the current ACTIVE count.
pub fn update_course(
    conn: &mut Connection,
    retries: u32,
    actor: Option<&str>,
    course_id: &str,
    patch: &CoursePatch,
) -> LedgerResult<CourseInfo> {
    with_immediate_tx(conn, retries, |tx| {
        let current = get_course(tx, course_id)?;
        let mut changed: Vec<&str> = Vec::new();

        if let Some(name) = &patch.name {
            tx.execute(
                "UPDATE courses SET name = ? WHERE course_id = ?",
                (name, course_id),
            )?;
            changed.push("name");
        }
        if let Some(credits) = patch.credits {
            tx.execute(
                "UPDATE courses SET credits = ? WHERE course_id = ?",
                (credits, course_id),
            )?;
            changed.push("credits");
        }
        if let Some(hours) = patch.hours {
            tx.execute(
                "UPDATE courses SET hours = ? WHERE course_id = ?",
                (hours, course_id),
            )?;
            changed.push("hours");
        }
        if let Some(semester_id) = patch.semester_id {
            ensure_semester(tx, semester_id)?;
            tx.execute(
                "UPDATE courses SET semester_id = ? WHERE course_id = ?",
                (semester_id, course_id),
            )?;
            changed.push("semesterId");
        }
        if let Some(teacher_id) = &patch.teacher_id {
            ensure_teacher(tx, teacher_id)?;
            tx.execute(
                "UPDATE courses SET teacher_id = ? WHERE course_id = ?",
                (teacher_id, course_id),
            )?;
            changed.push("teacherId");
        }
        if let Some(max_students) = patch.max_students {
            if max_students < current.active_count {
                return Err(LedgerError::CapacityBelowEnrollment {
                    course_id: course_id.to_string(),
                    requested: max_students,
                    active: current.active_count,
                });
            }
            tx.execute(
                "UPDATE courses SET max_students = ? WHERE course_id = ?",
                (max_students, course_id),
            )?;
            changed.push("maxStudents");
        }
        if let Some(description) = &patch.description {
            tx.execute(
                "UPDATE courses SET description = ? WHERE course_id = ?",
                (description, course_id),
            )?;
            changed.push("description");
        }

        if !changed.is_empty() {
            audit::record(
                tx,
                actor,
                "update",
                "course",
                course_id,
                Some(&changed.join(",")),
            )?;
        }
        get_course(tx, course_id)
    })
}

/// Owning teacher of a course.
pub fn course_teacher(conn: &Connection, course_id: &str) -> LedgerResult<String> {
    conn.query_row(
        "SELECT teacher_id FROM courses WHERE course_id = ?",
        [course_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("course", course_id))
}

/// Course a selection belongs to.
pub fn selection_course(conn: &Connection, selection_id: i64) -> LedgerResult<String> {
    conn.query_row(
        "SELECT course_id FROM course_selections WHERE selection_id = ?",
        [selection_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("selection", selection_id.to_string()))
}

pub fn counselor_owns_student(
    conn: &Connection,
    counselor_id: &str,
    student_id: &str,
) -> LedgerResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1
             FROM students s
             JOIN classes c ON c.class_id = s.class_id
             WHERE s.student_id = ? AND c.counselor_id = ?",
            (student_id, counselor_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Counselor assigned to a class, if any.
pub fn class_counselor(conn: &Connection, class_id: i64) -> LedgerResult<Option<String>> {
    conn.query_row(
        "SELECT counselor_id FROM classes WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("class", class_id.to_string()))
}

/// Flips the focus mark a counselor keeps on a student. Returns whether the
/// student is focused afterwards.
pub fn toggle_student_focus(
    conn: &mut Connection,
    retries: u32,
    actor: Option<&str>,
    counselor_id: &str,
    student_id: &str,
    reason: &str,
) -> LedgerResult<bool> {
    with_immediate_tx(conn, retries, |tx| {
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

        let removed = tx.execute(
            "DELETE FROM student_focus WHERE student_id = ? AND counselor_id = ?",
            (student_id, counselor_id),
        )?;
        let focused = if removed > 0 {
            false
        } else {
            tx.execute(
                "INSERT INTO student_focus(student_id, counselor_id, reason, created_at)
                 VALUES(?, ?, ?, ?)",
                (student_id, counselor_id, reason, crate::db::now_stamp()),
            )?;
            true
        };
        audit::record(
            tx,
            actor,
            if focused { "focus_add" } else { "focus_remove" },
            "student",
            student_id,
            Some(reason),
        )?;
        Ok(focused)
    })
}
