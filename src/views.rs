use crate::calc::round_2;
use crate::catalog::{course_from_row, CourseInfo, COURSE_SELECT};
use crate::ledger::GradeType;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedCourse {
    pub selection_id: i64,
    pub course_id: String,
    pub course_name: String,
    pub teacher_name: String,
    pub select_time: String,
    pub has_grade: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub selection_id: i64,
    pub course_id: String,
    pub course_name: String,
    pub teacher_name: String,
    pub semester_name: String,
    pub score: Option<f64>,
    pub grade_type: Option<GradeType>,
    pub input_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    pub selection_id: i64,
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub major_name: String,
    pub score: Option<f64>,
    pub grade_type: Option<GradeType>,
    pub input_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounselorClass {
    pub class_id: i64,
    pub class_name: String,
    pub major_name: String,
    pub grade_year: i64,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStudent {
    pub student_id: String,
    pub name: String,
    pub course_count: i64,
    pub failed_count: i64,
    pub average_score: Option<f64>,
    pub focused: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherWorkload {
    pub teacher_id: String,
    pub teacher_name: String,
    pub course_count: i64,
    pub student_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseLoad {
    pub course_id: String,
    pub course_name: String,
    pub active_count: i64,
    pub max_students: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionReport {
    pub semester_id: i64,
    pub semester_name: String,
    pub courses: Vec<CourseLoad>,
}

fn grade_type_col(raw: Option<String>) -> Option<GradeType> {
    raw.as_deref().and_then(GradeType::parse_stored)
}

/// Courses the student has no ACTIVE selection in and that still have seats.
pub fn available_courses(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<CourseInfo>> {
    let sql = format!(
        "{} WHERE c.course_id NOT IN (
               SELECT course_id FROM course_selections
               WHERE student_id = ?1 AND status = 1
           )
           AND c.max_students > (
               SELECT COUNT(*) FROM course_selections x
               WHERE x.course_id = c.course_id AND x.status = 1
           )
         ORDER BY c.course_id",
        COURSE_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn student_selections(
    conn: &Connection,
    student_id: &str,
) -> rusqlite::Result<Vec<SelectedCourse>> {
    let mut stmt = conn.prepare(
        "SELECT
           cs.selection_id,
           c.course_id,
           c.name,
           t.name,
           cs.select_time,
           g.grade_id IS NOT NULL
         FROM course_selections cs
         JOIN courses c ON c.course_id = cs.course_id
         JOIN teachers t ON t.teacher_id = c.teacher_id
         LEFT JOIN grades g ON g.selection_id = cs.selection_id
         WHERE cs.student_id = ? AND cs.status = 1
         ORDER BY cs.select_time DESC, cs.selection_id DESC",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(SelectedCourse {
                selection_id: r.get(0)?,
                course_id: r.get(1)?,
                course_name: r.get(2)?,
                teacher_name: r.get(3)?,
                select_time: r.get(4)?,
                has_grade: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Grades for the student's ACTIVE selections; ungraded ones carry `None`.
pub fn student_grades(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<StudentGrade>> {
    let mut stmt = conn.prepare(
        "SELECT
           cs.selection_id,
           c.course_id,
           c.name,
           t.name,
           s.name,
           g.score,
           g.grade_type,
           g.input_time
         FROM course_selections cs
         JOIN courses c ON c.course_id = cs.course_id
         JOIN teachers t ON t.teacher_id = c.teacher_id
         JOIN semesters s ON s.semester_id = cs.semester_id
         LEFT JOIN grades g ON g.selection_id = cs.selection_id
         WHERE cs.student_id = ? AND cs.status = 1
         ORDER BY s.start_date DESC, c.course_id",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(StudentGrade {
                selection_id: r.get(0)?,
                course_id: r.get(1)?,
                course_name: r.get(2)?,
                teacher_name: r.get(3)?,
                semester_name: r.get(4)?,
                score: r.get(5)?,
                grade_type: grade_type_col(r.get(6)?),
                input_time: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn course_roster(conn: &Connection, course_id: &str) -> rusqlite::Result<Vec<RosterRow>> {
    let mut stmt = conn.prepare(
        "SELECT
           cs.selection_id,
           s.student_id,
           s.name,
           cl.name,
           m.name,
           g.score,
           g.grade_type,
           g.input_time
         FROM course_selections cs
         JOIN students s ON s.student_id = cs.student_id
         JOIN classes cl ON cl.class_id = s.class_id
         JOIN majors m ON m.major_id = cl.major_id
         LEFT JOIN grades g ON g.selection_id = cs.selection_id
         WHERE cs.course_id = ? AND cs.status = 1
         ORDER BY s.student_id",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(RosterRow {
                selection_id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                class_name: r.get(3)?,
                major_name: r.get(4)?,
                score: r.get(5)?,
                grade_type: grade_type_col(r.get(6)?),
                input_time: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Courses a teacher teaches, most recent semester first.
pub fn teacher_courses(conn: &Connection, teacher_id: &str) -> rusqlite::Result<Vec<CourseInfo>> {
    let sql = format!(
        "{} WHERE c.teacher_id = ?1 ORDER BY s.start_date DESC, c.course_id",
        COURSE_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([teacher_id], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn counselor_classes(
    conn: &Connection,
    counselor_id: &str,
) -> rusqlite::Result<Vec<CounselorClass>> {
    let mut stmt = conn.prepare(
        "SELECT
           c.class_id,
           c.name,
           m.name,
           c.grade_year,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.class_id)
         FROM classes c
         JOIN majors m ON m.major_id = c.major_id
         WHERE c.counselor_id = ?
         ORDER BY c.grade_year DESC, c.name",
    )?;
    let rows = stmt
        .query_map([counselor_id], |r| {
            Ok(CounselorClass {
                class_id: r.get(0)?,
                class_name: r.get(1)?,
                major_name: r.get(2)?,
                grade_year: r.get(3)?,
                student_count: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Per-student summary of a class over ACTIVE selections. `failed_count`
/// counts graded courses below `pass_score`; `focused` is the mark kept by
/// `counselor_id`.
pub fn class_students(
    conn: &Connection,
    class_id: i64,
    counselor_id: &str,
    pass_score: f64,
) -> rusqlite::Result<Vec<ClassStudent>> {
    let mut stmt = conn.prepare(
        "SELECT
           s.student_id,
           s.name,
           COUNT(cs.selection_id),
           COUNT(CASE WHEN g.score < ?2 THEN 1 END),
           AVG(g.score),
           EXISTS(
             SELECT 1 FROM student_focus f
             WHERE f.student_id = s.student_id AND f.counselor_id = ?3
           )
         FROM students s
         LEFT JOIN course_selections cs ON cs.student_id = s.student_id AND cs.status = 1
         LEFT JOIN grades g ON g.selection_id = cs.selection_id
         WHERE s.class_id = ?1
         GROUP BY s.student_id, s.name
         ORDER BY s.student_id",
    )?;
    let rows = stmt
        .query_map((class_id, pass_score, counselor_id), |r| {
            let average: Option<f64> = r.get(4)?;
            Ok(ClassStudent {
                student_id: r.get(0)?,
                name: r.get(1)?,
                course_count: r.get(2)?,
                failed_count: r.get(3)?,
                average_score: average.map(round_2),
                focused: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Courses taught and distinct ACTIVE students per teacher, busiest first.
pub fn teacher_workload(conn: &Connection) -> rusqlite::Result<Vec<TeacherWorkload>> {
    let mut stmt = conn.prepare(
        "SELECT
           t.teacher_id,
           t.name,
           COUNT(DISTINCT c.course_id) AS course_count,
           COUNT(DISTINCT cs.student_id)
         FROM teachers t
         LEFT JOIN courses c ON c.teacher_id = t.teacher_id
         LEFT JOIN course_selections cs ON cs.course_id = c.course_id AND cs.status = 1
         GROUP BY t.teacher_id, t.name
         ORDER BY course_count DESC, t.teacher_id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(TeacherWorkload {
                teacher_id: r.get(0)?,
                teacher_name: r.get(1)?,
                course_count: r.get(2)?,
                student_count: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Seat usage of the courses in the current semester: the active one with
/// the latest start date. `None` when no semester is active.
pub fn course_selection_report(conn: &Connection) -> rusqlite::Result<Option<SelectionReport>> {
    let current: Option<(i64, String)> = conn
        .query_row(
            "SELECT semester_id, name FROM semesters
             WHERE status = 1
             ORDER BY start_date DESC, semester_id DESC
             LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((semester_id, semester_name)) = current else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT
           c.course_id,
           c.name,
           (SELECT COUNT(*) FROM course_selections cs
            WHERE cs.course_id = c.course_id AND cs.status = 1) AS active_count,
           c.max_students
         FROM courses c
         WHERE c.semester_id = ?
         ORDER BY active_count DESC, c.course_id",
    )?;
    let courses = stmt
        .query_map([semester_id], |r| {
            Ok(CourseLoad {
                course_id: r.get(0)?,
                course_name: r.get(1)?,
                active_count: r.get(2)?,
                max_students: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(SelectionReport {
        semester_id,
        semester_name,
        courses,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::ledger::testutil::*;
    use crate::ledger::{Ledger, PersonProfile};

    #[test]
    fn available_excludes_selected_and_full_courses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = open(dir.path());
        let fx = seed(&mut conn);
        let open_course = course(&mut conn, &fx, 5);
        let tiny = course(&mut conn, &fx, 1);
        let picked = course(&mut conn, &fx, 5);
        let a = student(&mut conn, &fx, "A");
        let b = student(&mut conn, &fx, "B");

        Ledger::new(&mut conn, RETRIES)
            .enroll(None, &b, &tiny)
            .expect("fill tiny");
        Ledger::new(&mut conn, RETRIES)
            .enroll(None, &a, &picked)
            .expect("pick");

        let ids: Vec<String> = available_courses(&conn, &a)
            .expect("available")
            .into_iter()
            .map(|c| c.course_id)
            .collect();
        assert_eq!(ids, vec![open_course]);
    }

    #[test]
    fn selections_and_roster_report_grade_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = open(dir.path());
        let fx = seed(&mut conn);
        let cid = course(&mut conn, &fx, 5);
        let a = student(&mut conn, &fx, "A");
        let b = student(&mut conn, &fx, "B");
        let sel_a = Ledger::new(&mut conn, RETRIES)
            .enroll(None, &a, &cid)
            .expect("enroll a");
        Ledger::new(&mut conn, RETRIES)
            .enroll(None, &b, &cid)
            .expect("enroll b");
        Ledger::new(&mut conn, RETRIES)
            .input_grade(None, sel_a.selection_id, 77.5, "final")
            .expect("grade");

        let mine = student_selections(&conn, &a).expect("selections");
        assert_eq!(mine.len(), 1);
        assert!(mine[0].has_grade);
        assert_eq!(mine[0].teacher_name, "Ada");

        let grades = student_grades(&conn, &a).expect("grades");
        assert_eq!(grades[0].score, Some(77.5));
        assert_eq!(grades[0].grade_type, Some(GradeType::Final));

        let roster = course_roster(&conn, &cid).expect("roster");
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].student_id, a);
        assert_eq!(roster[0].major_name, "Computer Science");
        assert!(roster[1].score.is_none());
        assert!(roster[1].grade_type.is_none());
    }

    #[test]
    fn counselor_views_summarize_their_classes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = open(dir.path());
        let fx = seed(&mut conn);
        let counselor = Ledger::new(&mut conn, RETRIES)
            .provision(
                None,
                &PersonProfile::Counselor {
                    name: "Grace".into(),
                    department: None,
                },
                "123456",
            )
            .expect("counselor")
            .person_id;
        let major_id = catalog::create_major(&conn, "Mathematics", "Science").expect("major");
        let class_id =
            catalog::create_class(&conn, "MA-1", major_id, 2023, Some(&counselor)).expect("class");
        let counseled = Fixture {
            class_id,
            semester_id: fx.semester_id,
            teacher_id: fx.teacher_id.clone(),
        };

        let classes = counselor_classes(&conn, &counselor).expect("classes");
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].class_id, class_id);
        assert_eq!(classes[0].major_name, "Mathematics");
        assert_eq!(classes[0].student_count, 0);

        let c1 = course(&mut conn, &fx, 5);
        let c2 = course(&mut conn, &fx, 5);
        let a = student(&mut conn, &counseled, "A");
        let b = student(&mut conn, &counseled, "B");
        let _elsewhere = student(&mut conn, &fx, "C");
        for (cid, score) in [(&c1, 40.0), (&c2, 90.0)] {
            let sel = Ledger::new(&mut conn, RETRIES)
                .enroll(None, &a, cid)
                .expect("enroll");
            Ledger::new(&mut conn, RETRIES)
                .input_grade(None, sel.selection_id, score, "final")
                .expect("grade");
        }
        Ledger::new(&mut conn, RETRIES)
            .enroll(None, &b, &c1)
            .expect("enroll b");
        Ledger::new(&mut conn, RETRIES)
            .drop_course(None, &b, &c1)
            .expect("drop b");
        catalog::toggle_student_focus(&mut conn, RETRIES, None, &counselor, &a, "grades")
            .expect("focus");

        let rows = class_students(&conn, class_id, &counselor, 60.0).expect("students");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].student_id, a);
        assert_eq!(rows[0].course_count, 2);
        assert_eq!(rows[0].failed_count, 1);
        assert_eq!(rows[0].average_score, Some(65.0));
        assert!(rows[0].focused);
        // Dropped selections are history and do not count.
        assert_eq!(rows[1].student_id, b);
        assert_eq!(rows[1].course_count, 0);
        assert!(rows[1].average_score.is_none());
        assert!(!rows[1].focused);

        assert_eq!(counselor_classes(&conn, &counselor).expect("classes")[0].student_count, 2);
    }

    #[test]
    fn teacher_and_admin_reports_count_active_seats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = open(dir.path());
        assert!(course_selection_report(&conn).expect("no semester").is_none());
        let fx = seed(&mut conn);
        let idle = Ledger::new(&mut conn, RETRIES)
            .provision(
                None,
                &PersonProfile::Teacher {
                    name: "Idle".into(),
                    title: None,
                    department: None,
                },
                "123456",
            )
            .expect("teacher")
            .person_id;
        let c1 = course(&mut conn, &fx, 3);
        let c2 = course(&mut conn, &fx, 4);
        let a = student(&mut conn, &fx, "A");
        let b = student(&mut conn, &fx, "B");
        for (sid, cid) in [(&a, &c1), (&a, &c2), (&b, &c2)] {
            Ledger::new(&mut conn, RETRIES)
                .enroll(None, sid, cid)
                .expect("enroll");
        }

        let mine: Vec<String> = teacher_courses(&conn, &fx.teacher_id)
            .expect("courses")
            .into_iter()
            .map(|c| c.course_id)
            .collect();
        assert_eq!(mine, vec![c1.clone(), c2.clone()]);
        assert!(teacher_courses(&conn, &idle).expect("none").is_empty());

        let workload = teacher_workload(&conn).expect("workload");
        assert_eq!(workload.len(), 2);
        assert_eq!(workload[0].teacher_id, fx.teacher_id);
        assert_eq!(workload[0].course_count, 2);
        assert_eq!(workload[0].student_count, 2);
        assert_eq!(workload[1].teacher_id, idle);
        assert_eq!(workload[1].course_count, 0);
        assert_eq!(workload[1].student_count, 0);

        let report = course_selection_report(&conn)
            .expect("report")
            .expect("active semester");
        assert_eq!(report.semester_id, fx.semester_id);
        assert_eq!(report.courses.len(), 2);
        assert_eq!(report.courses[0].course_id, c2);
        assert_eq!(report.courses[0].active_count, 2);
        assert_eq!(report.courses[0].max_students, 4);
        assert_eq!(report.courses[1].active_count, 1);
    }
}
