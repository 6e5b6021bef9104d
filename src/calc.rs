use rusqlite::Connection;
use serde::Serialize;

/// Bucket lower bounds: 0-59, 60-69, 70-79, 80-89, 90-100.
const BUCKET_FLOORS: [f64; 4] = [60.0, 70.0, 80.0, 90.0];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeStats {
    pub total: usize,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub pass_count: usize,
    pub pass_rate: f64,
    pub distribution: [usize; 5],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAverage {
    pub date: String,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAnalysis {
    pub course_id: String,
    pub stats: GradeStats,
    pub trend: Vec<DailyAverage>,
}

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn bucket(score: f64) -> usize {
    BUCKET_FLOORS.iter().take_while(|floor| score >= **floor).count()
}

/// Returns `None` when there is nothing to summarize.
pub fn grade_stats(scores: &[f64], pass_score: f64) -> Option<GradeStats> {
    if scores.is_empty() {
        return None;
    }

    let mut sum = 0.0;
    let mut highest = f64::MIN;
    let mut lowest = f64::MAX;
    let mut pass_count = 0;
    let mut distribution = [0usize; 5];

    for &s in scores {
        sum += s;
        highest = highest.max(s);
        lowest = lowest.min(s);
        if s >= pass_score {
            pass_count += 1;
        }
        distribution[bucket(s)] += 1;
    }

    let total = scores.len();
    Some(GradeStats {
        total,
        average: round_2(sum / total as f64),
        highest,
        lowest,
        pass_count,
        pass_rate: round_2(pass_count as f64 / total as f64),
        distribution,
    })
}

/// Statistics over graded ACTIVE selections of a course, plus the average
/// per day grades were entered.
pub fn course_analysis(
    conn: &Connection,
    course_id: &str,
    pass_score: f64,
) -> rusqlite::Result<Option<CourseAnalysis>> {
    let mut stmt = conn.prepare(
        "SELECT g.score
         FROM course_selections cs
         JOIN grades g ON g.selection_id = cs.selection_id
         WHERE cs.course_id = ? AND cs.status = 1
         ORDER BY g.score",
    )?;
    let scores = stmt
        .query_map([course_id], |r| r.get::<_, f64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let Some(stats) = grade_stats(&scores, pass_score) else {
        return Ok(None);
    };

    let mut trend_stmt = conn.prepare(
        "SELECT SUBSTR(g.input_time, 1, 10) AS day, AVG(g.score)
         FROM course_selections cs
         JOIN grades g ON g.selection_id = cs.selection_id
         WHERE cs.course_id = ? AND cs.status = 1
         GROUP BY day
         ORDER BY day",
    )?;
    let trend = trend_stmt
        .query_map([course_id], |r| {
            Ok(DailyAverage {
                date: r.get(0)?,
                average: round_2(r.get(1)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(CourseAnalysis {
        course_id: course_id.to_string(),
        stats,
        trend,
    }))
}

/// Statistics over graded ACTIVE selections of every student in a class.
pub fn class_grade_stats(
    conn: &Connection,
    class_id: i64,
    pass_score: f64,
) -> rusqlite::Result<Option<GradeStats>> {
    let mut stmt = conn.prepare(
        "SELECT g.score
         FROM course_selections cs
         JOIN students s ON s.student_id = cs.student_id
         JOIN grades g ON g.selection_id = cs.selection_id
         WHERE s.class_id = ? AND cs.status = 1",
    )?;
    let scores = stmt
        .query_map([class_id], |r| r.get::<_, f64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(grade_stats(&scores, pass_score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testutil::*;
    use crate::ledger::Ledger;

    #[test]
    fn buckets_follow_ten_point_bands() {
        assert_eq!(bucket(0.0), 0);
        assert_eq!(bucket(59.9), 0);
        assert_eq!(bucket(60.0), 1);
        assert_eq!(bucket(79.5), 2);
        assert_eq!(bucket(89.99), 3);
        assert_eq!(bucket(90.0), 4);
        assert_eq!(bucket(100.0), 4);
    }

    #[test]
    fn stats_over_mixed_scores() {
        let stats = grade_stats(&[55.0, 62.0, 78.0, 91.0], 60.0).expect("stats");
        assert_eq!(stats.total, 4);
        assert_eq!(stats.average, 71.5);
        assert_eq!(stats.highest, 91.0);
        assert_eq!(stats.lowest, 55.0);
        assert_eq!(stats.pass_count, 3);
        assert_eq!(stats.pass_rate, 0.75);
        assert_eq!(stats.distribution, [1, 1, 1, 0, 1]);
    }

    #[test]
    fn pass_threshold_is_configurable() {
        let stats = grade_stats(&[55.0, 62.0], 50.0).expect("stats");
        assert_eq!(stats.pass_count, 2);
        assert!(grade_stats(&[], 60.0).is_none());
    }

    #[test]
    fn course_analysis_ignores_dropped_and_ungraded_selections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = open(dir.path());
        let fx = seed(&mut conn);
        let cid = course(&mut conn, &fx, 10);
        assert!(course_analysis(&conn, &cid, 60.0).expect("empty").is_none());

        let graded = [("A", 88.0), ("B", 42.0)];
        for (name, score) in graded {
            let sid = student(&mut conn, &fx, name);
            let sel = Ledger::new(&mut conn, RETRIES)
                .enroll(None, &sid, &cid)
                .expect("enroll");
            Ledger::new(&mut conn, RETRIES)
                .input_grade(None, sel.selection_id, score, "final")
                .expect("grade");
        }
        let ungraded = student(&mut conn, &fx, "C");
        Ledger::new(&mut conn, RETRIES)
            .enroll(None, &ungraded, &cid)
            .expect("enroll");
        // Dropped and then graded by id: historical, so excluded.
        let dropped = student(&mut conn, &fx, "D");
        let sel = Ledger::new(&mut conn, RETRIES)
            .enroll(None, &dropped, &cid)
            .expect("enroll");
        Ledger::new(&mut conn, RETRIES)
            .drop_course(None, &dropped, &cid)
            .expect("drop");
        Ledger::new(&mut conn, RETRIES)
            .input_grade(None, sel.selection_id, 100.0, "resit")
            .expect("grade");

        let analysis = course_analysis(&conn, &cid, 60.0)
            .expect("analysis")
            .expect("some");
        assert_eq!(analysis.stats.total, 2);
        assert_eq!(analysis.stats.average, 65.0);
        assert_eq!(analysis.stats.pass_count, 1);
        assert!(!analysis.trend.is_empty());
    }

    #[test]
    fn class_stats_cover_all_courses_of_the_class() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut conn = open(dir.path());
        let fx = seed(&mut conn);
        let c1 = course(&mut conn, &fx, 10);
        let c2 = course(&mut conn, &fx, 10);
        assert!(class_grade_stats(&conn, fx.class_id, 60.0).expect("empty").is_none());

        let a = student(&mut conn, &fx, "A");
        for (cid, score) in [(&c1, 95.0), (&c2, 58.0)] {
            let sel = Ledger::new(&mut conn, RETRIES)
                .enroll(None, &a, cid)
                .expect("enroll");
            Ledger::new(&mut conn, RETRIES)
                .input_grade(None, sel.selection_id, score, "final")
                .expect("grade");
        }

        let stats = class_grade_stats(&conn, fx.class_id, 60.0)
            .expect("stats")
            .expect("some");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.distribution, [1, 0, 0, 0, 1]);
        assert_eq!(stats.pass_count, 1);
        assert!(class_grade_stats(&conn, fx.class_id + 1, 60.0)
            .expect("other class")
            .is_none());
    }
}
