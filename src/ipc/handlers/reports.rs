use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

/// 1-decimal rounding used by every report figure.
fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn parse_month_key(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(HandlerErr::bad_params("month must be YYYY-MM"));
    };
    if y.len() != 4 || y.parse::<i32>().is_err() {
        return Err(HandlerErr::bad_params("month year must be numeric"));
    }
    let month_num: u32 = m
        .parse()
        .map_err(|_| HandlerErr::bad_params("month must be YYYY-MM"))?;
    if !(1..=12).contains(&month_num) {
        return Err(HandlerErr::bad_params("month must be between 01 and 12"));
    }
    Ok(format!("{}-{:02}", y, month_num))
}

#[derive(Debug, Clone, Copy, Default)]
struct AttendanceCounts {
    present: i64,
    absent: i64,
    late: i64,
    excused: i64,
}

impl AttendanceCounts {
    fn add(&mut self, status: &str) {
        match status {
            "present" => self.present += 1,
            "absent" => self.absent += 1,
            "late" => self.late += 1,
            "excused" => self.excused += 1,
            _ => {}
        }
    }

    fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.excused
    }

    /// Late still counts as attended; excused days drop out of the base.
    fn rate_percent(&self) -> f64 {
        let base = self.present + self.absent + self.late;
        if base == 0 {
            return 0.0;
        }
        round1(100.0 * (self.present + self.late) as f64 / base as f64)
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "present": self.present,
            "absent": self.absent,
            "late": self.late,
            "excused": self.excused,
            "total": self.total(),
            "ratePercent": self.rate_percent(),
        })
    }
}

fn term_clause(term: Option<i64>) -> (&'static str, Vec<i64>) {
    match term {
        Some(t) => (" AND g.term = ?", vec![t]),
        None => ("", Vec::new()),
    }
}

fn student_grade_rows(
    conn: &Connection,
    student_id: &str,
    term: Option<i64>,
) -> Result<Vec<(String, String, f64, f64)>, HandlerErr> {
    let (clause, term_binds) = term_clause(term);
    let sql = format!(
        "SELECT g.subject_id, sub.name, g.score, g.out_of
         FROM grades g
         JOIN subjects sub ON sub.id = g.subject_id
         WHERE g.student_id = ?{}
         ORDER BY sub.name, g.term, g.exam",
        clause
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let result = if let Some(t) = term_binds.first() {
        stmt.query_map(rusqlite::params![student_id, t], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([student_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };
    result.map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn subject_averages(rows: &[(String, String, f64, f64)]) -> (Vec<serde_json::Value>, f64) {
    let mut order: Vec<String> = Vec::new();
    let mut by_subject: HashMap<String, (String, Vec<f64>)> = HashMap::new();
    for (subject_id, subject_name, score, out_of) in rows {
        if *out_of <= 0.0 {
            continue;
        }
        let entry = by_subject
            .entry(subject_id.clone())
            .or_insert_with(|| (subject_name.clone(), Vec::new()));
        entry.1.push(100.0 * score / out_of);
        if !order.contains(subject_id) {
            order.push(subject_id.clone());
        }
    }

    let mut subjects_json = Vec::new();
    let mut all_percents: Vec<f64> = Vec::new();
    for subject_id in &order {
        let (name, percents) = &by_subject[subject_id];
        let avg = percents.iter().sum::<f64>() / percents.len() as f64;
        all_percents.extend(percents.iter().copied());
        subjects_json.push(json!({
            "subjectId": subject_id,
            "subjectName": name,
            "entryCount": percents.len(),
            "avgPercent": round1(avg),
        }));
    }
    let overall = if all_percents.is_empty() {
        0.0
    } else {
        round1(all_percents.iter().sum::<f64>() / all_percents.len() as f64)
    };
    (subjects_json, overall)
}

fn student_attendance_counts(
    conn: &Connection,
    student_id: &str,
) -> Result<AttendanceCounts, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT status FROM attendance_days WHERE student_id = ?")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let statuses = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let mut counts = AttendanceCounts::default();
    for s in &statuses {
        counts.add(s);
    }
    Ok(counts)
}

fn student_fee_totals(conn: &Connection, student_id: &str) -> Result<(f64, f64), HandlerErr> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0),
                COALESCE(SUM(CASE WHEN status = 'paid' THEN amount ELSE 0 END), 0)
         FROM fees WHERE student_id = ?",
        [student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn student_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let term = params.get("term").and_then(|v| v.as_i64());

    let header = conn
        .query_row(
            "SELECT s.first_name, s.last_name, s.admission_no, s.status,
                    c.name, sec.name
             FROM students s
             JOIN classes c ON c.id = s.class_id
             LEFT JOIN sections sec ON sec.id = s.section_id
             WHERE s.id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((first, last, admission_no, status, class_name, section_name)) = header else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let grade_rows = student_grade_rows(conn, &student_id, term)?;
    let (subjects_json, overall) = subject_averages(&grade_rows);
    let attendance = student_attendance_counts(conn, &student_id)?;
    let (billed, paid) = student_fee_totals(conn, &student_id)?;

    Ok(json!({
        "student": {
            "id": student_id,
            "name": format!("{} {}", first, last),
            "admissionNo": admission_no,
            "status": status,
            "className": class_name,
            "sectionName": section_name,
        },
        "term": term,
        "subjects": subjects_json,
        "overallAvgPercent": overall,
        "attendance": attendance.to_json(),
        "fees": {
            "billedAmount": round1(billed),
            "paidAmount": round1(paid),
            "outstandingAmount": round1(billed - paid),
        },
    }))
}

fn class_overview(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let term = params.get("term").and_then(|v| v.as_i64());

    let class_name: Option<String> = conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(class_name) = class_name else {
        return Err(HandlerErr::not_found("class not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name, status
             FROM students WHERE class_id = ?
             ORDER BY last_name, first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([&class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut rows = Vec::new();
    let mut class_percents: Vec<f64> = Vec::new();
    for (sid, first, last, status) in &students {
        let grade_rows = student_grade_rows(conn, sid, term)?;
        let (_, overall) = subject_averages(&grade_rows);
        if !grade_rows.is_empty() {
            class_percents.push(overall);
        }
        let attendance = student_attendance_counts(conn, sid)?;
        let (billed, paid) = student_fee_totals(conn, sid)?;
        rows.push(json!({
            "studentId": sid,
            "name": format!("{} {}", first, last),
            "status": status,
            "avgPercent": overall,
            "attendanceRatePercent": attendance.rate_percent(),
            "outstandingFees": round1(billed - paid),
        }));
    }

    let class_avg = if class_percents.is_empty() {
        0.0
    } else {
        round1(class_percents.iter().sum::<f64>() / class_percents.len() as f64)
    };

    Ok(json!({
        "classId": class_id,
        "className": class_name,
        "term": term,
        "students": rows,
        "classAvgPercent": class_avg,
    }))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let month = parse_month_key(&get_required_str(params, "month")?)?;

    let class_exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_some();
    if !class_exists {
        return Err(HandlerErr::not_found("class not found"));
    }

    let like = format!("{}-%", month);
    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, s.last_name, s.first_name, a.status
             FROM attendance_days a
             JOIN students s ON s.id = a.student_id
             WHERE a.class_id = ? AND a.date LIKE ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map((&class_id, &like), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut totals = AttendanceCounts::default();
    let mut order: Vec<String> = Vec::new();
    let mut by_student: HashMap<String, (String, AttendanceCounts)> = HashMap::new();
    for (sid, last, first, status) in &rows {
        totals.add(status);
        let entry = by_student
            .entry(sid.clone())
            .or_insert_with(|| (format!("{}, {}", last, first), AttendanceCounts::default()));
        entry.1.add(status);
        if !order.contains(sid) {
            order.push(sid.clone());
        }
    }

    let students_json: Vec<serde_json::Value> = order
        .iter()
        .map(|sid| {
            let (name, counts) = &by_student[sid];
            let mut row = counts.to_json();
            row["studentId"] = json!(sid);
            row["name"] = json!(name);
            row
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "month": month,
        "totals": totals.to_json(),
        "students": students_json,
    }))
}

fn fees_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId");

    let (sql, binds): (&str, Vec<String>) = match class_id.as_ref() {
        Some(cid) => (
            "SELECT f.fee_type, f.amount, f.status
             FROM fees f
             JOIN students s ON s.id = f.student_id
             WHERE s.class_id = ?",
            vec![cid.clone()],
        ),
        None => ("SELECT f.fee_type, f.amount, f.status FROM fees f", Vec::new()),
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut order: Vec<String> = Vec::new();
    let mut by_type: HashMap<String, (f64, f64)> = HashMap::new();
    let mut billed_total = 0.0;
    let mut collected_total = 0.0;
    for (fee_type, amount, status) in &rows {
        let entry = by_type.entry(fee_type.clone()).or_insert((0.0, 0.0));
        entry.0 += amount;
        billed_total += amount;
        if status == "paid" {
            entry.1 += amount;
            collected_total += amount;
        }
        if !order.contains(fee_type) {
            order.push(fee_type.clone());
        }
    }

    let by_type_json: Vec<serde_json::Value> = order
        .iter()
        .map(|fee_type| {
            let (billed, collected) = by_type[fee_type];
            json!({
                "feeType": fee_type,
                "billedAmount": round1(billed),
                "collectedAmount": round1(collected),
                "outstandingAmount": round1(billed - collected),
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "byType": by_type_json,
        "billedAmount": round1(billed_total),
        "collectedAmount": round1(collected_total),
        "outstandingAmount": round1(billed_total - collected_total),
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentReport" => Some(with_conn(state, req, student_report)),
        "reports.classOverview" => Some(with_conn(state, req, class_overview)),
        "reports.attendanceSummary" => Some(with_conn(state, req, attendance_summary)),
        "reports.feesSummary" => Some(with_conn(state, req, fees_summary)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round1_rounds_to_one_decimal() {
        assert_eq!(round1(0.0), 0.0);
        assert_eq!(round1(66.666), 66.7);
        assert_eq!(round1(82.25), 82.3);
    }

    #[test]
    fn attendance_rate_excludes_excused_days() {
        let mut counts = AttendanceCounts::default();
        for s in ["present", "present", "late", "absent", "excused"] {
            counts.add(s);
        }
        assert_eq!(counts.total(), 5);
        // 3 attended of 4 counted days.
        assert_eq!(counts.rate_percent(), 75.0);
    }

    #[test]
    fn month_key_is_validated_and_zero_padded() {
        assert_eq!(parse_month_key("2026-3").expect("valid"), "2026-03");
        assert!(parse_month_key("2026-13").is_err());
        assert!(parse_month_key("march").is_err());
    }

    #[test]
    fn subject_averages_group_by_subject() {
        let rows = vec![
            ("sub1".to_string(), "Math".to_string(), 8.0, 10.0),
            ("sub1".to_string(), "Math".to_string(), 9.0, 10.0),
            ("sub2".to_string(), "Science".to_string(), 5.0, 10.0),
        ];
        let (subjects, overall) = subject_averages(&rows);
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0]["avgPercent"], 85.0);
        assert_eq!(subjects[1]["avgPercent"], 50.0);
        // Overall averages the three entries, not the two subject means.
        assert_eq!(overall, round1((80.0 + 90.0 + 50.0) / 3.0));
    }
}
