use crate::auth::Role;
use crate::calc::{self, ExamType, MarkVisibility};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, db_conn, optional_bool, optional_str, principal, require_role, required_f64,
    required_str, store_err, student_for_owner_read, subject_for_scoped_access,
};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use crate::store;
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;
use std::collections::HashMap;

fn parse_exam_type(req: &Request, tag: &str) -> Result<ExamType, serde_json::Value> {
    ExamType::parse(tag).ok_or_else(|| {
        let allowed: Vec<&str> = ExamType::ALL.iter().map(|t| t.as_str()).collect();
        err(
            &req.id,
            "bad_params",
            format!("unknown examType: {tag}"),
            Some(json!({ "allowed": allowed })),
        )
    })
}

/// Batch mark entry with per-entry outcomes. Entries that fail validation
/// are reported and skipped; the rest of the batch still lands.
fn handle_bulk_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let caller = match require_role(conn, req, &[Role::Faculty]) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match subject_for_scoped_access(conn, req, &caller, &subject_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let exam_type = match required_str(req, "examType").and_then(|v| parse_exam_type(req, &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_marks = match required_f64(req, "maxMarks") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !(max_marks > 0.0) {
        return err(&req.id, "bad_params", "maxMarks must be positive", None);
    }
    let published = match optional_bool(req, "published") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(entries) = req.params.get("entries") else {
        return err(&req.id, "bad_params", "missing entries", None);
    };
    let Some(entries) = entries.as_array() else {
        return err(&req.id, "bad_params", "entries must be an array", None);
    };

    let mut accepted = 0_usize;
    let mut rejected = 0_usize;
    let mut outcomes: Vec<serde_json::Value> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            rejected += 1;
            outcomes.push(json!({
                "index": i,
                "studentId": null,
                "ok": false,
                "code": "bad_params",
                "message": format!("entry at index {} must be an object", i),
            }));
            continue;
        };
        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            rejected += 1;
            outcomes.push(json!({
                "index": i,
                "studentId": null,
                "ok": false,
                "code": "bad_params",
                "message": format!("entry at index {} missing studentId", i),
            }));
            continue;
        };
        let Some(marks_obtained) = obj.get("marksObtained").and_then(|v| v.as_f64()) else {
            rejected += 1;
            outcomes.push(json!({
                "index": i,
                "studentId": student_id,
                "ok": false,
                "code": "bad_params",
                "message": format!("entry at index {} missing marksObtained", i),
            }));
            continue;
        };

        // Membership is checked against the live cohort at write time.
        match store::student_in_cohort(conn, student_id, &subject.department, subject.semester) {
            Ok(true) => {}
            Ok(false) => {
                rejected += 1;
                outcomes.push(json!({
                    "index": i,
                    "studentId": student_id,
                    "ok": false,
                    "code": "invalid_student",
                    "message": "student is not in the subject cohort",
                }));
                continue;
            }
            Err(e) => {
                rejected += 1;
                outcomes.push(json!({
                    "index": i,
                    "studentId": student_id,
                    "ok": false,
                    "code": "upstream_unavailable",
                    "message": e.to_string(),
                }));
                continue;
            }
        }

        if marks_obtained < 0.0 || marks_obtained > max_marks {
            rejected += 1;
            outcomes.push(json!({
                "index": i,
                "studentId": student_id,
                "ok": false,
                "code": "out_of_range",
                "message": format!("marksObtained must be between 0 and {}", max_marks),
            }));
            continue;
        }

        match store::upsert_mark(
            conn,
            student_id,
            &subject.id,
            exam_type.as_str(),
            marks_obtained,
            max_marks,
            published,
        ) {
            Ok(()) => {
                accepted += 1;
                outcomes.push(json!({ "index": i, "studentId": student_id, "ok": true }));
            }
            Err(e) => {
                rejected += 1;
                outcomes.push(json!({
                    "index": i,
                    "studentId": student_id,
                    "ok": false,
                    "code": "upstream_unavailable",
                    "message": e.to_string(),
                }));
            }
        }
    }

    ok(
        &req.id,
        json!({
            "subjectId": subject.id,
            "examType": exam_type.as_str(),
            "published": published,
            "accepted": accepted,
            "rejected": rejected,
            "outcomes": outcomes,
        }),
    )
}

/// Flips every draft record for (subject, examType) to published.
fn handle_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let caller = match require_role(conn, req, &[Role::Faculty, Role::Admin]) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match subject_for_scoped_access(conn, req, &caller, &subject_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let exam_type = match required_str(req, "examType").and_then(|v| parse_exam_type(req, &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::publish_marks(conn, &subject.id, exam_type.as_str()) {
        Ok(n) => ok(
            &req.id,
            json!({
                "subjectId": subject.id,
                "examType": exam_type.as_str(),
                "published": n,
            }),
        ),
        Err(e) => store_err(&req.id, e),
    }
}

/// The entry matrix: every cohort member with their recorded marks for the
/// subject, an empty list where nothing is recorded yet.
fn handle_for_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let caller = match require_role(conn, req, &[Role::Faculty, Role::Admin]) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match subject_for_scoped_access(conn, req, &caller, &subject_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let exam_filter = match optional_str(req, "examType") {
        Ok(Some(tag)) => match parse_exam_type(req, &tag) {
            Ok(v) => Some(v),
            Err(e) => return e,
        },
        Ok(None) => None,
        Err(e) => return e,
    };

    let cohort = match roster::roster_for_subject(conn, &subject) {
        Ok(rows) => rows,
        Err(e) => return calc_err(&req.id, e),
    };

    let mut sql = String::from(
        "SELECT student_id, exam_type, marks_obtained, max_marks, published
         FROM marks WHERE subject_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(subject.id.clone())];
    if let Some(exam_type) = exam_filter {
        sql.push_str(" AND exam_type = ?");
        binds.push(Value::Text(exam_type.as_str().to_string()));
    }

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, e.into()),
    };
    let raw_rows = match stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(rows) => rows,
        Err(e) => return store_err(&req.id, e.into()),
    };

    let mut by_student: HashMap<String, Vec<(ExamType, f64, f64, bool)>> = HashMap::new();
    for (student_id, tag, marks_obtained, max_marks, published) in raw_rows {
        let Some(exam_type) = ExamType::parse(&tag) else {
            return err(
                &req.id,
                "upstream_unavailable",
                format!("corrupt mark row: unknown exam type {tag}"),
                None,
            );
        };
        by_student
            .entry(student_id)
            .or_default()
            .push((exam_type, marks_obtained, max_marks, published != 0));
    }

    let mut entries: Vec<serde_json::Value> = Vec::with_capacity(cohort.len());
    for member in &cohort {
        let mut recorded = by_student.remove(&member.student_id).unwrap_or_default();
        recorded.sort_by_key(|(exam_type, ..)| exam_type.rank());
        let marks: Vec<serde_json::Value> = recorded
            .into_iter()
            .map(|(exam_type, marks_obtained, max_marks, published)| {
                let pct = calc::percentage(marks_obtained, max_marks);
                json!({
                    "examType": exam_type.as_str(),
                    "marksObtained": marks_obtained,
                    "maxMarks": max_marks,
                    "percentage": pct,
                    "grade": calc::grade_for(pct),
                    "published": published,
                })
            })
            .collect();
        entries.push(json!({
            "studentId": member.student_id,
            "rollNo": member.roll_no,
            "fullName": member.full_name,
            "marks": marks,
        }));
    }

    ok(
        &req.id,
        json!({
            "subjectId": subject.id,
            "code": subject.code,
            "entries": entries,
        }),
    )
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let caller = match principal(conn, req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let student = match student_for_owner_read(conn, req, &caller) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let visibility = if caller.role == Role::Admin {
        MarkVisibility::IncludeDrafts
    } else {
        MarkVisibility::PublishedOnly
    };

    match calc::marks_summary(conn, &student, visibility) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.bulkUpsert" => Some(handle_bulk_upsert(state, req)),
        "marks.publish" => Some(handle_publish(state, req)),
        "marks.forSubject" => Some(handle_for_subject(state, req)),
        "marks.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
