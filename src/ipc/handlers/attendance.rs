use crate::auth::Role;
use crate::calc::{self, AttendanceStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, checked_date, db_conn, principal, require_role, required_i64, required_str,
    store_err, student_for_owner_read, subject_for_scoped_access,
};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use crate::store;
use serde_json::json;
use std::collections::HashMap;

/// Batch session marking with per-entry outcomes. A re-marked session
/// overwrites the earlier status for the same (student, date, period).
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
    let date = match required_str(req, "date").and_then(|v| checked_date(req, "date", &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match required_i64(req, "period") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if period < 1 {
        return err(&req.id, "bad_params", "period must be at least 1", None);
    }
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
        let status = match obj.get("status").and_then(|v| v.as_str()) {
            Some(tag) => match AttendanceStatus::parse(tag) {
                Some(s) => s,
                None => {
                    rejected += 1;
                    let allowed: Vec<&str> =
                        AttendanceStatus::ALL.iter().map(|s| s.as_str()).collect();
                    outcomes.push(json!({
                        "index": i,
                        "studentId": student_id,
                        "ok": false,
                        "code": "bad_params",
                        "message": format!("unknown status: {tag}"),
                        "allowed": allowed,
                    }));
                    continue;
                }
            },
            None => {
                rejected += 1;
                outcomes.push(json!({
                    "index": i,
                    "studentId": student_id,
                    "ok": false,
                    "code": "bad_params",
                    "message": format!("entry at index {} missing status", i),
                }));
                continue;
            }
        };

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

        match store::upsert_attendance(conn, student_id, &subject.id, &date, period, status.as_str())
        {
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
            "date": date,
            "period": period,
            "accepted": accepted,
            "rejected": rejected,
            "outcomes": outcomes,
        }),
    )
}

/// Reads one session back: the cohort roster with each student's recorded
/// status, null where the session has no row for them yet.
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
    let date = match required_str(req, "date").and_then(|v| checked_date(req, "date", &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match required_i64(req, "period") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let cohort = match roster::roster_for_subject(conn, &subject) {
        Ok(rows) => rows,
        Err(e) => return calc_err(&req.id, e),
    };

    let mut stmt = match conn.prepare(
        "SELECT student_id, status FROM attendance
         WHERE subject_id = ? AND date = ? AND period = ?",
    ) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, e.into()),
    };
    let marked = match stmt
        .query_map(rusqlite::params![subject.id, date, period], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    {
        Ok(map) => map,
        Err(e) => return store_err(&req.id, e.into()),
    };

    let mut entries: Vec<serde_json::Value> = Vec::with_capacity(cohort.len());
    for member in &cohort {
        let status = match marked.get(&member.student_id) {
            Some(tag) => match AttendanceStatus::parse(tag) {
                Some(s) => json!(s.as_str()),
                None => {
                    return err(
                        &req.id,
                        "upstream_unavailable",
                        format!("corrupt attendance row: unknown status {tag}"),
                        None,
                    )
                }
            },
            None => serde_json::Value::Null,
        };
        entries.push(json!({
            "studentId": member.student_id,
            "rollNo": member.roll_no,
            "fullName": member.full_name,
            "status": status,
        }));
    }

    ok(
        &req.id,
        json!({
            "subjectId": subject.id,
            "code": subject.code,
            "date": date,
            "period": period,
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

    match calc::attendance_summary(conn, &student) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.bulkUpsert" => Some(handle_bulk_upsert(state, req)),
        "attendance.forSubject" => Some(handle_for_subject(state, req)),
        "attendance.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
