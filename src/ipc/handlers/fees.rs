use crate::auth::Role;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    checked_date, checked_semester, db_conn, principal, require_role, required_f64, required_i64,
    required_str, store_err, student_for_owner_read,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, FeeStatus};
use chrono::Utc;
use serde_json::json;

fn handle_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(conn, req, &[Role::Admin]) {
        return e;
    }
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::find_student(conn, &student_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return store_err(&req.id, e),
    }
    let amount = match required_f64(req, "amount") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !(amount > 0.0) {
        return err(&req.id, "bad_params", "amount must be positive", None);
    }
    let semester = match required_i64(req, "semester").and_then(|v| checked_semester(req, v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let due_date = match required_str(req, "dueDate").and_then(|v| checked_date(req, "dueDate", &v))
    {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::create_fee(conn, &student_id, amount, semester, &due_date) {
        Ok(fee_id) => ok(&req.id, json!({ "feeId": fee_id })),
        Err(e) => store_err(&req.id, e),
    }
}

/// Settling an already-settled fee is a no-op that reports the original
/// payment date rather than a conflict.
fn handle_mark_paid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(conn, req, &[Role::Admin]) {
        return e;
    }
    let fee_id = match required_str(req, "feeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fee = match store::find_fee(conn, &fee_id) {
        Ok(Some(f)) => f,
        Ok(None) => return err(&req.id, "not_found", "fee not found", None),
        Err(e) => return store_err(&req.id, e),
    };
    if fee.status == FeeStatus::Paid {
        return ok(
            &req.id,
            json!({
                "feeId": fee.id,
                "alreadyPaid": true,
                "paidDate": fee.paid_date,
            }),
        );
    }

    let today = Utc::now().format("%Y-%m-%d").to_string();
    match store::mark_fee_paid(conn, &fee.id, &today) {
        Ok(()) => ok(
            &req.id,
            json!({
                "feeId": fee.id,
                "alreadyPaid": false,
                "paidDate": today,
            }),
        ),
        Err(e) => store_err(&req.id, e),
    }
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
    let rows = match store::fees_for_student(conn, &student.id) {
        Ok(rows) => rows,
        Err(e) => return store_err(&req.id, e),
    };

    // ISO dates compare correctly as strings.
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut total_billed = 0.0_f64;
    let mut total_paid = 0.0_f64;
    let mut fees: Vec<serde_json::Value> = Vec::with_capacity(rows.len());
    for fee in rows {
        total_billed += fee.amount;
        if fee.status == FeeStatus::Paid {
            total_paid += fee.amount;
        }
        let overdue = fee.status == FeeStatus::Pending && fee.due_date.as_str() < today.as_str();
        fees.push(json!({
            "feeId": fee.id,
            "amount": fee.amount,
            "semester": fee.semester,
            "dueDate": fee.due_date,
            "status": fee.status.as_str(),
            "paidDate": fee.paid_date,
            "overdue": overdue,
        }));
    }

    ok(
        &req.id,
        json!({
            "studentId": student.id,
            "fees": fees,
            "totalBilled": total_billed,
            "totalPaid": total_paid,
            "totalPending": total_billed - total_paid,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.record" => Some(handle_record(state, req)),
        "fees.markPaid" => Some(handle_mark_paid(state, req)),
        "fees.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
