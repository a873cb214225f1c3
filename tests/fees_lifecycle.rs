use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

struct Seeded {
    admin_token: String,
    student_token: String,
    student_id: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    let workspace = temp_dir("campusd-fees");
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s2",
        "auth.bootstrap",
        json!({
            "email": "root@campus.test",
            "password": "rootpass",
            "fullName": "Portal Admin"
        }),
    );
    let admin_token = request_ok(
        stdin,
        reader,
        "s3",
        "auth.login",
        json!({ "email": "root@campus.test", "password": "rootpass" }),
    )
    .get("token")
    .and_then(|v| v.as_str())
    .expect("admin token")
    .to_string();

    let student_id = request_ok(
        stdin,
        reader,
        "s4",
        "admin.createStudent",
        json!({
            "token": admin_token.clone(),
            "email": "arjun@campus.test",
            "password": "arjunpass",
            "fullName": "Arjun Menon",
            "rollNo": "CS2023-005",
            "department": "CS",
            "semester": 6,
            "admissionYear": 2023
        }),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();

    let student_token = request_ok(
        stdin,
        reader,
        "s5",
        "auth.login",
        json!({ "email": "arjun@campus.test", "password": "arjunpass" }),
    )
    .get("token")
    .and_then(|v| v.as_str())
    .expect("student token")
    .to_string();

    Seeded {
        admin_token,
        student_token,
        student_id,
    }
}

#[test]
fn fee_lifecycle_from_billing_to_settlement() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    // One fee far in the past, one far in the future.
    let overdue_fee = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "fees.record",
        json!({
            "token": seeded.admin_token.clone(),
            "studentId": seeded.student_id.clone(),
            "amount": 45000.0,
            "semester": 5,
            "dueDate": "2020-01-15"
        }),
    )
    .get("feeId")
    .and_then(|v| v.as_str())
    .expect("feeId")
    .to_string();
    let upcoming_fee = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.record",
        json!({
            "token": seeded.admin_token.clone(),
            "studentId": seeded.student_id.clone(),
            "amount": 47500.0,
            "semester": 6,
            "dueDate": "2099-07-01"
        }),
    )
    .get("feeId")
    .and_then(|v| v.as_str())
    .expect("feeId")
    .to_string();

    let billed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.summary",
        json!({ "token": seeded.student_token.clone() }),
    );
    assert_eq!(
        billed.get("totalBilled").and_then(|v| v.as_f64()),
        Some(92500.0)
    );
    assert_eq!(billed.get("totalPaid").and_then(|v| v.as_f64()), Some(0.0));
    let fees = billed.get("fees").and_then(|v| v.as_array()).expect("fees");
    assert_eq!(fees.len(), 2);
    // Ordered by due date: the stale one first, flagged overdue.
    assert_eq!(
        fees[0].get("feeId").and_then(|v| v.as_str()),
        Some(overdue_fee.as_str())
    );
    assert_eq!(fees[0].get("overdue").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        fees[1].get("feeId").and_then(|v| v.as_str()),
        Some(upcoming_fee.as_str())
    );
    assert_eq!(fees[1].get("overdue").and_then(|v| v.as_bool()), Some(false));

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.markPaid",
        json!({ "token": seeded.admin_token.clone(), "feeId": overdue_fee.clone() }),
    );
    assert_eq!(paid.get("alreadyPaid").and_then(|v| v.as_bool()), Some(false));
    let paid_date = paid
        .get("paidDate")
        .and_then(|v| v.as_str())
        .expect("paidDate")
        .to_string();

    let repaid = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.markPaid",
        json!({ "token": seeded.admin_token.clone(), "feeId": overdue_fee }),
    );
    assert_eq!(repaid.get("alreadyPaid").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        repaid.get("paidDate").and_then(|v| v.as_str()),
        Some(paid_date.as_str())
    );

    let settled = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "fees.summary",
        json!({ "token": seeded.student_token.clone() }),
    );
    assert_eq!(
        settled.get("totalPaid").and_then(|v| v.as_f64()),
        Some(45000.0)
    );
    assert_eq!(
        settled.get("totalPending").and_then(|v| v.as_f64()),
        Some(47500.0)
    );
    let fees = settled.get("fees").and_then(|v| v.as_array()).expect("fees");
    // A settled fee is no longer overdue, however stale its due date.
    assert_eq!(fees[0].get("status").and_then(|v| v.as_str()), Some("paid"));
    assert_eq!(fees[0].get("overdue").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn billing_is_admin_only_and_validated() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    let student_billing = request(
        &mut stdin,
        &mut reader,
        "1",
        "fees.record",
        json!({
            "token": seeded.student_token.clone(),
            "studentId": seeded.student_id.clone(),
            "amount": 100.0,
            "semester": 6,
            "dueDate": "2026-09-01"
        }),
    );
    assert_eq!(error_code(&student_billing), "forbidden");

    let unknown_student = request(
        &mut stdin,
        &mut reader,
        "2",
        "fees.record",
        json!({
            "token": seeded.admin_token.clone(),
            "studentId": "no-such-student",
            "amount": 100.0,
            "semester": 6,
            "dueDate": "2026-09-01"
        }),
    );
    assert_eq!(error_code(&unknown_student), "not_found");

    let zero_amount = request(
        &mut stdin,
        &mut reader,
        "3",
        "fees.record",
        json!({
            "token": seeded.admin_token.clone(),
            "studentId": seeded.student_id.clone(),
            "amount": 0,
            "semester": 6,
            "dueDate": "2026-09-01"
        }),
    );
    assert_eq!(error_code(&zero_amount), "bad_params");

    let unknown_fee = request(
        &mut stdin,
        &mut reader,
        "4",
        "fees.markPaid",
        json!({ "token": seeded.admin_token.clone(), "feeId": "no-such-fee" }),
    );
    assert_eq!(error_code(&unknown_fee), "not_found");
}
