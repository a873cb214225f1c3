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

fn error_message(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn bootstrap_is_first_run_only_and_login_round_trips() {
    let workspace = temp_dir("campusd-auth");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let boot = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.bootstrap",
        json!({
            "email": "root@campus.test",
            "password": "rootpass",
            "fullName": "Portal Admin"
        }),
    );
    assert!(boot.get("userId").and_then(|v| v.as_str()).is_some());

    let again = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.bootstrap",
        json!({
            "email": "other@campus.test",
            "password": "otherpass",
            "fullName": "Second Admin"
        }),
    );
    assert_eq!(error_code(&again), "conflict");
    assert_eq!(
        again
            .get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.get("entity"))
            .and_then(|v| v.as_str()),
        Some("admin")
    );

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "email": "root@campus.test", "password": "rootpass" }),
    );
    let token = login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();
    assert_eq!(login.get("role").and_then(|v| v.as_str()), Some("admin"));
    assert!(login.get("expiresAt").and_then(|v| v.as_str()).is_some());

    let whoami = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.whoami",
        json!({ "token": token }),
    );
    assert_eq!(whoami.get("role").and_then(|v| v.as_str()), Some("admin"));
    assert_eq!(
        whoami.get("email").and_then(|v| v.as_str()),
        Some("root@campus.test")
    );
}

#[test]
fn login_failures_use_one_message_for_both_causes() {
    let workspace = temp_dir("campusd-auth-fail");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.bootstrap",
        json!({
            "email": "root@campus.test",
            "password": "rootpass",
            "fullName": "Portal Admin"
        }),
    );

    let wrong_password = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "email": "root@campus.test", "password": "nope-nope" }),
    );
    let unknown_email = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "email": "ghost@campus.test", "password": "rootpass" }),
    );

    assert_eq!(error_code(&wrong_password), "unauthenticated");
    assert_eq!(error_code(&unknown_email), "unauthenticated");
    assert_eq!(error_message(&wrong_password), error_message(&unknown_email));
}

#[test]
fn logout_revokes_and_is_idempotent() {
    let workspace = temp_dir("campusd-auth-logout");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.bootstrap",
        json!({
            "email": "root@campus.test",
            "password": "rootpass",
            "fullName": "Portal Admin"
        }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "email": "root@campus.test", "password": "rootpass" }),
    );
    let token = login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.logout",
        json!({ "token": token.clone() }),
    );
    assert_eq!(out.get("loggedOut").and_then(|v| v.as_bool()), Some(true));

    let stale = request(
        &mut stdin,
        &mut reader,
        "5",
        "auth.whoami",
        json!({ "token": token.clone() }),
    );
    assert_eq!(error_code(&stale), "unauthenticated");

    // A second logout of the same token is not an error.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.logout",
        json!({ "token": token }),
    );
    assert_eq!(again.get("loggedOut").and_then(|v| v.as_bool()), Some(true));
}
