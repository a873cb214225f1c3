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

struct Campus {
    admin_token: String,
    faculty_token: String,
    faculty_id: String,
    cs601: String,
    cs502: String,
    next_id: u32,
}

impl Campus {
    fn rid(&mut self) -> String {
        self.next_id += 1;
        format!("r{}", self.next_id)
    }
}

fn seed_campus(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Campus {
    let workspace = temp_dir("campusd-roster");
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
    let admin = request_ok(
        stdin,
        reader,
        "s3",
        "auth.login",
        json!({ "email": "root@campus.test", "password": "rootpass" }),
    );
    let admin_token = admin
        .get("token")
        .and_then(|v| v.as_str())
        .expect("admin token")
        .to_string();

    let faculty = request_ok(
        stdin,
        reader,
        "s4",
        "admin.createFaculty",
        json!({
            "token": admin_token.clone(),
            "email": "iyer@campus.test",
            "password": "facpass1",
            "fullName": "Meera Iyer",
            "employeeId": "EMP-031",
            "department": "CS",
            "designation": "Assistant Professor"
        }),
    );
    let faculty_id = faculty
        .get("facultyId")
        .and_then(|v| v.as_str())
        .expect("facultyId")
        .to_string();

    let cs601 = request_ok(
        stdin,
        reader,
        "s5",
        "admin.createSubject",
        json!({
            "token": admin_token.clone(),
            "code": "CS601",
            "name": "Compiler Design",
            "department": "CS",
            "semester": 6,
            "credits": 4
        }),
    )
    .get("subjectId")
    .and_then(|v| v.as_str())
    .expect("subjectId")
    .to_string();
    let cs502 = request_ok(
        stdin,
        reader,
        "s6",
        "admin.createSubject",
        json!({
            "token": admin_token.clone(),
            "code": "CS502",
            "name": "Operating Systems",
            "department": "CS",
            "semester": 5,
            "credits": 4
        }),
    )
    .get("subjectId")
    .and_then(|v| v.as_str())
    .expect("subjectId")
    .to_string();

    // Sixth-semester CS cohort, seeded out of roll order.
    for (i, (roll, name)) in [
        ("CS2023-020", "Divya Rao"),
        ("CS2023-005", "Arjun Menon"),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            stdin,
            reader,
            &format!("s7-{i}"),
            "admin.createStudent",
            json!({
                "token": admin_token.clone(),
                "email": format!("{}@campus.test", roll),
                "password": "studentpw",
                "fullName": name,
                "rollNo": roll,
                "department": "CS",
                "semester": 6,
                "admissionYear": 2023
            }),
        );
    }
    // Different semester and different department: outside the cohort.
    let _ = request_ok(
        stdin,
        reader,
        "s8",
        "admin.createStudent",
        json!({
            "token": admin_token.clone(),
            "email": "cs5@campus.test",
            "password": "studentpw",
            "fullName": "Farhan Ali",
            "rollNo": "CS2023-030",
            "department": "CS",
            "semester": 5,
            "admissionYear": 2023
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s9",
        "admin.createStudent",
        json!({
            "token": admin_token.clone(),
            "email": "me6@campus.test",
            "password": "studentpw",
            "fullName": "Meera Pillai",
            "rollNo": "ME2023-001",
            "department": "ME",
            "semester": 6,
            "admissionYear": 2023
        }),
    );

    let faculty_login = request_ok(
        stdin,
        reader,
        "s10",
        "auth.login",
        json!({ "email": "iyer@campus.test", "password": "facpass1" }),
    );
    let faculty_token = faculty_login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("faculty token")
        .to_string();

    Campus {
        admin_token,
        faculty_token,
        faculty_id,
        cs601,
        cs502,
        next_id: 0,
    }
}

#[test]
fn assignment_lifecycle_gates_the_roster() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let mut campus = seed_campus(&mut stdin, &mut reader);

    // Before any assignment the faculty member cannot see a roster.
    let rid = campus.rid();
    let unassigned = request(
        &mut stdin,
        &mut reader,
        &rid,
        "subjects.roster",
        json!({ "token": campus.faculty_token.clone(), "subjectId": campus.cs601.clone() }),
    );
    assert_eq!(error_code(&unassigned), "forbidden");

    let rid = campus.rid();
    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        &rid,
        "facultySubjects.assign",
        json!({
            "token": campus.admin_token.clone(),
            "facultyId": campus.faculty_id.clone(),
            "subjectId": campus.cs601.clone(),
            "academicYear": "2025-26"
        }),
    );
    let assignment_id = assigned
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .expect("assignmentId")
        .to_string();

    let rid = campus.rid();
    let duplicate = request(
        &mut stdin,
        &mut reader,
        &rid,
        "facultySubjects.assign",
        json!({
            "token": campus.admin_token.clone(),
            "facultyId": campus.faculty_id.clone(),
            "subjectId": campus.cs601.clone()
        }),
    );
    assert_eq!(error_code(&duplicate), "conflict");

    let rid = campus.rid();
    let unknown_faculty = request(
        &mut stdin,
        &mut reader,
        &rid,
        "facultySubjects.assign",
        json!({
            "token": campus.admin_token.clone(),
            "facultyId": "no-such-faculty",
            "subjectId": campus.cs601.clone()
        }),
    );
    assert_eq!(error_code(&unknown_faculty), "not_found");

    let rid = campus.rid();
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        &rid,
        "subjects.roster",
        json!({ "token": campus.faculty_token.clone(), "subjectId": campus.cs601.clone() }),
    );
    let rolls: Vec<&str> = roster
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .map(|s| s.get("rollNo").and_then(|v| v.as_str()).unwrap_or(""))
        .collect();
    // Cohort only, ordered by roll: no fifth-semester or ME students.
    assert_eq!(rolls, ["CS2023-005", "CS2023-020"]);

    let rid = campus.rid();
    let removed = request_ok(
        &mut stdin,
        &mut reader,
        &rid,
        "facultySubjects.remove",
        json!({ "token": campus.admin_token.clone(), "assignmentId": assignment_id.clone() }),
    );
    assert_eq!(removed.get("removed").and_then(|v| v.as_bool()), Some(true));

    let rid = campus.rid();
    let gone = request(
        &mut stdin,
        &mut reader,
        &rid,
        "facultySubjects.remove",
        json!({ "token": campus.admin_token.clone(), "assignmentId": assignment_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let rid = campus.rid();
    let after_removal = request(
        &mut stdin,
        &mut reader,
        &rid,
        "subjects.roster",
        json!({ "token": campus.faculty_token.clone(), "subjectId": campus.cs601.clone() }),
    );
    assert_eq!(error_code(&after_removal), "forbidden");
}

#[test]
fn taught_subjects_come_back_in_teaching_order() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let mut campus = seed_campus(&mut stdin, &mut reader);

    for (i, subject_id) in [campus.cs601.clone(), campus.cs502.clone()].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{i}"),
            "facultySubjects.assign",
            json!({
                "token": campus.admin_token.clone(),
                "facultyId": campus.faculty_id.clone(),
                "subjectId": subject_id
            }),
        );
    }

    let rid = campus.rid();
    let own = request_ok(
        &mut stdin,
        &mut reader,
        &rid,
        "subjects.listForFaculty",
        json!({ "token": campus.faculty_token.clone() }),
    );
    let codes: Vec<&str> = own
        .get("subjects")
        .and_then(|v| v.as_array())
        .expect("subjects")
        .iter()
        .map(|s| s.get("code").and_then(|v| v.as_str()).unwrap_or(""))
        .collect();
    assert_eq!(codes, ["CS502", "CS601"]);

    // Admins read any faculty member's load by id.
    let rid = campus.rid();
    let via_admin = request_ok(
        &mut stdin,
        &mut reader,
        &rid,
        "subjects.listForFaculty",
        json!({ "token": campus.admin_token.clone(), "facultyId": campus.faculty_id.clone() }),
    );
    assert_eq!(
        via_admin
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    // The shared catalog is visible to any signed-in principal.
    let rid = campus.rid();
    let catalog = request_ok(
        &mut stdin,
        &mut reader,
        &rid,
        "subjects.list",
        json!({ "token": campus.faculty_token.clone(), "department": "CS" }),
    );
    assert_eq!(
        catalog
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );
}
