use crate::auth::{self, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    checked_email, checked_non_empty, checked_password, checked_semester, db_conn, optional_i64,
    optional_str, require_role, required_i64, required_str, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

const ADMISSION_YEAR_MIN: i64 = 1950;
const ADMISSION_YEAR_MAX: i64 = 2100;

/// Creates the user account and student record in one transaction; a
/// duplicate email or roll number rolls both back.
fn handle_create_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(conn, req, &[Role::Admin]) {
        return e;
    }

    let email = match required_str(req, "email").and_then(|v| checked_email(req, &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_name =
        match required_str(req, "fullName").and_then(|v| checked_non_empty(req, "fullName", &v)) {
            Ok(v) => v,
            Err(e) => return e,
        };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = checked_password(req, &password) {
        return e;
    }
    let roll_no = match required_str(req, "rollNo").and_then(|v| checked_non_empty(req, "rollNo", &v))
    {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department = match required_str(req, "department")
        .and_then(|v| checked_non_empty(req, "department", &v))
    {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match required_i64(req, "semester").and_then(|v| checked_semester(req, v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let admission_year = match required_i64(req, "admissionYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !(ADMISSION_YEAR_MIN..=ADMISSION_YEAR_MAX).contains(&admission_year) {
        return err(&req.id, "bad_params", "admissionYear is out of range", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return store_err(&req.id, e.into()),
    };
    let salt = auth::new_salt();
    let digest = auth::digest_password(&salt, &password);
    let user_id = match store::create_user(&tx, &email, &full_name, Role::Student, &salt, &digest) {
        Ok(id) => id,
        Err(e) => return store_err(&req.id, e),
    };
    let student_id = match store::create_student(
        &tx,
        &user_id,
        &roll_no,
        &department,
        semester,
        admission_year,
    ) {
        Ok(id) => id,
        Err(e) => return store_err(&req.id, e),
    };
    if let Err(e) = tx.commit() {
        return store_err(&req.id, e.into());
    }

    ok(
        &req.id,
        json!({ "userId": user_id, "studentId": student_id, "rollNo": roll_no }),
    )
}

fn handle_create_faculty(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(conn, req, &[Role::Admin]) {
        return e;
    }

    let email = match required_str(req, "email").and_then(|v| checked_email(req, &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_name =
        match required_str(req, "fullName").and_then(|v| checked_non_empty(req, "fullName", &v)) {
            Ok(v) => v,
            Err(e) => return e,
        };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = checked_password(req, &password) {
        return e;
    }
    let employee_id = match required_str(req, "employeeId")
        .and_then(|v| checked_non_empty(req, "employeeId", &v))
    {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department = match required_str(req, "department")
        .and_then(|v| checked_non_empty(req, "department", &v))
    {
        Ok(v) => v,
        Err(e) => return e,
    };
    let designation = match required_str(req, "designation")
        .and_then(|v| checked_non_empty(req, "designation", &v))
    {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return store_err(&req.id, e.into()),
    };
    let salt = auth::new_salt();
    let digest = auth::digest_password(&salt, &password);
    let user_id = match store::create_user(&tx, &email, &full_name, Role::Faculty, &salt, &digest) {
        Ok(id) => id,
        Err(e) => return store_err(&req.id, e),
    };
    let faculty_id =
        match store::create_faculty(&tx, &user_id, &employee_id, &department, &designation) {
            Ok(id) => id,
            Err(e) => return store_err(&req.id, e),
        };
    if let Err(e) = tx.commit() {
        return store_err(&req.id, e.into());
    }

    ok(
        &req.id,
        json!({ "userId": user_id, "facultyId": faculty_id, "employeeId": employee_id }),
    )
}

fn handle_create_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(conn, req, &[Role::Admin]) {
        return e;
    }

    let code = match required_str(req, "code").and_then(|v| checked_non_empty(req, "code", &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name").and_then(|v| checked_non_empty(req, "name", &v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department = match required_str(req, "department")
        .and_then(|v| checked_non_empty(req, "department", &v))
    {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match required_i64(req, "semester").and_then(|v| checked_semester(req, v)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let credits = match required_i64(req, "credits") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if credits < 0 {
        return err(&req.id, "bad_params", "credits must not be negative", None);
    }

    match store::create_subject(conn, &code, &name, &department, semester, credits) {
        Ok(subject_id) => ok(&req.id, json!({ "subjectId": subject_id, "code": code })),
        Err(e) => store_err(&req.id, e),
    }
}

/// Moves a student to an explicit target semester. The target is a
/// parameter, never an increment, so a retried request cannot double-apply.
fn handle_promote_student(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let semester = match required_i64(req, "semester").and_then(|v| checked_semester(req, v)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::set_student_semester(conn, &student_id, semester) {
        Ok(true) => ok(&req.id, json!({ "studentId": student_id, "semester": semester })),
        Ok(false) => err(&req.id, "not_found", "student not found", None),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(conn, req, &[Role::Admin]) {
        return e;
    }

    let department = match optional_str(req, "department") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match optional_i64(req, "semester") {
        Ok(Some(v)) => match checked_semester(req, v) {
            Ok(v) => Some(v),
            Err(e) => return e,
        },
        Ok(None) => None,
        Err(e) => return e,
    };

    match store::list_students(conn, department.as_deref(), semester) {
        Ok(rows) => {
            let students: Vec<serde_json::Value> = rows
                .iter()
                .map(|s| {
                    json!({
                        "studentId": s.id,
                        "rollNo": s.roll_no,
                        "fullName": s.full_name,
                        "email": s.email,
                        "department": s.department,
                        "semester": s.semester,
                        "admissionYear": s.admission_year,
                    })
                })
                .collect();
            ok(&req.id, json!({ "students": students }))
        }
        Err(e) => store_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.createStudent" => Some(handle_create_student(state, req)),
        "admin.createFaculty" => Some(handle_create_faculty(state, req)),
        "admin.createSubject" => Some(handle_create_subject(state, req)),
        "admin.promoteStudent" => Some(handle_promote_student(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
