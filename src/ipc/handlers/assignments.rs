use crate::auth::Role;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_role, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

fn handle_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(conn, req, &[Role::Admin]) {
        return e;
    }

    let faculty_id = match required_str(req, "facultyId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match optional_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::find_faculty(conn, &faculty_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "faculty not found", None),
        Err(e) => return store_err(&req.id, e),
    }
    match store::find_subject(conn, &subject_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return store_err(&req.id, e),
    }

    match store::create_assignment(conn, &faculty_id, &subject_id, academic_year.as_deref()) {
        Ok(assignment_id) => ok(
            &req.id,
            json!({
                "assignmentId": assignment_id,
                "facultyId": faculty_id,
                "subjectId": subject_id,
            }),
        ),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = require_role(conn, req, &[Role::Admin]) {
        return e;
    }

    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match store::delete_assignment(conn, &assignment_id) {
        Ok(true) => ok(&req.id, json!({ "removed": true })),
        Ok(false) => err(&req.id, "not_found", "assignment not found", None),
        Err(e) => store_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "facultySubjects.assign" => Some(handle_assign(state, req)),
        "facultySubjects.remove" => Some(handle_remove(state, req)),
        _ => None,
    }
}
