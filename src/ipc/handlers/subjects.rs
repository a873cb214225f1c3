use crate::auth::Role;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, checked_semester, db_conn, optional_i64, optional_str, principal, require_role,
    required_str, store_err, subject_for_scoped_access,
};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use crate::store;
use serde_json::json;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    // The catalog is readable by any signed-in principal.
    if let Err(e) = principal(conn, req) {
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

    match store::list_subjects(conn, department.as_deref(), semester) {
        Ok(rows) => {
            let subjects: Vec<serde_json::Value> = rows
                .iter()
                .map(|s| {
                    json!({
                        "subjectId": s.id,
                        "code": s.code,
                        "name": s.name,
                        "department": s.department,
                        "semester": s.semester,
                        "credits": s.credits,
                    })
                })
                .collect();
            ok(&req.id, json!({ "subjects": subjects }))
        }
        Err(e) => store_err(&req.id, e),
    }
}

/// Faculty list their own assignments; admins name a faculty member.
fn handle_list_for_faculty(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let caller = match require_role(conn, req, &[Role::Faculty, Role::Admin]) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let faculty = match caller.role {
        Role::Faculty => {
            let own = match store::find_faculty_by_user(conn, &caller.user_id) {
                Ok(Some(f)) => f,
                Ok(None) => {
                    return err(&req.id, "forbidden", "no faculty profile for caller", None)
                }
                Err(e) => return store_err(&req.id, e),
            };
            match optional_str(req, "facultyId") {
                Ok(Some(requested)) if requested != own.id => {
                    return err(
                        &req.id,
                        "forbidden",
                        "faculty may only list their own subjects",
                        None,
                    )
                }
                Ok(_) => {}
                Err(e) => return e,
            }
            own
        }
        _ => {
            let faculty_id = match required_str(req, "facultyId") {
                Ok(v) => v,
                Err(e) => return e,
            };
            match store::find_faculty(conn, &faculty_id) {
                Ok(Some(f)) => f,
                Ok(None) => return err(&req.id, "not_found", "faculty not found", None),
                Err(e) => return store_err(&req.id, e),
            }
        }
    };

    match roster::subjects_for_faculty(conn, &faculty.id) {
        Ok(subjects) => ok(
            &req.id,
            json!({ "facultyId": faculty.id, "subjects": subjects }),
        ),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match roster::roster_for_subject(conn, &subject) {
        Ok(students) => ok(
            &req.id,
            json!({
                "subjectId": subject.id,
                "code": subject.code,
                "department": subject.department,
                "semester": subject.semester,
                "students": students,
            }),
        ),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_list(state, req)),
        "subjects.listForFaculty" => Some(handle_list_for_faculty(state, req)),
        "subjects.roster" => Some(handle_roster(state, req)),
        _ => None,
    }
}
