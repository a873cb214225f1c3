use crate::auth::{self, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    auth_err, checked_email, checked_non_empty, checked_password, db_conn, required_str, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

/// First-run setup: creates the initial admin account. Refused once any
/// admin exists, so a deployed portal cannot be re-seeded over the wire.
fn handle_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let email = match checked_email(req, &email) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_name = match checked_non_empty(req, "fullName", &full_name) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = checked_password(req, &password) {
        return e;
    }

    match store::admin_exists(conn) {
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "admin already exists",
                Some(json!({ "entity": "admin" })),
            )
        }
        Ok(false) => {}
        Err(e) => return store_err(&req.id, e),
    }

    let salt = auth::new_salt();
    let digest = auth::digest_password(&salt, &password);
    match store::create_user(conn, &email, &full_name, Role::Admin, &salt, &digest) {
        Ok(user_id) => ok(&req.id, json!({ "userId": user_id, "email": email })),
        Err(e) => store_err(&req.id, e),
    }
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match auth::login(conn, &email, &password) {
        Ok(session) => ok(
            &req.id,
            json!({
                "token": session.token,
                "userId": session.user_id,
                "role": session.role.as_str(),
                "fullName": session.full_name,
                "expiresAt": session.expires_at,
            }),
        ),
        Err(e) => auth_err(&req.id, e),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let token = match required_str(req, "token") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match auth::logout(conn, &token) {
        Ok(()) => ok(&req.id, json!({ "loggedOut": true })),
        Err(e) => auth_err(&req.id, e),
    }
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let token = match required_str(req, "token") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let principal = match auth::resolve_principal(conn, &token) {
        Ok(p) => p,
        Err(e) => return auth_err(&req.id, e),
    };
    let user = match store::find_user(conn, &principal.user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "unauthenticated", "unknown token", None),
        Err(e) => return store_err(&req.id, e),
    };

    let mut result = json!({
        "userId": user.id,
        "role": user.role.as_str(),
        "fullName": user.full_name,
        "email": user.email,
    });
    match user.role {
        Role::Student => match store::find_student_by_user(conn, &user.id) {
            Ok(Some(st)) => {
                result["student"] = json!({
                    "studentId": st.id,
                    "rollNo": st.roll_no,
                    "department": st.department,
                    "semester": st.semester,
                    "admissionYear": st.admission_year,
                });
            }
            Ok(None) => {}
            Err(e) => return store_err(&req.id, e),
        },
        Role::Faculty => match store::find_faculty_by_user(conn, &user.id) {
            Ok(Some(f)) => {
                result["faculty"] = json!({
                    "facultyId": f.id,
                    "employeeId": f.employee_id,
                    "department": f.department,
                    "designation": f.designation,
                });
            }
            Ok(None) => {}
            Err(e) => return store_err(&req.id, e),
        },
        Role::Admin => {}
    }

    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.bootstrap" => Some(handle_bootstrap(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
