//! Shared handler plumbing: param extraction, principal resolution, and the
//! mapping from module errors onto wire codes.
//!
//! Helpers return `Result<T, serde_json::Value>` where the error side is a
//! complete response envelope, ready to be returned as-is.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

use crate::auth::{self, AuthError, Principal, Role};
use crate::calc::CalcError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, StoreError, StudentRow, SubjectRow};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a string", key), None)),
    }
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                None,
            )
        }),
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_bool(req: &Request, key: &str) -> Result<bool, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(false),
        Some(v) if v.is_null() => Ok(false),
        Some(v) => v.as_bool().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a boolean", key),
                None,
            )
        }),
    }
}

/// Semesters run 1 through 8.
pub fn checked_semester(req: &Request, value: i64) -> Result<i64, serde_json::Value> {
    if (1..=8).contains(&value) {
        Ok(value)
    } else {
        Err(err(
            &req.id,
            "bad_params",
            "semester must be between 1 and 8",
            None,
        ))
    }
}

pub fn checked_email(req: &Request, value: &str) -> Result<String, serde_json::Value> {
    let trimmed = value.trim();
    if trimmed.contains('@') && !trimmed.starts_with('@') && !trimmed.ends_with('@') {
        Ok(trimmed.to_string())
    } else {
        Err(err(&req.id, "bad_params", "email is not valid", None))
    }
}

pub fn checked_password(req: &Request, value: &str) -> Result<(), serde_json::Value> {
    if value.len() >= 6 {
        Ok(())
    } else {
        Err(err(
            &req.id,
            "bad_params",
            "password must be at least 6 characters",
            None,
        ))
    }
}

pub fn checked_non_empty(
    req: &Request,
    key: &str,
    value: &str,
) -> Result<String, serde_json::Value> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Parses and canonicalizes a calendar date param.
pub fn checked_date(req: &Request, key: &str, raw: &str) -> Result<String, serde_json::Value> {
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(d) => Ok(d.format("%Y-%m-%d").to_string()),
        Err(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a YYYY-MM-DD date", key),
            None,
        )),
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state.db.as_ref().ok_or_else(|| {
        err(
            &req.id,
            "upstream_unavailable",
            "select a workspace first",
            None,
        )
    })
}

/// Resolves the caller from the request token. Every protected method takes
/// the token explicitly; there is no ambient session.
pub fn principal(conn: &Connection, req: &Request) -> Result<Principal, serde_json::Value> {
    let token = required_str(req, "token")?;
    auth::resolve_principal(conn, &token).map_err(|e| auth_err(&req.id, e))
}

pub fn require_role(
    conn: &Connection,
    req: &Request,
    allowed: &[Role],
) -> Result<Principal, serde_json::Value> {
    let p = principal(conn, req)?;
    auth::authorize(&p, allowed).map_err(|e| auth_err(&req.id, e))?;
    Ok(p)
}

pub fn auth_err(id: &str, e: AuthError) -> serde_json::Value {
    match e {
        AuthError::Unauthenticated(msg) => err(id, "unauthenticated", msg, None),
        AuthError::Forbidden(msg) => err(id, "forbidden", msg, None),
        AuthError::Store(e) => store_err(id, e),
    }
}

pub fn store_err(id: &str, e: StoreError) -> serde_json::Value {
    match e {
        StoreError::AlreadyExists { entity } => err(
            id,
            "conflict",
            format!("{entity} already exists"),
            Some(json!({ "entity": entity })),
        ),
        StoreError::Corrupt { .. } | StoreError::Unavailable(_) => {
            err(id, "upstream_unavailable", e.to_string(), None)
        }
    }
}

pub fn calc_err(id: &str, e: CalcError) -> serde_json::Value {
    err(id, &e.code, e.message, e.details)
}

/// Gate for subject-scoped operations: resolves the subject and, for faculty
/// callers, checks it is assigned to them. Admins skip the assignment check.
pub fn subject_for_scoped_access(
    conn: &Connection,
    req: &Request,
    principal: &Principal,
    subject_id: &str,
) -> Result<SubjectRow, serde_json::Value> {
    let subject = match store::find_subject(conn, subject_id) {
        Ok(Some(s)) => s,
        Ok(None) => return Err(err(&req.id, "not_found", "subject not found", None)),
        Err(e) => return Err(store_err(&req.id, e)),
    };
    if principal.role == Role::Faculty {
        let faculty = match store::find_faculty_by_user(conn, &principal.user_id) {
            Ok(Some(f)) => f,
            Ok(None) => {
                return Err(err(
                    &req.id,
                    "forbidden",
                    "no faculty profile for caller",
                    None,
                ))
            }
            Err(e) => return Err(store_err(&req.id, e)),
        };
        let owns = match store::assignment_exists(conn, &faculty.id, &subject.id) {
            Ok(v) => v,
            Err(e) => return Err(store_err(&req.id, e)),
        };
        if !owns {
            return Err(err(
                &req.id,
                "forbidden",
                "subject is not assigned to you",
                None,
            ));
        }
    }
    Ok(subject)
}

/// Gate for student-keyed reads. Students resolve to their own record; a
/// studentId param naming anyone else is refused without looking the target
/// up, so the response cannot reveal whether that id exists. Admins must
/// name a student. Faculty never pass.
pub fn student_for_owner_read(
    conn: &Connection,
    req: &Request,
    principal: &Principal,
) -> Result<StudentRow, serde_json::Value> {
    match principal.role {
        Role::Student => {
            let own = match store::find_student_by_user(conn, &principal.user_id) {
                Ok(Some(s)) => s,
                Ok(None) => {
                    return Err(err(
                        &req.id,
                        "forbidden",
                        "no student profile for caller",
                        None,
                    ))
                }
                Err(e) => return Err(store_err(&req.id, e)),
            };
            if let Some(requested) = optional_str(req, "studentId")? {
                if requested != own.id {
                    return Err(err(
                        &req.id,
                        "forbidden",
                        "students may only read their own record",
                        None,
                    ));
                }
            }
            Ok(own)
        }
        Role::Admin => {
            let student_id = required_str(req, "studentId")?;
            match store::find_student(conn, &student_id) {
                Ok(Some(s)) => Ok(s),
                Ok(None) => Err(err(&req.id, "not_found", "student not found", None)),
                Err(e) => Err(store_err(&req.id, e)),
            }
        }
        Role::Faculty => Err(err(
            &req.id,
            "forbidden",
            "faculty access is scoped by subject assignment",
            None,
        )),
    }
}
