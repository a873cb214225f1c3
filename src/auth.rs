//! Principals, roles, and the token flow.
//!
//! Every protected handler receives an explicit [`Principal`] resolved from
//! the request token. There is no ambient caller state; a handler that skips
//! resolution simply has no principal to act with.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use rusqlite::Connection;

use crate::store::{self, StoreError};

const TOKEN_TTL_HOURS: i64 = 24;

/// Closed set of caller roles. Stored as lowercase tags; anything else in the
/// store is corrupt data, not a fourth role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Faculty,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty => "faculty",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Role::Student),
            "faculty" => Some(Role::Faculty),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub role: Role,
    pub full_name: String,
    pub expires_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Verifies credentials and issues a fresh token. Failure is always the same
/// `invalid credentials` signal so callers cannot probe which emails exist.
pub fn login(conn: &Connection, email: &str, password: &str) -> Result<Session, AuthError> {
    let Some(user) = store::find_user_by_email(conn, email)? else {
        return Err(AuthError::Unauthenticated("invalid credentials"));
    };
    if user.password_digest == digest_password(&user.password_salt, password) {
        let now = Utc::now();
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = (now + Duration::hours(TOKEN_TTL_HOURS)).to_rfc3339();
        store::insert_token(conn, &token, &user.id, &now.to_rfc3339(), &expires_at)?;
        Ok(Session {
            token,
            user_id: user.id,
            role: user.role,
            full_name: user.full_name,
            expires_at,
        })
    } else {
        Err(AuthError::Unauthenticated("invalid credentials"))
    }
}

/// Revokes a token. Revocation is idempotent; an already-gone token is not an
/// error.
pub fn logout(conn: &Connection, token: &str) -> Result<(), AuthError> {
    store::delete_token(conn, token)?;
    Ok(())
}

pub fn resolve_principal(conn: &Connection, token: &str) -> Result<Principal, AuthError> {
    let Some(row) = store::find_token(conn, token)? else {
        return Err(AuthError::Unauthenticated("unknown token"));
    };
    let expires = DateTime::parse_from_rfc3339(&row.expires_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AuthError::Unauthenticated("unknown token"))?;
    if expires <= Utc::now() {
        store::delete_token(conn, token)?;
        return Err(AuthError::Unauthenticated("token expired"));
    }
    let Some(user) = store::find_user(conn, &row.user_id)? else {
        return Err(AuthError::Unauthenticated("unknown token"));
    };
    Ok(Principal {
        user_id: user.id,
        role: user.role,
    })
}

/// Role gate: the caller's role must be in `allowed`.
pub fn authorize(principal: &Principal, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.contains(&principal.role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(format!(
            "role {} may not call this method",
            principal.role.as_str()
        )))
    }
}
