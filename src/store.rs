//! Typed accessors over the workspace store.
//!
//! Every write that can collide on a natural key reports the collision as a
//! structured [`StoreError::AlreadyExists`] derived from SQLite's constraint
//! error codes. Callers never inspect error message text.

use chrono::Utc;
use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use crate::auth::Role;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} already exists")]
    AlreadyExists { entity: &'static str },
    #[error("corrupt {entity} row: {detail}")]
    Corrupt { entity: &'static str, detail: String },
    #[error("store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
}

/// Maps a write failure, turning unique/primary-key violations into the
/// structured duplicate signal and everything else into `Unavailable`.
fn write_err(entity: &'static str, e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if f.extended_code == SQLITE_CONSTRAINT_UNIQUE
            || f.extended_code == SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return StoreError::AlreadyExists { entity };
        }
    }
    StoreError::Unavailable(e)
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339()
}

// ---------------------------------------------------------------------------
// Users and tokens

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub password_salt: String,
    pub password_digest: String,
}

pub fn create_user(
    conn: &Connection,
    email: &str,
    full_name: &str,
    role: Role,
    password_salt: &str,
    password_digest: &str,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, email, full_name, role, password_salt, password_digest, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            email,
            full_name,
            role.as_str(),
            password_salt,
            password_digest,
            now_stamp(),
        ),
    )
    .map_err(|e| write_err("user", e))?;
    Ok(id)
}

fn user_from_raw(
    raw: (String, String, String, String, String, String),
) -> Result<UserRow, StoreError> {
    let (id, email, full_name, role, password_salt, password_digest) = raw;
    let role = Role::parse(&role).ok_or_else(|| StoreError::Corrupt {
        entity: "user",
        detail: format!("unknown role tag: {role}"),
    })?;
    Ok(UserRow {
        id,
        email,
        full_name,
        role,
        password_salt,
        password_digest,
    })
}

pub fn find_user(conn: &Connection, id: &str) -> Result<Option<UserRow>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, email, full_name, role, password_salt, password_digest
             FROM users WHERE id = ?",
            [id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;
    raw.map(user_from_raw).transpose()
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, email, full_name, role, password_salt, password_digest
             FROM users WHERE email = ?",
            [email],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;
    raw.map(user_from_raw).transpose()
}

pub fn admin_exists(conn: &Connection) -> Result<bool, StoreError> {
    let hit = conn
        .query_row(
            "SELECT 1 FROM users WHERE role = ? LIMIT 1",
            [Role::Admin.as_str()],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

#[derive(Debug, Clone)]
pub struct TokenRow {
    pub token: String,
    pub user_id: String,
    pub expires_at: String,
}

pub fn insert_token(
    conn: &Connection,
    token: &str,
    user_id: &str,
    issued_at: &str,
    expires_at: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO auth_tokens(token, user_id, issued_at, expires_at) VALUES(?, ?, ?, ?)",
        (token, user_id, issued_at, expires_at),
    )
    .map_err(|e| write_err("token", e))?;
    Ok(())
}

pub fn find_token(conn: &Connection, token: &str) -> Result<Option<TokenRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT token, user_id, expires_at FROM auth_tokens WHERE token = ?",
            [token],
            |r| {
                Ok(TokenRow {
                    token: r.get(0)?,
                    user_id: r.get(1)?,
                    expires_at: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn delete_token(conn: &Connection, token: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM auth_tokens WHERE token = ?", [token])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Students

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub user_id: String,
    pub roll_no: String,
    pub department: String,
    pub semester: i64,
    pub admission_year: i64,
}

pub fn create_student(
    conn: &Connection,
    user_id: &str,
    roll_no: &str,
    department: &str,
    semester: i64,
    admission_year: i64,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, user_id, roll_no, department, semester, admission_year)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, user_id, roll_no, department, semester, admission_year),
    )
    .map_err(|e| write_err("student", e))?;
    Ok(id)
}

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        roll_no: r.get(2)?,
        department: r.get(3)?,
        semester: r.get(4)?,
        admission_year: r.get(5)?,
    })
}

pub fn find_student(conn: &Connection, id: &str) -> Result<Option<StudentRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, roll_no, department, semester, admission_year
             FROM students WHERE id = ?",
            [id],
            student_row,
        )
        .optional()?;
    Ok(row)
}

pub fn find_student_by_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<StudentRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, roll_no, department, semester, admission_year
             FROM students WHERE user_id = ?",
            [user_id],
            student_row,
        )
        .optional()?;
    Ok(row)
}

/// Returns false when the student does not exist.
pub fn set_student_semester(
    conn: &Connection,
    student_id: &str,
    semester: i64,
) -> Result<bool, StoreError> {
    let n = conn.execute(
        "UPDATE students SET semester = ? WHERE id = ?",
        (semester, student_id),
    )?;
    Ok(n > 0)
}

/// Write-time roster membership check for bulk entry. Re-evaluated per entry
/// so a mid-batch transfer is caught rather than served from a stale read.
pub fn student_in_cohort(
    conn: &Connection,
    student_id: &str,
    department: &str,
    semester: i64,
) -> Result<bool, StoreError> {
    let hit = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND department = ? AND semester = ?",
            (student_id, department, semester),
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

#[derive(Debug, Clone)]
pub struct StudentListing {
    pub id: String,
    pub user_id: String,
    pub roll_no: String,
    pub department: String,
    pub semester: i64,
    pub admission_year: i64,
    pub full_name: String,
    pub email: String,
}

pub fn list_students(
    conn: &Connection,
    department: Option<&str>,
    semester: Option<i64>,
) -> Result<Vec<StudentListing>, StoreError> {
    let mut sql = String::from(
        "SELECT st.id, st.user_id, st.roll_no, st.department, st.semester, st.admission_year,
                u.full_name, u.email
         FROM students st JOIN users u ON u.id = st.user_id",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = department {
        clauses.push("st.department = ?");
        binds.push(Value::Text(d.to_string()));
    }
    if let Some(s) = semester {
        clauses.push("st.semester = ?");
        binds.push(Value::Integer(s));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY st.roll_no");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(StudentListing {
                id: r.get(0)?,
                user_id: r.get(1)?,
                roll_no: r.get(2)?,
                department: r.get(3)?,
                semester: r.get(4)?,
                admission_year: r.get(5)?,
                full_name: r.get(6)?,
                email: r.get(7)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Faculty

#[derive(Debug, Clone)]
pub struct FacultyRow {
    pub id: String,
    pub user_id: String,
    pub employee_id: String,
    pub department: String,
    pub designation: String,
}

pub fn create_faculty(
    conn: &Connection,
    user_id: &str,
    employee_id: &str,
    department: &str,
    designation: &str,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO faculty(id, user_id, employee_id, department, designation)
         VALUES(?, ?, ?, ?, ?)",
        (&id, user_id, employee_id, department, designation),
    )
    .map_err(|e| write_err("faculty", e))?;
    Ok(id)
}

fn faculty_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FacultyRow> {
    Ok(FacultyRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        employee_id: r.get(2)?,
        department: r.get(3)?,
        designation: r.get(4)?,
    })
}

pub fn find_faculty(conn: &Connection, id: &str) -> Result<Option<FacultyRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, employee_id, department, designation FROM faculty WHERE id = ?",
            [id],
            faculty_row,
        )
        .optional()?;
    Ok(row)
}

pub fn find_faculty_by_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<FacultyRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, user_id, employee_id, department, designation
             FROM faculty WHERE user_id = ?",
            [user_id],
            faculty_row,
        )
        .optional()?;
    Ok(row)
}

// ---------------------------------------------------------------------------
// Subjects

#[derive(Debug, Clone)]
pub struct SubjectRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub department: String,
    pub semester: i64,
    pub credits: i64,
}

pub fn create_subject(
    conn: &Connection,
    code: &str,
    name: &str,
    department: &str,
    semester: i64,
    credits: i64,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, code, name, department, semester, credits)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, code, name, department, semester, credits),
    )
    .map_err(|e| write_err("subject", e))?;
    Ok(id)
}

fn subject_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SubjectRow> {
    Ok(SubjectRow {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        department: r.get(3)?,
        semester: r.get(4)?,
        credits: r.get(5)?,
    })
}

pub fn find_subject(conn: &Connection, id: &str) -> Result<Option<SubjectRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, code, name, department, semester, credits FROM subjects WHERE id = ?",
            [id],
            subject_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_subjects(
    conn: &Connection,
    department: Option<&str>,
    semester: Option<i64>,
) -> Result<Vec<SubjectRow>, StoreError> {
    let mut sql =
        String::from("SELECT id, code, name, department, semester, credits FROM subjects");
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(d) = department {
        clauses.push("department = ?");
        binds.push(Value::Text(d.to_string()));
    }
    if let Some(s) = semester {
        clauses.push("semester = ?");
        binds.push(Value::Integer(s));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY semester, code");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), subject_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Faculty-subject assignments

pub fn create_assignment(
    conn: &Connection,
    faculty_id: &str,
    subject_id: &str,
    academic_year: Option<&str>,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO faculty_subjects(id, faculty_id, subject_id, academic_year)
         VALUES(?, ?, ?, ?)",
        (&id, faculty_id, subject_id, academic_year),
    )
    .map_err(|e| write_err("assignment", e))?;
    Ok(id)
}

/// Returns false when no assignment row matched.
pub fn delete_assignment(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let n = conn.execute("DELETE FROM faculty_subjects WHERE id = ?", [id])?;
    Ok(n > 0)
}

pub fn assignment_exists(
    conn: &Connection,
    faculty_id: &str,
    subject_id: &str,
) -> Result<bool, StoreError> {
    let hit = conn
        .query_row(
            "SELECT 1 FROM faculty_subjects WHERE faculty_id = ? AND subject_id = ?",
            (faculty_id, subject_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

// ---------------------------------------------------------------------------
// Marks and attendance

/// Upsert on the (student, subject, exam type) natural key. A second write
/// for the same key overwrites; `recorded_at` always reflects the last write.
pub fn upsert_mark(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    exam_type: &str,
    marks_obtained: f64,
    max_marks: f64,
    published: bool,
) -> Result<(), StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, exam_type, marks_obtained, max_marks,
                           published, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, exam_type) DO UPDATE SET
           marks_obtained = excluded.marks_obtained,
           max_marks = excluded.max_marks,
           published = excluded.published,
           recorded_at = excluded.recorded_at",
        (
            &id,
            student_id,
            subject_id,
            exam_type,
            marks_obtained,
            max_marks,
            published as i64,
            now_stamp(),
        ),
    )
    .map_err(|e| write_err("mark", e))?;
    Ok(())
}

/// Flips matching draft records to published; returns the flip count.
pub fn publish_marks(
    conn: &Connection,
    subject_id: &str,
    exam_type: &str,
) -> Result<usize, StoreError> {
    let n = conn.execute(
        "UPDATE marks SET published = 1
         WHERE subject_id = ? AND exam_type = ? AND published = 0",
        (subject_id, exam_type),
    )?;
    Ok(n)
}

/// Upsert on the (student, subject, date, period) natural key: re-marking a
/// session overwrites the status instead of duplicating the row.
pub fn upsert_attendance(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    date: &str,
    period: i64,
    status: &str,
) -> Result<(), StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance(id, student_id, subject_id, date, period, status, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, date, period) DO UPDATE SET
           status = excluded.status,
           recorded_at = excluded.recorded_at",
        (&id, student_id, subject_id, date, period, status, now_stamp()),
    )
    .map_err(|e| write_err("attendance", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Fees

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStatus {
    Pending,
    Paid,
}

impl FeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeStatus::Pending => "pending",
            FeeStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FeeStatus::Pending),
            "paid" => Some(FeeStatus::Paid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeeRow {
    pub id: String,
    pub student_id: String,
    pub amount: f64,
    pub semester: i64,
    pub due_date: String,
    pub status: FeeStatus,
    pub paid_date: Option<String>,
}

pub fn create_fee(
    conn: &Connection,
    student_id: &str,
    amount: f64,
    semester: i64,
    due_date: &str,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fees(id, student_id, amount, semester, due_date, status, paid_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, NULL, ?)",
        (
            &id,
            student_id,
            amount,
            semester,
            due_date,
            FeeStatus::Pending.as_str(),
            now_stamp(),
        ),
    )
    .map_err(|e| write_err("fee", e))?;
    Ok(id)
}

fn fee_from_raw(
    raw: (String, String, f64, i64, String, String, Option<String>),
) -> Result<FeeRow, StoreError> {
    let (id, student_id, amount, semester, due_date, status, paid_date) = raw;
    let status = FeeStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
        entity: "fee",
        detail: format!("unknown status tag: {status}"),
    })?;
    Ok(FeeRow {
        id,
        student_id,
        amount,
        semester,
        due_date,
        status,
        paid_date,
    })
}

pub fn find_fee(conn: &Connection, id: &str) -> Result<Option<FeeRow>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, student_id, amount, semester, due_date, status, paid_date
             FROM fees WHERE id = ?",
            [id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?;
    raw.map(fee_from_raw).transpose()
}

pub fn mark_fee_paid(conn: &Connection, id: &str, paid_date: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE fees SET status = ?, paid_date = ? WHERE id = ?",
        (FeeStatus::Paid.as_str(), paid_date, id),
    )?;
    Ok(())
}

pub fn fees_for_student(conn: &Connection, student_id: &str) -> Result<Vec<FeeRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, amount, semester, due_date, status, paid_date
         FROM fees WHERE student_id = ?
         ORDER BY due_date, id",
    )?;
    let raws = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    raws.into_iter().map(fee_from_raw).collect()
}
