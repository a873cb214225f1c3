//! Faculty assignment resolution and cohort rosters.
//!
//! A subject's roster is its department and semester cohort; there is no
//! per-subject enrollment table to join.

use rusqlite::Connection;
use serde::Serialize;

use crate::calc::CalcError;
use crate::store::SubjectRow;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaughtSubject {
    pub subject_id: String,
    pub code: String,
    pub name: String,
    pub department: String,
    pub semester: i64,
    pub credits: i64,
    pub academic_year: Option<String>,
}

/// Subjects assigned to a faculty member, ordered by semester then code.
pub fn subjects_for_faculty(
    conn: &Connection,
    faculty_id: &str,
) -> Result<Vec<TaughtSubject>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.code, s.name, s.department, s.semester, s.credits, fs.academic_year
             FROM faculty_subjects fs
             JOIN subjects s ON s.id = fs.subject_id
             WHERE fs.faculty_id = ?
             ORDER BY s.semester, s.code",
        )
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    let rows = stmt
        .query_map([faculty_id], |r| {
            Ok(TaughtSubject {
                subject_id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
                department: r.get(3)?,
                semester: r.get(4)?,
                credits: r.get(5)?,
                academic_year: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub student_id: String,
    pub roll_no: String,
    pub full_name: String,
}

/// The cohort for a subject: students in its department and semester,
/// ordered by roll number.
pub fn roster_for_subject(
    conn: &Connection,
    subject: &SubjectRow,
) -> Result<Vec<RosterStudent>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT st.id, st.roll_no, u.full_name
             FROM students st
             JOIN users u ON u.id = st.user_id
             WHERE st.department = ? AND st.semester = ?
             ORDER BY st.roll_no",
        )
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    let rows = stmt
        .query_map((&subject.department, subject.semester), |r| {
            Ok(RosterStudent {
                student_id: r.get(0)?,
                roll_no: r.get(1)?,
                full_name: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    Ok(rows)
}
