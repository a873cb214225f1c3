//! Marks and attendance aggregation.
//!
//! Summaries are assembled from batched reads: one query per entity kind,
//! joined in memory by id. Per-student loops never issue their own queries.

use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::store::StudentRow;

/// Closed set of assessment kinds for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExamType {
    Internal1,
    Internal2,
    Lab,
    Assignment,
    Final,
}

impl ExamType {
    /// Display order within a subject's mark list.
    pub const ALL: [ExamType; 5] = [
        ExamType::Internal1,
        ExamType::Internal2,
        ExamType::Lab,
        ExamType::Assignment,
        ExamType::Final,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExamType::Internal1 => "internal1",
            ExamType::Internal2 => "internal2",
            ExamType::Lab => "lab",
            ExamType::Assignment => "assignment",
            ExamType::Final => "final",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "internal1" => Some(ExamType::Internal1),
            "internal2" => Some(ExamType::Internal2),
            "lab" => Some(ExamType::Lab),
            "assignment" => Some(ExamType::Assignment),
            "final" => Some(ExamType::Final),
            _ => None,
        }
    }

    pub fn rank(self) -> usize {
        match self {
            ExamType::Internal1 => 0,
            ExamType::Internal2 => 1,
            ExamType::Lab => 2,
            ExamType::Assignment => 3,
            ExamType::Final => 4,
        }
    }
}

/// Closed set of session outcomes. Only `present` counts toward the presence
/// rate; `late` and `excused` are tracked but sit in the denominator like
/// `absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Late,
        AttendanceStatus::Excused,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

/// Grade bands over the percentage scale, bottom-inclusive: 90.0 is an A+,
/// 89.999 is an A. Percentages are never rounded before banding.
pub fn grade_for(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "A+"
    } else if percentage >= 80.0 {
        "A"
    } else if percentage >= 70.0 {
        "B+"
    } else if percentage >= 60.0 {
        "B"
    } else if percentage >= 50.0 {
        "C"
    } else if percentage >= 40.0 {
        "D"
    } else {
        "F"
    }
}

pub fn percentage(obtained: f64, max: f64) -> f64 {
    if max > 0.0 {
        100.0 * obtained / max
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Which mark records a summary may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkVisibility {
    /// Student-facing reads: draft records stay invisible.
    PublishedOnly,
    /// Admin reads: drafts included, flagged per entry.
    IncludeDrafts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEntry {
    pub exam_type: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
    pub percentage: f64,
    pub grade: String,
    pub published: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMarks {
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub credits: i64,
    pub entries: Vec<MarkEntry>,
    pub subject_percentage: f64,
    pub subject_grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterMarks {
    pub semester: i64,
    pub subjects: Vec<SubjectMarks>,
    pub semester_percentage: f64,
    pub semester_grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksSummary {
    pub student_id: String,
    pub roll_no: String,
    pub full_name: String,
    pub semesters: Vec<SemesterMarks>,
    pub overall_percentage: Option<f64>,
    pub overall_grade: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceCounts {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
}

impl AttendanceCounts {
    fn record(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }

    fn merge(&mut self, other: &AttendanceCounts) {
        self.present += other.present;
        self.absent += other.absent;
        self.late += other.late;
        self.excused += other.excused;
    }

    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.excused
    }

    /// Share of sessions marked `present`, 0.0 when no sessions exist.
    pub fn presence_rate(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            100.0 * (self.present as f64) / (total as f64)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAttendance {
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub counts: AttendanceCounts,
    pub presence_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub student_id: String,
    pub roll_no: String,
    pub full_name: String,
    pub subjects: Vec<SubjectAttendance>,
    pub overall: AttendanceCounts,
    pub overall_presence_rate: f64,
}

#[derive(Debug, Clone)]
struct MarkRow {
    subject_id: String,
    exam_type: ExamType,
    marks_obtained: f64,
    max_marks: f64,
    published: bool,
}

#[derive(Debug, Clone)]
struct SubjectInfo {
    id: String,
    code: String,
    name: String,
    semester: i64,
    credits: i64,
}

/// Last write wins when a (subject, exam) key appears more than once. Input
/// rows arrive ordered by recorded stamp.
fn latest_per_key(rows: Vec<MarkRow>) -> Vec<MarkRow> {
    let mut latest: HashMap<(String, ExamType), MarkRow> = HashMap::new();
    for row in rows {
        latest.insert((row.subject_id.clone(), row.exam_type), row);
    }
    latest.into_values().collect()
}

fn load_full_name(conn: &Connection, user_id: &str) -> Result<String, CalcError> {
    let name: Option<String> = conn
        .query_row("SELECT full_name FROM users WHERE id = ?", [user_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    name.ok_or_else(|| CalcError::new("upstream_unavailable", "user row missing for student"))
}

fn load_subjects(
    conn: &Connection,
    ids: &[String],
) -> Result<HashMap<String, SubjectInfo>, CalcError> {
    let mut out: HashMap<String, SubjectInfo> = HashMap::new();
    if ids.is_empty() {
        return Ok(out);
    }
    let placeholders = std::iter::repeat("?")
        .take(ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT id, code, name, semester, credits FROM subjects WHERE id IN ({})",
        placeholders
    );
    let bind_values: Vec<Value> = ids.iter().map(|id| Value::Text(id.clone())).collect();
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            Ok(SubjectInfo {
                id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
                semester: r.get(3)?,
                credits: r.get(4)?,
            })
        })
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    for row in rows {
        let info = row.map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
        out.insert(info.id.clone(), info);
    }
    Ok(out)
}

/// Per-subject mark entries grouped by semester, with aggregate percentages
/// at the subject, semester, and overall level. Aggregates divide summed raw
/// marks by summed maxima; they are not means of the lower-level percentages.
pub fn marks_summary(
    conn: &Connection,
    student: &StudentRow,
    visibility: MarkVisibility,
) -> Result<MarksSummary, CalcError> {
    let full_name = load_full_name(conn, &student.user_id)?;

    let mut sql = String::from(
        "SELECT subject_id, exam_type, marks_obtained, max_marks, published
         FROM marks WHERE student_id = ?",
    );
    if visibility == MarkVisibility::PublishedOnly {
        sql.push_str(" AND published = 1");
    }
    sql.push_str(" ORDER BY recorded_at, rowid");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    let raw_rows = stmt
        .query_map([&student.id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;

    let mut rows: Vec<MarkRow> = Vec::with_capacity(raw_rows.len());
    for (subject_id, tag, marks_obtained, max_marks, published) in raw_rows {
        let Some(exam_type) = ExamType::parse(&tag) else {
            return Err(CalcError::new(
                "upstream_unavailable",
                format!("corrupt mark row: unknown exam type {tag}"),
            ));
        };
        rows.push(MarkRow {
            subject_id,
            exam_type,
            marks_obtained,
            max_marks,
            published: published != 0,
        });
    }

    let mut by_subject: HashMap<String, Vec<MarkRow>> = HashMap::new();
    for row in latest_per_key(rows) {
        by_subject.entry(row.subject_id.clone()).or_default().push(row);
    }

    let subject_ids: Vec<String> = by_subject.keys().cloned().collect();
    let mut subjects = load_subjects(conn, &subject_ids)?;

    let mut by_semester: BTreeMap<i64, Vec<(SubjectInfo, Vec<MarkRow>)>> = BTreeMap::new();
    for (subject_id, rows) in by_subject {
        let Some(info) = subjects.remove(&subject_id) else {
            return Err(CalcError::new(
                "upstream_unavailable",
                "subject row missing for recorded marks",
            ));
        };
        by_semester.entry(info.semester).or_default().push((info, rows));
    }

    let mut semesters: Vec<SemesterMarks> = Vec::new();
    let mut overall_obtained = 0.0_f64;
    let mut overall_max = 0.0_f64;
    for (semester, mut subject_group) in by_semester {
        subject_group.sort_by(|a, b| a.0.code.cmp(&b.0.code));

        let mut semester_obtained = 0.0_f64;
        let mut semester_max = 0.0_f64;
        let mut subjects_out: Vec<SubjectMarks> = Vec::new();
        for (info, mut rows) in subject_group {
            rows.sort_by_key(|r| r.exam_type.rank());

            let mut subject_obtained = 0.0_f64;
            let mut subject_max = 0.0_f64;
            let mut entries: Vec<MarkEntry> = Vec::new();
            for r in &rows {
                subject_obtained += r.marks_obtained;
                subject_max += r.max_marks;
                let pct = percentage(r.marks_obtained, r.max_marks);
                entries.push(MarkEntry {
                    exam_type: r.exam_type.as_str().to_string(),
                    marks_obtained: r.marks_obtained,
                    max_marks: r.max_marks,
                    percentage: pct,
                    grade: grade_for(pct).to_string(),
                    published: r.published,
                });
            }

            let subject_pct = percentage(subject_obtained, subject_max);
            subjects_out.push(SubjectMarks {
                subject_id: info.id,
                subject_code: info.code,
                subject_name: info.name,
                credits: info.credits,
                entries,
                subject_percentage: subject_pct,
                subject_grade: grade_for(subject_pct).to_string(),
            });
            semester_obtained += subject_obtained;
            semester_max += subject_max;
        }

        let semester_pct = percentage(semester_obtained, semester_max);
        semesters.push(SemesterMarks {
            semester,
            subjects: subjects_out,
            semester_percentage: semester_pct,
            semester_grade: grade_for(semester_pct).to_string(),
        });
        overall_obtained += semester_obtained;
        overall_max += semester_max;
    }

    let (overall_percentage, overall_grade) = if overall_max > 0.0 {
        let pct = percentage(overall_obtained, overall_max);
        (Some(pct), Some(grade_for(pct).to_string()))
    } else {
        (None, None)
    };

    Ok(MarksSummary {
        student_id: student.id.clone(),
        roll_no: student.roll_no.clone(),
        full_name,
        semesters,
        overall_percentage,
        overall_grade,
    })
}

/// Per-subject session counts and presence rates, plus an overall rate over
/// the summed counts. A student with no recorded sessions gets an empty
/// subject list and a 0.0 rate, never an error.
pub fn attendance_summary(
    conn: &Connection,
    student: &StudentRow,
) -> Result<AttendanceSummary, CalcError> {
    let full_name = load_full_name(conn, &student.user_id)?;

    let mut stmt = conn
        .prepare("SELECT subject_id, status FROM attendance WHERE student_id = ?")
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;
    let raw_rows = stmt
        .query_map([&student.id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("upstream_unavailable", e.to_string()))?;

    let mut by_subject: HashMap<String, AttendanceCounts> = HashMap::new();
    for (subject_id, tag) in raw_rows {
        let Some(status) = AttendanceStatus::parse(&tag) else {
            return Err(CalcError::new(
                "upstream_unavailable",
                format!("corrupt attendance row: unknown status {tag}"),
            ));
        };
        by_subject.entry(subject_id).or_default().record(status);
    }

    let subject_ids: Vec<String> = by_subject.keys().cloned().collect();
    let mut subjects = load_subjects(conn, &subject_ids)?;

    let mut rows: Vec<(SubjectInfo, AttendanceCounts)> = Vec::new();
    for (subject_id, counts) in by_subject {
        let Some(info) = subjects.remove(&subject_id) else {
            return Err(CalcError::new(
                "upstream_unavailable",
                "subject row missing for recorded attendance",
            ));
        };
        rows.push((info, counts));
    }
    rows.sort_by(|a, b| a.0.code.cmp(&b.0.code));

    let mut overall = AttendanceCounts::default();
    let mut subjects_out: Vec<SubjectAttendance> = Vec::new();
    for (info, counts) in rows {
        overall.merge(&counts);
        subjects_out.push(SubjectAttendance {
            subject_id: info.id,
            subject_code: info.code,
            subject_name: info.name,
            presence_rate: counts.presence_rate(),
            counts,
        });
    }

    Ok(AttendanceSummary {
        student_id: student.id.clone(),
        roll_no: student.roll_no.clone(),
        full_name,
        overall_presence_rate: overall.presence_rate(),
        overall,
        subjects: subjects_out,
    })
}
