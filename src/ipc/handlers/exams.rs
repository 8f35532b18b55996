use crate::auth::Actor;
use crate::codes::generate_unique_code;
use crate::error::{CoreError, CoreResult};
use crate::grading::{score_record, ScoreFormula, ScoreRecord, ScoreWeighting};
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::handlers::classes::parse_department;
use crate::ipc::handlers::setup::{load_code_settings, load_default_weighting, load_grade_scale};
use crate::ipc::helpers::{
    check_tenant, code_taken, lift, load_named, now_ts, optional_f64, optional_i64,
    optional_str, required_str, session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExamRow {
    pub id: String,
    pub school_id: String,
    pub code: String,
    pub name: String,
    pub term: Option<i64>,
    pub department: Option<String>,
    pub max_marks: f64,
    pub weighting: ScoreWeighting,
    /// Share of the term's overall grade, when set.
    pub weightage: Option<f64>,
}

const EXAM_COLUMNS: &str = "id, school_id, code, name, term, max_marks, score_formula, \
     class_weight, exam_weight, department, weightage";

fn exam_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ExamRow> {
    let formula: String = r.get(6)?;
    Ok(ExamRow {
        id: r.get(0)?,
        school_id: r.get(1)?,
        code: r.get(2)?,
        name: r.get(3)?,
        term: r.get(4)?,
        max_marks: r.get(5)?,
        weighting: ScoreWeighting {
            formula: ScoreFormula::parse(&formula).unwrap_or(ScoreFormula::Capped),
            class_weight: r.get(7)?,
            exam_weight: r.get(8)?,
        },
        department: r.get(9)?,
        weightage: r.get(10)?,
    })
}

pub fn load_exam(conn: &Connection, exam_id: &str) -> CoreResult<ExamRow> {
    let sql = format!("SELECT {} FROM exams WHERE id = ?", EXAM_COLUMNS);
    conn.query_row(&sql, [exam_id], exam_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("exam", exam_id))
}

pub fn exam_in_session(
    conn: &Connection,
    actor: &Actor,
    req: &Request,
    exam_id: &str,
) -> Result<ExamRow, serde_json::Value> {
    let exam = lift(req, load_exam(conn, exam_id))?;
    check_tenant(req, actor, &exam.school_id)?;
    Ok(exam)
}

/// Raw marks for an exam, optionally narrowed to one class or student.
pub fn load_score_records(
    conn: &Connection,
    exam: &ExamRow,
    class_id: Option<&str>,
    student_id: Option<&str>,
) -> CoreResult<Vec<ScoreRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, class_id, subject_id, class_score, exam_score
         FROM exam_marks
         WHERE exam_id = ?1
           AND (?2 IS NULL OR class_id = ?2)
           AND (?3 IS NULL OR student_id = ?3)
         ORDER BY class_id, student_id, subject_id",
    )?;
    let rows = stmt
        .query_map((&exam.id, class_id, student_id), |r| {
            Ok(ScoreRecord {
                student_id: r.get(0)?,
                class_id: r.get(1)?,
                subject_id: r.get(2)?,
                class_score: r.get(3)?,
                exam_score: r.get(4)?,
                max_marks: exam.max_marks,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn resolve_weighting(
    req: &Request,
    defaults: ScoreWeighting,
) -> Result<ScoreWeighting, serde_json::Value> {
    let formula = match optional_str(req, "scoreFormula") {
        None => defaults.formula,
        Some(raw) => match ScoreFormula::parse(&raw.to_ascii_lowercase()) {
            Some(f) => f,
            None => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "scoreFormula must be one of: capped, blended",
                    Some(json!({ "field": "scoreFormula" })),
                ))
            }
        },
    };
    let class_weight = optional_f64(req, "classWeight")?;
    let exam_weight = optional_f64(req, "examWeight")?;
    // One weight implies the other.
    let (class_weight, exam_weight) = match (class_weight, exam_weight) {
        (Some(c), Some(e)) => (c, e),
        (Some(c), None) => (c, 100.0 - c),
        (None, Some(e)) => (100.0 - e, e),
        (None, None) => (defaults.class_weight, defaults.exam_weight),
    };
    lift(req, ScoreWeighting::new(formula, class_weight, exam_weight))
}

fn handle_exams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match optional_i64(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(t) = term {
        if !(1..=3).contains(&t) {
            return err(
                &req.id,
                "bad_params",
                "term must be 1, 2 or 3",
                Some(json!({ "field": "term" })),
            );
        }
    }
    let department = match parse_department(req, optional_str(req, "department")) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_marks = match optional_f64(req, "maxMarks") {
        Ok(v) => v.unwrap_or(100.0),
        Err(e) => return e,
    };
    if !max_marks.is_finite() || max_marks <= 0.0 {
        return core_err(
            &req.id,
            &CoreError::InvalidScore {
                field: "maxMarks".to_string(),
                message: "maxMarks must be greater than 0".to_string(),
            },
        );
    }
    let weightage = match optional_f64(req, "weightage") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(w) = weightage {
        if !(0.0..=100.0).contains(&w) {
            return err(
                &req.id,
                "bad_params",
                "weightage must be in 0..=100",
                Some(json!({ "field": "weightage" })),
            );
        }
    }
    let defaults = match load_default_weighting(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let weighting = match resolve_weighting(req, defaults) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let codes = match load_code_settings(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let code = match generate_unique_code(
        &codes.exam_prefix,
        codes.digit_count,
        &mut rand::rng(),
        |c| code_taken(conn, "exams", &actor.school_id, c),
    ) {
        Ok(c) => c,
        Err(e) => return core_err(&req.id, &e),
    };

    let exam_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO exams(
            id, school_id, code, name, term, department, max_marks,
            score_formula, class_weight, exam_weight, weightage, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &exam_id,
            &actor.school_id,
            &code,
            &name,
            term,
            &department,
            max_marks,
            weighting.formula.as_str(),
            weighting.class_weight,
            weighting.exam_weight,
            weightage,
            now_ts(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "exams" })),
        );
    }

    info!(exam_id = %exam_id, code = %code, formula = weighting.formula.as_str(), "exam created");
    ok(
        &req.id,
        json!({
            "examId": exam_id,
            "code": code,
            "name": name,
            "term": term,
            "department": department,
            "maxMarks": max_marks,
            "weighting": weighting,
            "weightage": weightage
        }),
    )
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department = match parse_department(req, optional_str(req, "department")) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sql = format!(
        "SELECT {} FROM exams
         WHERE school_id = ?1 AND (?2 IS NULL OR department = ?2)
         ORDER BY term, name",
        EXAM_COLUMNS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&actor.school_id, &department), exam_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let exams = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let exams: Vec<serde_json::Value> = exams
        .into_iter()
        .map(|x| {
            json!({
                "id": x.id,
                "code": x.code,
                "name": x.name,
                "term": x.term,
                "department": x.department,
                "maxMarks": x.max_marks,
                "weighting": x.weighting,
                "weightage": x.weightage
            })
        })
        .collect();
    ok(&req.id, json!({ "exams": exams }))
}

fn parse_mark_entry(
    conn: &Connection,
    actor: &Actor,
    req: &Request,
    exam: &ExamRow,
    index: usize,
    raw: &serde_json::Value,
) -> Result<ScoreRecord, serde_json::Value> {
    let bad = |field: &str, message: String| {
        err(
            &req.id,
            "bad_params",
            message,
            Some(json!({ "index": index, "field": field })),
        )
    };
    let text = |field: &str| {
        raw.get(field)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| bad(field, format!("entries[{}].{} is required", index, field)))
    };
    let number = |field: &str| {
        raw.get(field)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| bad(field, format!("entries[{}].{} must be a number", index, field)))
    };
    let student_id = text("studentId")?;
    let subject_id = text("subjectId")?;
    let class_score = number("classScore")?;
    let exam_score = number("examScore")?;

    let student: Option<(String, String)> = conn
        .query_row(
            "SELECT school_id, class_id FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let (student_school, class_id) = lift(
        req,
        student.ok_or_else(|| CoreError::not_found("student", student_id.clone())),
    )?;
    check_tenant(req, actor, &student_school)?;
    let (subject_school, _) = lift(req, load_named(conn, "subjects", "subject", &subject_id))?;
    check_tenant(req, actor, &subject_school)?;

    let record = ScoreRecord {
        student_id,
        class_id,
        subject_id,
        class_score,
        exam_score,
        max_marks: exam.max_marks,
    };
    if let Err(e) = exam.weighting.validate(&record) {
        let mut details = e.details().unwrap_or_else(|| json!({}));
        details["index"] = json!(index);
        return Err(err(&req.id, e.code(), e.to_string(), Some(details)));
    }
    Ok(record)
}

fn handle_marks_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam = match exam_in_session(conn, actor, req, &exam_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw_entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "entries must be an array", None);
    };

    // Every entry is checked before anything is written.
    let mut entries = Vec::with_capacity(raw_entries.len());
    for (i, raw) in raw_entries.iter().enumerate() {
        match parse_mark_entry(conn, actor, req, &exam, i, raw) {
            Ok(e) => entries.push(e),
            Err(e) => return e,
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let now = now_ts();
    for r in &entries {
        if let Err(e) = tx.execute(
            "INSERT INTO exam_marks(
                id, exam_id, student_id, subject_id, class_id,
                class_score, exam_score, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(exam_id, student_id, subject_id) DO UPDATE SET
                class_id = excluded.class_id,
                class_score = excluded.class_score,
                exam_score = excluded.exam_score,
                updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &exam.id,
                &r.student_id,
                &r.subject_id,
                &r.class_id,
                r.class_score,
                r.exam_score,
                &now,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "exam_marks" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    info!(exam_id = %exam.id, count = entries.len(), "marks saved");
    ok(&req.id, json!({ "saved": entries.len() }))
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = optional_str(req, "classId");
    let exam = match exam_in_session(conn, actor, req, &exam_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scale = match load_grade_scale(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let records = match lift(req, load_score_records(conn, &exam, class_id.as_deref(), None)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let marks: Vec<_> = records
        .iter()
        .map(|r| score_record(r, &exam.weighting, &scale))
        .collect();
    ok(
        &req.id,
        json!({
            "examId": exam.id,
            "maxMarks": exam.max_marks,
            "weighting": exam.weighting,
            "marks": marks
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.create" => Some(handle_exams_create(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        "marks.upsert" => Some(handle_marks_upsert(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        _ => None,
    }
}
