use crate::error::CoreError;
use crate::grading::{
    aggregate_results, calculate_grade, round2, score_record, student_rankings, ScoredRecord,
    DEFAULT_PASS_MARK,
};
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::handlers::exams::{exam_in_session, load_score_records, ExamRow};
use crate::ipc::handlers::setup::load_grade_scale;
use crate::ipc::helpers::{
    check_tenant, class_in_session, lift, optional_f64, optional_str, required_str, session,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

fn name_map(conn: &Connection, sql: &str, scope_id: &str) -> rusqlite::Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([scope_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(rows)
}

fn scored_for(
    conn: &Connection,
    req: &Request,
    exam: &ExamRow,
    class_id: Option<&str>,
    student_id: Option<&str>,
) -> Result<Vec<ScoredRecord>, serde_json::Value> {
    let scale = load_grade_scale(conn, &exam.school_id)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let records = lift(req, load_score_records(conn, exam, class_id, student_id))?;
    Ok(records
        .iter()
        .map(|r| score_record(r, &exam.weighting, &scale))
        .collect())
}

fn handle_grading_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let percentage = match optional_f64(req, "percentage") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing percentage", None),
        Err(e) => return e,
    };
    // Outside a school session the stock scale applies.
    let (result, pass_mark) = match (state.db.as_ref(), state.session.as_ref()) {
        (Some(conn), Some(actor)) => match load_grade_scale(conn, &actor.school_id) {
            Ok(scale) => (scale.grade_for(percentage), scale.pass_mark()),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        _ => (calculate_grade(percentage), DEFAULT_PASS_MARK),
    };
    ok(
        &req.id,
        json!({
            "grade": result.grade,
            "remarks": result.remarks,
            "passMark": pass_mark,
            "passed": percentage >= pass_mark
        }),
    )
}

fn handle_aggregate(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Some(cid) = class_id.as_deref() {
        if let Err(e) = class_in_session(conn, actor, req, cid) {
            return e;
        }
    }
    let scale = match load_grade_scale(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let records = match lift(req, load_score_records(conn, &exam, class_id.as_deref(), None)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let aggregate = aggregate_results(&records, &exam.weighting, &scale);

    let class_names = match name_map(conn, "SELECT id, name FROM classes WHERE school_id = ?", &exam.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subject_names = match name_map(conn, "SELECT id, name FROM subjects WHERE school_id = ?", &exam.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "examId": exam.id,
            "examName": exam.name,
            "weighting": exam.weighting,
            "aggregate": aggregate,
            "classNames": class_names,
            "subjectNames": subject_names
        }),
    )
}

fn handle_rankings(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam = match exam_in_session(conn, actor, req, &exam_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class = match class_in_session(conn, actor, req, &class_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scale = match load_grade_scale(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let scored = match scored_for(conn, req, &exam, Some(&class.id), None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_names = match name_map(
        conn,
        "SELECT id, last_name || ', ' || first_name FROM students WHERE class_id = ?",
        &class.id,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rankings: Vec<serde_json::Value> = student_rankings(&scored, &scale)
        .into_iter()
        .map(|s| {
            let mut row = json!(s);
            row["displayName"] = json!(student_names.get(&s.student_id));
            row
        })
        .collect();
    ok(
        &req.id,
        json!({
            "examId": exam.id,
            "classId": class.id,
            "className": class.name,
            "rankings": rankings
        }),
    )
}

fn handle_report_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam = match exam_in_session(conn, actor, req, &exam_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT school_id, class_id, last_name || ', ' || first_name
             FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((school_id, class_id, display_name)) = student else {
        return core_err(&req.id, &CoreError::not_found("student", student_id));
    };
    if let Err(e) = check_tenant(req, actor, &school_id) {
        return e;
    }
    let scale = match load_grade_scale(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Position is relative to the student's current class.
    let class_scored = match scored_for(conn, req, &exam, Some(&class_id), None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let standings = student_rankings(&class_scored, &scale);
    let standing = standings.iter().find(|s| s.student_id == student_id);

    let subject_names = match name_map(conn, "SELECT id, name FROM subjects WHERE school_id = ?", &school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let own = match scored_for(conn, req, &exam, None, Some(&student_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subjects: Vec<serde_json::Value> = own
        .iter()
        .map(|r| {
            let mut row = json!(r);
            row["subjectName"] = json!(subject_names.get(&r.subject_id));
            row
        })
        .collect();
    let total: f64 = own.iter().map(|r| r.total_score).sum();

    ok(
        &req.id,
        json!({
            "examId": exam.id,
            "examName": exam.name,
            "studentId": student_id,
            "displayName": display_name,
            "classId": class_id,
            "subjects": subjects,
            "totalScore": round2(total),
            "averagePercentage": standing.map(|s| s.average_percentage),
            "grade": standing.map(|s| s.grade.clone()),
            "remarks": standing.map(|s| s.remarks.clone()),
            "position": standing.map(|s| s.position),
            "classSize": standings.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.grade" => Some(handle_grading_grade(state, req)),
        "results.aggregate" => Some(handle_aggregate(state, req)),
        "results.rankings" => Some(handle_rankings(state, req)),
        "results.reportCard" => Some(handle_report_card(state, req)),
        _ => None,
    }
}
