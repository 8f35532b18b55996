use crate::codes::generate_unique_code;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::handlers::classes::parse_department;
use crate::ipc::handlers::setup::load_code_settings;
use crate::ipc::helpers::{code_taken, optional_str, required_str, session};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department = match parse_department(req, optional_str(req, "department")) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let codes = match load_code_settings(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let code = match generate_unique_code(
        &codes.subject_prefix,
        codes.digit_count,
        &mut rand::rng(),
        |c| code_taken(conn, "subjects", &actor.school_id, c),
    ) {
        Ok(c) => c,
        Err(e) => return core_err(&req.id, &e),
    };

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, school_id, name, code, department) VALUES(?, ?, ?, ?, ?)",
        (&subject_id, &actor.school_id, &name, &code, &department),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    ok(
        &req.id,
        json!({ "subjectId": subject_id, "name": name, "code": code, "department": department }),
    )
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department = optional_str(req, "department").map(|d| d.to_ascii_lowercase());

    let mut stmt = match conn.prepare(
        "SELECT id, name, code, department
         FROM subjects
         WHERE school_id = ?1 AND (?2 IS NULL OR department = ?2)
         ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&actor.school_id, &department), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let code: String = r.get(2)?;
            let department: Option<String> = r.get(3)?;
            Ok(json!({ "id": id, "name": name, "code": code, "department": department }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        _ => None,
    }
}
