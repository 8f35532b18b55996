use crate::codes::generate_unique_code;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::handlers::setup::load_code_settings;
use crate::ipc::helpers::{class_in_session, code_taken, optional_str, required_str, session};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub const DEPARTMENTS: [&str; 4] = ["creche", "kindergarten", "primary", "junior_high"];

pub fn parse_department(
    req: &Request,
    raw: Option<String>,
) -> Result<Option<String>, serde_json::Value> {
    let Some(d) = raw else { return Ok(None) };
    let d = d.to_ascii_lowercase();
    if !DEPARTMENTS.contains(&d.as_str()) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("department must be one of: {}", DEPARTMENTS.join(", ")),
            Some(json!({ "field": "department" })),
        ));
    }
    Ok(Some(d))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.code,
           c.department,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT t.id FROM timetables t WHERE t.class_id = c.id) AS timetable_id
         FROM classes c
         WHERE c.school_id = ?
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&actor.school_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: String = row.get(2)?;
            let department: Option<String> = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            let timetable_id: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "department": department,
                "studentCount": student_count,
                "timetableId": timetable_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        &codes.class_prefix,
        codes.digit_count,
        &mut rand::rng(),
        |c| code_taken(conn, "classes", &actor.school_id, c),
    ) {
        Ok(c) => c,
        Err(e) => return core_err(&req.id, &e),
    };

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, school_id, name, code, department) VALUES(?, ?, ?, ?, ?)",
        (&class_id, &actor.school_id, &name, &code, &department),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    info!(class_id = %class_id, code = %code, "class created");
    ok(
        &req.id,
        json!({ "classId": class_id, "name": name, "code": code, "department": department }),
    )
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = class_in_session(conn, actor, req, &class_id) {
        return e;
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let steps: [(&str, &str); 6] = [
        ("exam_marks", "DELETE FROM exam_marks WHERE class_id = ?"),
        (
            "timetable_assignments",
            "DELETE FROM timetable_assignments
             WHERE class_id = ?1
                OR timetable_id IN (SELECT id FROM timetables WHERE class_id = ?1)",
        ),
        (
            "period_slots",
            "DELETE FROM period_slots
             WHERE timetable_id IN (SELECT id FROM timetables WHERE class_id = ?)",
        ),
        ("timetables", "DELETE FROM timetables WHERE class_id = ?"),
        ("students", "DELETE FROM students WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&class_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    info!(class_id = %class_id, "class deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
