use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{class_in_session, optional_str, required_str, session};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = optional_str(req, "email");

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, school_id, name, email) VALUES(?, ?, ?, ?)",
        (&teacher_id, &actor.school_id, &name, &email),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }
    ok(&req.id, json!({ "teacherId": teacher_id, "name": name }))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.email,
           (SELECT COUNT(*) FROM timetable_assignments a WHERE a.teacher_id = t.id) AS periods
         FROM teachers t
         WHERE t.school_id = ?
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&actor.school_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let email: Option<String> = r.get(2)?;
            let periods: i64 = r.get(3)?;
            Ok(json!({ "id": id, "name": name, "email": email, "periodsPerWeek": periods }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_no = optional_str(req, "studentNo");
    let class = match class_in_session(conn, actor, req, &class_id) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, school_id, class_id, last_name, first_name, student_no, active)
         VALUES(?, ?, ?, ?, ?, ?, 1)",
        (
            &student_id,
            &class.school_id,
            &class.id,
            &last_name,
            &first_name,
            &student_no,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, student_no, active
         FROM students
         WHERE class_id = ?
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let student_no: Option<String> = r.get(3)?;
            let active: i64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "displayName": format!("{}, {}", last, first),
                "studentNo": student_no,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
