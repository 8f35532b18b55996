use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn handle_schools_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let admin_name = optional_str(req, "adminName").unwrap_or_else(|| "Administrator".to_string());

    let school_id = Uuid::new_v4().to_string();
    let admin_id = Uuid::new_v4().to_string();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO schools(id, name, created_at) VALUES(?, ?, ?)",
        (&school_id, &name, now_ts()),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schools" })),
        );
    }
    if let Err(e) = tx.execute(
        "INSERT INTO users(id, school_id, name, role) VALUES(?, ?, ?, 'admin')",
        (&admin_id, &school_id, &admin_name),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    info!(school_id = %school_id, "school created");
    ok(
        &req.id,
        json!({ "schoolId": school_id, "name": name, "adminUserId": admin_id }),
    )
}

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "schools": [] }));
    };
    let mut stmt = match conn.prepare("SELECT id, name FROM schools ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.create" => Some(handle_schools_create(state, req)),
        "schools.list" => Some(handle_schools_list(state, req)),
        _ => None,
    }
}
