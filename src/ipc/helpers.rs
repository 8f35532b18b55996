use crate::auth::{verify_tenant, Actor};
use crate::error::{CoreError, CoreResult};
use crate::ipc::error::{core_err, err};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Open connection plus the acting user; every school-scoped handler starts
/// here.
pub fn session<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, &'a Actor), serde_json::Value> {
    let conn = db_conn(state, req)?;
    let actor = state
        .session
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_session", "open a session first", None))?;
    Ok((conn, actor))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                Some(serde_json::json!({ "field": key })),
            )
        }),
    }
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                Some(serde_json::json!({ "field": key })),
            )
        }),
    }
}

pub fn check_tenant(req: &Request, actor: &Actor, school_id: &str) -> Result<(), serde_json::Value> {
    verify_tenant(actor, school_id).map_err(|e| core_err(&req.id, &e))
}

pub fn lift<T>(req: &Request, r: CoreResult<T>) -> Result<T, serde_json::Value> {
    r.map_err(|e| core_err(&req.id, &e))
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
pub struct ClassRef {
    pub id: String,
    pub school_id: String,
    pub name: String,
}

pub fn load_class(conn: &Connection, class_id: &str) -> CoreResult<ClassRef> {
    conn.query_row(
        "SELECT id, school_id, name FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassRef {
                id: r.get(0)?,
                school_id: r.get(1)?,
                name: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("class", class_id))
}

/// Looks up a class and checks the actor may touch it.
pub fn class_in_session(
    conn: &Connection,
    actor: &Actor,
    req: &Request,
    class_id: &str,
) -> Result<ClassRef, serde_json::Value> {
    let class = lift(req, load_class(conn, class_id))?;
    check_tenant(req, actor, &class.school_id)?;
    Ok(class)
}

/// `(school_id, name)` of a row in a school-scoped table with `id`/`name`
/// columns.
pub fn load_named(
    conn: &Connection,
    table: &'static str,
    entity: &'static str,
    id: &str,
) -> CoreResult<(String, String)> {
    let sql = format!("SELECT school_id, name FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?
        .ok_or_else(|| CoreError::not_found(entity, id))
}

pub fn code_taken(conn: &Connection, table: &'static str, school_id: &str, code: &str) -> CoreResult<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE school_id = ? AND code = ?", table);
    let hit: Option<i64> = conn
        .query_row(&sql, (school_id, code), |r| r.get(0))
        .optional()?;
    Ok(hit.is_some())
}
