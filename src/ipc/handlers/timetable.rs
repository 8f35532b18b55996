use crate::auth::Actor;
use crate::error::{CoreError, CoreResult};
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::handlers::setup::load_timetable_settings;
use crate::ipc::helpers::{
    check_tenant, class_in_session, lift, load_named, required_str, session,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, SqliteTimetableStore};
use crate::time::{calculate_duration, convert_to_12_hour, normalize_time};
use crate::timetable::{
    assign_teacher_to_slot, create_default_timetable, find_teacher_conflict,
    validate_period_range, Assignment, AssignmentRequest, PeriodSlot, PeriodType,
    TimetableStore,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

struct TimetableScope {
    school_id: String,
    class_id: String,
    class_name: String,
}

fn load_scope(conn: &Connection, timetable_id: &str) -> CoreResult<TimetableScope> {
    conn.query_row(
        "SELECT t.school_id, t.class_id, c.name
         FROM timetables t
         JOIN classes c ON c.id = t.class_id
         WHERE t.id = ?",
        [timetable_id],
        |r| {
            Ok(TimetableScope {
                school_id: r.get(0)?,
                class_id: r.get(1)?,
                class_name: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("timetable", timetable_id))
}

/// A slot and the scope of its timetable, tenant-checked.
fn slot_in_session(
    conn: &Connection,
    actor: &Actor,
    req: &Request,
    period_id: &str,
) -> Result<(PeriodSlot, TimetableScope), serde_json::Value> {
    let store = SqliteTimetableStore::new(conn);
    let slot = lift(req, store.get_slot(period_id))?;
    let slot = lift(
        req,
        slot.ok_or_else(|| CoreError::not_found("period slot", period_id)),
    )?;
    let scope = lift(req, load_scope(conn, &slot.timetable_id))?;
    check_tenant(req, actor, &scope.school_id)?;
    Ok((slot, scope))
}

fn slot_json(slot: &PeriodSlot, display_12h: bool) -> serde_json::Value {
    let display = |t: &str| {
        if display_12h {
            convert_to_12_hour(t)
        } else {
            t.to_string()
        }
    };
    json!({
        "id": slot.id,
        "day": slot.day,
        "periodNumber": slot.period_number,
        "label": slot.label,
        "startTime": slot.start_time,
        "endTime": slot.end_time,
        "startTimeDisplay": display(&slot.start_time),
        "endTimeDisplay": display(&slot.end_time),
        "duration": slot.duration,
        "periodType": slot.period_type
    })
}

fn handle_create_default(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class = match class_in_session(conn, actor, req, &class_id) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut store = SqliteTimetableStore::new(conn);
    let (timetable, slots) =
        match lift(req, create_default_timetable(&mut store, &class.school_id, &class.id)) {
            Ok(v) => v,
            Err(e) => return e,
        };
    ok(
        &req.id,
        json!({
            "timetableId": timetable.id,
            "classId": timetable.class_id,
            "createdAt": timetable.created_at,
            "slotCount": slots.len()
        }),
    )
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class = match class_in_session(conn, actor, req, &class_id) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let timetable: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, created_at FROM timetables WHERE class_id = ?",
            [&class.id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((timetable_id, created_at)) = timetable else {
        return core_err(&req.id, &CoreError::not_found("timetable", class.id.clone()));
    };

    let settings = match load_timetable_settings(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let slots = match lift(req, store::list_slots(conn, &timetable_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignments = match lift(req, store::list_assignments_for_timetable(conn, &timetable_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let slots_json: Vec<serde_json::Value> = slots
        .iter()
        .map(|s| slot_json(s, settings.display_12h))
        .collect();
    ok(
        &req.id,
        json!({
            "timetableId": timetable_id,
            "classId": class.id,
            "className": class.name,
            "createdAt": created_at,
            "displayFormat": if settings.display_12h { "12h" } else { "24h" },
            "slots": slots_json,
            "assignments": assignments
        }),
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let timetable_id = match required_str(req, "timetableId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scope = match lift(req, load_scope(conn, &timetable_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = check_tenant(req, actor, &scope.school_id) {
        return e;
    }
    if let Err(e) = lift(req, store::delete_timetable(conn, &timetable_id)) {
        return e;
    }
    info!(timetable_id = %timetable_id, class_id = %scope.class_id, "timetable deleted");
    ok(&req.id, json!({ "ok": true }))
}

fn handle_slot_update_time(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start_raw = match required_str(req, "startTime") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end_raw = match required_str(req, "endTime") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (slot, _scope) = match slot_in_session(conn, actor, req, &period_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let start_time = match lift(req, normalize_time(&start_raw, "startTime")) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end_time = match lift(req, normalize_time(&end_raw, "endTime")) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match load_timetable_settings(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let duration = if settings.reject_empty_periods {
        lift(req, validate_period_range(&start_time, &end_time))
    } else {
        lift(req, calculate_duration(&start_time, &end_time))
    };
    let duration = match duration {
        Ok(v) => v,
        Err(e) => return e,
    };

    // The slot's teacher must still be free at the new times.
    let store = SqliteTimetableStore::new(conn);
    let current = match lift(req, store.find_assignment_for_period(&period_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(a) = &current {
        let (_, teacher_name) = match lift(req, load_named(conn, "teachers", "teacher", &a.teacher_id)) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let candidate = AssignmentRequest {
            period_id: a.period_id.clone(),
            timetable_id: a.timetable_id.clone(),
            teacher_id: a.teacher_id.clone(),
            teacher_name,
            subject_id: a.subject_id.clone(),
            class_id: a.class_id.clone(),
            class_name: a.class_name.clone(),
            day: a.day,
            start_time: start_time.clone(),
            end_time: end_time.clone(),
        };
        let existing = match lift(req, store.get_assignments_for_teacher(&a.teacher_id, a.day)) {
            Ok(v) => v,
            Err(e) => return e,
        };
        if let Err(e) = lift(req, find_teacher_conflict(&candidate, &existing)) {
            return e;
        }
    }

    if let Err(e) = lift(
        req,
        store::update_slot_times(conn, &slot.id, &start_time, &end_time, duration),
    ) {
        return e;
    }
    ok(
        &req.id,
        json!({
            "periodId": slot.id,
            "startTime": start_time,
            "endTime": end_time,
            "duration": duration,
            "assignmentUpdated": current.is_some()
        }),
    )
}

fn handle_slot_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = slot_in_session(conn, actor, req, &period_id) {
        return e;
    }
    if let Err(e) = lift(req, store::delete_slot(conn, &period_id)) {
        return e;
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (slot, scope) = match slot_in_session(conn, actor, req, &period_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if slot.period_type == PeriodType::Break {
        return err(
            &req.id,
            "bad_params",
            format!("{} is a break period and cannot take a teacher", slot.label),
            Some(json!({ "field": "periodId" })),
        );
    }

    let (teacher_school, teacher_name) =
        match lift(req, load_named(conn, "teachers", "teacher", &teacher_id)) {
            Ok(v) => v,
            Err(e) => return e,
        };
    if let Err(e) = check_tenant(req, actor, &teacher_school) {
        return e;
    }
    let (subject_school, _) = match lift(req, load_named(conn, "subjects", "subject", &subject_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = check_tenant(req, actor, &subject_school) {
        return e;
    }

    let candidate = AssignmentRequest {
        period_id: slot.id.clone(),
        timetable_id: slot.timetable_id.clone(),
        teacher_id,
        teacher_name,
        subject_id,
        class_id: scope.class_id,
        class_name: scope.class_name,
        day: slot.day,
        start_time: slot.start_time.clone(),
        end_time: slot.end_time.clone(),
    };
    let mut store = SqliteTimetableStore::new(conn);
    match lift(req, assign_teacher_to_slot(&mut store, &candidate)) {
        Ok((assignment_id, outcome)) => ok(
            &req.id,
            json!({ "assignmentId": assignment_id, "outcome": outcome.as_str() }),
        ),
        Err(e) => e,
    }
}

fn handle_unassign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = slot_in_session(conn, actor, req, &period_id) {
        return e;
    }
    match lift(req, store::delete_assignment_for_period(conn, &period_id)) {
        Ok(removed) => ok(&req.id, json!({ "removed": removed })),
        Err(e) => e,
    }
}

fn schedule_entry(a: &Assignment, display_12h: bool) -> serde_json::Value {
    let (start, end) = if display_12h {
        (convert_to_12_hour(&a.start_time), convert_to_12_hour(&a.end_time))
    } else {
        (a.start_time.clone(), a.end_time.clone())
    };
    json!({
        "assignmentId": a.id,
        "periodId": a.period_id,
        "day": a.day,
        "classId": a.class_id,
        "className": a.class_name,
        "subjectId": a.subject_id,
        "startTime": a.start_time,
        "endTime": a.end_time,
        "startTimeDisplay": start,
        "endTimeDisplay": end
    })
}

fn handle_teacher_schedule(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (school_id, teacher_name) =
        match lift(req, load_named(conn, "teachers", "teacher", &teacher_id)) {
            Ok(v) => v,
            Err(e) => return e,
        };
    if let Err(e) = check_tenant(req, actor, &school_id) {
        return e;
    }
    let settings = match load_timetable_settings(conn, &actor.school_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assignments = match lift(req, store::list_assignments_for_teacher_week(conn, &teacher_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let entries: Vec<serde_json::Value> = assignments
        .iter()
        .map(|a| schedule_entry(a, settings.display_12h))
        .collect();
    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "teacherName": teacher_name,
            "periodsPerWeek": entries.len(),
            "entries": entries
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.createDefault" => Some(handle_create_default(state, req)),
        "timetable.get" => Some(handle_get(state, req)),
        "timetable.delete" => Some(handle_delete(state, req)),
        "timetable.slot.updateTime" => Some(handle_slot_update_time(state, req)),
        "timetable.slot.delete" => Some(handle_slot_delete(state, req)),
        "timetable.assign" => Some(handle_assign(state, req)),
        "timetable.unassign" => Some(handle_unassign(state, req)),
        "timetable.teacherSchedule" => Some(handle_teacher_schedule(state, req)),
        _ => None,
    }
}
