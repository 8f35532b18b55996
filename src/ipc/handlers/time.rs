use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{lift, required_str};
use crate::ipc::types::{AppState, Request};
use crate::time::{calculate_duration, convert_to_12_hour, convert_to_24_hour, normalize_time};
use crate::timetable::check_time_overlap;
use serde_json::json;

fn handle_duration(req: &Request) -> serde_json::Value {
    let start = match required_str(req, "startTime") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let end = match required_str(req, "endTime") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match lift(req, calculate_duration(&start, &end)) {
        Ok(minutes) => ok(&req.id, json!({ "minutes": minutes })),
        Err(e) => e,
    }
}

fn handle_overlap(req: &Request) -> serde_json::Value {
    let mut times = Vec::with_capacity(4);
    for key in ["start1", "end1", "start2", "end2"] {
        match required_str(req, key) {
            Ok(v) => times.push(v),
            Err(e) => return e,
        }
    }
    match lift(
        req,
        check_time_overlap(&times[0], &times[1], &times[2], &times[3]),
    ) {
        Ok(overlaps) => ok(&req.id, json!({ "overlaps": overlaps })),
        Err(e) => e,
    }
}

fn handle_convert(req: &Request) -> serde_json::Value {
    let time = match required_str(req, "time") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to = match required_str(req, "to") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let converted = match to.as_str() {
        "12h" => convert_to_12_hour(&time),
        "24h" => convert_to_24_hour(&time),
        "canonical" => match lift(req, normalize_time(&time, "time")) {
            Ok(v) => v,
            Err(e) => return e,
        },
        _ => {
            return err(
                &req.id,
                "bad_params",
                "to must be one of: 12h, 24h, canonical",
                Some(json!({ "field": "to" })),
            )
        }
    };
    ok(&req.id, json!({ "time": converted }))
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "time.duration" => Some(handle_duration(req)),
        "time.overlap" => Some(handle_overlap(req)),
        "time.convert" => Some(handle_convert(req)),
        _ => None,
    }
}
