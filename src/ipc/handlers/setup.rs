use crate::db;
use crate::grading::{default_bands, GradeBand, GradeScale, ScoreFormula, ScoreWeighting, DEFAULT_PASS_MARK};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::session;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Timetable,
    Codes,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "timetable" => Some(Self::Timetable),
            "codes" => Some(Self::Codes),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Timetable => "setup.timetable",
            Self::Codes => "setup.codes",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "scale": default_bands(),
            "passMark": DEFAULT_PASS_MARK,
            "defaultScoreFormula": "capped",
            "defaultClassWeight": 30.0,
            "defaultExamWeight": 70.0
        }),
        SetupSection::Timetable => json!({
            "displayFormat": "12h",
            "rejectEmptyPeriods": true
        }),
        SetupSection::Codes => json!({
            "classPrefix": "CLS",
            "subjectPrefix": "SUB",
            "examPrefix": "EXM",
            "digitCount": 4
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_prefix(v: &Value, key: &str) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim().to_ascii_uppercase();
    if s.is_empty() || s.len() > 8 || !s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return Err(format!("{} must be 1-8 letters, digits or '-'", key));
    }
    Ok(s)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "scale" => {
                    let bands: Vec<GradeBand> = serde_json::from_value(v.clone())
                        .map_err(|e| format!("scale must be a list of grade bands: {}", e))?;
                    GradeScale::new(bands.clone(), DEFAULT_PASS_MARK).map_err(|e| e.to_string())?;
                    obj.insert(k.clone(), json!(bands));
                }
                "passMark" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                "defaultScoreFormula" => {
                    let s = v
                        .as_str()
                        .map(|s| s.trim().to_ascii_lowercase())
                        .ok_or_else(|| format!("{} must be string", k))?;
                    if ScoreFormula::parse(&s).is_none() {
                        return Err("defaultScoreFormula must be one of: capped, blended".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "defaultClassWeight" | "defaultExamWeight" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Timetable => match k.as_str() {
                "displayFormat" => {
                    let s = v
                        .as_str()
                        .map(|s| s.trim().to_ascii_lowercase())
                        .ok_or_else(|| format!("{} must be string", k))?;
                    if s != "12h" && s != "24h" {
                        return Err("displayFormat must be one of: 12h, 24h".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "rejectEmptyPeriods" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown timetable field: {}", k)),
            },
            SetupSection::Codes => match k.as_str() {
                "classPrefix" | "subjectPrefix" | "examPrefix" => {
                    obj.insert(k.clone(), Value::String(parse_prefix(v, k)?));
                }
                "digitCount" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 3, 8)?));
                }
                _ => return Err(format!("unknown codes field: {}", k)),
            },
        }
    }
    validate_section(section, current)
}

// Cross-field rules that only make sense once the patch is merged.
fn validate_section(section: SetupSection, current: &Value) -> Result<(), String> {
    if let SetupSection::Grading = section {
        grading_defaults_from(current).map_err(|e| e.to_string())?;
        grade_scale_from(current).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn load_section(conn: &Connection, school_id: &str, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, school_id, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed stored value falls back to defaults.
            let mut candidate = current.clone();
            if merge_section_patch(section, &mut candidate, saved_obj).is_ok() {
                current = candidate;
            }
        }
    }
    Ok(current)
}

fn grade_scale_from(grading: &Value) -> anyhow::Result<GradeScale> {
    let bands: Vec<GradeBand> = match grading.get("scale") {
        Some(v) => serde_json::from_value(v.clone())?,
        None => default_bands(),
    };
    let pass_mark = grading
        .get("passMark")
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_PASS_MARK);
    Ok(GradeScale::new(bands, pass_mark)?)
}

fn grading_defaults_from(grading: &Value) -> anyhow::Result<ScoreWeighting> {
    let formula = grading
        .get("defaultScoreFormula")
        .and_then(|v| v.as_str())
        .and_then(ScoreFormula::parse)
        .unwrap_or(ScoreFormula::Capped);
    let class_weight = grading
        .get("defaultClassWeight")
        .and_then(|v| v.as_f64())
        .unwrap_or(30.0);
    let exam_weight = grading
        .get("defaultExamWeight")
        .and_then(|v| v.as_f64())
        .unwrap_or(70.0);
    Ok(ScoreWeighting::new(formula, class_weight, exam_weight)?)
}

pub fn load_grade_scale(conn: &Connection, school_id: &str) -> anyhow::Result<GradeScale> {
    grade_scale_from(&load_section(conn, school_id, SetupSection::Grading)?)
}

pub fn load_default_weighting(conn: &Connection, school_id: &str) -> anyhow::Result<ScoreWeighting> {
    grading_defaults_from(&load_section(conn, school_id, SetupSection::Grading)?)
}

#[derive(Debug, Clone)]
pub struct TimetableSettings {
    pub display_12h: bool,
    pub reject_empty_periods: bool,
}

pub fn load_timetable_settings(conn: &Connection, school_id: &str) -> anyhow::Result<TimetableSettings> {
    let v = load_section(conn, school_id, SetupSection::Timetable)?;
    Ok(TimetableSettings {
        display_12h: v.get("displayFormat").and_then(|v| v.as_str()) != Some("24h"),
        reject_empty_periods: v
            .get("rejectEmptyPeriods")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    })
}

#[derive(Debug, Clone)]
pub struct CodeSettings {
    pub class_prefix: String,
    pub subject_prefix: String,
    pub exam_prefix: String,
    pub digit_count: usize,
}

pub fn load_code_settings(conn: &Connection, school_id: &str) -> anyhow::Result<CodeSettings> {
    let v = load_section(conn, school_id, SetupSection::Codes)?;
    let prefix = |key: &str, fallback: &str| {
        v.get(key)
            .and_then(|p| p.as_str())
            .unwrap_or(fallback)
            .to_string()
    };
    Ok(CodeSettings {
        class_prefix: prefix("classPrefix", "CLS"),
        subject_prefix: prefix("subjectPrefix", "SUB"),
        exam_prefix: prefix("examPrefix", "EXM"),
        digit_count: v.get("digitCount").and_then(|d| d.as_u64()).unwrap_or(4) as usize,
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grading = match load_section(conn, &actor.school_id, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let timetable = match load_section(conn, &actor.school_id, SetupSection::Timetable) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let codes = match load_section(conn, &actor.school_id, SetupSection::Codes) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "grading": grading,
            "timetable": timetable,
            "codes": codes
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, actor) = match session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if actor.role != "admin" {
        return err(&req.id, "unauthorized", "only an administrator can change setup", None);
    }
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, &actor.school_id, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, &actor.school_id, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grading_section_builds_the_nine_band_scale() {
        let v = default_section(SetupSection::Grading);
        let scale = grade_scale_from(&v).unwrap();
        assert_eq!(scale, GradeScale::default());
        assert_eq!(grading_defaults_from(&v).unwrap(), ScoreWeighting::default());
    }

    #[test]
    fn weights_not_summing_to_one_hundred_are_rejected() {
        let mut v = default_section(SetupSection::Grading);
        let patch = json!({ "defaultClassWeight": 40 });
        let e = merge_section_patch(SetupSection::Grading, &mut v, patch.as_object().unwrap())
            .unwrap_err();
        assert!(e.contains("100"), "{}", e);

        let mut v = default_section(SetupSection::Grading);
        let patch = json!({ "defaultClassWeight": 40, "defaultExamWeight": 60 });
        merge_section_patch(SetupSection::Grading, &mut v, patch.as_object().unwrap()).unwrap();
        assert_eq!(grading_defaults_from(&v).unwrap().class_weight, 40.0);
    }

    #[test]
    fn unknown_keys_are_named() {
        let mut v = default_section(SetupSection::Codes);
        let patch = json!({ "colour": "blue" });
        let e = merge_section_patch(SetupSection::Codes, &mut v, patch.as_object().unwrap())
            .unwrap_err();
        assert_eq!(e, "unknown codes field: colour");
    }

    #[test]
    fn prefixes_are_upper_cased() {
        let mut v = default_section(SetupSection::Codes);
        let patch = json!({ "classPrefix": "cl-" });
        merge_section_patch(SetupSection::Codes, &mut v, patch.as_object().unwrap()).unwrap();
        assert_eq!(v["classPrefix"], "CL-");
    }
}
