mod test_support;

use serde_json::json;
use test_support::{open_school, request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn setup_defaults_match_the_stock_configuration() {
    let workspace = temp_dir("schoolflow-setup-defaults");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_school(&mut stdin, &mut reader, &workspace, "Hill School");

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(setup["grading"]["passMark"], 40.0);
    assert_eq!(setup["grading"]["defaultScoreFormula"], "capped");
    assert_eq!(setup["grading"]["scale"].as_array().map(|s| s.len()), Some(9));
    assert_eq!(setup["grading"]["scale"][0]["grade"], "1");
    assert_eq!(setup["grading"]["scale"][0]["remark"], "Excellent");
    assert_eq!(setup["timetable"]["displayFormat"], "12h");
    assert_eq!(setup["timetable"]["rejectEmptyPeriods"], true);
    assert_eq!(setup["codes"]["digitCount"], 4);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn custom_scale_and_code_settings_apply_to_later_requests() {
    let workspace = temp_dir("schoolflow-setup-scale");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_school(&mut stdin, &mut reader, &workspace, "Hill School");

    let unordered = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({
            "section": "grading",
            "patch": { "scale": [
                { "minPercent": 0, "maxPercent": 49, "grade": "F", "remark": "Fail" },
                { "minPercent": 50, "maxPercent": 100, "grade": "P", "remark": "Pass" }
            ] }
        }),
    );
    assert_eq!(unordered["code"], "bad_params");

    let unknown = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "codes", "patch": { "colour": "blue" } }),
    );
    assert_eq!(unknown["message"], "unknown codes field: colour");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "grading",
            "patch": {
                "scale": [
                    { "minPercent": 50, "maxPercent": 100, "grade": "P", "remark": "Pass" },
                    { "minPercent": 0, "maxPercent": 49, "grade": "F", "remark": "Fail" }
                ],
                "passMark": 50
            }
        }),
    );
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grading.grade",
        json!({ "percentage": 49.99 }),
    );
    assert_eq!(graded["grade"], "F");
    // Below the lowest floor still lands in the last band.
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grading.grade",
        json!({ "percentage": -5 }),
    );
    assert_eq!(graded["remarks"], "Fail");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "codes", "patch": { "classPrefix": "bs", "digitCount": 6 } }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "classes.create",
        json!({ "name": "Basic 3" }),
    );
    let code = str_field(&class, "code");
    assert!(code.starts_with("BS"), "{}", code);
    assert_eq!(code.len(), 8);
    assert!(code[2..].bytes().all(|b| b.is_ascii_digit()));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_periods_are_allowed_when_the_check_is_off() {
    let workspace = temp_dir("schoolflow-setup-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_school(&mut stdin, &mut reader, &workspace, "Hill School");

    let class_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "classes.create",
            json!({ "name": "KG 1" }),
        ),
        "classId",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.createDefault",
        json!({ "classId": class_id }),
    );
    let tt = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.get",
        json!({ "classId": class_id }),
    );
    let period = str_field(&tt["slots"][9], "id");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "timetable", "patch": { "rejectEmptyPeriods": false } }),
    );
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "timetable.slot.updateTime",
        json!({ "periodId": period, "startTime": "16:00", "endTime": "15:55" }),
    );
    assert_eq!(moved["duration"], -5);

    let duration = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "time.duration",
        json!({ "startTime": "23:00", "endTime": "00:30" }),
    );
    assert_eq!(duration["minutes"], -1350);
    let converted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "time.convert",
        json!({ "time": "12:15 am", "to": "24h" }),
    );
    assert_eq!(converted["time"], "00:15");
    let touching = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "time.overlap",
        json!({ "start1": "08:00", "end1": "09:10", "start2": "09:10", "end2": "10:20" }),
    );
    assert_eq!(touching["overlaps"], false);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
