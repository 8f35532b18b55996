mod test_support;

use serde_json::json;
use test_support::{open_school, request, spawn_sidecar, str_field, temp_dir};

fn assert_known(value: &serde_json::Value, method: &str) {
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schoolflow-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let _ = open_school(&mut stdin, &mut reader, &workspace, "Smoke School");

    let class = request(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Smoke Class", "department": "primary" }),
    );
    let class_id = str_field(&class["result"], "classId");
    let teacher = request(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({ "name": "Smoke Teacher" }),
    );
    let teacher_id = str_field(&teacher["result"], "teacherId");
    let exam = request(
        &mut stdin,
        &mut reader,
        "4",
        "exams.create",
        json!({ "name": "Smoke Exam" }),
    );
    let exam_id = str_field(&exam["result"], "examId");

    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("schools.list", json!({})),
        ("setup.get", json!({})),
        ("classes.list", json!({})),
        ("subjects.create", json!({ "name": "Smoke Subject" })),
        ("subjects.list", json!({})),
        ("teachers.list", json!({})),
        (
            "students.create",
            json!({ "classId": class_id, "lastName": "Smoke", "firstName": "Student" }),
        ),
        ("students.list", json!({ "classId": class_id })),
        ("timetable.createDefault", json!({ "classId": class_id })),
        ("timetable.get", json!({ "classId": class_id })),
        ("timetable.slot.updateTime", json!({ "periodId": "missing", "startTime": "08:00", "endTime": "09:00" })),
        ("timetable.slot.delete", json!({ "periodId": "missing" })),
        ("timetable.assign", json!({ "periodId": "missing", "teacherId": teacher_id, "subjectId": "x" })),
        ("timetable.unassign", json!({ "periodId": "missing" })),
        ("timetable.teacherSchedule", json!({ "teacherId": teacher_id })),
        ("timetable.delete", json!({ "timetableId": "missing" })),
        ("time.duration", json!({ "startTime": "08:00", "endTime": "09:10" })),
        ("time.overlap", json!({ "start1": "08:00", "end1": "09:00", "start2": "08:30", "end2": "10:00" })),
        ("time.convert", json!({ "time": "13:05", "to": "12h" })),
        ("exams.list", json!({})),
        ("marks.upsert", json!({ "examId": exam_id, "entries": [] })),
        ("marks.list", json!({ "examId": exam_id })),
        ("grading.grade", json!({ "percentage": 72 })),
        ("results.aggregate", json!({ "examId": exam_id })),
        ("results.rankings", json!({ "examId": exam_id, "classId": class_id })),
        ("results.reportCard", json!({ "examId": exam_id, "studentId": "missing" })),
        ("classes.delete", json!({ "classId": class_id })),
        ("session.close", json!({})),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let value = request(&mut stdin, &mut reader, &format!("c{}", i), method, params);
        assert_known(&value, method);
    }

    let unknown = request(&mut stdin, &mut reader, "z", "planner.units.list", json!({}));
    assert_eq!(unknown["error"]["code"], "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn school_scoped_methods_require_a_session() {
    let workspace = temp_dir("schoolflow-no-session");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let no_ws = request(&mut stdin, &mut reader, "1", "classes.list", json!({}));
    assert_eq!(no_ws["error"]["code"], "no_workspace");

    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let no_session = request(&mut stdin, &mut reader, "3", "classes.list", json!({}));
    assert_eq!(no_session["error"]["code"], "no_session");

    let bad_user = request(
        &mut stdin,
        &mut reader,
        "4",
        "session.open",
        json!({ "userId": "nobody" }),
    );
    assert_eq!(bad_user["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
