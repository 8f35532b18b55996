mod test_support;

use serde_json::json;
use test_support::{open_school, request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn another_school_cannot_touch_records() {
    let workspace = temp_dir("schoolflow-tenant");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (_, hill_admin) = open_school(&mut stdin, &mut reader, &workspace, "Hill School");

    let class_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "classes.create",
            json!({ "name": "Basic 1A" }),
        ),
        "classId",
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.createDefault",
        json!({ "classId": class_id }),
    );
    let timetable_id = str_field(&created, "timetableId");
    let teacher_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "teachers.create",
            json!({ "name": "Esi Quaye" }),
        ),
        "teacherId",
    );
    let exam_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "exams.create",
            json!({ "name": "Midterm" }),
        ),
        "examId",
    );

    let tt = request_ok(
        &mut stdin,
        &mut reader,
        "4a",
        "timetable.get",
        json!({ "classId": class_id }),
    );
    let slot_id = str_field(&tt["slots"][1], "id");

    // Second school in the same workspace.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schools.create",
        json!({ "name": "Valley School" }),
    );
    let other_admin = str_field(&other, "adminUserId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.open",
        json!({ "userId": other_admin }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "7", "classes.list", json!({}));
    assert_eq!(listed["classes"].as_array().map(|c| c.len()), Some(0));

    let probes = vec![
        ("timetable.get", json!({ "classId": class_id })),
        ("timetable.createDefault", json!({ "classId": class_id })),
        ("timetable.delete", json!({ "timetableId": timetable_id })),
        ("timetable.teacherSchedule", json!({ "teacherId": teacher_id })),
        (
            "students.create",
            json!({ "classId": class_id, "lastName": "X", "firstName": "Y" }),
        ),
        ("classes.delete", json!({ "classId": class_id })),
        ("marks.list", json!({ "examId": exam_id })),
        ("results.aggregate", json!({ "examId": exam_id })),
    ];
    for (i, (method, params)) in probes.into_iter().enumerate() {
        let e = request_err(&mut stdin, &mut reader, &format!("p{}", i), method, params);
        assert_eq!(e["code"], "unauthorized", "{} -> {}", method, e);
    }

    let e = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "timetable.assign",
        json!({ "periodId": slot_id, "teacherId": teacher_id, "subjectId": "none" }),
    );
    assert_eq!(e["code"], "unauthorized");

    // The first school's data is intact.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "session.open",
        json!({ "userId": hill_admin }),
    );
    let tt = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.get",
        json!({ "classId": class_id }),
    );
    assert_eq!(tt["slots"].as_array().map(|s| s.len()), Some(50));
    assert_eq!(tt["assignments"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn setup_changes_stay_within_one_school() {
    let workspace = temp_dir("schoolflow-tenant-setup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (_, hill_admin) = open_school(&mut stdin, &mut reader, &workspace, "Hill School");

    let other = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schools.create",
        json!({ "name": "Valley School" }),
    );
    let valley_admin = str_field(&other, "adminUserId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "session.open",
        json!({ "userId": valley_admin }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "grading", "patch": { "passMark": 90 } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "codes", "patch": { "classPrefix": "VAL" } }),
    );
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grading.grade",
        json!({ "percentage": 60 }),
    );
    assert_eq!(graded["passed"], false);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.open",
        json!({ "userId": hill_admin }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "7", "setup.get", json!({}));
    assert_eq!(setup["grading"]["passMark"], 40.0);
    assert_eq!(setup["codes"]["classPrefix"], "CLS");
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grading.grade",
        json!({ "percentage": 60 }),
    );
    assert_eq!(graded["passed"], true);
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.create",
        json!({ "name": "Basic 2" }),
    );
    assert!(str_field(&class, "code").starts_with("CLS"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
