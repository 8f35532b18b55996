mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{open_school, request_err, request_ok, spawn_sidecar, str_field, temp_dir};

fn class_with_timetable(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
) -> (String, Vec<serde_json::Value>) {
    let class = request_ok(
        stdin,
        reader,
        "cc",
        "classes.create",
        json!({ "name": name }),
    );
    let class_id = str_field(&class, "classId");
    let _ = request_ok(
        stdin,
        reader,
        "tt",
        "timetable.createDefault",
        json!({ "classId": class_id }),
    );
    let tt = request_ok(
        stdin,
        reader,
        "tg",
        "timetable.get",
        json!({ "classId": class_id }),
    );
    let slots = tt["slots"].as_array().expect("slots").clone();
    (class_id, slots)
}

fn slot_id(slots: &[serde_json::Value], day: &str, label: &str) -> String {
    let slot = slots
        .iter()
        .find(|s| s["day"] == day && s["label"] == label)
        .unwrap_or_else(|| panic!("no {} slot on {}", label, day));
    str_field(slot, "id")
}

#[test]
fn overlapping_assignment_names_the_other_class() {
    let workspace = temp_dir("schoolflow-tt-conflicts");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_school(&mut stdin, &mut reader, &workspace, "Hill School");

    let (_a, slots_a) = class_with_timetable(&mut stdin, &mut reader, "Basic 4A");
    let (_b, slots_b) = class_with_timetable(&mut stdin, &mut reader, "Basic 4B");
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "teachers.create",
        json!({ "name": "Kofi Boateng" }),
    );
    let teacher_id = str_field(&teacher, "teacherId");
    let maths = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "subjects.create",
            json!({ "name": "Mathematics" }),
        ),
        "subjectId",
    );
    let science = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "subjects.create",
            json!({ "name": "Science" }),
        ),
        "subjectId",
    );

    let a_mon_p1 = slot_id(&slots_a, "monday", "Period 1");
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "timetable.assign",
        json!({ "periodId": a_mon_p1, "teacherId": teacher_id, "subjectId": maths }),
    );
    assert_eq!(first["outcome"], "created");
    let assignment_id = str_field(&first, "assignmentId");

    // Same teacher, same day, same hours in another class.
    let b_mon_p1 = slot_id(&slots_b, "monday", "Period 1");
    let clash = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "timetable.assign",
        json!({ "periodId": b_mon_p1, "teacherId": teacher_id, "subjectId": maths }),
    );
    assert_eq!(clash["code"], "conflict");
    assert_eq!(
        clash["message"],
        "Teacher Kofi Boateng is already assigned to Basic 4A during this time on Monday"
    );
    assert_eq!(clash["details"]["conflictingPeriodId"], a_mon_p1.as_str());

    // Reassigning the same period updates in place.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "timetable.assign",
        json!({ "periodId": a_mon_p1, "teacherId": teacher_id, "subjectId": science }),
    );
    assert_eq!(again["outcome"], "updated");
    assert_eq!(str_field(&again, "assignmentId"), assignment_id);

    // Back-to-back and other-day periods are free.
    let b_mon_p2 = slot_id(&slots_b, "monday", "Period 2");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "timetable.assign",
        json!({ "periodId": b_mon_p2, "teacherId": teacher_id, "subjectId": maths }),
    );
    let b_tue_p1 = slot_id(&slots_b, "tuesday", "Period 1");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "timetable.assign",
        json!({ "periodId": b_tue_p1, "teacherId": teacher_id, "subjectId": maths }),
    );

    let lunch = slot_id(&slots_a, "monday", "Lunch");
    let on_break = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "timetable.assign",
        json!({ "periodId": lunch, "teacherId": teacher_id, "subjectId": maths }),
    );
    assert_eq!(on_break["code"], "bad_params");

    let schedule = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.teacherSchedule",
        json!({ "teacherId": teacher_id }),
    );
    assert_eq!(schedule["periodsPerWeek"], 3);
    assert_eq!(schedule["entries"][0]["className"], "Basic 4A");
    assert_eq!(schedule["entries"][0]["startTimeDisplay"], "8:00 AM");
    assert_eq!(schedule["entries"][1]["startTime"], "09:10");
    assert_eq!(schedule["entries"][2]["day"], "tuesday");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn slot_time_edits_recheck_the_assigned_teacher() {
    let workspace = temp_dir("schoolflow-tt-edit");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_school(&mut stdin, &mut reader, &workspace, "Hill School");

    let (_a, slots_a) = class_with_timetable(&mut stdin, &mut reader, "Basic 5A");
    let (class_b, slots_b) = class_with_timetable(&mut stdin, &mut reader, "Basic 5B");
    let teacher_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "teachers.create",
            json!({ "name": "Ama Owusu" }),
        ),
        "teacherId",
    );
    let english = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "subjects.create",
            json!({ "name": "English" }),
        ),
        "subjectId",
    );

    let a_p1 = slot_id(&slots_a, "thursday", "Period 1");
    let b_p2 = slot_id(&slots_b, "thursday", "Period 2");
    for (i, period) in [&a_p1, &b_p2].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "timetable.assign",
            json!({ "periodId": period, "teacherId": teacher_id, "subjectId": english }),
        );
    }

    // Pulling 5B's period back into 08:00-09:10 would double-book her.
    let clash = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.slot.updateTime",
        json!({ "periodId": b_p2, "startTime": "08:30", "endTime": "09:40" }),
    );
    assert_eq!(clash["code"], "conflict");
    assert_eq!(
        clash["message"],
        "Teacher Ama Owusu is already assigned to Basic 5A during this time on Thursday"
    );

    let inverted = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "timetable.slot.updateTime",
        json!({ "periodId": b_p2, "startTime": "10:00", "endTime": "10:00" }),
    );
    assert_eq!(inverted["code"], "invalid_time_range");
    assert_eq!(inverted["details"]["field"], "endTime");

    let malformed = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "timetable.slot.updateTime",
        json!({ "periodId": b_p2, "startTime": "9h15", "endTime": "10:20" }),
    );
    assert_eq!(malformed["code"], "invalid_time_format");
    assert_eq!(malformed["details"]["field"], "startTime");

    // 12-hour input is accepted and stored as 24-hour.
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "timetable.slot.updateTime",
        json!({ "periodId": b_p2, "startTime": "9:15 AM", "endTime": "10:20" }),
    );
    assert_eq!(moved["startTime"], "09:15");
    assert_eq!(moved["duration"], 65);
    assert_eq!(moved["assignmentUpdated"], true);

    let tt = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "timetable.get",
        json!({ "classId": class_b }),
    );
    let assignment = tt["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .find(|a| a["periodId"] == b_p2.as_str())
        .expect("assignment for edited slot")
        .clone();
    assert_eq!(assignment["startTime"], "09:15");

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "timetable.unassign",
        json!({ "periodId": b_p2 }),
    );
    assert_eq!(removed["removed"], true);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "timetable.slot.delete",
        json!({ "periodId": a_p1 }),
    );
    let schedule = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.teacherSchedule",
        json!({ "teacherId": teacher_id }),
    );
    assert_eq!(schedule["periodsPerWeek"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
