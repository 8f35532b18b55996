use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoolflow.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            school_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value_json TEXT NOT NULL,
            PRIMARY KEY(school_id, key),
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_school ON users(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            department TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_school ON classes(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            department TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_school ON subjects(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            student_no TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetables(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(school_id, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS period_slots(
            id TEXT PRIMARY KEY,
            timetable_id TEXT NOT NULL,
            day TEXT NOT NULL,
            period_number INTEGER NOT NULL,
            label TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            duration INTEGER NOT NULL,
            period_type TEXT NOT NULL,
            FOREIGN KEY(timetable_id) REFERENCES timetables(id),
            UNIQUE(timetable_id, day, period_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_period_slots_timetable ON period_slots(timetable_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_assignments(
            id TEXT PRIMARY KEY,
            timetable_id TEXT NOT NULL,
            period_id TEXT NOT NULL UNIQUE,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            day TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(timetable_id) REFERENCES timetables(id),
            FOREIGN KEY(period_id) REFERENCES period_slots(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher_day
         ON timetable_assignments(teacher_id, day)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_timetable ON timetable_assignments(timetable_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            term INTEGER,
            department TEXT,
            max_marks REAL NOT NULL DEFAULT 100,
            score_formula TEXT NOT NULL DEFAULT 'capped',
            class_weight REAL NOT NULL DEFAULT 30,
            exam_weight REAL NOT NULL DEFAULT 70,
            weightage REAL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_marks(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            class_score REAL NOT NULL,
            exam_score REAL NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(exam_id, student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_marks_exam ON exam_marks(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_marks_student ON exam_marks(student_id)",
        [],
    )?;

    Ok(conn)
}

/// Settings are stored per school; a missing row means stock defaults.
pub fn settings_get_json(
    conn: &Connection,
    school_id: &str,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE school_id = ? AND key = ?",
            (school_id, key),
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    school_id: &str,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(school_id, key, value_json) VALUES(?, ?, ?)
         ON CONFLICT(school_id, key) DO UPDATE SET value_json = excluded.value_json",
        (school_id, key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    fn column_names(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        stmt.query_map([], |r| r.get::<_, String>(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn seed_schools(conn: &Connection) {
        for id in ["s1", "s2"] {
            conn.execute(
                "INSERT INTO schools(id, name, created_at) VALUES(?, ?, '2026-01-01T00:00:00Z')",
                (id, id),
            )
            .unwrap();
        }
    }

    #[test]
    fn open_is_idempotent() {
        let ws = temp_workspace("schoolflow-db-open");
        let conn = open_db(&ws).expect("open");
        assert!(column_names(&conn, "classes").contains(&"department".to_string()));
        drop(conn);
        let conn = open_db(&ws).expect("reopen");
        assert!(column_names(&conn, "period_slots").contains(&"duration".to_string()));
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn settings_round_trip_and_overwrite() {
        let ws = temp_workspace("schoolflow-db-settings");
        let conn = open_db(&ws).expect("open");
        seed_schools(&conn);
        assert_eq!(settings_get_json(&conn, "s1", "setup.grading").unwrap(), None);
        settings_set_json(&conn, "s1", "setup.grading", &json!({ "passMark": 45 })).unwrap();
        settings_set_json(&conn, "s1", "setup.grading", &json!({ "passMark": 50 })).unwrap();
        assert_eq!(
            settings_get_json(&conn, "s1", "setup.grading").unwrap(),
            Some(json!({ "passMark": 50 }))
        );
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn settings_are_kept_apart_per_school() {
        let ws = temp_workspace("schoolflow-db-settings-school");
        let conn = open_db(&ws).expect("open");
        seed_schools(&conn);
        settings_set_json(&conn, "s2", "setup.grading", &json!({ "passMark": 90 })).unwrap();
        assert_eq!(settings_get_json(&conn, "s1", "setup.grading").unwrap(), None);
        assert_eq!(
            settings_get_json(&conn, "s2", "setup.grading").unwrap(),
            Some(json!({ "passMark": 90 }))
        );
        let _ = std::fs::remove_dir_all(ws);
    }
}
