use crate::error::{CoreError, CoreResult};
use crate::timetable::{
    Assignment, PeriodSlot, PeriodType, SchoolDay, Timetable, TimetableStore,
};
use rusqlite::{Connection, OptionalExtension, Row};

/// SQLite-backed timetable persistence for one open workspace.
pub struct SqliteTimetableStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTimetableStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn parse_day(raw: String) -> rusqlite::Result<SchoolDay> {
    SchoolDay::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown day {:?}", raw).into(),
        )
    })
}

pub const SLOT_COLUMNS: &str =
    "id, timetable_id, day, period_number, label, start_time, end_time, duration, period_type";

pub fn slot_from_row(r: &Row<'_>) -> rusqlite::Result<PeriodSlot> {
    let period_type: String = r.get(8)?;
    Ok(PeriodSlot {
        id: r.get(0)?,
        timetable_id: r.get(1)?,
        day: parse_day(r.get(2)?)?,
        period_number: r.get(3)?,
        label: r.get(4)?,
        start_time: r.get(5)?,
        end_time: r.get(6)?,
        duration: r.get(7)?,
        period_type: PeriodType::parse(&period_type).unwrap_or(PeriodType::Class),
    })
}

pub const ASSIGNMENT_SELECT: &str = "SELECT a.id, a.period_id, a.timetable_id, a.teacher_id,
        a.subject_id, a.class_id, c.name, a.day, a.start_time, a.end_time
     FROM timetable_assignments a
     JOIN classes c ON c.id = a.class_id";

pub fn assignment_from_row(r: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: r.get(0)?,
        period_id: r.get(1)?,
        timetable_id: r.get(2)?,
        teacher_id: r.get(3)?,
        subject_id: r.get(4)?,
        class_id: r.get(5)?,
        class_name: r.get(6)?,
        day: parse_day(r.get(7)?)?,
        start_time: r.get(8)?,
        end_time: r.get(9)?,
    })
}

impl TimetableStore for SqliteTimetableStore<'_> {
    fn timetable_exists(&self, school_id: &str, class_id: &str) -> CoreResult<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM timetables WHERE school_id = ? AND class_id = ?",
                (school_id, class_id),
                |r| r.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn insert_timetable(&mut self, timetable: &Timetable, slots: &[PeriodSlot]) -> CoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO timetables(id, school_id, class_id, created_at) VALUES(?, ?, ?, ?)",
            (
                &timetable.id,
                &timetable.school_id,
                &timetable.class_id,
                &timetable.created_at,
            ),
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO period_slots(
                    id, timetable_id, day, period_number, label,
                    start_time, end_time, duration, period_type
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for s in slots {
                stmt.execute((
                    &s.id,
                    &s.timetable_id,
                    s.day.as_str(),
                    s.period_number,
                    &s.label,
                    &s.start_time,
                    &s.end_time,
                    s.duration,
                    s.period_type.as_str(),
                ))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_slot(&self, period_id: &str) -> CoreResult<Option<PeriodSlot>> {
        let sql = format!("SELECT {} FROM period_slots WHERE id = ?", SLOT_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [period_id], slot_from_row)
            .optional()?)
    }

    fn get_assignments_for_teacher(
        &self,
        teacher_id: &str,
        day: SchoolDay,
    ) -> CoreResult<Vec<Assignment>> {
        let sql = format!(
            "{} WHERE a.teacher_id = ? AND a.day = ? ORDER BY a.start_time",
            ASSIGNMENT_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((teacher_id, day.as_str()), assignment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn find_assignment_for_period(&self, period_id: &str) -> CoreResult<Option<Assignment>> {
        let sql = format!("{} WHERE a.period_id = ?", ASSIGNMENT_SELECT);
        Ok(self
            .conn
            .query_row(&sql, [period_id], assignment_from_row)
            .optional()?)
    }

    fn upsert_assignment(&mut self, record: &Assignment) -> CoreResult<String> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "INSERT INTO timetable_assignments(
                id, timetable_id, period_id, teacher_id, subject_id, class_id,
                day, start_time, end_time, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                teacher_id = excluded.teacher_id,
                subject_id = excluded.subject_id,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                updated_at = excluded.updated_at",
            (
                &record.id,
                &record.timetable_id,
                &record.period_id,
                &record.teacher_id,
                &record.subject_id,
                &record.class_id,
                record.day.as_str(),
                &record.start_time,
                &record.end_time,
                &now,
            ),
        )?;
        if changed == 0 {
            return Err(CoreError::not_found("assignment", record.id.clone()));
        }
        Ok(record.id.clone())
    }
}

pub fn list_slots(conn: &Connection, timetable_id: &str) -> CoreResult<Vec<PeriodSlot>> {
    let sql = format!(
        "SELECT {} FROM period_slots WHERE timetable_id = ?",
        SLOT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut slots = stmt
        .query_map([timetable_id], slot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    slots.sort_by(|a, b| (a.day, a.period_number).cmp(&(b.day, b.period_number)));
    Ok(slots)
}

pub fn list_assignments_for_timetable(
    conn: &Connection,
    timetable_id: &str,
) -> CoreResult<Vec<Assignment>> {
    let sql = format!("{} WHERE a.timetable_id = ?", ASSIGNMENT_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([timetable_id], assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_assignments_for_teacher_week(
    conn: &Connection,
    teacher_id: &str,
) -> CoreResult<Vec<Assignment>> {
    let sql = format!("{} WHERE a.teacher_id = ?", ASSIGNMENT_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map([teacher_id], assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by(|a, b| (a.day, &a.start_time).cmp(&(b.day, &b.start_time)));
    Ok(rows)
}

pub fn update_slot_times(
    conn: &Connection,
    period_id: &str,
    start_time: &str,
    end_time: &str,
    duration: i32,
) -> CoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        "UPDATE period_slots SET start_time = ?, end_time = ?, duration = ? WHERE id = ?",
        (start_time, end_time, duration, period_id),
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("period slot", period_id));
    }
    tx.execute(
        "UPDATE timetable_assignments SET start_time = ?, end_time = ?, updated_at = ?
         WHERE period_id = ?",
        (start_time, end_time, chrono::Utc::now().to_rfc3339(), period_id),
    )?;
    tx.commit()?;
    Ok(())
}

pub fn delete_assignment_for_period(conn: &Connection, period_id: &str) -> CoreResult<bool> {
    let changed = conn.execute(
        "DELETE FROM timetable_assignments WHERE period_id = ?",
        [period_id],
    )?;
    Ok(changed > 0)
}

pub fn delete_slot(conn: &Connection, period_id: &str) -> CoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM timetable_assignments WHERE period_id = ?",
        [period_id],
    )?;
    let changed = tx.execute("DELETE FROM period_slots WHERE id = ?", [period_id])?;
    if changed == 0 {
        return Err(CoreError::not_found("period slot", period_id));
    }
    tx.commit()?;
    Ok(())
}

/// Removes a timetable with its slots and assignments, children first.
pub fn delete_timetable(conn: &Connection, timetable_id: &str) -> CoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM timetable_assignments WHERE timetable_id = ?",
        [timetable_id],
    )?;
    tx.execute(
        "DELETE FROM period_slots WHERE timetable_id = ?",
        [timetable_id],
    )?;
    let changed = tx.execute("DELETE FROM timetables WHERE id = ?", [timetable_id])?;
    if changed == 0 {
        return Err(CoreError::not_found("timetable", timetable_id));
    }
    tx.commit()?;
    Ok(())
}
