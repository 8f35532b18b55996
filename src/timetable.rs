use crate::error::{CoreError, CoreResult};
use crate::time::{calculate_duration, time_to_minutes, time_to_minutes_field};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchoolDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl SchoolDay {
    pub const ALL: [SchoolDay; 5] = [
        SchoolDay::Monday,
        SchoolDay::Tuesday,
        SchoolDay::Wednesday,
        SchoolDay::Thursday,
        SchoolDay::Friday,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" => Some(Self::Monday),
            "tuesday" => Some(Self::Tuesday),
            "wednesday" => Some(Self::Wednesday),
            "thursday" => Some(Self::Thursday),
            "friday" => Some(Self::Friday),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Class,
    Break,
}

impl PeriodType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(Self::Class),
            "break" => Some(Self::Break),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Break => "break",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timetable {
    pub id: String,
    pub school_id: String,
    pub class_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSlot {
    pub id: String,
    pub timetable_id: String,
    pub day: SchoolDay,
    pub period_number: i64,
    pub label: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: i32,
    pub period_type: PeriodType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub period_id: String,
    pub timetable_id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub class_name: String,
    pub day: SchoolDay,
    pub start_time: String,
    pub end_time: String,
}

/// A teacher + subject proposed for one slot.
#[derive(Debug, Clone)]
pub struct AssignmentRequest {
    pub period_id: String,
    pub timetable_id: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub subject_id: String,
    pub class_id: String,
    pub class_name: String,
    pub day: SchoolDay,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Created,
    Updated,
}

impl AssignmentOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

/// Persistence side of the timetable core.
pub trait TimetableStore {
    fn timetable_exists(&self, school_id: &str, class_id: &str) -> CoreResult<bool>;
    fn insert_timetable(&mut self, timetable: &Timetable, slots: &[PeriodSlot]) -> CoreResult<()>;
    fn get_slot(&self, period_id: &str) -> CoreResult<Option<PeriodSlot>>;
    fn get_assignments_for_teacher(
        &self,
        teacher_id: &str,
        day: SchoolDay,
    ) -> CoreResult<Vec<Assignment>>;
    fn find_assignment_for_period(&self, period_id: &str) -> CoreResult<Option<Assignment>>;
    fn upsert_assignment(&mut self, record: &Assignment) -> CoreResult<String>;
}

/// Half-open interval overlap: a period ending at 10:00 does not clash with
/// one starting at 10:00.
pub fn check_time_overlap(start1: &str, end1: &str, start2: &str, end2: &str) -> CoreResult<bool> {
    let s1 = time_to_minutes(start1)?;
    let e1 = time_to_minutes(end1)?;
    let s2 = time_to_minutes(start2)?;
    let e2 = time_to_minutes(end2)?;
    Ok(s1 < e2 && s2 < e1)
}

/// Fails on the first same-teacher, same-day assignment (other than the
/// candidate's own slot) whose interval overlaps the candidate's.
pub fn find_teacher_conflict(
    candidate: &AssignmentRequest,
    existing: &[Assignment],
) -> CoreResult<()> {
    for other in existing
        .iter()
        .filter(|a| a.teacher_id == candidate.teacher_id && a.day == candidate.day)
        .filter(|a| a.period_id != candidate.period_id)
    {
        if check_time_overlap(
            &candidate.start_time,
            &candidate.end_time,
            &other.start_time,
            &other.end_time,
        )? {
            return Err(CoreError::Conflict {
                teacher_name: candidate.teacher_name.clone(),
                class_name: other.class_name.clone(),
                day: candidate.day.title().to_string(),
                period_id: other.period_id.clone(),
            });
        }
    }
    Ok(())
}

pub fn assign_teacher_to_slot<S: TimetableStore + ?Sized>(
    store: &mut S,
    candidate: &AssignmentRequest,
) -> CoreResult<(String, AssignmentOutcome)> {
    let existing = store.get_assignments_for_teacher(&candidate.teacher_id, candidate.day)?;
    if let Err(e) = find_teacher_conflict(candidate, &existing) {
        if let CoreError::Conflict { period_id, .. } = &e {
            warn!(
                teacher_id = %candidate.teacher_id,
                period_id = %candidate.period_id,
                conflicting_period_id = %period_id,
                "teacher double-booking rejected"
            );
        }
        return Err(e);
    }

    let (id, outcome) = match store.find_assignment_for_period(&candidate.period_id)? {
        Some(current) => (current.id, AssignmentOutcome::Updated),
        None => (Uuid::new_v4().to_string(), AssignmentOutcome::Created),
    };
    let record = Assignment {
        id,
        period_id: candidate.period_id.clone(),
        timetable_id: candidate.timetable_id.clone(),
        teacher_id: candidate.teacher_id.clone(),
        subject_id: candidate.subject_id.clone(),
        class_id: candidate.class_id.clone(),
        class_name: candidate.class_name.clone(),
        day: candidate.day,
        start_time: candidate.start_time.clone(),
        end_time: candidate.end_time.clone(),
    };
    let id = store.upsert_assignment(&record)?;
    info!(
        assignment_id = %id,
        period_id = %record.period_id,
        teacher_id = %record.teacher_id,
        outcome = outcome.as_str(),
        "timetable assignment saved"
    );
    Ok((id, outcome))
}

pub struct TemplatePeriod {
    pub label: &'static str,
    pub start_time: &'static str,
    pub end_time: &'static str,
    pub period_type: PeriodType,
}

pub static DEFAULT_TEMPLATE: [TemplatePeriod; 10] = [
    TemplatePeriod {
        label: "Assembly",
        start_time: "07:30",
        end_time: "08:00",
        period_type: PeriodType::Break,
    },
    TemplatePeriod {
        label: "Period 1",
        start_time: "08:00",
        end_time: "09:10",
        period_type: PeriodType::Class,
    },
    TemplatePeriod {
        label: "Period 2",
        start_time: "09:10",
        end_time: "10:20",
        period_type: PeriodType::Class,
    },
    TemplatePeriod {
        label: "Break",
        start_time: "10:20",
        end_time: "10:40",
        period_type: PeriodType::Break,
    },
    TemplatePeriod {
        label: "Period 3",
        start_time: "10:45",
        end_time: "11:55",
        period_type: PeriodType::Class,
    },
    TemplatePeriod {
        label: "Period 4",
        start_time: "11:55",
        end_time: "13:05",
        period_type: PeriodType::Class,
    },
    TemplatePeriod {
        label: "Lunch",
        start_time: "13:05",
        end_time: "13:35",
        period_type: PeriodType::Break,
    },
    TemplatePeriod {
        label: "Period 5",
        start_time: "13:35",
        end_time: "14:45",
        period_type: PeriodType::Class,
    },
    TemplatePeriod {
        label: "Period 6",
        start_time: "14:45",
        end_time: "15:55",
        period_type: PeriodType::Class,
    },
    TemplatePeriod {
        label: "Closing",
        start_time: "15:55",
        end_time: "16:00",
        period_type: PeriodType::Break,
    },
];

pub fn build_default_slots(timetable_id: &str) -> CoreResult<Vec<PeriodSlot>> {
    let mut slots = Vec::with_capacity(SchoolDay::ALL.len() * DEFAULT_TEMPLATE.len());
    for day in SchoolDay::ALL {
        for (i, period) in DEFAULT_TEMPLATE.iter().enumerate() {
            slots.push(PeriodSlot {
                id: Uuid::new_v4().to_string(),
                timetable_id: timetable_id.to_string(),
                day,
                period_number: (i + 1) as i64,
                label: period.label.to_string(),
                start_time: period.start_time.to_string(),
                end_time: period.end_time.to_string(),
                duration: calculate_duration(period.start_time, period.end_time)?,
                period_type: period.period_type,
            });
        }
    }
    Ok(slots)
}

pub fn create_default_timetable<S: TimetableStore + ?Sized>(
    store: &mut S,
    school_id: &str,
    class_id: &str,
) -> CoreResult<(Timetable, Vec<PeriodSlot>)> {
    if store.timetable_exists(school_id, class_id)? {
        return Err(CoreError::DuplicateTimetable {
            class_id: class_id.to_string(),
        });
    }
    let timetable = Timetable {
        id: Uuid::new_v4().to_string(),
        school_id: school_id.to_string(),
        class_id: class_id.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    let slots = build_default_slots(&timetable.id)?;
    store.insert_timetable(&timetable, &slots)?;
    info!(
        timetable_id = %timetable.id,
        class_id = %class_id,
        slots = slots.len(),
        "default timetable created"
    );
    Ok((timetable, slots))
}

/// Boundary check for edits coming from the UI: both times must parse and
/// the period must have a positive length.
pub fn validate_period_range(start_time: &str, end_time: &str) -> CoreResult<i32> {
    let start = time_to_minutes_field(start_time, "startTime")?;
    let end = time_to_minutes_field(end_time, "endTime")?;
    if end <= start {
        return Err(CoreError::InvalidTimeRange {
            field: "endTime".to_string(),
            start: start_time.to_string(),
            end: end_time.to_string(),
        });
    }
    Ok(end - start)
}
