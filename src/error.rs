use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{field} must be a time in HH:MM format (got {value:?})")]
    InvalidTimeFormat { field: String, value: String },

    #[error("{field} must be later than the start time ({start} - {end})")]
    InvalidTimeRange {
        field: String,
        start: String,
        end: String,
    },

    #[error("Teacher {teacher_name} is already assigned to {class_name} during this time on {day}")]
    Conflict {
        teacher_name: String,
        class_name: String,
        day: String,
        period_id: String,
    },

    #[error("A timetable already exists for this class")]
    DuplicateTimetable { class_id: String },

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("not authorized to access records of this school")]
    Unauthorized,

    #[error("{field}: {message}")]
    InvalidScore { field: String, message: String },

    #[error("invalid grade scale: {0}")]
    InvalidGradeScale(String),

    #[error("could not find an unused {prefix} code after {attempts} attempts")]
    CodeSpaceExhausted { prefix: String, attempts: usize },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_time(field: &str, value: &str) -> Self {
        Self::InvalidTimeFormat {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// Stable wire code for IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTimeFormat { .. } => "invalid_time_format",
            Self::InvalidTimeRange { .. } => "invalid_time_range",
            Self::Conflict { .. } => "conflict",
            Self::DuplicateTimetable { .. } => "duplicate_timetable",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::InvalidScore { .. } => "invalid_score",
            Self::InvalidGradeScale(_) => "invalid_grade_scale",
            Self::CodeSpaceExhausted { .. } => "code_space_exhausted",
            Self::Database(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidTimeFormat { field, value } => {
                Some(json!({ "field": field, "value": value }))
            }
            Self::InvalidTimeRange { field, start, end } => {
                Some(json!({ "field": field, "startTime": start, "endTime": end }))
            }
            Self::Conflict {
                class_name,
                day,
                period_id,
                ..
            } => Some(json!({
                "className": class_name,
                "day": day,
                "conflictingPeriodId": period_id
            })),
            Self::DuplicateTimetable { class_id } => Some(json!({ "classId": class_id })),
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::InvalidScore { field, .. } => Some(json!({ "field": field })),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
