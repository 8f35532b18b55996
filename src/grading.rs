use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_percent: f64,
    pub max_percent: f64,
    pub grade: String,
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResult {
    pub grade: String,
    pub remarks: String,
}

/// Ordered highest band first; the first band whose floor the percentage
/// reaches wins, and the last band catches everything below it.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeScale {
    bands: Vec<GradeBand>,
    pass_mark: f64,
}

pub const DEFAULT_PASS_MARK: f64 = 40.0;

fn band(min: f64, max: f64, grade: &str, remark: &str) -> GradeBand {
    GradeBand {
        min_percent: min,
        max_percent: max,
        grade: grade.to_string(),
        remark: remark.to_string(),
    }
}

pub fn default_bands() -> Vec<GradeBand> {
    vec![
        band(80.0, 100.0, "1", "Excellent"),
        band(70.0, 79.0, "2", "Very Good"),
        band(65.0, 69.0, "3", "Good"),
        band(60.0, 64.0, "4", "High Average"),
        band(55.0, 59.0, "5", "Average"),
        band(50.0, 54.0, "6", "Low Average"),
        band(45.0, 49.0, "7", "Pass"),
        band(40.0, 44.0, "8", "Pass"),
        band(0.0, 39.0, "9", "Fail"),
    ]
}

impl Default for GradeScale {
    fn default() -> Self {
        Self {
            bands: default_bands(),
            pass_mark: DEFAULT_PASS_MARK,
        }
    }
}

impl GradeScale {
    pub fn new(bands: Vec<GradeBand>, pass_mark: f64) -> CoreResult<Self> {
        if bands.is_empty() {
            return Err(CoreError::InvalidGradeScale(
                "at least one band is required".to_string(),
            ));
        }
        for (i, b) in bands.iter().enumerate() {
            if !b.min_percent.is_finite() || !b.max_percent.is_finite() {
                return Err(CoreError::InvalidGradeScale(format!(
                    "band {} has a non-numeric bound",
                    i + 1
                )));
            }
            if b.grade.trim().is_empty() {
                return Err(CoreError::InvalidGradeScale(format!(
                    "band {} has an empty grade",
                    i + 1
                )));
            }
            if i > 0 && b.min_percent >= bands[i - 1].min_percent {
                return Err(CoreError::InvalidGradeScale(
                    "bands must be ordered by minPercent, highest first".to_string(),
                ));
            }
        }
        if !pass_mark.is_finite() {
            return Err(CoreError::InvalidGradeScale(
                "passMark must be a number".to_string(),
            ));
        }
        Ok(Self { bands, pass_mark })
    }

    pub fn pass_mark(&self) -> f64 {
        self.pass_mark
    }

    pub fn grade_for(&self, percentage: f64) -> GradeResult {
        let hit = self
            .bands
            .iter()
            .find(|b| percentage >= b.min_percent)
            .or_else(|| self.bands.last());
        match hit {
            Some(b) => GradeResult {
                grade: b.grade.clone(),
                remarks: b.remark.clone(),
            },
            // Unreachable for a scale built through `new`/`default`.
            None => GradeResult {
                grade: String::new(),
                remarks: String::new(),
            },
        }
    }

    pub fn passes(&self, percentage: f64) -> bool {
        percentage >= self.pass_mark
    }
}

/// Grade on the default nine-band scale.
pub fn calculate_grade(total_percentage: f64) -> GradeResult {
    GradeScale::default().grade_for(total_percentage)
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreFormula {
    /// Components are marks out of `max_marks`, each capped at its weight's
    /// share; the total is their sum.
    Capped,
    /// Components are each out of 100 and combined by weight; the total is
    /// already a percentage.
    Blended,
}

impl ScoreFormula {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capped" => Some(Self::Capped),
            "blended" => Some(Self::Blended),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Capped => "capped",
            Self::Blended => "blended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreWeighting {
    pub formula: ScoreFormula,
    pub class_weight: f64,
    pub exam_weight: f64,
}

impl Default for ScoreWeighting {
    fn default() -> Self {
        Self {
            formula: ScoreFormula::Capped,
            class_weight: 30.0,
            exam_weight: 70.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub student_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub class_score: f64,
    pub exam_score: f64,
    pub max_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredRecord {
    pub student_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub class_score: f64,
    pub exam_score: f64,
    pub total_score: f64,
    pub percentage: f64,
    pub grade: String,
    pub remarks: String,
    pub passed: bool,
}

impl ScoreWeighting {
    pub fn new(formula: ScoreFormula, class_weight: f64, exam_weight: f64) -> CoreResult<Self> {
        for (field, w) in [("classWeight", class_weight), ("examWeight", exam_weight)] {
            if !w.is_finite() || w < 0.0 {
                return Err(CoreError::InvalidScore {
                    field: field.to_string(),
                    message: "weight must be a non-negative number".to_string(),
                });
            }
        }
        if (class_weight + exam_weight - 100.0).abs() > 1e-9 {
            return Err(CoreError::InvalidScore {
                field: "examWeight".to_string(),
                message: format!(
                    "classWeight + examWeight must equal 100 (got {})",
                    class_weight + exam_weight
                ),
            });
        }
        Ok(Self {
            formula,
            class_weight,
            exam_weight,
        })
    }

    fn component_caps(&self, max_marks: f64) -> (f64, f64) {
        match self.formula {
            ScoreFormula::Capped => (
                max_marks * self.class_weight / 100.0,
                max_marks * self.exam_weight / 100.0,
            ),
            ScoreFormula::Blended => (100.0, 100.0),
        }
    }

    /// Rejects scores the marks-entry form would not accept.
    pub fn validate(&self, record: &ScoreRecord) -> CoreResult<()> {
        if self.formula == ScoreFormula::Capped
            && (!record.max_marks.is_finite() || record.max_marks <= 0.0)
        {
            return Err(CoreError::InvalidScore {
                field: "maxMarks".to_string(),
                message: "maxMarks must be greater than 0".to_string(),
            });
        }
        let (class_cap, exam_cap) = self.component_caps(record.max_marks);
        for (field, value, cap) in [
            ("classScore", record.class_score, class_cap),
            ("examScore", record.exam_score, exam_cap),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidScore {
                    field: field.to_string(),
                    message: format!("{} must be a non-negative number", field),
                });
            }
            if value > cap + 1e-9 {
                return Err(CoreError::InvalidScore {
                    field: field.to_string(),
                    message: format!("{} must not exceed {}", field, round2(cap)),
                });
            }
        }
        Ok(())
    }

    pub fn total(&self, record: &ScoreRecord) -> f64 {
        match self.formula {
            ScoreFormula::Capped => record.class_score + record.exam_score,
            ScoreFormula::Blended => {
                record.class_score * self.class_weight / 100.0
                    + record.exam_score * self.exam_weight / 100.0
            }
        }
    }

    pub fn percentage(&self, record: &ScoreRecord) -> f64 {
        let total = self.total(record);
        match self.formula {
            ScoreFormula::Capped if record.max_marks > 0.0 => total / record.max_marks * 100.0,
            ScoreFormula::Capped => 0.0,
            ScoreFormula::Blended => total,
        }
    }
}

pub fn score_record(
    record: &ScoreRecord,
    weighting: &ScoreWeighting,
    scale: &GradeScale,
) -> ScoredRecord {
    let total = weighting.total(record);
    let percentage = weighting.percentage(record);
    let grade = scale.grade_for(percentage);
    ScoredRecord {
        student_id: record.student_id.clone(),
        class_id: record.class_id.clone(),
        subject_id: record.subject_id.clone(),
        class_score: record.class_score,
        exam_score: record.exam_score,
        total_score: round2(total),
        percentage: round2(percentage),
        grade: grade.grade,
        remarks: grade.remarks,
        passed: scale.passes(percentage),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCount {
    pub grade: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAverage {
    pub class_id: String,
    pub average: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject_id: String,
    pub average: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub record_count: usize,
    pub grade_distribution: Vec<GradeCount>,
    pub class_averages: Vec<ClassAverage>,
    pub subject_averages: Vec<SubjectAverage>,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_rate: f64,
    pub average_percentage: f64,
    pub highest_percentage: Option<f64>,
    pub lowest_percentage: Option<f64>,
}

// Sorting before summing keeps the result independent of input order.
fn stable_mean(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    values.iter().sum::<f64>() / values.len() as f64
}

fn group_means<'a, I>(pairs: I) -> Vec<(String, f64, usize)>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (key, value) in pairs {
        groups.entry(key).or_default().push(value);
    }
    let mut out: Vec<(String, f64, usize)> = groups
        .into_iter()
        .map(|(key, mut values)| {
            let count = values.len();
            (key.to_string(), round2(stable_mean(&mut values)), count)
        })
        .collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    out
}

pub fn aggregate_scored(scored: &[ScoredRecord]) -> Aggregate {
    let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
    for r in scored {
        *distribution.entry(r.grade.as_str()).or_insert(0) += 1;
    }
    let grade_distribution = distribution
        .into_iter()
        .map(|(grade, count)| GradeCount {
            grade: grade.to_string(),
            count,
        })
        .collect();

    let class_averages = group_means(scored.iter().map(|r| (r.class_id.as_str(), r.total_score)))
        .into_iter()
        .map(|(class_id, average, count)| ClassAverage {
            class_id,
            average,
            count,
        })
        .collect();
    let subject_averages =
        group_means(scored.iter().map(|r| (r.subject_id.as_str(), r.percentage)))
            .into_iter()
            .map(|(subject_id, average, count)| SubjectAverage {
                subject_id,
                average,
                count,
            })
            .collect();

    let pass_count = scored.iter().filter(|r| r.passed).count();
    let fail_count = scored.len() - pass_count;
    let pass_rate = if scored.is_empty() {
        0.0
    } else {
        round2(100.0 * pass_count as f64 / scored.len() as f64)
    };
    let mut percentages: Vec<f64> = scored.iter().map(|r| r.percentage).collect();
    let average_percentage = round2(stable_mean(&mut percentages));

    Aggregate {
        record_count: scored.len(),
        grade_distribution,
        class_averages,
        subject_averages,
        pass_count,
        fail_count,
        pass_rate,
        average_percentage,
        highest_percentage: percentages.last().copied(),
        lowest_percentage: percentages.first().copied(),
    }
}

/// Grades every record and summarises the set. Recomputed from scratch on
/// every call.
pub fn aggregate_results(
    records: &[ScoreRecord],
    weighting: &ScoreWeighting,
    scale: &GradeScale,
) -> Aggregate {
    let scored: Vec<ScoredRecord> = records
        .iter()
        .map(|r| score_record(r, weighting, scale))
        .collect();
    aggregate_scored(&scored)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStanding {
    pub student_id: String,
    pub class_id: String,
    pub subject_count: usize,
    pub total_score: f64,
    pub average_percentage: f64,
    pub grade: String,
    pub remarks: String,
    pub position: usize,
}

/// Per-student standings with competition ranking (equal averages share a
/// position and the next position is skipped).
pub fn student_rankings(scored: &[ScoredRecord], scale: &GradeScale) -> Vec<StudentStanding> {
    let mut by_student: BTreeMap<&str, Vec<&ScoredRecord>> = BTreeMap::new();
    for r in scored {
        by_student.entry(r.student_id.as_str()).or_default().push(r);
    }

    let mut standings: Vec<StudentStanding> = by_student
        .into_iter()
        .map(|(student_id, rows)| {
            let mut totals: Vec<f64> = rows.iter().map(|r| r.total_score).collect();
            totals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let mut percentages: Vec<f64> = rows.iter().map(|r| r.percentage).collect();
            let average = round2(stable_mean(&mut percentages));
            let grade = scale.grade_for(average);
            let class_id = rows
                .iter()
                .map(|r| r.class_id.as_str())
                .min()
                .unwrap_or_default()
                .to_string();
            StudentStanding {
                student_id: student_id.to_string(),
                class_id,
                subject_count: rows.len(),
                total_score: round2(totals.iter().sum()),
                average_percentage: average,
                grade: grade.grade,
                remarks: grade.remarks,
                position: 0,
            }
        })
        .collect();

    standings.sort_by(|a, b| {
        b.average_percentage
            .partial_cmp(&a.average_percentage)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    let averages: Vec<f64> = standings.iter().map(|s| s.average_percentage).collect();
    for s in standings.iter_mut() {
        s.position = 1 + averages
            .iter()
            .filter(|a| **a > s.average_percentage)
            .count();
    }
    standings
}
