//! Validation of raw backend payloads and CSV exports into domain records.
//!
//! Malformed records are rejected one at a time and logged; they never reach
//! the aggregation functions and never abort the rest of the snapshot.

use std::path::Path;

use anyhow::Context;
use serde_json::{Map, Number, Value};
use tracing::{debug, info, warn};

use crate::error::DataShapeError;
use crate::models::{
    CourseDetails, CourseRecord, Engagement, OngoingCourse, QualityLabel, Stage,
    StageObservation,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub index: usize,
    pub id: Option<String>,
    pub error: DataShapeError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ingested<T> {
    pub records: Vec<T>,
    pub rejected: Vec<Rejection>,
}

impl<T> Ingested<T> {
    fn collect<F>(kind: &str, values: &[Value], parse: F) -> Self
    where
        F: Fn(&Value) -> Result<T, DataShapeError>,
    {
        let mut records = Vec::with_capacity(values.len());
        let mut rejected = Vec::new();

        for (index, value) in values.iter().enumerate() {
            match parse(value) {
                Ok(record) => records.push(record),
                Err(error) => {
                    let id = record_id(value);
                    warn!(
                        kind,
                        index,
                        id = id.as_deref().unwrap_or("<none>"),
                        %error,
                        "rejecting malformed record"
                    );
                    rejected.push(Rejection { index, id, error });
                }
            }
        }

        debug!(
            kind,
            accepted = records.len(),
            rejected = rejected.len(),
            "ingested snapshot"
        );
        Ingested { records, rejected }
    }
}

pub fn ingest_historical(values: &[Value]) -> Ingested<CourseRecord> {
    Ingested::collect("historical", values, parse_historical)
}

pub fn ingest_ongoing(values: &[Value]) -> Ingested<OngoingCourse> {
    Ingested::collect("ongoing", values, parse_ongoing)
}

pub fn parse_historical(value: &Value) -> Result<CourseRecord, DataShapeError> {
    let object = as_object(value)?;

    let quality_label = object
        .get("CQS")
        .and_then(Value::as_str)
        .ok_or(DataShapeError::MissingField("CQS"))?
        .parse::<QualityLabel>()?;

    Ok(CourseRecord {
        id: id_field(object, "course_id")?,
        name: string_field(object, "course_name")?,
        enrollment_count: count_field(object, "enrollment_count")?
            .ok_or(DataShapeError::MissingField("enrollment_count"))?,
        course_quality_score: float_field(object, "course_quality_score")?
            .ok_or(DataShapeError::MissingField("course_quality_score"))?,
        learning_interaction_score: float_field(object, "learning_interaction_score")?
            .ok_or(DataShapeError::MissingField("learning_interaction_score"))?,
        quality_label,
        engagement: Engagement {
            comments_total: count_field(object, "comments_total")?,
            views_total: count_field(object, "views_total")?,
            pos_count: count_field(object, "pos_count")?,
            neg_count: count_field(object, "neg_count")?,
            n_users_content_interaction: count_field(object, "n_users_content_interaction")?,
        },
    })
}

pub fn parse_ongoing(value: &Value) -> Result<OngoingCourse, DataShapeError> {
    let object = as_object(value)?;

    let stages = object
        .get("data")
        .and_then(Value::as_array)
        .ok_or(DataShapeError::MissingField("data"))?
        .iter()
        .map(parse_observation)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(OngoingCourse {
        id: id_field(object, "id")?,
        name: string_field(object, "name")?,
        current_students: count_field(object, "current_students")?
            .ok_or(DataShapeError::MissingField("current_students"))?,
        stages,
        details: CourseDetails {
            num_chapters: count_field(object, "num_chapters")?,
            n_videos: count_field(object, "n_videos")?,
            n_exercises: count_field(object, "n_exercises")?,
            n_problems: count_field(object, "n_problems")?,
            assignment_coverage: float_field(object, "assignment_coverage")?,
            video_coverage: float_field(object, "video_coverage")?,
            discussion_coverage: float_field(object, "discussion_coverage")?,
            correct_rate_course: float_field(object, "correct_rate_course")?,
            inactive_rate: float_field(object, "inactive_rate")?,
            progress_ratio: float_field(object, "progress_ratio")?,
        },
    })
}

fn parse_observation(value: &Value) -> Result<StageObservation, DataShapeError> {
    let object = as_object(value)?;

    let stage = object
        .get("stage")
        .and_then(Value::as_str)
        .ok_or(DataShapeError::MissingField("stage"))?
        .parse::<Stage>()?;

    let prediction = match object.get("prediction") {
        None | Some(Value::Null) => None,
        Some(Value::String(label)) => Some(label.parse::<QualityLabel>()?),
        Some(other) => {
            return Err(DataShapeError::InvalidValue {
                field: "prediction",
                value: other.to_string(),
            })
        }
    };

    Ok(StageObservation {
        stage,
        prediction,
        confidence: float_field(object, "confidence")?,
    })
}

/// Loads a historical export with the backend's column names.
///
/// `CQV` is accepted as an alias of `course_quality_score`. Exports without a
/// `learning_interaction_score` column get one derived per row, see
/// [`derive_interaction_scores`].
pub fn load_historical_csv(path: &Path) -> anyhow::Result<Ingested<CourseRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();

    for result in reader.records() {
        let row = result.with_context(|| format!("failed to read {}", path.display()))?;
        let mut object = Map::new();

        for (header, cell) in headers.iter().zip(row.iter()) {
            let key = match header.trim() {
                "CQV" => "course_quality_score",
                other => other,
            };
            if key == "course_quality_score" && object.contains_key(key) {
                continue;
            }
            object.insert(key.to_string(), csv_cell(key, cell));
        }

        rows.push(object);
    }

    if !headers
        .iter()
        .any(|header| header.trim() == "learning_interaction_score")
    {
        info!(
            path = %path.display(),
            "no learning_interaction_score column, deriving it from coverage and activity"
        );
        derive_interaction_scores(&mut rows);
    }

    let values: Vec<Value> = rows.into_iter().map(Value::Object).collect();
    Ok(ingest_historical(&values))
}

const INTERACTION_RATIOS: [&str; 5] = [
    "assignment_coverage",
    "video_coverage",
    "discussion_coverage",
    "correct_rate_course",
    "progress_ratio",
];

/// Mean of the five coverage/activity ratios (each clamped to `[0, 1]`) and
/// `n_users_content_interaction` min-max normalized across the export.
/// Missing or non-numeric cells count as 0. When every row has the same
/// user count, a positive count normalizes to 0.5.
fn derive_interaction_scores(rows: &mut [Map<String, Value>]) {
    let users: Vec<f64> = rows
        .iter()
        .map(|row| numeric_cell(row, "n_users_content_interaction"))
        .collect();
    let min = users.iter().copied().fold(f64::INFINITY, f64::min);
    let max = users.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    for (row, users) in rows.iter_mut().zip(users) {
        let normalized_users = if max > min {
            (users - min) / (max - min)
        } else if users > 0.0 {
            0.5
        } else {
            0.0
        };
        let ratios: f64 = INTERACTION_RATIOS
            .iter()
            .map(|column| numeric_cell(row, column).clamp(0.0, 1.0))
            .sum();
        let score = ((ratios + normalized_users) / 6.0).clamp(0.0, 1.0);

        if let Some(score) = Number::from_f64(score) {
            row.insert(
                "learning_interaction_score".to_string(),
                Value::Number(score),
            );
        }
    }
}

fn numeric_cell(row: &Map<String, Value>, column: &str) -> f64 {
    row.get(column)
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

const TEXT_COLUMNS: [&str; 3] = ["course_id", "course_name", "CQS"];

fn csv_cell(column: &str, cell: &str) -> Value {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Value::Null;
    }
    if TEXT_COLUMNS.contains(&column) {
        return Value::String(cell.to_string());
    }
    if let Ok(integer) = cell.parse::<i64>() {
        return Value::Number(integer.into());
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, DataShapeError> {
    value
        .as_object()
        .ok_or_else(|| DataShapeError::Malformed(format!("expected an object, got {value}")))
}

fn record_id(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    ["course_id", "id"]
        .iter()
        .find_map(|key| match object.get(*key)? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
}

fn id_field(object: &Map<String, Value>, field: &'static str) -> Result<String, DataShapeError> {
    match object.get(field) {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        None | Some(Value::Null) => Err(DataShapeError::MissingField(field)),
        Some(other) => Err(DataShapeError::InvalidValue {
            field,
            value: other.to_string(),
        }),
    }
}

fn string_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<String, DataShapeError> {
    match object.get(field) {
        Some(Value::String(text)) => Ok(text.clone()),
        None | Some(Value::Null) => Err(DataShapeError::MissingField(field)),
        Some(other) => Err(DataShapeError::InvalidValue {
            field,
            value: other.to_string(),
        }),
    }
}

/// Non-negative integer counters. Integral floats such as `12.0` are accepted.
fn count_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<u64>, DataShapeError> {
    let invalid = |value: &Value| DataShapeError::InvalidValue {
        field,
        value: value.to_string(),
    };

    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::Number(number)) => {
            if let Some(count) = number.as_u64() {
                return Ok(Some(count));
            }
            match number.as_f64() {
                Some(float) if float >= 0.0 && float.fract() == 0.0 && float <= u64::MAX as f64 => {
                    Ok(Some(float as u64))
                }
                _ => Err(invalid(value)),
            }
        }
        Some(other) => Err(invalid(other)),
    }
}

fn float_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<f64>, DataShapeError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(number.as_f64()),
        Some(other) => Err(DataShapeError::InvalidValue {
            field,
            value: other.to_string(),
        }),
    }
}
