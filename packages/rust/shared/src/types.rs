//! Core domain types for coursegraph.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Current schema version for the run manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Scope value substituted when a record carries no organizational unit.
pub const UNKNOWN_SCOPE: &str = "unknown";

/// Label substituted when a record carries no title.
pub const UNKNOWN_TITLE: &str = "Unknown";

// ---------------------------------------------------------------------------
// Key normalization
// ---------------------------------------------------------------------------

/// Normalize a course code for comparison and joins.
///
/// Trims surrounding whitespace and collapses internal whitespace runs to a
/// single space. Every join, lookup, and graph node id goes through this.
pub fn normalize_code(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// TextField
// ---------------------------------------------------------------------------

/// Descriptive text columns of a course that can feed the embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Title,
    Objectives,
    Rationale,
    Syllabus,
}

// ---------------------------------------------------------------------------
// CourseRecord
// ---------------------------------------------------------------------------

/// A single course as emitted by the crawler.
///
/// Everything except `code` is optional. Numeric fields tolerate numeric
/// strings and floats with no fractional part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    /// Unique course code. Numeric codes are read as their decimal text.
    #[serde(deserialize_with = "code_from_json")]
    pub code: String,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Organizational unit the course belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Graduate program name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    /// Concentration area within the program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concentration_area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syllabus: Option<String>,
    /// Number of credits.
    #[serde(
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub credits: Option<u32>,
    /// Weekly theory hours.
    #[serde(
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub theory_hours: Option<u32>,
    /// Weekly practice hours.
    #[serde(
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub practice_hours: Option<u32>,
    /// Weekly study hours.
    #[serde(
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub study_hours: Option<u32>,
    /// Total workload as published, e.g. `"120 horas"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_workload: Option<String>,
    /// Duration as published, e.g. `"15 semanas"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Creation date as published (`dd/mm/yyyy`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    /// Delimited list of responsible instructors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructors: Option<String>,
}

impl CourseRecord {
    /// Value of a descriptive text column.
    pub fn text(&self, field: TextField) -> Option<&str> {
        match field {
            TextField::Title => self.title.as_deref(),
            TextField::Objectives => self.objectives.as_deref(),
            TextField::Rationale => self.rationale.as_deref(),
            TextField::Syllabus => self.syllabus.as_deref(),
        }
    }

    /// Title, or [`UNKNOWN_TITLE`] when absent.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(UNKNOWN_TITLE)
    }

    /// Total workload converted to hours.
    pub fn total_workload_hours(&self) -> Option<u32> {
        self.total_workload.as_deref().and_then(parse_workload_hours)
    }

    /// Duration converted to hours.
    pub fn duration_hours(&self) -> Option<u32> {
        self.duration.as_deref().and_then(parse_workload_hours)
    }

    /// Parsed creation date.
    pub fn created_on_date(&self) -> Option<NaiveDate> {
        self.created_on
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%d/%m/%Y").ok())
    }
}

/// Convert `"<n> hours"` / `"<n> weeks"` (or the Portuguese units) into hours.
///
/// A week counts as 7 * 24 hours. Unknown units yield `None`.
pub fn parse_workload_hours(raw: &str) -> Option<u32> {
    let mut parts = raw.split_whitespace();
    let amount: u32 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.to_lowercase();
    match unit.as_str() {
        "h" | "hora" | "horas" | "hour" | "hours" => Some(amount),
        "semana" | "semanas" | "week" | "weeks" => amount.checked_mul(7 * 24),
        _ => None,
    }
}

/// Deserialize a key that crawlers may emit as a string or a bare number.
pub fn code_from_json<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "course code must be a string or number, got {other}"
        ))),
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .or_else(|| n.as_f64().and_then(whole_f64_to_u32)),
        Some(serde_json::Value::String(s)) => {
            s.trim().parse::<f64>().ok().and_then(whole_f64_to_u32)
        }
        _ => None,
    })
}

fn whole_f64_to_u32(v: f64) -> Option<u32> {
    (v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= f64::from(u32::MAX)).then_some(v as u32)
}
