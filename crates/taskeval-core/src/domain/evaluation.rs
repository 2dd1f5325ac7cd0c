//! Evaluation model: the scored result for a task and its locked/unlocked views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{EvaluationId, TaskId};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

/// Validated output of the external evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub score: f64,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub summary: String,
}

/// Why an evaluator response was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("score is missing or not a number")]
    ScoreNotNumeric,
    #[error("score {0} is outside 0-10")]
    ScoreOutOfRange(String),
    #[error("`{0}` must be an array of strings")]
    NotStringArray(&'static str),
    #[error("summary is missing or not a string")]
    SummaryNotString,
}

impl EvaluationReport {
    /// Parse raw model output (a JSON document in text form).
    pub fn from_model_output(raw: &str) -> Result<Self, ReportError> {
        let value: serde_json::Value =
            serde_json::from_str(raw.trim()).map_err(|e| ReportError::NotJson(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Validate shape and ranges instead of trusting the model.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ReportError> {
        let obj = value.as_object().ok_or(ReportError::NotAnObject)?;

        let score = obj
            .get("score")
            .and_then(serde_json::Value::as_f64)
            .ok_or(ReportError::ScoreNotNumeric)?;
        if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(ReportError::ScoreOutOfRange(score.to_string()));
        }

        let strengths = string_array(obj.get("strengths"), "strengths")?;
        let improvements = string_array(obj.get("improvements"), "improvements")?;
        let summary = obj
            .get("summary")
            .and_then(serde_json::Value::as_str)
            .ok_or(ReportError::SummaryNotString)?
            .to_string();

        Ok(Self {
            score,
            strengths,
            improvements,
            summary,
        })
    }

    /// Markdown report shown once the evaluation is unlocked.
    pub fn full_report(&self) -> String {
        FullReport(self).to_string()
    }
}

/// Markdown rendering behind `EvaluationReport::full_report`.
struct FullReport<'a>(&'a EvaluationReport);

impl fmt::Display for FullReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let band = |hi: &'static str, mid: &'static str, lo: &'static str| {
            if report.score >= 8.0 {
                hi
            } else if report.score >= 6.0 {
                mid
            } else {
                lo
            }
        };

        writeln!(f, "# Coding Task Evaluation Report\n")?;
        writeln!(f, "## Overall Score: {}/10\n", report.score)?;
        writeln!(f, "## Summary\n{}\n", report.summary)?;
        writeln!(f, "## Strengths")?;
        for s in &report.strengths {
            writeln!(f, "- {s}")?;
        }
        writeln!(f, "\n## Areas for Improvement")?;
        for i in &report.improvements {
            writeln!(f, "- {i}")?;
        }
        writeln!(f, "\n## Detailed Analysis")?;
        writeln!(
            f,
            "**Clarity & Understanding**: {}",
            band("Excellent", "Good", "Needs improvement")
        )?;
        writeln!(
            f,
            "**Code Quality**: {}",
            band("High", "Acceptable", "Needs refactoring")
        )?;
        let robustness = if report.score >= 7.0 {
            "Handles edge cases well"
        } else {
            "Could improve edge case handling"
        };
        writeln!(f, "**Robustness**: {robustness}")
    }
}

fn string_array(
    value: Option<&serde_json::Value>,
    field: &'static str,
) -> Result<Vec<String>, ReportError> {
    let items = value
        .and_then(serde_json::Value::as_array)
        .ok_or(ReportError::NotStringArray(field))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or(ReportError::NotStringArray(field))
        })
        .collect()
}

/// Persisted evaluation, one per task.
///
/// `unlocked` only ever moves false -> true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: EvaluationId,
    pub task_id: TaskId,
    pub report: EvaluationReport,
    pub unlocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluationRecord {
    pub fn new(
        id: EvaluationId,
        task_id: TaskId,
        report: EvaluationReport,
        unlocked: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            report,
            unlocked,
            created_at: now,
            updated_at: now,
        }
    }

    /// What the owner is allowed to see right now.
    pub fn view(&self) -> EvaluationView {
        if self.unlocked {
            EvaluationView {
                task_id: self.task_id,
                score: self.report.score,
                summary: self.report.summary.clone(),
                is_unlocked: true,
                strengths: Some(self.report.strengths.clone()),
                improvements: Some(self.report.improvements.clone()),
                full_report: Some(self.report.full_report()),
            }
        } else {
            EvaluationView {
                task_id: self.task_id,
                score: self.report.score,
                summary: self.report.summary.clone(),
                is_unlocked: false,
                strengths: None,
                improvements: None,
                full_report: None,
            }
        }
    }
}

/// Owner-facing projection: detail is withheld until unlocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationView {
    pub task_id: TaskId,
    pub score: f64,
    pub summary: String,
    pub is_unlocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strengths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_report: Option<String>,
}
