use crate::types::Period;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("source file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("malformed data in column '{column}'{}: {reason}", line_suffix(.line))]
    MalformedData {
        column: String,
        line: Option<u64>,
        reason: String,
    },

    #[error("duplicate record for CNES {hospital_id} at {period} (lines {first_line} and {second_line})")]
    DuplicateRecord {
        hospital_id: String,
        period: Period,
        first_line: u64,
        second_line: u64,
    },

    #[error("invalid period '{0}' (expected YYYYMM, MM/YYYY or YYYY-MM)")]
    InvalidPeriod(String),

    #[error("text generation service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn line_suffix(line: &Option<u64>) -> String {
    line.map(|l| format!(" at line {}", l)).unwrap_or_default()
}

impl DashboardError {
    pub fn missing_column(column: &str) -> Self {
        DashboardError::MalformedData {
            column: column.to_string(),
            line: None,
            reason: "required column is missing".to_string(),
        }
    }

    /// Whether the failure only affects the narrative feature.
    pub fn is_service_error(&self) -> bool {
        matches!(self, DashboardError::ServiceUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
