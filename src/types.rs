use crate::error::DashboardError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

/// A calendar month, stored as the first day of that month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(NaiveDate);

impl Period {
    pub fn from_ym(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Period)
    }

    /// Parse the source `COMPETEN` encoding (`YYYYMM`). Spreadsheet exports
    /// sometimes carry a trailing `.0`, which is accepted.
    pub fn parse_competen(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_suffix(".0").unwrap_or(s);
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year: i32 = s[..4].parse().ok()?;
        let month: u32 = s[4..].parse().ok()?;
        Self::from_ym(year, month)
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:04}", self.month(), self.year())
    }
}

impl FromStr for Period {
    type Err = DashboardError;

    /// Accepts `YYYYMM`, `MM/YYYY` and `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = if let Some((m, y)) = trimmed.split_once('/') {
            match (y.parse::<i32>(), m.parse::<u32>()) {
                (Ok(y), Ok(m)) if y.to_string().len() == 4 => Period::from_ym(y, m),
                _ => None,
            }
        } else if let Some((y, m)) = trimmed.split_once('-') {
            match (y.parse::<i32>(), m.parse::<u32>()) {
                (Ok(y), Ok(m)) if y.to_string().len() == 4 => Period::from_ym(y, m),
                _ => None,
            }
        } else {
            Period::parse_competen(trimmed)
        };
        parsed.ok_or_else(|| DashboardError::InvalidPeriod(s.to_string()))
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Column names of the source file.
pub mod columns {
    pub const CNES: &str = "CNES";
    pub const COMPETEN: &str = "COMPETEN";
    pub const ROOMS: &str = "CNES_SALAS";
    pub const SUS_BEDS: &str = "CNES_LEITOS_SUS";
    pub const PHYSICIAN_HOURS: &str = "HORAS_MEDICOS";
    pub const NURSING_HOURS: &str = "HORAS_ENFERMAGEM";
    pub const PRODUCTION: &str = "SIA_SIH_VALOR";
    pub const EFFICIENCY: &str = "Eficiência";

    pub const REQUIRED: [&str; 8] = [
        CNES,
        COMPETEN,
        ROOMS,
        SUS_BEDS,
        PHYSICIAN_HOURS,
        NURSING_HOURS,
        PRODUCTION,
        EFFICIENCY,
    ];
}

#[derive(Debug, Deserialize)]
pub struct RawRow {
    #[serde(rename = "CNES")]
    pub cnes: Option<String>,
    #[serde(rename = "COMPETEN")]
    pub competen: Option<String>,
    #[serde(rename = "CNES_SALAS")]
    pub rooms: Option<String>,
    #[serde(rename = "CNES_LEITOS_SUS")]
    pub sus_beds: Option<String>,
    #[serde(rename = "HORAS_MEDICOS")]
    pub physician_hours: Option<String>,
    #[serde(rename = "HORAS_ENFERMAGEM")]
    pub nursing_hours: Option<String>,
    #[serde(rename = "SIA_SIH_VALOR")]
    pub production: Option<String>,
    #[serde(rename = "Eficiência")]
    pub efficiency: Option<String>,
}

/// One (hospital, month) observation. `None` marks an unknown value.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub hospital_id: String,
    pub period: Period,
    pub rooms_count: Option<f64>,
    pub sus_beds_count: Option<f64>,
    pub physician_hours: Option<f64>,
    pub nursing_hours: Option<f64>,
    pub production_value: Option<f64>,
    pub efficiency_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyAggregate {
    pub period: Period,
    pub record_count: usize,
    pub simple_mean: Option<f64>,
    pub weighted_mean: Option<f64>,
}

/// Spread of efficiency scores across hospitals within one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyDistribution {
    pub period: Period,
    pub count: usize,
    pub min: Option<f64>,
    pub q1: Option<f64>,
    pub median: Option<f64>,
    pub q3: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HospitalKpis {
    pub hospital_id: String,
    pub period: Period,
    pub efficiency: Option<f64>,
    pub efficiency_change_pct: Option<f64>,
    pub production: Option<f64>,
    pub production_change_pct: Option<f64>,
    pub weighted_efficiency: Option<f64>,
    pub months: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedSummary {
    pub first_period: Period,
    pub last_period: Period,
    pub total_records: usize,
    pub total_hospitals: usize,
    pub simple_mean: Option<f64>,
    pub weighted_mean: Option<f64>,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct RecordRow {
    #[serde(rename = "Period")]
    #[tabled(rename = "Period")]
    pub period: String,
    #[serde(rename = "CNES")]
    #[tabled(rename = "CNES")]
    pub hospital_id: String,
    #[serde(rename = "Rooms")]
    #[tabled(rename = "Rooms")]
    pub rooms: String,
    #[serde(rename = "SusBeds")]
    #[tabled(rename = "SusBeds")]
    pub sus_beds: String,
    #[serde(rename = "PhysicianHours")]
    #[tabled(rename = "PhysicianHours")]
    pub physician_hours: String,
    #[serde(rename = "NursingHours")]
    #[tabled(rename = "NursingHours")]
    pub nursing_hours: String,
    #[serde(rename = "Production")]
    #[tabled(rename = "Production")]
    pub production: String,
    #[serde(rename = "Efficiency")]
    #[tabled(rename = "Efficiency")]
    pub efficiency: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct MonthlyAggregateRow {
    #[serde(rename = "Period")]
    #[tabled(rename = "Period")]
    pub period: String,
    #[serde(rename = "Records")]
    #[tabled(rename = "Records")]
    pub records: String,
    #[serde(rename = "SimpleMean")]
    #[tabled(rename = "SimpleMean")]
    pub simple_mean: String,
    #[serde(rename = "WeightedMean")]
    #[tabled(rename = "WeightedMean")]
    pub weighted_mean: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct DistributionRow {
    #[serde(rename = "Period")]
    #[tabled(rename = "Period")]
    pub period: String,
    #[serde(rename = "Hospitals")]
    #[tabled(rename = "Hospitals")]
    pub count: String,
    #[serde(rename = "Min")]
    #[tabled(rename = "Min")]
    pub min: String,
    #[serde(rename = "Q1")]
    #[tabled(rename = "Q1")]
    pub q1: String,
    #[serde(rename = "Median")]
    #[tabled(rename = "Median")]
    pub median: String,
    #[serde(rename = "Q3")]
    #[tabled(rename = "Q3")]
    pub q3: String,
    #[serde(rename = "Max")]
    #[tabled(rename = "Max")]
    pub max: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn competen_parses_year_month() {
        let p = Period::parse_competen("201903").unwrap();
        assert_eq!((p.year(), p.month()), (2019, 3));
        assert_eq!(p.to_string(), "03/2019");
    }

    #[test]
    fn competen_accepts_spreadsheet_float_suffix() {
        assert_eq!(Period::parse_competen("202401.0"), Period::from_ym(2024, 1));
    }

    #[test]
    fn competen_rejects_bad_months_and_shapes() {
        assert!(Period::parse_competen("201913").is_none());
        assert!(Period::parse_competen("2019-03").is_none());
        assert!(Period::parse_competen("").is_none());
        assert!(Period::parse_competen("19031").is_none());
    }

    #[test]
    fn from_str_accepts_user_formats() {
        let expected = Period::from_ym(2021, 7);
        assert_eq!("07/2021".parse::<Period>().ok(), expected);
        assert_eq!("2021-07".parse::<Period>().ok(), expected);
        assert_eq!("202107".parse::<Period>().ok(), expected);
        assert!("7/21".parse::<Period>().is_err());
    }

    #[test]
    fn periods_order_chronologically() {
        let a = Period::from_ym(2019, 12).unwrap();
        let b = Period::from_ym(2020, 1).unwrap();
        assert!(a < b);
    }

    #[test]
    fn period_serializes_as_label() {
        let p = Period::from_ym(2020, 2).unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"02/2020\"");
    }
}
