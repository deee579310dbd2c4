// Display formatting: Brazilian number convention (`.` groups thousands,
// `,` marks decimals) and the table rows built from records and aggregates.
use crate::types::{
    DistributionRow, MonthlyAggregate, MonthlyAggregateRow, MonthlyDistribution, Record,
    RecordRow,
};
use num_format::{CustomFormat, Grouping, Locale, ToFormattedString};
use once_cell::sync::Lazy;

/// Rendered in place of any unknown or undefined value.
pub const PLACEHOLDER: &str = "-";

static PT_BR: Lazy<CustomFormat> = Lazy::new(|| {
    CustomFormat::builder()
        .grouping(Grouping::Standard)
        .separator(".")
        .decimal(",")
        .minus_sign("-")
        .build()
        .expect("static pt-BR number format is valid")
});

/// Group the integer part and join the fraction with `decimal`.
fn group_fixed<F: num_format::Format>(abs_value: f64, precision: usize, format: &F, decimal: &str) -> String {
    let fixed = format!("{:.*}", precision, abs_value);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };
    // u128 covers every realistic magnitude; beyond that keep the digits as-is.
    let mut out = match int_part.parse::<u128>() {
        Ok(n) => n.to_formatted_string(format),
        Err(_) => int_part.to_string(),
    };
    if let Some(frac) = frac_part {
        out.push_str(decimal);
        out.push_str(frac);
    }
    out
}

fn sign_for(value: f64, rendered: &str) -> &'static str {
    let is_zero = rendered.bytes().all(|b| !(b'1'..=b'9').contains(&b));
    if value.is_sign_negative() && !is_zero {
        "-"
    } else {
        ""
    }
}

/// Format with a fixed number of decimals in the pt-BR convention, e.g.
/// `1234.5` at precision 2 becomes `1.234,50`. Unknown and non-finite
/// values become [`PLACEHOLDER`].
pub fn format_pt_br(value: Option<f64>, precision: usize, prefix: &str) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let body = group_fixed(v.abs(), precision, &*PT_BR, ",");
            format!("{}{}{}", prefix, sign_for(v, &body), body)
        }
        _ => PLACEHOLDER.to_string(),
    }
}

/// Machine-style formatting (`,` thousands, `.` decimals), used where the
/// reader is a program rather than a person.
pub fn format_number(value: Option<f64>, precision: usize, grouped: bool) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let body = if grouped {
                group_fixed(v.abs(), precision, &Locale::en, ".")
            } else {
                format!("{:.*}", precision, v.abs())
            };
            format!("{}{}", sign_for(v, &body), body)
        }
        _ => PLACEHOLDER.to_string(),
    }
}

/// Percent change with two decimals and a `%` suffix.
pub fn format_change(change: Option<f64>) -> String {
    match change {
        Some(_) => format!("{}%", format_pt_br(change, 2, "")),
        None => PLACEHOLDER.to_string(),
    }
}

pub fn format_count<T: ToFormattedString>(n: T) -> String {
    n.to_formatted_string(&*PT_BR)
}

pub fn record_rows(records: &[Record]) -> Vec<RecordRow> {
    records
        .iter()
        .map(|r| RecordRow {
            hospital_id: r.hospital_id.clone(),
            period: r.period.to_string(),
            rooms: format_pt_br(r.rooms_count, 0, ""),
            sus_beds: format_pt_br(r.sus_beds_count, 0, ""),
            physician_hours: format_pt_br(r.physician_hours, 0, ""),
            nursing_hours: format_pt_br(r.nursing_hours, 0, ""),
            production: format_pt_br(r.production_value, 2, ""),
            efficiency: format_pt_br(r.efficiency_score, 4, ""),
        })
        .collect()
}

pub fn monthly_rows(months: &[MonthlyAggregate]) -> Vec<MonthlyAggregateRow> {
    months
        .iter()
        .map(|m| MonthlyAggregateRow {
            period: m.period.to_string(),
            records: format_count(m.record_count),
            simple_mean: format_pt_br(m.simple_mean, 4, ""),
            weighted_mean: format_pt_br(m.weighted_mean, 4, ""),
        })
        .collect()
}

pub fn distribution_rows(dist: &[MonthlyDistribution]) -> Vec<DistributionRow> {
    dist.iter()
        .map(|d| DistributionRow {
            period: d.period.to_string(),
            count: format_count(d.count),
            min: format_pt_br(d.min, 4, ""),
            q1: format_pt_br(d.q1, 4, ""),
            median: format_pt_br(d.median, 4, ""),
            q3: format_pt_br(d.q3, 4, ""),
            max: format_pt_br(d.max, 4, ""),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::monthly_aggregate;
    use crate::view::tests::record;

    #[test]
    fn pt_br_swaps_separators() {
        assert_eq!(format_pt_br(Some(1234.5), 2, ""), "1.234,50");
        assert_eq!(format_pt_br(Some(1234567.891), 2, ""), "1.234.567,89");
        assert_eq!(format_pt_br(Some(0.5), 4, ""), "0,5000");
        assert_eq!(format_pt_br(Some(999.0), 0, ""), "999");
        assert_eq!(format_pt_br(Some(1000.0), 0, ""), "1.000");
    }

    #[test]
    fn pt_br_prefix_and_sign() {
        assert_eq!(format_pt_br(Some(1234.5), 2, "R$ "), "R$ 1.234,50");
        assert_eq!(format_pt_br(Some(-1234.5), 2, "R$ "), "R$ -1.234,50");
        assert_eq!(format_pt_br(Some(-0.001), 2, ""), "0,00");
    }

    #[test]
    fn unknown_values_use_placeholder() {
        assert_eq!(format_pt_br(None, 2, ""), "-");
        assert_eq!(format_pt_br(Some(f64::NAN), 2, "R$ "), "-");
        assert_eq!(format_pt_br(Some(f64::INFINITY), 0, ""), "-");
        assert_eq!(format_change(None), "-");
        assert_eq!(format_number(None, 2, true), "-");
    }

    #[test]
    fn change_is_rendered_as_percent() {
        assert_eq!(format_change(Some(-8.333333)), "-8,33%");
        assert_eq!(format_change(Some(1500.0)), "1.500,00%");
    }

    #[test]
    fn machine_numbers_keep_dot_decimal() {
        assert_eq!(format_number(Some(1234.5), 2, true), "1,234.50");
        assert_eq!(format_number(Some(1234.5), 2, false), "1234.50");
        assert_eq!(format_number(Some(0.61234), 4, false), "0.6123");
    }

    #[test]
    fn counts_use_dot_grouping() {
        assert_eq!(format_count(12345usize), "12.345");
    }

    #[test]
    fn record_rows_apply_column_precisions() {
        let mut r = record("0000123", 2020, 1, Some(0.5), Some(12345.678));
        r.rooms_count = None;
        let rows = record_rows(&[r]);
        assert_eq!(rows[0].period, "01/2020");
        assert_eq!(rows[0].rooms, "-");
        assert_eq!(rows[0].sus_beds, "10");
        assert_eq!(rows[0].production, "12.345,68");
        assert_eq!(rows[0].efficiency, "0,5000");
    }

    #[test]
    fn monthly_rows_show_placeholder_for_undefined() {
        let months = monthly_aggregate(&[record("0000001", 2020, 1, Some(0.4), Some(0.0))]);
        let rows = monthly_rows(&months);
        assert_eq!(rows[0].simple_mean, "0,4000");
        assert_eq!(rows[0].weighted_mean, "-");
    }
}
