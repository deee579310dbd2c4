// Parsing helpers for the raw CSV cells.
//
// Numeric cells are forgiving (anything unparseable becomes unknown), key
// cells are strict and report why they failed.
use std::cmp::Ordering;

pub const CNES_WIDTH: usize = 7;

/// Parse a numeric cell. Empty, non-numeric and non-finite values are
/// unknown (`None`), never zero.
///
/// - Trims whitespace.
/// - Accepts exponent notation (`5.2e-05`); `NaN` and `inf` parse but are
///   not finite, so they stay unknown.
/// - Does not strip `,`: the source uses `.` as the decimal point and a
///   comma means the cell came from a differently formatted export.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains(',') {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Left-pad a CNES code with zeros to seven characters. Longer codes are
/// returned unchanged.
pub fn zero_pad_cnes(raw: &str) -> String {
    format!("{:0>width$}", raw.trim(), width = CNES_WIDTH)
}

/// Validate and normalize a CNES cell. Returns the reason on failure.
pub fn normalize_cnes(raw: Option<&str>) -> Result<String, String> {
    let s = raw.map(str::trim).unwrap_or("");
    if s.is_empty() {
        return Err("empty hospital identifier".to_string());
    }
    let s = s.strip_suffix(".0").unwrap_or(s);
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not a numeric hospital identifier", s));
    }
    Ok(zero_pad_cnes(s))
}

/// Quantile of an ascending slice using linear interpolation between the
/// closest ranks.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn sort_floats(v: &mut [f64]) {
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}
