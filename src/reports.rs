use crate::aggregate::{
    latest_and_previous, percent_change, simple_mean, weighted_efficiency, weighted_mean,
};
use crate::types::{ConsolidatedSummary, HospitalKpis};
use crate::view::FilteredView;

/// Headline indicators for one hospital: the latest month's efficiency and
/// production with their change against the month before, plus the
/// production-weighted efficiency over the whole view.
pub fn hospital_kpis(view: &FilteredView) -> Option<HospitalKpis> {
    let records = view.records();
    let (latest, previous) = latest_and_previous(records)?;
    let prev_efficiency = previous.and_then(|p| p.efficiency_score);
    let prev_production = previous.and_then(|p| p.production_value);
    Some(HospitalKpis {
        hospital_id: latest.hospital_id.clone(),
        period: latest.period,
        efficiency: latest.efficiency_score,
        efficiency_change_pct: percent_change(latest.efficiency_score, prev_efficiency),
        production: latest.production_value,
        production_change_pct: percent_change(latest.production_value, prev_production),
        weighted_efficiency: weighted_efficiency(records),
        months: records.len(),
    })
}

pub fn consolidated_summary(view: &FilteredView) -> Option<ConsolidatedSummary> {
    let records = view.records();
    let first = records.first()?;
    let last = records.last()?;
    Some(ConsolidatedSummary {
        first_period: first.period,
        last_period: last.period,
        total_records: records.len(),
        total_hospitals: view.hospital_count(),
        simple_mean: simple_mean(view.efficiency_scores()),
        weighted_mean: weighted_mean(&view.efficiency_scores(), &view.production_values()),
    })
}
