// Indicator statistics over arbitrary record subsets.
//
// Every statistic returns `None` when it has no valid input; callers decide
// how to render that.
use crate::types::{MonthlyAggregate, MonthlyDistribution, Period, Record};
use crate::util::{quantile_sorted, sort_floats};
use std::collections::BTreeMap;

/// The chronologically last record and, when there are at least two, the
/// one before it. Ordering is by period, not by position in `records`.
pub fn latest_and_previous(records: &[Record]) -> Option<(&Record, Option<&Record>)> {
    let mut ordered: Vec<&Record> = records.iter().collect();
    ordered.sort_by_key(|r| r.period);
    let latest = ordered.pop()?;
    Some((latest, ordered.pop()))
}

/// `(current - previous) / previous * 100`, undefined for an unknown or
/// zero baseline and for an unknown current value.
pub fn percent_change(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let current = current?;
    let previous = previous?;
    if previous == 0.0 {
        return None;
    }
    Some((current - previous) / previous * 100.0)
}

pub fn simple_mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Mean of `values` weighted by `weights`. Pairs with an unknown value, an
/// unknown weight or a weight `<= 0` take no part in either sum. Extra
/// elements in the longer slice are ignored.
pub fn weighted_mean(values: &[Option<f64>], weights: &[Option<f64>]) -> Option<f64> {
    weighted_mean_pairs(values.iter().copied().zip(weights.iter().copied()))
}

fn weighted_mean_pairs<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (Option<f64>, Option<f64>)>,
{
    let (num, den) = pairs
        .into_iter()
        .filter_map(|(v, w)| match (v, w) {
            (Some(v), Some(w)) if w > 0.0 => Some((v, w)),
            _ => None,
        })
        .fold((0.0, 0.0), |(num, den), (v, w)| (num + v * w, den + w));
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

/// Production-weighted efficiency over a record set.
pub fn weighted_efficiency(records: &[Record]) -> Option<f64> {
    weighted_mean_pairs(records.iter().map(|r| (r.efficiency_score, r.production_value)))
}

fn group_by_month(records: &[Record]) -> BTreeMap<Period, Vec<&Record>> {
    let mut groups: BTreeMap<Period, Vec<&Record>> = BTreeMap::new();
    for r in records {
        groups
            .entry(r.period)
            .or_default()
            .push(r);
    }
    groups
}

/// One row per month, ascending, with the simple and production-weighted
/// efficiency means. Each statistic is undefined independently.
pub fn monthly_aggregate(records: &[Record]) -> Vec<MonthlyAggregate> {
    group_by_month(records)
        .into_iter()
        .map(|(period, group)| MonthlyAggregate {
            period,
            record_count: group.len(),
            simple_mean: simple_mean(group.iter().map(|r| r.efficiency_score)),
            weighted_mean: weighted_mean_pairs(
                group.iter().map(|r| (r.efficiency_score, r.production_value)),
            ),
        })
        .collect()
}

/// Five-number summary of known efficiency scores per month.
pub fn monthly_distribution(records: &[Record]) -> Vec<MonthlyDistribution> {
    group_by_month(records)
        .into_iter()
        .map(|(period, group)| {
            let mut scores: Vec<f64> = group.iter().filter_map(|r| r.efficiency_score).collect();
            sort_floats(&mut scores);
            MonthlyDistribution {
                period,
                count: scores.len(),
                min: scores.first().copied(),
                q1: quantile_sorted(&scores, 0.25),
                median: quantile_sorted(&scores, 0.5),
                q3: quantile_sorted(&scores, 0.75),
                max: scores.last().copied(),
            }
        })
        .collect()
}
