use crate::types::{Period, Record};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Immutable handle over the loaded records. Cloning shares the rows.
#[derive(Debug, Clone)]
pub struct Dataset {
    records: Arc<[Record]>,
}

impl Dataset {
    /// Records are expected sorted by period (the loader guarantees it);
    /// they are re-sorted here so hand-built datasets behave the same.
    pub fn new(mut records: Vec<Record>) -> Self {
        records.sort_by(|a, b| {
            a.period
                .cmp(&b.period)
                .then_with(|| a.hospital_id.cmp(&b.hospital_id))
        });
        Self {
            records: records.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn ptr_eq(&self, other: &Dataset) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }

    /// Distinct hospital identifiers, ascending.
    pub fn hospital_ids(&self) -> Vec<&str> {
        let ids: BTreeSet<&str> = self.records.iter().map(|r| r.hospital_id.as_str()).collect();
        ids.into_iter().collect()
    }

    pub fn contains_hospital(&self, hospital_id: &str) -> bool {
        self.records.iter().any(|r| r.hospital_id == hospital_id)
    }

    pub fn period_bounds(&self) -> Option<(Period, Period)> {
        Some((self.records.first()?.period, self.records.last()?.period))
    }

    /// One hospital, `start..=end`. Open bounds default to the dataset's.
    pub fn filter(
        &self,
        hospital_id: &str,
        start: Option<Period>,
        end: Option<Period>,
    ) -> FilteredView {
        self.select(start, end, |r| r.hospital_id == hospital_id)
    }

    /// Every hospital, `start..=end`.
    pub fn filter_period(&self, start: Option<Period>, end: Option<Period>) -> FilteredView {
        self.select(start, end, |_| true)
    }

    fn select<F>(&self, start: Option<Period>, end: Option<Period>, keep: F) -> FilteredView
    where
        F: Fn(&Record) -> bool,
    {
        let bounds = self.period_bounds();
        let start = start.or(bounds.map(|(lo, _)| lo));
        let end = end.or(bounds.map(|(_, hi)| hi));
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => return FilteredView::default(),
        };
        let records = self
            .records
            .iter()
            .filter(|r| r.period >= start && r.period <= end && keep(r))
            .cloned()
            .collect();
        FilteredView {
            records,
            range: Some((start, end)),
        }
    }
}

/// Owned subset of records, ordered by period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredView {
    records: Vec<Record>,
    range: Option<(Period, Period)>,
}

impl FilteredView {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The selected `(start, end)` range, inclusive.
    pub fn range(&self) -> Option<(Period, Period)> {
        self.range
    }

    pub fn efficiency_scores(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.efficiency_score).collect()
    }

    pub fn production_values(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.production_value).collect()
    }

    pub fn hospital_count(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.hospital_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}
