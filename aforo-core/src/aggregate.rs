//! Idempotent 15-minute volume aggregation.
//!
//! Events bucket by the wall-clock interval containing their exit timestamp;
//! a timestamp exactly on a boundary belongs to the interval starting there.
//! The dedup key `(dataset, interval, track)` makes replays no-ops, and a
//! full rebuild is clear-plus-replay, so derived counts are a pure function
//! of the current event set.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use aforo_types::{DatasetId, MovementCount, RilsaCode, TrackId, TrajectoryEvent};

/// Floor a timestamp to the enclosing interval start.
pub fn floor_to_interval(ts: DateTime<Utc>, interval_minutes: u32) -> DateTime<Utc> {
    let interval_secs = i64::from(interval_minutes) * 60;
    let secs = ts.timestamp();
    let floored = secs.div_euclid(interval_secs) * interval_secs;
    Utc.timestamp_opt(floored, 0).unwrap()
}

type ClassCounts = BTreeMap<String, u64>;

#[derive(Debug, Default)]
struct DatasetBuckets {
    /// Dedup: interval start → tracks already counted there.
    processed: BTreeMap<DateTime<Utc>, BTreeSet<TrackId>>,
    /// (code, interval start) → class → count. The key order is the
    /// canonical report order.
    counts: BTreeMap<(RilsaCode, DateTime<Utc>), ClassCounts>,
}

/// Per-interval view returned by [`IntervalAggregator::interval_data`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntervalData {
    /// (code, class) → count within the interval.
    pub counts_by_key: BTreeMap<(RilsaCode, String), u64>,
    pub totals_by_class: ClassCounts,
}

pub struct IntervalAggregator {
    interval_minutes: u32,
    datasets: BTreeMap<DatasetId, DatasetBuckets>,
}

impl IntervalAggregator {
    pub fn new(interval_minutes: u32) -> Self {
        IntervalAggregator {
            interval_minutes: interval_minutes.max(1),
            datasets: BTreeMap::new(),
        }
    }

    /// Count one event. Idempotent on `(dataset, interval, track)`;
    /// discarded events are excluded.
    pub fn add_event(&mut self, dataset: &DatasetId, event: &TrajectoryEvent) {
        if !event.is_counted() {
            return;
        }
        let interval = floor_to_interval(event.timestamp_exit, self.interval_minutes);
        let buckets = self.datasets.entry(dataset.clone()).or_default();
        let seen = buckets.processed.entry(interval).or_default();
        if !seen.insert(event.track_id.clone()) {
            return;
        }
        let class = event.class.canonical().as_str().to_string();
        *buckets
            .counts
            .entry((event.rilsa_code, interval))
            .or_default()
            .entry(class)
            .or_insert(0) += 1;
    }

    /// Drop everything known about a dataset.
    pub fn reset_dataset(&mut self, dataset: &DatasetId) {
        self.datasets.remove(dataset);
    }

    /// Clear and replay. Order of `events` does not matter.
    pub fn rebuild_from_events(&mut self, dataset: &DatasetId, events: &[TrajectoryEvent]) {
        self.reset_dataset(dataset);
        for event in events {
            self.add_event(dataset, event);
        }
        debug!(dataset = %dataset, events = events.len(), "rebuilt interval counts");
    }

    /// Sorted interval starts with at least one counted event.
    pub fn intervals(&self, dataset: &DatasetId) -> Vec<DateTime<Utc>> {
        let Some(buckets) = self.datasets.get(dataset) else {
            return Vec::new();
        };
        let set: BTreeSet<DateTime<Utc>> =
            buckets.counts.keys().map(|(_, interval)| *interval).collect();
        set.into_iter().collect()
    }

    pub fn interval_data(&self, dataset: &DatasetId, interval: DateTime<Utc>) -> Option<IntervalData> {
        let buckets = self.datasets.get(dataset)?;
        let mut data = IntervalData::default();
        for ((code, start), by_class) in &buckets.counts {
            if *start != interval {
                continue;
            }
            for (class, count) in by_class {
                data.counts_by_key.insert((*code, class.clone()), *count);
                *data.totals_by_class.entry(class.clone()).or_insert(0) += count;
            }
        }
        if data.counts_by_key.is_empty() {
            None
        } else {
            Some(data)
        }
    }

    /// Materialize the canonical movement-count rows: code ascending,
    /// interval ascending, classes alphabetical.
    pub fn movement_counts(&self, dataset: &DatasetId) -> Vec<MovementCount> {
        let Some(buckets) = self.datasets.get(dataset) else {
            return Vec::new();
        };
        let interval = chrono::Duration::minutes(i64::from(self.interval_minutes));
        buckets
            .counts
            .iter()
            .map(|((code, start), by_class)| MovementCount {
                dataset: dataset.clone(),
                rilsa_code: *code,
                interval_start: *start,
                interval_end: *start + interval,
                counts_by_class: by_class.clone(),
                total: by_class.values().sum(),
            })
            .collect()
    }
}

impl Default for IntervalAggregator {
    fn default() -> Self {
        IntervalAggregator::new(15)
    }
}
