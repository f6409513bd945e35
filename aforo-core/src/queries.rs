//! Read API consumed by external reporters.
//!
//! Public rollups (stats, violations) see only visible events — neither
//! discarded nor hidden. The QC summary sees everything.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use aforo_types::{Cardinal, DatasetId, ObjectClass, RilsaCode, TrajectoryEvent};

use crate::aggregate::IntervalData;
use crate::error::Result;
use crate::repository::Repository;

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub class: Option<ObjectClass>,
    pub origin: Option<Cardinal>,
    pub rilsa_code: Option<RilsaCode>,
    pub track_id_prefix: Option<String>,
    pub include_discarded: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Paging {
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPage {
    pub events: Vec<TrajectoryEvent>,
    /// Matching events before paging.
    pub total: usize,
}

/// Filtered, paged event listing, ordered by entry frame.
pub fn get_events(
    repo: &dyn Repository,
    dataset: &DatasetId,
    filter: &EventFilter,
    paging: Paging,
) -> Result<EventPage> {
    let mut events = repo.load_events(dataset)?;
    events.sort_by(|a, b| {
        (a.frame_entry, a.track_id.as_str()).cmp(&(b.frame_entry, b.track_id.as_str()))
    });
    let wanted_class = filter.class.as_ref().map(|c| c.canonical());
    let filtered: Vec<TrajectoryEvent> = events
        .into_iter()
        .filter(|e| {
            (filter.include_discarded || !e.discarded)
                && wanted_class.as_ref().map_or(true, |c| &e.class == c)
                && filter.origin.map_or(true, |o| e.origin_cardinal == o)
                && filter.rilsa_code.map_or(true, |code| e.rilsa_code == code)
                && filter
                    .track_id_prefix
                    .as_deref()
                    .map_or(true, |p| e.track_id.as_str().starts_with(p))
        })
        .collect();
    let total = filtered.len();
    let events = filtered
        .into_iter()
        .skip(paging.skip)
        .take(paging.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(EventPage { events, total })
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DatasetStats {
    pub by_class: BTreeMap<String, u64>,
    pub by_origin: BTreeMap<String, u64>,
    pub by_code: BTreeMap<RilsaCode, u64>,
}

/// Per-class, per-origin and per-code counts over visible events.
pub fn get_stats(repo: &dyn Repository, dataset: &DatasetId) -> Result<DatasetStats> {
    let mut stats = DatasetStats::default();
    for event in repo.load_events(dataset)? {
        if !event.is_visible() {
            continue;
        }
        *stats
            .by_class
            .entry(event.class.canonical().as_str().to_string())
            .or_insert(0) += 1;
        *stats
            .by_origin
            .entry(event.origin_cardinal.to_string())
            .or_insert(0) += 1;
        *stats.by_code.entry(event.rilsa_code).or_insert(0) += 1;
    }
    Ok(stats)
}

/// Sorted interval starts present in the stored movement counts.
pub fn get_intervals(repo: &dyn Repository, dataset: &DatasetId) -> Result<Vec<DateTime<Utc>>> {
    let counts = repo.load_movement_counts(dataset)?;
    let set: BTreeSet<DateTime<Utc>> = counts.iter().map(|c| c.interval_start).collect();
    Ok(set.into_iter().collect())
}

pub fn get_interval_data(
    repo: &dyn Repository,
    dataset: &DatasetId,
    interval_start: DateTime<Utc>,
) -> Result<Option<IntervalData>> {
    let mut data = IntervalData::default();
    for count in repo.load_movement_counts(dataset)? {
        if count.interval_start != interval_start {
            continue;
        }
        for (class, n) in &count.counts_by_class {
            data.counts_by_key
                .insert((count.rilsa_code, class.clone()), *n);
            *data.totals_by_class.entry(class.clone()).or_insert(0) += n;
        }
    }
    if data.counts_by_key.is_empty() {
        Ok(None)
    } else {
        Ok(Some(data))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationSummary {
    pub rilsa_code: RilsaCode,
    pub description: String,
    pub count: u64,
}

/// Rollup of visible events whose code the dataset flags as forbidden,
/// largest count first.
pub fn get_violations(
    repo: &dyn Repository,
    dataset: &DatasetId,
) -> Result<Vec<ViolationSummary>> {
    let config = repo.load_config(dataset)?;
    if config.forbidden_movements.is_empty() {
        return Ok(Vec::new());
    }
    let mut counter: BTreeMap<RilsaCode, u64> = BTreeMap::new();
    for event in repo.load_events(dataset)? {
        if !event.is_visible() {
            continue;
        }
        if config
            .forbidden_movements
            .iter()
            .any(|fm| fm.rilsa_code == event.rilsa_code)
        {
            *counter.entry(event.rilsa_code).or_insert(0) += 1;
        }
    }
    let mut summaries: Vec<ViolationSummary> = counter
        .into_iter()
        .map(|(code, count)| ViolationSummary {
            rilsa_code: code,
            description: config
                .forbidden_movements
                .iter()
                .find(|fm| fm.rilsa_code == code)
                .map(|fm| fm.description.clone())
                .unwrap_or_default(),
            count,
        })
        .collect();
    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.rilsa_code.cmp(&b.rilsa_code)));
    Ok(summaries)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QcSummary {
    pub total_tracks_raw: u64,
    /// Events that enter the aggregation (not discarded).
    pub counted_tracks: u64,
    pub discarded_events: u64,
    pub counts_by_class: BTreeMap<String, u64>,
    pub counts_by_movement: BTreeMap<RilsaCode, u64>,
    pub rejected_by_filter: BTreeMap<String, u64>,
}

/// Quality-control view: includes hidden events and surfaces the discarded
/// and filter-rejected populations.
pub fn get_qc_summary(repo: &dyn Repository, dataset: &DatasetId) -> Result<QcSummary> {
    let stats = repo.load_track_stats(dataset)?;
    let mut summary = QcSummary {
        total_tracks_raw: stats.total_tracks_raw,
        rejected_by_filter: stats.rejected_by_filter.clone(),
        ..Default::default()
    };
    for event in repo.load_events(dataset)? {
        if event.is_counted() {
            summary.counted_tracks += 1;
            *summary
                .counts_by_class
                .entry(event.class.canonical().as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .counts_by_movement
                .entry(event.rilsa_code)
                .or_insert(0) += 1;
        } else {
            summary.discarded_events += 1;
        }
    }
    Ok(summary)
}
