//! Apply per-track manual overrides to completed events.
//!
//! Every applied correction rewrites the event in place, re-resolves its
//! RILSA code, and appends one entry to the event's append-only revision
//! log. Discarding keeps the row (flagged) so QC and the audit trail still
//! see it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use aforo_types::{
    AccessPoint, EventRevision, RilsaRuleMap, TrajectoryCorrection, TrajectoryEvent,
};

use crate::rilsa;

/// What applying one correction did to the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionOutcome {
    Unchanged,
    Updated,
    Discarded,
    /// The corrected (origin, dest) pair has no rule; the event was dropped.
    MappingGap,
}

pub fn apply_correction(
    event: &mut TrajectoryEvent,
    correction: &TrajectoryCorrection,
    rules: &RilsaRuleMap,
    accesses: &[AccessPoint],
    changed_by: &str,
    changed_at: DateTime<Utc>,
) -> CorrectionOutcome {
    let mut changes: BTreeMap<String, serde_json::Value> = BTreeMap::new();

    if correction.discard {
        if !event.discarded {
            event.discarded = true;
            changes.insert("discarded".to_string(), json!(true));
            push_revision(event, changes, changed_by, changed_at);
        }
        return CorrectionOutcome::Discarded;
    }

    if correction.hide_in_report != event.hide_in_report {
        event.hide_in_report = correction.hide_in_report;
        changes.insert(
            "hide_in_report".to_string(),
            json!(correction.hide_in_report),
        );
    }

    if let Some(new_class) = &correction.new_class {
        let canonical = new_class.canonical();
        if canonical != event.class {
            changes.insert("class".to_string(), json!(canonical.as_str()));
            event.class = canonical;
        }
    }

    if let Some(origin) = correction.new_origin {
        if origin != event.origin_cardinal {
            event.origin_cardinal = origin;
            changes.insert("origin_cardinal".to_string(), json!(origin.to_string()));
            if let Some(access) = accesses.iter().find(|a| a.cardinal == origin) {
                event.origin_access = access.id.clone();
            }
        }
    }

    if let Some(dest) = correction.new_dest {
        if dest != event.destination_cardinal {
            event.destination_cardinal = dest;
            changes.insert("destination_cardinal".to_string(), json!(dest.to_string()));
            if let Some(access) = accesses.iter().find(|a| a.cardinal == dest) {
                event.dest_access = access.id.clone();
            }
        }
    }

    if changes.is_empty() {
        return CorrectionOutcome::Unchanged;
    }

    // Re-resolve the movement code for the (possibly modified) tuple.
    match rilsa::map_movement(
        event.origin_cardinal,
        event.destination_cardinal,
        &event.class,
        rules,
    ) {
        Some(code) => {
            if code != event.rilsa_code {
                changes.insert("rilsa_code".to_string(), json!(code.to_string()));
                event.rilsa_code = code;
            }
            push_revision(event, changes, changed_by, changed_at);
            CorrectionOutcome::Updated
        }
        None => {
            debug!(track = %event.track_id, origin = %event.origin_cardinal,
                   dest = %event.destination_cardinal,
                   "corrected movement has no rule, dropping event");
            event.discarded = true;
            changes.insert("discarded".to_string(), json!(true));
            push_revision(event, changes, changed_by, changed_at);
            CorrectionOutcome::MappingGap
        }
    }
}

fn push_revision(
    event: &mut TrajectoryEvent,
    changes: BTreeMap<String, serde_json::Value>,
    changed_by: &str,
    changed_at: DateTime<Utc>,
) {
    let revision = EventRevision {
        version: event.next_revision_version(),
        changes,
        changed_by: changed_by.to_string(),
        timestamp: changed_at,
    };
    event.revisions.push(revision);
}

#[cfg(test)]
mod tests {
    use super::*;
    use aforo_types::{Cardinal, ObjectClass, PixelPoint, TrackId};
    use chrono::TimeZone;

    fn base_event() -> TrajectoryEvent {
        let t0 = Utc.timestamp_opt(0, 0).unwrap();
        TrajectoryEvent {
            track_id: TrackId::new("track_1"),
            class: ObjectClass::new("car"),
            origin_access: "north".to_string(),
            dest_access: "south".to_string(),
            origin_cardinal: Cardinal::N,
            destination_cardinal: Cardinal::S,
            rilsa_code: "1".parse().unwrap(),
            frame_entry: 0,
            frame_exit: 150,
            timestamp_entry: t0,
            timestamp_exit: t0 + chrono::Duration::seconds(5),
            positions: vec![PixelPoint::new(0.0, 0.0)],
            confidence: 0.9,
            hide_in_report: false,
            discarded: false,
            revisions: vec![],
        }
    }

    fn accesses() -> Vec<AccessPoint> {
        Cardinal::ALL
            .iter()
            .map(|&cardinal| AccessPoint {
                id: format!("acc_{}", cardinal.to_string().to_lowercase()),
                cardinal,
                x: 0.0,
                y: 0.0,
                polygon: None,
                gate: None,
            })
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 7, 12, 0, 0).unwrap()
    }

    #[test]
    fn reassigning_destination_remaps_the_code() {
        let mut event = base_event();
        let correction = TrajectoryCorrection {
            new_dest: Some(Cardinal::E),
            ..Default::default()
        };
        let outcome = apply_correction(
            &mut event,
            &correction,
            &RilsaRuleMap::default(),
            &accesses(),
            "editor",
            now(),
        );
        assert_eq!(outcome, CorrectionOutcome::Updated);
        assert_eq!(event.rilsa_code.to_string(), "5");
        assert_eq!(event.dest_access, "acc_e");
        assert_eq!(event.revisions.len(), 1);
        let rev = &event.revisions[0];
        assert_eq!(rev.version, 1);
        assert_eq!(rev.changes["rilsa_code"], "5");
        assert_eq!(rev.changes["destination_cardinal"], "E");
    }

    #[test]
    fn discard_wins_over_everything_else() {
        let mut event = base_event();
        let correction = TrajectoryCorrection {
            discard: true,
            new_dest: Some(Cardinal::E),
            ..Default::default()
        };
        let outcome = apply_correction(
            &mut event,
            &correction,
            &RilsaRuleMap::default(),
            &accesses(),
            "editor",
            now(),
        );
        assert_eq!(outcome, CorrectionOutcome::Discarded);
        assert!(event.discarded);
        // The destination was not touched.
        assert_eq!(event.destination_cardinal, Cardinal::S);
    }

    #[test]
    fn mapping_gap_after_correction_drops_the_event() {
        let mut event = base_event();
        let rules = RilsaRuleMap { rules: vec![] };
        let correction = TrajectoryCorrection {
            new_dest: Some(Cardinal::E),
            ..Default::default()
        };
        let outcome =
            apply_correction(&mut event, &correction, &rules, &accesses(), "editor", now());
        assert_eq!(outcome, CorrectionOutcome::MappingGap);
        assert!(event.discarded);
    }

    #[test]
    fn class_change_recomputes_pedestrian_code_from_origin() {
        let mut event = base_event();
        let correction = TrajectoryCorrection {
            new_class: Some(ObjectClass::new("person")),
            ..Default::default()
        };
        let outcome = apply_correction(
            &mut event,
            &correction,
            &RilsaRuleMap::default(),
            &accesses(),
            "editor",
            now(),
        );
        assert_eq!(outcome, CorrectionOutcome::Updated);
        assert_eq!(event.class.as_str(), "pedestrian");
        assert_eq!(event.rilsa_code.to_string(), "P1");
    }

    #[test]
    fn reapplying_the_same_correction_is_stable() {
        let mut event = base_event();
        let correction = TrajectoryCorrection {
            new_dest: Some(Cardinal::E),
            ..Default::default()
        };
        let rules = RilsaRuleMap::default();
        apply_correction(&mut event, &correction, &rules, &accesses(), "editor", now());
        let snapshot = (
            event.rilsa_code,
            event.destination_cardinal,
            event.dest_access.clone(),
        );
        let outcome =
            apply_correction(&mut event, &correction, &rules, &accesses(), "editor", now());
        assert_eq!(outcome, CorrectionOutcome::Unchanged);
        assert_eq!(
            (
                event.rilsa_code,
                event.destination_cardinal,
                event.dest_access.clone()
            ),
            snapshot
        );
        // No second revision for a no-op.
        assert_eq!(event.revisions.len(), 1);
    }

    #[test]
    fn corrections_on_disjoint_tracks_commute() {
        let rules = RilsaRuleMap::default();
        let acc = accesses();
        let c1 = TrajectoryCorrection {
            new_dest: Some(Cardinal::E),
            ..Default::default()
        };
        let c2 = TrajectoryCorrection {
            new_class: Some(ObjectClass::new("bus")),
            ..Default::default()
        };

        let mut e1a = base_event();
        let mut e2a = {
            let mut e = base_event();
            e.track_id = TrackId::new("track_2");
            e
        };
        apply_correction(&mut e1a, &c1, &rules, &acc, "editor", now());
        apply_correction(&mut e2a, &c2, &rules, &acc, "editor", now());

        let mut e1b = base_event();
        let mut e2b = {
            let mut e = base_event();
            e.track_id = TrackId::new("track_2");
            e
        };
        apply_correction(&mut e2b, &c2, &rules, &acc, "editor", now());
        apply_correction(&mut e1b, &c1, &rules, &acc, "editor", now());

        assert_eq!(e1a, e1b);
        assert_eq!(e2a, e2b);
    }

    #[test]
    fn versions_increase_monotonically() {
        let mut event = base_event();
        let rules = RilsaRuleMap::default();
        let acc = accesses();
        apply_correction(
            &mut event,
            &TrajectoryCorrection {
                new_dest: Some(Cardinal::E),
                ..Default::default()
            },
            &rules,
            &acc,
            "editor",
            now(),
        );
        apply_correction(
            &mut event,
            &TrajectoryCorrection {
                new_dest: Some(Cardinal::O),
                ..Default::default()
            },
            &rules,
            &acc,
            "editor",
            now(),
        );
        let versions: Vec<u32> = event.revisions.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(event.rilsa_code.to_string(), "9_1");
    }
}
