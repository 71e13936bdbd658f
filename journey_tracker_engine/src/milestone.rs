//! One-shot milestone detection for a single tracking session.

use chrono::Utc;
use journey_tracker_lib::milestone::{MilestoneEvent, MilestoneKind};
use journey_tracker_lib::progress::ProgressSnapshot;

use crate::config::MilestoneThreshold;

/// Watches progress percentages and fires each configured threshold exactly
/// once per session. Manual (operator-triggered) firings go through the same
/// latch, so the automatic and manual paths share one emission contract.
#[derive(Debug)]
pub struct MilestoneDetector {
    journey_id: i64,
    thresholds: Vec<ArmedThreshold>,
    /// Kinds fired manually that have no configured threshold.
    extra_fired: Vec<MilestoneKind>,
}

#[derive(Debug)]
struct ArmedThreshold {
    percent: f64,
    kind: MilestoneKind,
    fired: bool,
}

impl MilestoneDetector {
    pub fn new(journey_id: i64, thresholds: &[MilestoneThreshold]) -> Self {
        let mut thresholds: Vec<ArmedThreshold> = thresholds
            .iter()
            .map(|t| ArmedThreshold {
                percent: t.percent,
                kind: t.kind,
                fired: false,
            })
            .collect();
        thresholds.sort_by(|a, b| a.percent.total_cmp(&b.percent));

        Self {
            journey_id,
            thresholds,
            extra_fired: Vec::new(),
        }
    }

    /// Fires every unfired threshold at or below the snapshot percentage.
    /// Thresholds fire independently, so a skipped sample cannot starve a
    /// later one, and a noise-induced re-cross never fires twice.
    pub fn observe(&mut self, snapshot: &ProgressSnapshot) -> Vec<MilestoneEvent> {
        let now = Utc::now();
        let journey_id = self.journey_id;

        self.thresholds
            .iter_mut()
            .filter(|t| !t.fired && t.percent <= snapshot.progress_percentage)
            .map(|t| {
                t.fired = true;
                MilestoneEvent::new(t.kind, journey_id, now)
            })
            .collect()
    }

    /// Explicit firing of a named kind, e.g. the operator tapping
    /// "load picked up". Returns None if the kind already fired this session.
    pub fn fire_manual(&mut self, kind: MilestoneKind) -> Option<MilestoneEvent> {
        if let Some(armed) = self.thresholds.iter_mut().find(|t| t.kind == kind) {
            if armed.fired {
                return None;
            }
            armed.fired = true;
        } else {
            if self.extra_fired.contains(&kind) {
                return None;
            }
            self.extra_fired.push(kind);
        }

        Some(MilestoneEvent::new(kind, self.journey_id, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(percent: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            traveled_distance_km: 0.0,
            remaining_distance_km: 0.0,
            progress_percentage: percent,
            estimated_hours_remaining: 0.0,
        }
    }

    fn detector() -> MilestoneDetector {
        MilestoneDetector::new(
            42,
            &[
                MilestoneThreshold { percent: 1.0, kind: MilestoneKind::Departed },
                MilestoneThreshold { percent: 50.0, kind: MilestoneKind::FuelStop },
                MilestoneThreshold { percent: 100.0, kind: MilestoneKind::Delivered },
            ],
        )
    }

    #[test]
    fn fires_crossed_threshold_once() {
        let mut detector = detector();
        let events = detector.observe(&snapshot(2.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MilestoneKind::Departed);
        assert_eq!(events[0].journey_id, 42);

        assert!(detector.observe(&snapshot(3.0)).is_empty());
    }

    #[test]
    fn skipped_samples_fire_all_crossed_thresholds() {
        let mut detector = detector();
        let kinds: Vec<_> = detector.observe(&snapshot(60.0)).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MilestoneKind::Departed, MilestoneKind::FuelStop]);
    }

    #[test]
    fn noise_regression_does_not_refire() {
        let mut detector = detector();
        assert_eq!(detector.observe(&snapshot(55.0)).len(), 2);
        assert!(detector.observe(&snapshot(48.0)).is_empty());
        assert!(detector.observe(&snapshot(55.0)).is_empty());
    }

    #[test]
    fn manual_fire_is_idempotent() {
        let mut detector = detector();
        assert!(detector.fire_manual(MilestoneKind::PickedUp).is_some());
        assert!(detector.fire_manual(MilestoneKind::PickedUp).is_none());
    }

    #[test]
    fn manual_fire_suppresses_automatic_fire() {
        let mut detector = detector();
        assert!(detector.fire_manual(MilestoneKind::FuelStop).is_some());
        let kinds: Vec<_> = detector.observe(&snapshot(60.0)).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MilestoneKind::Departed]);
    }

    #[test]
    fn automatic_fire_suppresses_manual_fire() {
        let mut detector = detector();
        detector.observe(&snapshot(60.0));
        assert!(detector.fire_manual(MilestoneKind::FuelStop).is_none());
    }
}
