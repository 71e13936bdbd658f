use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete one-shot journey events. The set is extensible; new kinds only
/// need a serde name and a threshold or manual trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    Departed,
    PickedUp,
    Checkpoint,
    FuelStop,
    Arriving,
    Delivered,
}

impl fmt::Display for MilestoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MilestoneKind::Departed => "departed",
            MilestoneKind::PickedUp => "picked_up",
            MilestoneKind::Checkpoint => "checkpoint",
            MilestoneKind::FuelStop => "fuel_stop",
            MilestoneKind::Arriving => "arriving",
            MilestoneKind::Delivered => "delivered",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestoneEvent {
    pub kind: MilestoneKind,
    pub journey_id: i64,
    pub fired_at: DateTime<Utc>,
}

impl MilestoneEvent {
    pub fn new(kind: MilestoneKind, journey_id: i64, fired_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            journey_id,
            fired_at,
        }
    }
}
