use serde::{Deserialize, Serialize};

/// Route progress derived from the latest fix. Never stored, always
/// recomputed. `progress_percentage` is clamped to [0, 100] and may regress
/// between samples when GPS noise moves the fix backwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub traveled_distance_km: f64,
    pub remaining_distance_km: f64,
    pub progress_percentage: f64,
    pub estimated_hours_remaining: f64,
}
