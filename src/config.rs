// SPDX-License-Identifier: Apache-2.0

//! Live-tunable pipeline parameters (§6.2).
//!
//! `ParameterSet` is the hot-reloadable counterpart to [`crate::args::Args`]
//! (the static `clap` CLI): a plain `serde`-friendly struct, validated and
//! replaced wholesale behind an `Arc<RwLock<ParameterSet>>`, never mutated
//! field-by-field in place.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::background::BackgroundParams;
use crate::cluster::ClusterParams;
use crate::extractor::{ExtractorParams, MergeMode, Mode};
use crate::tracker::TrackerParams;
use crate::transit::TransitParams;

/// The full set of live-tunable pipeline parameters (§3.1, §6.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSet {
    pub background: BackgroundParams,
    pub extractor: ExtractorParams,
    pub cluster: ClusterParams,
    pub tracker: TrackerParams,
    pub transit: TransitParams,
}

impl Default for ParameterSet {
    fn default() -> Self {
        ParameterSet {
            background: BackgroundParams::default(),
            extractor: ExtractorParams::default(),
            cluster: ClusterParams::default(),
            tracker: TrackerParams::default(),
            transit: TransitParams::default(),
        }
    }
}

/// Structured rejection for a failed parameter update, naming the
/// offending field and the bound that was violated (§3.1, §7).
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterError {
    /// Dotted field path, e.g. `"background.update_fraction"`.
    pub field: String,
    /// Human-readable description of the bound that was violated.
    pub reason: String,
}

impl std::error::Error for ParameterError {}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid parameter {}: {}", self.field, self.reason)
    }
}

fn field_err(field: &str, reason: impl Into<String>) -> ParameterError {
    ParameterError {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn as_f32(value: &Value, field: &str) -> Result<f32, ParameterError> {
    value
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| field_err(field, "expected a number"))
}

fn as_u64(value: &Value, field: &str) -> Result<u64, ParameterError> {
    value.as_u64().ok_or_else(|| field_err(field, "expected a non-negative integer"))
}

fn as_u32(value: &Value, field: &str) -> Result<u32, ParameterError> {
    as_u64(value, field).map(|v| v as u32)
}

fn as_usize(value: &Value, field: &str) -> Result<usize, ParameterError> {
    as_u64(value, field).map(|v| v as usize)
}

fn require_range(field: &str, v: f32, lo: f32, hi: f32) -> Result<f32, ParameterError> {
    if v < lo || v > hi {
        Err(field_err(field, format!("must be in [{lo}, {hi}], got {v}")))
    } else {
        Ok(v)
    }
}

fn require_nonnegative(field: &str, v: f32) -> Result<f32, ParameterError> {
    if v < 0.0 {
        Err(field_err(field, format!("must be >= 0, got {v}")))
    } else {
        Ok(v)
    }
}

impl ParameterSet {
    /// Apply a JSON object of dotted-path updates, validating every field
    /// before committing any of them (§6.2 Validation: "rejected
    /// atomically, all-or-nothing").
    ///
    /// Unrecognized keys are rejected rather than silently ignored, so a
    /// typo in an HTTP request body surfaces immediately.
    pub fn apply_update(&mut self, updates: &Value) -> Result<(), ParameterError> {
        let object = updates
            .as_object()
            .ok_or_else(|| field_err("<root>", "expected a JSON object"))?;

        let mut candidate = self.clone();
        for (key, value) in object {
            apply_one(&mut candidate, key, value)?;
        }
        *self = candidate;
        Ok(())
    }
}

fn apply_one(p: &mut ParameterSet, key: &str, value: &Value) -> Result<(), ParameterError> {
    match key {
        "background.update_fraction" => {
            p.background.update_fraction = require_range(key, as_f32(value, key)?, 0.0, 1.0)?;
        }
        "background.noise_relative" => {
            p.background.noise_relative = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "background.closeness_multiplier" => {
            p.background.closeness_multiplier = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "background.safety_margin_m" => {
            p.background.safety_margin_m = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "background.neighbor_confirmation_count" => {
            p.background.neighbor_confirmation_count = as_u32(value, key)?;
        }
        "background.freeze_duration_ms" => {
            p.background.freeze_duration_ms = as_u64(value, key)?;
        }
        "background.divergence_trigger" => {
            p.background.divergence_trigger = as_u32(value, key)?;
        }
        "background.warmup_min_frames" => {
            p.background.warmup_min_frames = as_u64(value, key)?;
        }
        "background.warmup_fraction" => {
            p.background.warmup_fraction = require_range(key, as_f32(value, key)?, 0.0, 1.0)?;
        }
        "extractor.mode" => {
            p.extractor.mode = match value.as_str() {
                Some("background") => Mode::Background,
                Some("velocity") => Mode::Velocity,
                Some("hybrid") => Mode::Hybrid,
                _ => return Err(field_err(key, "expected background|velocity|hybrid")),
            };
        }
        "extractor.hybrid_merge_mode" => {
            p.extractor.hybrid_merge_mode = match value.as_str() {
                Some("union") => MergeMode::Union,
                Some("intersection") => MergeMode::Intersection,
                Some("primary") => MergeMode::Primary,
                _ => return Err(field_err(key, "expected union|intersection|primary")),
            };
        }
        "cluster.eps_m" => {
            let v = as_f32(value, key)?;
            p.cluster.eps_m = require_nonnegative(key, v)? as f64;
        }
        "cluster.min_points" => {
            p.cluster.min_points = as_usize(value, key)?;
        }
        "tracker.gating_distance_squared" => {
            p.tracker.gating_distance_squared = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "tracker.process_noise_pos" => {
            p.tracker.process_noise_pos = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "tracker.process_noise_vel" => {
            p.tracker.process_noise_vel = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "tracker.measurement_noise" => {
            p.tracker.measurement_noise = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "tracker.max_misses" => {
            p.tracker.max_misses = as_u32(value, key)?;
        }
        "tracker.confirmation_threshold" => {
            p.tracker.confirmation_threshold = as_u64(value, key)?;
        }
        "tracker.max_tracks" => {
            p.tracker.max_tracks = as_usize(value, key)?;
        }
        "transit.min_obs" => {
            p.transit.min_obs = as_u64(value, key)?;
        }
        "transit.min_duration_ms" => {
            p.transit.min_duration_ms = as_u64(value, key)?;
        }
        "transit.min_length_m" => {
            p.transit.min_length_m = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "transit.quality_threshold" => {
            p.transit.quality_threshold = require_range(key, as_f32(value, key)?, 0.0, 1.0)?;
        }
        "transit.quality_weight_density" => {
            p.transit.quality_weight_density = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "transit.quality_weight_smoothness" => {
            p.transit.quality_weight_smoothness = require_nonnegative(key, as_f32(value, key)?)?;
        }
        "transit.quality_weight_stability" => {
            p.transit.quality_weight_stability = require_nonnegative(key, as_f32(value, key)?)?;
        }
        other => return Err(field_err(other, "unrecognized parameter")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_update_applies() {
        let mut p = ParameterSet::default();
        p.apply_update(&json!({"background.update_fraction": 0.05})).unwrap();
        assert!((p.background.update_fraction - 0.05).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_update_is_rejected_atomically() {
        let mut p = ParameterSet::default();
        let before = p.clone();
        let err = p
            .apply_update(&json!({
                "background.update_fraction": 0.05,
                "background.warmup_fraction": 5.0
            }))
            .unwrap_err();
        assert_eq!(err.field, "background.warmup_fraction");
        assert_eq!(p, before);
    }

    #[test]
    fn unrecognized_field_is_rejected() {
        let mut p = ParameterSet::default();
        let err = p.apply_update(&json!({"background.not_a_field": 1})).unwrap_err();
        assert_eq!(err.field, "background.not_a_field");
    }

    #[test]
    fn extractor_mode_enum_round_trips() {
        let mut p = ParameterSet::default();
        p.apply_update(&json!({"extractor.mode": "hybrid"})).unwrap();
        assert_eq!(p.extractor.mode, Mode::Hybrid);
    }

    #[test]
    fn negative_min_points_is_rejected_and_live_config_unchanged() {
        let mut p = ParameterSet::default();
        let before = p.clone();
        let err = p.apply_update(&json!({"cluster.min_points": -1})).unwrap_err();
        assert_eq!(err.field, "cluster.min_points");
        assert_eq!(p, before);
    }

    #[test]
    fn non_object_update_is_rejected() {
        let mut p = ParameterSet::default();
        assert!(p.apply_update(&json!([1, 2, 3])).is_err());
    }
}
