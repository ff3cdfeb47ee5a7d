//! Per-region planning settings

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_DISTANCE_VALIDITY_SEC, DEFAULT_SECONDARY_FETCH_TIMEOUT_MS,
    DEFAULT_SHIFT_START_BUFFER_SEC, DEFAULT_UNREQUESTED_REST_BREAK_DURATION_SEC,
};

/// Injection of rest breaks for shift teams that never requested one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnrequestedRestBreakConfig {
    pub include: bool,
    pub duration_sec: i64,
}

impl Default for UnrequestedRestBreakConfig {
    fn default() -> Self {
        Self {
            include: false,
            duration_sec: DEFAULT_UNREQUESTED_REST_BREAK_DURATION_SEC,
        }
    }
}

/// Read-only configuration for one planning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanningSettings {
    /// Pairs per latest-distance lookup; 0 puts every wanted pair in one batch
    pub latest_distances_batch_size: usize,
    /// Fan missing pairs out to secondary providers as well
    pub fetch_other_map_service_distances: bool,
    /// Overall budget for the secondary fan-out; 0 disables it
    pub fetch_other_map_service_distances_timeout_ms: u64,
    /// Pushes the available window start forward, never past shift end
    pub shift_start_buffer_sec: i64,
    /// Distances created before `now - distance_validity_sec` are ignored
    pub distance_validity_sec: i64,
    pub visit_extra_setup_duration_sec: i64,
    /// Treat any recoverable data-quality anomaly as a run failure
    pub fail_on_recoverable_errors: bool,
    pub unrequested_rest_break: UnrequestedRestBreakConfig,
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self {
            latest_distances_batch_size: 0,
            fetch_other_map_service_distances: false,
            fetch_other_map_service_distances_timeout_ms: DEFAULT_SECONDARY_FETCH_TIMEOUT_MS,
            shift_start_buffer_sec: DEFAULT_SHIFT_START_BUFFER_SEC,
            distance_validity_sec: DEFAULT_DISTANCE_VALIDITY_SEC,
            visit_extra_setup_duration_sec: 0,
            fail_on_recoverable_errors: false,
            unrequested_rest_break: UnrequestedRestBreakConfig::default(),
        }
    }
}

impl PlanningSettings {
    /// Strict configuration for pre-release regions
    /// - Any recoverable anomaly fails the run
    pub fn strict() -> Self {
        Self {
            fail_on_recoverable_errors: true,
            ..Self::default()
        }
    }

    /// Research configuration
    /// - Also collects distances from secondary providers
    pub fn research() -> Self {
        Self {
            fetch_other_map_service_distances: true,
            ..Self::default()
        }
    }

    /// Whether the best-effort secondary fan-out should run at all
    pub fn secondary_fetch_enabled(&self) -> bool {
        self.fetch_other_map_service_distances
            && self.fetch_other_map_service_distances_timeout_ms > 0
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PlanningSettings::default();
        assert_eq!(settings.latest_distances_batch_size, 0);
        assert!(!settings.fail_on_recoverable_errors);
        assert!(!settings.secondary_fetch_enabled());
        assert!(!settings.unrequested_rest_break.include);
    }

    #[test]
    fn test_strict_preset() {
        let settings = PlanningSettings::strict();
        assert!(settings.fail_on_recoverable_errors);
        assert_eq!(settings.shift_start_buffer_sec, DEFAULT_SHIFT_START_BUFFER_SEC);
    }

    #[test]
    fn test_research_preset_enables_secondary_fetch() {
        let settings = PlanningSettings::research();
        assert!(settings.secondary_fetch_enabled());
    }

    #[test]
    fn test_secondary_fetch_needs_timeout() {
        let settings = PlanningSettings {
            fetch_other_map_service_distances: true,
            fetch_other_map_service_distances_timeout_ms: 0,
            ..Default::default()
        };
        assert!(!settings.secondary_fetch_enabled());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: PlanningSettings =
            serde_json::from_str(r#"{"shiftStartBufferSec": 60, "unrequestedRestBreak": {"include": true}}"#)
                .unwrap();
        assert_eq!(settings.shift_start_buffer_sec, 60);
        assert!(settings.unrequested_rest_break.include);
        assert_eq!(
            settings.unrequested_rest_break.duration_sec,
            DEFAULT_UNREQUESTED_REST_BREAK_DURATION_SEC
        );
        assert_eq!(settings.distance_validity_sec, DEFAULT_DISTANCE_VALIDITY_SEC);
    }

    #[test]
    fn test_load_missing_file_fails_with_context() {
        let err = PlanningSettings::load(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read settings file"));
    }
}
