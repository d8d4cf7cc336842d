use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_ALERT_THRESHOLD: u32 = 5;
pub const DEFAULT_MIN_PERSIST_MINUTES: u32 = 1;
pub const DEFAULT_CYCLE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CHECKPOINT_EVERY_TICKS: u32 = 5;

const DEBUG_ENV_VAR: &str = "OBSERK_DEBUG";

/// Tunables for one monitoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Wall-clock spacing between sampling ticks.
    pub sample_interval_ms: u64,
    /// Consecutive non-engaged or failed cycles that raise an alert.
    pub alert_threshold: u32,
    /// Sessions whose elapsed time is below this are never persisted.
    pub min_persist_minutes: u32,
    /// Upper bound for one capture + classify cycle.
    pub cycle_timeout_ms: u64,
    /// Folded outcomes between two crash-recovery checkpoints.
    pub checkpoint_every_ticks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            min_persist_minutes: DEFAULT_MIN_PERSIST_MINUTES,
            cycle_timeout_ms: DEFAULT_CYCLE_TIMEOUT_MS,
            checkpoint_every_ticks: DEFAULT_CHECKPOINT_EVERY_TICKS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "sampleIntervalMs must be greater than zero".into(),
            ));
        }
        if self.alert_threshold == 0 {
            return Err(EngineError::InvalidConfig(
                "alertThreshold must be at least 1".into(),
            ));
        }
        if self.cycle_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "cycleTimeoutMs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    /// Applies environment overrides on top of the stored values.
    ///
    /// `OBSERK_DEBUG=1` checkpoints on every tick.
    pub fn with_env_overrides(self) -> Self {
        self.with_debug_flag(std::env::var(DEBUG_ENV_VAR).ok().as_deref())
    }

    fn with_debug_flag(mut self, flag: Option<&str>) -> Self {
        let debug_mode = flag
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.checkpoint_every_ticks = 1;
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserSettings {
    engine: EngineConfig,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unreadable settings at {} ({err}); using defaults",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn engine(&self) -> EngineConfig {
        self.read().engine.clone()
    }

    pub fn update_engine(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.write();
        guard.engine = config;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_interval_ms, 60_000);
        assert_eq!(config.alert_threshold, 5);
        assert_eq!(config.min_persist_minutes, 1);
        assert_eq!(config.cycle_timeout_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"sampleIntervalMs": 1000, "alertThreshold": 3}"#).unwrap();
        assert_eq!(config.sample_interval_ms, 1000);
        assert_eq!(config.alert_threshold, 3);
        assert_eq!(config.cycle_timeout_ms, DEFAULT_CYCLE_TIMEOUT_MS);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let config = EngineConfig {
            alert_threshold: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn debug_flag_checkpoints_every_tick() {
        for flag in ["1", "true", "TRUE"] {
            let config = EngineConfig::default().with_debug_flag(Some(flag));
            assert_eq!(config.checkpoint_every_ticks, 1, "flag {flag:?}");
        }
        for flag in [None, Some("0"), Some("yes"), Some("")] {
            let config = EngineConfig::default().with_debug_flag(flag);
            assert_eq!(
                config.checkpoint_every_ticks, DEFAULT_CHECKPOINT_EVERY_TICKS,
                "flag {flag:?}"
            );
        }
    }

    #[test]
    fn debug_env_var_is_read() {
        // Only this test touches OBSERK_DEBUG.
        std::env::set_var(DEBUG_ENV_VAR, "true");
        let config = EngineConfig::default().with_env_overrides();
        std::env::remove_var(DEBUG_ENV_VAR);

        assert_eq!(config.checkpoint_every_ticks, 1);
        assert_eq!(config.sample_interval_ms, DEFAULT_SAMPLE_INTERVAL_MS);
    }

    #[test]
    fn settings_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        let updated = EngineConfig {
            sample_interval_ms: 30_000,
            ..EngineConfig::default()
        };
        store.update_engine(updated.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.engine(), updated);
    }

    #[test]
    fn garbage_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.engine(), EngineConfig::default());
    }
}
