use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DriftError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/driftwatch/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("driftwatch/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.general.db_path)
    }

    /// Reject threshold and scheduling values the engine cannot run with.
    pub fn validate(&self) -> std::result::Result<(), DriftError> {
        let t = &self.thresholds;
        let invalid = |msg: String| Err(DriftError::InvalidConfiguration(msg));

        for (name, value) in [
            ("psi_moderate", t.psi_moderate),
            ("psi_drifted", t.psi_drifted),
            ("psi_epsilon", t.psi_epsilon),
            ("min_positive_rate_delta", t.min_positive_rate_delta),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{} must be a finite non-negative number, got {}", name, value));
            }
        }

        if t.psi_moderate >= t.psi_drifted {
            return invalid(format!(
                "psi_moderate ({}) must be below psi_drifted ({})",
                t.psi_moderate, t.psi_drifted
            ));
        }
        if t.psi_epsilon <= 0.0 || t.psi_epsilon >= 1.0 {
            return invalid(format!("psi_epsilon must be in (0, 1), got {}", t.psi_epsilon));
        }
        if !(t.ks_p_value > 0.0 && t.ks_p_value < 1.0) {
            return invalid(format!("ks_p_value must be in (0, 1), got {}", t.ks_p_value));
        }
        if !(t.performance_margin >= 0.0 && t.performance_margin < 1.0) {
            return invalid(format!(
                "performance_margin must be in [0, 1), got {}",
                t.performance_margin
            ));
        }
        if t.min_samples < 2 {
            return invalid(format!("min_samples must be at least 2, got {}", t.min_samples));
        }
        if t.min_matched_labels == 0 {
            return invalid("min_matched_labels must be positive".to_string());
        }
        for metric in &t.tracked_metrics {
            if !TRACKED_METRIC_NAMES.contains(&metric.as_str()) {
                return invalid(format!("unknown tracked metric: {}", metric));
            }
        }

        if self.monitor.interval_secs == 0 {
            return invalid("monitor.interval_secs must be positive".to_string());
        }
        if self.monitor.window_secs == 0 {
            return invalid("monitor.window_secs must be positive".to_string());
        }
        for (name, value) in [
            ("monitor.interval_secs", self.monitor.interval_secs),
            ("monitor.initial_delay_secs", self.monitor.initial_delay_secs),
        ] {
            if value > MAX_SCHEDULE_SECS {
                return invalid(format!("{} must be at most {}, got {}", name, MAX_SCHEDULE_SECS, value));
            }
        }
        if self.retention.days == 0 {
            return invalid("retention.days must be positive".to_string());
        }
        if self.retention.days > MAX_RETENTION_DAYS {
            return invalid(format!(
                "retention.days must be at most {}, got {}",
                MAX_RETENTION_DAYS, self.retention.days
            ));
        }
        if self.retention.horizon() <= self.monitor.window() {
            return invalid(format!(
                "retention horizon ({} days) must be longer than the monitoring window ({}s)",
                self.retention.days, self.monitor.window_secs
            ));
        }

        Ok(())
    }
}

/// Longest accepted retention horizon; the window must also fit inside it
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Longest accepted tick interval or initial delay
pub const MAX_SCHEDULE_SECS: u64 = 366 * 24 * 60 * 60;

/// Metric names accepted in `thresholds.tracked_metrics`
pub const TRACKED_METRIC_NAMES: [&str; 5] = ["accuracy", "precision", "recall", "f1_score", "auc_roc"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path to SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Size of the trailing window `[now - window, now)` in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Monitor this model version instead of the registry's active one
    #[serde(default)]
    pub model_version: Option<String>,

    /// Restrict scoring to these features (default: every baselined feature)
    #[serde(default)]
    pub tracked_features: Option<Vec<String>>,

    /// Delay before the first cycle
    #[serde(default)]
    pub initial_delay_secs: u64,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Start of the window ending at `end`
    pub fn window_start(&self, end: DateTime<Utc>) -> std::result::Result<DateTime<Utc>, DriftError> {
        i64::try_from(self.window_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|window| end.checked_sub_signed(window))
            .ok_or_else(|| {
                DriftError::InvalidConfiguration(format!("monitor.window_secs out of range: {}", self.window_secs))
            })
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            window_secs: default_window_secs(),
            model_version: None,
            tracked_features: None,
            initial_delay_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// PSI at or above this is moderate drift
    #[serde(default = "default_psi_moderate")]
    pub psi_moderate: f64,

    /// PSI at or above this is drifted
    #[serde(default = "default_psi_drifted")]
    pub psi_drifted: f64,

    /// Floor applied to empty bin proportions
    #[serde(default = "default_psi_epsilon")]
    pub psi_epsilon: f64,

    /// Minimum samples on both sides before a distribution is scored
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// KS p-value below which distributional equality is rejected
    #[serde(default = "default_ks_p_value")]
    pub ks_p_value: f64,

    /// Minimum absolute positive-rate shift for concept drift
    #[serde(default = "default_min_positive_rate_delta")]
    pub min_positive_rate_delta: f64,

    /// Relative drop below the training metric that counts as degraded
    #[serde(default = "default_performance_margin")]
    pub performance_margin: f64,

    /// Minimum matched (prediction, label) pairs for performance metrics
    #[serde(default = "default_min_matched_labels")]
    pub min_matched_labels: usize,

    /// Metrics compared against training-time values
    #[serde(default = "default_tracked_metrics")]
    pub tracked_metrics: Vec<String>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            psi_moderate: default_psi_moderate(),
            psi_drifted: default_psi_drifted(),
            psi_epsilon: default_psi_epsilon(),
            min_samples: default_min_samples(),
            ks_p_value: default_ks_p_value(),
            min_positive_rate_delta: default_min_positive_rate_delta(),
            performance_margin: default_performance_margin(),
            min_matched_labels: default_min_matched_labels(),
            tracked_metrics: default_tracked_metrics(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Prune records at the end of each cycle
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retention horizon in days
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

impl RetentionConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.days as u64 * 24 * 60 * 60)
    }

    /// Records older than this are pruned at `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> std::result::Result<DateTime<Utc>, DriftError> {
        TimeDelta::try_days(i64::from(self.days))
            .and_then(|horizon| now.checked_sub_signed(horizon))
            .ok_or_else(|| DriftError::InvalidConfiguration(format!("retention.days out of range: {}", self.days)))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the HTTP API and report stream
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Reports buffered per subscriber before it starts skipping
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Idle seconds before a WebSocket heartbeat
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            channel_capacity: default_channel_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

// Default value functions
fn default_db_path() -> String {
    "/var/lib/driftwatch/driftwatch.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_window_secs() -> u64 {
    3600 // 1 hour
}

fn default_psi_moderate() -> f64 {
    0.1
}

fn default_psi_drifted() -> f64 {
    0.25
}

fn default_psi_epsilon() -> f64 {
    1e-4
}

fn default_min_samples() -> usize {
    30
}

fn default_ks_p_value() -> f64 {
    0.05
}

fn default_min_positive_rate_delta() -> f64 {
    0.03
}

fn default_performance_margin() -> f64 {
    0.05
}

fn default_min_matched_labels() -> usize {
    30
}

fn default_tracked_metrics() -> Vec<String> {
    TRACKED_METRIC_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_retention_days() -> u32 {
    7
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_channel_capacity() -> usize {
    64
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.thresholds.psi_drifted, 0.25);
        assert_eq!(config.retention.days, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.thresholds.min_samples, config.thresholds.min_samples);
        assert_eq!(parsed.api.bind, config.api.bind);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [monitor]
            window_secs = 600
            tracked_features = ["amount"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.monitor.window_secs, 600);
        assert_eq!(parsed.monitor.interval_secs, 30);
        assert_eq!(parsed.thresholds.ks_p_value, 0.05);
    }

    #[test]
    fn test_rejects_inverted_psi_ladder() {
        let mut config = Config::default();
        config.thresholds.psi_moderate = 0.3;
        assert!(matches!(
            config.validate(),
            Err(DriftError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_bad_p_value_and_margin() {
        let mut config = Config::default();
        config.thresholds.ks_p_value = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.performance_margin = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retention_must_outlive_window() {
        let mut config = Config::default();
        config.retention.days = 1;
        config.monitor.window_secs = 2 * 24 * 3600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_horizons() {
        let mut config = Config::default();
        config.retention.days = 200_000_000;
        assert!(matches!(
            config.validate(),
            Err(DriftError::InvalidConfiguration(_))
        ));

        let mut config = Config::default();
        config.monitor.window_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitor.initial_delay_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retention.days = MAX_RETENTION_DAYS;
        config.monitor.window_secs = 30 * 24 * 3600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_offsets_are_errors() {
        let now = Utc::now();
        let monitor = MonitorConfig {
            window_secs: u64::MAX,
            ..Default::default()
        };
        assert!(matches!(
            monitor.window_start(now),
            Err(DriftError::InvalidConfiguration(_))
        ));
        let retention = RetentionConfig {
            enabled: true,
            days: u32::MAX,
        };
        assert!(retention.cutoff(now).is_err());

        let retention = RetentionConfig::default();
        assert_eq!(
            retention.cutoff(now).unwrap(),
            now - TimeDelta::days(i64::from(retention.days))
        );
        assert_eq!(
            MonitorConfig::default().window_start(now).unwrap(),
            now - TimeDelta::seconds(3600)
        );
    }

    #[test]
    fn test_rejects_unknown_metric() {
        let mut config = Config::default();
        config.thresholds.tracked_metrics.push("logloss".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.monitor.model_version = Some("xgb_v1.0.0".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.monitor.model_version.as_deref(), Some("xgb_v1.0.0"));
    }
}
