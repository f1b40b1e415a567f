//! Tracker configuration
//!
//! All settings have defaults, so an empty JSON object is a valid config.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Name reported with every canonical event
    pub tracker_name: String,
    /// Playhead (ms) a time-update must exceed before START is reported
    pub start_threshold_ms: f64,
    /// Poll-based schedule provider settings
    pub schedule: ScheduleConfig,
    /// Stream-manifest provider settings
    pub stream: StreamConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracker_name: "kino-tracker".to_string(),
            start_threshold_ms: 0.1,
            schedule: ScheduleConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Reject settings the tracker cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.tracker_name.trim().is_empty() {
            return Err(Error::InvalidConfig("tracker_name must not be empty".into()));
        }
        if !self.start_threshold_ms.is_finite() || self.start_threshold_ms < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "start_threshold_ms must be a non-negative number, got {}",
                self.start_threshold_ms
            )));
        }
        if self.schedule.url_pattern.is_empty() {
            return Err(Error::InvalidConfig("schedule.url_pattern must not be empty".into()));
        }
        if self.schedule.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig("schedule.request_timeout_ms must be positive".into()));
        }
        if self.stream.pre_roll_window_secs < 0.0 || self.stream.post_roll_window_secs < 0.0 {
            return Err(Error::InvalidConfig("stream position windows must be non-negative".into()));
        }
        Ok(())
    }
}

/// Settings for server-side stitched ad sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Substring of the source URL that identifies a stitched session
    pub url_pattern: String,
    /// Path segment of the playback URL
    pub master_path: String,
    /// Path segment that replaces `master_path` to open a session
    pub session_path: String,
    /// Reporting mode requested from the session endpoint
    pub reporting_mode: String,
    /// Delay between session bootstrap and the tracking fetch
    pub settle_delay_ms: u64,
    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            url_pattern: ".mediatailor.".to_string(),
            master_path: "/v1/master/".to_string(),
            session_path: "/v1/session/".to_string(),
            reporting_mode: "client".to_string(),
            settle_delay_ms: 2000,
            request_timeout_ms: 10000,
        }
    }
}

impl ScheduleConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Settings for stream-manifest ad insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Playhead window (s) from the start that counts as pre-roll
    pub pre_roll_window_secs: f64,
    /// Playhead window (s) before the end that counts as post-roll
    pub post_roll_window_secs: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pre_roll_window_secs: 5.0,
            post_roll_window_secs: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.start_threshold_ms, 0.1);
        assert_eq!(config.schedule.settle_delay(), Duration::from_secs(2));
        assert_eq!(config.schedule.url_pattern, ".mediatailor.");
        assert_eq!(config.stream.post_roll_window_secs, 10.0);
    }

    #[test]
    fn test_partial_json() {
        let config = TrackerConfig::from_json(r#"{"schedule": {"settle_delay_ms": 0}}"#).unwrap();
        assert_eq!(config.schedule.settle_delay_ms, 0);
        assert_eq!(config.schedule.session_path, "/v1/session/");
        assert_eq!(config.tracker_name, "kino-tracker");
    }

    #[test]
    fn test_invalid_threshold() {
        let err = TrackerConfig::from_json(r#"{"start_threshold_ms": -1.0}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
