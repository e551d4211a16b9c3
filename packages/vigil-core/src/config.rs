//! Core application configuration.
//!
//! [`Config`] holds every tunable the orchestration core needs at runtime. It is
//! deliberately flat — a single struct loaded once at startup and handed to the
//! composition root ([`crate::bootstrap`]) — mirroring how the host binary's own
//! `ServerConfig` is loaded and then lowered into this crate's config type.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Core configuration for the video inference orchestration server.
///
/// Values are loaded by the hosting binary (YAML file, then environment variables, then CLI
/// flags, highest precedence last) and handed to [`crate::bootstrap::bootstrap`] as a single
/// immutable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub bind_port: u16,

    /// IP address advertised to phone/browser clients via `GET /api/server/info`.
    ///
    /// When `None`, the network context auto-detects the LAN-facing address.
    pub advertise_ip: Option<IpAddr>,

    /// Target output cadence of the paced scheduler, in frames per second.
    pub target_fps: u32,

    /// Base URL of the inference collaborator (e.g. `http://127.0.0.1:8500`).
    pub inference_base_url: String,

    /// Per-call timeout while the inference collaborator is cold (not yet warmed up), in ms.
    pub timeout_cold_ms: u64,

    /// Per-call timeout once the inference collaborator has completed at least one call, in ms.
    pub timeout_warm_ms: u64,

    /// Minimum interval between health re-probes while in SAFE_MODE, in seconds.
    pub health_interval_secs: u64,

    /// Consecutive inference failures tolerated before entering SAFE_MODE.
    pub max_failures_before_safe_mode: u32,

    /// Seconds without a frame from an active camera source before the watchdog detaches it.
    pub camera_timeout_secs: f64,

    /// Poll interval of the source manager's watchdog loop, in seconds.
    pub watchdog_poll_secs: u64,

    /// Capacity of the phone upload overwrite slot (frames held while awaiting pickup).
    pub phone_slot_capacity: usize,

    /// Per-subscriber send deadline for fan-out broadcasts, in ms.
    pub subscriber_send_timeout_ms: u64,

    /// Time a freshly connected viewer has to complete its handshake, in seconds.
    pub handshake_timeout_secs: u64,

    /// Whether detaching the current source clears the worker's cached last result.
    pub clear_last_result_on_detach: bool,

    /// Directory uploaded video files are written to.
    pub upload_dir: PathBuf,

    /// Capacity of the domain-event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 49400,
            advertise_ip: None,
            target_fps: 12,
            inference_base_url: String::new(),
            timeout_cold_ms: 10_000,
            timeout_warm_ms: 500,
            health_interval_secs: 5,
            max_failures_before_safe_mode: 2,
            camera_timeout_secs: 15.0,
            watchdog_poll_secs: 2,
            phone_slot_capacity: 1,
            subscriber_send_timeout_ms: 100,
            handshake_timeout_secs: 5,
            clear_last_result_on_detach: true,
            upload_dir: PathBuf::from("data/uploads"),
            event_channel_capacity: 100,
        }
    }
}

/// Error returned by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("target_fps must be nonzero")]
    ZeroTargetFps,
    #[error("timeout_warm_ms ({warm}) must be less than timeout_cold_ms ({cold})")]
    WarmTimeoutNotBelowCold { warm: u64, cold: u64 },
    #[error("inference_base_url must not be empty")]
    EmptyInferenceBaseUrl,
}

impl Config {
    /// Validates invariants that `Default`/deserialization alone can't enforce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_fps == 0 {
            return Err(ConfigError::ZeroTargetFps);
        }
        if self.timeout_warm_ms >= self.timeout_cold_ms {
            return Err(ConfigError::WarmTimeoutNotBelowCold {
                warm: self.timeout_warm_ms,
                cold: self.timeout_cold_ms,
            });
        }
        if self.inference_base_url.is_empty() {
            return Err(ConfigError::EmptyInferenceBaseUrl);
        }
        Ok(())
    }

    /// `camera_timeout_secs` as a [`std::time::Duration`].
    #[must_use]
    pub fn camera_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.camera_timeout_secs)
    }

    /// `watchdog_poll_secs` as a [`std::time::Duration`].
    #[must_use]
    pub fn watchdog_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.watchdog_poll_secs)
    }

    /// `timeout_cold_ms` as a [`std::time::Duration`].
    #[must_use]
    pub fn timeout_cold(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_cold_ms)
    }

    /// `timeout_warm_ms` as a [`std::time::Duration`].
    #[must_use]
    pub fn timeout_warm(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_warm_ms)
    }

    /// `health_interval_secs` as a [`std::time::Duration`].
    #[must_use]
    pub fn health_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.health_interval_secs)
    }

    /// `subscriber_send_timeout_ms` as a [`std::time::Duration`].
    #[must_use]
    pub fn subscriber_send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.subscriber_send_timeout_ms)
    }

    /// `handshake_timeout_secs` as a [`std::time::Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let mut cfg = Config::default();
        cfg.inference_base_url = "http://127.0.0.1:8500".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_fps() {
        let mut cfg = Config::default();
        cfg.inference_base_url = "http://x".to_string();
        cfg.target_fps = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTargetFps));
    }

    #[test]
    fn rejects_warm_timeout_not_below_cold() {
        let mut cfg = Config::default();
        cfg.inference_base_url = "http://x".to_string();
        cfg.timeout_warm_ms = cfg.timeout_cold_ms;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::WarmTimeoutNotBelowCold { .. })
        ));
    }

    #[test]
    fn rejects_empty_inference_base_url() {
        let cfg = Config::default();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyInferenceBaseUrl));
    }
}
