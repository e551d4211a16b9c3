//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WebSocket server to.
    /// Override: `VIGIL_BIND_PORT`
    pub bind_port: u16,

    /// IP address to advertise to phone/browser clients via `/api/server/info`.
    /// If not specified, auto-detection is attempted.
    /// Override: `VIGIL_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// Target output cadence of the paced scheduler, in frames per second.
    /// Override: `VIGIL_TARGET_FPS`
    pub target_fps: u32,

    /// Base URL of the inference collaborator.
    /// Override: `VIGIL_INFERENCE_URL`
    pub inference_base_url: String,

    /// Per-call timeout while the inference collaborator is cold, in ms.
    pub timeout_cold_ms: u64,

    /// Per-call timeout once the inference collaborator has warmed up, in ms.
    pub timeout_warm_ms: u64,

    /// Minimum interval between health re-probes while in SAFE_MODE, in seconds.
    pub health_interval_secs: u64,

    /// Consecutive inference failures tolerated before entering SAFE_MODE.
    pub max_failures_before_safe_mode: u32,

    /// Seconds without a frame from an active camera source before the watchdog detaches it.
    pub camera_timeout_secs: f64,

    /// Poll interval of the source manager's watchdog loop, in seconds.
    pub watchdog_poll_secs: u64,

    /// Capacity of the phone upload overwrite slot.
    pub phone_slot_capacity: usize,

    /// Per-subscriber send deadline for fan-out broadcasts, in ms.
    pub subscriber_send_timeout_ms: u64,

    /// Time a freshly connected viewer has to complete its handshake, in seconds.
    pub handshake_timeout_secs: u64,

    /// Whether detaching the current source clears the worker's cached last result.
    pub clear_last_result_on_detach: bool,

    /// Directory uploaded video files are written to.
    /// Override: `VIGIL_UPLOAD_DIR`
    pub upload_dir: PathBuf,

    /// Capacity of the domain-event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = vigil_core::Config::default();
        Self {
            bind_port: core.bind_port,
            advertise_ip: core.advertise_ip,
            target_fps: core.target_fps,
            inference_base_url: core.inference_base_url,
            timeout_cold_ms: core.timeout_cold_ms,
            timeout_warm_ms: core.timeout_warm_ms,
            health_interval_secs: core.health_interval_secs,
            max_failures_before_safe_mode: core.max_failures_before_safe_mode,
            camera_timeout_secs: core.camera_timeout_secs,
            watchdog_poll_secs: core.watchdog_poll_secs,
            phone_slot_capacity: core.phone_slot_capacity,
            subscriber_send_timeout_ms: core.subscriber_send_timeout_ms,
            handshake_timeout_secs: core.handshake_timeout_secs,
            clear_last_result_on_detach: core.clear_last_result_on_detach,
            upload_dir: core.upload_dir,
            event_channel_capacity: core.event_channel_capacity,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VIGIL_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("VIGIL_ADVERTISE_IP") {
            if let Ok(ip) = val.parse() {
                self.advertise_ip = Some(ip);
            }
        }

        if let Ok(val) = std::env::var("VIGIL_TARGET_FPS") {
            if let Ok(fps) = val.parse() {
                self.target_fps = fps;
            }
        }

        if let Ok(val) = std::env::var("VIGIL_INFERENCE_URL") {
            self.inference_base_url = val;
        }

        if let Ok(val) = std::env::var("VIGIL_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(val);
        }
    }

    /// Converts to `vigil_core`'s `Config` type.
    pub fn to_core_config(&self) -> vigil_core::Config {
        vigil_core::Config {
            bind_port: self.bind_port,
            advertise_ip: self.advertise_ip,
            target_fps: self.target_fps,
            inference_base_url: self.inference_base_url.clone(),
            timeout_cold_ms: self.timeout_cold_ms,
            timeout_warm_ms: self.timeout_warm_ms,
            health_interval_secs: self.health_interval_secs,
            max_failures_before_safe_mode: self.max_failures_before_safe_mode,
            camera_timeout_secs: self.camera_timeout_secs,
            watchdog_poll_secs: self.watchdog_poll_secs,
            phone_slot_capacity: self.phone_slot_capacity,
            subscriber_send_timeout_ms: self.subscriber_send_timeout_ms,
            handshake_timeout_secs: self.handshake_timeout_secs,
            clear_last_result_on_detach: self.clear_last_result_on_detach,
            upload_dir: self.upload_dir.clone(),
            event_channel_capacity: self.event_channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_core_default() {
        let server = ServerConfig::default();
        let core = server.to_core_config();
        assert_eq!(core.bind_port, vigil_core::Config::default().bind_port);
        assert_eq!(core.target_fps, vigil_core::Config::default().target_fps);
    }

    #[test]
    fn env_override_replaces_bind_port() {
        std::env::set_var("VIGIL_BIND_PORT", "50123");
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.bind_port, 50123);
        std::env::remove_var("VIGIL_BIND_PORT");
    }
}
