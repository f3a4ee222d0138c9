//! Configuration management for fira
//!
//! Handles loading and validation of `fira.toml` configuration files.
//! Every section is optional; missing fields take the defaults below.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::params::{Profile, SubSessionKeys, UwbAddress};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Device addressing and parameter profile
    #[serde(default)]
    pub devices: DevicesConfig,

    /// Callback and peer-convergence timeouts
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Provisioned STS sub-session material
    #[serde(default)]
    pub sts: StsConfigSection,

    /// Behaviour of the in-process simulated radio field
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file path
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Device addressing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicesConfig {
    #[serde(default = "default_initiator_address")]
    pub initiator_address: UwbAddress,

    #[serde(default = "default_responder_address")]
    pub responder_address: UwbAddress,

    /// Address the responder uses in the controlee-reconfiguration scenarios
    #[serde(default = "default_new_responder_address")]
    pub new_responder_address: UwbAddress,

    #[serde(default = "default_profile")]
    pub profile: Profile,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            initiator_address: default_initiator_address(),
            responder_address: default_responder_address(),
            new_responder_address: default_new_responder_address(),
            profile: default_profile(),
        }
    }
}

fn default_initiator_address() -> UwbAddress {
    UwbAddress::from([1, 2])
}

fn default_responder_address() -> UwbAddress {
    UwbAddress::from([3, 4])
}

fn default_new_responder_address() -> UwbAddress {
    UwbAddress::from([4, 5])
}

fn default_profile() -> Profile {
    Profile::NearbyShare
}

/// Timeouts, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Wait for a device's own confirming callback
    #[serde(default = "default_callback_wait_ms")]
    pub callback_wait_ms: u64,

    /// Wait for a peer to notice the other side stopped or removed it
    #[serde(default = "default_peer_stop_ms")]
    pub peer_stop_ms: u64,

    /// Wait for a backgrounded session to be stopped by the platform
    #[serde(default = "default_background_stop_ms")]
    pub background_stop_ms: u64,

    /// Wait for a controller to stop after its peer vanished
    #[serde(default = "default_no_report_stop_ms")]
    pub no_report_stop_ms: u64,

    /// Wait for airplane mode / UWB state to read back
    #[serde(default = "default_airplane_poll_ms")]
    pub airplane_poll_ms: u64,

    /// Pause after an app lifecycle change before sampling callbacks
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            callback_wait_ms: default_callback_wait_ms(),
            peer_stop_ms: default_peer_stop_ms(),
            background_stop_ms: default_background_stop_ms(),
            no_report_stop_ms: default_no_report_stop_ms(),
            airplane_poll_ms: default_airplane_poll_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_callback_wait_ms() -> u64 {
    3_000
}

fn default_peer_stop_ms() -> u64 {
    60_000
}

fn default_background_stop_ms() -> u64 {
    240_000
}

fn default_no_report_stop_ms() -> u64 {
    120_000
}

fn default_airplane_poll_ms() -> u64 {
    3_000
}

fn default_settle_ms() -> u64 {
    750
}

impl TimeoutsConfig {
    #[must_use]
    pub fn callback_wait(&self) -> Duration {
        Duration::from_millis(self.callback_wait_ms)
    }

    #[must_use]
    pub fn peer_stop(&self) -> Duration {
        Duration::from_millis(self.peer_stop_ms)
    }

    #[must_use]
    pub fn background_stop(&self) -> Duration {
        Duration::from_millis(self.background_stop_ms)
    }

    #[must_use]
    pub fn no_report_stop(&self) -> Duration {
        Duration::from_millis(self.no_report_stop_ms)
    }

    #[must_use]
    pub fn airplane_poll(&self) -> Duration {
        Duration::from_millis(self.airplane_poll_ms)
    }

    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Sub-session material used when the responder joins with an individual key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StsConfigSection {
    #[serde(default = "default_sub_session_id")]
    pub sub_session_id: u32,

    #[serde(default = "default_sub_session_key")]
    pub sub_session_key: Vec<u8>,
}

impl Default for StsConfigSection {
    fn default() -> Self {
        Self {
            sub_session_id: default_sub_session_id(),
            sub_session_key: default_sub_session_key(),
        }
    }
}

fn default_sub_session_id() -> u32 {
    11
}

fn default_sub_session_key() -> Vec<u8> {
    vec![8, 7, 6, 5, 4, 3, 2, 1, 1, 2, 3, 4, 5, 6, 7, 8]
}

impl StsConfigSection {
    /// Sub-session lists for the controller's add-controlee request.
    #[must_use]
    pub fn keys(&self) -> SubSessionKeys {
        SubSessionKeys {
            ids: vec![self.sub_session_id],
            key: self.sub_session_key.clone(),
        }
    }
}

/// Simulated radio field behaviour, in milliseconds unless noted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Reported `fira.max_ranging_session_number` per device
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,

    /// Delay before a controlee notices its controller went away
    #[serde(default = "default_peer_teardown_ms")]
    pub peer_teardown_ms: u64,

    /// Time a backgrounded session keeps running before it is stopped
    #[serde(default = "default_sim_background_stop_ms")]
    pub background_stop_ms: u64,

    /// Time a controller ranges without finding any peer before it stops
    #[serde(default = "default_sim_no_report_stop_ms")]
    pub no_report_stop_ms: u64,

    #[serde(default = "default_reboot_ms")]
    pub reboot_ms: u64,

    /// Extra delay before the first report after a start
    #[serde(default)]
    pub first_report_delay_ms: u64,

    /// Reported distance, centimetres
    #[serde(default = "default_distance_cm")]
    pub distance_cm: f64,

    /// Mean reported RSSI, dBm
    #[serde(default = "default_rssi_dbm")]
    pub rssi_dbm: f64,

    /// Uniform RSSI jitter, dB
    #[serde(default = "default_rssi_jitter_db")]
    pub rssi_jitter_db: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            peer_teardown_ms: default_peer_teardown_ms(),
            background_stop_ms: default_sim_background_stop_ms(),
            no_report_stop_ms: default_sim_no_report_stop_ms(),
            reboot_ms: default_reboot_ms(),
            first_report_delay_ms: 0,
            distance_cm: default_distance_cm(),
            rssi_dbm: default_rssi_dbm(),
            rssi_jitter_db: default_rssi_jitter_db(),
        }
    }
}

fn default_max_sessions() -> u32 {
    5
}

fn default_peer_teardown_ms() -> u64 {
    5_000
}

fn default_sim_background_stop_ms() -> u64 {
    120_000
}

fn default_sim_no_report_stop_ms() -> u64 {
    30_000
}

fn default_reboot_ms() -> u64 {
    20_000
}

fn default_distance_cm() -> f64 {
    100.0
}

fn default_rssi_dbm() -> f64 {
    -60.0
}

fn default_rssi_jitter_db() -> f64 {
    1.5
}

impl HarnessConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(display, e.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let devices = &self.devices;
        for (name, addr) in [
            ("initiator_address", &devices.initiator_address),
            ("responder_address", &devices.responder_address),
            ("new_responder_address", &devices.new_responder_address),
        ] {
            if addr.len() != 2 {
                return Err(ConfigError::ValidationError(format!(
                    "devices.{name} must be a 2-byte short address, got {addr}"
                )));
            }
        }
        if devices.initiator_address == devices.responder_address
            || devices.initiator_address == devices.new_responder_address
            || devices.responder_address == devices.new_responder_address
        {
            return Err(ConfigError::ValidationError(
                "device addresses must be distinct".to_string(),
            ));
        }

        let t = &self.timeouts;
        if [
            t.callback_wait_ms,
            t.peer_stop_ms,
            t.background_stop_ms,
            t.no_report_stop_ms,
            t.airplane_poll_ms,
        ]
        .contains(&0)
        {
            return Err(ConfigError::ValidationError(
                "timeouts must be non-zero".to_string(),
            ));
        }

        if !matches!(self.sts.sub_session_key.len(), 16 | 32) {
            return Err(ConfigError::ValidationError(format!(
                "sts.sub_session_key must be 16 or 32 bytes, got {}",
                self.sts.sub_session_key.len()
            )));
        }

        if self.simulation.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "simulation.max_sessions must be at least 1".to_string(),
            ));
        }
        if self.simulation.rssi_jitter_db < 0.0 {
            return Err(ConfigError::ValidationError(
                "simulation.rssi_jitter_db must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.timeouts.callback_wait(), Duration::from_secs(3));
        assert_eq!(config.timeouts.peer_stop(), Duration::from_secs(60));
        assert_eq!(config.devices.initiator_address, UwbAddress::from([1, 2]));
        assert_eq!(config.sts.sub_session_id, 11);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = HarnessConfig::from_toml_str(
            r#"
            [timeouts]
            callback_wait_ms = 5000

            [simulation]
            max_sessions = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.callback_wait_ms, 5000);
        assert_eq!(config.timeouts.peer_stop_ms, 60_000);
        assert_eq!(config.simulation.max_sessions, 2);
        assert_eq!(config.devices.profile, Profile::NearbyShare);
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let mut config = HarnessConfig::default();
        config.general.log_format = LogFormat::Json;
        config.devices.profile = Profile::DeviceTracker;
        let text = config.to_toml_string().unwrap();
        let parsed = HarnessConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad_addr = "[devices]\ninitiator_address = [1, 2, 3]\n";
        assert!(matches!(
            HarnessConfig::from_toml_str(bad_addr),
            Err(ConfigError::ValidationError(_))
        ));

        let same_addr = "[devices]\nresponder_address = [1, 2]\n";
        assert!(HarnessConfig::from_toml_str(same_addr).is_err());

        let zero_timeout = "[timeouts]\npeer_stop_ms = 0\n";
        assert!(HarnessConfig::from_toml_str(zero_timeout).is_err());

        let short_key = "[sts]\nsub_session_key = [1, 2, 3]\n";
        assert!(HarnessConfig::from_toml_str(short_key).is_err());
    }

    #[test]
    fn parse_error_is_reported() {
        assert!(matches!(
            HarnessConfig::from_toml_str("[timeouts\n"),
            Err(ConfigError::ParseFailed(_))
        ));
    }

    #[test]
    fn load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fira.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[general]\nlog_level = \"debug\"\nlog_format = \"json\"").unwrap();
        drop(file);

        let config = HarnessConfig::load_from(&path).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, LogFormat::Json);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            HarnessConfig::load_from(&missing),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn sts_keys_carry_single_sub_session() {
        let keys = StsConfigSection::default().keys();
        assert_eq!(keys.ids, vec![11]);
        assert_eq!(keys.key.len(), 16);
    }
}
