//! Remote device control surface.
//!
//! [`DeviceFacade`] abstracts one device's UWB service: session verbs,
//! measurement queries, airplane-mode/UWB toggles, adapter-state callbacks
//! and app lifecycle. Session verbs only *request* a transition; the
//! confirmation arrives later as an event on the stream returned by
//! [`DeviceFacade::open_session`].
//!
//! Futures are `Send` so a disruption (e.g. [`DeviceFacade::reboot`]) can be
//! run on a spawned task while the other device is being observed.
//! Implementations must not hold a blocking lock across an `.await`.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event_stream::EventStream;
use crate::params::UwbAddress;

/// A call the remote service refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{method} failed: {message}")]
pub struct ApiError {
    pub method: String,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            message: message.into(),
        }
    }
}

pub type FacadeResult<T> = std::result::Result<T, ApiError>;

/// Callback key identifying one session on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    #[must_use]
    pub fn for_session(session_id: u32) -> Self {
        Self(format!("fira_session_{session_id}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementKind {
    /// Centimetres
    Distance,
    /// Degrees
    AoaAzimuth,
    /// Degrees
    AoaAltitude,
    /// dBm
    Rssi,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Distance => "distance",
            Self::AoaAzimuth => "AoA azimuth",
            Self::AoaAltitude => "AoA altitude",
            Self::Rssi => "RSSI",
        };
        f.write_str(name)
    }
}

/// FiRA section of the capability descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiraSpecification {
    pub max_ranging_session_number: u32,
}

/// Capability descriptor reported by the UWB service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecificationInfo {
    pub fira: FiraSpecification,
}

/// Control surface of one remote device.
pub trait DeviceFacade: Send + Sync + 'static {
    /// Request a new session; `params` is the camelCase wire payload.
    /// The returned stream receives every callback for `key`.
    fn open_session(
        &self,
        key: &SessionKey,
        params: &Value,
    ) -> impl Future<Output = FacadeResult<EventStream>> + Send;

    fn start_session(&self, key: &SessionKey) -> impl Future<Output = FacadeResult<()>> + Send;

    /// Apply a reconfigure payload (address list update or block stride).
    fn reconfigure_session(
        &self,
        key: &SessionKey,
        command: &Value,
    ) -> impl Future<Output = FacadeResult<()>> + Send;

    fn add_controlee(
        &self,
        key: &SessionKey,
        update: &Value,
    ) -> impl Future<Output = FacadeResult<()>> + Send;

    fn remove_controlee(
        &self,
        key: &SessionKey,
        update: &Value,
    ) -> impl Future<Output = FacadeResult<()>> + Send;

    fn stop_session(&self, key: &SessionKey) -> impl Future<Output = FacadeResult<()>> + Send;

    fn close_session(&self, key: &SessionKey) -> impl Future<Output = FacadeResult<()>> + Send;

    /// Whether `peer` appears in the session's most recent ranging report.
    fn is_peer_found(
        &self,
        key: &SessionKey,
        peer: &UwbAddress,
    ) -> impl Future<Output = FacadeResult<bool>> + Send;

    /// Latest value of `kind` for `peer`; `None` when the device has none.
    fn measurement(
        &self,
        key: &SessionKey,
        kind: MeasurementKind,
        peer: &UwbAddress,
    ) -> impl Future<Output = FacadeResult<Option<f64>>> + Send;

    fn set_airplane_mode(&self, enabled: bool) -> impl Future<Output = FacadeResult<()>> + Send;

    fn airplane_mode(&self) -> impl Future<Output = FacadeResult<bool>> + Send;

    fn set_uwb_enabled(&self, enabled: bool) -> impl Future<Output = FacadeResult<()>> + Send;

    fn uwb_enabled(&self) -> impl Future<Output = FacadeResult<bool>> + Send;

    /// Register for adapter-state changes. The current state is delivered
    /// immediately after registration.
    fn register_adapter_state_callback(
        &self,
        key: &str,
    ) -> impl Future<Output = FacadeResult<EventStream>> + Send;

    fn unregister_adapter_state_callback(
        &self,
        key: &str,
    ) -> impl Future<Output = FacadeResult<()>> + Send;

    fn specification_info(&self) -> impl Future<Output = FacadeResult<SpecificationInfo>> + Send;

    /// Move the harness app to the foreground (`true`) or background.
    fn set_app_foreground(&self, foreground: bool)
    -> impl Future<Output = FacadeResult<()>> + Send;

    /// Reboot the device and resolve once it is reachable again. All of
    /// the device's sessions are gone afterwards.
    fn reboot(&self) -> impl Future<Output = FacadeResult<()>> + Send;
}
