//! Callback events delivered by a device facade.
//!
//! Session callbacks and adapter-state callbacks share one [`Event`] type;
//! [`EventName`] distinguishes them. Remote facades deliver events as
//! callback JSON objects, decoded by [`Event::from_callback_json`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Name of a session or adapter-state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    Opened,
    OpenFailed,
    Started,
    StartFailed,
    Reconfigured,
    ReconfigureFailed,
    ReportReceived,
    Stopped,
    StopFailed,
    Closed,
    CloseFailed,
    /// Adapter state: UWB off (airplane mode or toggled off)
    Disabled,
    /// Adapter state: enabled, no active session
    Inactive,
    /// Adapter state: enabled with at least one ranging session
    Active,
}

impl EventName {
    pub const ALL: [Self; 14] = [
        Self::Opened,
        Self::OpenFailed,
        Self::Started,
        Self::StartFailed,
        Self::Reconfigured,
        Self::ReconfigureFailed,
        Self::ReportReceived,
        Self::Stopped,
        Self::StopFailed,
        Self::Closed,
        Self::CloseFailed,
        Self::Disabled,
        Self::Inactive,
        Self::Active,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "Opened",
            Self::OpenFailed => "OpenFailed",
            Self::Started => "Started",
            Self::StartFailed => "StartFailed",
            Self::Reconfigured => "Reconfigured",
            Self::ReconfigureFailed => "ReconfigureFailed",
            Self::ReportReceived => "ReportReceived",
            Self::Stopped => "Stopped",
            Self::StopFailed => "StopFailed",
            Self::Closed => "Closed",
            Self::CloseFailed => "CloseFailed",
            Self::Disabled => "Disabled",
            Self::Inactive => "Inactive",
            Self::Active => "Active",
        }
    }

    /// Adapter-state names, as opposed to per-session callbacks.
    #[must_use]
    pub const fn is_adapter_state(self) -> bool {
        matches!(self, Self::Disabled | Self::Inactive | Self::Active)
    }

    /// Failure callback paired with a confirming callback, if any.
    #[must_use]
    pub const fn failure(self) -> Option<Self> {
        match self {
            Self::Opened => Some(Self::OpenFailed),
            Self::Started => Some(Self::StartFailed),
            Self::Reconfigured => Some(Self::ReconfigureFailed),
            Self::Stopped => Some(Self::StopFailed),
            Self::Closed => Some(Self::CloseFailed),
            _ => None,
        }
    }

    /// Adapter state code as reported by the platform (0/1/2).
    #[must_use]
    pub const fn from_adapter_state(code: i64) -> Self {
        match code {
            1 => Self::Inactive,
            2 => Self::Active,
            _ => Self::Disabled,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| Error::InvalidParams(format!("unknown callback event: {s}")))
    }
}

/// One delivered callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: EventName,
    /// Callback key the event was delivered under.
    pub key: String,
    /// Session the event belongs to; `None` for adapter-state events.
    pub session_id: Option<u32>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    #[must_use]
    pub fn session(name: EventName, key: impl Into<String>, session_id: u32) -> Self {
        Self {
            name,
            key: key.into(),
            session_id: Some(session_id),
            timestamp: Utc::now(),
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn adapter(name: EventName, key: impl Into<String>) -> Self {
        Self {
            name,
            key: key.into(),
            session_id: None,
            timestamp: Utc::now(),
            payload: Value::Null,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Decode a callback object as posted by the on-device snippet:
    /// `{"callbackId", "name", "time", "data": {"rangingSessionEvent" | "uwbAdapterStateEvent"}}`.
    pub fn from_callback_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::InvalidParams("callback event must be an object".into()))?;
        let key = object
            .get("callbackId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidParams("callback event missing callbackId".into()))?;
        let data = object
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::InvalidParams("callback event missing data".into()))?;

        let (name, session_id) = if let Some(raw) = data.get("rangingSessionEvent") {
            let raw = raw
                .as_str()
                .ok_or_else(|| Error::InvalidParams("rangingSessionEvent must be a string".into()))?;
            let name: EventName = raw.parse()?;
            if name.is_adapter_state() {
                return Err(Error::InvalidParams(format!(
                    "{name} is not a ranging session event"
                )));
            }
            let session_id = data
                .get("sessionId")
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok());
            (name, session_id)
        } else if let Some(raw) = data.get("uwbAdapterStateEvent") {
            let name = match raw {
                Value::String(s) => s.parse()?,
                Value::Number(n) => EventName::from_adapter_state(n.as_i64().unwrap_or(0)),
                _ => {
                    return Err(Error::InvalidParams(
                        "uwbAdapterStateEvent must be a string or code".into(),
                    ));
                }
            };
            if !name.is_adapter_state() {
                return Err(Error::InvalidParams(format!(
                    "{name} is not an adapter state"
                )));
            }
            (name, None)
        } else {
            return Err(Error::InvalidParams(
                "callback data has no recognised event field".into(),
            ));
        };

        let timestamp = object
            .get("time")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Ok(Self {
            name,
            key: key.to_string(),
            session_id,
            timestamp,
            payload: Value::Object(data.clone()),
        })
    }
}
