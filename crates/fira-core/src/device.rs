//! Per-device session registry.
//!
//! A [`UwbDevice`] owns its facade handle, its side label and every open
//! [`RangingSession`] keyed by session id. Scenarios address sessions by id
//! through the device, so a session that was torn down remotely (airplane
//! mode, reboot) can be forgotten in one place.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{Event, EventName};
use crate::facade::{ApiError, DeviceFacade, MeasurementKind};
use crate::params::{RangingParams, ReconfigureCommand, SubSessionKeys, UwbAddress};
use crate::session::{OpenExpectation, OpenOutcome, RangingSession, SessionState};
use crate::verifier::{self, PeerDiscovery};

/// Which half of the ranging pair a device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Initiator,
    Responder,
}

impl Side {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

/// Result of [`UwbDevice::open`] that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    /// Session registered under this id.
    Session(u32),
    /// The device refused, as the caller expected.
    Rejected(ApiError),
}

pub struct UwbDevice<F: DeviceFacade> {
    side: Side,
    facade: Arc<F>,
    sessions: BTreeMap<u32, RangingSession<F>>,
    max_sessions: Option<u32>,
    callback_timeout: Duration,
}

impl<F: DeviceFacade> fmt::Debug for UwbDevice<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UwbDevice")
            .field("side", &self.side)
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("max_sessions", &self.max_sessions)
            .finish_non_exhaustive()
    }
}

impl<F: DeviceFacade> UwbDevice<F> {
    #[must_use]
    pub fn new(side: Side, facade: Arc<F>, callback_timeout: Duration) -> Self {
        Self {
            side,
            facade,
            sessions: BTreeMap::new(),
            max_sessions: None,
            callback_timeout,
        }
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub fn facade(&self) -> &Arc<F> {
        &self.facade
    }

    #[must_use]
    pub fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<u32> {
        self.sessions.keys().copied().collect()
    }

    #[must_use]
    pub fn session(&self, session_id: u32) -> Option<&RangingSession<F>> {
        self.sessions.get(&session_id)
    }

    pub fn session_mut(&mut self, session_id: u32) -> Result<&mut RangingSession<F>> {
        let side = self.side;
        self.sessions
            .get_mut(&session_id)
            .ok_or(Error::UnknownSession { side, session_id })
    }

    /// `fira.max_ranging_session_number` from the capability descriptor,
    /// queried once.
    pub async fn max_sessions(&mut self) -> Result<u32> {
        if let Some(max) = self.max_sessions {
            return Ok(max);
        }
        let info = self
            .facade
            .specification_info()
            .await
            .map_err(|source| Error::Api {
                side: self.side,
                source,
            })?;
        let max = info.fira.max_ranging_session_number;
        tracing::debug!(side = %self.side, max_sessions = max, "capability descriptor read");
        self.max_sessions = Some(max);
        Ok(max)
    }

    /// Open a session. A rejected open never creates a registry entry.
    pub async fn open(
        &mut self,
        params: RangingParams,
        expectation: OpenExpectation,
    ) -> Result<Opened> {
        let session_id = params.session_id();
        if let Some(existing) = self.sessions.get(&session_id) {
            if existing.state() != SessionState::Closed {
                return Err(Error::InvalidState {
                    side: self.side,
                    session_id,
                    state: existing.state(),
                    op: "open",
                });
            }
            self.sessions.remove(&session_id);
        }

        let outcome = RangingSession::open(
            Arc::clone(&self.facade),
            self.side,
            params,
            expectation,
            self.callback_timeout,
        )
        .await?;
        match outcome {
            OpenOutcome::Opened(session) => {
                self.sessions.insert(session_id, session);
                Ok(Opened::Session(session_id))
            }
            OpenOutcome::Rejected(err) => Ok(Opened::Rejected(err)),
        }
    }

    pub async fn start(&mut self, session_id: u32) -> Result<()> {
        self.session_mut(session_id)?.start().await
    }

    /// Open then start.
    pub async fn open_and_start(&mut self, params: RangingParams) -> Result<u32> {
        let session_id = params.session_id();
        self.open(params, OpenExpectation::Success).await?;
        self.start(session_id).await?;
        Ok(session_id)
    }

    pub async fn reconfigure(&mut self, session_id: u32, command: &ReconfigureCommand) -> Result<()> {
        self.session_mut(session_id)?.reconfigure(command).await
    }

    pub async fn add_controlee(
        &mut self,
        session_id: u32,
        addresses: Vec<UwbAddress>,
        sub_sessions: Option<SubSessionKeys>,
    ) -> Result<()> {
        self.session_mut(session_id)?
            .add_controlee(addresses, sub_sessions)
            .await
    }

    pub async fn remove_controlee(
        &mut self,
        session_id: u32,
        addresses: Vec<UwbAddress>,
    ) -> Result<()> {
        self.session_mut(session_id)?
            .remove_controlee(addresses)
            .await
    }

    pub async fn stop(&mut self, session_id: u32) -> Result<()> {
        self.session_mut(session_id)?.stop().await
    }

    /// Close and unregister a session. Closing an id that is not registered
    /// is a no-op that makes no facade call.
    pub async fn close(&mut self, session_id: u32) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            tracing::debug!(side = %self.side, session_id, "close: no such session");
            return Ok(());
        };
        session.close().await?;
        self.sessions.remove(&session_id);
        Ok(())
    }

    /// Close every session, continuing past failures. Returns the first
    /// failure, if any.
    pub async fn close_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for session_id in self.session_ids() {
            if let Err(err) = self.close(session_id).await {
                tracing::warn!(side = %self.side, session_id, error = %err, "close failed during teardown");
                self.sessions.remove(&session_id);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drop every registry entry without facade calls, for when the device
    /// lost its sessions (reboot).
    pub fn forget_all(&mut self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        if count > 0 {
            tracing::info!(side = %self.side, count, "forgot sessions");
        }
        count
    }

    pub async fn measurement(
        &self,
        session_id: u32,
        kind: MeasurementKind,
        peer: &UwbAddress,
    ) -> Result<f64> {
        let session = self.sessions.get(&session_id).ok_or(Error::UnknownSession {
            side: self.side,
            session_id,
        })?;
        session.measurement(kind, peer).await
    }

    /// Wait for an externally caused event. A session observed `Closed` is
    /// removed from the registry.
    pub async fn observe(
        &mut self,
        session_id: u32,
        name: EventName,
        timeout: Duration,
    ) -> Result<Event> {
        let session = self.session_mut(session_id)?;
        let event = session.observe(name, timeout).await?;
        if session.state() == SessionState::Closed {
            self.sessions.remove(&session_id);
        }
        Ok(event)
    }

    pub fn drain_events(&mut self, session_id: u32) -> Result<usize> {
        Ok(self.session_mut(session_id)?.drain_events())
    }

    pub async fn verify_peer_found(
        &mut self,
        session_id: u32,
        peer: &UwbAddress,
        timeout: Duration,
    ) -> Result<PeerDiscovery> {
        let session = self.session_mut(session_id)?;
        verifier::verify_peer_found(session, peer, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_display_and_other() {
        assert_eq!(Side::Initiator.to_string(), "initiator");
        assert_eq!(Side::Responder.to_string(), "responder");
        assert_eq!(Side::Initiator.other(), Side::Responder);
        assert_eq!(Side::Responder.other(), Side::Initiator);
    }

    #[test]
    fn side_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Side::Responder).unwrap(),
            "\"responder\""
        );
    }
}
