//! One ranging session on one device.
//!
//! Every lifecycle verb is a facade request followed by a bounded wait for
//! the confirming callback. State only advances when that callback is
//! matched:
//!
//! ```text
//! Idle --open/Opened--> Open --start/Started--> Ranging
//! Ranging --stop/Stopped--> Stopped --start/Started--> Ranging
//! any --close/Closed--> Closed
//! ```
//!
//! Verbs take `&mut self`, so a session never has two requests in flight.
//! A `*Failed` callback for the pending verb fails it immediately with
//! [`Error::LifecycleRejected`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::device::Side;
use crate::error::{Error, Result};
use crate::event::{Event, EventName};
use crate::event_stream::{EventStream, StreamWaitError};
use crate::facade::{ApiError, DeviceFacade, MeasurementKind, SessionKey};
use crate::params::{ControleeUpdate, RangingParams, ReconfigureCommand, SubSessionKeys, UwbAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    Idle,
    Open,
    Ranging,
    Stopped,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Ranging => "ranging",
            Self::Stopped => "stopped",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What the caller expects an open request to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenExpectation {
    Success,
    /// The facade call itself must fail, e.g. at the session limit.
    Rejected,
}

/// Result of [`RangingSession::open`].
pub enum OpenOutcome<F: DeviceFacade> {
    Opened(RangingSession<F>),
    Rejected(ApiError),
}

impl<F: DeviceFacade> fmt::Debug for OpenOutcome<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened(session) => f.debug_tuple("Opened").field(session).finish(),
            Self::Rejected(err) => f.debug_tuple("Rejected").field(err).finish(),
        }
    }
}

pub struct RangingSession<F: DeviceFacade> {
    facade: Arc<F>,
    side: Side,
    key: SessionKey,
    params: RangingParams,
    state: SessionState,
    events: EventStream,
    callback_timeout: Duration,
}

impl<F: DeviceFacade> fmt::Debug for RangingSession<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangingSession")
            .field("side", &self.side)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<F: DeviceFacade> RangingSession<F> {
    /// Request a session and wait for `Opened`.
    ///
    /// With [`OpenExpectation::Rejected`] the facade call must fail; if it
    /// succeeds the stray session is closed best-effort and
    /// [`Error::UnexpectedSuccess`] is returned.
    pub async fn open(
        facade: Arc<F>,
        side: Side,
        params: RangingParams,
        expectation: OpenExpectation,
        callback_timeout: Duration,
    ) -> Result<OpenOutcome<F>> {
        params.validate()?;
        let key = SessionKey::for_session(params.session_id());
        let wire = params.to_wire()?;
        tracing::debug!(side = %side, session_id = params.session_id(), ?expectation, "opening session");

        let opened = facade.open_session(&key, &wire).await;
        let events = match (opened, expectation) {
            (Ok(events), OpenExpectation::Success) => events,
            (Err(source), OpenExpectation::Success) => return Err(Error::Api { side, source }),
            (Err(source), OpenExpectation::Rejected) => {
                tracing::info!(
                    side = %side,
                    session_id = params.session_id(),
                    reason = %source,
                    "open rejected as expected"
                );
                return Ok(OpenOutcome::Rejected(source));
            }
            (Ok(_events), OpenExpectation::Rejected) => {
                if let Err(err) = facade.close_session(&key).await {
                    tracing::warn!(side = %side, error = %err, "failed to close unexpectedly opened session");
                }
                return Err(Error::UnexpectedSuccess {
                    side,
                    op: format!("open session {}", params.session_id()),
                });
            }
        };

        let mut session = Self {
            facade,
            side,
            key,
            params,
            state: SessionState::Idle,
            events,
            callback_timeout,
        };
        if let Err(err) = session
            .confirm("open", EventName::Opened, callback_timeout)
            .await
        {
            // never registered, so nothing else would close it
            if let Err(close) = session.facade.close_session(&session.key).await {
                tracing::warn!(side = %side, error = %close, "failed to close unconfirmed session");
            }
            return Err(err);
        }
        session.state = SessionState::Open;
        Ok(OpenOutcome::Opened(session))
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.params.session_id()
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn params(&self) -> &RangingParams {
        &self.params
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }

    pub async fn start(&mut self) -> Result<()> {
        self.require("start", &[SessionState::Open, SessionState::Stopped])?;
        let result = self.facade.start_session(&self.key).await;
        self.api(result)?;
        self.confirm("start", EventName::Started, self.callback_timeout)
            .await?;
        self.state = SessionState::Ranging;
        Ok(())
    }

    pub async fn reconfigure(&mut self, command: &ReconfigureCommand) -> Result<()> {
        self.require("reconfigure", &[SessionState::Open, SessionState::Ranging])?;
        let wire = command.to_wire();
        let result = self.facade.reconfigure_session(&self.key, &wire).await;
        self.api(result)?;
        self.confirm("reconfigure", EventName::Reconfigured, self.callback_timeout)
            .await?;
        self.params = command.apply_to(&self.params);
        Ok(())
    }

    pub async fn add_controlee(
        &mut self,
        addresses: Vec<UwbAddress>,
        sub_sessions: Option<SubSessionKeys>,
    ) -> Result<()> {
        let update = ControleeUpdate::add(addresses, sub_sessions)?;
        self.update_controlees(&update).await
    }

    /// Removing a controlee makes the controlee's own session stop; observe
    /// that on the peer device.
    pub async fn remove_controlee(&mut self, addresses: Vec<UwbAddress>) -> Result<()> {
        let update = ControleeUpdate::remove(addresses)?;
        self.update_controlees(&update).await
    }

    pub async fn update_controlees(&mut self, update: &ControleeUpdate) -> Result<()> {
        let op = match update {
            ControleeUpdate::Add { .. } => "add controlee",
            ControleeUpdate::Remove { .. } => "remove controlee",
        };
        self.require(op, &[SessionState::Open, SessionState::Ranging])?;
        let wire = update.to_wire();
        let result = match update {
            ControleeUpdate::Add { .. } => self.facade.add_controlee(&self.key, &wire).await,
            ControleeUpdate::Remove { .. } => self.facade.remove_controlee(&self.key, &wire).await,
        };
        self.api(result)?;
        self.confirm(op, EventName::Reconfigured, self.callback_timeout)
            .await?;
        self.params = update.apply_to(&self.params);
        Ok(())
    }

    /// Stop ranging. Only this side's `Stopped` is awaited.
    pub async fn stop(&mut self) -> Result<()> {
        self.require("stop", &[SessionState::Ranging])?;
        let result = self.facade.stop_session(&self.key).await;
        self.api(result)?;
        self.confirm("stop", EventName::Stopped, self.callback_timeout)
            .await?;
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Close the session. A session already closed is left alone.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let result = self.facade.close_session(&self.key).await;
        self.api(result)?;
        self.confirm("close", EventName::Closed, self.callback_timeout)
            .await?;
        self.state = SessionState::Closed;
        Ok(())
    }

    pub async fn measurement(&self, kind: MeasurementKind, peer: &UwbAddress) -> Result<f64> {
        let result = self.facade.measurement(&self.key, kind, peer).await;
        self.api(result)?
            .ok_or_else(|| Error::MeasurementUnavailable {
                side: self.side,
                kind,
                peer: peer.clone(),
            })
    }

    /// Wait for an event caused by something other than this session's own
    /// verbs (peer stop, airplane mode, backgrounding) and apply it.
    pub async fn observe(&mut self, name: EventName, timeout: Duration) -> Result<Event> {
        let start = Instant::now();
        let event = self
            .events
            .wait_for(name, timeout)
            .await
            .map_err(|wait| self.timeout_error(&wait))?;
        self.apply(name);
        tracing::info!(
            side = %self.side,
            session_id = self.id(),
            event = %name,
            elapsed_ms = elapsed_ms(start),
            state = %self.state,
            "observed"
        );
        Ok(event)
    }

    /// Discard every buffered callback.
    pub fn drain_events(&mut self) -> usize {
        let drained = self.events.drain_all();
        for event in &drained {
            if matches!(event.name, EventName::Stopped | EventName::Closed) {
                self.apply(event.name);
            }
        }
        drained.len()
    }

    pub(crate) async fn next_report(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Event, StreamWaitError> {
        self.events.wait_for(EventName::ReportReceived, timeout).await
    }

    pub(crate) async fn peer_in_report(&self, peer: &UwbAddress) -> Result<bool> {
        let result = self.facade.is_peer_found(&self.key, peer).await;
        self.api(result)
    }

    pub(crate) fn timeout_error(&self, wait: &StreamWaitError) -> Error {
        Error::Timeout {
            side: self.side,
            target: format!("session {}", self.id()),
            expected: wait.expected.clone(),
            elapsed_ms: u64::try_from(wait.elapsed.as_millis()).unwrap_or(u64::MAX),
            last_observed: wait.last_observed.map(|name| name.to_string()),
        }
    }

    fn apply(&mut self, name: EventName) {
        self.state = match (name, self.state) {
            (EventName::Closed, _) => SessionState::Closed,
            (_, SessionState::Closed) => SessionState::Closed,
            (EventName::Stopped, _) => SessionState::Stopped,
            (EventName::Started, _) => SessionState::Ranging,
            (EventName::Opened, SessionState::Idle) => SessionState::Open,
            (_, state) => state,
        };
    }

    async fn confirm(
        &mut self,
        op: &'static str,
        expected: EventName,
        timeout: Duration,
    ) -> Result<Event> {
        let start = Instant::now();
        let mut names = vec![expected];
        names.extend(expected.failure());

        let event = self
            .events
            .wait_for_any(&names, timeout)
            .await
            .map_err(|wait| self.timeout_error(&wait))?;

        if event.name != expected {
            tracing::warn!(
                side = %self.side,
                session_id = self.id(),
                op,
                event = %event.name,
                "lifecycle request rejected"
            );
            return Err(Error::LifecycleRejected {
                side: self.side,
                session_id: self.id(),
                op,
                event: event.name,
            });
        }

        tracing::info!(
            side = %self.side,
            session_id = self.id(),
            event = %expected,
            elapsed_ms = elapsed_ms(start),
            "confirmed"
        );
        Ok(event)
    }

    fn require(&self, op: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                side: self.side,
                session_id: self.id(),
                state: self.state,
                op,
            })
        }
    }

    fn api<T>(&self, result: std::result::Result<T, ApiError>) -> Result<T> {
        result.map_err(|source| Error::Api {
            side: self.side,
            source,
        })
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
