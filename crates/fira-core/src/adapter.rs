//! Airplane mode, UWB enable state and adapter-state callbacks.
//!
//! Settings without a callback are set and then polled back through
//! [`crate::wait`]; adapter-state changes are observed through a registered
//! [`AdapterStateWatcher`].

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::device::Side;
use crate::error::{Error, Result};
use crate::event::{Event, EventName};
use crate::event_stream::EventStream;
use crate::facade::DeviceFacade;
use crate::wait::{Backoff, PollOutcome, poll_until};

/// Set airplane mode and poll until the device reports the new value.
pub async fn set_airplane_mode<F: DeviceFacade>(
    facade: &Arc<F>,
    side: Side,
    enabled: bool,
    timeout: Duration,
) -> Result<()> {
    tracing::info!(side = %side, enabled, "setting airplane mode");
    facade
        .set_airplane_mode(enabled)
        .await
        .map_err(|source| Error::Api { side, source })?;
    poll_setting(side, "airplane_mode", enabled, timeout, || facade.airplane_mode()).await
}

/// Toggle UWB and poll until the device reports the new value.
pub async fn set_uwb_enabled<F: DeviceFacade>(
    facade: &Arc<F>,
    side: Side,
    enabled: bool,
    timeout: Duration,
) -> Result<()> {
    tracing::info!(side = %side, enabled, "setting uwb state");
    facade
        .set_uwb_enabled(enabled)
        .await
        .map_err(|source| Error::Api { side, source })?;
    poll_setting(side, "uwb_enabled", enabled, timeout, || facade.uwb_enabled()).await
}

async fn poll_setting<Q, Fut>(
    side: Side,
    name: &str,
    expected: bool,
    timeout: Duration,
    mut query: Q,
) -> Result<()>
where
    Q: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::facade::FacadeResult<bool>>,
{
    poll_until(
        format!("{name} == {expected}"),
        || {
            let fut = query();
            async move {
                match fut.await {
                    Ok(value) if value == expected => PollOutcome::Ready(()),
                    Ok(value) => PollOutcome::pending(format!("{name} == {value}")),
                    Err(err) => PollOutcome::pending(err.to_string()),
                }
            }
        },
        timeout,
        Backoff::device_setting(),
    )
    .await
    .map_err(|poll| Error::Timeout {
        side,
        target: "device settings".to_string(),
        expected: poll.expected,
        elapsed_ms: u64::try_from(poll.elapsed.as_millis()).unwrap_or(u64::MAX),
        last_observed: poll.last_observed,
    })
}

/// A registered adapter-state callback.
///
/// The key is `uwb_state_<n>` with a random suffix so concurrent watchers on
/// one device do not collide. Call [`AdapterStateWatcher::unregister`] when
/// done.
pub struct AdapterStateWatcher<F: DeviceFacade> {
    facade: Arc<F>,
    side: Side,
    key: String,
    events: EventStream,
}

impl<F: DeviceFacade> AdapterStateWatcher<F> {
    pub async fn register(facade: Arc<F>, side: Side) -> Result<Self> {
        let key = format!("uwb_state_{}", rand::rng().random_range(1..=100_000u32));
        let events = facade
            .register_adapter_state_callback(&key)
            .await
            .map_err(|source| Error::Api { side, source })?;
        tracing::debug!(side = %side, key = %key, "adapter state callback registered");
        Ok(Self {
            facade,
            side,
            key,
            events,
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the adapter to report `state`.
    pub async fn expect(&mut self, state: EventName, timeout: Duration) -> Result<Event> {
        debug_assert!(state.is_adapter_state());
        let event = self
            .events
            .wait_for(state, timeout)
            .await
            .map_err(|wait| Error::Timeout {
                side: self.side,
                target: "adapter state".to_string(),
                expected: wait.expected,
                elapsed_ms: u64::try_from(wait.elapsed.as_millis()).unwrap_or(u64::MAX),
                last_observed: wait.last_observed.map(|name| name.to_string()),
            })?;
        tracing::info!(side = %self.side, state = %state, "adapter state observed");
        Ok(event)
    }

    pub fn drain(&mut self) -> usize {
        self.events.drain_all().len()
    }

    pub async fn unregister(self) -> Result<()> {
        let side = self.side;
        self.facade
            .unregister_adapter_state_callback(&self.key)
            .await
            .map_err(|source| Error::Api { side, source })
    }
}

/// Register a fresh callback and check the state it reports on
/// registration.
pub async fn verify_adapter_state<F: DeviceFacade>(
    facade: &Arc<F>,
    side: Side,
    state: EventName,
    timeout: Duration,
) -> Result<()> {
    let mut watcher = AdapterStateWatcher::register(Arc::clone(facade), side).await?;
    let outcome = watcher.expect(state, timeout).await;
    let unregistered = watcher.unregister().await;
    outcome?;
    unregistered
}
