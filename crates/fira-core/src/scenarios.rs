//! Two-party ranging scenarios.
//!
//! A [`RangingPair`] holds the initiator (controller) and responder
//! (controlee) devices plus the addressing, timeouts and STS material from
//! [`HarnessConfig`]. Each scenario is a fixed sequence of lifecycle verbs and
//! peer checks; [`Scenario::run`] executes one and always tears down both
//! registries afterwards.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::Instrument;

use crate::adapter::{self, AdapterStateWatcher};
use crate::config::{DevicesConfig, HarnessConfig, StsConfigSection, TimeoutsConfig};
use crate::device::{Opened, Side, UwbDevice};
use crate::error::{Error, Result};
use crate::event::EventName;
use crate::facade::{DeviceFacade, MeasurementKind};
use crate::params::{
    AoaResultRequest, DEFAULT_SESSION_ID, Profile, RangingParams, RangingParamsUpdate,
    ReconfigureCommand, StsConfig, UwbAddress,
};
use crate::session::{OpenExpectation, SessionState};
use crate::sim::{SimulatedDevice, SimulatedField};

/// Largest allowed gap between the two sides' median RSSI.
pub const RSSI_SYMMETRY_TOLERANCE_DB: f64 = 5.0;

/// RSSI samples taken per side.
const RSSI_SAMPLES: usize = 5;

/// Whether the backgrounded app returns to the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundOutcome {
    Foreground,
    StayBackground,
}

/// Initiator and responder devices ranging with each other.
pub struct RangingPair<F: DeviceFacade> {
    pub initiator: UwbDevice<F>,
    pub responder: UwbDevice<F>,
    devices: DevicesConfig,
    timeouts: TimeoutsConfig,
    sts: StsConfigSection,
    overrides: RangingParamsUpdate,
}

impl<F: DeviceFacade> fmt::Debug for RangingPair<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangingPair")
            .field("initiator", &self.initiator)
            .field("responder", &self.responder)
            .field("profile", &self.devices.profile)
            .finish_non_exhaustive()
    }
}

impl RangingPair<SimulatedDevice> {
    /// A pair on a fresh simulated field.
    #[must_use]
    pub fn simulated(config: &HarnessConfig) -> Self {
        let field = SimulatedField::new(config.simulation.clone());
        Self::new(
            field.add_device("initiator"),
            field.add_device("responder"),
            config,
        )
    }
}

impl<F: DeviceFacade> RangingPair<F> {
    #[must_use]
    pub fn new(initiator: Arc<F>, responder: Arc<F>, config: &HarnessConfig) -> Self {
        let callback_timeout = config.timeouts.callback_wait();
        Self {
            initiator: UwbDevice::new(Side::Initiator, initiator, callback_timeout),
            responder: UwbDevice::new(Side::Responder, responder, callback_timeout),
            devices: config.devices.clone(),
            timeouts: config.timeouts.clone(),
            sts: config.sts.clone(),
            overrides: RangingParamsUpdate::default(),
        }
    }

    /// Apply `overrides` to both sides' parameters in every scenario, e.g.
    /// a channel and preamble other than the profile's.
    #[must_use]
    pub fn with_overrides(mut self, overrides: RangingParamsUpdate) -> Self {
        self.overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.devices.profile = profile;
        self
    }

    #[must_use]
    pub fn profile(&self) -> Profile {
        self.devices.profile
    }

    #[must_use]
    pub fn timeouts(&self) -> &TimeoutsConfig {
        &self.timeouts
    }

    #[must_use]
    pub fn initiator_params(&self) -> RangingParams {
        RangingParams::initiator(
            self.devices.profile,
            self.devices.initiator_address.clone(),
            self.devices.responder_address.clone(),
        )
        .update(self.overrides.clone())
    }

    #[must_use]
    pub fn responder_params(&self) -> RangingParams {
        self.responder_params_at(self.devices.responder_address.clone())
    }

    fn responder_params_at(&self, address: UwbAddress) -> RangingParams {
        RangingParams::responder(
            self.devices.profile,
            address,
            self.devices.initiator_address.clone(),
        )
        .update(self.overrides.clone())
    }

    /// Open and start both sides, then require the initiator to find `peer`.
    pub async fn range(
        &mut self,
        initiator: RangingParams,
        responder: RangingParams,
        peer: &UwbAddress,
    ) -> Result<u32> {
        let session_id = self.initiator.open_and_start(initiator).await?;
        self.responder.open_and_start(responder).await?;
        self.expect_peer(session_id, peer).await?;
        Ok(session_id)
    }

    async fn expect_peer(&mut self, session_id: u32, peer: &UwbAddress) -> Result<Duration> {
        self.initiator
            .verify_peer_found(session_id, peer, self.timeouts.callback_wait())
            .await?
            .require(Side::Initiator, peer)
    }

    async fn expect_no_peer(&mut self, session_id: u32, peer: &UwbAddress) -> Result<Duration> {
        self.initiator
            .verify_peer_found(session_id, peer, self.timeouts.callback_wait())
            .await?
            .require_absent(Side::Initiator, peer)
    }

    /// Default parameters on both sides; the initiator must find the
    /// responder.
    pub async fn basic_ranging(&mut self) -> Result<u32> {
        let peer = self.devices.responder_address.clone();
        self.range(self.initiator_params(), self.responder_params(), &peer)
            .await
    }

    /// Parameters for a responder at the alternate address, and the
    /// matching initiator parameters. With `individual_key` both sides use
    /// provisioned STS with a per-controlee key.
    fn reconfigured_params(&self, individual_key: bool) -> (RangingParams, RangingParams) {
        let initiator = self.initiator_params();
        let responder = self.responder_params_at(self.devices.new_responder_address.clone());
        if !individual_key {
            return (initiator, responder);
        }
        let sts = StsConfig::ProvisionedIndividualKey;
        (
            initiator.update(RangingParamsUpdate {
                sts_config: Some(sts),
                ..RangingParamsUpdate::default()
            }),
            responder.update(RangingParamsUpdate {
                sts_config: Some(sts),
                sub_session_id: Some(self.sts.sub_session_id),
                sub_session_key: Some(self.sts.sub_session_key.clone()),
                ..RangingParamsUpdate::default()
            }),
        )
    }

    /// Responder joins under an address the initiator does not know; the
    /// initiator must not find it until reconfigured to add it.
    pub async fn reconfigured_controlee(&mut self, individual_key: bool) -> Result<()> {
        let (initiator, responder) = self.reconfigured_params(individual_key);
        let peer = self.devices.new_responder_address.clone();

        let session_id = self.initiator.open_and_start(initiator).await?;
        self.responder.open_and_start(responder).await?;
        self.expect_no_peer(session_id, &peer).await?;

        let command = if individual_key {
            ReconfigureCommand::add_controlee_with_keys(vec![peer.clone()], self.sts.keys())?
        } else {
            ReconfigureCommand::add_controlee(vec![peer.clone()])?
        };
        self.initiator.reconfigure(session_id, &command).await?;
        self.expect_peer(session_id, &peer).await?;
        Ok(())
    }

    /// Same as [`Self::reconfigured_controlee`] through the dedicated
    /// add/remove verbs, then removes the controlee again: its session must
    /// stop and the initiator must lose it.
    pub async fn add_remove_controlee(&mut self, individual_key: bool) -> Result<()> {
        let (initiator, responder) = self.reconfigured_params(individual_key);
        let peer = self.devices.new_responder_address.clone();

        let session_id = self.initiator.open_and_start(initiator).await?;
        self.responder.open_and_start(responder).await?;
        self.expect_no_peer(session_id, &peer).await?;

        let keys = individual_key.then(|| self.sts.keys());
        self.initiator
            .add_controlee(session_id, vec![peer.clone()], keys)
            .await?;
        self.expect_peer(session_id, &peer).await?;

        self.initiator
            .remove_controlee(session_id, vec![peer.clone()])
            .await?;
        self.responder
            .observe(session_id, EventName::Stopped, self.timeouts.peer_stop())
            .await?;
        self.expect_no_peer(session_id, &peer).await?;
        Ok(())
    }

    /// Stopping the controller stops the controlee; both restart.
    pub async fn stop_initiator(&mut self) -> Result<()> {
        let session_id = self.basic_ranging().await?;
        self.initiator.stop(session_id).await?;
        self.responder
            .observe(session_id, EventName::Stopped, self.timeouts.peer_stop())
            .await?;

        self.initiator.start(session_id).await?;
        self.responder.start(session_id).await?;
        let peer = self.devices.responder_address.clone();
        self.expect_peer(session_id, &peer).await?;
        Ok(())
    }

    /// Stopping the controlee leaves the controller running; only the
    /// responder restarts.
    pub async fn stop_responder(&mut self) -> Result<()> {
        let session_id = self.basic_ranging().await?;
        self.responder.stop(session_id).await?;
        self.responder.start(session_id).await?;
        let peer = self.devices.responder_address.clone();
        self.expect_peer(session_id, &peer).await?;
        Ok(())
    }

    /// Airplane mode on `side` closes its session and turns the adapter
    /// off; turning it back off restores `Inactive`, and ranging resumes
    /// after reopening.
    pub async fn airplane_mode_toggle(&mut self, side: Side) -> Result<()> {
        let session_id = self.basic_ranging().await?;
        self.initiator.drain_events(session_id)?;
        self.responder.drain_events(session_id)?;

        let (params, peer_side) = match side {
            Side::Initiator => (self.initiator_params(), Side::Responder),
            Side::Responder => (self.responder_params(), Side::Initiator),
        };
        let disrupts_controller = side == Side::Initiator;
        let poll = self.timeouts.airplane_poll();
        let callback_wait = self.timeouts.callback_wait();
        let peer_stop = self.timeouts.peer_stop();

        let facade = Arc::clone(self.device(side).facade());
        let mut watcher = AdapterStateWatcher::register(Arc::clone(&facade), side).await?;
        let disrupted = async {
            adapter::set_airplane_mode(&facade, side, true, poll).await?;
            watcher.expect(EventName::Disabled, callback_wait).await?;
            self.device_mut(side)
                .observe(session_id, EventName::Closed, callback_wait)
                .await?;
            if disrupts_controller {
                self.device_mut(peer_side)
                    .observe(session_id, EventName::Stopped, peer_stop)
                    .await?;
            }

            watcher.drain();
            adapter::set_airplane_mode(&facade, side, false, poll).await?;
            watcher.expect(EventName::Inactive, callback_wait).await?;
            Ok::<(), Error>(())
        }
        .await;
        let unregistered = watcher.unregister().await;
        disrupted?;
        unregistered?;

        self.device_mut(side).open_and_start(params).await?;
        let survivor = self.device_mut(peer_side);
        survivor.drain_events(session_id)?;
        if survivor
            .session(session_id)
            .is_some_and(|s| s.state() == SessionState::Stopped)
        {
            survivor.start(session_id).await?;
        }
        let peer = self.devices.responder_address.clone();
        self.expect_peer(session_id, &peer).await?;
        Ok(())
    }

    /// Background the initiator app: reports must cease. Then either bring
    /// it back and see reports resume, or leave it and see the session stop.
    pub async fn background_lifecycle(&mut self, outcome: BackgroundOutcome) -> Result<()> {
        let session_id = self.basic_ranging().await?;
        let facade = Arc::clone(self.initiator.facade());
        facade
            .set_app_foreground(false)
            .await
            .map_err(|source| Error::Api {
                side: Side::Initiator,
                source,
            })?;

        let result = self.while_backgrounded(session_id, outcome).await;

        if let Err(source) = facade.set_app_foreground(true).await {
            tracing::warn!(side = %Side::Initiator, error = %source, "failed to restore foreground");
        }
        result
    }

    async fn while_backgrounded(
        &mut self,
        session_id: u32,
        outcome: BackgroundOutcome,
    ) -> Result<()> {
        tokio::time::sleep(self.timeouts.settle()).await;
        self.initiator.drain_events(session_id)?;
        self.expect_no_reports(session_id).await?;

        match outcome {
            BackgroundOutcome::Foreground => {
                self.initiator
                    .facade()
                    .set_app_foreground(true)
                    .await
                    .map_err(|source| Error::Api {
                        side: Side::Initiator,
                        source,
                    })?;
                self.initiator.drain_events(session_id)?;
                self.initiator
                    .observe(
                        session_id,
                        EventName::ReportReceived,
                        self.timeouts.callback_wait(),
                    )
                    .await?;
            }
            BackgroundOutcome::StayBackground => {
                self.initiator
                    .observe(
                        session_id,
                        EventName::Stopped,
                        self.timeouts.background_stop(),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn expect_no_reports(&mut self, session_id: u32) -> Result<()> {
        let start = Instant::now();
        match self
            .initiator
            .observe(
                session_id,
                EventName::ReportReceived,
                self.timeouts.callback_wait(),
            )
            .await
        {
            Err(err) if err.is_timeout() => {
                tracing::info!(side = %Side::Initiator, session_id, "no reports while backgrounded");
                Ok(())
            }
            Err(err) => Err(err),
            Ok(_) => Err(Error::VerificationFailed {
                side: Side::Initiator,
                condition: "no ranging reports while the app is in the background".to_string(),
                elapsed_ms: millis(start.elapsed()),
            }),
        }
    }

    /// Opening a session while the app is backgrounded is refused.
    pub async fn background_open_rejected(&mut self) -> Result<()> {
        let facade = Arc::clone(self.initiator.facade());
        facade
            .set_app_foreground(false)
            .await
            .map_err(|source| Error::Api {
                side: Side::Initiator,
                source,
            })?;

        let opened = self
            .initiator
            .open(self.initiator_params(), OpenExpectation::Rejected)
            .await;

        if let Err(source) = facade.set_app_foreground(true).await {
            tracing::warn!(side = %Side::Initiator, error = %source, "failed to restore foreground");
        }
        opened?;
        Ok(())
    }

    /// Fill both devices up to the smaller session limit, then require the
    /// next open to be rejected on each device at that limit.
    pub async fn max_sessions_reject(&mut self) -> Result<()> {
        let initiator_max = self.initiator.max_sessions().await?;
        let responder_max = self.responder.max_sessions().await?;
        let max = initiator_max.min(responder_max);
        tracing::info!(initiator_max, responder_max, max, "filling session limit");

        let peer = self.devices.responder_address.clone();
        for i in 0..max {
            let id = RangingParamsUpdate::session_id(DEFAULT_SESSION_ID + i);
            let initiator = self.initiator_params().update(id.clone());
            let responder = self.responder_params().update(id);
            self.range(initiator, responder, &peer).await?;
        }

        let overflow = RangingParamsUpdate::session_id(DEFAULT_SESSION_ID + max);
        if max == initiator_max {
            let params = self.initiator_params().update(overflow.clone());
            self.expect_rejected(Side::Initiator, params).await?;
        }
        if max == responder_max {
            let params = self.responder_params().update(overflow);
            self.expect_rejected(Side::Responder, params).await?;
        }
        Ok(())
    }

    async fn expect_rejected(&mut self, side: Side, params: RangingParams) -> Result<()> {
        let device = self.device_mut(side);
        let before = device.active_count();
        if let Opened::Session(id) = device.open(params, OpenExpectation::Rejected).await? {
            return Err(Error::UnexpectedSuccess {
                side,
                op: format!("open of session {id} past the session limit"),
            });
        }
        if device.active_count() != before {
            return Err(Error::VerificationFailed {
                side,
                condition: format!("session count stays at {before} after a rejected open"),
                elapsed_ms: 0,
            });
        }
        Ok(())
    }

    /// Change the block stride of a live session; ranging must continue.
    pub async fn reconfigure_block_stride(&mut self, length: u32) -> Result<()> {
        let session_id = self.basic_ranging().await?;
        tracing::info!(side = %Side::Initiator, session_id, length, "reconfiguring block stride");
        self.initiator
            .reconfigure(session_id, &ReconfigureCommand::block_stride(length))
            .await?;
        let peer = self.devices.responder_address.clone();
        self.expect_peer(session_id, &peer).await?;
        Ok(())
    }

    /// Close both sides and range again under the same session id.
    pub async fn reopen_same_session_id(&mut self) -> Result<()> {
        let session_id = self.basic_ranging().await?;
        self.responder.close(session_id).await?;
        self.initiator.close(session_id).await?;
        let again = self.basic_ranging().await?;
        if again != session_id {
            return Err(Error::VerificationFailed {
                side: Side::Initiator,
                condition: format!("reopened session keeps id {session_id} (got {again})"),
                elapsed_ms: 0,
            });
        }
        Ok(())
    }

    /// With AoA reporting off, distance is reported but azimuth is not.
    pub async fn no_aoa_report(&mut self) -> Result<()> {
        let no_aoa = RangingParamsUpdate {
            aoa_result_request: Some(AoaResultRequest::NoAoaReport),
            ..RangingParamsUpdate::default()
        };
        let initiator = self.initiator_params().update(no_aoa.clone());
        let responder = self.responder_params().update(no_aoa);
        let peer = self.devices.responder_address.clone();
        let session_id = self.range(initiator, responder, &peer).await?;

        let distance = self
            .initiator
            .measurement(session_id, MeasurementKind::Distance, &peer)
            .await?;
        tracing::info!(side = %Side::Initiator, session_id, distance, "distance measured");

        match self
            .initiator
            .measurement(session_id, MeasurementKind::AoaAzimuth, &peer)
            .await
        {
            Err(Error::MeasurementUnavailable { .. }) => Ok(()),
            Err(err) => Err(err),
            Ok(azimuth) => Err(Error::VerificationFailed {
                side: Side::Initiator,
                condition: format!("no AoA azimuth reported (got {azimuth})"),
                elapsed_ms: 0,
            }),
        }
    }

    /// Reboot the responder on a spawned task while the initiator checks
    /// that the peer disappears and its session stops. The reboot task is
    /// always joined, also when the checks fail.
    pub async fn peer_reboot(&mut self) -> Result<()> {
        let session_id = self.basic_ranging().await?;
        let facade = Arc::clone(self.responder.facade());
        let reboot = tokio::spawn(async move { facade.reboot().await });

        let checked = self.after_peer_lost(session_id).await;
        let joined = reboot.await;
        self.responder.forget_all();

        checked?;
        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(Error::Api {
                side: Side::Responder,
                source,
            }),
            Err(err) => Err(Error::Join(err.to_string())),
        }
    }

    async fn after_peer_lost(&mut self, session_id: u32) -> Result<()> {
        tokio::time::sleep(self.timeouts.settle()).await;
        self.initiator.drain_events(session_id)?;
        let peer = self.devices.responder_address.clone();
        self.expect_no_peer(session_id, &peer).await?;
        self.initiator
            .observe(
                session_id,
                EventName::Stopped,
                self.timeouts.no_report_stop(),
            )
            .await?;
        Ok(())
    }

    /// Both sides must see each other at a similar signal strength.
    pub async fn rssi_symmetry(&mut self) -> Result<()> {
        let session_id = self.basic_ranging().await?;
        let initiator_addr = self.devices.initiator_address.clone();
        let responder_addr = self.devices.responder_address.clone();
        self.responder
            .verify_peer_found(session_id, &initiator_addr, self.timeouts.callback_wait())
            .await?
            .require(Side::Responder, &initiator_addr)?;

        let mut initiator_rssi = Vec::with_capacity(RSSI_SAMPLES);
        let mut responder_rssi = Vec::with_capacity(RSSI_SAMPLES);
        for _ in 0..RSSI_SAMPLES {
            initiator_rssi.push(
                self.initiator
                    .measurement(session_id, MeasurementKind::Rssi, &responder_addr)
                    .await?,
            );
            responder_rssi.push(
                self.responder
                    .measurement(session_id, MeasurementKind::Rssi, &initiator_addr)
                    .await?,
            );
        }

        let initiator_median = median(&mut initiator_rssi);
        let responder_median = median(&mut responder_rssi);
        let gap = (initiator_median - responder_median).abs();
        tracing::info!(
            session_id,
            initiator_median,
            responder_median,
            gap,
            "rssi compared"
        );
        if gap > RSSI_SYMMETRY_TOLERANCE_DB {
            return Err(Error::VerificationFailed {
                side: Side::Initiator,
                condition: format!(
                    "median RSSI within {RSSI_SYMMETRY_TOLERANCE_DB} dB \
                     (initiator {initiator_median:.1}, responder {responder_median:.1})"
                ),
                elapsed_ms: 0,
            });
        }
        Ok(())
    }

    /// Close every session on both devices, responder first. Returns the
    /// first failure.
    pub async fn teardown(&mut self) -> Result<()> {
        let responder = self.responder.close_all().await;
        let initiator = self.initiator.close_all().await;
        responder.and(initiator)
    }

    fn device(&self, side: Side) -> &UwbDevice<F> {
        match side {
            Side::Initiator => &self.initiator,
            Side::Responder => &self.responder,
        }
    }

    fn device_mut(&mut self, side: Side) -> &mut UwbDevice<F> {
        match side {
            Side::Initiator => &mut self.initiator,
            Side::Responder => &mut self.responder,
        }
    }
}

/// Middle value of `samples`; mean of the middle two for even counts.
fn median(samples: &mut [f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    samples.sort_by(f64::total_cmp);
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / 2.0
    } else {
        samples[mid]
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Every runnable scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    BasicRanging,
    ReconfiguredControlee,
    ReconfiguredControleePsts,
    AddRemoveControlee,
    AddRemoveControleePsts,
    StopInitiator,
    StopResponder,
    AirplaneModeToggle,
    BackgroundForeground,
    BackgroundStopsSession,
    BackgroundOpenRejected,
    MaxSessionsReject,
    ReconfigureBlockStride,
    ReopenSameSessionId,
    NoAoaReport,
    PeerReboot,
    RssiSymmetry,
}

impl Scenario {
    pub const ALL: [Self; 17] = [
        Self::BasicRanging,
        Self::ReconfiguredControlee,
        Self::ReconfiguredControleePsts,
        Self::AddRemoveControlee,
        Self::AddRemoveControleePsts,
        Self::StopInitiator,
        Self::StopResponder,
        Self::AirplaneModeToggle,
        Self::BackgroundForeground,
        Self::BackgroundStopsSession,
        Self::BackgroundOpenRejected,
        Self::MaxSessionsReject,
        Self::ReconfigureBlockStride,
        Self::ReopenSameSessionId,
        Self::NoAoaReport,
        Self::PeerReboot,
        Self::RssiSymmetry,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BasicRanging => "basic_ranging",
            Self::ReconfiguredControlee => "reconfigured_controlee",
            Self::ReconfiguredControleePsts => "reconfigured_controlee_psts",
            Self::AddRemoveControlee => "add_remove_controlee",
            Self::AddRemoveControleePsts => "add_remove_controlee_psts",
            Self::StopInitiator => "stop_initiator",
            Self::StopResponder => "stop_responder",
            Self::AirplaneModeToggle => "airplane_mode_toggle",
            Self::BackgroundForeground => "background_foreground",
            Self::BackgroundStopsSession => "background_stops_session",
            Self::BackgroundOpenRejected => "background_open_rejected",
            Self::MaxSessionsReject => "max_sessions_reject",
            Self::ReconfigureBlockStride => "reconfigure_block_stride",
            Self::ReopenSameSessionId => "reopen_same_session_id",
            Self::NoAoaReport => "no_aoa_report",
            Self::PeerReboot => "peer_reboot",
            Self::RssiSymmetry => "rssi_symmetry",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::BasicRanging => "open and start both sides; initiator finds responder",
            Self::ReconfiguredControlee => "responder at a new address is found after reconfigure",
            Self::ReconfiguredControleePsts => {
                "reconfigure with provisioned STS and an individual controlee key"
            }
            Self::AddRemoveControlee => "add then remove a controlee; its session stops",
            Self::AddRemoveControleePsts => "add/remove controlee with an individual key",
            Self::StopInitiator => "stopping the controller stops the controlee",
            Self::StopResponder => "responder stops and restarts; ranging resumes",
            Self::AirplaneModeToggle => "airplane mode closes sessions on each side in turn",
            Self::BackgroundForeground => "no reports in background; reports resume in foreground",
            Self::BackgroundStopsSession => "session stops while the app stays in background",
            Self::BackgroundOpenRejected => "open is refused while the app is in background",
            Self::MaxSessionsReject => "open beyond the session limit is rejected",
            Self::ReconfigureBlockStride => "change block stride while ranging",
            Self::ReopenSameSessionId => "close and reopen under the same session id",
            Self::NoAoaReport => "AoA disabled: distance only",
            Self::PeerReboot => "responder reboot stops the initiator session",
            Self::RssiSymmetry => "both sides report similar RSSI",
        }
    }

    /// Run against `pair`, then close every session on both devices.
    ///
    /// A scenario failure takes precedence over a teardown failure.
    pub async fn run<F: DeviceFacade>(self, pair: &mut RangingPair<F>) -> Result<Duration> {
        let start = Instant::now();
        tracing::info!(scenario = self.name(), profile = %pair.profile(), "scenario started");

        let span = crate::fira_span!("scenario", scenario = self.name());
        let outcome = self.execute(pair).instrument(span.clone()).await;
        let teardown = pair.teardown().instrument(span).await;
        let elapsed = start.elapsed();

        match (&outcome, &teardown) {
            (Ok(()), Ok(())) => {
                tracing::info!(scenario = self.name(), elapsed_ms = millis(elapsed), "scenario passed");
            }
            (Err(err), _) => {
                tracing::error!(scenario = self.name(), elapsed_ms = millis(elapsed), error = %err, "scenario failed");
            }
            (Ok(()), Err(err)) => {
                tracing::error!(scenario = self.name(), error = %err, "teardown failed");
            }
        }
        outcome?;
        teardown?;
        Ok(elapsed)
    }

    async fn execute<F: DeviceFacade>(self, pair: &mut RangingPair<F>) -> Result<()> {
        match self {
            Self::BasicRanging => pair.basic_ranging().await.map(drop),
            Self::ReconfiguredControlee => pair.reconfigured_controlee(false).await,
            Self::ReconfiguredControleePsts => pair.reconfigured_controlee(true).await,
            Self::AddRemoveControlee => pair.add_remove_controlee(false).await,
            Self::AddRemoveControleePsts => pair.add_remove_controlee(true).await,
            Self::StopInitiator => pair.stop_initiator().await,
            Self::StopResponder => pair.stop_responder().await,
            Self::AirplaneModeToggle => {
                pair.airplane_mode_toggle(Side::Initiator).await?;
                pair.teardown().await?;
                pair.airplane_mode_toggle(Side::Responder).await
            }
            Self::BackgroundForeground => {
                pair.background_lifecycle(BackgroundOutcome::Foreground)
                    .await
            }
            Self::BackgroundStopsSession => {
                pair.background_lifecycle(BackgroundOutcome::StayBackground)
                    .await
            }
            Self::BackgroundOpenRejected => pair.background_open_rejected().await,
            Self::MaxSessionsReject => pair.max_sessions_reject().await,
            Self::ReconfigureBlockStride => {
                let length = rand::rng().random_range(1..=10);
                pair.reconfigure_block_stride(length).await
            }
            Self::ReopenSameSessionId => pair.reopen_same_session_id().await,
            Self::NoAoaReport => pair.no_aoa_report().await,
            Self::PeerReboot => pair.peer_reboot().await,
            Self::RssiSymmetry => pair.rssi_symmetry().await,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.name() == normalized)
            .ok_or_else(|| Error::InvalidParams(format!("unknown scenario '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_names_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
        assert_eq!(
            "Peer-Reboot".parse::<Scenario>().unwrap(),
            Scenario::PeerReboot
        );
        assert!("warp_drive".parse::<Scenario>().is_err());
    }

    #[test]
    fn median_handles_odd_and_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&mut []).is_nan());
    }

    #[test]
    fn psts_params_carry_sub_session_on_responder_only() {
        let pair = RangingPair::simulated(&HarnessConfig::default());
        let (initiator, responder) = pair.reconfigured_params(true);
        assert_eq!(initiator.sts_config(), StsConfig::ProvisionedIndividualKey);
        assert_eq!(initiator.sub_session_id(), None);
        assert_eq!(responder.sub_session_id(), Some(11));
        assert_eq!(responder.device_address(), &UwbAddress::from([4, 5]));
        assert!(responder.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn open_below_the_limit_fails_a_rejection_check() {
        let mut pair = RangingPair::simulated(&HarnessConfig::default());
        let params = pair.initiator_params();
        let err = pair
            .expect_rejected(Side::Initiator, params)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::UnexpectedSuccess { side: Side::Initiator, .. }),
            "{err:?}"
        );
        assert_eq!(pair.initiator.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reopen_reuses_the_session_id() {
        let mut pair = RangingPair::simulated(&HarnessConfig::default());
        pair.reopen_same_session_id().await.unwrap();
        assert_eq!(pair.initiator.session_ids(), vec![DEFAULT_SESSION_ID]);
    }
}
