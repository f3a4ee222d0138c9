//! In-process simulated radio field.
//!
//! [`SimulatedField`] hosts any number of [`SimulatedDevice`]s that implement
//! [`DeviceFacade`]. It models only what the harness can observe through
//! callbacks:
//!
//! - two sessions *link* when both range under the same session id with
//!   compatible radio settings, opposite device types, and each lists the
//!   other's address as a destination (individual-key STS additionally needs
//!   the controller to know the controlee's sub-session id)
//! - a started session emits `ReportReceived` every ranging interval, naming
//!   the peers it currently links with
//! - stopping or losing a controller stops its linked controlees after the
//!   configured teardown delay, as does removing a controlee
//! - airplane mode or UWB off closes every session on the device
//! - a backgrounded app gets no reports and its sessions stop after the
//!   configured delay; opening while backgrounded is refused
//! - a controller that finds no peer for the configured period stops
//! - rebooting drops every session silently for the reboot duration
//!
//! All timing uses `tokio::time`, so tests can run on paused virtual time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SimulationConfig;
use crate::event::{Event, EventName};
use crate::event_stream::{self, EventSender, EventStream};
use crate::facade::{
    ApiError, DeviceFacade, FacadeResult, FiraSpecification, MeasurementKind, SessionKey,
    SpecificationInfo,
};
use crate::params::{
    AoaResultRequest, ControleeUpdate, DeviceType, RangingParams, ReconfigureCommand, StsConfig,
    UwbAddress,
};

/// Shared field that simulated devices range within.
#[derive(Debug, Clone)]
pub struct SimulatedField {
    shared: Arc<FieldShared>,
}

#[derive(Debug)]
struct FieldShared {
    config: SimulationConfig,
    state: Mutex<FieldState>,
}

#[derive(Debug, Default)]
struct FieldState {
    devices: Vec<DeviceState>,
}

#[derive(Debug)]
struct DeviceState {
    name: String,
    max_sessions: u32,
    airplane: bool,
    uwb_enabled: bool,
    foreground: bool,
    rebooting: bool,
    reported_state: EventName,
    sessions: HashMap<SessionKey, SimSession>,
    adapter_callbacks: HashMap<String, EventSender>,
}

#[derive(Debug)]
struct SimSession {
    params: RangingParams,
    sender: EventSender,
    ranging: bool,
    /// Bumped on every start so stale timers can tell they are stale.
    generation: u64,
    last_report: Vec<UwbAddress>,
    last_peer_seen: Instant,
    background_since: Option<Instant>,
    /// Controller side: sub-session id per controlee address.
    sub_sessions: HashMap<UwbAddress, u32>,
    ticker: Option<JoinHandle<()>>,
}

impl SimSession {
    fn send(&self, name: EventName) {
        self.sender.send(Event::session(
            name,
            self.sender.key(),
            self.params.session_id(),
        ));
    }

    fn halt(&mut self) {
        self.ranging = false;
        self.last_report.clear();
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl DeviceState {
    fn radio_on(&self) -> bool {
        !self.airplane && self.uwb_enabled && !self.rebooting
    }

    fn adapter_state(&self) -> EventName {
        if !self.radio_on() {
            EventName::Disabled
        } else if self.sessions.values().any(|s| s.ranging) {
            EventName::Active
        } else {
            EventName::Inactive
        }
    }

    /// Notify adapter callbacks if the derived state changed.
    fn refresh_adapter_state(&mut self) {
        let state = self.adapter_state();
        if state != self.reported_state {
            self.reported_state = state;
            for sender in self.adapter_callbacks.values() {
                sender.send(Event::adapter(state, sender.key()));
            }
        }
    }
}

/// Whether two sessions on different devices range with each other.
fn linked(a: &SimSession, b: &SimSession) -> bool {
    let (pa, pb) = (&a.params, &b.params);
    if !a.ranging || !b.ranging {
        return false;
    }
    if pa.session_id() != pb.session_id()
        || pa.device_type() == pb.device_type()
        || pa.channel() != pb.channel()
        || pa.preamble() != pb.preamble()
        || pa.ranging_interval_ms() != pb.ranging_interval_ms()
        || pa.slots_per_ranging_round() != pb.slots_per_ranging_round()
        || pa.sts_config() != pb.sts_config()
    {
        return false;
    }
    if !pa.destination_addresses().contains(pb.device_address())
        || !pb.destination_addresses().contains(pa.device_address())
    {
        return false;
    }
    if pa.sts_config() == StsConfig::ProvisionedIndividualKey {
        let (controller, controlee) = if pa.device_type() == DeviceType::Controller {
            (a, b)
        } else {
            (b, a)
        };
        let expected = controller
            .sub_sessions
            .get(controlee.params.device_address())
            .copied();
        return expected.is_some() && expected == controlee.params.sub_session_id();
    }
    true
}

impl FieldState {
    fn session(&self, device: usize, key: &SessionKey) -> Option<&SimSession> {
        self.devices.get(device)?.sessions.get(key)
    }

    /// Addresses of every peer session linked with `key` on `device`.
    fn peers_of(&self, device: usize, key: &SessionKey) -> Vec<UwbAddress> {
        let Some(dev) = self.devices.get(device) else {
            return Vec::new();
        };
        let Some(session) = dev.sessions.get(key) else {
            return Vec::new();
        };
        if !dev.radio_on() {
            return Vec::new();
        }
        let mut peers: Vec<UwbAddress> = self
            .devices
            .iter()
            .enumerate()
            .filter(|(idx, other)| *idx != device && other.radio_on())
            .flat_map(|(_, other)| other.sessions.values())
            .filter(|other| linked(session, other))
            .map(|other| other.params.device_address().clone())
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }

    /// Controlee sessions on other devices currently linked with a
    /// controller session.
    fn linked_controlees(&self, device: usize, key: &SessionKey) -> Vec<(usize, SessionKey, u64)> {
        let Some(controller) = self.session(device, key) else {
            return Vec::new();
        };
        if controller.params.device_type() != DeviceType::Controller {
            return Vec::new();
        }
        let mut found = Vec::new();
        for (idx, dev) in self.devices.iter().enumerate() {
            if idx == device {
                continue;
            }
            for (other_key, other) in &dev.sessions {
                if linked(controller, other) {
                    found.push((idx, other_key.clone(), other.generation));
                }
            }
        }
        found
    }

    /// Controlee sessions with one of `addresses` under the same session id.
    fn controlees_at(
        &self,
        device: usize,
        session_id: u32,
        addresses: &[UwbAddress],
    ) -> Vec<(usize, SessionKey, u64)> {
        let mut found = Vec::new();
        for (idx, dev) in self.devices.iter().enumerate() {
            if idx == device {
                continue;
            }
            for (key, session) in &dev.sessions {
                if session.ranging
                    && session.params.session_id() == session_id
                    && session.params.device_type() == DeviceType::Controlee
                    && addresses.contains(session.params.device_address())
                {
                    found.push((idx, key.clone(), session.generation));
                }
            }
        }
        found
    }
}

impl SimulatedField {
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            shared: Arc::new(FieldShared {
                config,
                state: Mutex::new(FieldState::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.shared.config
    }

    /// Add a device using the configured session limit.
    #[must_use]
    pub fn add_device(&self, name: &str) -> Arc<SimulatedDevice> {
        self.add_device_with_limit(name, self.shared.config.max_sessions)
    }

    #[must_use]
    pub fn add_device_with_limit(&self, name: &str, max_sessions: u32) -> Arc<SimulatedDevice> {
        let mut state = self.shared.lock();
        let index = state.devices.len();
        state.devices.push(DeviceState {
            name: name.to_string(),
            max_sessions,
            airplane: false,
            uwb_enabled: true,
            foreground: true,
            rebooting: false,
            reported_state: EventName::Inactive,
            sessions: HashMap::new(),
            adapter_callbacks: HashMap::new(),
        });
        tracing::debug!(device = name, index, max_sessions, "simulated device added");
        Arc::new(SimulatedDevice {
            shared: Arc::clone(&self.shared),
            index,
            name: name.to_string(),
        })
    }

    /// Two devices named `initiator` and `responder`.
    #[must_use]
    pub fn pair(config: SimulationConfig) -> (Arc<SimulatedDevice>, Arc<SimulatedDevice>) {
        let field = Self::new(config);
        (field.add_device("initiator"), field.add_device("responder"))
    }
}

impl FieldShared {
    fn lock(&self) -> MutexGuard<'_, FieldState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn with_device<T>(
        &self,
        device: usize,
        method: &str,
        f: impl FnOnce(&mut DeviceState) -> FacadeResult<T>,
    ) -> FacadeResult<T> {
        let mut state = self.lock();
        let dev = state
            .devices
            .get_mut(device)
            .ok_or_else(|| ApiError::new(method, "no such device"))?;
        if dev.rebooting {
            return Err(ApiError::new(method, format!("{} is rebooting", dev.name)));
        }
        f(dev)
    }

    /// Stop peer sessions after the teardown delay, unless they were
    /// restarted in the meantime.
    fn schedule_peer_stops(self: &Arc<Self>, targets: Vec<(usize, SessionKey, u64)>) {
        if targets.is_empty() {
            return;
        }
        let delay = Duration::from_millis(self.config.peer_teardown_ms);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.lock();
            for (device, key, generation) in targets {
                let Some(dev) = state.devices.get_mut(device) else {
                    continue;
                };
                if let Some(session) = dev.sessions.get_mut(&key) {
                    if session.ranging && session.generation == generation {
                        session.halt();
                        session.send(EventName::Stopped);
                        tracing::debug!(device = %dev.name, %key, "peer session stopped remotely");
                    }
                }
                dev.refresh_adapter_state();
            }
        });
    }

    /// One report interval for a session. Returns false once the ticker
    /// should exit.
    fn report_tick(self: &Arc<Self>, device: usize, key: &SessionKey, generation: u64) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        let peers = state.peers_of(device, key);
        let controlees = state.linked_controlees(device, key);

        let Some(dev) = state.devices.get_mut(device) else {
            return false;
        };
        if dev.rebooting {
            return false;
        }
        let foreground = dev.foreground;
        let radio_on = dev.radio_on();
        let Some(session) = dev.sessions.get_mut(key) else {
            return false;
        };
        if !session.ranging || session.generation != generation {
            return false;
        }

        if !peers.is_empty() {
            session.last_peer_seen = now;
        }
        session.last_report.clone_from(&peers);

        let background_stop = Duration::from_millis(self.config.background_stop_ms);
        let backgrounded_too_long = session
            .background_since
            .is_some_and(|since| now.saturating_duration_since(since) >= background_stop);
        let no_report_stop = Duration::from_millis(self.config.no_report_stop_ms);
        let peerless_too_long = session.params.device_type() == DeviceType::Controller
            && now.saturating_duration_since(session.last_peer_seen) >= no_report_stop;

        if backgrounded_too_long || peerless_too_long {
            session.halt();
            session.send(EventName::Stopped);
            tracing::debug!(
                device = %dev.name,
                %key,
                backgrounded_too_long,
                peerless_too_long,
                "session stopped by platform"
            );
            dev.refresh_adapter_state();
            drop(state);
            self.schedule_peer_stops(controlees);
            return false;
        }

        if foreground && radio_on {
            let payload = json!({ "peers": peers });
            session.sender.send(
                Event::session(EventName::ReportReceived, key.as_str(), session.params.session_id())
                    .with_payload(payload),
            );
        }
        true
    }
}

async fn run_reports(
    shared: Arc<FieldShared>,
    device: usize,
    key: SessionKey,
    generation: u64,
    interval: Duration,
) {
    let first = Instant::now()
        + Duration::from_millis(shared.config.first_report_delay_ms)
        + interval;
    let mut ticker = tokio::time::interval_at(first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !shared.report_tick(device, &key, generation) {
            break;
        }
    }
}

/// One simulated device; implements [`DeviceFacade`].
#[derive(Debug)]
pub struct SimulatedDevice {
    shared: Arc<FieldShared>,
    index: usize,
    name: String,
}

impl SimulatedDevice {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of sessions the device currently holds.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared
            .lock()
            .devices
            .get(self.index)
            .map_or(0, |dev| dev.sessions.len())
    }

    #[must_use]
    pub fn is_ranging(&self, key: &SessionKey) -> bool {
        self.shared
            .lock()
            .session(self.index, key)
            .is_some_and(|s| s.ranging)
    }

    fn open_sync(&self, key: &SessionKey, params: &Value) -> FacadeResult<EventStream> {
        const METHOD: &str = "openFiraRangingSession";
        self.shared.with_device(self.index, METHOD, |dev| {
            if !dev.radio_on() {
                return Err(ApiError::new(METHOD, "UWB is disabled"));
            }
            if !dev.foreground {
                return Err(ApiError::new(METHOD, "app is in the background"));
            }
            let params = RangingParams::from_wire(params)
                .map_err(|e| ApiError::new(METHOD, format!("invalid params: {e}")))?;
            let session_id = params.session_id();
            if dev.sessions.contains_key(key)
                || dev.sessions.values().any(|s| s.params.session_id() == session_id)
            {
                return Err(ApiError::new(
                    METHOD,
                    format!("session id {session_id} already in use"),
                ));
            }
            let limit = usize::try_from(dev.max_sessions).unwrap_or(usize::MAX);
            if dev.sessions.len() >= limit {
                return Err(ApiError::new(
                    METHOD,
                    format!("maximum of {} sessions reached", dev.max_sessions),
                ));
            }

            let (sender, stream) = event_stream::channel(key.as_str());
            let session = SimSession {
                params,
                sender,
                ranging: false,
                generation: 0,
                last_report: Vec::new(),
                last_peer_seen: Instant::now(),
                background_since: None,
                sub_sessions: HashMap::new(),
                ticker: None,
            };
            session.send(EventName::Opened);
            dev.sessions.insert(key.clone(), session);
            Ok(stream)
        })
    }

    fn start_sync(&self, key: &SessionKey) -> FacadeResult<()> {
        const METHOD: &str = "startFiraRangingSession";
        let shared = Arc::clone(&self.shared);
        let index = self.index;
        self.shared.with_device(index, METHOD, |dev| {
            let foreground = dev.foreground;
            let session = dev
                .sessions
                .get_mut(key)
                .ok_or_else(|| ApiError::new(METHOD, format!("unknown session {key}")))?;
            if session.ranging {
                session.send(EventName::StartFailed);
                return Ok(());
            }
            session.ranging = true;
            session.generation += 1;
            session.last_peer_seen = Instant::now();
            session.last_report.clear();
            session.background_since = (!foreground).then(Instant::now);
            let interval = Duration::from_millis(u64::from(session.params.ranging_interval_ms()));
            session.ticker = Some(tokio::spawn(run_reports(
                shared,
                index,
                key.clone(),
                session.generation,
                interval,
            )));
            session.send(EventName::Started);
            dev.refresh_adapter_state();
            Ok(())
        })
    }

    fn apply_controlee_update(
        &self,
        method: &'static str,
        key: &SessionKey,
        update: ControleeUpdate,
    ) -> FacadeResult<()> {
        let mut state = self.shared.lock();
        let Some(dev) = state.devices.get_mut(self.index) else {
            return Err(ApiError::new(method, "no such device"));
        };
        if dev.rebooting {
            return Err(ApiError::new(method, "device is rebooting"));
        }
        let session = dev
            .sessions
            .get_mut(key)
            .ok_or_else(|| ApiError::new(method, format!("unknown session {key}")))?;
        if session.params.device_type() != DeviceType::Controller {
            session.send(EventName::ReconfigureFailed);
            return Ok(());
        }

        let session_id = session.params.session_id();
        session.params = update.apply_to(&session.params);
        let removed = match update {
            ControleeUpdate::Add {
                addresses,
                sub_sessions,
            } => {
                if let Some(keys) = &sub_sessions {
                    for (addr, id) in addresses.iter().zip(&keys.ids) {
                        session.sub_sessions.insert(addr.clone(), *id);
                    }
                }
                Vec::new()
            }
            ControleeUpdate::Remove { addresses } => {
                for addr in &addresses {
                    session.sub_sessions.remove(addr);
                }
                addresses
            }
        };
        session.send(EventName::Reconfigured);

        let targets = if removed.is_empty() {
            Vec::new()
        } else {
            state.controlees_at(self.index, session_id, &removed)
        };
        drop(state);
        self.shared.schedule_peer_stops(targets);
        Ok(())
    }

    fn stop_sync(&self, key: &SessionKey) -> FacadeResult<()> {
        const METHOD: &str = "stopFiraRangingSession";
        let mut state = self.shared.lock();
        let controlees = state.linked_controlees(self.index, key);
        let Some(dev) = state.devices.get_mut(self.index) else {
            return Err(ApiError::new(METHOD, "no such device"));
        };
        if dev.rebooting {
            return Err(ApiError::new(METHOD, "device is rebooting"));
        }
        let session = dev
            .sessions
            .get_mut(key)
            .ok_or_else(|| ApiError::new(METHOD, format!("unknown session {key}")))?;
        if !session.ranging {
            session.send(EventName::StopFailed);
            return Ok(());
        }
        session.halt();
        session.send(EventName::Stopped);
        dev.refresh_adapter_state();
        drop(state);
        self.shared.schedule_peer_stops(controlees);
        Ok(())
    }

    fn close_sync(&self, key: &SessionKey) -> FacadeResult<()> {
        const METHOD: &str = "closeFiraRangingSession";
        let mut state = self.shared.lock();
        let controlees = state.linked_controlees(self.index, key);
        let Some(dev) = state.devices.get_mut(self.index) else {
            return Err(ApiError::new(METHOD, "no such device"));
        };
        if dev.rebooting {
            return Err(ApiError::new(METHOD, "device is rebooting"));
        }
        let mut session = dev
            .sessions
            .remove(key)
            .ok_or_else(|| ApiError::new(METHOD, format!("unknown session {key}")))?;
        session.halt();
        session.send(EventName::Closed);
        dev.refresh_adapter_state();
        drop(state);
        self.shared.schedule_peer_stops(controlees);
        Ok(())
    }

    /// Tear down every session on this device: `Closed` for each when
    /// `notify`, silently otherwise. Linked controlees are stopped later.
    fn drop_all_sessions(state: &mut FieldState, device: usize, notify: bool) -> Vec<(usize, SessionKey, u64)> {
        let keys: Vec<SessionKey> = state
            .devices
            .get(device)
            .map(|dev| dev.sessions.keys().cloned().collect())
            .unwrap_or_default();
        let mut controlees = Vec::new();
        for key in &keys {
            controlees.extend(state.linked_controlees(device, key));
        }
        if let Some(dev) = state.devices.get_mut(device) {
            for (_, mut session) in dev.sessions.drain() {
                session.halt();
                if notify {
                    session.send(EventName::Closed);
                }
            }
        }
        controlees
    }

    fn set_radio(&self, method: &'static str, apply: impl FnOnce(&mut DeviceState)) -> FacadeResult<()> {
        let mut state = self.shared.lock();
        let Some(dev) = state.devices.get_mut(self.index) else {
            return Err(ApiError::new(method, "no such device"));
        };
        if dev.rebooting {
            return Err(ApiError::new(method, "device is rebooting"));
        }
        let was_on = dev.radio_on();
        apply(dev);
        let now_on = dev.radio_on();
        let controlees = if was_on && !now_on {
            tracing::debug!(device = %dev.name, "radio off, closing sessions");
            Self::drop_all_sessions(&mut state, self.index, true)
        } else {
            Vec::new()
        };
        if let Some(dev) = state.devices.get_mut(self.index) {
            dev.refresh_adapter_state();
        }
        drop(state);
        self.shared.schedule_peer_stops(controlees);
        Ok(())
    }

    fn measurement_sync(
        &self,
        key: &SessionKey,
        kind: MeasurementKind,
        peer: &UwbAddress,
    ) -> FacadeResult<Option<f64>> {
        let method = match kind {
            MeasurementKind::Distance => "getDistanceMeasurement",
            MeasurementKind::AoaAzimuth => "getAoAAzimuthMeasurement",
            MeasurementKind::AoaAltitude => "getAoAAltitudeMeasurement",
            MeasurementKind::Rssi => "getRssiDbmMeasurement",
        };
        let state = self.shared.lock();
        let session = state
            .session(self.index, key)
            .ok_or_else(|| ApiError::new(method, format!("unknown session {key}")))?;
        if !session.last_report.contains(peer) {
            return Ok(None);
        }
        let config = &self.shared.config;
        let aoa = session.params.aoa_result_request() == AoaResultRequest::RequestAoaResults;
        let value = match kind {
            MeasurementKind::Distance => Some(config.distance_cm),
            MeasurementKind::AoaAzimuth | MeasurementKind::AoaAltitude => aoa.then_some(0.0),
            MeasurementKind::Rssi => {
                let jitter = config.rssi_jitter_db;
                let noise = if jitter > 0.0 {
                    rand::rng().random_range(-jitter..=jitter)
                } else {
                    0.0
                };
                Some(config.rssi_dbm + noise)
            }
        };
        Ok(value)
    }
}

impl DeviceFacade for SimulatedDevice {
    async fn open_session(&self, key: &SessionKey, params: &Value) -> FacadeResult<EventStream> {
        self.open_sync(key, params)
    }

    async fn start_session(&self, key: &SessionKey) -> FacadeResult<()> {
        self.start_sync(key)
    }

    async fn reconfigure_session(&self, key: &SessionKey, command: &Value) -> FacadeResult<()> {
        const METHOD: &str = "reconfigureFiraRangingSession";
        let command = ReconfigureCommand::from_wire(command)
            .map_err(|e| ApiError::new(METHOD, e.to_string()))?;
        match command {
            ReconfigureCommand::AddControlee {
                addresses,
                sub_sessions,
            } => self.apply_controlee_update(
                METHOD,
                key,
                ControleeUpdate::Add {
                    addresses,
                    sub_sessions,
                },
            ),
            ReconfigureCommand::RemoveControlee { addresses } => {
                self.apply_controlee_update(METHOD, key, ControleeUpdate::Remove { addresses })
            }
            ReconfigureCommand::SetBlockStride { length } => {
                self.shared.with_device(self.index, METHOD, |dev| {
                    let session = dev
                        .sessions
                        .get_mut(key)
                        .ok_or_else(|| ApiError::new(METHOD, format!("unknown session {key}")))?;
                    session.params =
                        ReconfigureCommand::block_stride(length).apply_to(&session.params);
                    session.send(EventName::Reconfigured);
                    Ok(())
                })
            }
        }
    }

    async fn add_controlee(&self, key: &SessionKey, update: &Value) -> FacadeResult<()> {
        const METHOD: &str = "addControlee";
        let update =
            ControleeUpdate::from_wire(update).map_err(|e| ApiError::new(METHOD, e.to_string()))?;
        self.apply_controlee_update(METHOD, key, update)
    }

    async fn remove_controlee(&self, key: &SessionKey, update: &Value) -> FacadeResult<()> {
        const METHOD: &str = "removeControlee";
        let update =
            ControleeUpdate::from_wire(update).map_err(|e| ApiError::new(METHOD, e.to_string()))?;
        self.apply_controlee_update(METHOD, key, update)
    }

    async fn stop_session(&self, key: &SessionKey) -> FacadeResult<()> {
        self.stop_sync(key)
    }

    async fn close_session(&self, key: &SessionKey) -> FacadeResult<()> {
        self.close_sync(key)
    }

    async fn is_peer_found(&self, key: &SessionKey, peer: &UwbAddress) -> FacadeResult<bool> {
        let state = self.shared.lock();
        let session = state.session(self.index, key).ok_or_else(|| {
            ApiError::new("isUwbPeerFound", format!("unknown session {key}"))
        })?;
        Ok(session.last_report.contains(peer))
    }

    async fn measurement(
        &self,
        key: &SessionKey,
        kind: MeasurementKind,
        peer: &UwbAddress,
    ) -> FacadeResult<Option<f64>> {
        self.measurement_sync(key, kind, peer)
    }

    async fn set_airplane_mode(&self, enabled: bool) -> FacadeResult<()> {
        self.set_radio("setAirplaneMode", |dev| dev.airplane = enabled)
    }

    async fn airplane_mode(&self) -> FacadeResult<bool> {
        self.shared
            .with_device(self.index, "isAirplaneModeOn", |dev| Ok(dev.airplane))
    }

    async fn set_uwb_enabled(&self, enabled: bool) -> FacadeResult<()> {
        self.set_radio("setUwbEnabled", |dev| dev.uwb_enabled = enabled)
    }

    async fn uwb_enabled(&self) -> FacadeResult<bool> {
        self.shared
            .with_device(self.index, "isUwbEnabled", |dev| Ok(dev.uwb_enabled))
    }

    async fn register_adapter_state_callback(&self, key: &str) -> FacadeResult<EventStream> {
        self.shared
            .with_device(self.index, "registerUwbAdapterStateCallback", |dev| {
                let (sender, stream) = event_stream::channel(key);
                sender.send(Event::adapter(dev.adapter_state(), key));
                dev.adapter_callbacks.insert(key.to_string(), sender);
                Ok(stream)
            })
    }

    async fn unregister_adapter_state_callback(&self, key: &str) -> FacadeResult<()> {
        const METHOD: &str = "unregisterUwbAdapterStateCallback";
        self.shared.with_device(self.index, METHOD, |dev| {
            dev.adapter_callbacks
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| ApiError::new(METHOD, format!("unknown callback {key}")))
        })
    }

    async fn specification_info(&self) -> FacadeResult<SpecificationInfo> {
        self.shared
            .with_device(self.index, "getSpecificationInfo", |dev| {
                Ok(SpecificationInfo {
                    fira: FiraSpecification {
                        max_ranging_session_number: dev.max_sessions,
                    },
                })
            })
    }

    async fn set_app_foreground(&self, foreground: bool) -> FacadeResult<()> {
        self.shared
            .with_device(self.index, "setAppForeground", |dev| {
                dev.foreground = foreground;
                let now = Instant::now();
                for session in dev.sessions.values_mut() {
                    session.background_since = match (foreground, session.ranging) {
                        (false, true) => Some(session.background_since.unwrap_or(now)),
                        _ => None,
                    };
                }
                tracing::debug!(device = %dev.name, foreground, "app lifecycle changed");
                Ok(())
            })
    }

    async fn reboot(&self) -> FacadeResult<()> {
        let controlees = {
            let mut state = self.shared.lock();
            let Some(dev) = state.devices.get_mut(self.index) else {
                return Err(ApiError::new("reboot", "no such device"));
            };
            if dev.rebooting {
                return Err(ApiError::new("reboot", "already rebooting"));
            }
            dev.rebooting = true;
            dev.adapter_callbacks.clear();
            tracing::info!(device = %dev.name, "rebooting");
            Self::drop_all_sessions(&mut state, self.index, false)
        };
        self.shared.schedule_peer_stops(controlees);

        tokio::time::sleep(Duration::from_millis(self.shared.config.reboot_ms)).await;

        let mut state = self.shared.lock();
        if let Some(dev) = state.devices.get_mut(self.index) {
            dev.rebooting = false;
            dev.foreground = true;
            dev.reported_state = dev.adapter_state();
            tracing::info!(device = %dev.name, "reboot complete");
        }
        Ok(())
    }
}
