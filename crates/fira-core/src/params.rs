//! FiRA session configuration value objects and their wire encodings.
//!
//! [`RangingParams`] is the open-session payload, [`ReconfigureCommand`] and
//! [`ControleeUpdate`] are the multicast-list/interval updates sent to a live
//! session. All three are immutable: updates produce new values.
//!
//! Wire keys are camelCase and the integer codes match the FiRA constants the
//! remote facade expects.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// Default session id used when a scenario does not pick one.
pub const DEFAULT_SESSION_ID: u32 = 10;

/// Short (2-byte) or extended (8-byte) UWB MAC address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UwbAddress(Vec<u8>);

impl UwbAddress {
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[u8; N]> for UwbAddress {
    fn from(bytes: [u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for UwbAddress {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for UwbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Declares a FiRA constant enum that travels as its integer code.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "u8", try_from = "u8")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => $code),+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = String;

            fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    other => Err(format!("invalid {} code: {other}", stringify!($name))),
                }
            }
        }
    };
}

wire_enum! {
    /// Ranging device type.
    DeviceType { Controlee = 0, Controller = 1 }
}

wire_enum! {
    /// Ranging device role.
    DeviceRole { Responder = 0, Initiator = 1 }
}

wire_enum! {
    /// UWB channel.
    Channel { Ch5 = 5, Ch9 = 9 }
}

wire_enum! {
    MultiNodeMode { Unicast = 0, OneToMany = 1 }
}

wire_enum! {
    HoppingMode { Disabled = 0, FiraHopping = 1 }
}

wire_enum! {
    /// Ranging round usage (single/double sided two-way ranging).
    RangingRoundUsage {
        SsTwrDeferred = 1,
        DsTwrDeferred = 2,
        SsTwrNonDeferred = 3,
        DsTwrNonDeferred = 4,
    }
}

wire_enum! {
    MacAddressMode { Short = 0, Extended = 2 }
}

wire_enum! {
    /// Whether the session reports angle-of-arrival results.
    AoaResultRequest { NoAoaReport = 0, RequestAoaResults = 1 }
}

wire_enum! {
    /// Scrambled timestamp sequence configuration.
    StsConfig { Static = 0, Provisioned = 3, ProvisionedIndividualKey = 4 }
}

wire_enum! {
    /// Multicast list update action codes.
    MulticastAction {
        Add = 0,
        Delete = 1,
        /// Provisioned STS add with 16-byte sub-session keys.
        AddWithShortKey = 2,
        /// Provisioned STS add with 32-byte sub-session keys.
        AddWithLongKey = 3,
    }
}

/// Named parameter presets used by the ranging scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Unicast, 240 ms interval, 6 slots per round.
    DeviceTracker,
    /// One-to-many, 200 ms interval, 20 slots per round.
    NearbyShare,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceTracker => write!(f, "device_tracker"),
            Self::NearbyShare => write!(f, "nearby_share"),
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "device_tracker" => Ok(Self::DeviceTracker),
            "nearby_share" => Ok(Self::NearbyShare),
            _ => Err(format!(
                "unknown profile: {s}. Expected one of: device_tracker, nearby_share"
            )),
        }
    }
}

/// Open-session parameters.
///
/// Immutable once built; [`RangingParams::update`] returns a modified copy.
/// The serde representation is the camelCase wire payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangingParams {
    device_type: DeviceType,
    device_role: DeviceRole,
    device_address: UwbAddress,
    destination_addresses: Vec<UwbAddress>,
    channel: Channel,
    preamble: u8,
    ranging_round_usage: RangingRoundUsage,
    mac_address_mode: MacAddressMode,
    initiation_time_ms: u32,
    slot_duration_rstu: u32,
    slots_per_ranging_round: u32,
    ranging_interval_ms: u32,
    hopping_mode: HoppingMode,
    max_ranging_round_retries: u32,
    in_band_termination_attempt_count: u32,
    aoa_result_request: AoaResultRequest,
    block_stride_length: u32,
    session_id: u32,
    multi_node_mode: MultiNodeMode,
    vendor_id: Vec<u8>,
    #[serde(rename = "staticStsIV")]
    static_sts_iv: Vec<u8>,
    sts_config: StsConfig,
    session_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_session_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_session_key: Option<Vec<u8>>,
}

/// Partial update for [`RangingParams`]; `None` fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangingParamsUpdate {
    pub device_type: Option<DeviceType>,
    pub device_role: Option<DeviceRole>,
    pub device_address: Option<UwbAddress>,
    pub destination_addresses: Option<Vec<UwbAddress>>,
    pub channel: Option<Channel>,
    pub preamble: Option<u8>,
    pub ranging_round_usage: Option<RangingRoundUsage>,
    pub mac_address_mode: Option<MacAddressMode>,
    pub initiation_time_ms: Option<u32>,
    pub slot_duration_rstu: Option<u32>,
    pub slots_per_ranging_round: Option<u32>,
    pub ranging_interval_ms: Option<u32>,
    pub hopping_mode: Option<HoppingMode>,
    pub max_ranging_round_retries: Option<u32>,
    pub in_band_termination_attempt_count: Option<u32>,
    pub aoa_result_request: Option<AoaResultRequest>,
    pub block_stride_length: Option<u32>,
    pub session_id: Option<u32>,
    pub multi_node_mode: Option<MultiNodeMode>,
    pub vendor_id: Option<Vec<u8>>,
    pub static_sts_iv: Option<Vec<u8>>,
    pub sts_config: Option<StsConfig>,
    pub session_key: Option<Vec<u8>>,
    pub sub_session_id: Option<u32>,
    pub sub_session_key: Option<Vec<u8>>,
}

impl RangingParamsUpdate {
    #[must_use]
    pub fn session_id(session_id: u32) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn device_address(address: impl Into<UwbAddress>) -> Self {
        Self {
            device_address: Some(address.into()),
            ..Self::default()
        }
    }
}

impl RangingParams {
    /// Build params with the FiRA defaults for everything but addressing.
    #[must_use]
    pub fn new(
        device_role: DeviceRole,
        device_type: DeviceType,
        device_address: impl Into<UwbAddress>,
        destination_addresses: Vec<UwbAddress>,
    ) -> Self {
        Self {
            device_type,
            device_role,
            device_address: device_address.into(),
            destination_addresses,
            channel: Channel::Ch9,
            preamble: 10,
            ranging_round_usage: RangingRoundUsage::DsTwrDeferred,
            mac_address_mode: MacAddressMode::Short,
            initiation_time_ms: 0,
            slot_duration_rstu: 2400,
            slots_per_ranging_round: 30,
            ranging_interval_ms: 200,
            hopping_mode: HoppingMode::FiraHopping,
            max_ranging_round_retries: 0,
            in_band_termination_attempt_count: 1,
            aoa_result_request: AoaResultRequest::RequestAoaResults,
            block_stride_length: 0,
            session_id: DEFAULT_SESSION_ID,
            multi_node_mode: MultiNodeMode::OneToMany,
            vendor_id: vec![5, 6],
            static_sts_iv: vec![5, 6, 7, 8, 9, 10],
            sts_config: StsConfig::Static,
            session_key: vec![1, 2, 3, 4, 5, 6, 7, 8, 8, 7, 6, 5, 4, 3, 2, 1],
            sub_session_id: None,
            sub_session_key: None,
        }
    }

    /// Controller/initiator params for a profile.
    #[must_use]
    pub fn initiator(profile: Profile, address: UwbAddress, peer: UwbAddress) -> Self {
        Self::new(
            DeviceRole::Initiator,
            DeviceType::Controller,
            address,
            vec![peer],
        )
        .update(profile.update())
    }

    /// Controlee/responder params for a profile.
    #[must_use]
    pub fn responder(profile: Profile, address: UwbAddress, peer: UwbAddress) -> Self {
        Self::new(
            DeviceRole::Responder,
            DeviceType::Controlee,
            address,
            vec![peer],
        )
        .update(profile.update())
    }

    /// Return a copy with every `Some` field of `partial` applied.
    #[must_use]
    pub fn update(&self, partial: RangingParamsUpdate) -> Self {
        let mut next = self.clone();
        let RangingParamsUpdate {
            device_type,
            device_role,
            device_address,
            destination_addresses,
            channel,
            preamble,
            ranging_round_usage,
            mac_address_mode,
            initiation_time_ms,
            slot_duration_rstu,
            slots_per_ranging_round,
            ranging_interval_ms,
            hopping_mode,
            max_ranging_round_retries,
            in_band_termination_attempt_count,
            aoa_result_request,
            block_stride_length,
            session_id,
            multi_node_mode,
            vendor_id,
            static_sts_iv,
            sts_config,
            session_key,
            sub_session_id,
            sub_session_key,
        } = partial;

        macro_rules! apply {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(value) = $field { next.$field = value; })+
            };
        }
        apply!(
            device_type,
            device_role,
            device_address,
            destination_addresses,
            channel,
            preamble,
            ranging_round_usage,
            mac_address_mode,
            initiation_time_ms,
            slot_duration_rstu,
            slots_per_ranging_round,
            ranging_interval_ms,
            hopping_mode,
            max_ranging_round_retries,
            in_band_termination_attempt_count,
            aoa_result_request,
            block_stride_length,
            session_id,
            multi_node_mode,
            vendor_id,
            static_sts_iv,
            sts_config,
            session_key,
        );
        if sub_session_id.is_some() {
            next.sub_session_id = sub_session_id;
        }
        if sub_session_key.is_some() {
            next.sub_session_key = sub_session_key;
        }
        next
    }

    /// Check the fields the remote service would reject.
    pub fn validate(&self) -> Result<()> {
        let expected_len = match self.mac_address_mode {
            MacAddressMode::Short => 2,
            MacAddressMode::Extended => 8,
        };
        if self.device_address.len() != expected_len {
            return Err(Error::InvalidParams(format!(
                "device address {} must be {expected_len} bytes",
                self.device_address
            )));
        }
        if self.destination_addresses.is_empty() {
            return Err(Error::InvalidParams(
                "at least one destination address is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .destination_addresses
            .iter()
            .find(|addr| addr.len() != expected_len)
        {
            return Err(Error::InvalidParams(format!(
                "destination address {bad} must be {expected_len} bytes"
            )));
        }
        if !(9..=12).contains(&self.preamble) {
            return Err(Error::InvalidParams(format!(
                "preamble code index {} outside 9..=12",
                self.preamble
            )));
        }
        if self.ranging_interval_ms == 0 || self.slots_per_ranging_round == 0 {
            return Err(Error::InvalidParams(
                "ranging interval and slots per round must be non-zero".to_string(),
            ));
        }
        if self.sts_config == StsConfig::ProvisionedIndividualKey
            && self.device_type == DeviceType::Controlee
            && self.sub_session_id.is_none()
        {
            return Err(Error::InvalidParams(
                "individual-key provisioned STS controlee needs a sub-session id".to_string(),
            ));
        }
        Ok(())
    }

    /// Encode as the camelCase open-session payload.
    pub fn to_wire(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode an open-session payload.
    pub fn from_wire(value: &Value) -> Result<Self> {
        Ok(Self::deserialize(value)?)
    }

    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    #[must_use]
    pub fn device_role(&self) -> DeviceRole {
        self.device_role
    }

    #[must_use]
    pub fn device_address(&self) -> &UwbAddress {
        &self.device_address
    }

    #[must_use]
    pub fn destination_addresses(&self) -> &[UwbAddress] {
        &self.destination_addresses
    }

    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    #[must_use]
    pub fn preamble(&self) -> u8 {
        self.preamble
    }

    #[must_use]
    pub fn slots_per_ranging_round(&self) -> u32 {
        self.slots_per_ranging_round
    }

    #[must_use]
    pub fn ranging_interval_ms(&self) -> u32 {
        self.ranging_interval_ms
    }

    #[must_use]
    pub fn aoa_result_request(&self) -> AoaResultRequest {
        self.aoa_result_request
    }

    #[must_use]
    pub fn block_stride_length(&self) -> u32 {
        self.block_stride_length
    }

    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    #[must_use]
    pub fn multi_node_mode(&self) -> MultiNodeMode {
        self.multi_node_mode
    }

    #[must_use]
    pub fn sts_config(&self) -> StsConfig {
        self.sts_config
    }

    #[must_use]
    pub fn sub_session_id(&self) -> Option<u32> {
        self.sub_session_id
    }

    #[must_use]
    pub fn sub_session_key(&self) -> Option<&[u8]> {
        self.sub_session_key.as_deref()
    }
}

impl Profile {
    /// Fields that distinguish this profile from the FiRA defaults.
    #[must_use]
    pub fn update(self) -> RangingParamsUpdate {
        match self {
            Self::DeviceTracker => RangingParamsUpdate {
                multi_node_mode: Some(MultiNodeMode::Unicast),
                initiation_time_ms: Some(100),
                ranging_interval_ms: Some(240),
                slots_per_ranging_round: Some(6),
                in_band_termination_attempt_count: Some(3),
                ..RangingParamsUpdate::default()
            },
            Self::NearbyShare => RangingParamsUpdate {
                initiation_time_ms: Some(100),
                ranging_interval_ms: Some(200),
                slots_per_ranging_round: Some(20),
                in_band_termination_attempt_count: Some(3),
                ..RangingParamsUpdate::default()
            },
        }
    }
}

/// Provisioned-STS material for individually keyed controlees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubSessionKeys {
    pub ids: Vec<u32>,
    pub key: Vec<u8>,
}

/// A reconfiguration sent to a live session. Exactly one variant is active,
/// so the encoding can never carry both an address list and a block stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfigureCommand {
    AddControlee {
        addresses: Vec<UwbAddress>,
        sub_sessions: Option<SubSessionKeys>,
    },
    RemoveControlee {
        addresses: Vec<UwbAddress>,
    },
    SetBlockStride {
        length: u32,
    },
}

impl ReconfigureCommand {
    pub fn add_controlee(addresses: Vec<UwbAddress>) -> Result<Self> {
        ensure_addresses(&addresses)?;
        Ok(Self::AddControlee {
            addresses,
            sub_sessions: None,
        })
    }

    pub fn add_controlee_with_keys(
        addresses: Vec<UwbAddress>,
        sub_sessions: SubSessionKeys,
    ) -> Result<Self> {
        ensure_addresses(&addresses)?;
        Ok(Self::AddControlee {
            addresses,
            sub_sessions: Some(sub_sessions),
        })
    }

    pub fn remove_controlee(addresses: Vec<UwbAddress>) -> Result<Self> {
        ensure_addresses(&addresses)?;
        Ok(Self::RemoveControlee { addresses })
    }

    #[must_use]
    pub fn block_stride(length: u32) -> Self {
        Self::SetBlockStride { length }
    }

    /// Encode as `{action, addressList[, subSessionIdList, subSessionKeyList]}`
    /// or `{blockStrideLength}`.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Self::AddControlee {
                addresses,
                sub_sessions,
            } => encode_address_update(MulticastAction::Add, addresses, sub_sessions.as_ref()),
            Self::RemoveControlee { addresses } => {
                encode_address_update(MulticastAction::Delete, addresses, None)
            }
            Self::SetBlockStride { length } => json!({ "blockStrideLength": length }),
        }
    }

    /// Decode a reconfigure payload, rejecting ones that mix both shapes.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::InvalidParams("reconfigure payload must be an object".into()))?;
        let has_addresses = object.contains_key("addressList");
        let has_stride = object.contains_key("blockStrideLength");
        match (has_addresses, has_stride) {
            (true, true) => Err(Error::InvalidParams(
                "reconfigure payload sets both addressList and blockStrideLength".into(),
            )),
            (false, true) => {
                let length = object
                    .get("blockStrideLength")
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| Error::InvalidParams("invalid blockStrideLength".into()))?;
                Ok(Self::SetBlockStride { length })
            }
            (true, false) => match ControleeUpdate::from_wire(value)? {
                ControleeUpdate::Add {
                    addresses,
                    sub_sessions,
                } => Ok(Self::AddControlee {
                    addresses,
                    sub_sessions,
                }),
                ControleeUpdate::Remove { addresses } => Ok(Self::RemoveControlee { addresses }),
            },
            (false, false) => Err(Error::InvalidParams(
                "reconfigure payload has neither addressList nor blockStrideLength".into(),
            )),
        }
    }
}

/// Controlee list change used by the dedicated add/remove verbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControleeUpdate {
    Add {
        addresses: Vec<UwbAddress>,
        sub_sessions: Option<SubSessionKeys>,
    },
    Remove {
        addresses: Vec<UwbAddress>,
    },
}

impl ReconfigureCommand {
    /// `params` as they stand once this command has been confirmed.
    #[must_use]
    pub fn apply_to(&self, params: &RangingParams) -> RangingParams {
        match self {
            Self::AddControlee {
                addresses,
                sub_sessions,
            } => ControleeUpdate::Add {
                addresses: addresses.clone(),
                sub_sessions: sub_sessions.clone(),
            }
            .apply_to(params),
            Self::RemoveControlee { addresses } => ControleeUpdate::Remove {
                addresses: addresses.clone(),
            }
            .apply_to(params),
            Self::SetBlockStride { length } => params.update(RangingParamsUpdate {
                block_stride_length: Some(*length),
                ..RangingParamsUpdate::default()
            }),
        }
    }
}

impl ControleeUpdate {
    pub fn add(addresses: Vec<UwbAddress>, sub_sessions: Option<SubSessionKeys>) -> Result<Self> {
        ensure_addresses(&addresses)?;
        Ok(Self::Add {
            addresses,
            sub_sessions,
        })
    }

    pub fn remove(addresses: Vec<UwbAddress>) -> Result<Self> {
        ensure_addresses(&addresses)?;
        Ok(Self::Remove { addresses })
    }

    #[must_use]
    pub fn addresses(&self) -> &[UwbAddress] {
        match self {
            Self::Add { addresses, .. } | Self::Remove { addresses } => addresses,
        }
    }

    /// `params` with this update folded into its destination list. Added
    /// addresses already present are not repeated.
    #[must_use]
    pub fn apply_to(&self, params: &RangingParams) -> RangingParams {
        let mut destinations = params.destination_addresses().to_vec();
        match self {
            Self::Add { addresses, .. } => {
                for addr in addresses {
                    if !destinations.contains(addr) {
                        destinations.push(addr.clone());
                    }
                }
            }
            Self::Remove { addresses } => destinations.retain(|addr| !addresses.contains(addr)),
        }
        params.update(RangingParamsUpdate {
            destination_addresses: Some(destinations),
            ..RangingParamsUpdate::default()
        })
    }

    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Add {
                addresses,
                sub_sessions,
            } => encode_address_update(MulticastAction::Add, addresses, sub_sessions.as_ref()),
            Self::Remove { addresses } => {
                encode_address_update(MulticastAction::Delete, addresses, None)
            }
        }
    }

    pub fn from_wire(value: &Value) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            action: MulticastAction,
            address_list: Vec<UwbAddress>,
            #[serde(default)]
            sub_session_id_list: Option<Vec<u32>>,
            #[serde(default)]
            sub_session_key_list: Option<Vec<u8>>,
        }

        let wire = Wire::deserialize(value)?;
        ensure_addresses(&wire.address_list)?;
        match wire.action {
            MulticastAction::Delete => Ok(Self::Remove {
                addresses: wire.address_list,
            }),
            MulticastAction::Add
            | MulticastAction::AddWithShortKey
            | MulticastAction::AddWithLongKey => {
                let sub_sessions = match (wire.sub_session_id_list, wire.sub_session_key_list) {
                    (None, None) => None,
                    (ids, key) => Some(SubSessionKeys {
                        ids: ids.unwrap_or_default(),
                        key: key.unwrap_or_default(),
                    }),
                };
                Ok(Self::Add {
                    addresses: wire.address_list,
                    sub_sessions,
                })
            }
        }
    }
}

fn ensure_addresses(addresses: &[UwbAddress]) -> Result<()> {
    if addresses.is_empty() {
        return Err(Error::InvalidParams(
            "address list must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn encode_address_update(
    action: MulticastAction,
    addresses: &[UwbAddress],
    sub_sessions: Option<&SubSessionKeys>,
) -> Value {
    let mut map = Map::new();
    map.insert("action".to_string(), json!(u8::from(action)));
    map.insert("addressList".to_string(), json!(addresses));
    if let Some(keys) = sub_sessions {
        map.insert("subSessionIdList".to_string(), json!(keys.ids));
        map.insert("subSessionKeyList".to_string(), json!(keys.key));
    }
    Value::Object(map)
}
