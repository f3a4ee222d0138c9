//! Property-based tests for ranging parameters and their wire encodings.
//!
//! Covers `RangingParams::update` preservation and immutability, the
//! open-params wire encoding, and the either/or shape of reconfigure
//! payloads.

use fira_core::params::{
    Channel, ControleeUpdate, Profile, RangingParams, RangingParamsUpdate, ReconfigureCommand,
    SubSessionKeys, UwbAddress,
};
use proptest::prelude::*;

fn short_address() -> impl Strategy<Value = UwbAddress> {
    any::<[u8; 2]>().prop_map(UwbAddress::from)
}

fn address_list() -> impl Strategy<Value = Vec<UwbAddress>> {
    prop::collection::vec(short_address(), 1..4)
}

fn profile() -> impl Strategy<Value = Profile> {
    prop_oneof![Just(Profile::DeviceTracker), Just(Profile::NearbyShare)]
}

fn base_params() -> impl Strategy<Value = RangingParams> {
    (profile(), short_address(), short_address(), any::<bool>()).prop_map(
        |(profile, addr, peer, initiator)| {
            if initiator {
                RangingParams::initiator(profile, addr, peer)
            } else {
                RangingParams::responder(profile, addr, peer)
            }
        },
    )
}

// =========================================================================
// RangingParams::update
// =========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// An empty partial update is the identity.
    #[test]
    fn prop_empty_update_is_identity(params in base_params()) {
        prop_assert_eq!(params.update(RangingParamsUpdate::default()), params);
    }

    /// Updating one field leaves every other field untouched and never
    /// mutates the source.
    #[test]
    fn prop_update_preserves_unspecified_fields(
        params in base_params(),
        session_id in 1_u32..u32::MAX,
        preamble in 9_u8..=12,
    ) {
        let before = params.clone();
        let updated = params.update(RangingParamsUpdate {
            session_id: Some(session_id),
            preamble: Some(preamble),
            ..RangingParamsUpdate::default()
        });

        prop_assert_eq!(&params, &before);
        prop_assert_eq!(updated.session_id(), session_id);
        prop_assert_eq!(updated.preamble(), preamble);
        prop_assert_eq!(updated.device_type(), params.device_type());
        prop_assert_eq!(updated.device_address(), params.device_address());
        prop_assert_eq!(updated.destination_addresses(), params.destination_addresses());
        prop_assert_eq!(updated.channel(), params.channel());
        prop_assert_eq!(updated.ranging_interval_ms(), params.ranging_interval_ms());
        prop_assert_eq!(updated.slots_per_ranging_round(), params.slots_per_ranging_round());
        prop_assert_eq!(updated.sts_config(), params.sts_config());
    }

    /// The wire form carries the address bytes and decodes back to the
    /// same parameters.
    #[test]
    fn prop_wire_encoding_is_camel_case_and_lossless(
        params in base_params(),
        ch9 in any::<bool>(),
    ) {
        let params = params.update(RangingParamsUpdate {
            channel: Some(if ch9 { Channel::Ch9 } else { Channel::Ch5 }),
            ..RangingParamsUpdate::default()
        });
        let wire = params.to_wire().unwrap();

        let addr: Vec<u8> = serde_json::from_value(wire["deviceAddress"].clone()).unwrap();
        prop_assert_eq!(addr.as_slice(), params.device_address().as_bytes());
        prop_assert_eq!(wire["sessionId"].as_u64(), Some(u64::from(params.session_id())));
        prop_assert!(wire.get("staticStsIV").is_some());
        prop_assert!(wire.get("subSessionId").is_none());
        prop_assert!(wire.get("session_id").is_none());

        prop_assert_eq!(RangingParams::from_wire(&wire).unwrap(), params);
    }
}

// =========================================================================
// Reconfigure and controlee payloads
// =========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A reconfigure payload is either an address update or a block
    /// stride, never both.
    #[test]
    fn prop_reconfigure_payload_has_one_shape(
        addresses in address_list(),
        length in 0_u32..64,
        which in 0_u8..3,
    ) {
        let command = match which {
            0 => ReconfigureCommand::add_controlee(addresses).unwrap(),
            1 => ReconfigureCommand::remove_controlee(addresses).unwrap(),
            _ => ReconfigureCommand::block_stride(length),
        };
        let wire = command.to_wire();
        let has_addresses = wire.get("addressList").is_some();
        let has_stride = wire.get("blockStrideLength").is_some();
        prop_assert!(has_addresses != has_stride);
        prop_assert_eq!(ReconfigureCommand::from_wire(&wire).unwrap(), command);
    }

    /// Mixing both shapes is rejected on decode.
    #[test]
    fn prop_mixed_reconfigure_payload_rejected(
        addresses in address_list(),
        length in 0_u32..64,
    ) {
        let mut wire = ReconfigureCommand::add_controlee(addresses).unwrap().to_wire();
        wire["blockStrideLength"] = serde_json::json!(length);
        prop_assert!(ReconfigureCommand::from_wire(&wire).is_err());
    }

    /// Sub-session lists travel with an add and decode intact.
    #[test]
    fn prop_controlee_add_keeps_sub_sessions(
        addresses in address_list(),
        id in any::<u32>(),
        key in prop::collection::vec(any::<u8>(), 16..=32),
    ) {
        let keys = SubSessionKeys { ids: vec![id], key };
        let update = ControleeUpdate::add(addresses.clone(), Some(keys.clone())).unwrap();
        let wire = update.to_wire();
        prop_assert!(wire.get("subSessionIdList").is_some());
        prop_assert!(wire.get("subSessionKeyList").is_some());

        match ControleeUpdate::from_wire(&wire).unwrap() {
            ControleeUpdate::Add { addresses: decoded, sub_sessions } => {
                prop_assert_eq!(decoded, addresses);
                prop_assert_eq!(sub_sessions, Some(keys));
            }
            ControleeUpdate::Remove { .. } => prop_assert!(false, "decoded as remove"),
        }
    }
}

#[test]
fn empty_controlee_list_is_rejected() {
    assert!(ControleeUpdate::remove(Vec::new()).is_err());
    assert!(ReconfigureCommand::add_controlee(Vec::new()).is_err());
}
