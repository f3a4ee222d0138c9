//! Scenario runs against the simulated radio field on paused tokio time.

use std::time::Duration;

use fira_core::config::HarnessConfig;
use fira_core::device::Side;
use fira_core::params::{Channel, Profile, RangingParamsUpdate, UwbAddress};
use fira_core::scenarios::{BackgroundOutcome, RangingPair, Scenario};
use fira_core::sim::SimulatedField;
use fira_core::{Error, VERSION};

fn pair() -> RangingPair<fira_core::sim::SimulatedDevice> {
    RangingPair::simulated(&HarnessConfig::default())
}

#[tokio::test(start_paused = true)]
async fn every_scenario_passes_on_simulated_pair() {
    assert!(!VERSION.is_empty());
    for scenario in Scenario::ALL {
        let mut pair = pair();
        let result = scenario.run(&mut pair).await;
        assert!(result.is_ok(), "{scenario} failed: {result:?}");
        assert_eq!(pair.initiator.active_count(), 0, "{scenario} left sessions");
        assert_eq!(pair.responder.active_count(), 0, "{scenario} left sessions");
    }
}

#[tokio::test(start_paused = true)]
async fn every_scenario_passes_with_device_tracker_profile() {
    for scenario in [
        Scenario::BasicRanging,
        Scenario::StopInitiator,
        Scenario::AirplaneModeToggle,
        Scenario::MaxSessionsReject,
        Scenario::NoAoaReport,
    ] {
        let mut pair = pair().with_profile(Profile::DeviceTracker);
        assert_eq!(pair.initiator_params().ranging_interval_ms(), 240);
        scenario.run(&mut pair).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn literal_addresses_find_each_other_after_first_report() {
    let mut config = HarnessConfig::default();
    config.simulation.first_report_delay_ms = 300;
    let mut pair = RangingPair::simulated(&config);

    let session_id = pair
        .initiator
        .open_and_start(pair.initiator_params())
        .await
        .unwrap();
    pair.responder
        .open_and_start(pair.responder_params())
        .await
        .unwrap();

    let discovery = pair
        .initiator
        .verify_peer_found(session_id, &UwbAddress::from([3, 4]), Duration::from_secs(3))
        .await
        .unwrap();
    assert!(discovery.is_found(), "{discovery:?}");
    assert!(discovery.elapsed() >= Duration::from_millis(500));
    assert!(discovery.elapsed() < Duration::from_secs(3));

    pair.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_peer_is_not_found_within_budget() {
    let mut pair = pair();
    let session_id = pair.basic_ranging().await.unwrap();
    let stranger = UwbAddress::from([9, 9]);
    let discovery = pair
        .initiator
        .verify_peer_found(session_id, &stranger, Duration::from_secs(3))
        .await
        .unwrap();
    assert!(!discovery.is_found());
    assert!(discovery.elapsed() >= Duration::from_secs(3));
    assert!(discovery.elapsed() < Duration::from_secs(4));
    assert!(matches!(
        discovery.require(Side::Initiator, &stranger),
        Err(Error::VerificationFailed { .. })
    ));
    pair.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn session_limit_of_two_rejects_third_open() {
    let mut config = HarnessConfig::default();
    config.simulation.max_sessions = 2;
    let mut pair = RangingPair::simulated(&config);

    assert_eq!(pair.initiator.max_sessions().await.unwrap(), 2);
    pair.max_sessions_reject().await.unwrap();
    assert_eq!(pair.initiator.session_ids(), vec![10, 11]);
    assert_eq!(pair.responder.session_ids(), vec![10, 11]);

    pair.teardown().await.unwrap();
    assert_eq!(pair.initiator.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn uneven_limits_only_reject_on_the_smaller_device() {
    let config = HarnessConfig::default();
    let field = SimulatedField::new(config.simulation.clone());
    let mut pair = RangingPair::new(
        field.add_device_with_limit("initiator", 3),
        field.add_device_with_limit("responder", 2),
        &config,
    );

    pair.max_sessions_reject().await.unwrap();
    assert_eq!(pair.initiator.active_count(), 2);
    assert_eq!(pair.responder.active_count(), 2);
    pair.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn removed_controlee_stops_after_peer_teardown() {
    let mut pair = pair();
    let start = tokio::time::Instant::now();
    pair.add_remove_controlee(false).await.unwrap();
    // two 3 s absence checks plus the 5 s remote stop
    assert!(start.elapsed() >= Duration::from_secs(11));
    assert_eq!(
        pair.responder.session(10).map(|s| s.state()),
        Some(fira_core::session::SessionState::Stopped)
    );
    pair.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn controlee_missing_sub_session_is_never_found() {
    let mut pair = pair();
    let initiator = pair.initiator_params().update(RangingParamsUpdate {
        sts_config: Some(fira_core::params::StsConfig::ProvisionedIndividualKey),
        ..RangingParamsUpdate::default()
    });
    let responder = pair
        .responder_params()
        .update(RangingParamsUpdate {
            sts_config: Some(fira_core::params::StsConfig::ProvisionedIndividualKey),
            sub_session_id: Some(11),
            sub_session_key: Some(vec![1; 16]),
            ..RangingParamsUpdate::default()
        });
    let peer = UwbAddress::from([3, 4]);

    // The controller never learned the controlee's sub-session id.
    let session_id = pair.initiator.open_and_start(initiator).await.unwrap();
    pair.responder.open_and_start(responder).await.unwrap();
    let discovery = pair
        .initiator
        .verify_peer_found(session_id, &peer, Duration::from_secs(3))
        .await
        .unwrap();
    assert!(!discovery.is_found());
    pair.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn channel_and_preamble_overrides_range() {
    for (channel, preamble) in [(Channel::Ch9, 12), (Channel::Ch5, 11), (Channel::Ch9, 9)] {
        let mut pair = pair().with_overrides(RangingParamsUpdate {
            channel: Some(channel),
            preamble: Some(preamble),
            ..RangingParamsUpdate::default()
        });
        assert_eq!(pair.responder_params().preamble(), preamble);
        Scenario::BasicRanging.run(&mut pair).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn background_stop_arrives_after_platform_delay() {
    let mut pair = pair();
    let start = tokio::time::Instant::now();
    pair.background_lifecycle(BackgroundOutcome::StayBackground)
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(120));
    assert!(start.elapsed() < Duration::from_secs(240));
    pair.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reboot_task_is_joined_and_responder_forgotten() {
    let mut pair = pair();
    let start = tokio::time::Instant::now();
    pair.peer_reboot().await.unwrap();
    // the reboot (20 s) finished before the no-report stop (30 s)
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert_eq!(pair.responder.active_count(), 0);
    assert_eq!(pair.initiator.active_count(), 1);
    pair.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reboot_failure_is_reported_after_join() {
    let mut config = HarnessConfig::default();
    // shorter than the simulated no-report stop, so the initiator check fails
    config.timeouts.no_report_stop_ms = 1_000;
    let mut pair = RangingPair::simulated(&config);

    let start = tokio::time::Instant::now();
    let err = pair.peer_reboot().await.unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert_eq!(err.side(), Some(Side::Initiator));
    // the 20 s reboot was still joined
    assert!(start.elapsed() >= Duration::from_secs(20));
    assert_eq!(pair.responder.active_count(), 0);
    pair.teardown().await.unwrap();
}
