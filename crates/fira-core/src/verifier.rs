//! Peer discovery checks.
//!
//! Discovery is an outcome, not an exception: scenarios assert both that a
//! peer *is* found and that it *is not* (e.g. before a controlee has been
//! added), so [`verify_peer_found`] returns [`PeerDiscovery`] and the caller
//! picks which outcome is a failure.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::device::Side;
use crate::error::{Error, Result};
use crate::event::EventName;
use crate::facade::DeviceFacade;
use crate::params::UwbAddress;
use crate::session::RangingSession;

/// Why a peer was not found before the deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NotFoundReason {
    /// No ranging report arrived in the remaining time.
    NoReports { last_observed: Option<EventName> },
    /// Reports arrived but none contained the peer.
    PeerAbsent { reports: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PeerDiscovery {
    Found {
        elapsed: Duration,
        reports: usize,
    },
    NotFound {
        reason: NotFoundReason,
        elapsed: Duration,
    },
}

impl PeerDiscovery {
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Found { elapsed, .. } | Self::NotFound { elapsed, .. } => *elapsed,
        }
    }

    /// Turn `NotFound` into [`Error::VerificationFailed`].
    pub fn require(self, side: Side, peer: &UwbAddress) -> Result<Duration> {
        match self {
            Self::Found { elapsed, .. } => Ok(elapsed),
            Self::NotFound { reason, elapsed } => Err(Error::VerificationFailed {
                side,
                condition: format!("peer {peer} found in ranging report ({reason:?})"),
                elapsed_ms: millis(elapsed),
            }),
        }
    }

    /// Turn `Found` into [`Error::VerificationFailed`].
    pub fn require_absent(self, side: Side, peer: &UwbAddress) -> Result<Duration> {
        match self {
            Self::NotFound { elapsed, .. } => Ok(elapsed),
            Self::Found { elapsed, .. } => Err(Error::VerificationFailed {
                side,
                condition: format!("peer {peer} absent from ranging reports"),
                elapsed_ms: millis(elapsed),
            }),
        }
    }
}

/// Consume ranging reports until one contains `peer` or `timeout` elapses.
///
/// Each wait is bounded by the remaining budget and there is no delay
/// between iterations, so the whole call never exceeds `timeout` by more
/// than one facade round trip.
pub async fn verify_peer_found<F: DeviceFacade>(
    session: &mut RangingSession<F>,
    peer: &UwbAddress,
    timeout: Duration,
) -> Result<PeerDiscovery> {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut reports = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(wait) = session.next_report(remaining).await {
            tracing::debug!(
                side = %session.side(),
                session_id = session.id(),
                %peer,
                reports,
                elapsed_ms = millis(start.elapsed()),
                "no ranging report before deadline"
            );
            let reason = if reports == 0 {
                NotFoundReason::NoReports {
                    last_observed: wait.last_observed,
                }
            } else {
                NotFoundReason::PeerAbsent { reports }
            };
            return Ok(PeerDiscovery::NotFound {
                reason,
                elapsed: start.elapsed(),
            });
        }
        reports += 1;

        if session.peer_in_report(peer).await? {
            let elapsed = start.elapsed();
            tracing::info!(
                side = %session.side(),
                session_id = session.id(),
                %peer,
                reports,
                elapsed_ms = millis(elapsed),
                "peer found"
            );
            return Ok(PeerDiscovery::Found { elapsed, reports });
        }

        if Instant::now() >= deadline {
            return Ok(PeerDiscovery::NotFound {
                reason: NotFoundReason::PeerAbsent { reports },
                elapsed: start.elapsed(),
            });
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_maps_not_found_to_verification_failure() {
        let outcome = PeerDiscovery::NotFound {
            reason: NotFoundReason::PeerAbsent { reports: 12 },
            elapsed: Duration::from_secs(3),
        };
        let err = outcome
            .require(Side::Initiator, &UwbAddress::from([3, 4]))
            .unwrap_err();
        match err {
            Error::VerificationFailed {
                side,
                condition,
                elapsed_ms,
            } => {
                assert_eq!(side, Side::Initiator);
                assert!(condition.contains("[3, 4]"));
                assert_eq!(elapsed_ms, 3000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn require_absent_maps_found_to_failure() {
        let found = PeerDiscovery::Found {
            elapsed: Duration::from_millis(200),
            reports: 1,
        };
        assert!(found.is_found());
        assert!(
            found
                .clone()
                .require_absent(Side::Initiator, &UwbAddress::from([4, 5]))
                .is_err()
        );
        assert_eq!(
            found
                .require(Side::Initiator, &UwbAddress::from([4, 5]))
                .unwrap(),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = PeerDiscovery::NotFound {
            reason: NotFoundReason::NoReports {
                last_observed: Some(EventName::Stopped),
            },
            elapsed: Duration::from_secs(1),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "not_found");
        assert_eq!(json["reason"]["kind"], "no_reports");
        assert_eq!(json["reason"]["last_observed"], "Stopped");
    }
}
