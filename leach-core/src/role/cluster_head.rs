//! Cluster-head round: advertise, collect station reports, relay to base.
//!
//! Uplink is single-attempt and unacknowledged. If the base station cannot
//! be reached the round's aggregate is dropped.

use crate::aggregate::AggregateBuffer;
use crate::codec;
use crate::config::NodeConfig;
use crate::hal::{Datagram, JoinStatus, RadioStack};
use crate::types::{broadcast_for, NodeIdentity};
use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Shortest wait per receive attempt; keeps the window advancing in virtual time
const MIN_POLL_WAIT: Duration = Duration::from_millis(1);

/// Phases of a cluster-head round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AdvertiseOpen,
    CollectingReports { deadline: Instant },
    Relay,
    Done,
}

/// How a cluster-head round ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ClusterHeadOutcome {
    /// Access point could not be created
    ApFailed,
    /// Report listener could not be opened
    ListenFailed { error: String },
    /// Window closed with no valid reports; nothing to relay
    NothingCollected { invalid: usize },
    /// Aggregate sent to the base station
    Relayed {
        records: usize,
        invalid: usize,
        refused: usize,
        bytes: usize,
    },
    /// Base station unreachable or send failed; aggregate dropped
    UplinkFailed { records: usize, reason: String },
}

/// Cluster-head state machine for one round
#[derive(Debug)]
pub struct ClusterHeadRound {
    identity: NodeIdentity,
    phase: Phase,
    buffer: AggregateBuffer,
    invalid: usize,
    outcome: Option<ClusterHeadOutcome>,
    ap_secret: String,
    ap_channel: u8,
    ap_max_clients: u8,
    port: u16,
    window: Duration,
    poll_interval: Duration,
    base_station: String,
    join_timeout: Duration,
}

impl ClusterHeadRound {
    pub fn new(identity: NodeIdentity, config: &NodeConfig) -> Self {
        Self {
            identity,
            phase: Phase::AdvertiseOpen,
            buffer: AggregateBuffer::new(config.aggregate_capacity),
            invalid: 0,
            outcome: None,
            ap_secret: config.network_secret.clone(),
            ap_channel: config.ap_channel,
            ap_max_clients: config.ap_max_clients,
            port: config.report_port,
            window: config.collection_window,
            poll_interval: config.poll_interval,
            base_station: config.base_station_name.clone(),
            join_timeout: config.join_timeout,
        }
    }

    /// Run every phase until the round is done
    pub async fn run<R: RadioStack>(mut self, radio: &mut R) -> ClusterHeadOutcome {
        while self.phase != Phase::Done {
            self.phase = self.step(radio).await;
        }
        self.outcome
            .unwrap_or(ClusterHeadOutcome::NothingCollected { invalid: 0 })
    }

    async fn step<R: RadioStack>(&mut self, radio: &mut R) -> Phase {
        match self.phase {
            Phase::AdvertiseOpen => self.advertise(radio).await,
            Phase::CollectingReports { deadline } => self.collect(radio, deadline).await,
            Phase::Relay => self.relay(radio).await,
            Phase::Done => Phase::Done,
        }
    }

    fn finish(&mut self, outcome: ClusterHeadOutcome) -> Phase {
        self.outcome = Some(outcome);
        Phase::Done
    }

    async fn advertise<R: RadioStack>(&mut self, radio: &mut R) -> Phase {
        let name = self.identity.name();
        if !radio
            .start_ap(&name, &self.ap_secret, self.ap_channel, self.ap_max_clients)
            .await
        {
            warn!("Head: Could not start access point \"{}\"", name);
            return self.finish(ClusterHeadOutcome::ApFailed);
        }

        if let Err(e) = radio.listen(self.port) {
            warn!("Head: Could not listen on port {}: {}", self.port, e);
            return self.finish(ClusterHeadOutcome::ListenFailed {
                error: e.to_string(),
            });
        }

        info!(
            "Head: Advertising \"{}\", collecting for {:?} on port {}",
            name, self.window, self.port
        );
        Phase::CollectingReports {
            deadline: Instant::now() + self.window,
        }
    }

    async fn collect<R: RadioStack>(&mut self, radio: &mut R, deadline: Instant) -> Phase {
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = (deadline - now).min(self.poll_interval).max(MIN_POLL_WAIT);

            match timeout(wait, radio.recv()).await {
                Ok(Some(datagram)) => self.accept(datagram),
                Ok(None) => {
                    warn!("Head: Listener closed before the window ended");
                    break;
                }
                Err(_) => {}
            }
            tokio::task::yield_now().await;
        }

        info!(
            "Head: Window closed with {} reports ({} invalid, {} refused)",
            self.buffer.len(),
            self.invalid,
            self.buffer.refused()
        );

        if self.buffer.is_empty() {
            return self.finish(ClusterHeadOutcome::NothingCollected {
                invalid: self.invalid,
            });
        }
        Phase::Relay
    }

    fn accept(&mut self, datagram: Datagram) {
        match codec::decode_report(&datagram.payload) {
            Ok(report) => {
                debug!(
                    "Head: Report from {} ({}) reading={}",
                    report.sender, datagram.from, report.reading
                );
                if !self.buffer.push(report) {
                    warn!("Head: Aggregate full, refusing report from {}", report.sender);
                }
            }
            Err(e) => {
                self.invalid += 1;
                debug!("Head: Dropping datagram from {}: {}", datagram.from, e);
            }
        }
    }

    async fn relay<R: RadioStack>(&mut self, radio: &mut R) -> Phase {
        let records = self.buffer.len();
        let payload = match self.buffer.encode() {
            Ok(p) => p,
            Err(e) => {
                return self.finish(ClusterHeadOutcome::UplinkFailed {
                    records,
                    reason: e.to_string(),
                })
            }
        };

        let status = radio
            .join(&self.base_station, &self.ap_secret, self.join_timeout)
            .await;
        if status != JoinStatus::Connected {
            warn!(
                "Head: Base station \"{}\" unreachable ({:?}), dropping {} reports",
                self.base_station, status, records
            );
            return self.finish(ClusterHeadOutcome::UplinkFailed {
                records,
                reason: format!("join {:?}", status),
            });
        }

        let Some(dns) = radio.dns_ip() else {
            warn!("Head: No address assigned by base station");
            return self.finish(ClusterHeadOutcome::UplinkFailed {
                records,
                reason: "no address".to_string(),
            });
        };
        let target = SocketAddrV4::new(broadcast_for(dns), self.port);

        match radio.send_datagram(target, &payload).await {
            Ok(()) => {
                info!(
                    "Head: Relayed {} reports ({} bytes) to {}",
                    records,
                    payload.len(),
                    target
                );
                self.finish(ClusterHeadOutcome::Relayed {
                    records,
                    invalid: self.invalid,
                    refused: self.buffer.refused(),
                    bytes: payload.len(),
                })
            }
            Err(e) => {
                warn!("Head: Uplink to {} failed: {}", target, e);
                self.finish(ClusterHeadOutcome::UplinkFailed {
                    records,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimMedium;
    use std::net::Ipv4Addr;

    fn head_id() -> NodeIdentity {
        NodeIdentity::new([0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x01])
    }

    fn config() -> NodeConfig {
        NodeConfig::default().with_collection_window(Duration::from_secs(5))
    }

    async fn send_at(medium: &SimMedium, after: Duration, network: &str, payload: &[u8]) {
        tokio::time::sleep(after).await;
        medium.inject(network, config().report_port, Ipv4Addr::new(192, 168, 1, 2), payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_valid_reports_and_relays() {
        let medium = SimMedium::new();
        medium.add_base_station("BASE_STATION", "leach-cluster");
        let mut radio = medium.radio(head_id());
        let head = ClusterHeadRound::new(head_id(), &config());
        let ap = head_id().name();

        let (outcome, _) = tokio::join!(head.run(&mut radio), async {
            send_at(&medium, Duration::from_secs(1), &ap, b";000000000001:100").await;
            send_at(&medium, Duration::from_secs(1), &ap, b"garbage").await;
            send_at(&medium, Duration::from_secs(1), &ap, b";000000000002:200").await;
        });

        assert_eq!(
            outcome,
            ClusterHeadOutcome::Relayed {
                records: 2,
                invalid: 1,
                refused: 0,
                bytes: 34,
            }
        );
        let inbox = medium.base_inbox();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].payload, b";000000000001:100;000000000002:200");
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_bounded() {
        let medium = SimMedium::new();
        let mut radio = medium.radio(head_id());
        let start = Instant::now();

        let outcome = ClusterHeadRound::new(head_id(), &config())
            .run(&mut radio)
            .await;

        assert_eq!(outcome, ClusterHeadOutcome::NothingCollected { invalid: 0 });
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_still_closes_window() {
        let medium = SimMedium::new();
        let mut radio = medium.radio(head_id());
        // validate() rejects this; the window must end regardless
        let config = NodeConfig {
            poll_interval: Duration::ZERO,
            ..config().with_collection_window(Duration::from_secs(1))
        };
        let start = Instant::now();

        let outcome = timeout(
            Duration::from_secs(5),
            ClusterHeadRound::new(head_id(), &config).run(&mut radio),
        )
        .await
        .expect("collection window never closed");

        assert_eq!(outcome, ClusterHeadOutcome::NothingCollected { invalid: 0 });
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ap_failure_ends_round() {
        let medium = SimMedium::new();
        medium.fail_access_point(head_id());
        let mut radio = medium.radio(head_id());

        let outcome = ClusterHeadRound::new(head_id(), &config())
            .run(&mut radio)
            .await;
        assert_eq!(outcome, ClusterHeadOutcome::ApFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_base_drops_aggregate() {
        let medium = SimMedium::new();
        let mut radio = medium.radio(head_id());
        let head = ClusterHeadRound::new(head_id(), &config());
        let ap = head_id().name();

        let (outcome, _) = tokio::join!(head.run(&mut radio), async {
            send_at(&medium, Duration::from_secs(2), &ap, b";000000000001:5").await;
        });

        assert!(matches!(
            outcome,
            ClusterHeadOutcome::UplinkFailed { records: 1, .. }
        ));
        assert!(medium.base_inbox().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_refuses_extra_reports() {
        let medium = SimMedium::new();
        medium.add_base_station("BASE_STATION", "leach-cluster");
        let mut radio = medium.radio(head_id());
        let head = ClusterHeadRound::new(head_id(), &config().with_aggregate_capacity(1));
        let ap = head_id().name();

        let (outcome, _) = tokio::join!(head.run(&mut radio), async {
            send_at(&medium, Duration::from_secs(1), &ap, b";000000000001:1").await;
            send_at(&medium, Duration::from_secs(1), &ap, b";000000000002:2").await;
        });

        assert!(matches!(
            outcome,
            ClusterHeadOutcome::Relayed {
                records: 1,
                refused: 1,
                ..
            }
        ));
    }
}
