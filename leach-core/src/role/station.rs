//! Station round: find the strongest head (or the base), join, report once.

use crate::codec;
use crate::config::NodeConfig;
use crate::discovery::{self, DiscoveryError};
use crate::hal::{JoinStatus, RadioStack, SensorAdc};
use crate::types::{broadcast_for, DiscoveredNetwork, NodeIdentity, Report};
use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Phases of a station round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Discover,
    Join(DiscoveredNetwork),
    Report(DiscoveredNetwork),
    Done,
}

/// How a station round ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StationOutcome {
    NoNetworks,
    NoValidNetwork { visible: usize },
    JoinFailed { network: String, timed_out: bool },
    /// Report sent; delivery is not confirmed
    Reported { network: String, reading: u16 },
    SendFailed { network: String, reason: String },
}

/// Station state machine for one round
#[derive(Debug)]
pub struct StationRound {
    identity: NodeIdentity,
    phase: Phase,
    outcome: Option<StationOutcome>,
    base_station: String,
    secret: String,
    join_timeout: Duration,
    port: u16,
}

impl StationRound {
    pub fn new(identity: NodeIdentity, config: &NodeConfig) -> Self {
        Self {
            identity,
            phase: Phase::Discover,
            outcome: None,
            base_station: config.base_station_name.clone(),
            secret: config.network_secret.clone(),
            join_timeout: config.join_timeout,
            port: config.report_port,
        }
    }

    /// Run every phase until the round is done
    pub async fn run<R, A>(mut self, radio: &mut R, adc: &mut A) -> StationOutcome
    where
        R: RadioStack,
        A: SensorAdc,
    {
        loop {
            let phase = std::mem::replace(&mut self.phase, Phase::Done);
            self.phase = match phase {
                Phase::Discover => self.discover(radio).await,
                Phase::Join(network) => self.join(radio, network).await,
                Phase::Report(network) => self.report(radio, adc, network).await,
                Phase::Done => break,
            };
        }
        self.outcome.unwrap_or(StationOutcome::NoNetworks)
    }

    fn finish(&mut self, outcome: StationOutcome) -> Phase {
        self.outcome = Some(outcome);
        Phase::Done
    }

    async fn discover<R: RadioStack>(&mut self, radio: &mut R) -> Phase {
        match discovery::discover(radio, &self.base_station).await {
            Ok(network) => Phase::Join(network),
            Err(DiscoveryError::NoNetworks) => {
                info!("Station: No networks found, skipping round");
                self.finish(StationOutcome::NoNetworks)
            }
            Err(DiscoveryError::NoValidNetwork { visible }) => {
                info!(
                    "Station: {} networks visible but none valid, skipping round",
                    visible
                );
                self.finish(StationOutcome::NoValidNetwork { visible })
            }
        }
    }

    async fn join<R: RadioStack>(&mut self, radio: &mut R, network: DiscoveredNetwork) -> Phase {
        debug!("Station: Connecting to \"{}\"", network.name);
        match radio
            .join(&network.name, &self.secret, self.join_timeout)
            .await
        {
            JoinStatus::Connected => {
                info!("Station: Connected to \"{}\"", network.name);
                Phase::Report(network)
            }
            status => {
                warn!("Station: Could not connect to \"{}\" ({:?})", network.name, status);
                self.finish(StationOutcome::JoinFailed {
                    network: network.name,
                    timed_out: status == JoinStatus::TimedOut,
                })
            }
        }
    }

    async fn report<R, A>(&mut self, radio: &mut R, adc: &mut A, network: DiscoveredNetwork) -> Phase
    where
        R: RadioStack,
        A: SensorAdc,
    {
        let report = Report {
            sender: self.identity,
            reading: adc.read(),
        };

        let message = match codec::encode_report(&report) {
            Ok(m) => m,
            Err(e) => {
                warn!("Station: {}", e);
                return self.finish(StationOutcome::SendFailed {
                    network: network.name,
                    reason: e.to_string(),
                });
            }
        };

        let Some(dns) = radio.dns_ip() else {
            warn!("Station: No address assigned on \"{}\"", network.name);
            return self.finish(StationOutcome::SendFailed {
                network: network.name,
                reason: "no address".to_string(),
            });
        };
        let target = SocketAddrV4::new(broadcast_for(dns), self.port);

        match radio.send_datagram(target, message.as_bytes()).await {
            Ok(()) => {
                info!("Station: Sent {} to {}", message, target);
                self.finish(StationOutcome::Reported {
                    network: network.name,
                    reading: report.reading,
                })
            }
            Err(e) => {
                warn!("Station: Send to {} failed: {}", target, e);
                self.finish(StationOutcome::SendFailed {
                    network: network.name,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{FixedSensor, SimMedium};

    fn station_id() -> NodeIdentity {
        NodeIdentity::new([0x00, 0x00, 0x00, 0x00, 0x00, 0x07])
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_to_strongest_head() {
        let medium = SimMedium::new();
        let head = NodeIdentity::new([0xAA, 0, 0, 0, 0, 1]);
        let mut head_radio = medium.radio(head);
        assert!(head_radio.start_ap(&head.name(), "leach-cluster", 1, 8).await);
        head_radio.listen(4210).unwrap();
        medium.add_foreign_network("HomeWifi", -10);

        let mut radio = medium.radio(station_id());
        let outcome = StationRound::new(station_id(), &NodeConfig::default())
            .run(&mut radio, &mut FixedSensor::new(321))
            .await;

        assert_eq!(
            outcome,
            StationOutcome::Reported {
                network: head.name(),
                reading: 321,
            }
        );
        let datagram = head_radio.recv().await.unwrap();
        assert_eq!(datagram.payload, b";000000000007:321");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_scan() {
        let medium = SimMedium::new();
        let mut radio = medium.radio(station_id());
        let outcome = StationRound::new(station_id(), &NodeConfig::default())
            .run(&mut radio, &mut FixedSensor::new(1))
            .await;
        assert_eq!(outcome, StationOutcome::NoNetworks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_invalid_networks() {
        let medium = SimMedium::new();
        medium.add_foreign_network("HomeWifi", -10);
        medium.add_foreign_network("short", -20);
        let mut radio = medium.radio(station_id());
        let outcome = StationRound::new(station_id(), &NodeConfig::default())
            .run(&mut radio, &mut FixedSensor::new(1))
            .await;
        assert_eq!(outcome, StationOutcome::NoValidNetwork { visible: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_aborts() {
        let medium = SimMedium::new();
        medium.add_base_station("BASE_STATION", "leach-cluster");
        medium.set_joinable("BASE_STATION", false);
        let mut radio = medium.radio(station_id());
        let config = NodeConfig::default().with_join_timeout(Duration::from_secs(3));

        let start = tokio::time::Instant::now();
        let outcome = StationRound::new(station_id(), &config)
            .run(&mut radio, &mut FixedSensor::new(1))
            .await;

        assert_eq!(
            outcome,
            StationOutcome::JoinFailed {
                network: "BASE_STATION".to_string(),
                timed_out: true,
            }
        );
        assert!(medium.base_inbox().is_empty());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_directly_to_base() {
        let medium = SimMedium::new();
        medium.add_base_station("BASE_STATION", "leach-cluster");
        let mut radio = medium.radio(station_id());
        let outcome = StationRound::new(station_id(), &NodeConfig::default())
            .run(&mut radio, &mut FixedSensor::new(44))
            .await;

        assert!(matches!(outcome, StationOutcome::Reported { reading: 44, .. }));
        assert_eq!(medium.base_inbox()[0].payload, b";000000000007:44");
    }
}
