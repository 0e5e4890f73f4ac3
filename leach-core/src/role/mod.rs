//! Role protocols for one round.
//!
//! A round runs exactly one of two state machines:
//! - Cluster head: AdvertiseOpen → CollectingReports → Relay → Done
//! - Station: Discover → Join → Report → Done
//!
//! Neither keeps state beyond the round.

pub mod cluster_head;
pub mod station;

pub use cluster_head::{ClusterHeadOutcome, ClusterHeadRound};
pub use station::{StationOutcome, StationRound};

use crate::config::NodeConfig;
use crate::hal::{RadioStack, SensorAdc};
use crate::types::{NodeIdentity, Role};
use serde::{Deserialize, Serialize};

/// The role protocol selected for a round
#[derive(Debug)]
pub enum RoundRole {
    ClusterHead(ClusterHeadRound),
    Station(StationRound),
}

/// How a round's role protocol ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "outcome", rename_all = "snake_case")]
pub enum RoleOutcome {
    ClusterHead(ClusterHeadOutcome),
    Station(StationOutcome),
}

impl RoundRole {
    /// Build the protocol for the elected role
    pub fn select(cluster_head: bool, identity: NodeIdentity, config: &NodeConfig) -> Self {
        if cluster_head {
            RoundRole::ClusterHead(ClusterHeadRound::new(identity, config))
        } else {
            RoundRole::Station(StationRound::new(identity, config))
        }
    }

    pub fn role(&self) -> Role {
        match self {
            RoundRole::ClusterHead(_) => Role::ClusterHead,
            RoundRole::Station(_) => Role::Station,
        }
    }

    /// Drive the selected protocol to completion
    pub async fn run<R, A>(self, radio: &mut R, adc: &mut A) -> RoleOutcome
    where
        R: RadioStack,
        A: SensorAdc,
    {
        match self {
            RoundRole::ClusterHead(head) => RoleOutcome::ClusterHead(head.run(radio).await),
            RoundRole::Station(station) => RoleOutcome::Station(station.run(radio, adc).await),
        }
    }
}

impl RoleOutcome {
    /// Whether the round's data left the node
    pub fn delivered(&self) -> bool {
        matches!(
            self,
            RoleOutcome::ClusterHead(ClusterHeadOutcome::Relayed { .. })
                | RoleOutcome::Station(StationOutcome::Reported { .. })
        )
    }
}
