//! Core types for LEACH nodes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Length of a rendered node identifier (6 bytes as hex)
pub const NODE_ID_LEN: usize = 12;

/// Default number of rounds in one epoch
pub const DEFAULT_EPOCH_LENGTH: u16 = 7;

/// Default reserved name of the base-station network
pub const DEFAULT_BASE_STATION_NAME: &str = "BASE_STATION";

/// Hardware identifier of a node (radio MAC address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity([u8; 6]);

impl NodeIdentity {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Protocol name: 12 upper-case hex characters
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Round counter and head eligibility, persisted between boots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    /// Current round within the epoch, always in `[0, epoch_length)`
    pub round: u16,
    /// Whether this node may still become cluster head in this epoch
    pub ch_enable: bool,
}

impl RoundState {
    pub fn new(round: u16, ch_enable: bool) -> Self {
        Self { round, ch_enable }
    }
}

impl Default for RoundState {
    /// First round of an epoch, eligible for election
    fn default() -> Self {
        Self {
            round: 0,
            ch_enable: true,
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round={} ch_enable={}", self.round, self.ch_enable)
    }
}

/// A network seen in one radio scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredNetwork {
    pub name: String,
    /// Received signal strength in dBm (higher is stronger)
    pub signal: i32,
}

impl DiscoveredNetwork {
    pub fn new(name: impl Into<String>, signal: i32) -> Self {
        Self {
            name: name.into(),
            signal,
        }
    }
}

/// Scalar reading from the analog sensor
pub type SensorReading = u16;

/// One station report held by a cluster head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub sender: NodeIdentity,
    pub reading: SensorReading,
}

/// Role taken for a single round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ClusterHead,
    Station,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::ClusterHead => write!(f, "cluster-head"),
            Role::Station => write!(f, "station"),
        }
    }
}

/// Subnet broadcast address for the subnet of `dns` (host octet forced to 255)
pub fn broadcast_for(dns: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = dns.octets();
    Ipv4Addr::new(a, b, c, 255)
}
