//! Network discovery for stations.
//!
//! Valid networks are cluster-head access points (named by a 12-hex node
//! identifier) and the base station.

use crate::codec::is_hex_identifier;
use crate::hal::RadioStack;
use crate::types::DiscoveredNetwork;
use thiserror::Error;
use tracing::{debug, info};

/// Discovery errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("no networks visible")]
    NoNetworks,

    #[error("{visible} networks visible, none valid")]
    NoValidNetwork { visible: usize },
}

/// True iff `name` is a head identifier or the base station
pub fn is_valid_name(name: &str, base_station: &str) -> bool {
    is_hex_identifier(name) || name == base_station
}

/// Strongest valid network; ties keep the first seen
pub fn strongest_valid(
    networks: &[DiscoveredNetwork],
    base_station: &str,
) -> Option<DiscoveredNetwork> {
    let mut best: Option<&DiscoveredNetwork> = None;
    for net in networks
        .iter()
        .filter(|n| is_valid_name(&n.name, base_station))
    {
        if best.map_or(true, |b| net.signal > b.signal) {
            best = Some(net);
        }
    }
    best.cloned()
}

/// Pick the strongest valid network from a scan result
pub fn select(
    networks: &[DiscoveredNetwork],
    base_station: &str,
) -> Result<DiscoveredNetwork, DiscoveryError> {
    if networks.is_empty() {
        return Err(DiscoveryError::NoNetworks);
    }
    strongest_valid(networks, base_station).ok_or(DiscoveryError::NoValidNetwork {
        visible: networks.len(),
    })
}

/// Scan and pick the network to report to
pub async fn discover<R: RadioStack>(
    radio: &mut R,
    base_station: &str,
) -> Result<DiscoveredNetwork, DiscoveryError> {
    let networks = radio.scan().await;
    debug!("Discovery: Scan returned {} networks", networks.len());

    let chosen = select(&networks, base_station)?;
    info!(
        "Discovery: Strongest valid network \"{}\" ({} dBm)",
        chosen.name, chosen.signal
    );
    Ok(chosen)
}
