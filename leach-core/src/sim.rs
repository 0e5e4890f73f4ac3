//! In-memory radio space for running nodes without hardware.
//!
//! Provides a shared medium that nodes' radios scan, join and send through,
//! plus scripted collaborators and a `Fleet` driver that boots many nodes
//! per round on one task. Runs deterministically under paused tokio time.

use crate::config::{NodeConfig, MAX_DATAGRAM_PAYLOAD};
use crate::hal::{
    Datagram, JoinStatus, PowerController, RadioError, RadioStack, RandomSource, SensorAdc,
};
use crate::sequencer::{Node, RoundReport};
use crate::storage::MemoryStore;
use crate::types::{DiscoveredNetwork, NodeIdentity, SensorReading};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Signal of a head access point unless overridden
pub const DEFAULT_AP_SIGNAL: i32 = -60;

/// Signal of the base station unless overridden
pub const DEFAULT_BASE_SIGNAL: i32 = -75;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NetworkKind {
    AccessPoint(NodeIdentity),
    BaseStation,
    Foreign,
}

#[derive(Debug, Clone)]
struct SimNetwork {
    name: String,
    kind: NetworkKind,
    secret: Option<String>,
    subnet: [u8; 3],
    signal: i32,
    joinable: bool,
    max_clients: usize,
    clients: usize,
}

impl SimNetwork {
    fn gateway(&self) -> Ipv4Addr {
        let [a, b, c] = self.subnet;
        Ipv4Addr::new(a, b, c, 1)
    }

    fn covers(&self, addr: Ipv4Addr) -> bool {
        let [a, b, c, _] = addr.octets();
        [a, b, c] == self.subnet
    }
}

struct MediumState {
    networks: Vec<SimNetwork>,
    signals: HashMap<(NodeIdentity, String), i32>,
    listeners: HashMap<(String, u16), Vec<mpsc::UnboundedSender<Datagram>>>,
    base_inbox: Vec<Datagram>,
    failing_aps: HashSet<NodeIdentity>,
    scan_duration: Duration,
    join_delay: Duration,
}

impl MediumState {
    fn network(&self, name: &str) -> Option<&SimNetwork> {
        self.networks.iter().find(|n| n.name == name)
    }

    fn network_mut(&mut self, name: &str) -> Option<&mut SimNetwork> {
        self.networks.iter_mut().find(|n| n.name == name)
    }

    fn free_subnet(&self, prefix: [u8; 2]) -> Option<[u8; 3]> {
        (1..=254u8)
            .map(|c| [prefix[0], prefix[1], c])
            .find(|s| !self.networks.iter().any(|n| n.subnet == *s))
    }

    fn remove_network(&mut self, name: &str) {
        self.networks.retain(|n| n.name != name);
        self.listeners.retain(|(net, _), _| net != name);
    }

    fn deliver(&mut self, network: &str, port: u16, datagram: Datagram) {
        let is_base = matches!(
            self.network(network).map(|n| &n.kind),
            Some(NetworkKind::BaseStation)
        );
        if is_base {
            self.base_inbox.push(datagram.clone());
        }
        if let Some(senders) = self.listeners.get_mut(&(network.to_string(), port)) {
            senders.retain(|tx| tx.send(datagram.clone()).is_ok());
        }
    }
}

/// Shared radio space
#[derive(Clone)]
pub struct SimMedium {
    inner: Arc<Mutex<MediumState>>,
}

impl Default for SimMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMedium {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MediumState {
                networks: Vec::new(),
                signals: HashMap::new(),
                listeners: HashMap::new(),
                base_inbox: Vec::new(),
                failing_aps: HashSet::new(),
                scan_duration: Duration::from_secs(2),
                join_delay: Duration::from_millis(500),
            })),
        }
    }

    /// Time a scan takes
    pub fn set_scan_duration(&self, duration: Duration) {
        self.inner.lock().scan_duration = duration;
    }

    /// Time a successful join takes
    pub fn set_join_delay(&self, delay: Duration) {
        self.inner.lock().join_delay = delay;
    }

    /// Register the base-station sink on 10.0.0.0/24
    pub fn add_base_station(&self, name: &str, secret: &str) {
        let mut state = self.inner.lock();
        state.remove_network(name);
        state.networks.push(SimNetwork {
            name: name.to_string(),
            kind: NetworkKind::BaseStation,
            secret: Some(secret.to_string()),
            subnet: [10, 0, 0],
            signal: DEFAULT_BASE_SIGNAL,
            joinable: true,
            max_clients: usize::MAX,
            clients: 0,
        });
    }

    /// Register a visible network that is not part of the protocol
    pub fn add_foreign_network(&self, name: &str, signal: i32) {
        let mut state = self.inner.lock();
        let subnet = state.free_subnet([172, 16]).unwrap_or([172, 16, 0]);
        state.networks.push(SimNetwork {
            name: name.to_string(),
            kind: NetworkKind::Foreign,
            secret: None,
            subnet,
            signal,
            joinable: false,
            max_clients: 0,
            clients: 0,
        });
    }

    /// Allow or refuse joins to `network`; refused joins time out
    pub fn set_joinable(&self, network: &str, joinable: bool) {
        if let Some(net) = self.inner.lock().network_mut(network) {
            net.joinable = joinable;
        }
    }

    /// Signal of `network` as seen by `observer`
    pub fn set_signal(&self, observer: NodeIdentity, network: &str, signal: i32) {
        self.inner
            .lock()
            .signals
            .insert((observer, network.to_string()), signal);
    }

    /// Make `node`'s access point creation fail
    pub fn fail_access_point(&self, node: NodeIdentity) {
        self.inner.lock().failing_aps.insert(node);
    }

    /// Deliver a datagram onto `network` as if sent by `from`
    pub fn inject(&self, network: &str, port: u16, from: Ipv4Addr, payload: &[u8]) {
        self.inner.lock().deliver(
            network,
            port,
            Datagram {
                from,
                payload: payload.to_vec(),
            },
        );
    }

    /// Datagrams received by the base station so far
    pub fn base_inbox(&self) -> Vec<Datagram> {
        self.inner.lock().base_inbox.clone()
    }

    /// Drain the base-station inbox
    pub fn take_base_inbox(&self) -> Vec<Datagram> {
        std::mem::take(&mut self.inner.lock().base_inbox)
    }

    /// Names of networks currently on air
    pub fn network_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .networks
            .iter()
            .map(|n| n.name.clone())
            .collect()
    }

    /// A radio for `node` attached to this medium
    pub fn radio(&self, node: NodeIdentity) -> SimRadio {
        SimRadio {
            identity: node,
            medium: self.clone(),
            connected: None,
            address: None,
            ap: None,
            listener: None,
        }
    }
}

/// A node's radio on a `SimMedium`
pub struct SimRadio {
    identity: NodeIdentity,
    medium: SimMedium,
    connected: Option<String>,
    address: Option<Ipv4Addr>,
    ap: Option<String>,
    listener: Option<mpsc::UnboundedReceiver<Datagram>>,
}

impl SimRadio {
    /// Network this radio is joined to
    pub fn connected(&self) -> Option<&str> {
        self.connected.as_deref()
    }

    fn leave(&mut self) {
        let mut state = self.medium.inner.lock();
        if let Some(name) = self.connected.take() {
            if let Some(net) = state.network_mut(&name) {
                net.clients = net.clients.saturating_sub(1);
            }
        }
        if let Some(name) = self.ap.take() {
            state.remove_network(&name);
        }
        self.address = None;
        self.listener = None;
    }
}

impl Drop for SimRadio {
    fn drop(&mut self) {
        self.leave();
    }
}

impl RadioStack for SimRadio {
    fn hardware_id(&self) -> [u8; 6] {
        self.identity.bytes()
    }

    async fn scan(&mut self) -> Vec<DiscoveredNetwork> {
        let duration = self.medium.inner.lock().scan_duration;
        tokio::time::sleep(duration).await;

        let state = self.medium.inner.lock();
        state
            .networks
            .iter()
            .filter(|n| n.kind != NetworkKind::AccessPoint(self.identity))
            .map(|n| {
                let signal = state
                    .signals
                    .get(&(self.identity, n.name.clone()))
                    .copied()
                    .unwrap_or(n.signal);
                DiscoveredNetwork::new(n.name.clone(), signal)
            })
            .collect()
    }

    async fn join(&mut self, name: &str, secret: &str, timeout: Duration) -> JoinStatus {
        self.leave();

        let (reachable, secret_ok, delay) = {
            let state = self.medium.inner.lock();
            match state.network(name) {
                Some(net) => (
                    net.joinable && net.clients < net.max_clients,
                    net.secret.as_deref() == Some(secret),
                    state.join_delay,
                ),
                None => (false, false, state.join_delay),
            }
        };

        if !reachable || delay > timeout {
            tokio::time::sleep(timeout).await;
            return JoinStatus::TimedOut;
        }
        tokio::time::sleep(delay).await;
        if !secret_ok {
            return JoinStatus::Failed;
        }

        let mut state = self.medium.inner.lock();
        let Some(net) = state.network_mut(name) else {
            return JoinStatus::Failed;
        };
        net.clients += 1;
        let [a, b, c] = net.subnet;
        let host = 1 + (net.clients.min(253) as u8);
        self.address = Some(Ipv4Addr::new(a, b, c, host));
        self.connected = Some(name.to_string());
        debug!("Sim: {} joined \"{}\"", self.identity, name);
        JoinStatus::Connected
    }

    async fn start_ap(&mut self, name: &str, secret: &str, _channel: u8, max_clients: u8) -> bool {
        self.leave();

        let mut state = self.medium.inner.lock();
        if state.failing_aps.contains(&self.identity) || state.network(name).is_some() {
            return false;
        }
        let Some(subnet) = state.free_subnet([192, 168]) else {
            return false;
        };
        state.networks.push(SimNetwork {
            name: name.to_string(),
            kind: NetworkKind::AccessPoint(self.identity),
            secret: Some(secret.to_string()),
            subnet,
            signal: DEFAULT_AP_SIGNAL,
            joinable: true,
            max_clients: usize::from(max_clients),
            clients: 0,
        });
        self.ap = Some(name.to_string());
        self.address = Some(Ipv4Addr::new(subnet[0], subnet[1], subnet[2], 1));
        true
    }

    async fn send_datagram(&mut self, addr: SocketAddrV4, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(RadioError::PayloadTooLarge(payload.len()));
        }
        let network = self
            .connected
            .clone()
            .or_else(|| self.ap.clone())
            .ok_or(RadioError::NotConnected)?;
        let from = self.address.ok_or(RadioError::NotConnected)?;

        let mut state = self.medium.inner.lock();
        let on_subnet = state.network(&network).map_or(false, |n| n.covers(*addr.ip()));
        if on_subnet {
            state.deliver(
                &network,
                addr.port(),
                Datagram {
                    from,
                    payload: payload.to_vec(),
                },
            );
        }
        Ok(())
    }

    fn listen(&mut self, port: u16) -> Result<(), RadioError> {
        let network = self
            .ap
            .clone()
            .or_else(|| self.connected.clone())
            .ok_or(RadioError::NotConnected)?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.medium
            .inner
            .lock()
            .listeners
            .entry((network, port))
            .or_default()
            .push(tx);
        self.listener = Some(rx);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Datagram> {
        match self.listener.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    fn dns_ip(&self) -> Option<Ipv4Addr> {
        let name = self.connected.as_ref().or(self.ap.as_ref())?;
        self.medium.inner.lock().network(name).map(SimNetwork::gateway)
    }

    fn disconnect(&mut self) {
        self.leave();
    }
}

/// Random source replaying fixed draws
#[derive(Debug, Clone)]
pub struct ScriptedRandom {
    draws: VecDeque<f64>,
    fallback: f64,
}

impl ScriptedRandom {
    /// Replays `draws`, then returns 0.9999 forever
    pub fn new(draws: Vec<f64>) -> Self {
        Self {
            draws: draws.into(),
            fallback: 0.9999,
        }
    }

    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = fallback;
        self
    }
}

impl RandomSource for ScriptedRandom {
    fn next_uniform(&mut self) -> f64 {
        self.draws.pop_front().unwrap_or(self.fallback)
    }
}

/// Sensor returning one reading
#[derive(Debug, Clone, Copy)]
pub struct FixedSensor {
    reading: SensorReading,
}

impl FixedSensor {
    pub fn new(reading: SensorReading) -> Self {
        Self { reading }
    }
}

impl SensorAdc for FixedSensor {
    fn read(&mut self) -> SensorReading {
        self.reading
    }
}

/// Power controller that records requested sleeps instead of waiting
#[derive(Debug, Clone, Default)]
pub struct SimPower {
    slept: Vec<Duration>,
}

impl SimPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.clone()
    }
}

impl PowerController for SimPower {
    async fn sleep_for(&mut self, duration: Duration) {
        self.slept.push(duration);
    }
}

/// A simulated node
pub type SimNode<G> = Node<SimRadio, MemoryStore, G, FixedSensor, SimPower>;

/// Results of one fleet round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetRound {
    pub index: usize,
    pub reports: Vec<RoundReport>,
    /// Payloads received by the base station, as text
    pub uplinks: Vec<String>,
}

impl FleetRound {
    pub fn heads(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.role == crate::types::Role::ClusterHead)
            .map(|r| r.node.as_str())
            .collect()
    }
}

/// Largest fleet; identities number nodes with a 16-bit suffix
pub const MAX_FLEET_NODES: usize = u16::MAX as usize;

/// Fleet construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FleetError {
    #[error("fleet of {0} nodes exceeds the limit of 65535")]
    TooManyNodes(usize),
}

/// Many nodes sharing one medium, booted together each round
pub struct Fleet<G> {
    medium: SimMedium,
    nodes: Vec<SimNode<G>>,
    rounds: usize,
}

impl<G: RandomSource> Fleet<G> {
    /// One node per random source; node `i` gets identity `5CCF7F00xxxx`
    pub fn new(medium: SimMedium, config: &NodeConfig, sources: Vec<G>) -> Result<Self, FleetError> {
        if sources.len() > MAX_FLEET_NODES {
            return Err(FleetError::TooManyNodes(sources.len()));
        }

        let nodes = sources
            .into_iter()
            .zip(1..=u16::MAX)
            .enumerate()
            .map(|(i, (rng, number))| {
                let [hi, lo] = number.to_be_bytes();
                let identity = NodeIdentity::new([0x5C, 0xCF, 0x7F, 0x00, hi, lo]);
                Node::new(
                    config.clone(),
                    medium.radio(identity),
                    MemoryStore::new(),
                    rng,
                    FixedSensor::new(((i * 37) % 1024) as SensorReading),
                    SimPower::new(),
                )
            })
            .collect();

        Ok(Self {
            medium,
            nodes,
            rounds: 0,
        })
    }

    pub fn nodes(&self) -> &[SimNode<G>] {
        &self.nodes
    }

    /// Boot every node once, concurrently on the current task
    pub async fn run_round(&mut self) -> FleetRound {
        let reports = join_all(self.nodes.iter_mut().map(|n| n.run_round())).await;
        let uplinks = self
            .medium
            .take_base_inbox()
            .into_iter()
            .map(|d| String::from_utf8_lossy(&d.payload).into_owned())
            .collect();

        let round = FleetRound {
            index: self.rounds,
            reports,
            uplinks,
        };
        self.rounds += 1;
        round
    }
}
