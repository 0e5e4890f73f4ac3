//! Hardware abstraction for LEACH nodes
//!
//! The round logic only talks to the board through these traits:
//! - Random draws for the election
//! - Analog sensor sampling
//! - Durable byte storage for the round file
//! - Radio: scan, join, access point, datagrams
//! - Deep sleep
//!
//! # Implementing a radio
//!
//! ```ignore
//! struct EspRadio { /* driver handles */ }
//!
//! impl RadioStack for EspRadio {
//!     fn hardware_id(&self) -> [u8; 6] {
//!         // Read station MAC
//!     }
//!
//!     async fn scan(&mut self) -> Vec<DiscoveredNetwork> {
//!         // Blocking scan on the driver, mapped to names and RSSI
//!     }
//!
//!     // ... implement other methods
//! }
//! ```
//!
//! Host implementations live in [`crate::storage`] (`FileStore`,
//! `MemoryStore`), below (`RngSource`) and in [`crate::sim`].

#![allow(async_fn_in_trait)]

use crate::types::{DiscoveredNetwork, SensorReading};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;

/// Radio driver errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("not connected to any network")]
    NotConnected,

    #[error("payload of {0} bytes exceeds the datagram limit")]
    PayloadTooLarge(usize),
}

/// Result of a join attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    Connected,
    TimedOut,
    /// Network vanished or rejected the secret
    Failed,
}

/// An inbound datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: Ipv4Addr,
    pub payload: Vec<u8>,
}

/// Uniform variate generator
pub trait RandomSource {
    /// Next value in `[0, 1)`
    fn next_uniform(&mut self) -> f64;
}

/// Analog sensor
pub trait SensorAdc {
    fn read(&mut self) -> SensorReading;
}

/// Byte-addressable durable storage (flash filesystem)
pub trait DurableStore {
    /// Mount the filesystem; false on failure
    fn mount(&mut self) -> bool;

    /// Whole contents of `path`, or None if it cannot be read
    fn read(&mut self, path: &str) -> Option<Vec<u8>>;

    /// Replace the contents of `path`; false on failure
    fn write(&mut self, path: &str, bytes: &[u8]) -> bool;
}

/// Wi-Fi style radio driver
pub trait RadioStack {
    /// Hardware identifier (MAC address)
    fn hardware_id(&self) -> [u8; 6];

    /// Networks currently visible, in scan order
    async fn scan(&mut self) -> Vec<DiscoveredNetwork>;

    /// Join `name` as a station, giving up after `timeout`
    async fn join(&mut self, name: &str, secret: &str, timeout: Duration) -> JoinStatus;

    /// Open an access point; false on failure
    async fn start_ap(&mut self, name: &str, secret: &str, channel: u8, max_clients: u8) -> bool;

    /// Send one datagram on the current network
    async fn send_datagram(&mut self, addr: SocketAddrV4, payload: &[u8]) -> Result<(), RadioError>;

    /// Open a datagram listener on `port`
    fn listen(&mut self, port: u16) -> Result<(), RadioError>;

    /// Wait for the next datagram on the open listener.
    ///
    /// Must be cancel safe: callers bound it with a timeout.
    async fn recv(&mut self) -> Option<Datagram>;

    /// DNS server assigned on the current network
    fn dns_ip(&self) -> Option<Ipv4Addr>;

    /// Leave any network, close the access point and listener
    fn disconnect(&mut self);
}

/// Deep-sleep control
pub trait PowerController {
    async fn sleep_for(&mut self, duration: Duration);
}

/// Resolution of host random draws (four decimal places)
const DRAW_RESOLUTION: u32 = 10_000;

/// `RandomSource` over any `rand` generator, quantised to 1/10000
pub struct RngSource<R> {
    rng: R,
}

impl<R: rand::RngCore> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngSource<rand::rngs::StdRng> {
    /// Deterministic source for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        use rand::SeedableRng;
        Self::new(rand::rngs::StdRng::seed_from_u64(seed))
    }
}

impl<R: rand::RngCore> RandomSource for RngSource<R> {
    fn next_uniform(&mut self) -> f64 {
        use rand::Rng;
        let n = self.rng.gen_range(0..DRAW_RESOLUTION);
        f64::from(n) / f64::from(DRAW_RESOLUTION)
    }
}
