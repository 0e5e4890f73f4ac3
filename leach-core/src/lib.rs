//! LEACH Core Library
//!
//! Duty-cycled wireless sensor node with rotating cluster heads.
//! Each boot runs one round: elect, head or report, persist, sleep.

#![allow(async_fn_in_trait)]

pub mod types;
pub mod config;
pub mod codec;
pub mod election;
pub mod hal;
pub mod storage;
pub mod discovery;
pub mod aggregate;
pub mod role;
pub mod sequencer;
pub mod sim;

pub use types::*;
pub use config::{ConfigError, NodeConfig};
pub use hal::{DurableStore, PowerController, RadioStack, RandomSource, SensorAdc};
pub use role::{RoleOutcome, RoundRole};
pub use sequencer::{Node, RoundReport};
pub use storage::{FileStore, MemoryStore, RoundStore};
