//! Round sequencer: one boot of a node from wake to deep sleep.
//!
//! identity → round state → election → role protocol → next state →
//! persist → sleep. Every failure is recovered here; a round always ends
//! with a persisted (or attempted) next state and a sleep.

use crate::config::NodeConfig;
use crate::election::{self, ElectionError};
use crate::hal::{DurableStore, PowerController, RadioStack, RandomSource, SensorAdc};
use crate::role::{RoleOutcome, RoundRole};
use crate::storage::{RoundStore, StorageError};
use crate::types::{NodeIdentity, Role, RoundState};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Working record of the round in progress
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub identity: NodeIdentity,
    pub started: Instant,
    pub state: RoundState,
    /// Set when the stored state could not be used
    pub storage_error: Option<StorageError>,
    pub probability: f64,
    pub draw: f64,
    /// None when the election was skipped
    pub threshold: Option<f64>,
    pub cluster_head: bool,
}

/// What happened during one boot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub node: String,
    pub state: RoundState,
    /// Why the stored state was unusable, when the default was used instead
    pub state_error: Option<String>,
    pub probability: f64,
    pub draw: f64,
    pub threshold: Option<f64>,
    pub role: Role,
    pub outcome: RoleOutcome,
    pub next_state: RoundState,
    pub persisted: bool,
    pub elapsed_ms: u64,
    pub sleep_ms: u64,
}

/// A sensor node and its drivers
pub struct Node<R, S, G, A, P> {
    config: NodeConfig,
    radio: R,
    store: RoundStore<S>,
    rng: G,
    adc: A,
    power: P,
}

impl<R, S, G, A, P> Node<R, S, G, A, P>
where
    R: RadioStack,
    S: DurableStore,
    G: RandomSource,
    A: SensorAdc,
    P: PowerController,
{
    pub fn new(config: NodeConfig, radio: R, store: S, rng: G, adc: A, power: P) -> Self {
        let store = RoundStore::new(store, config.epoch_length);
        Self {
            config,
            radio,
            store,
            rng,
            adc,
            power,
        }
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(self.radio.hardware_id())
    }

    pub fn store(&self) -> &RoundStore<S> {
        &self.store
    }

    pub fn power(&self) -> &P {
        &self.power
    }

    /// Run one complete boot cycle, ending in deep sleep
    pub async fn run_round(&mut self) -> RoundReport {
        let ctx = self.begin();
        let role = RoundRole::select(ctx.cluster_head, ctx.identity, &self.config);
        let outcome = role.run(&mut self.radio, &mut self.adc).await;
        self.finish(ctx, outcome).await
    }

    /// Wake: read identity and state, run the election
    fn begin(&mut self) -> RoundContext {
        let started = Instant::now();
        self.radio.disconnect();
        let identity = self.identity();

        if self.config.reset_rounds {
            if let Err(e) = self.store.reset() {
                warn!("Round: Reset of round state failed: {}", e);
            }
        }

        let (state, storage_error) = match self.store.load() {
            Ok(state) => (state, None),
            Err(e) => {
                warn!("Round: {}; starting from {}", e, RoundState::default());
                (RoundState::default(), Some(e))
            }
        };

        info!("Round: Node {} waking with {}", identity, state);

        let probability = self.config.election_probability();
        let draw = self.rng.next_uniform();
        let (threshold, cluster_head) = match Self::elect(&state, probability, draw) {
            Ok(result) => result,
            Err(e) => {
                warn!("Round: Election skipped: {}; acting as station", e);
                (None, false)
            }
        };

        info!(
            "Round: {} is {} for round {}",
            identity,
            if cluster_head { Role::ClusterHead } else { Role::Station },
            state.round
        );

        RoundContext {
            identity,
            started,
            state,
            storage_error,
            probability,
            draw,
            threshold,
            cluster_head,
        }
    }

    fn elect(
        state: &RoundState,
        probability: f64,
        draw: f64,
    ) -> Result<(Option<f64>, bool), ElectionError> {
        let threshold = election::threshold(probability, state.round)?;
        let head = election::decide_role(state, probability, draw)?;
        Ok((Some(threshold), head))
    }

    /// Persist the next state and sleep out the rest of the interval
    async fn finish(&mut self, ctx: RoundContext, outcome: RoleOutcome) -> RoundReport {
        let next_state =
            election::next_round(&ctx.state, ctx.cluster_head, self.config.epoch_length);

        let persisted = match self.store.save(&next_state) {
            Ok(()) => true,
            Err(e) => {
                warn!("Round: Could not persist {}: {}", next_state, e);
                false
            }
        };

        self.radio.disconnect();

        let elapsed = ctx.started.elapsed();
        let sleep = sleep_duration(self.config.sleep_interval, elapsed);
        info!(
            "Round: Done in {:?}, next {}, sleeping {:?}",
            elapsed, next_state, sleep
        );

        let report = RoundReport {
            node: ctx.identity.name(),
            state: ctx.state,
            state_error: ctx.storage_error.as_ref().map(ToString::to_string),
            probability: ctx.probability,
            draw: ctx.draw,
            threshold: ctx.threshold,
            role: if ctx.cluster_head {
                Role::ClusterHead
            } else {
                Role::Station
            },
            outcome,
            next_state,
            persisted,
            elapsed_ms: elapsed.as_millis() as u64,
            sleep_ms: sleep.as_millis() as u64,
        };

        self.power.sleep_for(sleep).await;
        report
    }
}

/// Sleep that keeps wake-ups on a fixed period despite round processing time
pub fn sleep_duration(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}
