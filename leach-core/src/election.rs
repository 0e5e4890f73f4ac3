//! LEACH cluster-head election.
//!
//! Each round a node draws a uniform value and compares it with
//!
//! ```text
//! T = p / (1 - p * (round mod floor(1/p)))
//! ```
//!
//! Only nodes that have not headed yet in the current epoch are eligible.
//! T grows through the epoch and reaches 1 in its last round, so every
//! node that is still eligible then becomes head.
//!
//! Eligibility bookkeeping (`ch_enable`) is the caller's job; `next_round`
//! computes the state for the following boot.

use crate::types::RoundState;
use thiserror::Error;
use tracing::debug;

/// Slack added to `1/p` before flooring so `p = 1/R` maps back to exactly `R`
const EPOCH_ROUNDING_SLACK: f64 = 1e-9;

/// Election errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElectionError {
    /// `floor(1/p)` is zero or undefined, so the threshold divides by zero
    #[error("election probability {0} yields no rounds per epoch")]
    DegenerateProbability(f64),
}

/// Rounds per epoch implied by the election probability, `floor(1/p)`
pub fn rounds_per_epoch(p: f64) -> Result<u64, ElectionError> {
    if !p.is_finite() || p <= 0.0 {
        return Err(ElectionError::DegenerateProbability(p));
    }
    let rounds = (1.0 / p + EPOCH_ROUNDING_SLACK).floor();
    if rounds < 1.0 || !rounds.is_finite() {
        return Err(ElectionError::DegenerateProbability(p));
    }
    Ok(rounds as u64)
}

/// Election threshold for `round` under probability `p`
pub fn threshold(p: f64, round: u16) -> Result<f64, ElectionError> {
    let epoch = rounds_per_epoch(p)?;
    let position = u64::from(round) % epoch;
    Ok(p / (1.0 - p * position as f64))
}

/// Decide whether this node heads the round described by `state`.
///
/// `rnd` must be a fresh uniform draw in `[0, 1)`.
pub fn decide_role(state: &RoundState, p: f64, rnd: f64) -> Result<bool, ElectionError> {
    let t = threshold(p, state.round)?;
    let head = state.ch_enable && rnd < t;

    debug!(
        "Election: round={} ch_enable={} draw={:.4} T={:.4} -> head={}",
        state.round, state.ch_enable, rnd, t, head
    );

    Ok(head)
}

/// State for the next boot.
///
/// Heading clears eligibility until the epoch wraps; the wrap resets every
/// node to round 0 and eligible.
pub fn next_round(state: &RoundState, was_head: bool, epoch_length: u16) -> RoundState {
    let next = u32::from(state.round) + 1;
    if next >= u32::from(epoch_length) {
        return RoundState::default();
    }

    RoundState {
        round: next as u16,
        ch_enable: state.ch_enable && !was_head,
    }
}
