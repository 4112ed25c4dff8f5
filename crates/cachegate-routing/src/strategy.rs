//! Selection strategies for connection choice
//!
//! A strategy turns the reachable connections of a pool into an ordered
//! candidate list. The first candidate is the selected connection; the
//! rest are the failover order.
//!
//! ## Strategies
//!
//! ### First-Available
//! Pool order; the first reachable connection wins.
//!
//! ### Random
//! Uniformly shuffled candidates on every call.
//!
//! ### Round-Robin
//! Equal distribution across the reachable connections.
//!
//! ```rust
//! use cachegate_routing::{SelectionStrategy, StrategyState};
//!
//! let state = StrategyState::new();
//! let order = state.order(&SelectionStrategy::RoundRobin, vec!["c1", "c2", "c3"], |_| 1);
//! assert_eq!(order, vec!["c1", "c2", "c3"]);
//! let order = state.order(&SelectionStrategy::RoundRobin, vec!["c1", "c2", "c3"], |_| 1);
//! assert_eq!(order, vec!["c2", "c3", "c1"]);
//! ```
//!
//! ### Weighted
//! Weighted round-robin over connection weights (capacity, cost, etc.).
//!
//! ### Broadcast
//! Every reachable connection is invoked; ordering is pool order.
//!
//! ## Thread Safety
//!
//! Counters are atomics that wrap at `usize::MAX`; selection never blocks.

use cachegate_core::MethodId;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Selection strategy configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// First reachable connection in pool order
    #[default]
    FirstAvailable,
    /// Random reachable connection
    Random,
    /// Rotate through reachable connections
    RoundRobin,
    /// Weighted round-robin over connection weights
    Weighted,
    /// Invoke every reachable connection
    Broadcast,
}

impl SelectionStrategy {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, SelectionStrategy::Broadcast)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::FirstAvailable => "first-available",
            SelectionStrategy::Random => "random",
            SelectionStrategy::RoundRobin => "round-robin",
            SelectionStrategy::Weighted => "weighted",
            SelectionStrategy::Broadcast => "broadcast",
        }
    }

    /// Validate the strategy against the weights of the pool's connections
    pub fn validate(&self, weights: &[u32]) -> Result<(), StrategyError> {
        if weights.is_empty() {
            return Err(StrategyError::EmptyConnectionList);
        }

        if let SelectionStrategy::Weighted = self {
            let total_weight = weights
                .iter()
                .try_fold(0u32, |acc, w| acc.checked_add(*w))
                .ok_or(StrategyError::WeightOverflow)?;

            if total_weight == 0 {
                return Err(StrategyError::ZeroTotalWeight);
            }
        }

        Ok(())
    }
}

/// How many connections a strategy-selected call may try
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverPolicy {
    /// Upper bound on attempts; `None` means one per reachable connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,

    /// Allow retrying mutating methods on another connection
    #[serde(default)]
    pub retry_mutations: bool,
}

impl FailoverPolicy {
    /// Failover disabled: a single attempt for every method
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(1),
            retry_mutations: false,
        }
    }

    /// Number of attempts for `method` given `candidates` reachable connections
    pub fn attempts_for(&self, method: &MethodId, candidates: usize) -> usize {
        if method.is_mutating() && !self.retry_mutations {
            return candidates.min(1);
        }
        match self.max_attempts {
            Some(max) => max.min(candidates),
            None => candidates,
        }
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.max_attempts == Some(0) {
            return Err(StrategyError::ZeroAttempts);
        }
        Ok(())
    }
}

/// Strategy execution state (maintains counters between calls)
#[derive(Debug)]
pub struct StrategyState {
    /// Counter for round-robin selection
    round_robin_counter: AtomicUsize,
    /// Position in the weighted sequence
    weighted_position: AtomicUsize,
}

impl StrategyState {
    pub fn new() -> Self {
        Self {
            round_robin_counter: AtomicUsize::new(0),
            weighted_position: AtomicUsize::new(0),
        }
    }

    /// Order candidates for a call. `weight_of` supplies each candidate's
    /// weight for the weighted strategy.
    pub fn order<T>(
        &self,
        strategy: &SelectionStrategy,
        mut candidates: Vec<T>,
        weight_of: impl Fn(&T) -> u32,
    ) -> Vec<T> {
        if candidates.len() < 2 {
            return candidates;
        }

        match strategy {
            SelectionStrategy::FirstAvailable | SelectionStrategy::Broadcast => candidates,

            SelectionStrategy::Random => {
                candidates.shuffle(&mut rand::rng());
                candidates
            }

            SelectionStrategy::RoundRobin => {
                // fetch_add wraps on overflow
                let index = self.round_robin_counter.fetch_add(1, Ordering::AcqRel);
                let start = index % candidates.len();
                candidates.rotate_left(start);
                candidates
            }

            SelectionStrategy::Weighted => {
                let weights: Vec<u32> = candidates.iter().map(&weight_of).collect();
                let position = self.weighted_position.fetch_add(1, Ordering::AcqRel);
                if let Some(selected) = select_weighted(position, &weights) {
                    let chosen = candidates.remove(selected);
                    candidates.insert(0, chosen);
                }
                candidates
            }
        }
    }
}

impl Default for StrategyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a sequence position onto a candidate index by cumulative weight.
///
/// Returns `None` when the weights sum to zero or overflow, in which case
/// pool order applies.
fn select_weighted(position: usize, weights: &[u32]) -> Option<usize> {
    let total_weight = weights
        .iter()
        .try_fold(0u32, |acc, w| acc.checked_add(*w))?;

    if total_weight == 0 {
        return None;
    }

    let normalized_position = (position % total_weight as usize) as u32;
    let mut cumulative_weight = 0u32;

    for (index, weight) in weights.iter().enumerate() {
        cumulative_weight = cumulative_weight.saturating_add(*weight);
        if normalized_position < cumulative_weight {
            return Some(index);
        }
    }

    None
}

/// Strategy-related errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StrategyError {
    #[error("Connection list cannot be empty")]
    EmptyConnectionList,

    #[error("Total weight cannot be zero")]
    ZeroTotalWeight,

    #[error("Weight overflow: total weight exceeds maximum allowed value")]
    WeightOverflow,

    #[error("Failover max_attempts must be greater than 0")]
    ZeroAttempts,
}
