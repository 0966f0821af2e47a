//! Batch completion policies.
//!
//! A policy looks at an open batch after each routed event and says whether the batch
//! is full. Completing any batch commits every batch open in the same routing context.

mod algorithms;

pub use algorithms::{
    DefaultBatchAlgorithm, NonTransactionalBatchAlgorithm, TransactionalBatchAlgorithm,
};

use crate::context::RoutingContext;
use crate::core::{ChannelDescriptor, OutgoingBatch, Result, RoutingError};
use crate::router::DataMetaData;
use std::collections::HashMap;
use std::sync::Arc;

pub trait BatchAlgorithm: Send + Sync {
    /// Must not change state: asking twice about the same batch gives the same answer.
    fn is_batch_complete(
        &self,
        batch: &OutgoingBatch,
        data: &DataMetaData<'_>,
        context: &RoutingContext,
    ) -> bool;
}

/// Batch algorithms by name.
#[derive(Clone)]
pub struct BatchAlgorithmRegistry {
    algorithms: HashMap<String, Arc<dyn BatchAlgorithm>>,
}

impl BatchAlgorithmRegistry {
    pub fn new() -> Self {
        Self {
            algorithms: HashMap::new(),
        }
    }

    /// Registry with `default`, `nontransactional` and `transactional`.
    pub fn with_default_algorithms() -> Self {
        let mut registry = Self::new();
        registry.register("default", Arc::new(DefaultBatchAlgorithm));
        registry.register("nontransactional", Arc::new(NonTransactionalBatchAlgorithm));
        registry.register("transactional", Arc::new(TransactionalBatchAlgorithm));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, algorithm: Arc<dyn BatchAlgorithm>) {
        self.algorithms.insert(name.into(), algorithm);
    }

    /// Looks up the channel's algorithm. There is no fallback: picking a policy the
    /// channel did not ask for would change delivery semantics.
    pub fn resolve(&self, channel: &ChannelDescriptor) -> Result<Arc<dyn BatchAlgorithm>> {
        let name = channel.batch_algorithm.trim();
        if name.is_empty() {
            return Err(RoutingError::Configuration(format!(
                "channel '{}' has no batch algorithm configured",
                channel.channel_id
            )));
        }

        self.algorithms.get(name).cloned().ok_or_else(|| {
            RoutingError::Configuration(format!(
                "batch algorithm '{}' configured for channel '{}' is not registered",
                name, channel.channel_id
            ))
        })
    }
}

impl Default for BatchAlgorithmRegistry {
    fn default() -> Self {
        Self::with_default_algorithms()
    }
}
