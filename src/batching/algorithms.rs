use super::BatchAlgorithm;
use crate::context::RoutingContext;
use crate::core::OutgoingBatch;
use crate::router::DataMetaData;

/// Closes a batch once it reaches the channel's size, but only on a transaction boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBatchAlgorithm;

impl BatchAlgorithm for DefaultBatchAlgorithm {
    fn is_batch_complete(
        &self,
        batch: &OutgoingBatch,
        data: &DataMetaData<'_>,
        context: &RoutingContext,
    ) -> bool {
        batch.data_event_count >= data.channel.max_batch_size as u64
            && context.is_encountered_transaction_boundary()
    }
}

/// Closes a batch as soon as it reaches the channel's size, even mid-transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonTransactionalBatchAlgorithm;

impl BatchAlgorithm for NonTransactionalBatchAlgorithm {
    fn is_batch_complete(
        &self,
        batch: &OutgoingBatch,
        data: &DataMetaData<'_>,
        _context: &RoutingContext,
    ) -> bool {
        batch.data_event_count >= data.channel.max_batch_size as u64
    }
}

/// One batch per source transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionalBatchAlgorithm;

impl BatchAlgorithm for TransactionalBatchAlgorithm {
    fn is_batch_complete(
        &self,
        _batch: &OutgoingBatch,
        _data: &DataMetaData<'_>,
        context: &RoutingContext,
    ) -> bool {
        context.is_encountered_transaction_boundary()
    }
}
