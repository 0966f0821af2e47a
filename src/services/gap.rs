use super::DataStore;
use crate::core::DataId;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{Level, event};

/// Hooks around a routing pass for finding change records that were skipped because
/// they became visible out of id order.
#[async_trait]
pub trait GapDetector: Send + Sync {
    async fn before_routing(&self);

    async fn after_routing(&self);
}

/// Gap detector that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGapDetector;

#[async_trait]
impl GapDetector for NoopGapDetector {
    async fn before_routing(&self) {}

    async fn after_routing(&self) {}
}

/// Inclusive range of unrouted change record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataGap {
    pub start_id: DataId,
    pub end_id: DataId,
}

impl DataGap {
    pub fn record_count(&self) -> u64 {
        self.end_id - self.start_id + 1
    }

    fn contains(&self, other: &DataGap) -> bool {
        self.start_id <= other.start_id && other.end_id <= self.end_id
    }
}

/// Collapses ascending ids into contiguous ranges.
pub fn compress_gaps(ids: &[DataId]) -> Vec<DataGap> {
    let mut gaps: Vec<DataGap> = Vec::new();
    for &id in ids {
        match gaps.last_mut() {
            Some(gap) if gap.end_id + 1 == id => gap.end_id = id,
            _ => gaps.push(DataGap {
                start_id: id,
                end_id: id,
            }),
        }
    }
    gaps
}

#[derive(Default)]
struct GapState {
    watermark: Option<DataId>,
    gaps: Vec<DataGap>,
}

/// Reports unrouted records that sit below the highest routed id.
///
/// Such records were either committed after higher ids had already been routed or were
/// deferred by a per-pass limit. They stay pending and are picked up by later passes;
/// this detector only makes them observable.
pub struct UnroutedGapDetector {
    store: Arc<dyn DataStore>,
    state: Mutex<GapState>,
}

impl UnroutedGapDetector {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            state: Mutex::new(GapState::default()),
        }
    }

    /// Gaps found by the most recent pass.
    pub fn detected_gaps(&self) -> Vec<DataGap> {
        match self.state.lock() {
            Ok(state) => state.gaps.clone(),
            Err(poisoned) => poisoned.into_inner().gaps.clone(),
        }
    }
}

#[async_trait]
impl GapDetector for UnroutedGapDetector {
    async fn before_routing(&self) {
        match self.store.max_routed_data_id().await {
            Ok(watermark) => {
                if let Ok(mut state) = self.state.lock() {
                    state.watermark = watermark;
                }
            }
            Err(err) => {
                event!(Level::WARN, error = %err, "gap detector could not read routed watermark");
            }
        }
    }

    async fn after_routing(&self) {
        let max_routed = match self.store.max_routed_data_id().await {
            Ok(Some(max_routed)) => max_routed,
            Ok(None) => return,
            Err(err) => {
                event!(Level::WARN, error = %err, "gap detector could not read routed watermark");
                return;
            }
        };

        let ids = match self.store.unrouted_data_ids_below(max_routed).await {
            Ok(ids) => ids,
            Err(err) => {
                event!(Level::WARN, error = %err, "gap detector could not list unrouted data");
                return;
            }
        };

        let gaps = compress_gaps(&ids);
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        for gap in &gaps {
            if !state.gaps.iter().any(|known| known.contains(gap)) {
                event!(
                    Level::WARN,
                    start_id = gap.start_id,
                    end_id = gap.end_id,
                    previous_watermark = ?state.watermark,
                    "detected gap in routed data"
                );
            }
        }
        state.gaps = gaps;
        state.watermark = Some(max_routed);
    }
}
