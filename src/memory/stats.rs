use crate::services::StatisticSink;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Counters recorded for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatistics {
    pub data_routed: u64,
    /// Number of `increment_data_routed` calls.
    pub data_routed_updates: u64,
    pub data_events_inserted: u64,
    /// Last reported backlog, `None` until one was reported.
    pub data_unrouted: Option<u64>,
}

/// A `StatisticSink` that keeps per-channel counters in memory.
#[derive(Default)]
pub struct MemoryStatistics {
    channels: Mutex<HashMap<String, ChannelStatistics>>,
}

impl MemoryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, channel_id: &str) -> ChannelStatistics {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    fn update(&self, channel_id: &str, apply: impl FnOnce(&mut ChannelStatistics)) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        apply(channels.entry(channel_id.to_string()).or_default());
    }
}

impl StatisticSink for MemoryStatistics {
    fn increment_data_routed(&self, channel_id: &str, count: u64) {
        self.update(channel_id, |stats| {
            stats.data_routed += count;
            stats.data_routed_updates += 1;
        });
    }

    fn increment_data_event_inserted(&self, channel_id: &str, count: u64) {
        self.update(channel_id, |stats| stats.data_events_inserted += count);
    }

    fn set_data_unrouted(&self, channel_id: &str, count: u64) {
        self.update(channel_id, |stats| stats.data_unrouted = Some(count));
    }
}
