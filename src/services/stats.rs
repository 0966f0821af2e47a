/// Sink for routing counters, keyed by channel.
pub trait StatisticSink: Send + Sync {
    fn increment_data_routed(&self, channel_id: &str, count: u64);

    fn increment_data_event_inserted(&self, channel_id: &str, count: u64);

    /// Replaces the number of records still waiting to be routed on a channel.
    fn set_data_unrouted(&self, channel_id: &str, count: u64);
}
