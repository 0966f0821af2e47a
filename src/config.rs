use crate::core::{Result, RoutingError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Routing configuration
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use changeroute::RoutingConfig;
///
/// let config = RoutingConfig::from_json(r#"{ "stats_flush_size": 10 }"#).unwrap();
/// assert_eq!(config.stats_flush_size, 10);
/// assert_eq!(config.route_lock_name, "ROUTE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Name of the cluster-wide lock that serializes routing passes
    pub route_lock_name: String,

    /// Buffered data events are written in bulk once this many accumulate
    pub flush_event_batch_size: usize,

    /// Routed-record counters are pushed to statistics every this many records
    pub stats_flush_size: usize,

    /// Capacity of the hand-off queue between the record reader and the router
    pub reader_queue_capacity: usize,

    /// Operations slower than this are logged at warn level
    pub long_operation_threshold_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            route_lock_name: "ROUTE".to_string(),
            flush_event_batch_size: 50_000,
            stats_flush_size: 1_000,
            reader_queue_capacity: 1_000,
            long_operation_threshold_ms: 30_000,
        }
    }
}

impl RoutingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the routing lock name
    pub fn route_lock_name(mut self, name: &str) -> Self {
        self.route_lock_name = name.to_string();
        self
    }

    /// Set the bulk flush threshold for data events
    pub fn flush_event_batch_size(mut self, size: usize) -> Self {
        self.flush_event_batch_size = size;
        self
    }

    /// Set the statistics flush interval (in records)
    pub fn stats_flush_size(mut self, size: usize) -> Self {
        self.stats_flush_size = size;
        self
    }

    /// Set the reader queue capacity
    pub fn reader_queue_capacity(mut self, capacity: usize) -> Self {
        self.reader_queue_capacity = capacity;
        self
    }

    /// Set the long operation threshold
    pub fn long_operation_threshold(mut self, threshold: Duration) -> Self {
        self.long_operation_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn long_operation_threshold_duration(&self) -> Duration {
        Duration::from_millis(self.long_operation_threshold_ms)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| RoutingError::Configuration(format!("parse routing config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.route_lock_name.trim().is_empty() {
            return Err(RoutingError::Configuration(
                "route_lock_name cannot be empty".to_string(),
            ));
        }

        if self.flush_event_batch_size == 0 {
            return Err(RoutingError::Configuration(
                "flush_event_batch_size must be > 0".to_string(),
            ));
        }

        if self.stats_flush_size == 0 {
            return Err(RoutingError::Configuration(
                "stats_flush_size must be > 0".to_string(),
            ));
        }

        if self.reader_queue_capacity == 0 {
            return Err(RoutingError::Configuration(
                "reader_queue_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RoutingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.long_operation_threshold_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let config = RoutingConfig::new()
            .route_lock_name("ROUTE_EAST")
            .flush_event_batch_size(10)
            .reader_queue_capacity(4)
            .long_operation_threshold(Duration::from_millis(250));

        assert_eq!(config.route_lock_name, "ROUTE_EAST");
        assert_eq!(config.flush_event_batch_size, 10);
        assert_eq!(config.reader_queue_capacity, 4);
        assert_eq!(config.long_operation_threshold_ms, 250);
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let config = RoutingConfig::new().reader_queue_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(RoutingError::Configuration(_))
        ));

        let config = RoutingConfig::new().route_lock_name("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_rejects_invalid_documents() {
        assert!(RoutingConfig::from_json("not json").is_err());
        assert!(RoutingConfig::from_json(r#"{ "stats_flush_size": 0 }"#).is_err());
    }
}
