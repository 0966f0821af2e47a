pub mod column_match;
pub mod default;

pub use column_match::ColumnMatchDataRouter;
pub use default::DefaultDataRouter;

use crate::context::RoutingContext;
use crate::core::{ChangeRecord, ChannelDescriptor, Node, OutgoingBatch, Result, RoutingError, TriggerRouter};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{Level, event};

/// Name under which the fallback router is registered.
pub const DEFAULT_ROUTER: &str = "default";

/// A change record together with the binding and channel it is being routed for.
#[derive(Debug, Clone, Copy)]
pub struct DataMetaData<'a> {
    pub data: &'a ChangeRecord,
    pub trigger_router: &'a TriggerRouter,
    pub channel: &'a ChannelDescriptor,
}

impl<'a> DataMetaData<'a> {
    pub fn new(
        data: &'a ChangeRecord,
        trigger_router: &'a TriggerRouter,
        channel: &'a ChannelDescriptor,
    ) -> Self {
        Self {
            data,
            trigger_router,
            channel,
        }
    }
}

/// Decides which nodes receive a change record.
pub trait DataRouter: Send + Sync {
    /// Returns the ids of the nodes in `nodes` that should receive the record.
    fn route_to_nodes(
        &self,
        context: &RoutingContext,
        data: &DataMetaData<'_>,
        nodes: &[Node],
        initial_load: bool,
    ) -> BTreeSet<String>;

    /// Called for every batch closed in a pass where this router was used.
    fn complete_batch(&self, _context: &RoutingContext, _batch: &mut OutgoingBatch) {}
}

/// Routers by type name.
#[derive(Clone)]
pub struct RouterRegistry {
    routers: HashMap<String, Arc<dyn DataRouter>>,
}

impl RouterRegistry {
    /// Empty registry. Resolution fails until a `default` router is registered.
    pub fn new() -> Self {
        Self {
            routers: HashMap::new(),
        }
    }

    /// Registry with the built-in `default` and `column` routers.
    pub fn with_default_routers() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_ROUTER, Arc::new(DefaultDataRouter));
        registry.register("column", Arc::new(ColumnMatchDataRouter));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, router: Arc<dyn DataRouter>) {
        self.routers.insert(name.into(), router);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DataRouter>> {
        self.routers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Looks up the router for a binding, falling back to `default` when the type is blank
    /// or unknown. Returns the name the router was resolved under.
    pub fn resolve(&self, trigger_router: &TriggerRouter) -> Result<(String, Arc<dyn DataRouter>)> {
        let router_type = trigger_router
            .router
            .router_type
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());

        if let Some(name) = router_type {
            if let Some(router) = self.routers.get(name) {
                return Ok((name.to_string(), router.clone()));
            }
            event!(
                Level::WARN,
                router_type = name,
                trigger_id = %trigger_router.trigger_id,
                router_id = %trigger_router.router.router_id,
                "router type is not registered, using the default router"
            );
        }

        self.routers
            .get(DEFAULT_ROUTER)
            .map(|router| (DEFAULT_ROUTER.to_string(), router.clone()))
            .ok_or_else(|| {
                RoutingError::Configuration(format!(
                    "no '{}' router is registered (router '{}')",
                    DEFAULT_ROUTER, trigger_router.router.router_id
                ))
            })
    }
}

impl Default for RouterRegistry {
    fn default() -> Self {
        Self::with_default_routers()
    }
}
