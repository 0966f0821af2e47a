pub mod batch;
pub mod error;
pub mod types;

pub use batch::{BatchStatus, OutgoingBatch};
pub use error::{Result, RoutingError};
pub use types::{
    BatchId, ChangeRecord, ChannelDescriptor, DataEvent, DataId, EventKind, Node, NodeGroupLink,
    NodeSecurity, RouterDefinition, TriggerRouter, UNROUTED_NODE_ID,
};
