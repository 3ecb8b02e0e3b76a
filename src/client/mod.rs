//! Client actor, public handle, and topic registry.

pub mod actor;
pub mod handle;
pub mod registry;

pub use actor::{
    Connect, Disconnect, GetConnectionStatus, GetSessionState, GetStats, Publish, PubSubActor,
    PubSubActorArgs, StopReconnecting, Subscribe, TopicBinding, Unsubscribe,
};
pub use handle::{PubSubClient, Subscription};
pub use registry::{CallbackId, TopicCallback, TopicRegistry};
