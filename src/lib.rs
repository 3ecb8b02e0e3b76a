//! Topic pub/sub WebSocket client.
//!
//! One long-lived connection multiplexes many logical topic subscriptions.
//! The client actor owns connection state, the topic registry and the
//! reconnect policy; the socket IO loop runs outside the actor and forwards
//! frames via messages. Unexpected disconnects are retried with capped
//! exponential backoff, and every active subscription is replayed once the
//! connection is rebuilt.

pub mod client;
pub mod core;
pub mod testing;
pub mod tls;
pub mod transport;

pub use client::{PubSubClient, Subscription};
pub use core::{
    ConnectParams, ConnectionStatus, InboundFrame, PubSubConfig, PubSubError, PubSubResult,
    SessionState,
};
