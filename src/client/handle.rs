//! Owned client handle over the pub/sub actor.
//!
//! `PubSubClient` is a cheap clone of an actor reference; all clones drive the
//! same connection. Dropping every clone does not stop the actor; call
//! [`PubSubClient::disconnect`] to tear the session down.

use std::sync::Arc;

use kameo::actor::ActorRef;
use kameo::error::SendError;
use kameo::prelude::Actor;

use super::actor::{
    Connect, Disconnect, GetConnectionStatus, GetSessionState, GetStats, Publish, PubSubActor,
    PubSubActorArgs, StopReconnecting, Subscribe, TopicBinding, Unsubscribe,
};
use super::registry::TopicCallback;
use crate::core::{
    ClientStats, ConnectParams, ConnectionStatus, InboundFrame, PubSubConfig, PubSubError,
    PubSubResult, SessionState,
};
use crate::transport::PubSubTransport;
use crate::transport::tungstenite::TungsteniteTransport;

fn map_send_error<M>(err: SendError<M, PubSubError>) -> PubSubError {
    match err {
        SendError::HandlerError(err) => err,
        SendError::ActorNotRunning(_) => PubSubError::ActorError("actor not running".to_string()),
        SendError::ActorStopped => PubSubError::ActorError("actor stopped".to_string()),
        _ => PubSubError::ActorError("mailbox send failed".to_string()),
    }
}

/// Handle to one pub/sub client instance.
pub struct PubSubClient<T = TungsteniteTransport>
where
    T: PubSubTransport,
{
    actor: ActorRef<PubSubActor<T>>,
}

impl<T> Clone for PubSubClient<T>
where
    T: PubSubTransport,
{
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
        }
    }
}

impl PubSubClient<TungsteniteTransport> {
    /// Client backed by the tokio-tungstenite transport.
    pub fn new(config: PubSubConfig) -> Self {
        Self::with_transport(TungsteniteTransport::default(), config)
    }
}

impl<T> PubSubClient<T>
where
    T: PubSubTransport,
{
    pub fn with_transport(transport: T, config: PubSubConfig) -> Self {
        let actor = PubSubActor::spawn(PubSubActorArgs { transport, config });
        Self { actor }
    }

    /// Open the connection. Idempotent: if a connection already exists this
    /// resolves immediately, and a call issued while a handshake is in flight
    /// joins that attempt instead of opening a second socket. A failure here
    /// is returned to the caller; automatic reconnection only covers
    /// connections lost after they were established.
    pub async fn connect(&self, params: ConnectParams) -> PubSubResult<()> {
        self.actor
            .ask(Connect { params })
            .await
            .map_err(map_send_error)
    }

    /// Voluntarily close the connection. No reconnection is attempted, all
    /// subscriptions are dropped, and queued outbound frames are discarded.
    pub async fn disconnect(&self) -> PubSubResult<()> {
        self.actor.ask(Disconnect).await.map_err(map_send_error)
    }

    /// Register `callback` for every topic in `topics` and subscribe on the
    /// wire where needed. The returned guard unsubscribes exactly these
    /// registrations when dropped; other listeners on the same topics are
    /// unaffected.
    pub async fn subscribe<F>(&self, topics: &[&str], callback: F) -> PubSubResult<Subscription<T>>
    where
        F: Fn(&InboundFrame) + Send + Sync + 'static,
    {
        let callback: TopicCallback = Arc::new(callback);
        let bindings = self
            .actor
            .ask(Subscribe {
                topics: topics.iter().map(|topic| topic.to_string()).collect(),
                callback,
            })
            .await
            .map_err(map_send_error)?;
        Ok(Subscription {
            actor: self.actor.clone(),
            bindings,
        })
    }

    /// Publish `data` to `topic`. Both must be non-empty. While disconnected
    /// the frame is queued and flushed on the next (re)connect, up to the
    /// configured queue capacity.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        data: impl Into<String>,
    ) -> PubSubResult<()> {
        self.actor
            .ask(Publish {
                topic: topic.into(),
                data: data.into(),
            })
            .await
            .map_err(map_send_error)
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_status().await == ConnectionStatus::Connected
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        self.actor
            .ask(GetConnectionStatus)
            .await
            .unwrap_or(ConnectionStatus::Unknown)
    }

    /// Fine-grained lifecycle state, distinguishing `AwaitingRetry` and
    /// `GivenUp` from a plain disconnect.
    pub async fn session_state(&self) -> PubSubResult<SessionState> {
        self.actor
            .ask(GetSessionState)
            .await
            .map_err(|_| PubSubError::ActorError("actor not running".to_string()))
    }

    pub async fn stats(&self) -> PubSubResult<ClientStats> {
        self.actor
            .ask(GetStats)
            .await
            .map_err(|_| PubSubError::ActorError("actor not running".to_string()))
    }

    /// Abandon any pending automatic reconnect without dropping
    /// subscriptions; a later explicit `connect()` resumes normally.
    pub async fn stop_reconnecting(&self) -> PubSubResult<()> {
        self.actor
            .ask(StopReconnecting)
            .await
            .map_err(|_| PubSubError::ActorError("actor not running".to_string()))
    }
}

/// Guard for one `subscribe` call.
///
/// Dropping it removes exactly the callbacks that call registered, issuing a
/// wire unsubscribe for topics left without listeners. The guard stays valid
/// across reconnects.
#[must_use = "dropping a Subscription unsubscribes its callbacks"]
pub struct Subscription<T = TungsteniteTransport>
where
    T: PubSubTransport,
{
    actor: ActorRef<PubSubActor<T>>,
    bindings: Vec<TopicBinding>,
}

impl<T> std::fmt::Debug for Subscription<T>
where
    T: PubSubTransport,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl<T> Subscription<T>
where
    T: PubSubTransport,
{
    pub fn topics(&self) -> Vec<&str> {
        self.bindings
            .iter()
            .map(|binding| binding.topic.as_str())
            .collect()
    }

    /// Unsubscribe now and observe the result, instead of relying on drop.
    pub async fn unsubscribe(mut self) -> PubSubResult<()> {
        let bindings = std::mem::take(&mut self.bindings);
        self.actor
            .ask(Unsubscribe { bindings })
            .await
            .map_err(map_send_error)
    }

    /// Leak the registrations: callbacks stay installed for the lifetime of
    /// the client (or until `disconnect`).
    pub fn detach(mut self) {
        self.bindings.clear();
    }
}

impl<T> Drop for Subscription<T>
where
    T: PubSubTransport,
{
    fn drop(&mut self) {
        if self.bindings.is_empty() {
            return;
        }
        let bindings = std::mem::take(&mut self.bindings);
        // Fire-and-forget; drop may run outside an async context.
        let _ = self.actor.tell(Unsubscribe { bindings }).try_send();
    }
}
