//! Pub/sub client actor.
//!
//! The socket IO read loop runs outside kameo for throughput; the actor owns
//! connection lifecycle, the topic registry, the reconnect policy and the
//! pending outbound queue, and receives frames via messages. The transport
//! handshake also runs in its own task and reports back as a message, so
//! status reads and disconnects never queue behind a slow dial; callers
//! awaiting `connect()` are parked on delegated replies and settled when the
//! handshake resolves. Exactly one handshake is in flight at a time, so
//! concurrent `connect()` calls share one socket.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use kameo::reply::{DelegatedReply, ReplySender};

use super::registry::{Removal, TopicCallback, TopicRegistry};
use crate::core::protocol::{self, Inbound, InboundFrame};
use crate::core::{
    ClientStats, ConnectParams, ConnectionHealth, ConnectionStatus, PubSubConfig, PubSubError,
    PubSubResult, ReconnectPolicy, SessionState, WsFrame, frame_bytes,
};
use crate::transport::PubSubTransport;

pub use super::registry::CallbackId;

/// One registered (topic, callback) pair, as returned by subscribe and
/// consumed by unsubscribe.
#[derive(Debug, Clone)]
pub struct TopicBinding {
    pub topic: String,
    pub id: CallbackId,
}

/// Arguments passed when constructing a client actor instance.
pub struct PubSubActorArgs<T>
where
    T: PubSubTransport,
{
    pub transport: T,
    pub config: PubSubConfig,
}

pub struct PubSubActor<T>
where
    T: PubSubTransport,
{
    transport: T,
    config: PubSubConfig,
    actor_ref: ActorRef<Self>,
    /// Stored on first connect for reconnection use; cleared by disconnect.
    params: Option<ConnectParams>,
    state: SessionState,
    /// Distinguishes voluntary close from failure.
    should_reconnect: bool,
    reconnect: ReconnectPolicy,
    registry: TopicRegistry,
    health: ConnectionHealth,
    writer: Option<T::Writer>,
    reader_task: Option<JoinHandle<()>>,
    stale_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    handshake_task: Option<JoinHandle<()>>,
    /// Callers parked on `connect()` until the in-flight handshake settles.
    connect_waiters: Vec<ReplySender<PubSubResult<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    pending_outbound: VecDeque<WsFrame>,
    /// Incremented per established connection; events stamped with an older
    /// generation are leftovers from a torn-down socket and are ignored.
    generation: u64,
    /// Incremented per handshake attempt (and on disconnect), so a late
    /// handshake outcome from a superseded attempt is discarded.
    connect_epoch: u64,
}

impl<T> Actor for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Args = PubSubActorArgs<T>;
    type Error = PubSubError;

    fn name() -> &'static str {
        "PubSubActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> PubSubResult<Self> {
        let PubSubActorArgs { transport, config } = args;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconnect = ReconnectPolicy::new(
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            config.max_reconnect_attempts,
        );
        let health = ConnectionHealth::new(config.stale_threshold.unwrap_or(Duration::MAX));

        Ok(Self {
            transport,
            config,
            actor_ref: ctx,
            params: None,
            state: SessionState::Idle,
            should_reconnect: false,
            reconnect,
            registry: TopicRegistry::new(),
            health,
            writer: None,
            reader_task: None,
            stale_task: None,
            retry_task: None,
            handshake_task: None,
            connect_waiters: Vec::new(),
            shutdown_tx,
            shutdown_rx,
            pending_outbound: VecDeque::new(),
            generation: 0,
            connect_epoch: 0,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> PubSubResult<()> {
        self.cancel_retry();
        self.abort_handshake();
        self.teardown_io().await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "PubSubActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Public messages
// ---------------------------------------------------------------------------

pub struct Connect {
    pub params: ConnectParams,
}

pub struct Disconnect;

pub struct Subscribe {
    pub topics: Vec<String>,
    pub callback: TopicCallback,
}

pub struct Unsubscribe {
    pub bindings: Vec<TopicBinding>,
}

pub struct Publish {
    pub topic: String,
    pub data: String,
}

pub struct StopReconnecting;

pub struct GetConnectionStatus;

pub struct GetSessionState;

pub struct GetStats;

// ---------------------------------------------------------------------------
// Internal messages (IO tasks -> actor)
// ---------------------------------------------------------------------------

pub(crate) struct HandshakeOutcome<T>
where
    T: PubSubTransport,
{
    pub(crate) epoch: u64,
    pub(crate) result: PubSubResult<(T::Reader, T::Writer)>,
}

pub(crate) struct InboundEvent {
    pub(crate) generation: u64,
    pub(crate) frame: WsFrame,
}

pub(crate) struct ConnectionLost {
    pub(crate) generation: u64,
    pub(crate) reason: String,
}

pub(crate) struct Retry;

pub(crate) struct CheckStale {
    pub(crate) generation: u64,
}

impl<T> KameoMessage<Connect> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = DelegatedReply<PubSubResult<()>>;

    async fn handle(&mut self, msg: Connect, ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let (delegated, reply_sender) = ctx.reply_sender();
        match self.state {
            SessionState::Connected => {
                debug!("already connected; connect is a no-op");
                if let Some(waiter) = reply_sender {
                    waiter.send(Ok(()));
                }
            }
            SessionState::Connecting => {
                // Join the in-flight handshake instead of opening a second
                // socket.
                if let Some(waiter) = reply_sender {
                    self.connect_waiters.push(waiter);
                }
            }
            SessionState::Idle | SessionState::AwaitingRetry | SessionState::GivenUp => {
                // An explicit connect resets the retry budget (GivenUp
                // recovery) and cancels any pending retry timer.
                self.cancel_retry();
                self.reconnect.reset();
                self.should_reconnect = true;
                self.params = Some(msg.params);
                if let Some(waiter) = reply_sender {
                    self.connect_waiters.push(waiter);
                }
                self.begin_handshake();
            }
        }
        delegated
    }
}

impl<T> KameoMessage<HandshakeOutcome<T>> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<()>;

    async fn handle(
        &mut self,
        msg: HandshakeOutcome<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.epoch != self.connect_epoch || self.state != SessionState::Connecting {
            // A disconnect (or a newer attempt) superseded this handshake;
            // discard the late socket.
            if let Ok((_reader, mut writer)) = msg.result {
                let _ = writer.close().await;
            }
            return Ok(());
        }
        self.handshake_task = None;

        match msg.result {
            Ok((reader, writer)) => {
                self.establish(reader, writer).await;
                for waiter in std::mem::take(&mut self.connect_waiters) {
                    waiter.send(Ok(()));
                }
            }
            Err(err) => {
                if self.connect_waiters.is_empty() {
                    // Automatic retry attempt; stay on the backoff schedule.
                    warn!(error = %err, "reconnect attempt failed");
                    self.schedule_retry(&err.to_string());
                } else {
                    // Caller-driven connect failures reject the callers;
                    // automatic retry only covers established connections.
                    self.state = SessionState::Idle;
                    for waiter in std::mem::take(&mut self.connect_waiters) {
                        waiter.send(Err(err.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}

impl<T> KameoMessage<Disconnect> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<()>;

    async fn handle(
        &mut self,
        _msg: Disconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.should_reconnect = false;
        self.cancel_retry();
        self.abort_handshake();
        // Invalidate any handshake outcome already queued in the mailbox.
        self.connect_epoch += 1;
        for waiter in std::mem::take(&mut self.connect_waiters) {
            waiter.send(Err(PubSubError::InvalidState(
                "disconnected while a connect was in flight".to_string(),
            )));
        }
        self.teardown_io().await;
        self.registry.clear();
        self.pending_outbound.clear();
        self.params = None;
        self.reconnect.reset();
        self.state = SessionState::Idle;
        info!("disconnected");
        Ok(())
    }
}

impl<T> KameoMessage<Subscribe> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<Vec<TopicBinding>>;

    async fn handle(
        &mut self,
        msg: Subscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.params.is_none() {
            return Err(PubSubError::NotConnected);
        }

        let mut bindings = Vec::with_capacity(msg.topics.len());
        for topic in msg.topics {
            if topic.is_empty() {
                debug!("skipping empty topic in subscribe");
                continue;
            }
            let id = self.registry.add(&topic, msg.callback.clone());
            bindings.push(TopicBinding { topic, id });
        }

        self.sync_wire_subscriptions().await?;
        Ok(bindings)
    }
}

impl<T> KameoMessage<Unsubscribe> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<()>;

    async fn handle(
        &mut self,
        msg: Unsubscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let mut torn_down = Vec::new();
        for TopicBinding { topic, id } in msg.bindings {
            match self.registry.remove(&topic, id) {
                Removal::RemovedLast { was_wired } => {
                    if was_wired {
                        torn_down.push(topic);
                    }
                }
                Removal::Removed | Removal::NotFound => {}
            }
        }

        if !torn_down.is_empty() && self.writer.is_some() {
            if self.config.logging {
                debug!(topics = %torn_down.join(","), "unsubscribing");
            }
            let frame = protocol::encode_unsubscribe(&torn_down)?;
            self.send_control_frame(frame).await?;
        }
        Ok(())
    }
}

impl<T> KameoMessage<Publish> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<()>;

    async fn handle(&mut self, msg: Publish, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if msg.topic.is_empty() {
            return Err(PubSubError::InvalidPublish {
                reason: "topic is required",
            });
        }
        if msg.data.is_empty() {
            return Err(PubSubError::InvalidPublish {
                reason: "message is required",
            });
        }

        if self.config.logging {
            debug!(topic = %msg.topic, "publishing");
        }
        let frame = protocol::encode_publish(&msg.topic, &msg.data)?;
        self.send_frame(frame).await
    }
}

impl<T> KameoMessage<StopReconnecting> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: StopReconnecting,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.should_reconnect = false;
        self.reconnect.exhaust();
        self.cancel_retry();
        match self.state {
            SessionState::AwaitingRetry => self.state = SessionState::Idle,
            // Abandon an automatic retry handshake; caller-driven connects
            // (which have waiters) are left to settle normally.
            SessionState::Connecting if self.connect_waiters.is_empty() => {
                self.abort_handshake();
                self.connect_epoch += 1;
                self.state = SessionState::Idle;
            }
            _ => {}
        }
    }
}

impl<T> KameoMessage<GetConnectionStatus> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = ConnectionStatus;

    async fn handle(
        &mut self,
        _msg: GetConnectionStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state.as_status()
    }
}

impl<T> KameoMessage<GetSessionState> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = SessionState;

    async fn handle(
        &mut self,
        _msg: GetSessionState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state
    }
}

impl<T> KameoMessage<GetStats> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = ClientStats;

    async fn handle(
        &mut self,
        _msg: GetStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        ClientStats {
            uptime: self.health.uptime(),
            inbound_frames: self.health.inbound_frames(),
            dispatched: self.health.dispatched(),
            reconnects: self.health.reconnects(),
            last_inbound_age: self.health.last_inbound_age(),
            pending_outbound: self.pending_outbound.len(),
            topics: self.registry.topic_count(),
        }
    }
}

impl<T> KameoMessage<InboundEvent> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<()>;

    async fn handle(
        &mut self,
        msg: InboundEvent,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation {
            return Ok(());
        }
        self.health.record_inbound();

        // Protocol-level ping/pong is the transport's business.
        if matches!(msg.frame, WsFrame::Ping(_) | WsFrame::Pong(_)) {
            return Ok(());
        }
        let Some(bytes) = frame_bytes(&msg.frame) else {
            return Ok(());
        };

        match protocol::decode(bytes) {
            Ok(Inbound::Heartbeat) => {
                if self.config.logging {
                    debug!("heartbeat");
                }
            }
            Ok(Inbound::Frame(frame)) => self.dispatch(frame),
            Err(err) => {
                debug!(error = %err, "ignoring undecodable frame");
            }
        }
        Ok(())
    }
}

impl<T> KameoMessage<ConnectionLost> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionLost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation {
            return Ok(());
        }
        self.connection_lost(msg.reason).await;
        Ok(())
    }
}

impl<T> KameoMessage<Retry> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<()>;

    async fn handle(&mut self, _msg: Retry, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        // The timer may race a voluntary disconnect or an explicit connect();
        // both invalidate the retry via state.
        if self.state != SessionState::AwaitingRetry || !self.should_reconnect {
            return Ok(());
        }
        self.begin_handshake();
        Ok(())
    }
}

impl<T> KameoMessage<CheckStale> for PubSubActor<T>
where
    T: PubSubTransport,
{
    type Reply = PubSubResult<()>;

    async fn handle(
        &mut self,
        msg: CheckStale,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation || self.state != SessionState::Connected {
            return Ok(());
        }
        if self.health.is_stale() {
            let age = self.health.last_inbound_age();
            self.connection_lost(format!(
                "stale connection: no inbound data for {}s",
                age.as_secs()
            ))
            .await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

impl<T> PubSubActor<T>
where
    T: PubSubTransport,
{
    /// Start the transport handshake in its own task. The outcome comes back
    /// as a message, so the mailbox stays responsive while dialing; the
    /// timeout bounds a dial that never resolves.
    fn begin_handshake(&mut self) {
        let Some(params) = self.params.clone() else {
            self.state = SessionState::Idle;
            for waiter in std::mem::take(&mut self.connect_waiters) {
                waiter.send(Err(PubSubError::NotConnected));
            }
            return;
        };
        self.state = SessionState::Connecting;
        self.connect_epoch += 1;
        let epoch = self.connect_epoch;
        info!(endpoint = %params.endpoint, "connecting");

        let transport = self.transport.clone();
        let timeout = self.config.connect_timeout;
        let actor_ref = self.actor_ref.clone();
        self.handshake_task = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.connect(params)).await {
                Ok(result) => result,
                Err(_) => Err(PubSubError::ConnectionFailed(format!(
                    "handshake timed out after {}ms",
                    timeout.as_millis()
                ))),
            };
            let _ = actor_ref
                .tell(HandshakeOutcome::<T> { epoch, result })
                .send()
                .await;
        }));
    }

    /// Bring the session up on a freshly connected socket: fresh IO tasks,
    /// replay of every registered topic through the ordinary wire-sync path,
    /// and a drain of frames queued while offline.
    async fn establish(&mut self, reader: T::Reader, writer: T::Writer) {
        self.generation += 1;
        self.writer = Some(writer);
        self.reconnect.reset();
        self.health.reset();
        self.state = SessionState::Connected;
        self.reset_shutdown_channel();
        self.spawn_reader(reader);
        self.spawn_stale_check();
        info!("connected");

        self.registry.mark_all_unwired();
        if let Err(err) = self.sync_wire_subscriptions().await {
            warn!(error = %err, "subscription replay failed");
        }
        self.drain_pending_outbound().await;
    }

    /// Issue one wire subscribe covering every topic that lacks a live
    /// wire-level subscription. This is the only place wire subscriptions are
    /// created, so first-subscribe and reconnect replay share the same
    /// idempotency guarantee.
    async fn sync_wire_subscriptions(&mut self) -> PubSubResult<()> {
        if self.writer.is_none() {
            // Deferred: the next establish() wires everything up.
            return Ok(());
        }
        let pending = self.registry.unwired_topics();
        if pending.is_empty() {
            return Ok(());
        }
        if self.config.logging {
            debug!(topics = %pending.join(","), "subscribing");
        }
        let frame = protocol::encode_subscribe(&pending)?;
        self.registry.mark_wired(&pending);
        self.send_control_frame(frame).await
    }

    /// Send a publish frame over the live writer, or queue it when offline.
    /// A write failure re-queues the frame and hands the connection to the
    /// reconnection controller; it is not surfaced to the caller.
    async fn send_frame(&mut self, frame: WsFrame) -> PubSubResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return self.queue_outbound(frame);
        };
        if let Err(err) = writer.send(frame.clone()).await {
            warn!(error = %err, "websocket write failed");
            if self.pending_outbound.len() < self.config.outbound_capacity {
                self.pending_outbound.push_front(frame);
            }
            self.connection_lost(format!("write failed: {err}")).await;
        }
        Ok(())
    }

    /// Send a subscribe/unsubscribe frame. These are never queued or
    /// re-queued: subscription replay regenerates them from the registry, so
    /// a stale copy would subscribe the same topics twice on the wire.
    async fn send_control_frame(&mut self, frame: WsFrame) -> PubSubResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if let Err(err) = writer.send(frame).await {
            warn!(error = %err, "websocket write failed");
            self.connection_lost(format!("write failed: {err}")).await;
        }
        Ok(())
    }

    fn queue_outbound(&mut self, frame: WsFrame) -> PubSubResult<()> {
        if self.pending_outbound.len() >= self.config.outbound_capacity {
            return Err(PubSubError::OutboundQueueFull);
        }
        self.pending_outbound.push_back(frame);
        Ok(())
    }

    async fn drain_pending_outbound(&mut self) {
        while self.writer.is_some() {
            let Some(frame) = self.pending_outbound.pop_front() else {
                break;
            };
            // A failed send tears the writer down and re-queues, ending the loop.
            if self.send_frame(frame).await.is_err() {
                break;
            }
        }
    }

    fn dispatch(&mut self, frame: InboundFrame) {
        if !frame.is_publish() {
            if self.config.logging {
                debug!(op = frame.op, "ignoring protocol-level frame");
            }
            return;
        }
        // Topics may be unsubscribed between message emission and arrival;
        // an unknown topic is not an error.
        let Some(callbacks) = self.registry.snapshot(&frame.topic) else {
            return;
        };
        if self.config.logging {
            debug!(topic = %frame.topic, listeners = callbacks.len(), "dispatching");
        }

        let mut delivered = 0u64;
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&frame))).is_err() {
                tracing::error!(topic = %frame.topic, "topic callback panicked; continuing fan-out");
            } else {
                delivered += 1;
            }
        }
        self.health.record_dispatched(delivered);
    }

    async fn connection_lost(&mut self, reason: String) {
        if self.state != SessionState::Connected {
            return;
        }
        warn!(%reason, "connection lost");
        self.teardown_io().await;
        self.registry.mark_all_unwired();

        if self.should_reconnect {
            self.schedule_retry(&reason);
        } else {
            self.state = SessionState::Idle;
        }
    }

    fn schedule_retry(&mut self, reason: &str) {
        match self.reconnect.begin_attempt() {
            Some(delay) => {
                self.state = SessionState::AwaitingRetry;
                self.health.increment_reconnect();
                info!(
                    attempt = self.reconnect.attempts(),
                    max = self.config.max_reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "scheduling reconnect"
                );
                let actor_ref = self.actor_ref.clone();
                self.retry_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = actor_ref.tell(Retry).send().await;
                }));
            }
            None => {
                warn!(
                    max = self.config.max_reconnect_attempts,
                    "reconnect attempts exhausted; giving up"
                );
                self.state = SessionState::GivenUp;
            }
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }

    fn abort_handshake(&mut self) {
        if let Some(task) = self.handshake_task.take() {
            task.abort();
        }
    }

    async fn teardown_io(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.stale_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!("reader task terminated with error: {err}");
                }
            }
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.close().await;
        }
    }

    fn reset_shutdown_channel(&mut self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.shutdown_rx = shutdown_rx;
    }

    fn spawn_reader(&mut self, mut reader: T::Reader) {
        let actor_ref = self.actor_ref.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let generation = self.generation;

        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() {
                            break;
                        }
                    }
                    frame = reader.next() => {
                        match frame {
                            Some(Ok(WsFrame::Close(close))) => {
                                let reason = close
                                    .map(|f| format!(
                                        "close frame: code={} reason={}",
                                        f.code,
                                        String::from_utf8_lossy(f.reason.as_ref())
                                    ))
                                    .unwrap_or_else(|| "close frame".to_string());
                                let _ = actor_ref
                                    .tell(ConnectionLost { generation, reason })
                                    .send()
                                    .await;
                                break;
                            }
                            Some(Ok(frame)) => {
                                if actor_ref
                                    .tell(InboundEvent { generation, frame })
                                    .send()
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                let _ = actor_ref
                                    .tell(ConnectionLost {
                                        generation,
                                        reason: format!("read error: {err}"),
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            None => {
                                let _ = actor_ref
                                    .tell(ConnectionLost {
                                        generation,
                                        reason: "stream ended".to_string(),
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    fn spawn_stale_check(&mut self) {
        let Some(threshold) = self.config.stale_threshold else {
            return;
        };
        if let Some(task) = self.stale_task.take() {
            task.abort();
        }

        let interval = (threshold / 2).max(Duration::from_millis(50));
        let actor_ref = self.actor_ref.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let generation = self.generation;

        self.stale_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if actor_ref
                            .tell(CheckStale { generation })
                            .send()
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        }));
    }
}
