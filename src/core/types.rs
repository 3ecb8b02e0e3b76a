use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for client operations.
pub type PubSubResult<T> = Result<T, PubSubError>;

/// Canonical error surface for the pub/sub client.
///
/// Clone lets one failure settle several callers waiting on the same
/// in-flight connect.
#[derive(Debug, Clone, Error)]
pub enum PubSubError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected: call connect() first")]
    NotConnected,

    #[error("Invalid publish: {reason}")]
    InvalidPublish { reason: &'static str },

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Actor error: {0}")]
    ActorError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Backpressure: outbound queue full")]
    OutboundQueueFull,
}

/// High-level connection status surface.
///
/// `Unknown` is reserved for states the client cannot classify; the actor
/// never produces it today, but consumers should treat it as "not connected".
#[derive(Debug, Clone, Copy, PartialEq, Eq, kameo::Reply)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Unknown,
}

/// Fine-grained session lifecycle driven by the reconnection controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, kameo::Reply)]
pub enum SessionState {
    /// No session, or voluntarily disconnected.
    Idle,
    /// A connect attempt is in progress.
    Connecting,
    Connected,
    /// Lost the connection; a retry timer is pending.
    AwaitingRetry,
    /// Retry budget exhausted; a fresh `connect()` is required to recover.
    GivenUp,
}

impl SessionState {
    pub fn as_status(self) -> ConnectionStatus {
        match self {
            SessionState::Idle | SessionState::GivenUp => ConnectionStatus::Disconnected,
            SessionState::Connecting | SessionState::AwaitingRetry => ConnectionStatus::Connecting,
            SessionState::Connected => ConnectionStatus::Connected,
        }
    }
}

/// Connection parameters, stored on the actor for reconnection use.
#[derive(Clone)]
pub struct ConnectParams {
    /// WebSocket URL, e.g. `wss://host/connect`.
    pub endpoint: String,
    pub app_id: String,
    pub token: String,
    pub token_type: String,
}

impl ConnectParams {
    pub fn new(
        endpoint: impl Into<String>,
        app_id: impl Into<String>,
        token: impl Into<String>,
        token_type: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            app_id: app_id.into(),
            token: token.into(),
            token_type: token_type.into(),
        }
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("endpoint", &self.endpoint)
            .field("app_id", &self.app_id)
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Tunable client configuration.
#[derive(Clone, Debug)]
pub struct PubSubConfig {
    /// Delay before the first reconnect attempt; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Ceiling applied to the computed backoff delay.
    pub reconnect_max_delay: Duration,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Bound on the transport handshake; a dial that exceeds it fails the
    /// connect attempt.
    pub connect_timeout: Duration,
    /// Treat the connection as dead when no inbound frame (heartbeats
    /// included) arrives within this window. `None` disables the check.
    pub stale_threshold: Option<Duration>,
    /// Frames queued while no writer is available.
    pub outbound_capacity: usize,
    /// Verbose per-frame tracing.
    pub logging: bool,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(10),
            stale_threshold: Some(Duration::from_secs(90)),
            outbound_capacity: 64,
            logging: false,
        }
    }
}

/// Point-in-time client statistics snapshot.
#[derive(Clone, Debug, kameo::Reply)]
pub struct ClientStats {
    pub uptime: Duration,
    pub inbound_frames: u64,
    pub dispatched: u64,
    pub reconnects: u64,
    pub last_inbound_age: Duration,
    pub pending_outbound: usize,
    pub topics: usize,
}
