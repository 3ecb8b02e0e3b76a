//! Reusable test utilities for exercising the client without a real socket.
//!
//! [`MockTransport::channel_pair`] yields the transport for `PubSubClient`
//! plus a [`MockServer`] handle that receives outbound frames, pushes inbound
//! frames, injects connect and write failures, stalls handshakes, and drops
//! the socket. The transport
//! accepts any number of sequential connections, so reconnection flows can be
//! driven end to end.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use tokio::sync::mpsc;

use crate::core::{ConnectParams, PubSubError, WsFrame, frame_bytes};
use crate::transport::{PubSubTransport, TransportConnectFuture};

struct Hub {
    outbound_tx: mpsc::UnboundedSender<WsFrame>,
    /// Inbound sender for the currently live connection.
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<WsFrame>>>,
    connects: AtomicUsize,
    /// Upcoming `connect()` calls to refuse.
    fail_next: AtomicUsize,
    /// Upcoming `connect()` calls to hang forever.
    stall_next: AtomicUsize,
    /// Upcoming writer sends to fail.
    fail_writes: AtomicUsize,
}

impl Hub {
    /// Atomically consume one pending count, if any.
    fn claim(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory channel transport emulating a pub/sub server.
#[derive(Clone)]
pub struct MockTransport {
    hub: Arc<Hub>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<WsFrame>();
        let hub = Arc::new(Hub {
            outbound_tx,
            inbound_tx: Mutex::new(None),
            connects: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            stall_next: AtomicUsize::new(0),
            fail_writes: AtomicUsize::new(0),
        });
        (
            Self {
                hub: Arc::clone(&hub),
            },
            MockServer { hub, outbound_rx },
        )
    }
}

impl PubSubTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, _params: ConnectParams) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let hub = Arc::clone(&self.hub);
        Box::pin(async move {
            if Hub::claim(&hub.stall_next) {
                std::future::pending::<()>().await;
            }
            if Hub::claim(&hub.fail_next) {
                return Err(PubSubError::ConnectionFailed(
                    "mock connect refused".to_string(),
                ));
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WsFrame>();
            *hub.inbound_tx.lock().expect("mock hub lock") = Some(inbound_tx);
            hub.connects.fetch_add(1, Ordering::SeqCst);
            Ok((
                MockReader { rx: inbound_rx },
                MockWriter {
                    hub: Arc::clone(&hub),
                },
            ))
        })
    }
}

/// Error surface for operations on [`MockServer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// No live connection to push frames into.
    SocketDropped,
    /// The client side is no longer receiving inbound frames.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket not connected"),
            MockServerError::ChannelClosed => f.write_str("mock client channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle paired with [`MockTransport`].
///
/// Outbound frames from every connection arrive on one queue, so assertions
/// can span a reconnect.
pub struct MockServer {
    hub: Arc<Hub>,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockServer {
    /// Receive a frame written by the client.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Receive a frame with a timeout; `None` on expiry.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Push an inbound frame to the client.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let guard = self.hub.inbound_tx.lock().expect("mock hub lock");
        let Some(tx) = guard.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl AsRef<str>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::text(text.as_ref()))
    }

    /// Push a publish frame; `data` is embedded as raw JSON.
    pub fn send_publish(&self, topic: &str, data: &str) -> Result<(), MockServerError> {
        self.send_text(format!(
            "{{\"topic\":\"{topic}\",\"type\":1,\"data\":{data}}}"
        ))
    }

    /// Push the server keepalive sentinel.
    pub fn send_heartbeat(&self) -> Result<(), MockServerError> {
        self.send_text("heartbeat")
    }

    /// Simulate a server-side socket drop by closing the inbound channel.
    pub fn drop_socket(&self) {
        self.hub.inbound_tx.lock().expect("mock hub lock").take();
    }

    /// Refuse the next `n` transport connects.
    pub fn fail_next_connects(&self, n: usize) {
        self.hub.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` transport connects hang until aborted.
    pub fn stall_next_connects(&self, n: usize) {
        self.hub.stall_next.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writer sends with a transport error.
    pub fn fail_next_writes(&self, n: usize) {
        self.hub.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Successful transport connects so far.
    pub fn connect_count(&self) -> usize {
        self.hub.connects.load(Ordering::SeqCst)
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, PubSubError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    hub: Arc<Hub>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = PubSubError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        let hub = &self.get_mut().hub;
        if Hub::claim(&hub.fail_writes) {
            return Err(PubSubError::TransportError {
                context: "mock_transport_write",
                error: "mock write refused".to_string(),
            });
        }
        hub.outbound_tx
            .send(item)
            .map_err(|_| PubSubError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Decode a data frame's payload as JSON, for assertions on outbound frames.
pub fn frame_json(frame: &WsFrame) -> Option<sonic_rs::Value> {
    sonic_rs::from_slice(frame_bytes(frame)?).ok()
}
