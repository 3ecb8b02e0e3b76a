use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{ConnectParams, PubSubError, WsFrame};

pub mod tungstenite;

pub type TransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), PubSubError>> + Send>>;

/// Transport boundary for the pub/sub client.
///
/// The IO read loop lives outside the actor; the actor owns state and
/// policies. Keeping this trait minimal lets tests substitute in-memory
/// channel transports for the real websocket.
pub trait PubSubTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, PubSubError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = PubSubError> + Send + Sync + Unpin + 'static;

    fn connect(&self, params: ConnectParams) -> TransportConnectFuture<Self::Reader, Self::Writer>;
}
