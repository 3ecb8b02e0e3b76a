use bytes::Bytes;

/// Transport-neutral websocket frame.
///
/// Transports convert their native frame representation into/from `WsFrame`;
/// everything above the transport boundary only sees this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }
}

/// Borrow the payload bytes of a data frame without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) | WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(bytes) | WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}
