//! # sockeye
//!
//! Server-side WebSocket (RFC 6455) protocol core.
//!
//! The crate covers the hard parts of a WebSocket endpoint: an incremental
//! parser for the HTTP/1.1 upgrade handshake, the `Sec-WebSocket-Accept`
//! derivation, a frame codec that survives TCP segments splitting or
//! coalescing frame boundaries, and a per-connection state machine that
//! dispatches decoded frames to a user-supplied [`Handler`] while answering
//! control frames itself.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use sockeye::{Action, ConnView, Handler};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_text(&mut self, _view: &ConnView, text: Bytes) -> Action {
//!         Action::Reply(text)
//!     }
//!
//!     fn on_binary(&mut self, _view: &ConnView, data: Bytes) -> Action {
//!         Action::Reply(data)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> sockeye::Result<()> {
//!     sockeye::serve("0.0.0.0:9001", |_view: &ConnView| Echo).await
//! }
//! ```
//!
//! # Protocol handling
//!
//! The connection automatically answers ping frames with pongs, echoes close
//! frames, reassembles fragmented messages (validating UTF-8 for text), and
//! converts protocol violations into a close frame with the appropriate
//! status code before tearing the transport down. Handlers only ever see
//! complete messages.

pub mod close;
pub mod codec;
mod connection;
pub mod frame;
mod handler;
pub mod handshake;
pub mod mask;
mod listener;

pub use close::CloseCode;
pub use connection::{ConnHandle, ConnView};
pub use frame::{Frame, OpCode};
pub use handler::{Action, Handler};
pub use listener::{Options, Server, serve};
use thiserror::Error;

/// Result type for WebSocket operations.
pub type Result<T> = std::result::Result<T, WsError>;

/// Errors produced by the handshake parser, the frame codec, and the
/// connection state machine.
///
/// Errors are values end to end: the codec and parser never panic on peer
/// input, and the connection converts every error into the mandated protocol
/// action (an HTTP reject response during the handshake, a close frame once
/// open) before terminating.
#[derive(Debug, Error)]
pub enum WsError {
    /// Request method was not `GET`.
    #[error("invalid method, expected GET")]
    InvalidMethod,

    /// Request-target does not begin with `/`.
    #[error("invalid request path")]
    InvalidPath,

    /// Request version was not `HTTP/1.1`.
    #[error("invalid http version, expected HTTP/1.1")]
    InvalidHttpVersion,

    /// A header line without a colon, or a non-UTF-8 request head.
    #[error("malformed header line")]
    InvalidHeaderSyntax,

    /// The request head grew past the handshake size ceiling without a
    /// terminating blank line.
    #[error("handshake request too large")]
    HandshakeTooLarge,

    /// Missing or invalid `Upgrade: websocket` header.
    #[error("invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Missing or invalid `Connection: Upgrade` header.
    #[error("invalid connection header")]
    InvalidConnectionHeader,

    /// `Sec-WebSocket-Key` header is missing or empty.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// `Sec-WebSocket-Version` is not exactly `13`.
    #[error("Sec-WebSocket-Version must be 13")]
    InvalidSecWebSocketVersion,

    /// Some other required handshake header is absent.
    #[error("missing required header: {0}")]
    MissingRequiredHeader(&'static str),

    /// Invalid frame opcode.
    #[error("invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Reserved bits in the frame header are not zero.
    #[error("reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Frame or assembled message payload exceeds the configured maximum.
    #[error("frame too large")]
    FrameTooLarge,

    /// A client-origin frame arrived unmasked.
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// A control frame arrived with FIN cleared.
    #[error("control frame must not be fragmented")]
    ControlFrameFragmented,

    /// Ping frame payload exceeds 125 bytes.
    #[error("ping frame too large")]
    PingFrameTooLarge,

    /// Continuation without an initial frame, or a new data frame while a
    /// fragment sequence is still open.
    #[error("invalid fragment sequence")]
    InvalidFragment,

    /// Close frame with a one-byte payload.
    #[error("invalid close frame")]
    InvalidCloseFrame,

    /// Text message payload is not valid UTF-8.
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Connection has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// I/O error on the transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Returns `true` if this error arose while parsing or validating the
    /// upgrade handshake.
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMethod
                | Self::InvalidPath
                | Self::InvalidHttpVersion
                | Self::InvalidHeaderSyntax
                | Self::HandshakeTooLarge
                | Self::InvalidUpgradeHeader
                | Self::InvalidConnectionHeader
                | Self::MissingSecWebSocketKey
                | Self::InvalidSecWebSocketVersion
                | Self::MissingRequiredHeader(_)
        )
    }

    /// Returns `true` if this is a protocol-level error (RFC 6455 violation)
    /// that an open connection answers with a close frame.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidOpCode(_)
                | Self::ReservedBitsNotZero
                | Self::FrameTooLarge
                | Self::UnmaskedFrame
                | Self::ControlFrameFragmented
                | Self::PingFrameTooLarge
                | Self::InvalidFragment
                | Self::InvalidCloseFrame
                | Self::InvalidUtf8
        )
    }

    /// Returns `true` if this wraps an I/O error on the transport.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
