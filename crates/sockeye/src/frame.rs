//! WebSocket frames as defined in [RFC 6455 Section 5.2].
//!
//! A frame is the atomic unit of transmission. Data frames (text, binary,
//! continuation) carry application payload; control frames (close, ping,
//! pong) manage the connection.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                               |  Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------+ - - - - - - - - - - - - - - - +
//! ```
//!
//! [RFC 6455 Section 5.2]: https://datatracker.ietf.org/doc/html/rfc6455#section-5.2

use bytes::Bytes;

use crate::{WsError, close::CloseCode};

/// WebSocket operation code, the 4-bit frame-type field of the header.
///
/// Values 0x3-0x7 and 0xB-0xF are reserved by RFC 6455 and rejected during
/// decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    /// Continuation of a fragmented message (0x0).
    Continuation,
    /// UTF-8 text data (0x1).
    Text,
    /// Raw binary data (0x2).
    Binary,
    /// Connection close (0x8).
    Close,
    /// Liveness probe (0x9), answered with a pong.
    Ping,
    /// Answer to a ping (0xA).
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames cannot be fragmented and their payload is capped at
    /// 125 bytes by RFC 6455 §5.5; both constraints are enforced by the
    /// connection rather than the codec.
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for `Continuation`, `Text` and `Binary`.
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WsError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WsError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A decoded (or to-be-encoded) WebSocket frame.
///
/// The payload is always stored unmasked; when a frame was decoded from a
/// masked wire frame, [`mask`](Self::mask) holds the 4-byte key it arrived
/// with. Server-origin frames are built without a mask and encoded unmasked,
/// as RFC 6455 requires.
#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload: Bytes,
}

impl Frame {
    /// Creates a final text frame with the given payload.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// Creates a final binary frame with the given payload.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    /// Creates a ping frame with the given payload.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    /// Creates a pong frame with the given payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// Creates a continuation frame extending a fragmented message.
    ///
    /// The first fragment is a text or binary frame with `fin` cleared,
    /// followed by zero or more continuations; the last fragment carries
    /// `fin` set.
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, None, payload)
    }

    /// Creates a close frame carrying a status code and reason.
    ///
    /// The payload is the big-endian code followed by the reason bytes.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Creates a close frame from an already-built payload.
    ///
    /// An empty payload produces the code-less close frame used to echo a
    /// peer close that carried no status.
    pub(crate) fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Close, None, payload)
    }

    pub(crate) fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// Sets the final-fragment flag, for building fragmented messages.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Sets an explicit masking key.
    ///
    /// The encoder masks the payload on the wire when a key is present.
    /// Server-origin frames never carry one; this exists for exercising the
    /// codec with client-origin traffic.
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Returns the frame's opcode.
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Returns whether this is the final frame of a message.
    #[inline]
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    /// Returns whether the frame carried (or will carry) a mask on the wire.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Returns the masking key the frame was decoded with, if any.
    #[inline]
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Returns the unmasked payload.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Extracts the status code of a close frame.
    ///
    /// Returns `None` when the payload is shorter than two bytes; RFC 6455
    /// permits a code-less close, and the connection treats the one-byte
    /// case as a protocol violation.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = self.payload.get(0..2)?;
        Some(CloseCode::from(u16::from_be_bytes([code[0], code[1]])))
    }

    /// Returns the close reason bytes, the payload past the status code.
    ///
    /// Empty when the frame carries no code.
    pub fn close_reason(&self) -> &[u8] {
        self.payload.get(2..).unwrap_or_default()
    }
}
