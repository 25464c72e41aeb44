//! The contract between the connection state machine and application code.

use bytes::Bytes;

use crate::{WsError, close::CloseCode, connection::ConnView};

/// What the connection should do after a handler callback.
#[derive(Debug)]
pub enum Action {
    /// Keep going; process the next frame.
    Continue,
    /// Send a frame of the inbound message's opcode with this payload, then
    /// keep going.
    Reply(Bytes),
    /// Close the connection with `1000 Normal Closure`.
    Close,
    /// Close the connection with an explicit code and reason.
    CloseWith(CloseCode, String),
}

/// Per-connection application logic.
///
/// One handler instance exists per connection, created by the factory the
/// listener was started with once the upgrade handshake is accepted; the
/// factory call is the initialization hook, and whatever it captures plays
/// the role of listener options. All callbacks run on the connection's own
/// task, so `&mut self` state needs no synchronization.
///
/// Handlers never touch the transport directly: outbound traffic goes
/// through the returned [`Action`] or the [`ConnHandle`] in the view, which
/// serializes writes with inbound processing.
///
/// [`ConnHandle`]: crate::ConnHandle
pub trait Handler: Send + 'static {
    /// A complete text message arrived. The payload is validated UTF-8.
    fn on_text(&mut self, view: &ConnView, text: Bytes) -> Action;

    /// A complete binary message arrived.
    fn on_binary(&mut self, view: &ConnView, data: Bytes) -> Action;

    /// The connection reached its terminal state: a peer or local close
    /// (with the code and reason that went into the close frame), a protocol
    /// violation (with the code the connection answered with), or a clean
    /// transport EOF (`1000`). A close frame without a status code reports
    /// code `0`.
    ///
    /// Not called when the transport itself fails; there is nothing left to
    /// act on then.
    fn on_close(&mut self, view: &ConnView, code: u16, reason: &str) {
        let _ = (view, code, reason);
    }

    /// A protocol error was detected on this connection.
    ///
    /// Informational: the connection performs the mandated protocol action
    /// (close frame, teardown) regardless of the returned [`Action`].
    fn on_error(&mut self, view: &ConnView, err: &WsError) -> Action {
        let _ = (view, err);
        Action::Continue
    }
}
