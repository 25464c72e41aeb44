//! Per-connection state machine.
//!
//! Every accepted transport is driven by one task owning the socket, the
//! read buffer, the protocol state and the handler: `Handshake` until the
//! upgrade request is parsed and answered, then `Open` until a close frame,
//! a protocol violation or transport EOF makes it terminal.
//!
//! While open, the task multiplexes two event sources through a single
//! `select!` loop: decoded inbound frames, and outbound commands submitted
//! through [`ConnHandle`]. Processing one event runs to completion before
//! the next is taken, so the buffer, handler state and transport writes are
//! never touched concurrently, and a close submitted after a send flushes
//! the send first.

use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, info, trace, warn};

use crate::{
    Result, WsError,
    close::CloseCode,
    codec::Codec,
    frame::{Frame, OpCode},
    handler::{Action, Handler},
    handshake::{self, UpgradeRequest},
    listener::Options,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound requests serialized through the connection's mailbox.
#[derive(Debug)]
enum Command {
    Text(Bytes),
    Binary(Bytes),
    Close { code: CloseCode, reason: String },
}

/// Cloneable handle for sending to a connection from anywhere.
///
/// Commands are queued onto the connection's mailbox and written by the
/// connection task itself, so callers never interleave with inbound frame
/// handling. Sends from one caller keep their submission order; a close
/// enqueued after a send is written after it.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnHandle {
    /// The connection's process-unique identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues a text frame.
    pub fn send_text(&self, text: impl Into<Bytes>) -> Result<()> {
        self.send(Command::Text(text.into()))
    }

    /// Queues a binary frame.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Command::Binary(data.into()))
    }

    /// Queues a `1000 Normal Closure` close.
    pub fn close(&self) -> Result<()> {
        self.close_with(CloseCode::NORMAL, "Normal Closure")
    }

    /// Queues a close with an explicit code and reason.
    pub fn close_with(&self, code: CloseCode, reason: impl Into<String>) -> Result<()> {
        self.send(Command::Close {
            code,
            reason: reason.into(),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| WsError::ConnectionClosed)
    }
}

/// Read-only snapshot of a connection's identity and request metadata,
/// passed to every handler callback.
#[derive(Debug, Clone)]
pub struct ConnView {
    handle: ConnHandle,
    peer: SocketAddr,
    path: String,
    query: Vec<(String, String)>,
}

impl ConnView {
    /// Handle for outbound sends, cloneable into other tasks.
    pub fn handle(&self) -> &ConnHandle {
        &self.handle
    }

    /// The connection's process-unique identity.
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    /// The peer's socket address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The request path of the upgrade request.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameters of the upgrade request, in request order.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }
}

/// Control-flow outcome of processing one event.
enum Flow {
    Continue,
    Closed,
}

/// A fragmented message being reassembled: the opcode of the initiating
/// frame plus the accumulated payload.
struct MessageInProgress {
    opcode: OpCode,
    data: BytesMut,
}

pub(crate) struct Connection<S> {
    io: S,
    peer: SocketAddr,
    options: Options,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: S, peer: SocketAddr, options: Options) -> Self {
        Self { io, peer, options }
    }

    /// Drives the connection to completion: handshake, open loop, teardown.
    pub(crate) async fn run<H, F>(mut self, factory: F)
    where
        H: Handler,
        F: FnOnce(&ConnView) -> H,
    {
        let (request, leftover) = match self.accept().await {
            Ok(Some(accepted)) => accepted,
            // Rejected; the response (if any was possible) has been sent.
            Ok(None) => return,
            Err(err) => {
                debug!(peer = %self.peer, %err, "transport failed during handshake");
                return;
            }
        };

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (commands, mut mailbox) = mpsc::unbounded_channel();
        let view = ConnView {
            handle: ConnHandle { id, commands },
            peer: self.peer,
            path: request.path().to_string(),
            query: request.query(),
        };
        let mut handler = factory(&view);
        info!(conn = id, peer = %self.peer, path = %view.path(), "connection open");

        let mut parts = FramedParts::new::<Frame>(self.io, Codec::new(self.options.max_payload));
        parts.read_buf = leftover;
        let mut framed = Framed::from_parts(parts);
        let mut fragment: Option<MessageInProgress> = None;

        loop {
            tokio::select! {
                inbound = framed.next() => match inbound {
                    Some(Ok(frame)) => {
                        let outcome = process_frame(
                            &mut framed,
                            &view,
                            &mut handler,
                            &mut fragment,
                            self.options.max_message,
                            frame,
                        )
                        .await;
                        match outcome {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Closed) => return,
                            Err(err) if err.is_io_error() => {
                                debug!(conn = id, %err, "transport error");
                                return;
                            }
                            Err(err) => {
                                protocol_close(&mut framed, &view, &mut handler, err).await;
                                return;
                            }
                        }
                    }
                    Some(Err(err)) if err.is_io_error() => {
                        debug!(conn = id, %err, "transport error");
                        return;
                    }
                    Some(Err(err)) => {
                        protocol_close(&mut framed, &view, &mut handler, err).await;
                        return;
                    }
                    None => {
                        debug!(conn = id, "transport closed by peer");
                        handler.on_close(&view, CloseCode::NORMAL.code(), "Normal Closure");
                        return;
                    }
                },
                Some(command) = mailbox.recv() => {
                    match apply_command(&mut framed, &view, &mut handler, command).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Closed) => return,
                        Err(err) => {
                            debug!(conn = id, %err, "transport error during send");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Drives the handshake: reads until a full request head is buffered,
    /// validates it and writes the 101 or reject response. Returns the
    /// parsed request plus the unconsumed bytes that follow the head.
    async fn accept(&mut self) -> io::Result<Option<(UpgradeRequest, BytesMut)>> {
        let mut buf = BytesMut::with_capacity(1024);
        loop {
            match UpgradeRequest::parse(&mut buf) {
                Ok(Some(request)) => match request.validate() {
                    Ok(()) => {
                        let key = request.sec_websocket_key().unwrap_or_default();
                        self.io
                            .write_all(handshake::accept_response(key).as_bytes())
                            .await?;
                        self.io.flush().await?;
                        return Ok(Some((request, buf)));
                    }
                    Err(err) => {
                        warn!(peer = %self.peer, %err, "rejecting upgrade request");
                        self.reject(&err).await?;
                        return Ok(None);
                    }
                },
                Ok(None) => {
                    if self.io.read_buf(&mut buf).await? == 0 {
                        debug!(peer = %self.peer, "peer went away mid-handshake");
                        return Ok(None);
                    }
                }
                Err(err) => {
                    warn!(peer = %self.peer, %err, "malformed upgrade request");
                    self.reject(&err).await?;
                    return Ok(None);
                }
            }
        }
    }

    async fn reject(&mut self, err: &WsError) -> io::Result<()> {
        self.io
            .write_all(handshake::reject_response(err).as_bytes())
            .await?;
        self.io.flush().await?;
        self.io.shutdown().await
    }
}

async fn process_frame<S, H>(
    framed: &mut Framed<S, Codec>,
    view: &ConnView,
    handler: &mut H,
    fragment: &mut Option<MessageInProgress>,
    max_message: usize,
    frame: Frame,
) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    trace!(
        conn = view.id(),
        opcode = ?frame.opcode(),
        fin = frame.is_fin(),
        len = frame.payload().len(),
        "inbound frame"
    );

    // Masking policy: the codec is direction-agnostic, so the requirement
    // that client-origin frames arrive masked is enforced here.
    if !frame.is_masked() {
        return Err(WsError::UnmaskedFrame);
    }
    if frame.opcode().is_control() && !frame.is_fin() {
        return Err(WsError::ControlFrameFragmented);
    }

    match frame.opcode() {
        OpCode::Ping => {
            if frame.payload().len() > 125 {
                return Err(WsError::PingFrameTooLarge);
            }
            framed.send(Frame::pong(frame.into_payload())).await?;
            Ok(Flow::Continue)
        }
        OpCode::Pong => Ok(Flow::Continue),
        OpCode::Close => {
            // RFC 6455 §5.5.1: a one-byte close payload cannot carry a code.
            if frame.payload().len() == 1 {
                return Err(WsError::InvalidCloseFrame);
            }
            let code = frame.close_code();
            let echo = match code {
                Some(code) => Frame::close(code, b""),
                None => Frame::close_raw(Bytes::new()),
            };
            let _ = framed.send(echo).await;
            let _ = framed.close().await;
            let code = code.map_or(0, CloseCode::code);
            info!(conn = view.id(), code, "closed by peer");
            handler.on_close(view, code, "");
            Ok(Flow::Closed)
        }
        OpCode::Text | OpCode::Binary => {
            // A new data frame may not start while a fragment sequence is
            // open; only control frames may interleave.
            if fragment.is_some() {
                return Err(WsError::InvalidFragment);
            }
            if frame.is_fin() {
                dispatch_message(framed, view, handler, frame.opcode(), frame.into_payload())
                    .await
            } else {
                let opcode = frame.opcode();
                let payload = frame.into_payload();
                if payload.len() > max_message {
                    return Err(WsError::FrameTooLarge);
                }
                let mut data = BytesMut::with_capacity(payload.len().saturating_mul(2));
                data.extend_from_slice(&payload);
                *fragment = Some(MessageInProgress { opcode, data });
                Ok(Flow::Continue)
            }
        }
        OpCode::Continuation => {
            let Some(mut message) = fragment.take() else {
                return Err(WsError::InvalidFragment);
            };
            if message.data.len().saturating_add(frame.payload().len()) > max_message {
                return Err(WsError::FrameTooLarge);
            }
            message.data.extend_from_slice(frame.payload());
            if frame.is_fin() {
                dispatch_message(framed, view, handler, message.opcode, message.data.freeze())
                    .await
            } else {
                *fragment = Some(message);
                Ok(Flow::Continue)
            }
        }
    }
}

/// Delivers a complete message to the handler and applies its action.
async fn dispatch_message<S, H>(
    framed: &mut Framed<S, Codec>,
    view: &ConnView,
    handler: &mut H,
    opcode: OpCode,
    payload: Bytes,
) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    if opcode == OpCode::Text && std::str::from_utf8(&payload).is_err() {
        return Err(WsError::InvalidUtf8);
    }
    let action = match opcode {
        OpCode::Text => handler.on_text(view, payload),
        _ => handler.on_binary(view, payload),
    };
    apply_action(framed, view, handler, opcode, action).await
}

async fn apply_action<S, H>(
    framed: &mut Framed<S, Codec>,
    view: &ConnView,
    handler: &mut H,
    opcode: OpCode,
    action: Action,
) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    match action {
        Action::Continue => Ok(Flow::Continue),
        Action::Reply(payload) => {
            let reply = match opcode {
                OpCode::Text => Frame::text(payload),
                _ => Frame::binary(payload),
            };
            framed.send(reply).await?;
            Ok(Flow::Continue)
        }
        Action::Close => {
            close_connection(framed, view, handler, CloseCode::NORMAL, "Normal Closure").await
        }
        Action::CloseWith(code, reason) => {
            close_connection(framed, view, handler, code, &reason).await
        }
    }
}

async fn apply_command<S, H>(
    framed: &mut Framed<S, Codec>,
    view: &ConnView,
    handler: &mut H,
    command: Command,
) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    match command {
        Command::Text(payload) => {
            framed.send(Frame::text(payload)).await?;
            Ok(Flow::Continue)
        }
        Command::Binary(payload) => {
            framed.send(Frame::binary(payload)).await?;
            Ok(Flow::Continue)
        }
        Command::Close { code, reason } => {
            close_connection(framed, view, handler, code, &reason).await
        }
    }
}

/// Locally-initiated close: send the close frame, shut the transport down,
/// notify the handler.
async fn close_connection<S, H>(
    framed: &mut Framed<S, Codec>,
    view: &ConnView,
    handler: &mut H,
    code: CloseCode,
    reason: &str,
) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    let _ = framed.send(Frame::close(code, reason.as_bytes())).await;
    let _ = framed.close().await;
    info!(conn = view.id(), code = code.code(), "connection closed");
    handler.on_close(view, code.code(), reason);
    Ok(Flow::Closed)
}

/// Protocol-violation teardown: inform the handler, send the mandated close
/// frame, shut the transport down.
async fn protocol_close<S, H>(
    framed: &mut Framed<S, Codec>,
    view: &ConnView,
    handler: &mut H,
    err: WsError,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    // Informational only: the mandated protocol action happens regardless.
    let _ = handler.on_error(view, &err);
    let (code, reason) = close_policy(&err);
    warn!(conn = view.id(), %err, code = code.code(), "closing on protocol error");
    let _ = framed.send(Frame::close(code, reason.as_bytes())).await;
    let _ = framed.close().await;
    handler.on_close(view, code.code(), reason);
}

/// Maps a protocol error to the close code sent to the peer.
fn close_policy(err: &WsError) -> (CloseCode, &'static str) {
    match err {
        WsError::FrameTooLarge => (CloseCode::TOO_LARGE, "Message too big"),
        WsError::InvalidUtf8 => (CloseCode::INVALID_DATA, "Invalid UTF-8"),
        _ => (CloseCode::PROTOCOL, "Protocol error"),
    }
}
