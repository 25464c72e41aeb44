//! TCP accept loop feeding connection actors.

use std::{net::SocketAddr, time::Duration};

use tokio::{
    net::{TcpListener, ToSocketAddrs},
    sync::watch,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    Result,
    codec::DEFAULT_MAX_PAYLOAD,
    connection::{ConnView, Connection},
    handler::Handler,
};

/// Default ceiling for a reassembled message (2 MiB).
pub const DEFAULT_MAX_MESSAGE: usize = 2 * 1024 * 1024;

const DEFAULT_ACCEPT_POLL: Duration = Duration::from_millis(500);

/// Connection and listener configuration.
///
/// ```
/// use sockeye::Options;
///
/// let options = Options::default().with_max_payload(256 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) max_payload: usize,
    pub(crate) max_message: usize,
    pub(crate) accept_poll: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_message: DEFAULT_MAX_MESSAGE,
            accept_poll: DEFAULT_ACCEPT_POLL,
        }
    }
}

impl Options {
    /// Sets the largest accepted single-frame payload. Frames declaring a
    /// longer payload close the connection with `1009`.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Sets the largest accepted reassembled message. A fragment sequence
    /// growing past it closes the connection with `1009`.
    pub fn with_max_message(mut self, max_message: usize) -> Self {
        self.max_message = max_message;
        self
    }

    /// Sets how often the accept loop wakes up to observe shutdown.
    pub fn with_accept_poll(mut self, accept_poll: Duration) -> Self {
        self.accept_poll = accept_poll;
        self
    }
}

/// A bound WebSocket listener.
///
/// Accepting runs on its own task; every accepted transport is handed to a
/// freshly spawned connection actor, so a misbehaving connection never
/// stalls the acceptor. The accept call itself is bounded by
/// [`Options::with_accept_poll`] so the loop can observe [`shutdown`]
/// between attempts.
///
/// [`shutdown`]: Server::shutdown
pub struct Server {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Server {
    /// Binds a listener and starts accepting connections.
    ///
    /// `factory` runs once per accepted connection, after the upgrade
    /// handshake succeeds, and returns that connection's [`Handler`]; the
    /// values it captures are the handler's configuration.
    pub async fn bind<A, H, F>(addr: A, factory: F, options: Options) -> Result<Self>
    where
        A: ToSocketAddrs,
        H: Handler,
        F: Fn(&ConnView) -> H + Clone + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, "websocket listener bound");
        let task = tokio::spawn(accept_loop(listener, factory, options, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits for the accept loop to finish.
    ///
    /// Connections already open keep running on their own tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Runs until the accept loop stops.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Binds `addr` with default [`Options`] and serves until the process ends.
pub async fn serve<A, H, F>(addr: A, factory: F) -> Result<()>
where
    A: ToSocketAddrs,
    H: Handler,
    F: Fn(&ConnView) -> H + Clone + Send + Sync + 'static,
{
    let server = Server::bind(addr, factory, Options::default()).await?;
    server.join().await;
    Ok(())
}

async fn accept_loop<H, F>(
    listener: TcpListener,
    factory: F,
    options: Options,
    shutdown: watch::Receiver<bool>,
) where
    H: Handler,
    F: Fn(&ConnView) -> H + Clone + Send + Sync + 'static,
{
    loop {
        if *shutdown.borrow() {
            break;
        }
        match timeout(options.accept_poll, listener.accept()).await {
            // Timed out; loop around and check the shutdown flag.
            Err(_) => continue,
            Ok(Ok((stream, peer))) => {
                debug!(%peer, "accepted tcp connection");
                let factory = factory.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    Connection::new(stream, peer, options).run(factory).await;
                });
            }
            Ok(Err(err)) => warn!(%err, "accept failed"),
        }
    }
    info!("websocket listener shut down");
}
