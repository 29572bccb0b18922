use std::{future::Future, io, net::SocketAddr, pin::Pin, ptr, sync::Arc};

use hyper_util::rt::TokioIo;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::{watch, OwnedSemaphorePermit, Semaphore},
};
use tracing::{debug, info, warn};

use crate::{
    auth::{Authenticate, Basic},
    config,
    dial::{Dialer, TcpDialer},
    http::headers,
    service::{Context, Fpx},
    sync::drain::{Drain, Guard},
};

/// A [`Server`] owns one listening socket of the proxy and the request
/// handling state behind it. It accepts connections, spawns one Tokio task
/// per client socket, and knows how to stop: when the shutdown future
/// resolves the listener is dropped, so new clients are refused, and the
/// server then waits until every task serving an already accepted socket has
/// released its [`Guard`] before returning (see [`crate::sync::drain`]).
/// Progress is observable through a [`State`] watch channel, which both the
/// integration tests and [`super::master::Master`] rely on.
pub struct Server {
    /// State updates channel. Subscribers can use this to check the current
    /// [`State`] of this server.
    state: watch::Sender<State>,

    /// TCP listener used to accept connections.
    listener: TcpListener,

    /// Request handling state for this server: configuration, the embedder
    /// hooks and the `Via` identity. Shared with every connection task once
    /// the server runs.
    context: Context,

    /// Socket address used by this server to listen for incoming connections.
    address: SocketAddr,

    /// Keeps count of the connection tasks still serving a socket, so that
    /// shutdown can wait for them.
    drain: Drain,

    /// Shutdown future, this can be anything, which allows us to easily write
    /// integration tests. When this future completes, the server starts the
    /// shutdown process.
    shutdown: Pin<Box<dyn Future<Output = ()> + Send>>,

    /// Connections are limited to a maximum number. In order to allow a new
    /// connection we'll have to acquire a permit from the semaphore.
    connections: Arc<Semaphore>,
}

/// Represents the current state of the server.
#[derive(Debug, PartialEq, Eq)]
pub enum State {
    /// Server has started but is not accepting connections yet.
    Starting,

    /// Server is accepting incoming connections.
    Listening,

    /// Maximum number of connections reached.
    MaxConnectionsReached(usize),

    /// Server is gracefully shutting down.
    ShuttingDown(ShutdownState),
}

/// Represents a state in the graceful shutdown process.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ShutdownState {
    /// The server has received the shutdown signal and won't accept more
    /// connections, but it will still process data for currently connected
    /// sockets.
    PendingConnections(usize),

    /// Shutdown process complete.
    Done,
}

impl Server {
    /// Initializes a [`Server`] with the given `config`. This only binds and
    /// configures the listening socket, nothing is accepted until
    /// [`Server::run`] is called and `await`ed. Splitting init from run
    /// matters for tests: they listen on port 0 so the OS picks a free port,
    /// and need [`Server::socket_address`] to learn which one it picked
    /// before the server starts serving.
    pub fn init(config: config::Server) -> Result<Self, io::Error> {
        let (state, _) = watch::channel(State::Starting);

        let listen = *config.listen.first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "server has no listen address")
        })?;

        let socket = if listen.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        #[cfg(not(windows))]
        socket.set_reuseaddr(true)?;

        socket.bind(listen)?;

        // TODO: Hardcoded backlog, maybe this should be configurable.
        let listener = socket.listen(1024)?;

        // If the TCP port is 0 then the OS will choose a valid one.
        let address = listener.local_addr().unwrap();

        // Don't shutdown on anything by default. CTRL-C will forcefully kill
        // the process.
        let shutdown = Box::pin(std::future::pending());

        let connections = Arc::new(Semaphore::new(config.max_connections));

        // The name this server puts in the Via chain: configured pseudonym
        // or the machine hostname.
        let pseudonym = config.pseudonym.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| String::from("localhost"))
        });

        let authenticate = config
            .auth
            .as_ref()
            .map(|auth| Arc::new(Basic::from(auth)) as Arc<dyn Authenticate>);

        let context = Context {
            via: headers::via_element(&pseudonym),
            authenticate,
            dialer: Arc::new(TcpDialer),
            config,
        };

        Ok(Self {
            state,
            listener,
            context,
            address,
            drain: Drain::new(),
            shutdown,
            connections,
        })
    }

    /// The [`Server`] will poll the given `future` and whenever it completes,
    /// the graceful shutdown process starts. If only one server is
    /// instantiated, this could be called with [`tokio::signal::ctrl_c`], but
    /// it can be any [`Future`] since we need customization for integration
    /// tests and spawning multiple servers using [`super::master::Master`].
    pub fn shutdown_on(mut self, future: impl Future + Send + 'static) -> Self {
        self.shutdown = Box::pin(async move {
            future.await;
        });

        self
    }

    /// Replaces the authenticator this server gates requests with. Overrides
    /// the `Basic` authenticator derived from `[server.auth]`, if any.
    pub fn authenticate(mut self, authenticator: impl Authenticate + 'static) -> Self {
        self.set_authenticator(Arc::new(authenticator));

        self
    }

    /// Replaces the outbound connector used to reach upstream servers and
    /// CONNECT targets.
    pub fn dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.set_dialer(Arc::new(dialer));

        self
    }

    /// Shared-hook variants of [`Server::authenticate`] and
    /// [`Server::dialer`], used by [`super::master::Master`] to install one
    /// instance across every replica.
    pub(crate) fn set_authenticator(&mut self, authenticator: Arc<dyn Authenticate>) {
        self.context.authenticate = Some(authenticator);
    }

    pub(crate) fn set_dialer(&mut self, dialer: Arc<dyn Dialer>) {
        self.context.dialer = dialer;
    }

    /// Address of the listening socket. This is necessary for obtaining the
    /// actual address in cases port 0 was used.
    pub fn socket_address(&self) -> SocketAddr {
        self.address
    }

    /// By subscribing to this server the caller obtains a channel where the
    /// current state of the server can be read. This allows the server and
    /// caller to run on separate Tokio tasks while still allowing the caller
    /// to read the state.
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// This is the entry point, by calling and `await`ing this function the
    /// server starts to process connections.
    pub async fn run(self) -> Result<(), crate::Error> {
        let Self {
            mut context,
            state,
            listener,
            drain,
            shutdown,
            address,
            connections,
        } = self;

        let log_name = if let Some(ref id) = context.config.name {
            format!("{address} ({id})")
        } else {
            address.to_string()
        };

        context.config.log_name = log_name.clone();

        state.send_replace(State::Listening);
        info!("{log_name} => Listening for requests");

        // Leak the context to get a 'static lifetime, which we need to spawn
        // tokio tasks. Later when all tasks have finished, we'll drop this
        // value to avoid actual memory leaks.
        let context: &'static Context = Box::leak(Box::new(context));

        let acceptor = Acceptor {
            listener,
            context,
            guard: drain.guard(),
            state: &state,
            connections: Arc::clone(&connections),
        };

        tokio::select! {
            result = acceptor.run() => {
                if let Err(err) = result {
                    warn!("{log_name} => Error while accepting connections: {err}");
                }
            }
            _ = shutdown => {
                info!("{log_name} => Received shutdown signal");
            }
        }

        // Dropping the acceptor closes the listening socket, so new clients
        // get "Connection Refused" from here on. Already accepted sockets
        // keep their connection tasks, and their drain guards, alive.
        drop(acceptor);

        // Every connection task holds one permit until it finishes.
        let pending = context.config.max_connections - connections.available_permits();

        if pending > 0 {
            info!("{log_name} => Draining {pending} open connections");
            state.send_replace(State::ShuttingDown(ShutdownState::PendingConnections(
                pending,
            )));
        }

        drain.wait().await;

        // SAFETY: Nobody is reading this context anymore because all tasks
        // have ended at this point, so there are no more references to this
        // address. It's an ugly hack, but we don't have to use Arc if we do
        // this, we can simply skip the reference counting and avoid atomic
        // operations.
        unsafe {
            drop(Box::from_raw(ptr::from_ref(context).cast_mut()));
        }

        state.send_replace(State::ShuttingDown(ShutdownState::Done));
        info!("{log_name} => Shutdown complete");

        Ok(())
    }
}

/// Accepts incoming connections, one permit each, and spawns their tasks.
/// Owns the listening socket, so dropping the acceptor stops the intake.
struct Acceptor<'a> {
    listener: TcpListener,

    /// Reference to the request handling state of this server.
    context: &'static Context,

    /// Cloned into every connection task. See [`crate::sync::drain`].
    guard: Guard,

    /// Used to report when the connection limit blocks the intake.
    state: &'a watch::Sender<State>,

    /// Connection permits.
    connections: Arc<Semaphore>,
}

impl<'a> Acceptor<'a> {
    async fn run(&self) -> Result<(), crate::Error> {
        loop {
            let permit = self.admit_connection().await;
            let (stream, client_addr) = self.listener.accept().await?;

            let context = self.context;
            let guard = self.guard.clone();

            tokio::task::spawn(async move {
                serve(stream, context, client_addr).await;

                // Released only when the accepted socket is done sending and
                // receiving data. The guard going with them is what shutdown
                // waits for.
                drop((permit, guard));
            });
        }
    }

    /// Waits for a connection permit, reporting on the state channel
    /// whenever the limit blocks the intake.
    async fn admit_connection(&self) -> OwnedSemaphorePermit {
        let config = &self.context.config;

        if self.connections.available_permits() > 0 {
            // We never close the semaphore so unwrapping is OK.
            return self.connections.clone().acquire_owned().await.unwrap();
        }

        warn!(
            "{} => Reached max connections: {}",
            config.log_name, config.max_connections
        );
        self.state
            .send_replace(State::MaxConnectionsReached(config.max_connections));

        let permit = self.connections.clone().acquire_owned().await.unwrap();

        info!("{} => Accepting connections again", config.log_name);
        self.state.send_replace(State::Listening);

        permit
    }
}

/// Serves one client connection until it closes, errors, or hands itself
/// over to a CONNECT tunnel.
async fn serve(stream: TcpStream, context: &'static Context, client_addr: SocketAddr) {
    if let Err(err) = hyper::server::conn::http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), Fpx::new(context, client_addr))
        .with_upgrades()
        .await
    {
        debug!("Failed to serve connection from {client_addr}: {err:?}");
    }
}
