use std::{
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
};

use tokio::{sync::watch, task::JoinSet};
use tracing::{info, warn};

use crate::{auth::Authenticate, config::NormalizedConfig, dial::Dialer, Server};

/// Runs the whole proxy fleet described by a config file: one [`Server`] per
/// normalized listening address (see [`crate::Config::normalize`] for how
/// multi-address `[[server]]` entries become replicas), supervised on a
/// [`JoinSet`].
///
/// Besides supervision, the master is where fleet-wide concerns are applied.
/// A shutdown trigger installed with [`Master::shutdown_on`] is fanned out to
/// every replica through a single watch channel, and the embedder hooks can
/// be installed across the fleet in one call: [`Master::authenticate`] gates
/// every replica with the same authenticator instance, and [`Master::dialer`]
/// gives them one shared outbound connector, which is what a pooling or
/// egress-filtering dialer needs to be effective across listeners.
pub struct Master {
    /// One server per listening address, hooks already applied.
    servers: Vec<Server>,

    /// Listening addresses, in config order.
    sockets: Vec<SocketAddr>,

    /// Flipping this to `true` tells every server to begin shutting down.
    shutdown: watch::Sender<bool>,

    /// Trigger future. When it resolves, the shutdown flag is flipped.
    trigger: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl Master {
    /// Binds a [`Server`] for every entry of the normalized config and wires
    /// it to the master's shutdown channel. Sockets are bound here, but
    /// nothing is accepted until [`Master::run`].
    pub fn init(config: NormalizedConfig) -> Result<Self, crate::Error> {
        let (shutdown, _) = watch::channel(false);

        let mut servers = Vec::new();
        let mut sockets = Vec::new();

        for config in config.servers {
            let mut requested = shutdown.subscribe();

            let server = Server::init(config)?.shutdown_on(async move {
                let _ = requested.wait_for(|shutdown| *shutdown).await;
            });

            sockets.push(server.socket_address());
            servers.push(server);
        }

        Ok(Self {
            servers,
            sockets,
            shutdown,
            trigger: Box::pin(future::pending()),
        })
    }

    /// When `future` resolves, every server begins its graceful shutdown.
    pub fn shutdown_on(mut self, future: impl Future + Send + 'static) -> Self {
        self.trigger = Box::pin(async move {
            future.await;
        });

        self
    }

    /// Gates every replica with the same authenticator.
    pub fn authenticate(mut self, authenticator: impl Authenticate + 'static) -> Self {
        let authenticator: Arc<dyn Authenticate> = Arc::new(authenticator);

        for server in &mut self.servers {
            server.set_authenticator(Arc::clone(&authenticator));
        }

        self
    }

    /// Gives every replica the same outbound connector.
    pub fn dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        let dialer: Arc<dyn Dialer> = Arc::new(dialer);

        for server in &mut self.servers {
            server.set_dialer(Arc::clone(&dialer));
        }

        self
    }

    /// Runs every server until the shutdown trigger resolves or one of them
    /// fails, then drains the rest. The first error observed is the one
    /// returned.
    pub async fn run(self) -> Result<(), crate::Error> {
        let Self {
            servers,
            shutdown,
            trigger,
            ..
        } = self;

        let mut set = JoinSet::new();

        for server in servers {
            set.spawn(server.run());
        }

        let mut first_error = None;

        tokio::select! {
            Some(result) = set.join_next() => {
                // A server stopped before any shutdown was requested. Take
                // the whole fleet down, one dead listener means the process
                // needs attention anyway.
                if let Err(err) = result.unwrap() {
                    warn!("Master => Server failed: {err}");
                    first_error = Some(err);
                }
            }
            _ = trigger => {
                info!("Master => Shutting down all servers");
            }
        }

        // Servers subscribed at init, a send can only fail if there are none
        // at all.
        let _ = shutdown.send(true);

        while let Some(result) = set.join_next().await {
            if let Err(err) = result.unwrap() {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Returns all the listening sockets.
    pub fn sockets(&self) -> Vec<SocketAddr> {
        self.sockets.clone()
    }
}
