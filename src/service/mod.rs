//! The [`hyper`] library is based on services. Each time we accept a
//! connection we have to provide an instance of [`hyper::service::Service`]
//! to handle that connection. This module contains the [`Fpx`] struct which
//! implements [`Service`] and routes every incoming request to exactly one of
//! the HTTP request proxy, the CONNECT tunnel, or a local error response.
//! The shared pieces a request handler needs (configuration, the embedder
//! hooks, the proxy's `Via` identity) live in a per-server [`Context`]
//! provided by [`crate::server::Server`].

mod forward;
mod tunnel;

use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc};

use hyper::{body::Incoming, service::Service, Method, Request};
use tracing::warn;

use crate::{
    auth::{self, Authenticate, Gate},
    config,
    dial::Dialer,
    http::{
        request::ProxyRequest,
        response::{BoxBodyResponse, LocalResponse},
    },
};

/// Per-server state shared by every connection task: the configuration plus
/// the two extension points and the precomputed `Via` element.
pub(crate) struct Context {
    /// Configuration of this server instance.
    pub config: config::Server,

    /// Optional request gate. `None` means every request is allowed.
    pub authenticate: Option<Arc<dyn Authenticate>>,

    /// Outbound connector used for upstream requests and CONNECT targets.
    pub dialer: Arc<dyn Dialer>,

    /// Element this proxy appends to the `Via` chain of forwarded requests.
    pub via: String,
}

/// Implements [`Service`] and handles incoming requests.
#[derive(Clone, Copy)]
pub(crate) struct Fpx {
    /// Reference to the state of this [`crate::server::Server`] instance.
    context: &'static Context,

    /// Socket address of the connected client.
    client_addr: SocketAddr,
}

impl Fpx {
    /// Creates a new [`Fpx`] service.
    pub fn new(context: &'static Context, client_addr: SocketAddr) -> Self {
        Self {
            context,
            client_addr,
        }
    }
}

impl Service<Request<Incoming>> for Fpx {
    type Response = BoxBodyResponse;

    type Error = hyper::Error;

    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let Fpx {
            context,
            client_addr,
        } = *self;

        Box::pin(async move {
            // Gate the request before a single body byte is read. Bodies are
            // lazy, so nothing pipelined behind the headers is consumed while
            // the authenticator decides.
            match auth::authorize(context.authenticate.as_ref(), request.headers()).await {
                Gate::Allow => {}
                Gate::Challenge => return Ok(LocalResponse::proxy_auth_required()),
                Gate::Failed(err) => {
                    warn!(client = %client_addr, error = %err, "authenticator failed");
                    return Ok(LocalResponse::internal_error());
                }
            }

            if request.method() == Method::CONNECT {
                tunnel::establish(request, context).await
            } else {
                let request = ProxyRequest::new(request, client_addr);
                forward::forward(request, context).await
            }
        })
    }
}
