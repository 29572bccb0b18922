//! Proxy requests require additional information attached to them, such as
//! the IP address of the client, which we can't obtain using
//! [`hyper::Request`] alone. Forwarding a request also means rewriting it:
//! clients talk to a forward proxy in absolute-form (`GET http://host/path`),
//! while origin servers expect origin-form (`GET /path`), and RFC 7230
//! requires the proxy to strip hop-by-hop headers and disclose itself in the
//! `Via` chain on the way through.

use std::net::SocketAddr;

use http::uri::{PathAndQuery, Uri};
use hyper::{
    header::{self, HeaderValue},
    Request,
};

use super::headers;

/// Request received by this proxy from a client.
pub(crate) struct ProxyRequest<T> {
    /// Original client request.
    request: Request<T>,

    /// Address of the client socket.
    client_addr: SocketAddr,
}

/// Upstream endpoint described by an absolute-form request target.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
}

/// Reasons why a request target cannot be forwarded.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TargetError {
    /// The request target names a scheme other than `http`. This proxy only
    /// re-originates plaintext HTTP; encrypted protocols go through CONNECT.
    UnsupportedScheme,

    /// The request target carries no authority at all, e.g. a client that
    /// sent an origin-form request to the proxy directly.
    MissingHost,
}

impl<T> ProxyRequest<T> {
    /// Creates a new [`ProxyRequest`].
    pub fn new(request: Request<T>, client_addr: SocketAddr) -> Self {
        Self {
            request,
            client_addr,
        }
    }

    /// Upstream host and port named by the request target. The port defaults
    /// to 80 when the target doesn't specify one.
    pub fn target(&self) -> Result<Target, TargetError> {
        let uri = self.request.uri();

        if uri.scheme_str() != Some("http") {
            return Err(TargetError::UnsupportedScheme);
        }

        let host = uri.host().ok_or(TargetError::MissingHost)?;

        Ok(Target {
            // IPv6 literals are bracketed inside a URI authority.
            host: host.trim_start_matches('[').trim_end_matches(']').to_owned(),
            port: uri.port_u16().unwrap_or(80),
        })
    }

    /// Consumes the [`ProxyRequest`] returning a [`hyper::Request`] ready to
    /// be sent upstream: hop-by-hop headers stripped, `X-Forwarded-For` and
    /// `Via` extended with this proxy (see [`headers::rewrite_request`]), a
    /// `Host` header guaranteed, and the request target downgraded to
    /// origin-form. The method is carried over untouched.
    pub fn into_forwarded(self, via: &str) -> Request<T> {
        let (mut parts, body) = self.request.into_parts();

        let authority = parts.uri.authority().cloned();

        parts.headers = headers::rewrite_request(&parts.headers, self.client_addr.ip(), via);

        // Origin servers require a Host header, but clients speaking to a
        // proxy in absolute-form are allowed to omit it.
        if !parts.headers.contains_key(header::HOST) {
            if let Some(authority) = &authority {
                if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                    parts.headers.insert(header::HOST, host);
                }
            }
        }

        let path = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        parts.uri = Uri::builder().path_and_query(path).build().unwrap();

        Request::from_parts(parts, body)
    }
}
