//! Outbound connections. Both the HTTP request proxy and the CONNECT tunnel
//! reach their targets through a [`Dialer`], so embedders can swap the
//! connection policy (pooling, source interface binding, egress filtering)
//! without touching the proxy itself. The error split matters: a name that
//! doesn't resolve is answered differently than a host that refuses the
//! connection.

use std::{future::Future, io, pin::Pin};

use tokio::net::{lookup_host, TcpStream};

/// Opens the TCP connections this proxy makes on behalf of its clients.
pub trait Dialer: Send + Sync {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<TcpStream, DialError>> + Send + 'a>>;
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    /// Name resolution failed or produced no addresses.
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The name resolved but no address accepted the connection.
    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Default [`Dialer`]: the system resolver plus one connection attempt per
/// resolved address, in resolution order.
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<TcpStream, DialError>> + Send + 'a>> {
        Box::pin(async move {
            let addresses: Vec<_> = lookup_host((host, port))
                .await
                .map_err(|source| DialError::Resolve {
                    host: host.to_owned(),
                    source,
                })?
                .collect();

            if addresses.is_empty() {
                return Err(DialError::Resolve {
                    host: host.to_owned(),
                    source: io::Error::new(io::ErrorKind::NotFound, "name resolved to no addresses"),
                });
            }

            let mut last_error = None;

            for address in addresses {
                match TcpStream::connect(address).await {
                    Ok(stream) => return Ok(stream),
                    Err(err) => last_error = Some(err),
                }
            }

            Err(DialError::Connect {
                host: host.to_owned(),
                port,
                source: last_error.unwrap(),
            })
        })
    }
}
