mod auth;
mod dial;
mod http;
mod service;
mod sync;
mod task;

pub mod config;

pub use auth::{Authenticate, Basic, BoxError};
pub use config::Config;
pub use dial::{DialError, Dialer, TcpDialer};
pub use task::{
    master::Master,
    server::{Server, ShutdownState, State},
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top level error for server startup and shutdown paths. Per-request
/// failures never reach this type, they are answered with an HTTP status or
/// by dropping the offending socket.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}
