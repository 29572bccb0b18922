//! Structs and enums derived from the config file using [`serde`].

mod deser;

use std::net::SocketAddr;

use deser::one_or_many;
use serde::{Deserialize, Serialize};

/// This struct represents the entire configuration file, which describes a
/// list of proxy servers and their particular options. For example, this
/// configuration:
///
/// ```toml
/// [[server]]
///
/// listen = "127.0.0.1:8100"
///
/// [[server]]
///
/// listen = "127.0.0.1:8200"
///
/// [server.auth]
/// username = "admin"
/// password = "secret"
/// ```
///
/// Should result in a [`Vec`] containing two [`Server`] elements after
/// deserializing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// List of all servers.
    #[serde(rename = "server")]
    pub servers: Vec<Server>,
}

/// Description of a single proxy server instance in the config file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Server {
    /// Socket addresses where this server listens. A single address or a
    /// list of addresses (one replica per address, see [`Config::normalize`]).
    #[serde(deserialize_with = "one_or_many")]
    pub listen: Vec<SocketAddr>,

    /// Optional identifier used in log lines.
    #[serde(default)]
    pub name: Option<String>,

    /// Maximum number of simultaneously connected clients.
    #[serde(default = "default::max_connections", rename = "connections")]
    pub max_connections: usize,

    /// Basic proxy authentication credentials. When present, every request
    /// must carry a matching `Proxy-Authorization` header.
    #[serde(default)]
    pub auth: Option<BasicAuth>,

    /// Name this proxy uses to identify itself in the `Via` chain it appends
    /// to forwarded requests. Defaults to the machine hostname.
    #[serde(default)]
    pub pseudonym: Option<String>,

    /// Prefix used in log lines for this instance. Computed at startup, not
    /// part of the config file.
    #[serde(skip)]
    pub log_name: String,
}

/// Credentials for the built-in `Basic` authenticator.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Config where every server listens on exactly one address. See
/// [`Config::normalize`].
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    pub servers: Vec<Server>,
}

impl Config {
    /// Expands servers that listen on multiple addresses into one replica
    /// per address. A replica is the same server config with a single
    /// listening socket, which lets [`crate::Master`] treat every listener
    /// uniformly.
    pub fn normalize(self) -> NormalizedConfig {
        let mut servers = Vec::new();

        for server in self.servers {
            for replica in &server.listen {
                let mut server = server.clone();
                server.listen = vec![*replica];
                servers.push(server);
            }
        }

        NormalizedConfig { servers }
    }
}

mod default {
    //! Default values for some configuration options.

    pub fn max_connections() -> usize {
        1024
    }
}
