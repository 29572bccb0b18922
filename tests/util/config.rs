//! Configuration factories for integration tests.

pub mod proxy {
    //! Proxy server configurations.

    use fpx::config::{BasicAuth, Server};

    /// Proxy listening on any available port, no authentication. The fixed
    /// pseudonym keeps `Via` assertions independent of the machine hostname.
    pub fn server() -> Server {
        Server {
            listen: vec!["127.0.0.1:0".parse().unwrap()],
            name: None,
            max_connections: 1024,
            auth: None,
            pseudonym: Some(String::from("test-proxy")),
            log_name: String::new(),
        }
    }

    /// Proxy that requires `Basic` credentials on every request.
    pub fn with_auth(username: &str, password: &str) -> Server {
        Server {
            auth: Some(BasicAuth {
                username: String::from(username),
                password: String::from(password),
            }),
            ..server()
        }
    }

    /// Element this test proxy appends to the `Via` chain.
    pub fn via_element() -> String {
        format!("1.1 test-proxy (fpx/{})", fpx::VERSION)
    }
}
