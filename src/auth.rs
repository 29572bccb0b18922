//! Proxy authentication. Whether a request may use the proxy at all is
//! decided by an [`Authenticate`] implementation configured on the server.
//! Authentication is opt-in: servers without an authenticator let everything
//! through. When one is configured, requests that don't carry a
//! `Proxy-Authorization` header are challenged without consulting it, and
//! requests that do are decided by the implementation.

use std::{future::Future, pin::Pin, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::{header, HeaderMap};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Decides whether a request may be proxied. Implementations only see the
/// request headers; the body has not been read when the check runs.
pub trait Authenticate: Send + Sync {
    /// Resolves to `Ok(true)` to let the request through, `Ok(false)` to
    /// challenge it with a 407, or `Err` when the decision itself failed
    /// (which the proxy answers with a 500).
    fn check<'a>(
        &'a self,
        headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send + 'a>>;
}

/// Outcome of gating one request.
pub(crate) enum Gate {
    Allow,
    Challenge,
    Failed(BoxError),
}

/// Runs the configured authenticator, if any, against the request headers.
pub(crate) async fn authorize(
    authenticator: Option<&Arc<dyn Authenticate>>,
    headers: &HeaderMap,
) -> Gate {
    let Some(authenticator) = authenticator else {
        return Gate::Allow;
    };

    if !headers.contains_key(header::PROXY_AUTHORIZATION) {
        return Gate::Challenge;
    }

    match authenticator.check(headers).await {
        Ok(true) => Gate::Allow,
        Ok(false) => Gate::Challenge,
        Err(err) => Gate::Failed(err),
    }
}

/// `Basic` scheme authenticator holding one fixed credential pair. Built
/// automatically from the `[server.auth]` config table.
pub struct Basic {
    username: String,
    password: String,
}

impl Basic {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Proxy-Authorization: Basic <base64(user:pass)>`, scheme compared
    /// case-insensitively, credentials split at the first colon (user-ids
    /// can't contain colons, passwords can).
    fn matches(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers
            .get(header::PROXY_AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        else {
            return false;
        };

        let Some((scheme, payload)) = value.split_once(' ') else {
            return false;
        };

        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }

        let Ok(decoded) = STANDARD.decode(payload.trim()) else {
            return false;
        };

        let Ok(credentials) = String::from_utf8(decoded) else {
            return false;
        };

        credentials
            .split_once(':')
            .map_or(false, |(username, password)| {
                username == self.username && password == self.password
            })
    }
}

impl From<&crate::config::BasicAuth> for Basic {
    fn from(auth: &crate::config::BasicAuth) -> Self {
        Self::new(auth.username.clone(), auth.password.clone())
    }
}

impl Authenticate for Basic {
    fn check<'a>(
        &'a self,
        headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<bool, BoxError>> + Send + 'a>> {
        let ok = self.matches(headers);
        Box::pin(async move { Ok(ok) })
    }
}
