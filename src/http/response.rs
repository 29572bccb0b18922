//! Responses originated by the proxy itself and rewriting of responses
//! relayed from upstream servers.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{ext::ReasonPhrase, header, Response, StatusCode};

use super::{body, headers};

/// Response type used by this proxy for both local and upstream responses.
pub(crate) type BoxBodyResponse = Response<BoxBody<Bytes, hyper::Error>>;

/// Status-only responses generated by the proxy, never relayed from an
/// upstream. Bodies are empty or a single line of text.
pub(crate) struct LocalResponse;

impl LocalResponse {
    /// 400 for request targets whose scheme this proxy cannot re-originate.
    pub fn unsupported_scheme() -> BoxBodyResponse {
        Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(body::full("Only \"http:\" protocol prefix is supported\n"))
            .unwrap()
    }

    /// 400 with a one-line explanation, for other client protocol errors.
    pub fn bad_request(reason: &str) -> BoxBodyResponse {
        Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(body::full(format!("{reason}\n")))
            .unwrap()
    }

    /// 404 when the upstream host could not be resolved.
    pub fn host_not_found() -> BoxBodyResponse {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(body::empty())
            .unwrap()
    }

    /// 500 for upstream transport failures and authenticator errors.
    pub fn internal_error() -> BoxBodyResponse {
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(body::empty())
            .unwrap()
    }

    /// 407 challenge sent when a request must authenticate itself.
    pub fn proxy_auth_required() -> BoxBodyResponse {
        Response::builder()
            .status(StatusCode::PROXY_AUTHENTICATION_REQUIRED)
            .header(header::PROXY_AUTHENTICATE, "Basic realm=\"proxy\"")
            .body(body::empty())
            .unwrap()
    }

    /// The 200 that confirms a CONNECT tunnel. The conventional reason
    /// phrase is forced because hyper would otherwise write "OK", and
    /// widely deployed clients grep for "Connection established".
    pub fn connection_established() -> BoxBodyResponse {
        let mut response = Response::new(body::empty());

        response
            .extensions_mut()
            .insert(ReasonPhrase::from_static(b"Connection established"));

        response
    }
}

/// Response received from an upstream server on its way back to the client.
pub(crate) struct ProxyResponse<T> {
    response: Response<T>,
}

impl<T> ProxyResponse<T> {
    /// Creates a new [`ProxyResponse`].
    pub fn new(response: Response<T>) -> Self {
        Self { response }
    }

    /// Consumes the [`ProxyResponse`] returning a response that can be sent
    /// back to the client. Hop-by-hop headers describing the upstream
    /// connection are dropped (see [`headers::rewrite_response`]); status and
    /// body are relayed untouched.
    pub fn into_forwarded(self) -> Response<T> {
        let (mut parts, body) = self.response.into_parts();

        parts.headers = headers::rewrite_response(&parts.headers);

        Response::from_parts(parts, body)
    }
}
