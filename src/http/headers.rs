//! Header rewriting for forwarded requests and responses. Proxies must drop
//! headers that only describe the connection they arrived on and disclose
//! themselves in the `Via` chain; [`HeaderMap`] already behaves as an ordered
//! multimap with case-insensitive names, so rewriting is a single pass that
//! copies pairs over, never collapsing duplicates.

use std::net::IpAddr;

use http::{header, HeaderMap, HeaderName, HeaderValue};

/// Headers that are only meaningful for a single transport-level connection.
/// They MUST NOT cross the proxy in either direction (RFC 7230 §6.1). Names
/// listed in an incoming `Connection` header are not additionally stripped,
/// only this fixed set is.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn x_forwarded_for() -> HeaderName {
    HeaderName::from_static("x-forwarded-for")
}

/// The element this proxy appends to the `Via` chain, of the form
/// `1.1 <pseudonym> (fpx/<version>)`.
pub(crate) fn via_element(pseudonym: &str) -> String {
    format!(
        "1.1 {pseudonym} ({}/{})",
        env!("CARGO_PKG_NAME"),
        crate::VERSION
    )
}

/// Builds the headers of the upstream request from the headers received on
/// the client connection:
///
/// - hop-by-hop headers are dropped;
/// - the client address is appended to the first `X-Forwarded-For` value, or
///   a new `X-Forwarded-For` header is added if there was none;
/// - `via` is appended to the first `Via` value, or a new `Via` header is
///   added if there was none;
/// - everything else is copied in order, duplicates included.
pub(crate) fn rewrite_request(headers: &HeaderMap, client_ip: IpAddr, via: &str) -> HeaderMap {
    let forwarded_for = x_forwarded_for();

    let mut rewritten = HeaderMap::with_capacity(headers.len() + 2);
    let mut seen_forwarded_for = false;
    let mut seen_via = false;

    for (name, value) in headers {
        if is_hop_by_hop(name) {
            continue;
        }

        if !seen_forwarded_for && *name == forwarded_for {
            seen_forwarded_for = true;
            rewritten.append(name.clone(), extended(value, &client_ip.to_string()));
            continue;
        }

        if !seen_via && *name == header::VIA {
            seen_via = true;
            rewritten.append(name.clone(), extended(value, via));
            continue;
        }

        rewritten.append(name.clone(), value.clone());
    }

    if !seen_forwarded_for {
        rewritten.insert(
            forwarded_for,
            HeaderValue::from_str(&client_ip.to_string()).unwrap(),
        );
    }

    if !seen_via {
        rewritten.insert(
            header::VIA,
            HeaderValue::from_str(via).unwrap_or_else(|_| HeaderValue::from_static("1.1 fpx")),
        );
    }

    rewritten
}

/// Same pass as [`rewrite_request`] for the response direction, where only
/// hop-by-hop stripping applies.
pub(crate) fn rewrite_response(headers: &HeaderMap) -> HeaderMap {
    let mut rewritten = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            rewritten.append(name.clone(), value.clone());
        }
    }

    rewritten
}

/// Extends a comma separated header value with one more element. Values that
/// are not valid visible ASCII are forwarded untouched.
fn extended(value: &HeaderValue, element: &str) -> HeaderValue {
    let Ok(current) = value.to_str() else {
        return value.clone();
    };

    HeaderValue::from_str(&format!("{current}, {element}")).unwrap_or_else(|_| value.clone())
}
