//! HTTP request proxy for every method except CONNECT. The proxy terminates
//! the client's HTTP transaction and re-originates it towards the server
//! named by the absolute-form request target, streaming both bodies through
//! without buffering.

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

use super::Context;
use crate::{
    dial::DialError,
    http::{
        request::{ProxyRequest, TargetError},
        response::{BoxBodyResponse, LocalResponse, ProxyResponse},
    },
};

/// Forwards the request to the server named by its target and returns the
/// rewritten upstream response. See [`ProxyRequest`] and [`ProxyResponse`].
/// Failures before the upstream response starts are answered locally: an
/// unresolvable host with 404, transport errors with 500. Once the upstream
/// response is streaming, hyper owns the client socket and a failure on
/// either side simply tears the transfer down.
pub(super) async fn forward(
    request: ProxyRequest<Incoming>,
    context: &'static Context,
) -> Result<BoxBodyResponse, hyper::Error> {
    let target = match request.target() {
        Ok(target) => target,
        Err(TargetError::UnsupportedScheme) => return Ok(LocalResponse::unsupported_scheme()),
        Err(TargetError::MissingHost) => {
            return Ok(LocalResponse::bad_request("Request target has no host"));
        }
    };

    let stream = match context.dialer.connect(&target.host, target.port).await {
        Ok(stream) => stream,
        Err(err @ DialError::Resolve { .. }) => {
            debug!(%err, "upstream unresolvable");
            return Ok(LocalResponse::host_not_found());
        }
        Err(err) => {
            warn!(%err, "upstream unreachable");
            return Ok(LocalResponse::internal_error());
        }
    };

    let handshake = hyper::client::conn::http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await;

    let (mut sender, conn) = match handshake {
        Ok(handshake) => handshake,
        Err(err) => {
            warn!(%err, host = %target.host, "upstream handshake failed");
            return Ok(LocalResponse::internal_error());
        }
    };

    // The connection driver gets its own task. When the client goes away
    // mid-transfer, hyper drops the response body and the sender, which ends
    // this task and aborts the upstream connection without draining it.
    tokio::task::spawn(async move {
        if let Err(err) = conn.await {
            debug!(%err, "upstream connection closed with error");
        }
    });

    match sender.send_request(request.into_forwarded(&context.via)).await {
        Ok(response) => {
            Ok(ProxyResponse::new(response.map(|body| body.boxed())).into_forwarded())
        }
        Err(err) => {
            warn!(%err, host = %target.host, "upstream request failed");
            Ok(LocalResponse::internal_error())
        }
    }
}
