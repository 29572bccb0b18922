//! CONNECT tunnel. After a `CONNECT host:port` request is accepted, the
//! connection stops being HTTP: the proxy answers `200 Connection
//! established`, detaches the client socket from hyper's framing, and relays
//! raw bytes between client and target until either side closes.

use hyper::{
    body::Incoming,
    upgrade::{self, Upgraded},
    Request,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::Context;
use crate::{
    dial::DialError,
    http::response::{BoxBodyResponse, LocalResponse},
};

/// Establishes a tunnel to the `host:port` named by the request target. The
/// target connection is opened first and only a target that accepted it is
/// confirmed with a 200; an unresolvable target is answered with 404 and any
/// other connection failure with 500, mirroring the HTTP proxy path. On
/// success the relay runs on its own task and the 200 is fully flushed to the
/// client before the first tunneled byte, because hyper resolves the upgrade
/// only after writing the response.
pub(super) async fn establish(
    request: Request<Incoming>,
    context: &'static Context,
) -> Result<BoxBodyResponse, hyper::Error> {
    let Some(authority) = request.uri().authority().cloned() else {
        return Ok(LocalResponse::bad_request("CONNECT target must be host:port"));
    };

    let Some(port) = authority.port_u16() else {
        return Ok(LocalResponse::bad_request("CONNECT target must include a port"));
    };

    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_owned();

    let target = match context.dialer.connect(&host, port).await {
        Ok(stream) => stream,
        Err(err @ DialError::Resolve { .. }) => {
            debug!(%err, "tunnel target unresolvable");
            return Ok(LocalResponse::host_not_found());
        }
        Err(err) => {
            warn!(%err, "tunnel target unreachable");
            return Ok(LocalResponse::internal_error());
        }
    };

    tokio::task::spawn(async move {
        match upgrade::on(request).await {
            Ok(upgraded) => relay(upgraded, target, authority.as_str()).await,
            Err(err) => warn!(%err, "connection upgrade failed"),
        }
    });

    Ok(LocalResponse::connection_established())
}

/// Bidirectional byte relay between the client socket and the tunnel target.
/// Runs until both directions are done or either errors; dropping the two
/// streams on the way out destroys whatever half is still open, which is how
/// one side closing propagates to the other.
async fn relay(upgraded: Upgraded, mut target: TcpStream, peer: &str) {
    // HTTP framing is over for this connection, recover the raw client
    // socket. The accept loop always serves plain TCP streams, so the
    // downcast cannot miss.
    let Ok(parts) = upgraded.downcast::<TokioIo<TcpStream>>() else {
        warn!("client connection is not a plain TCP stream");
        return;
    };

    if !parts.read_buf.is_empty() {
        // The client pipelined payload bytes behind the CONNECT request,
        // before the tunnel existed. hyper only hands that buffer over here,
        // after the 200 went out, so the violation can't be answered with a
        // 4xx anymore; closing both sockets without relaying is what's left.
        warn!(peer, "client sent data before tunnel establishment");
        return;
    }

    let mut client = parts.io.into_inner();

    match tokio::io::copy_bidirectional(&mut client, &mut target).await {
        Ok((client_bytes, target_bytes)) => {
            debug!(peer, client_bytes, target_bytes, "tunnel closed");
        }
        Err(err) => debug!(peer, %err, "tunnel closed with error"),
    }
}
