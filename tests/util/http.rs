//! HTTP utilities for integration tests.

use std::{convert::Infallible, net::SocketAddr};

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{
    body::Incoming,
    client::conn::http1::SendRequest,
    service::Service,
    Request, Response,
};
use hyper_util::rt::TokioIo;
use tokio::{
    self,
    net::{TcpSocket, TcpStream},
    sync::{oneshot, watch},
    task::JoinHandle,
};

use super::{
    service::{serve_connection, AsyncBody},
    tcp::{ping_tcp_server, usable_socket, usable_tcp_listener},
};

/// Starts a backend server in the background with a customizable request
/// handler, returning the listening address and task handle.
pub fn spawn_backend_server<S, B>(service: S) -> (SocketAddr, JoinHandle<()>)
where
    S: Service<Request<Incoming>, Response = Response<B>, Error = Infallible>
        + Send
        + Copy
        + 'static,
    S::Future: Send,
    B: AsyncBody,
{
    let (listener, addr) = usable_tcp_listener();

    let handle = tokio::task::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            serve_connection(stream, service).await;
        }
    });

    (addr, handle)
}

/// Starts an FPX forward proxy in the background with the given config.
pub fn spawn_proxy(config: fpx::config::Server) -> (SocketAddr, JoinHandle<()>) {
    spawn_configured_proxy(fpx::Server::init(config).unwrap())
}

/// Starts an already configured FPX server, which is how tests install
/// custom authenticators or dialers.
pub fn spawn_configured_proxy(server: fpx::Server) -> (SocketAddr, JoinHandle<()>) {
    let addr = server.socket_address();

    let handle = tokio::task::spawn(async {
        server.run().await.unwrap();
    });

    (addr, handle)
}

/// Starts an FPX forward proxy in the background with the given config and
/// provides access to a shutdown trigger and state updates.
pub fn spawn_proxy_with_controllers(
    config: fpx::config::Server,
) -> (
    SocketAddr,
    JoinHandle<()>,
    impl FnOnce(),
    watch::Receiver<fpx::State>,
) {
    let (tx, rx) = oneshot::channel();

    let server = fpx::Server::init(config).unwrap().shutdown_on(rx);

    let addr = server.socket_address();
    let state = server.subscribe();

    let handle = tokio::task::spawn(async {
        server.run().await.unwrap();
    });

    (addr, handle, || tx.send(()).unwrap(), state)
}

/// Launches an already initialized master task in the background, returning
/// every listening socket it spawned a server for. Taking the [`fpx::Master`]
/// itself lets tests install fleet-wide hooks before running it.
pub fn spawn_master(master: fpx::Master) -> (Vec<SocketAddr>, JoinHandle<()>) {
    let sockets = master.sockets();
    let handle = tokio::task::spawn(async move {
        master.run().await.unwrap();
    });

    (sockets, handle)
}

/// Provides an HTTP client that spawns a connection object in the background
/// to manage request transmissions.
pub async fn http_client<B: AsyncBody>(stream: TcpStream) -> SendRequest<B> {
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::task::spawn(async move { conn.await.unwrap() });

    sender
}

/// Sends an HTTP request from the given [`TcpSocket`] to the given
/// [`SocketAddr`].
pub async fn send_http_request_from<B>(
    from: TcpSocket,
    to: SocketAddr,
    req: Request<B>,
) -> (http::response::Parts, Bytes)
where
    B: AsyncBody,
{
    let stream = from.connect(to).await.unwrap();
    let mut sender = http_client(stream).await;

    let (parts, body) = sender.send_request(req).await.unwrap().into_parts();
    (parts, body.collect().await.unwrap().to_bytes())
}

/// Sends an HTTP request from a random socket to the given address.
pub async fn send_http_request<B>(to: SocketAddr, req: Request<B>) -> (http::response::Parts, Bytes)
where
    B: AsyncBody,
{
    send_http_request_from(usable_socket().0, to, req).await
}

/// Same as [`send_http_request_from`] but runs as a different task. This
/// allows the current task to continue execution.
pub fn spawn_client<B>(target: SocketAddr, req: Request<B>) -> (SocketAddr, JoinHandle<()>)
where
    B: AsyncBody,
{
    let (socket, addr) = usable_socket();

    let handle = tokio::task::spawn(async move {
        ping_tcp_server(target).await;
        send_http_request_from(socket, target, req).await;
    });

    (addr, handle)
}

pub mod request {
    //! Quick factories for the absolute-form requests clients send to a
    //! forward proxy.

    use std::net::SocketAddr;

    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use http_body_util::{Empty, Full};
    use hyper::{header, Request};

    /// `GET http://<target><path>` as a client behind the proxy would send it.
    pub fn via_proxy(target: SocketAddr, path: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .uri(format!("http://{target}{path}"))
            .body(Empty::<Bytes>::new())
            .unwrap()
    }

    /// Absolute-form request towards a named host instead of an address.
    pub fn via_proxy_to(authority: &str, path: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .uri(format!("http://{authority}{path}"))
            .body(Empty::<Bytes>::new())
            .unwrap()
    }

    /// Same as [`via_proxy`] plus a `Proxy-Authorization: Basic` header built
    /// from `user:password` credentials.
    pub fn authorized(target: SocketAddr, path: &str, credentials: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .uri(format!("http://{target}{path}"))
            .header(header::PROXY_AUTHORIZATION, basic(credentials))
            .body(Empty::<Bytes>::new())
            .unwrap()
    }

    /// Authorized POST carrying a body.
    pub fn authorized_post(
        target: SocketAddr,
        path: &str,
        credentials: &str,
        body: &str,
    ) -> Request<Full<Bytes>> {
        Request::builder()
            .method("POST")
            .uri(format!("http://{target}{path}"))
            .header(header::PROXY_AUTHORIZATION, basic(credentials))
            .body(Full::<Bytes>::from(body.to_owned()))
            .unwrap()
    }

    /// Value of a `Proxy-Authorization` header for the given credentials.
    pub fn basic(credentials: &str) -> String {
        format!("Basic {}", STANDARD.encode(credentials))
    }
}
