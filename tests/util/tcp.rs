//! TCP utilities for integration tests.

use std::net::SocketAddr;

use tokio::{
    self,
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpSocket, TcpStream},
    task::JoinHandle,
};

/// Creates a socket binding it to port "0", which lets the OS pick any
/// available TCP port. This is useful because tests are run in parallel and
/// we don't want socket addresses to collide, but we still want to know
/// the socket address.
pub fn usable_socket() -> (TcpSocket, SocketAddr) {
    let socket = TcpSocket::new_v4().unwrap();

    #[cfg(not(windows))]
    socket.set_reuseaddr(true).unwrap();

    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = socket.local_addr().unwrap();

    (socket, addr)
}

/// Same as [`usable_socket`] but already configured for listening.
pub fn usable_tcp_listener() -> (TcpListener, SocketAddr) {
    let (socket, addr) = usable_socket();
    let listener = socket.listen(1024).unwrap();

    (listener, addr)
}

/// An address on localhost that refuses connections: bind, grab the port,
/// drop the listener.
pub fn refusing_addr() -> SocketAddr {
    let (listener, addr) = usable_tcp_listener();
    drop(listener);

    addr
}

/// Attempts to connect to a TCP server that's running as a Tokio task for a
/// number of retries. Each failed attempt yields the execution back to the
/// runtime, allowing Tokio to progress pending tasks. If all the attempts
/// fail, the function panics and tests are stopped. This should work with
/// both single threaded runtime and multithreaded runtime.
pub async fn ping_tcp_server(addr: SocketAddr) {
    let retries = 10;

    for _ in 0..retries {
        match TcpStream::connect(addr).await {
            Ok(mut stream) => {
                stream.shutdown().await.unwrap();
                return;
            }
            Err(_) => tokio::task::yield_now().await,
        }
    }

    panic!("Could not connect to server {addr}");
}

/// Convenience for awaiting multiple servers. See [`ping_tcp_server`].
pub async fn ping_all(addrs: &[SocketAddr]) {
    // This function is usually called after spawning the servers, so we can
    // yield right at the beginning and most likely the servers will already
    // be listening by the time we try to ping them.
    tokio::task::yield_now().await;
    for addr in addrs {
        ping_tcp_server(*addr).await;
    }
}

/// TCP server that writes every received byte back to its peer. Used as the
/// far end of CONNECT tunnels.
pub fn spawn_echo_server() -> (SocketAddr, JoinHandle<()>) {
    let (listener, addr) = usable_tcp_listener();

    let handle = tokio::task::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();

            tokio::task::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    (addr, handle)
}

/// Reads one HTTP message head (status line plus headers) from the stream,
/// byte by byte so that nothing past the blank line is consumed. That matters
/// for CONNECT: everything after the 200 head belongs to the tunnel.
pub async fn read_http_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();

    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await.unwrap());
    }

    String::from_utf8(head).unwrap()
}

/// Writes a full request down a fresh connection and reads one response,
/// returning head and body separately. The body is read to the length
/// announced by `Content-Length` (missing means empty).
pub async fn send_raw_request(addr: SocketAddr, request: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let head = read_http_head(&mut stream).await;

    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);

    let mut body = vec![0; content_length];
    stream.read_exact(&mut body).await.unwrap();

    (head, String::from_utf8(body).unwrap())
}

/// Same as [`send_raw_request`] but runs as a different task, so the current
/// one can play the upstream server role in the meantime.
pub fn spawn_raw_client(target: SocketAddr, request: String) -> JoinHandle<(String, String)> {
    tokio::task::spawn(async move {
        ping_tcp_server(target).await;
        send_raw_request(target, &request).await
    })
}
