#![allow(dead_code)]

use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, StatusCode, Version};
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tunnelpx::proxy::{StandardForwardingHeaders, StandardResponseFilter};
use tunnelpx::tunnel::{
    HeaderList, HostCapabilities, InboundRequest, ProxyFallback, Remote, RequestContext, Responder, ResponseHead, ResponseStream, TunnelController,
};

#[derive(Debug, PartialEq)]
pub enum Event {
    Head(StatusCode, HeaderList),
    Chunk(Bytes),
    Closed,
    Aborted,
    Rejected(StatusCode, &'static str),
}

pub struct RecordingResponder(UnboundedSender<Event>);
pub struct RecordingStream(UnboundedSender<Event>);

pub fn responder() -> (RecordingResponder, UnboundedReceiver<Event>) {
    let (tx, rx) = unbounded_channel();
    (RecordingResponder(tx), rx)
}

impl Responder for RecordingResponder {
    type Stream = RecordingStream;

    fn start(self, head: ResponseHead) -> RecordingStream {
        let _ = self.0.send(Event::Head(head.status, head.headers));
        RecordingStream(self.0)
    }

    fn reject(self, status: StatusCode, body: &'static str) {
        let _ = self.0.send(Event::Rejected(status, body));
    }

    fn abort(self) {
        let _ = self.0.send(Event::Aborted);
    }
}

impl ResponseStream for RecordingStream {
    fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send {
        let sent = self.0.send(Event::Chunk(chunk)).map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe));
        async move { sent }
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        let _ = self.0.send(Event::Closed);
        async {}
    }

    fn abort(&mut self) {
        let _ = self.0.send(Event::Aborted);
    }
}

/// Stands in for the generic proxy and remembers that it ran.
pub struct StubProxy(pub oneshot::Sender<()>);

impl ProxyFallback for StubProxy {
    type Output = &'static str;

    fn forward(self) -> impl Future<Output = &'static str> + Send {
        let _ = self.0.send(());
        async { "proxied" }
    }
}

pub fn stub_proxy() -> (StubProxy, oneshot::Receiver<()>) {
    let (tx, rx) = oneshot::channel();
    (StubProxy(tx), rx)
}

pub fn controller(addr: SocketAddr, base_path: &str) -> TunnelController {
    let remote = Remote::parse(&format!("http://{}{}", addr, base_path)).expect("valid remote");
    TunnelController::new(remote, Arc::new(StandardForwardingHeaders::default()), Arc::new(StandardResponseFilter))
}

pub fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.append(HeaderName::from_bytes(name.as_bytes()).unwrap(), HeaderValue::from_str(value).unwrap());
    }
    map
}

pub type ClientFuture = std::future::Ready<io::Result<DuplexStream>>;

/// An inbound request whose raw client side is an in-memory pipe. The returned stream
/// is what the "client" writes to.
pub fn inbound(path: &str, pairs: &[(&str, &str)]) -> (InboundRequest<ClientFuture>, DuplexStream) {
    let (tunnel_side, client_side) = tokio::io::duplex(16 * 1024);
    let request = InboundRequest {
        method: Method::GET,
        path: path.to_string(),
        version: Version::HTTP_11,
        headers: headers(pairs),
        context: RequestContext { client_ip: IpAddr::V4(Ipv4Addr::LOCALHOST), scheme: "http".to_string() },
        capabilities: HostCapabilities::full(),
        client: Some(std::future::ready(Ok(tunnel_side))),
    };
    (request, client_side)
}

/// Reads one request head off a backend connection.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// A backend that accepts one connection, answers the handshake with `response` and then
/// echoes until the proxy half-closes. Reports the handshake it saw and whether EOF arrived.
pub struct EchoBackend {
    pub addr: SocketAddr,
    pub handshake: oneshot::Receiver<String>,
    pub saw_eof: oneshot::Receiver<bool>,
}

pub async fn echo_backend(response: Vec<u8>) -> EchoBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshake) = oneshot::channel();
    let (eof_tx, saw_eof) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = handshake_tx.send(read_head(&mut stream).await);
        stream.write_all(&response).await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => {
                    let _ = eof_tx.send(true);
                    return;
                }
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        let _ = eof_tx.send(false);
                        return;
                    }
                }
                Err(_) => {
                    let _ = eof_tx.send(false);
                    return;
                }
            }
        }
    });
    EchoBackend { addr, handshake, saw_eof }
}

/// A backend that answers the handshake with `response` and closes.
pub async fn closing_backend(response: Vec<u8>) -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshake) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = handshake_tx.send(read_head(&mut stream).await);
        stream.write_all(&response).await.unwrap();
        let _ = stream.shutdown().await;
    });
    (addr, handshake)
}

/// Address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Collects response chunks until `expected` bytes have arrived.
pub async fn collect_bytes(rx: &mut UnboundedReceiver<Event>, expected: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < expected {
        match rx.recv().await {
            Some(Event::Chunk(chunk)) => received.extend_from_slice(&chunk),
            Some(other) => panic!("expected data, got {other:?}"),
            None => break,
        }
    }
    received
}

pub fn drain_events(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
