//! Binds the tunnel to a hyper 0.14 server connection.
//!
//! hyper only hands out the raw connection after it has written a 101 response, so the
//! responder returns the response head to the service through a channel and picks the
//! upgraded connection up afterwards. Any other status is streamed as a channel body,
//! and the client side of the tunnel reads as closed once hyper lets go of that body.

use crate::tunnel::{ProxyFallback, Responder, ResponseHead, ResponseStream};
use futures_util::Stream;
use hyper::body::{Bytes, HttpBody, Sender};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::{Body, Request, Response, StatusCode};
use log::{debug, error, trace};
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

type ClientWriter = WriteHalf<Upgraded>;

/// What the tunnel reads from the client.
pub enum ClientReader {
    Upgraded(ReadHalf<Upgraded>),
    /// The answer went out as a plain body and hyper is done with it. Reads as end of stream.
    Released,
}

impl AsyncRead for ClientReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientReader::Upgraded(reader) => Pin::new(reader).poll_read(cx, buf),
            ClientReader::Released => Poll::Ready(Ok(())),
        }
    }
}

/// The readable side of the client connection. Resolves once hyper has upgraded it, or
/// once a non-101 response body has been finished or dropped by hyper.
pub struct ClientSocket(oneshot::Receiver<ClientReader>);

impl ClientSocket {
    pub async fn acquire(self) -> io::Result<ClientReader> {
        self.0.await.map_err(|_| io::Error::new(io::ErrorKind::ConnectionAborted, "client connection was not upgraded"))
    }
}

/// Receives the response head for the hyper service. Closed without a value when the
/// tunnel wants the client connection dropped.
pub type HeadReceiver = oneshot::Receiver<Response<Body>>;

pub struct HyperResponder {
    head: oneshot::Sender<Response<Body>>,
    on_upgrade: OnUpgrade,
    client: oneshot::Sender<ClientReader>,
}

impl HyperResponder {
    /// `on_upgrade` must come from `hyper::upgrade::on` on the inbound request.
    pub fn new(on_upgrade: OnUpgrade) -> (Self, HeadReceiver, ClientSocket) {
        let (head, head_rx) = oneshot::channel();
        let (client, client_rx) = oneshot::channel();
        (Self { head, on_upgrade, client }, head_rx, ClientSocket(client_rx))
    }
}

/// Response body that tells the tunnel when hyper drops it: after the last byte for a
/// sized body, or when the client connection goes away.
struct ReleasingBody {
    inner: Body,
    client: Option<oneshot::Sender<ClientReader>>,
}

impl Stream for ReleasingBody {
    type Item = hyper::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_data(cx)
    }
}

impl Drop for ReleasingBody {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            trace!("Response body released by hyper");
            let _ = client.send(ClientReader::Released);
        }
    }
}

fn build_response(head: ResponseHead, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = head.status;
    let headers = response.headers_mut();
    for (name, value) in head.headers {
        headers.append(name, value);
    }
    response
}

impl Responder for HyperResponder {
    type Stream = HyperResponseStream;

    fn start(self, head: ResponseHead) -> HyperResponseStream {
        let HyperResponder { head: head_tx, on_upgrade, client } = self;

        if head.status != StatusCode::SWITCHING_PROTOCOLS {
            let (sender, inner) = Body::channel();
            let body = Body::wrap_stream(ReleasingBody { inner, client: Some(client) });
            if head_tx.send(build_response(head, body)).is_err() {
                debug!("Client request went away before the response head was sent");
            }
            return HyperResponseStream::Body(sender);
        }

        let (writer_tx, writer_rx) = oneshot::channel();
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let (reader, writer) = tokio::io::split(upgraded);
                    let _ = client.send(ClientReader::Upgraded(reader));
                    let _ = writer_tx.send(writer);
                }
                Err(e) => debug!("Client connection upgrade failed: {}", e),
            }
        });
        if head_tx.send(build_response(head, Body::empty())).is_err() {
            debug!("Client request went away before the 101 was sent");
        }
        HyperResponseStream::Upgrading(writer_rx)
    }

    fn reject(self, status: StatusCode, body: &'static str) {
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let _ = self.head.send(response);
    }

    fn abort(self) {
        trace!("Dropping client connection without a response");
    }
}

pub enum HyperResponseStream {
    Upgrading(oneshot::Receiver<ClientWriter>),
    Upgraded(ClientWriter),
    Body(Sender),
    Closed,
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "response stream is closed")
}

impl ResponseStream for HyperResponseStream {
    fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            if let HyperResponseStream::Upgrading(pending) = self {
                let writer = pending.await.map_err(|_| io::Error::new(io::ErrorKind::ConnectionAborted, "client upgrade did not complete"))?;
                *self = HyperResponseStream::Upgraded(writer);
            }
            match self {
                HyperResponseStream::Upgraded(writer) => {
                    writer.write_all(&chunk).await?;
                    writer.flush().await
                }
                HyperResponseStream::Body(sender) => {
                    sender.send_data(chunk).await.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client stopped reading the response"))
                }
                HyperResponseStream::Upgrading(_) | HyperResponseStream::Closed => Err(closed()),
            }
        }
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        let current = std::mem::replace(self, HyperResponseStream::Closed);
        async move {
            match current {
                HyperResponseStream::Upgraded(mut writer) => {
                    if let Err(e) = writer.shutdown().await {
                        debug!("Client shutdown failed: {}", e);
                    }
                }
                // Dropping the sender ends the body.
                HyperResponseStream::Body(sender) => drop(sender),
                HyperResponseStream::Upgrading(_) | HyperResponseStream::Closed => {}
            }
        }
    }

    fn abort(&mut self) {
        if let HyperResponseStream::Body(sender) = std::mem::replace(self, HyperResponseStream::Closed) {
            sender.abort();
        }
    }
}

/// Aborts the tunnel task when the hyper request future is dropped first.
pub struct SessionGuard<T> {
    handle: JoinHandle<T>,
    armed: bool,
}

impl<T> SessionGuard<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self { handle, armed: true }
    }

    /// Lets the task outlive the guard.
    pub fn detach(mut self) {
        self.armed = false;
    }

    pub async fn join(&mut self) -> Result<T, JoinError> {
        (&mut self.handle).await
    }
}

impl<T> Drop for SessionGuard<T> {
    fn drop(&mut self) {
        if self.armed {
            self.handle.abort();
        }
    }
}

/// The generic reverse proxy used for every request that is not an upgrade.
pub struct HyperProxy {
    client_ip: IpAddr,
    target: String,
    request: Request<Body>,
}

impl HyperProxy {
    pub fn new(client_ip: IpAddr, target: String, request: Request<Body>) -> Self {
        Self { client_ip, target, request }
    }
}

impl ProxyFallback for HyperProxy {
    type Output = Response<Body>;

    fn forward(self) -> impl Future<Output = Response<Body>> + Send {
        async move {
            match hyper_reverse_proxy::call(self.client_ip, self.target.as_str(), self.request).await {
                Ok(response) => response,
                Err(error) => {
                    error!("HTTP proxy error for {}: {:?}", self.target, error);
                    let mut response = Response::new(Body::from("Bad Gateway"));
                    *response.status_mut() = StatusCode::BAD_GATEWAY;
                    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                    response
                }
            }
        }
    }
}
