//! The surface a host server provides so a request can be tunneled.
//!
//! The tunnel never talks to a server framework directly. A host hands it an
//! [`InboundRequest`], a [`Responder`] for the response it will stream back, and a
//! [`ProxyFallback`] to run when the request turns out not to be an upgrade.

use crate::tunnel::connector::BackendTarget;
use crate::tunnel::parser::HeaderList;
use hyper::body::Bytes;
use hyper::{HeaderMap, Method, StatusCode, Version};
use std::future::Future;
use std::io;
use std::net::IpAddr;

/// What the host can do for a tunnel. Checked once per request, before connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// The host can stream a response whose body is not known up front. Required.
    pub response_streaming: bool,
    /// The host exposes the inbound connection as a raw byte stream. Required.
    pub raw_socket: bool,
    /// The host drives a non-blocking event loop. Without it the controller pumps its own.
    pub nonblocking: bool,
}

impl HostCapabilities {
    pub const fn full() -> Self {
        Self { response_streaming: true, raw_socket: true, nonblocking: true }
    }
}

/// Per-request facts the forwarding-header collaborator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub client_ip: IpAddr,
    /// Scheme the client used to reach us ("http" or "https").
    pub scheme: String,
}

#[derive(Debug)]
pub struct InboundRequest<C> {
    pub method: Method,
    /// Path and query as received.
    pub path: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub context: RequestContext,
    pub capabilities: HostCapabilities,
    /// Resolves to the readable side of the client connection once raw bytes can flow.
    /// `None` when the host cannot expose the socket at all.
    pub client: Option<C>,
}

/// Status and headers emitted to the client once the backend head is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderList,
}

/// Streaming response contract of the host. Consumed by whichever outcome comes first.
pub trait Responder: Send + 'static {
    type Stream: ResponseStream;

    /// Emits status and headers and returns the stream for everything that follows.
    fn start(self, head: ResponseHead) -> Self::Stream;

    /// Sends a complete response with a short text body.
    fn reject(self, status: StatusCode, body: &'static str);

    /// Tears the client connection down without sending a response.
    fn abort(self);
}

/// Body half of a started response.
pub trait ResponseStream: Send + 'static {
    fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Ends the response gracefully.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Ends the response by dropping the connection.
    fn abort(&mut self);
}

/// The generic reverse-proxy path used for requests that are not upgrades.
pub trait ProxyFallback: Send {
    type Output: Send;

    fn forward(self) -> impl Future<Output = Self::Output> + Send;
}

/// Builds the forwarding headers (Host, X-Forwarded-*, X-Real-IP) for the handshake.
///
/// The tunnel overlays `Upgrade` and `Connection` on whatever this returns.
pub trait ForwardingHeaders: Send + Sync {
    fn build_forwarding_headers(&self, inbound: &HeaderMap, context: &RequestContext, target: &BackendTarget) -> HeaderMap;
}

/// Filters backend response headers for any status other than 101.
///
/// A chunked body reaches the response stream already decoded, so implementations should
/// drop `Transfer-Encoding`.
pub trait ResponseHeaderFilter: Send + Sync {
    fn filter_response_headers(&self, headers: HeaderList) -> HeaderList;
}
