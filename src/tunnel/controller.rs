use crate::tunnel::connector::{BackendConnector, BackendTarget, Remote};
use crate::tunnel::error::TunnelError;
use crate::tunnel::host::{ForwardingHeaders, InboundRequest, ProxyFallback, Responder, ResponseHeaderFilter};
use crate::tunnel::policy::{HandshakeRequest, build_handshake_headers, is_upgrade_request};
use crate::tunnel::relay::{CloseReason, RelaySettings, SessionReport, Side, TunnelSession};
use hyper::StatusCode;
use hyper::header::UPGRADE;
use log::{debug, info, trace, warn};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// How a request was served.
#[derive(Debug)]
pub enum Dispatch<O> {
    /// Not an upgrade; the generic proxy's result, untouched.
    Proxied(O),
    /// Tunneled until one side closed.
    Tunneled(SessionReport),
}

/// Orchestrates one request: detect, connect, handshake, relay.
pub struct TunnelController {
    remote: Remote,
    connector: BackendConnector,
    forwarding: Arc<dyn ForwardingHeaders>,
    filter: Arc<dyn ResponseHeaderFilter>,
    settings: RelaySettings,
}

impl std::fmt::Debug for TunnelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelController")
            .field("remote", &self.remote)
            .field("connector", &self.connector)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TunnelController {
    pub fn new(remote: Remote, forwarding: Arc<dyn ForwardingHeaders>, filter: Arc<dyn ResponseHeaderFilter>) -> Self {
        Self { remote, connector: BackendConnector::default(), forwarding, filter, settings: RelaySettings::default() }
    }

    pub fn with_connector(mut self, connector: BackendConnector) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_settings(mut self, settings: RelaySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    /// Serves one request on the host's event loop.
    ///
    /// Returns `Err` when the request never reached relaying or the backend's handshake
    /// response could not be parsed. A `BackendUnavailable` error has already been
    /// answered with 502; every other error leaves the client connection torn down.
    /// Dropping the returned future abandons an in-flight connect before any handshake
    /// byte is written.
    pub async fn handle<C, Rd, R, P>(&self, request: InboundRequest<C>, responder: R, fallback: P) -> Result<Dispatch<P::Output>, TunnelError>
    where
        C: Future<Output = io::Result<Rd>> + Send,
        Rd: AsyncRead + Unpin + Send,
        R: Responder,
        P: ProxyFallback,
    {
        if !is_upgrade_request(&request.headers) {
            trace!("{method} {path} is not an upgrade, using the generic proxy", method = request.method, path = request.path);
            return Ok(Dispatch::Proxied(fallback.forward().await));
        }
        drop(fallback);

        let InboundRequest { path, headers, context, capabilities, client, .. } = request;
        if !capabilities.response_streaming {
            return Err(TunnelError::Configuration("response streaming"));
        }
        let client = match client {
            Some(client) if capabilities.raw_socket => client,
            _ => return Err(TunnelError::Configuration("raw client socket access")),
        };

        let target = BackendTarget::resolve(&self.remote, &path);
        let protocol = headers.get(UPGRADE).and_then(|v| v.to_str().ok()).unwrap_or("-");
        info!(
            "Tunneling '{protocol}' upgrade from {ip} to {backend}{path}",
            protocol = protocol,
            ip = context.client_ip,
            backend = target.authority(),
            path = target.path()
        );

        let mut backend = match self.connector.connect(&target).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!("Upgrade from {ip} failed: {e}", ip = context.client_ip);
                responder.reject(StatusCode::BAD_GATEWAY, "Bad Gateway");
                return Err(e);
            }
        };

        let forwarded = self.forwarding.build_forwarding_headers(&headers, &context, &target);
        let handshake = HandshakeRequest::new(&target, build_handshake_headers(&headers, forwarded));
        trace!("Handshake to {backend}: {handshake:?}", backend = target.authority());
        if let Err(source) = backend.write_all(&handshake.to_bytes()).await {
            responder.abort();
            return Err(TunnelError::Transport { side: Side::Backend, source });
        }

        let report = TunnelSession::new(backend, responder, self.settings).run(client, self.filter.as_ref()).await;
        debug!(
            "Tunnel {ip} <-> {backend} finished: initiator={initiator}, headers_sent={sent}, up={up} bytes, down={down} bytes",
            ip = context.client_ip,
            backend = target.authority(),
            initiator = report.initiator,
            sent = report.headers_sent,
            up = report.client_to_backend,
            down = report.backend_to_client
        );
        match report.reason {
            CloseReason::Malformed(reason) => Err(TunnelError::ProtocolParse(reason)),
            _ => Ok(Dispatch::Tunneled(report)),
        }
    }

    /// Serves one request for a host without a non-blocking event loop.
    ///
    /// Pumps a private single-threaded runtime and blocks the caller until the session
    /// closes. Must not be called from inside an async runtime.
    pub fn handle_blocking<C, Rd, R, P>(&self, request: InboundRequest<C>, responder: R, fallback: P) -> Result<Dispatch<P::Output>, TunnelError>
    where
        C: Future<Output = io::Result<Rd>> + Send,
        Rd: AsyncRead + Unpin + Send,
        R: Responder,
        P: ProxyFallback,
    {
        if !request.capabilities.nonblocking && is_upgrade_request(&request.headers) {
            warn!("Host has no non-blocking runtime; tunnel for {ip} blocks its caller until it closes", ip = request.context.client_ip);
        }
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(TunnelError::Runtime)?;
        runtime.block_on(self.handle(request, responder, fallback))
    }
}
