use crate::tunnel::relay::Side;
use hyper::http::uri::InvalidUri;
use std::io;
use thiserror::Error;

/// Failures that stop a tunnel before or while it relays.
///
/// A peer closing its connection is not an error; it is reported through
/// [`CloseReason::PeerClosed`](crate::tunnel::relay::CloseReason) instead.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The host lacks a capability tunneling depends on. Raised before any backend connection.
    #[error("host cannot serve upgrade requests: {0} is not supported")]
    Configuration(&'static str),

    /// The single connect attempt failed; the client has already been answered with 502.
    #[error("backend {target} is unavailable: {source}")]
    BackendUnavailable {
        target: String,
        #[source]
        source: io::Error,
    },

    /// The backend answered the handshake with something that is not an HTTP response head.
    #[error("malformed handshake response from backend: {0}")]
    ProtocolParse(String),

    /// A read or write failed on an established connection.
    #[error("transport error on the {side} side: {source}")]
    Transport {
        side: Side,
        #[source]
        source: io::Error,
    },

    /// The configured backend URL cannot be used.
    #[error(transparent)]
    InvalidRemote(#[from] RemoteError),

    /// The private runtime for blocking dispatch could not be started.
    #[error("failed to start tunnel runtime: {0}")]
    Runtime(#[source] io::Error),
}

/// Why a backend URL was refused.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid remote url '{url}': {source}")]
    InvalidUri {
        url: String,
        #[source]
        source: InvalidUri,
    },

    #[error("unsupported remote scheme '{0}', expected http or ws")]
    UnsupportedScheme(String),

    #[error("remote url '{0}' is missing a scheme")]
    MissingScheme(String),

    #[error("remote url '{0}' is missing a host")]
    MissingHost(String),
}
