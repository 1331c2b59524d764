use crate::tunnel::error::{RemoteError, TunnelError};
use hyper::Uri;
use log::debug;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// The configured backend: where every tunnel and proxied request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    host: String,
    port: u16,
    /// Base path without a trailing slash; empty for the root.
    path: String,
}

impl Remote {
    /// Parses an `http://` or `ws://` URL. Backends are always reached over plain TCP.
    pub fn parse(url: &str) -> Result<Self, RemoteError> {
        let uri: Uri = url.trim().parse().map_err(|source| RemoteError::InvalidUri { url: url.to_string(), source })?;
        match uri.scheme_str() {
            Some("http") | Some("ws") => {}
            Some(other) => return Err(RemoteError::UnsupportedScheme(other.to_string())),
            None => return Err(RemoteError::MissingScheme(url.to_string())),
        }
        let host = uri.host().filter(|h| !h.is_empty()).ok_or_else(|| RemoteError::MissingHost(url.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = uri.port_u16().unwrap_or(80);
        let path = uri.path().trim_end_matches('/').to_string();
        Ok(Self { host, port, path })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }

    /// Base URL handed to the generic proxy, which appends the request path itself.
    pub fn proxy_base(&self) -> String {
        format!("http://{}{}", self.authority(), self.path)
    }
}

/// Backend address and path for one request. Fixed for the lifetime of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    host: String,
    port: u16,
    path: String,
}

impl BackendTarget {
    /// Joins the remote's base path with the inbound path and query.
    pub fn resolve(remote: &Remote, inbound_path: &str) -> Self {
        let mut path = remote.path.clone();
        if !inbound_path.starts_with('/') {
            path.push('/');
        }
        path.push_str(inbound_path);
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { host: remote.host.clone(), port: remote.port, path }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn authority(&self) -> String {
        authority(&self.host, self.port)
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') { format!("[{host}]:{port}") } else { format!("{host}:{port}") }
}

/// Opens backend connections: one attempt, no retry, no backoff.
#[derive(Debug, Clone, Default)]
pub struct BackendConnector {
    connect_timeout: Option<Duration>,
}

impl BackendConnector {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self { connect_timeout }
    }

    pub async fn connect(&self, target: &BackendTarget) -> Result<TcpStream, TunnelError> {
        debug!("Connecting to backend {target}", target = target.authority());
        let attempt = TcpStream::connect((target.host(), target.port()));
        let result = match self.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, format!("connect timed out after {} ms", limit.as_millis()))),
            },
            None => attempt.await,
        };
        let stream = result.map_err(|source| TunnelError::BackendUnavailable { target: target.authority(), source })?;
        // Handshake and small frames should not wait on Nagle.
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}
