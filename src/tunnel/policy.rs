use crate::tunnel::connector::BackendTarget;
use hyper::header::{CONNECTION, UPGRADE};
use hyper::{HeaderMap, Method, header::HeaderValue};

/// True when the request carries a non-empty `Upgrade` header.
///
/// Any token counts, not only `websocket`, so every upgradable protocol is tunneled.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers.get_all(UPGRADE).iter().any(|value| !value.as_bytes().trim_ascii().is_empty())
}

/// Overlays the upgrade headers on the forwarding headers built for the backend.
///
/// `Upgrade` carries the client's value(s) unchanged and `Connection` is forced to
/// `Upgrade`, replacing whatever the forwarding step produced for either name.
pub fn build_handshake_headers(inbound: &HeaderMap, forwarded: HeaderMap) -> HeaderMap {
    let mut headers = forwarded;
    headers.remove(UPGRADE);
    for value in inbound.get_all(UPGRADE) {
        headers.append(UPGRADE, value.clone());
    }
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers
}

/// The request written to the backend to open the tunnel. Serialized exactly once.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
}

impl HandshakeRequest {
    pub fn new(target: &BackendTarget, headers: HeaderMap) -> Self {
        Self { method: Method::GET, path: target.path().to_string(), headers }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// HTTP/1.1 wire form: request line, one line per header value, blank line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", self.method, self.path).as_bytes());
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}
