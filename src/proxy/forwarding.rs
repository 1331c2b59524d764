use crate::tunnel::{BackendTarget, ForwardingHeaders, RequestContext};
use hyper::HeaderMap;
use hyper::header::{CONTENT_LENGTH, HOST, HeaderName, HeaderValue, TRANSFER_ENCODING};
use log::warn;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Forwarding headers the way the generic proxy path sets them.
///
/// The inbound headers are kept, framing headers are dropped (a handshake carries no
/// body), `Host` is pointed at the backend unless `preserve_host` is set, and the client
/// address is appended to `X-Forwarded-For`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardForwardingHeaders {
    pub preserve_host: bool,
}

impl StandardForwardingHeaders {
    pub fn new(preserve_host: bool) -> Self {
        Self { preserve_host }
    }
}

impl ForwardingHeaders for StandardForwardingHeaders {
    fn build_forwarding_headers(&self, inbound: &HeaderMap, context: &RequestContext, target: &BackendTarget) -> HeaderMap {
        let mut headers = inbound.clone();
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);

        if !self.preserve_host || !headers.contains_key(HOST) {
            match HeaderValue::from_str(&target.authority()) {
                Ok(host) => {
                    headers.insert(HOST, host);
                }
                Err(e) => warn!("Backend authority {} is not a valid Host header: {}", target.authority(), e),
            }
        }

        let client_ip = context.client_ip.to_string();
        let prior: Vec<&str> = headers.get_all(&X_FORWARDED_FOR).iter().filter_map(|v| v.to_str().ok()).collect();
        let forwarded_for = if prior.is_empty() { client_ip.clone() } else { format!("{}, {}", prior.join(", "), client_ip) };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
        if let Ok(value) = HeaderValue::from_str(&context.scheme) {
            headers.insert(X_FORWARDED_PROTO, value);
        }
        if let Ok(value) = HeaderValue::from_str(&client_ip) {
            headers.insert(X_REAL_IP, value);
        }
        headers
    }
}
