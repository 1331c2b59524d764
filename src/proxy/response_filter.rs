use crate::tunnel::{HeaderList, ResponseHeaderFilter};
use hyper::header::HeaderName;

/// Headers that describe the backend connection rather than the response, plus the
/// CGI-style `Status` header some backends emit.
const DROPPED: &[&str] = &[
    "status",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Response filter used for non-101 handshake answers.
///
/// Repeated headers such as `Set-Cookie` survive in their original order. Dropping
/// `Transfer-Encoding` is safe because the relay strips chunked framing before the body
/// reaches the host, which frames it again.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardResponseFilter;

impl StandardResponseFilter {
    fn is_dropped(name: &HeaderName) -> bool {
        DROPPED.contains(&name.as_str())
    }
}

impl ResponseHeaderFilter for StandardResponseFilter {
    fn filter_response_headers(&self, headers: HeaderList) -> HeaderList {
        headers.into_iter().filter(|(name, _)| !Self::is_dropped(name)).collect()
    }
}
