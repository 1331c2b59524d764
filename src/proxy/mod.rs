// Proxy module
//
// The hyper server and everything that adapts it to the tunnel:
// - http_server: listener loop and service wiring
// - request_handler: per-request dispatch between the generic proxy and the tunnel
// - hyper_host: responder, response stream and fallback backed by hyper 0.14
// - forwarding: Host and X-Forwarded-* headers for the backend handshake
// - response_filter: hop-by-hop filtering of non-101 handshake answers

pub mod forwarding;
pub mod http_server;
pub mod hyper_host;
pub mod request_handler;
pub mod response_filter;

pub use forwarding::StandardForwardingHeaders;
pub use http_server::{serve_listener, start_rp_server};
pub use response_filter::StandardResponseFilter;
