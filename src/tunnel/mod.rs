// Tunnel module
//
// Protocol-upgrade tunneling split into focused submodules:
// - parser: incremental parsing of the backend's handshake response head
// - policy: upgrade detection and handshake request construction
// - connector: backend target resolution and the single connect attempt
// - relay: the two-direction byte pump and its shutdown coordination
// - chunked: removes chunked framing from non-101 answers
// - controller: per-request orchestration of the above
// - host: the surface a host server implements to run tunnels

pub mod chunked;
pub mod connector;
pub mod controller;
pub mod error;
pub mod host;
pub mod parser;
pub mod policy;
pub mod relay;

pub use connector::{BackendConnector, BackendTarget, Remote};
pub use controller::{Dispatch, TunnelController};
pub use error::{RemoteError, TunnelError};
pub use host::{
    ForwardingHeaders, HostCapabilities, InboundRequest, ProxyFallback, RequestContext, Responder, ResponseHead, ResponseHeaderFilter, ResponseStream,
};
pub use parser::{HeaderList, ParseOutcome, ParseState, ParsedHead};
pub use relay::{CloseReason, RelaySettings, SessionReport, Side, TunnelSession};
