//! tunnelpx: a reverse proxy that tunnels protocol-upgrade requests.
//!
//! Ordinary requests are handed to a generic reverse proxy. Requests carrying an
//! `Upgrade` header are tunneled: the handshake is forwarded to the backend, the
//! backend's response head is parsed and emitted to the client, and every byte after
//! that is relayed verbatim in both directions.

pub mod config;
pub mod proxy;
pub mod tunnel;
pub mod utils;
