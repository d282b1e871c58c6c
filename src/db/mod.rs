//! Remote store plumbing: the persistent RPC [`connection`], its wire
//! [`protocol`], and the table [`schema`].

pub mod connection;
pub mod protocol;
pub mod schema;

pub use connection::{Connection, ConnectionConfig, ConnectionState};

/// Normalize a configured host into a WebSocket RPC endpoint.
///
/// A bare `host[:port]` becomes `wss://host[:port]/rpc`; anything that already
/// carries a `ws://` or `wss://` scheme is used as-is.
pub fn rpc_url(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("ws://") || host.starts_with("wss://") {
        host.to_string()
    } else {
        format!("wss://{}/rpc", host.trim_end_matches('/'))
    }
}
