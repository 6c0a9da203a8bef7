//! ppedge gateway library.
//!
//! Accepts TCP connections, strips an optional PROXY protocol header,
//! sniffs TLS and hands each connection to a downstream handler over a
//! uniform stream.

pub mod config;
pub mod conn;
pub mod echo;
pub mod listener;
pub mod tls;

pub use config::Config;
pub use conn::{
    serve_connection, ConnectionError, ConnectionHandler, ConnectionSummary, DispatchedConnection,
    GatewayContext, HeaderKind, HeaderPolicy, Route, TlsHandoff,
};
pub use echo::EchoHandler;
pub use listener::{Listener, ListenerConfig, ListenerStats};
