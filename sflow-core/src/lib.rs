//! Core of an embedded-style TCP server: a framed binary protocol over a
//! single-threaded, non-blocking event loop, backing an in-memory IPv4
//! routing table with longest-prefix-match lookup.
//!
//! This crate owns no process entry point and parses no command line
//! arguments — see the `sflow-server` binary for that.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod net;
pub mod routing;
pub mod server;
pub mod stats;

pub use clock::Clock;
pub use config::ServerConfig;
pub use net::error::{ErrorType, NetworkError, NetworkResult};
pub use routing::{RemoveOutcome, RouteEntry, RoutingTable, UpsertOutcome};
pub use server::Server;
pub use stats::Stats;
