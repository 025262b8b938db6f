//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Overlay connection
//!     → tls.rs (optional TLS handshake, certificate by SNI)
//!     → connection.rs (ID, lifecycle tracking, task group)
//!     → pump.rs (raw TCP) or the HTTP layer
//!
//! Connection States:
//!     Dialing → Piping → Closed
//! ```
//!
//! # Design Decisions
//! - Each connection task is tracked so shutdown can wait for it
//! - Either pump direction finishing closes the whole connection
//! - idle.rs measures inactivity on the stream itself, not per request

pub mod connection;
pub mod idle;
pub mod pump;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
pub use tls::{TlsError, TlsTerminator};
