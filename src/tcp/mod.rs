//! Raw TCP forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Listening
//!     → Accepting (loop; transient accept errors are logged)
//!         → per connection: Dialing → Piping → Closed
//!     → Closed (on shutdown: listener dropped, connections closed and awaited)
//! ```

pub mod forwarder;

pub use forwarder::TcpForwarder;
