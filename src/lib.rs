//! Overlay network service forwarder library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod overlay;
pub mod tcp;

pub use config::schema::ForwarderConfig;
pub use lifecycle::{Shutdown, Supervisor};
