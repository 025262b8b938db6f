//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Overlay port 80
//!     → server.rs (accept, HTTP/1.1, timeouts)
//!     → redirect.rs (301 to https://host/path)
//!
//! Overlay port 443
//!     → server.rs (accept, TLS via net::tls, HTTP/1.1, timeouts)
//!     → proxy.rs (rewrite, headers.rs, forward to backend, stream back)
//!
//! https.rs binds both listeners for a service and owns their shutdown.
//! ```

pub mod headers;
pub mod https;
pub mod proxy;
pub mod redirect;
pub mod server;

pub use https::{HttpsError, HttpsProxy, HTTPS_PORT, HTTP_PORT};
pub use server::{HttpServer, ServerTimeouts};
