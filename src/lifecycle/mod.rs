//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (supervisor.rs → runner.rs → startup.rs):
//!     Validate services → join + bind per service → barrier → accept
//!
//! Shutdown (shutdown.rs):
//!     Signal or fatal service error → cancel scope → drain → close nodes
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGQUIT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One cancellation tree: root token, a supervisor scope, one child per runner
//! - Startup is all-or-nothing: no service accepts until every service has bound
//! - The first fatal error stops every service; cancellation itself is never an error

pub mod runner;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use runner::{ServiceError, ServiceRunner};
pub use shutdown::Shutdown;
pub use startup::StartupBarrier;
pub use supervisor::{Supervisor, SupervisorError};
