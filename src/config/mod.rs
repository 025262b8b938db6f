//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or environment (TS_*, SERVICE_*)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ForwarderConfig (validated, immutable)
//!     → moved into the supervisor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no global instance
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod mapping;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use mapping::{MappingError, ServiceMapping};
pub use schema::{ForwarderConfig, ObservabilityConfig, OverlayConfig, TimeoutConfig};
pub use validation::{validate_config, validate_services, ValidationError};
