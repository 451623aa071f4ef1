//! labgate - command execution gateway for the Kafka observability lab
//!
//! Browser terminals connect over WebSocket and ask the gateway to run
//! Docker, docker-compose and Kafka CLI commands. Every command passes an
//! allow-list validator before it is spawned, runs under a deadline and
//! streams its output back as it is produced.
//!
//! - [`security`]: command validator, environment sanitizer, cwd resolution
//! - [`executor`]: process supervision, timeouts, cancellation
//! - [`runtime`]: how the Docker engine is reached (daemon API or CLI)
//! - [`gateway`]: WebSocket sessions and the REST API
//! - [`bus`]: command activity notifications

pub mod bus;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod runtime;
pub mod security;
pub mod utils;

pub use bus::{ActivityBus, CommandActivity, CommandOutcome};
pub use config::Config;
pub use error::{GateError, Result};
pub use executor::{CommandExecutor, ExecError, ExecRequest};
pub use gateway::{Session, SessionManager};
pub use runtime::ContainerRuntime;
pub use security::{CommandValidator, Rejection, ValidationResult};
