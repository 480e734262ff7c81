//! External service adapters for flowmill workflows.
//!
//! Node executors never talk to AI providers, mail servers or webhooks
//! directly. They call through the [`Services`] trait, which hosts implement
//! for their environment. Every call can fail with a [`ServiceError`] that
//! says whether retrying might help.
//!
//! [`SimulatedServices`] answers every call locally and is what the runner
//! uses when no real adapters are wired in.

pub mod error;
pub mod services;
pub mod simulated;

pub use error::ServiceError;
pub use services::{EmailRequest, Services, TextRequest};
pub use simulated::SimulatedServices;
