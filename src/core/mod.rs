// src/core/mod.rs

//! The drain coordination core and the protocol pieces served on top of it.

pub mod commands;
pub mod coordinator;
pub mod errors;
pub mod metrics;
pub mod protocol;
pub mod service;
pub mod signal;

pub use coordinator::DrainCoordinator;
pub use errors::KeepDrainError;
pub use service::Service;
