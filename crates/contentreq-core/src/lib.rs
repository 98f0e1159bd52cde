//! Core traits, types, configuration and error handling for contentreq.
//!
//! This crate provides the foundational abstractions shared by the worker,
//! the supervisor and the HTTP facade.

pub mod config;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod provider;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use mapping::{StateBucket, StatusFilter, Urgency};
pub use provider::WorkTracker;
pub use types::*;

#[cfg(any(test, feature = "mock"))]
pub use provider::MockWorkTracker;
