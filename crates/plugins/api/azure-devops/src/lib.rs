//! Azure DevOps work-tracker implementation for contentreq.
//!
//! This crate talks to the Azure DevOps REST API (work items, WIQL,
//! classification nodes, teams, attachments and the graph user directory)
//! and maps its responses to the unified types in `contentreq-core`.

mod client;
mod types;

pub use client::AdoClient;
pub use types::*;
