//! Tool router: one namespace over many tool clients.
//!
//! This module handles:
//! - Client registration, removal and connection (HTTP endpoints or stdio)
//! - Routing table rebuilds, always from scratch
//! - Collision naming: first-registered client keeps the bare name, later
//!   ones get `<client>_<tool>`
//! - Call dispatch with not-found and unavailable faults
//! - Status snapshots for callers and the CLI

pub mod errors;
#[allow(clippy::module_inception)]
pub mod router;
pub mod types;

pub use errors::RouterError;
pub use router::ToolRouter;
pub use types::{ClientState, ClientStatus, RouterStatus, ToolDescriptor};
