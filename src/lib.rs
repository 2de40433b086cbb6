//! Bidirectional sync between local requirement documents (PRD, user story,
//! task) and a remote work-item system such as Jira or Azure DevOps.

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod providers;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{SyncError, SyncResult};
