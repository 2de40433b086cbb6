use thiserror::Error;

use crate::sync::push::PushReport;

/// Terminal failures of a sync run. Every variant renders as a single
/// human-readable message.
///
/// Per-node fetch failures are not represented here: they are logged and the
/// affected node is given empty children.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid provider configuration. Raised before any network
    /// call is made.
    #[error("configuration error: {0}")]
    Config(String),

    /// The remote hierarchy could not be fetched at all.
    #[error("failed to fetch remote work items: {0:#}")]
    Fetch(anyhow::Error),

    /// Existing local documents could not be read or have an invalid shape.
    #[error("failed to read local documents: {0:#}")]
    Store(anyhow::Error),

    /// The final bulk write was rejected. Nothing from the batch is committed.
    #[error("failed to write synced documents: {0:#}")]
    Write(anyhow::Error),

    /// One or more items could not be pushed. Items already created remotely
    /// stay created and their remote ids were written back locally.
    #[error(
        "push incomplete: {} pushed, {} failed, {} skipped",
        .0.pushed.len(),
        .0.failed.len(),
        .0.skipped.len()
    )]
    Push(PushReport),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
