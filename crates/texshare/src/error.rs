use texshare_core::{DeviceCreationError, ResourceCreationError, SyncError};
use thiserror::Error;

/// Errors surfaced by [`InteropSession`](crate::InteropSession).
#[derive(Debug, Error)]
pub enum InteropError {
    #[error("resource {0:?} is already registered")]
    DuplicateResource(String),
    #[error("no resource registered as {0:?}")]
    UnknownResource(String),
    #[error(transparent)]
    Device(#[from] DeviceCreationError),
    #[error(transparent)]
    Resource(#[from] ResourceCreationError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// The caller's access callback failed. The gate was released.
    #[error("resource access failed: {0:#}")]
    Access(anyhow::Error),
}
