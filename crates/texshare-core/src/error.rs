//! Error taxonomy shared by every layer of the bridge.
//!
//! Allocation-path errors ([`ResourceCreationError`], [`ViewOpenError`]) are
//! returned only after partial state has been rolled back. Synchronization
//! errors ([`SyncError`]) never touch memory and are always surfaced.

use std::time::Duration;

use thiserror::Error;

use crate::descriptor::SurfaceInfo;
use crate::format::PixelFormat;
use crate::sync::Side;

/// A failed call into the underlying graphics driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{call} failed: {detail}")]
pub struct DriverError {
    /// Name of the driver entry point that failed.
    pub call: &'static str,
    pub detail: String,
}

impl DriverError {
    pub fn new(call: &'static str, detail: impl Into<String>) -> Self {
        Self {
            call,
            detail: detail.into(),
        }
    }
}

/// Why a [`SharedResourceDescriptor`](crate::SharedResourceDescriptor) was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("format {0} cannot be shared across APIs")]
    UnsupportedFormat(PixelFormat),
    #[error("incompatible usage: {0}")]
    IncompatibleUsage(&'static str),
    #[error("{requested} mip levels requested, at most {max} allowed")]
    InvalidMipLevels { requested: u32, max: u32 },
    #[error("initial data is {actual} bytes, expected {expected}")]
    InitialDataSize { expected: usize, actual: usize },
}

/// Fatal: no adapter could host the primary device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceCreationError {
    #[error("no compatible GPU adapter found")]
    NoCompatibleAdapter,
    #[error("adapter enumeration failed")]
    Enumeration(#[source] DriverError),
    #[error("driver refused device creation on every candidate adapter")]
    DriverRefused(#[source] DriverError),
    #[error("secondary API could not open the device's adapter")]
    SecondaryUnavailable(#[source] DriverError),
}

/// The secondary view could not be opened over the shared handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewOpenError {
    #[error("secondary import of the shared handle failed")]
    Import(#[source] DriverError),
    #[error("secondary view is {actual:?}, expected {expected:?}")]
    Mismatch {
        expected: SurfaceInfo,
        actual: SurfaceInfo,
    },
}

/// Recoverable: the shared resource was not created and nothing is left
/// allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceCreationError {
    #[error(transparent)]
    InvalidDescriptor(#[from] DescriptorError),
    #[error("primary texture allocation failed")]
    Allocation(#[source] DriverError),
    #[error("shared handle export failed")]
    HandleExport(#[source] DriverError),
    #[error(transparent)]
    ViewOpen(#[from] ViewOpenError),
    #[error("keyed mutex setup failed")]
    SyncSetup(#[source] DriverError),
}

/// Failure of a keyed exchange on a [`SyncGate`](crate::SyncGate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{side} side timed out after {timeout:?} waiting for key {key}")]
    AcquireTimeout {
        side: Side,
        key: u64,
        timeout: Duration,
    },
    #[error("{side} side used key {found}, expected {expected}")]
    KeyMismatch {
        side: Side,
        expected: u64,
        found: u64,
    },
    #[error("{0} side already holds the gate")]
    AlreadyHeld(Side),
    #[error("{0} side does not hold the gate")]
    NotHeld(Side),
    #[error("key {0} exceeds the largest representable key")]
    KeyOutOfRange(u64),
    #[error("keyed mutex driver call failed")]
    Driver(#[source] DriverError),
}
