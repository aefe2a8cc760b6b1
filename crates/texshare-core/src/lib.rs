//! Platform-agnostic value types for GPU resource sharing.
//!
//! This crate holds everything the bridge needs that does not touch a
//! driver: the [`SharedResourceDescriptor`] and its validation, the error
//! taxonomy, the [`SyncGate`] keyed-exchange state machine, and the
//! [`InteropConfig`] knobs. Driver implementations live in
//! `texshare-backend`; the session layer lives in `texshare`.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod sync;

pub use config::{AdapterPreference, InteropConfig};
pub use descriptor::{
    validate_all, SharedResourceDescriptor, SharingMode, SurfaceInfo, UsageFlags,
};
pub use error::{
    DescriptorError, DeviceCreationError, DriverError, ResourceCreationError, SyncError,
    ViewOpenError,
};
pub use format::PixelFormat;
pub use sync::{GateGuard, KeyedMutex, KeyedMutexError, Side, SyncGate, MAX_KEY};
