//! Cross-API GPU texture sharing.
//!
//! `texshare` lets two graphics APIs on the same adapter work on the same
//! texture memory without copies. A primary API allocates the texture and
//! exports an OS-level shared handle; a secondary API opens a view through
//! that handle; a keyed-mutex [`SyncGate`] decides which side may touch the
//! memory at any moment.
//!
//! # Overview
//!
//! - [`DeviceContext`] owns the primary device, its immediate context and
//!   the secondary device.
//! - [`ResourceBridge`] creates [`SharedResource`]s with all-or-nothing
//!   rollback.
//! - [`InteropSession`] keeps named resources and hands them to one side
//!   at a time through [`InteropSession::with_resource`].
//!
//! Drivers implement [`InteropDriver`]; [`SoftwareDriver`] runs anywhere,
//! `Dx11Driver` (Windows) shares D3D11 textures through NT handles.

pub mod bridge;
pub mod device;
pub mod error;
pub mod resource;
pub mod session;

pub use bridge::ResourceBridge;
pub use device::DeviceContext;
pub use error::InteropError;
pub use resource::SharedResource;
pub use session::InteropSession;

// Re-export the value types and drivers so applications need one dependency.
pub use texshare_backend::software::SoftwareDriver;
pub use texshare_backend::{software, AdapterInfo, AdapterKind, InteropDriver, SharedHandle};
pub use texshare_core::{
    validate_all, AdapterPreference, DescriptorError, DeviceCreationError, DriverError,
    GateGuard, InteropConfig, PixelFormat, ResourceCreationError, SharedResourceDescriptor,
    SharingMode, Side, SurfaceInfo, SyncError, SyncGate, UsageFlags, ViewOpenError,
};

#[cfg(target_os = "windows")]
pub use texshare_backend::dx11::{self, Dx11Driver};
