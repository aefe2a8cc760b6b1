//! Driver backends for cross-API texture sharing.
//!
//! This crate defines the [`InteropDriver`] trait, the driver surface the
//! bridge consumes: adapter enumeration, device creation, shared-texture
//! allocation, shared-handle export and import, and keyed mutexes. On
//! Windows, [`dx11::Dx11Driver`] shares D3D11 textures with a second D3D11.1
//! device through NT handles. The [`software::SoftwareDriver`] runs
//! everywhere and backs the tests.

pub mod driver;
pub use driver::{AdapterInfo, AdapterKind, InteropDriver, SharedHandle};

pub mod software;

// Platform-specific implementations.

#[cfg(target_os = "windows")]
pub mod dx11;
