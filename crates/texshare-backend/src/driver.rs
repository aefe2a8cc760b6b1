//! Common interface to the graphics driver underneath the bridge.

use std::fmt;

use texshare_core::{DriverError, InteropConfig, KeyedMutex, SharedResourceDescriptor, SurfaceInfo};

/// Kind of adapter reported by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Hardware,
    /// Software rasterizer (WARP on Windows).
    Software,
}

/// An adapter the primary device can be created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Position in the driver's enumeration order.
    pub index: usize,
    pub name: String,
    pub kind: AdapterKind,
    pub dedicated_video_memory: u64,
}

/// OS-level token identifying a block of GPU memory importable by the
/// secondary API (an NT handle on Windows).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(u64);

impl SharedHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedHandle(0x{:X})", self.0)
    }
}

/// Driver surface consumed by the bridge.
///
/// Implementations exist for D3D11 (Windows, NT shared handles and
/// `IDXGIKeyedMutex`) and for a portable software driver.
///
/// Teardown calls take their object by value so the caller decides the
/// order: views before the texture they alias, the texture before its
/// shared handle, the secondary device and context before the device.
pub trait InteropDriver {
    /// Primary logical device.
    type Device;
    /// Immediate command context of the primary device.
    type Context;
    /// Secondary API's device used to import shared handles.
    type SecondaryDevice;
    /// Primary texture. Owns the GPU memory.
    type Texture;
    /// Secondary view over a texture's memory. Never owns it.
    type View;
    /// Driver keyed mutex covering one texture/view pair.
    type KeyedMutex: KeyedMutex;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// List adapters in preference order, software adapters included.
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, DriverError>;

    /// Create the primary device and its immediate context on `adapter`.
    fn create_device(
        &self,
        adapter: &AdapterInfo,
        config: &InteropConfig,
    ) -> Result<(Self::Device, Self::Context), DriverError>;

    /// Open the secondary API on the adapter `device` lives on.
    fn open_secondary(
        &self,
        adapter: &AdapterInfo,
        device: &Self::Device,
    ) -> Result<Self::SecondaryDevice, DriverError>;

    /// `Ok` while the device is usable, the removal reason otherwise.
    fn device_status(&self, device: &Self::Device) -> Result<(), DriverError>;

    /// Submit pending commands on the immediate context.
    fn flush(&self, context: &Self::Context);

    fn destroy_secondary(&self, secondary: Self::SecondaryDevice);
    fn destroy_context(&self, context: Self::Context);
    fn destroy_device(&self, device: Self::Device);

    /// Allocate a texture flagged for cross-API sharing with a keyed mutex.
    /// Initial data is uploaded through `context`.
    fn create_shared_texture(
        &self,
        device: &Self::Device,
        context: &Self::Context,
        desc: &SharedResourceDescriptor,
    ) -> Result<Self::Texture, DriverError>;

    /// Export the OS-level handle for `texture`, with the access rights the
    /// descriptor's sharing mode grants.
    fn export_handle(
        &self,
        texture: &Self::Texture,
        desc: &SharedResourceDescriptor,
    ) -> Result<SharedHandle, DriverError>;

    /// Import `handle` on the secondary API.
    fn open_view(
        &self,
        secondary: &Self::SecondaryDevice,
        handle: SharedHandle,
    ) -> Result<Self::View, DriverError>;

    /// Geometry and format of an opened view, as the secondary API sees it.
    fn view_info(&self, view: &Self::View) -> Result<SurfaceInfo, DriverError>;

    /// Keyed mutex for both halves of a shared pair.
    fn keyed_mutex(
        &self,
        texture: &Self::Texture,
        view: &Self::View,
    ) -> Result<Self::KeyedMutex, DriverError>;

    fn close_view(&self, view: Self::View);
    fn destroy_texture(&self, texture: Self::Texture);
    fn close_handle(&self, handle: SharedHandle);
}
