//! D3D11 driver (Windows). Both halves of a shared pair are D3D11 devices
//! on the same adapter; the secondary opens NT shared handles through
//! `ID3D11Device1::OpenSharedResource1`.

pub mod device;
pub mod interop;

use texshare_core::{DriverError, InteropConfig, SharedResourceDescriptor, SurfaceInfo};
use tracing::{debug, warn};
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Device1, ID3D11DeviceContext};

use crate::driver::{AdapterInfo, InteropDriver, SharedHandle};

pub use interop::{Dx11KeyedMutex, Dx11Texture, Dx11View};

/// Primary device. The immediate context is owned separately so it can be
/// released before the device.
pub struct Dx11Device {
    device: ID3D11Device,
    debug_layer: bool,
}

impl Dx11Device {
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Dx11Driver;

impl InteropDriver for Dx11Driver {
    type Device = Dx11Device;
    type Context = ID3D11DeviceContext;
    type SecondaryDevice = ID3D11Device1;
    type Texture = Dx11Texture;
    type View = Dx11View;
    type KeyedMutex = Dx11KeyedMutex;

    fn name(&self) -> &'static str {
        "d3d11"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, DriverError> {
        device::enumerate_adapters()
    }

    fn create_device(
        &self,
        adapter: &AdapterInfo,
        config: &InteropConfig,
    ) -> Result<(Dx11Device, ID3D11DeviceContext), DriverError> {
        let (device, context) = device::create_device(adapter, config.debug_layer)?;
        Ok((
            Dx11Device {
                device,
                debug_layer: config.debug_layer,
            },
            context,
        ))
    }

    fn open_secondary(
        &self,
        adapter: &AdapterInfo,
        device: &Dx11Device,
    ) -> Result<ID3D11Device1, DriverError> {
        device::open_secondary(adapter, device.debug_layer)
    }

    fn device_status(&self, device: &Dx11Device) -> Result<(), DriverError> {
        device::device_status(&device.device)
    }

    fn flush(&self, context: &ID3D11DeviceContext) {
        unsafe { context.Flush() };
    }

    fn destroy_secondary(&self, secondary: ID3D11Device1) {
        drop(secondary);
    }

    fn destroy_context(&self, context: ID3D11DeviceContext) {
        // Unbind everything so no pipeline reference outlives the device.
        unsafe {
            context.ClearState();
            context.Flush();
        }
        drop(context);
    }

    fn destroy_device(&self, device: Dx11Device) {
        debug!("Releasing D3D11 device");
        drop(device);
    }

    fn create_shared_texture(
        &self,
        device: &Dx11Device,
        context: &ID3D11DeviceContext,
        desc: &SharedResourceDescriptor,
    ) -> Result<Dx11Texture, DriverError> {
        interop::create_shared_texture(&device.device, context, desc)
    }

    fn export_handle(
        &self,
        texture: &Dx11Texture,
        desc: &SharedResourceDescriptor,
    ) -> Result<SharedHandle, DriverError> {
        interop::export_handle(texture, desc.sharing)
    }

    fn open_view(
        &self,
        secondary: &ID3D11Device1,
        handle: SharedHandle,
    ) -> Result<Dx11View, DriverError> {
        interop::open_view(secondary, handle)
    }

    fn view_info(&self, view: &Dx11View) -> Result<SurfaceInfo, DriverError> {
        interop::surface_info(view.texture())
    }

    fn keyed_mutex(
        &self,
        texture: &Dx11Texture,
        view: &Dx11View,
    ) -> Result<Dx11KeyedMutex, DriverError> {
        Dx11KeyedMutex::new(texture, view)
    }

    fn close_view(&self, view: Dx11View) {
        drop(view);
    }

    fn destroy_texture(&self, texture: Dx11Texture) {
        drop(texture);
    }

    fn close_handle(&self, handle: SharedHandle) {
        if let Err(e) = interop::close_handle(handle) {
            warn!("Closing {handle:?}: {e}");
        }
    }
}
