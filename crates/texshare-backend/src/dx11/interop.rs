//! Shared D3D11 textures, NT handle export/import and `IDXGIKeyedMutex`.
//!
//! The primary texture is created with `SHARED_KEYEDMUTEX | SHARED_NTHANDLE`
//! so the secondary device can open it through `OpenSharedResource1` and
//! both halves carry the same driver keyed mutex.

use std::time::Duration;

use texshare_core::{
    DriverError, KeyedMutex, KeyedMutexError, PixelFormat, SharedResourceDescriptor, SharingMode,
    Side, SurfaceInfo, UsageFlags,
};
use tracing::{debug, trace};
use windows::core::{Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_ABANDONED, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use super::device::driver_error;
use crate::driver::SharedHandle;

/// Primary D3D11 texture. Owns the GPU memory.
pub struct Dx11Texture(pub(crate) ID3D11Texture2D);

impl Dx11Texture {
    pub fn texture(&self) -> &ID3D11Texture2D {
        &self.0
    }
}

/// The same memory opened on the secondary device.
pub struct Dx11View(pub(crate) ID3D11Texture2D);

impl Dx11View {
    pub fn texture(&self) -> &ID3D11Texture2D {
        &self.0
    }
}

pub(crate) fn to_dxgi(format: PixelFormat) -> Option<DXGI_FORMAT> {
    Some(match format {
        PixelFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        PixelFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::Bgra8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        PixelFormat::Rgb10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        PixelFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        PixelFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        PixelFormat::R8Unorm => DXGI_FORMAT_R8_UNORM,
        PixelFormat::R32Float => DXGI_FORMAT_R32_FLOAT,
        PixelFormat::Depth24Stencil8
        | PixelFormat::Depth32Float
        | PixelFormat::Bc1Unorm
        | PixelFormat::Bc3Unorm => return None,
    })
}

pub(crate) fn from_dxgi(format: DXGI_FORMAT) -> Option<PixelFormat> {
    Some(match format {
        DXGI_FORMAT_R8G8B8A8_UNORM => PixelFormat::Rgba8Unorm,
        DXGI_FORMAT_R8G8B8A8_UNORM_SRGB => PixelFormat::Rgba8UnormSrgb,
        DXGI_FORMAT_B8G8R8A8_UNORM => PixelFormat::Bgra8Unorm,
        DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => PixelFormat::Bgra8UnormSrgb,
        DXGI_FORMAT_R10G10B10A2_UNORM => PixelFormat::Rgb10A2Unorm,
        DXGI_FORMAT_R16G16B16A16_FLOAT => PixelFormat::Rgba16Float,
        DXGI_FORMAT_R32G32B32A32_FLOAT => PixelFormat::Rgba32Float,
        DXGI_FORMAT_R8_UNORM => PixelFormat::R8Unorm,
        DXGI_FORMAT_R32_FLOAT => PixelFormat::R32Float,
        _ => return None,
    })
}

fn bind_flags(usage: UsageFlags) -> u32 {
    // Shader-resource binding is required for the secondary to sample it.
    let mut flags = D3D11_BIND_SHADER_RESOURCE.0 as u32;
    if usage.contains(UsageFlags::SHADER_WRITE) {
        flags |= D3D11_BIND_UNORDERED_ACCESS.0 as u32;
    }
    if usage.contains(UsageFlags::RENDER_TARGET) {
        flags |= D3D11_BIND_RENDER_TARGET.0 as u32;
    }
    flags
}

/// Allocate the shared texture and upload the initial texels, if any.
pub(crate) fn create_shared_texture(
    device: &ID3D11Device,
    context: &ID3D11DeviceContext,
    desc: &SharedResourceDescriptor,
) -> Result<Dx11Texture, DriverError> {
    let format = to_dxgi(desc.format).ok_or_else(|| {
        DriverError::new("CreateTexture2D", format!("no DXGI format for {}", desc.format))
    })?;

    let misc = (D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0 | D3D11_RESOURCE_MISC_SHARED_NTHANDLE.0)
        as u32;

    let tex_desc = D3D11_TEXTURE2D_DESC {
        Width: desc.width,
        Height: desc.height,
        MipLevels: desc.mip_count(),
        ArraySize: 1,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: bind_flags(desc.usage),
        CPUAccessFlags: 0,
        MiscFlags: misc,
    };

    let mut texture = None;
    unsafe { device.CreateTexture2D(&tex_desc, None, Some(&mut texture as *mut _)) }
        .map_err(driver_error("CreateTexture2D"))?;
    let texture =
        texture.ok_or_else(|| DriverError::new("CreateTexture2D", "no texture returned"))?;

    if let Some(data) = &desc.initial_data {
        // A keyed-mutex texture must be acquired before the device touches it.
        let mutex: IDXGIKeyedMutex = texture
            .cast()
            .map_err(driver_error("QueryInterface(IDXGIKeyedMutex)"))?;
        acquire_sync(&mutex, 0, u32::MAX).map_err(|e| match e {
            KeyedMutexError::Timeout => DriverError::new("AcquireSync", "initial upload timed out"),
            KeyedMutexError::Driver(e) => e,
        })?;
        unsafe {
            context.UpdateSubresource(
                &texture,
                0,
                None,
                data.as_ptr().cast(),
                desc.row_pitch() as u32,
                0,
            );
        }
        unsafe { mutex.ReleaseSync(0) }.map_err(driver_error("ReleaseSync"))?;
        trace!("Uploaded {} initial bytes", data.len());
    }

    debug!(
        "Shared texture {}x{} {} ({} mips) created",
        desc.width,
        desc.height,
        desc.format,
        desc.mip_count()
    );
    Ok(Dx11Texture(texture))
}

/// Export an NT handle with the access rights of `sharing`.
pub(crate) fn export_handle(
    texture: &Dx11Texture,
    sharing: SharingMode,
) -> Result<SharedHandle, DriverError> {
    let resource: IDXGIResource1 = texture
        .0
        .cast()
        .map_err(driver_error("QueryInterface(IDXGIResource1)"))?;
    let mut access = DXGI_SHARED_RESOURCE_READ;
    if sharing == SharingMode::ReadWrite {
        access |= DXGI_SHARED_RESOURCE_WRITE;
    }
    let handle = unsafe { resource.CreateSharedHandle(None, access, PCWSTR::null()) }
        .map_err(driver_error("CreateSharedHandle"))?;
    Ok(SharedHandle::from_raw(handle.0 as usize as u64))
}

fn to_handle(handle: SharedHandle) -> HANDLE {
    HANDLE(handle.raw() as usize as *mut _)
}

pub(crate) fn open_view(
    secondary: &ID3D11Device1,
    handle: SharedHandle,
) -> Result<Dx11View, DriverError> {
    let texture = unsafe { secondary.OpenSharedResource1::<ID3D11Texture2D>(to_handle(handle)) }
        .map_err(driver_error("OpenSharedResource1"))?;
    Ok(Dx11View(texture))
}

pub(crate) fn surface_info(texture: &ID3D11Texture2D) -> Result<SurfaceInfo, DriverError> {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    let format = from_dxgi(desc.Format).ok_or_else(|| {
        DriverError::new("GetDesc", format!("unrecognized DXGI format {}", desc.Format.0))
    })?;
    Ok(SurfaceInfo {
        width: desc.Width,
        height: desc.Height,
        format,
        mip_levels: desc.MipLevels,
    })
}

pub(crate) fn close_handle(handle: SharedHandle) -> Result<(), DriverError> {
    unsafe { CloseHandle(to_handle(handle)) }.map_err(driver_error("CloseHandle"))
}

/// `AcquireSync` reports a timeout as the success code `WAIT_TIMEOUT`, which
/// the generated wrapper folds into `Ok`. Call through the vtable to see it.
fn acquire_sync(mutex: &IDXGIKeyedMutex, key: u64, millis: u32) -> Result<(), KeyedMutexError> {
    let hr = unsafe { (Interface::vtable(mutex).AcquireSync)(Interface::as_raw(mutex), key, millis) };
    if hr.0 == WAIT_TIMEOUT.0 as i32 {
        return Err(KeyedMutexError::Timeout);
    }
    if hr.0 == WAIT_ABANDONED.0 as i32 {
        return Err(KeyedMutexError::Driver(DriverError::new(
            "AcquireSync",
            "keyed mutex abandoned by a destroyed device",
        )));
    }
    hr.ok()
        .map_err(|e| KeyedMutexError::Driver(driver_error("AcquireSync")(e)))
}

/// `IDXGIKeyedMutex` on each half of a shared pair.
pub struct Dx11KeyedMutex {
    primary: IDXGIKeyedMutex,
    secondary: IDXGIKeyedMutex,
}

impl Dx11KeyedMutex {
    pub(crate) fn new(texture: &Dx11Texture, view: &Dx11View) -> Result<Self, DriverError> {
        let primary = texture
            .0
            .cast()
            .map_err(driver_error("QueryInterface(IDXGIKeyedMutex)"))?;
        let secondary = view
            .0
            .cast()
            .map_err(driver_error("QueryInterface(IDXGIKeyedMutex)"))?;
        Ok(Self { primary, secondary })
    }

    fn half(&self, side: Side) -> &IDXGIKeyedMutex {
        match side {
            Side::Primary => &self.primary,
            Side::Secondary => &self.secondary,
        }
    }
}

impl KeyedMutex for Dx11KeyedMutex {
    fn acquire(&self, side: Side, key: u64, timeout: Duration) -> Result<(), KeyedMutexError> {
        // INFINITE is u32::MAX; clamp just below so a huge timeout stays finite.
        let millis = timeout.as_millis().min(u32::MAX as u128 - 1) as u32;
        acquire_sync(self.half(side), key, millis)
    }

    fn release(&self, side: Side, key: u64) -> Result<(), DriverError> {
        unsafe { self.half(side).ReleaseSync(key) }.map_err(driver_error("ReleaseSync"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shareable_formats_map_both_ways() {
        let formats = [
            PixelFormat::Rgba8Unorm,
            PixelFormat::Rgba8UnormSrgb,
            PixelFormat::Bgra8Unorm,
            PixelFormat::Bgra8UnormSrgb,
            PixelFormat::Rgb10A2Unorm,
            PixelFormat::Rgba16Float,
            PixelFormat::Rgba32Float,
            PixelFormat::R8Unorm,
            PixelFormat::R32Float,
        ];
        for format in formats {
            let dxgi = to_dxgi(format).unwrap();
            assert_eq!(from_dxgi(dxgi), Some(format));
        }
        assert_eq!(to_dxgi(PixelFormat::Depth32Float), None);
        assert_eq!(to_dxgi(PixelFormat::Bc1Unorm), None);
    }

    #[test]
    fn shader_resource_binding_is_always_present() {
        let flags = bind_flags(UsageFlags::COPY_DST);
        assert_eq!(flags, D3D11_BIND_SHADER_RESOURCE.0 as u32);
        let flags = bind_flags(UsageFlags::SHADER_WRITE | UsageFlags::RENDER_TARGET);
        assert_ne!(flags & D3D11_BIND_UNORDERED_ACCESS.0 as u32, 0);
        assert_ne!(flags & D3D11_BIND_RENDER_TARGET.0 as u32, 0);
    }
}
