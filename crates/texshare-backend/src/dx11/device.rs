//! D3D11 adapter enumeration and device creation.
//!
//! Hardware adapters come from DXGI enumeration; WARP is appended as the
//! software fallback for CI/headless machines. Devices are created at
//! feature level 11.0 with BGRA support so the same textures can be handed
//! to compositors that expect BGRA surfaces.

use windows::core::Interface;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::*;

use texshare_core::DriverError;
use tracing::{debug, warn};

use crate::driver::{AdapterInfo, AdapterKind};

const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 1] = [D3D_FEATURE_LEVEL_11_0];

/// Map a `windows` error into a [`DriverError`] naming the failed call.
pub(crate) fn driver_error(call: &'static str) -> impl FnOnce(windows::core::Error) -> DriverError {
    move |e| DriverError::new(call, format!("{} (0x{:08X})", e.message(), e.code().0))
}

fn adapter_name(desc: &DXGI_ADAPTER_DESC1) -> String {
    let len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    String::from_utf16_lossy(&desc.Description[..len])
}

/// Hardware adapters in DXGI order, followed by a WARP entry.
pub(crate) fn enumerate_adapters() -> Result<Vec<AdapterInfo>, DriverError> {
    let factory: IDXGIFactory1 =
        unsafe { CreateDXGIFactory1() }.map_err(driver_error("CreateDXGIFactory1"))?;

    let mut adapters = Vec::new();
    let mut dxgi_index = 0u32;
    while let Ok(adapter) = unsafe { factory.EnumAdapters1(dxgi_index) } {
        dxgi_index += 1;
        let desc = match unsafe { adapter.GetDesc1() } {
            Ok(desc) => desc,
            Err(e) => {
                warn!("Skipping adapter {}: {e}", dxgi_index - 1);
                continue;
            }
        };
        // The Basic Render Driver is WARP behind an adapter; it is added below.
        if desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0 {
            continue;
        }
        adapters.push(AdapterInfo {
            index: (dxgi_index - 1) as usize,
            name: adapter_name(&desc),
            kind: AdapterKind::Hardware,
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
        });
    }

    adapters.push(AdapterInfo {
        index: dxgi_index as usize,
        name: "WARP".to_string(),
        kind: AdapterKind::Software,
        dedicated_video_memory: 0,
    });
    Ok(adapters)
}

/// Create a device and immediate context on `adapter`.
///
/// Hardware adapters are looked up again by their DXGI index and created
/// with `D3D_DRIVER_TYPE_UNKNOWN`; the software entry uses
/// `D3D_DRIVER_TYPE_WARP`.
pub(crate) fn create_device(
    adapter: &AdapterInfo,
    debug_layer: bool,
) -> Result<(ID3D11Device, ID3D11DeviceContext), DriverError> {
    let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
    if debug_layer {
        flags |= D3D11_CREATE_DEVICE_DEBUG;
    }

    let mut device = None;
    let mut context = None;
    let mut level = D3D_FEATURE_LEVEL::default();

    match adapter.kind {
        AdapterKind::Hardware => {
            let factory: IDXGIFactory1 =
                unsafe { CreateDXGIFactory1() }.map_err(driver_error("CreateDXGIFactory1"))?;
            let dxgi_adapter = unsafe { factory.EnumAdapters1(adapter.index as u32) }
                .map_err(driver_error("EnumAdapters1"))?;
            unsafe {
                D3D11CreateDevice(
                    &dxgi_adapter,
                    D3D_DRIVER_TYPE_UNKNOWN,
                    HMODULE::default(),
                    flags,
                    Some(&FEATURE_LEVELS),
                    D3D11_SDK_VERSION,
                    Some(&mut device as *mut _),
                    Some(&mut level as *mut _),
                    Some(&mut context as *mut _),
                )
            }
            .map_err(driver_error("D3D11CreateDevice"))?;
        }
        AdapterKind::Software => {
            unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_WARP,
                    HMODULE::default(),
                    flags,
                    Some(&FEATURE_LEVELS),
                    D3D11_SDK_VERSION,
                    Some(&mut device as *mut _),
                    Some(&mut level as *mut _),
                    Some(&mut context as *mut _),
                )
            }
            .map_err(driver_error("D3D11CreateDevice"))?;
        }
    }

    let device = device.ok_or_else(|| DriverError::new("D3D11CreateDevice", "no device returned"))?;
    let context =
        context.ok_or_else(|| DriverError::new("D3D11CreateDevice", "no context returned"))?;
    debug!(
        "D3D11 device created on {} at feature level 0x{:X}",
        adapter.name, level.0
    );
    Ok((device, context))
}

/// Open the secondary D3D11.1 device on the same adapter as the primary,
/// used only to import shared handles.
pub(crate) fn open_secondary(
    adapter: &AdapterInfo,
    debug_layer: bool,
) -> Result<ID3D11Device1, DriverError> {
    let (device, context) = create_device(adapter, debug_layer)?;
    drop(context);
    device
        .cast::<ID3D11Device1>()
        .map_err(driver_error("QueryInterface(ID3D11Device1)"))
}

/// `Ok` unless the device was removed (TDR, driver upgrade, hot unplug).
pub(crate) fn device_status(device: &ID3D11Device) -> Result<(), DriverError> {
    unsafe { device.GetDeviceRemovedReason() }.map_err(driver_error("GetDeviceRemovedReason"))
}
