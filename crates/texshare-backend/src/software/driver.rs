//! [`SoftwareDriver`]: an in-process driver for headless machines and tests.
//!
//! Surfaces live in CPU memory; the primary texture and the secondary view
//! of a pair point at the same block, so writes through one are visible
//! through the other. The driver counts every live object, records an event
//! log of recent driver calls, and can be told to fail specific calls once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use texshare_core::{
    DriverError, InteropConfig, SharedResourceDescriptor, SharingMode, SurfaceInfo,
};
use tracing::{debug, warn};

use super::surface::{SoftwareKeyedMutex, SoftwareTexture, SoftwareView, Surface};
use crate::driver::{AdapterInfo, AdapterKind, InteropDriver, SharedHandle};

/// Events kept by [`SoftwareDriver::events`]. Older events are dropped.
pub const EVENT_LOG_CAPACITY: usize = 4096;

/// Driver call that can be made to fail once with [`SoftwareDriver::inject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    CreateDevice,
    OpenSecondary,
    CreateTexture,
    ExportHandle,
    OpenView,
    /// `open_view` succeeds but reports a surface of a different size.
    ViewMismatch,
    KeyedMutex,
    /// The next driver keyed-mutex acquire times out.
    AcquireTimeout,
}

/// Live objects per kind. Equal snapshots before and after a create/release
/// cycle mean nothing leaked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounters {
    pub devices: usize,
    pub contexts: usize,
    pub secondaries: usize,
    pub textures: usize,
    pub views: usize,
    pub handles: usize,
    pub bytes: usize,
}

/// One driver call, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    DeviceCreated { device: u64, adapter: usize },
    ContextCreated { context: u64 },
    SecondaryOpened { secondary: u64 },
    Flushed { context: u64 },
    TextureCreated { texture: u64, memory: u64 },
    /// Initial data was copied in through the immediate context.
    InitialDataUploaded { context: u64, memory: u64 },
    HandleExported { handle: u64, memory: u64 },
    ViewOpened { view: u64, memory: u64 },
    KeyAcquired { memory: u64, side: texshare_core::Side, key: u64 },
    KeyReleased { memory: u64, side: texshare_core::Side, key: u64 },
    ViewClosed { view: u64 },
    TextureDestroyed { texture: u64 },
    /// A texture was destroyed while views over it were still open.
    DestroyedWhileInUse { texture: u64 },
    HandleClosed { handle: u64 },
    SecondaryDestroyed { secondary: u64 },
    ContextDestroyed { context: u64 },
    DeviceDestroyed { device: u64 },
}

pub(crate) struct State {
    adapters: Vec<AdapterInfo>,
    refuse_hardware: bool,
    faults: Vec<Fault>,
    next_id: u64,
    counters: ResourceCounters,
    events: VecDeque<DriverEvent>,
    /// Exported handles still open, by raw value.
    handles: HashMap<u64, (Arc<Surface>, SharingMode)>,
    /// Open views per memory block.
    views_per_memory: HashMap<u64, usize>,
    devices_removed: bool,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn record(&mut self, event: DriverEvent) {
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub(crate) fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(i) => {
                self.faults.remove(i);
                true
            }
            None => false,
        }
    }
}

pub struct SoftwareDevice {
    id: u64,
}

impl SoftwareDevice {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct SoftwareContext {
    id: u64,
}

impl SoftwareContext {
    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct SoftwareSecondary {
    id: u64,
}

/// In-process driver with a hardware-like and a software adapter.
///
/// Cloning shares the underlying state, so a test can keep a handle to
/// inspect counters and events while a session owns the driver.
#[derive(Clone)]
pub struct SoftwareDriver {
    state: Arc<Mutex<State>>,
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDriver {
    /// A driver exposing one hardware adapter followed by a software
    /// rasterizer.
    pub fn new() -> Self {
        Self::with_adapters(vec![
            AdapterInfo {
                index: 0,
                name: "texshare headless GPU".to_string(),
                kind: AdapterKind::Hardware,
                dedicated_video_memory: 256 << 20,
            },
            AdapterInfo {
                index: 1,
                name: "texshare software rasterizer".to_string(),
                kind: AdapterKind::Software,
                dedicated_video_memory: 0,
            },
        ])
    }

    pub fn with_adapters(adapters: Vec<AdapterInfo>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                adapters,
                refuse_hardware: false,
                faults: Vec::new(),
                next_id: 0,
                counters: ResourceCounters::default(),
                events: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
                handles: HashMap::new(),
                views_per_memory: HashMap::new(),
                devices_removed: false,
            })),
        }
    }

    /// Make device creation fail on every hardware adapter.
    pub fn refuse_hardware(self) -> Self {
        self.state.lock().refuse_hardware = true;
        self
    }

    /// Fail the next call matching `fault`.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    /// Simulate a device-removed event (TDR) on every live device.
    pub fn remove_devices(&self) {
        self.state.lock().devices_removed = true;
    }

    pub fn counters(&self) -> ResourceCounters {
        self.state.lock().counters
    }

    /// The last [`EVENT_LOG_CAPACITY`] driver calls, oldest first.
    pub fn events(&self) -> Vec<DriverEvent> {
        self.state.lock().events.iter().copied().collect()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    fn fail(&self, fault: Fault, call: &'static str) -> Result<(), DriverError> {
        if self.state.lock().take_fault(fault) {
            return Err(DriverError::new(call, "injected failure"));
        }
        Ok(())
    }
}

impl InteropDriver for SoftwareDriver {
    type Device = SoftwareDevice;
    type Context = SoftwareContext;
    type SecondaryDevice = SoftwareSecondary;
    type Texture = SoftwareTexture;
    type View = SoftwareView;
    type KeyedMutex = SoftwareKeyedMutex;

    fn name(&self) -> &'static str {
        "software"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, DriverError> {
        Ok(self.state.lock().adapters.clone())
    }

    fn create_device(
        &self,
        adapter: &AdapterInfo,
        config: &InteropConfig,
    ) -> Result<(SoftwareDevice, SoftwareContext), DriverError> {
        self.fail(Fault::CreateDevice, "CreateDevice")?;
        let mut state = self.state.lock();
        if state.refuse_hardware && adapter.kind == AdapterKind::Hardware {
            return Err(DriverError::new(
                "CreateDevice",
                format!("adapter {} refused device creation", adapter.name),
            ));
        }

        let device = state.next_id();
        let context = state.next_id();
        state.counters.devices += 1;
        state.counters.contexts += 1;
        state.record(DriverEvent::DeviceCreated {
            device,
            adapter: adapter.index,
        });
        state.record(DriverEvent::ContextCreated { context });
        debug!(
            "Software device {device} created on {} (debug layer: {})",
            adapter.name, config.debug_layer
        );

        Ok((SoftwareDevice { id: device }, SoftwareContext { id: context }))
    }

    fn open_secondary(
        &self,
        _adapter: &AdapterInfo,
        _device: &SoftwareDevice,
    ) -> Result<SoftwareSecondary, DriverError> {
        self.fail(Fault::OpenSecondary, "OpenSecondary")?;
        let mut state = self.state.lock();
        let secondary = state.next_id();
        state.counters.secondaries += 1;
        state.record(DriverEvent::SecondaryOpened { secondary });
        Ok(SoftwareSecondary { id: secondary })
    }

    fn device_status(&self, _device: &SoftwareDevice) -> Result<(), DriverError> {
        if self.state.lock().devices_removed {
            return Err(DriverError::new("GetDeviceRemovedReason", "device removed"));
        }
        Ok(())
    }

    fn flush(&self, context: &SoftwareContext) {
        self.state
            .lock()
            .record(DriverEvent::Flushed { context: context.id });
    }

    fn destroy_secondary(&self, secondary: SoftwareSecondary) {
        let mut state = self.state.lock();
        state.counters.secondaries -= 1;
        state.record(DriverEvent::SecondaryDestroyed {
            secondary: secondary.id,
        });
    }

    fn destroy_context(&self, context: SoftwareContext) {
        let mut state = self.state.lock();
        state.counters.contexts -= 1;
        state.record(DriverEvent::ContextDestroyed {
            context: context.id,
        });
    }

    fn destroy_device(&self, device: SoftwareDevice) {
        let mut state = self.state.lock();
        state.counters.devices -= 1;
        state.record(DriverEvent::DeviceDestroyed { device: device.id });
    }

    fn create_shared_texture(
        &self,
        _device: &SoftwareDevice,
        context: &SoftwareContext,
        desc: &SharedResourceDescriptor,
    ) -> Result<SoftwareTexture, DriverError> {
        self.fail(Fault::CreateTexture, "CreateTexture2D")?;

        let size = desc.level0_size();
        let pixels = match &desc.initial_data {
            Some(data) => data.to_vec(),
            None => vec![0; size],
        };

        let mut state = self.state.lock();
        let id = state.next_id();
        let memory = state.next_id();
        let surface = Surface::new(memory, desc.surface_info(), desc.row_pitch(), pixels);
        state.counters.textures += 1;
        state.counters.bytes += surface.size();
        state.record(DriverEvent::TextureCreated {
            texture: id,
            memory,
        });
        if desc.initial_data.is_some() {
            state.record(DriverEvent::InitialDataUploaded {
                context: context.id,
                memory,
            });
        }

        Ok(SoftwareTexture {
            id,
            surface: Arc::new(surface),
        })
    }

    fn export_handle(
        &self,
        texture: &SoftwareTexture,
        desc: &SharedResourceDescriptor,
    ) -> Result<SharedHandle, DriverError> {
        self.fail(Fault::ExportHandle, "CreateSharedHandle")?;
        let mut state = self.state.lock();
        let handle = state.next_id();
        state
            .handles
            .insert(handle, (Arc::clone(&texture.surface), desc.sharing));
        state.counters.handles += 1;
        state.record(DriverEvent::HandleExported {
            handle,
            memory: texture.surface.memory,
        });
        Ok(SharedHandle::from_raw(handle))
    }

    fn open_view(
        &self,
        _secondary: &SoftwareSecondary,
        handle: SharedHandle,
    ) -> Result<SoftwareView, DriverError> {
        self.fail(Fault::OpenView, "OpenSharedResource1")?;
        let mismatch = self.state.lock().take_fault(Fault::ViewMismatch);

        let mut state = self.state.lock();
        let (surface, sharing) = state
            .handles
            .get(&handle.raw())
            .map(|(surface, sharing)| (Arc::clone(surface), *sharing))
            .ok_or_else(|| {
                DriverError::new("OpenSharedResource1", format!("unknown handle {handle:?}"))
            })?;

        let mut info = surface.info;
        if mismatch {
            info = SurfaceInfo {
                width: (info.width / 2).max(1),
                ..info
            };
        }

        let id = state.next_id();
        state.counters.views += 1;
        *state.views_per_memory.entry(surface.memory).or_insert(0) += 1;
        state.record(DriverEvent::ViewOpened {
            view: id,
            memory: surface.memory,
        });

        Ok(SoftwareView {
            id,
            surface,
            info,
            read_only: sharing == SharingMode::ReadOnly,
        })
    }

    fn view_info(&self, view: &SoftwareView) -> Result<SurfaceInfo, DriverError> {
        Ok(view.info)
    }

    fn keyed_mutex(
        &self,
        texture: &SoftwareTexture,
        _view: &SoftwareView,
    ) -> Result<SoftwareKeyedMutex, DriverError> {
        self.fail(Fault::KeyedMutex, "QueryInterface(IDXGIKeyedMutex)")?;
        Ok(SoftwareKeyedMutex {
            surface: Arc::clone(&texture.surface),
            state: Arc::clone(&self.state),
        })
    }

    fn close_view(&self, view: SoftwareView) {
        let mut state = self.state.lock();
        state.counters.views -= 1;
        if let Some(open) = state.views_per_memory.get_mut(&view.surface.memory) {
            *open -= 1;
            if *open == 0 {
                state.views_per_memory.remove(&view.surface.memory);
            }
        }
        state.record(DriverEvent::ViewClosed { view: view.id });
    }

    fn destroy_texture(&self, texture: SoftwareTexture) {
        let mut state = self.state.lock();
        if state.views_per_memory.contains_key(&texture.surface.memory) {
            warn!("Texture {} destroyed while still in use", texture.id);
            state.record(DriverEvent::DestroyedWhileInUse {
                texture: texture.id,
            });
        }
        state.counters.textures -= 1;
        state.counters.bytes -= texture.surface.size();
        state.record(DriverEvent::TextureDestroyed {
            texture: texture.id,
        });
    }

    fn close_handle(&self, handle: SharedHandle) {
        let mut state = self.state.lock();
        if state.handles.remove(&handle.raw()).is_some() {
            state.counters.handles -= 1;
            state.record(DriverEvent::HandleClosed {
                handle: handle.raw(),
            });
        } else {
            warn!("Closing unknown shared handle {handle:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texshare_core::{KeyedMutex, PixelFormat, Side};

    fn device(driver: &SoftwareDriver) -> (SoftwareDevice, SoftwareContext, SoftwareSecondary) {
        let adapter = driver.enumerate_adapters().unwrap().remove(0);
        let (device, context) = driver
            .create_device(&adapter, &InteropConfig::default())
            .unwrap();
        let secondary = driver.open_secondary(&adapter, &device).unwrap();
        (device, context, secondary)
    }

    #[test]
    fn texture_and_view_alias_the_same_memory() {
        let driver = SoftwareDriver::new();
        let (device, context, secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(2, 2, PixelFormat::Rgba8Unorm);

        let texture = driver.create_shared_texture(&device, &context, &desc).unwrap();
        let handle = driver.export_handle(&texture, &desc).unwrap();
        let view = driver.open_view(&secondary, handle).unwrap();

        assert_eq!(texture.memory_id(), view.memory_id());
        texture.write_pixels(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&view.read_pixels()[4..8], &[1, 2, 3, 4]);
        assert_eq!(driver.view_info(&view), Ok(desc.surface_info()));
    }

    #[test]
    fn read_only_handles_give_read_only_views() {
        let driver = SoftwareDriver::new();
        let (device, context, secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(2, 2, PixelFormat::Rgba8Unorm)
            .with_sharing(SharingMode::ReadOnly);

        let texture = driver.create_shared_texture(&device, &context, &desc).unwrap();
        let handle = driver.export_handle(&texture, &desc).unwrap();
        let view = driver.open_view(&secondary, handle).unwrap();

        assert!(view.is_read_only());
        assert!(view.write_pixels(0, &[0xFF]).is_err());
    }

    #[test]
    fn out_of_bounds_writes_are_rejected() {
        let driver = SoftwareDriver::new();
        let (device, context, _secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(1, 1, PixelFormat::R8Unorm);
        let texture = driver.create_shared_texture(&device, &context, &desc).unwrap();
        assert!(texture.write_pixels(0, &[1, 2]).is_err());
        assert!(texture.write_pixels(usize::MAX, &[1]).is_err());
    }

    #[test]
    fn closed_handles_cannot_be_opened() {
        let driver = SoftwareDriver::new();
        let (device, context, secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(4, 4, PixelFormat::Bgra8Unorm);
        let texture = driver.create_shared_texture(&device, &context, &desc).unwrap();
        let handle = driver.export_handle(&texture, &desc).unwrap();

        driver.close_handle(handle);
        assert!(driver.open_view(&secondary, handle).is_err());
        assert_eq!(driver.counters().handles, 0);
    }

    #[test]
    fn injected_faults_fire_once() {
        let driver = SoftwareDriver::new();
        let (device, context, _secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(4, 4, PixelFormat::Rgba8Unorm);

        driver.inject(Fault::CreateTexture);
        assert!(driver.create_shared_texture(&device, &context, &desc).is_err());
        assert!(driver.create_shared_texture(&device, &context, &desc).is_ok());
    }

    #[test]
    fn keyed_mutex_follows_release_keys() {
        let driver = SoftwareDriver::new();
        let (device, context, secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(4, 4, PixelFormat::Rgba8Unorm);
        let texture = driver.create_shared_texture(&device, &context, &desc).unwrap();
        let handle = driver.export_handle(&texture, &desc).unwrap();
        let view = driver.open_view(&secondary, handle).unwrap();
        let mutex = driver.keyed_mutex(&texture, &view).unwrap();

        let short = std::time::Duration::from_millis(5);
        mutex.acquire(Side::Primary, 0, short).unwrap();
        assert!(mutex.release(Side::Secondary, 1).is_err());
        mutex.release(Side::Primary, 1).unwrap();

        assert_eq!(
            mutex.acquire(Side::Secondary, 0, short),
            Err(texshare_core::KeyedMutexError::Timeout)
        );
        mutex.acquire(Side::Secondary, 1, short).unwrap();
    }

    #[test]
    fn destroying_a_texture_under_an_open_view_is_recorded() {
        let driver = SoftwareDriver::new();
        let (device, context, secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(4, 4, PixelFormat::Rgba8Unorm);
        let texture = driver.create_shared_texture(&device, &context, &desc).unwrap();
        let id = texture.id();
        let handle = driver.export_handle(&texture, &desc).unwrap();
        let _view = driver.open_view(&secondary, handle).unwrap();

        driver.destroy_texture(texture);
        assert!(driver
            .events()
            .contains(&DriverEvent::DestroyedWhileInUse { texture: id }));
    }

    #[test]
    fn initial_data_goes_through_the_given_context() {
        let driver = SoftwareDriver::new();
        let (device, context, _secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(1, 1, PixelFormat::Rgba8Unorm)
            .with_initial_data(vec![9, 8, 7, 6]);

        let texture = driver.create_shared_texture(&device, &context, &desc).unwrap();
        assert_eq!(texture.read_pixels(), vec![9, 8, 7, 6]);
        assert!(driver.events().contains(&DriverEvent::InitialDataUploaded {
            context: context.id(),
            memory: texture.memory_id(),
        }));
    }

    #[test]
    fn event_log_keeps_only_the_newest_events() {
        let driver = SoftwareDriver::new();
        let (device, context, secondary) = device(&driver);
        let desc = SharedResourceDescriptor::new(4, 4, PixelFormat::Rgba8Unorm);
        let texture = driver.create_shared_texture(&device, &context, &desc).unwrap();
        let handle = driver.export_handle(&texture, &desc).unwrap();
        let view = driver.open_view(&secondary, handle).unwrap();
        let mutex = driver.keyed_mutex(&texture, &view).unwrap();

        let short = std::time::Duration::from_millis(5);
        let cycles = EVENT_LOG_CAPACITY as u64;
        for key in 0..cycles {
            let side = if key % 2 == 0 { Side::Primary } else { Side::Secondary };
            mutex.acquire(side, key, short).unwrap();
            mutex.release(side, key + 1).unwrap();
        }

        let events = driver.events();
        assert_eq!(events.len(), EVENT_LOG_CAPACITY);
        assert!(!events
            .iter()
            .any(|e| matches!(e, DriverEvent::TextureCreated { .. })));
        assert_eq!(
            events.last(),
            Some(&DriverEvent::KeyReleased {
                memory: texture.memory_id(),
                side: Side::Secondary,
                key: cycles,
            })
        );
    }
}
