//! Creation of shared resources with all-or-nothing rollback.

use texshare_backend::InteropDriver;
use texshare_core::{ResourceCreationError, SharedResourceDescriptor, SyncGate, ViewOpenError};
use tracing::{debug, warn};

use crate::device::DeviceContext;
use crate::resource::SharedResource;

/// Builds [`SharedResource`]s on one [`DeviceContext`].
pub struct ResourceBridge<'a, D: InteropDriver> {
    device: &'a DeviceContext<D>,
}

impl<'a, D: InteropDriver> ResourceBridge<'a, D> {
    pub fn new(device: &'a DeviceContext<D>) -> Self {
        Self { device }
    }

    /// Allocate a primary texture, export its shared handle, open it on the
    /// secondary API and set up the keyed mutex.
    ///
    /// Any failure undoes the steps before it, so an `Err` leaves nothing
    /// allocated in the driver.
    pub fn create_shared(
        &self,
        descriptor: &SharedResourceDescriptor,
    ) -> Result<SharedResource<D>, ResourceCreationError> {
        descriptor.validate()?;
        let driver = self.device.driver();

        let texture = driver
            .create_shared_texture(self.device.device(), self.device.context(), descriptor)
            .map_err(ResourceCreationError::Allocation)?;

        let handle = match driver.export_handle(&texture, descriptor) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Handle export failed, destroying texture: {e}");
                driver.destroy_texture(texture);
                return Err(ResourceCreationError::HandleExport(e));
            }
        };
        debug!("Exported {handle:?} for {}x{} {}", descriptor.width, descriptor.height, descriptor.format);

        let view = match driver.open_view(self.device.secondary(), handle) {
            Ok(view) => view,
            Err(e) => {
                warn!("Opening {handle:?} on the secondary API failed: {e}");
                driver.destroy_texture(texture);
                driver.close_handle(handle);
                return Err(ViewOpenError::Import(e).into());
            }
        };

        let expected = descriptor.surface_info();
        let checked = driver
            .view_info(&view)
            .map_err(ViewOpenError::Import)
            .and_then(|actual| {
                if actual == expected {
                    Ok(())
                } else {
                    Err(ViewOpenError::Mismatch { expected, actual })
                }
            });
        if let Err(e) = checked {
            warn!("Rolling back {handle:?}: {e}");
            driver.close_view(view);
            driver.destroy_texture(texture);
            driver.close_handle(handle);
            return Err(e.into());
        }

        let mutex = match driver.keyed_mutex(&texture, &view) {
            Ok(mutex) => mutex,
            Err(e) => {
                warn!("Keyed mutex setup for {handle:?} failed: {e}");
                driver.close_view(view);
                driver.destroy_texture(texture);
                driver.close_handle(handle);
                return Err(ResourceCreationError::SyncSetup(e));
            }
        };

        debug!("Shared resource {handle:?} ready");
        Ok(SharedResource::new(
            self.device.driver_arc(),
            descriptor.clone(),
            handle,
            SyncGate::new(mutex),
            view,
            texture,
        ))
    }

    /// Release `resource`: driver mutex, secondary view, primary texture,
    /// then the shared handle.
    pub fn release(&self, resource: SharedResource<D>) {
        drop(resource);
    }
}
