//! Session tying a [`DeviceContext`] to a registry of named shared
//! resources.

use std::sync::Arc;
use std::time::Duration;

use texshare_backend::InteropDriver;
use texshare_core::{InteropConfig, SharedResourceDescriptor, Side};
use tracing::{debug, info, warn};

use crate::device::DeviceContext;
use crate::error::InteropError;
use crate::resource::SharedResource;

/// Owns the devices and every resource registered on them.
///
/// Resources are released in reverse registration order, then the device
/// context is torn down. [`InteropSession::shutdown`] and dropping the
/// session do the same thing.
pub struct InteropSession<D: InteropDriver> {
    // Declared before `device` so it is always emptied first.
    resources: Vec<(String, SharedResource<D>)>,
    device: DeviceContext<D>,
    acquire_timeout: Duration,
}

impl<D: InteropDriver> InteropSession<D> {
    pub fn initialize(driver: Arc<D>, config: &InteropConfig) -> Result<Self, InteropError> {
        let device = DeviceContext::initialize(driver, config)?;
        info!(
            "Interop session on {} ({} driver)",
            device.adapter().name,
            device.driver().name()
        );
        Ok(Self {
            resources: Vec::new(),
            device,
            acquire_timeout: config.acquire_timeout,
        })
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.resources.iter().position(|(name, _)| name == id)
    }

    /// Create a shared resource and store it under `id`.
    ///
    /// A duplicate `id` is rejected before anything is allocated.
    pub fn register_resource(
        &mut self,
        id: impl Into<String>,
        descriptor: &SharedResourceDescriptor,
    ) -> Result<&SharedResource<D>, InteropError> {
        let id = id.into();
        if self.position(&id).is_some() {
            return Err(InteropError::DuplicateResource(id));
        }

        let resource = self.device.bridge().create_shared(descriptor)?;
        debug!("Registered {id:?} as {:?}", resource.handle());
        self.resources.push((id, resource));
        let (_, resource) = &self.resources[self.resources.len() - 1];
        Ok(resource)
    }

    /// Release the resource registered as `id`.
    pub fn unregister_resource(&mut self, id: &str) -> Result<(), InteropError> {
        let index = self
            .position(id)
            .ok_or_else(|| InteropError::UnknownResource(id.to_string()))?;
        let (id, resource) = self.resources.remove(index);
        self.device.bridge().release(resource);
        debug!("Unregistered {id:?}");
        Ok(())
    }

    pub fn resource(&self, id: &str) -> Option<&SharedResource<D>> {
        self.position(id).map(|i| &self.resources[i].1)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Run `f` while `side` holds the resource registered as `id`.
    ///
    /// The gate is acquired with the key `side` is entitled to next and
    /// released with the following key on every exit path, including `f`
    /// failing or panicking. Uses the configured acquire timeout.
    pub fn with_resource<R>(
        &self,
        id: &str,
        side: Side,
        f: impl FnOnce(&SharedResource<D>) -> anyhow::Result<R>,
    ) -> Result<R, InteropError> {
        self.with_resource_timeout(id, side, self.acquire_timeout, f)
    }

    /// [`with_resource`](Self::with_resource) with an explicit timeout.
    pub fn with_resource_timeout<R>(
        &self,
        id: &str,
        side: Side,
        timeout: Duration,
        f: impl FnOnce(&SharedResource<D>) -> anyhow::Result<R>,
    ) -> Result<R, InteropError> {
        let resource = self
            .resource(id)
            .ok_or_else(|| InteropError::UnknownResource(id.to_string()))?;

        let gate = resource.gate();
        let guard = gate.lock_next(side, timeout)?;
        let key = guard.key();

        // A panic in `f` unwinds through `guard`, which releases with `key + 1`.
        let outcome = f(resource);
        let released = guard.release_with(key + 1);

        match outcome {
            Ok(value) => {
                released?;
                Ok(value)
            }
            Err(e) => {
                if let Err(release_error) = released {
                    warn!("Release after failed access to {id:?} also failed: {release_error}");
                }
                Err(InteropError::Access(e))
            }
        }
    }

    /// Submit pending primary commands.
    pub fn flush(&self) {
        self.device.flush();
    }

    pub fn device(&self) -> &DeviceContext<D> {
        &self.device
    }

    fn release_all(&mut self) {
        while let Some((id, resource)) = self.resources.pop() {
            self.device.bridge().release(resource);
            debug!("Released {id:?}");
        }
    }

    /// Release every resource, newest first, then tear down the devices.
    pub fn shutdown(mut self) {
        self.release_all();
        info!("Interop session shut down");
    }
}

impl<D: InteropDriver> Drop for InteropSession<D> {
    fn drop(&mut self) {
        self.release_all();
    }
}
