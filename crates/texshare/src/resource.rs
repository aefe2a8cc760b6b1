//! A texture shared by both APIs, with the gate guarding it.

use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use texshare_backend::{InteropDriver, SharedHandle};
use texshare_core::{SharedResourceDescriptor, SyncGate};
use tracing::{debug, warn};

/// Primary texture, its secondary view and the shared handle between them.
///
/// Both halves reference the same GPU memory. The view is only handed out
/// borrowed from the resource, so it can never outlive the texture it
/// aliases. Dropping the resource releases the gate's driver mutex, the
/// view, the texture and finally the shared handle.
pub struct SharedResource<D: InteropDriver> {
    driver: Arc<D>,
    descriptor: SharedResourceDescriptor,
    handle: SharedHandle,
    gate: ManuallyDrop<SyncGate<D::KeyedMutex>>,
    view: ManuallyDrop<D::View>,
    texture: ManuallyDrop<D::Texture>,
}

impl<D: InteropDriver> SharedResource<D> {
    pub(crate) fn new(
        driver: Arc<D>,
        descriptor: SharedResourceDescriptor,
        handle: SharedHandle,
        gate: SyncGate<D::KeyedMutex>,
        view: D::View,
        texture: D::Texture,
    ) -> Self {
        Self {
            driver,
            descriptor,
            handle,
            gate: ManuallyDrop::new(gate),
            view: ManuallyDrop::new(view),
            texture: ManuallyDrop::new(texture),
        }
    }

    /// The texture as the primary API sees it.
    pub fn primary(&self) -> &D::Texture {
        &self.texture
    }

    /// The same memory as the secondary API sees it.
    pub fn secondary(&self) -> &D::View {
        &self.view
    }

    pub fn handle(&self) -> SharedHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &SharedResourceDescriptor {
        &self.descriptor
    }

    pub fn gate(&self) -> &SyncGate<D::KeyedMutex> {
        &self.gate
    }
}

impl<D: InteropDriver> Drop for SharedResource<D> {
    fn drop(&mut self) {
        if let Some(holder) = self.gate.holder() {
            warn!("Releasing {:?} while the {holder} side holds it", self.handle);
        }
        // SAFETY: each field is taken exactly once, here, and never touched again.
        let (gate, view, texture) = unsafe {
            (
                ManuallyDrop::take(&mut self.gate),
                ManuallyDrop::take(&mut self.view),
                ManuallyDrop::take(&mut self.texture),
            )
        };
        drop(gate.into_driver_mutex());
        self.driver.close_view(view);
        self.driver.destroy_texture(texture);
        self.driver.close_handle(self.handle);
        debug!("Released shared resource {:?}", self.handle);
    }
}

impl<D: InteropDriver> fmt::Debug for SharedResource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResource")
            .field("handle", &self.handle)
            .field("descriptor", &self.descriptor)
            .field("gate", &*self.gate)
            .finish_non_exhaustive()
    }
}
