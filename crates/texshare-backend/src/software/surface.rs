//! CPU-backed shared surfaces and the keyed mutex emulation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use texshare_core::{DriverError, KeyedMutex, KeyedMutexError, Side, SurfaceInfo};

use super::driver::{DriverEvent, Fault, State};

/// Memory block both halves of a shared pair point at.
pub(crate) struct Surface {
    pub(crate) memory: u64,
    pub(crate) info: SurfaceInfo,
    pub(crate) row_pitch: usize,
    pixels: Mutex<Vec<u8>>,
    keyed: Mutex<KeyState>,
    keyed_changed: Condvar,
}

/// Driver-side keyed mutex: released with a key, acquirable only with it.
struct KeyState {
    key: u64,
    owner: Option<Side>,
}

impl Surface {
    pub(crate) fn new(memory: u64, info: SurfaceInfo, row_pitch: usize, pixels: Vec<u8>) -> Self {
        Self {
            memory,
            info,
            row_pitch,
            pixels: Mutex::new(pixels),
            keyed: Mutex::new(KeyState { key: 0, owner: None }),
            keyed_changed: Condvar::new(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.pixels.lock().len()
    }
}

fn read(surface: &Surface) -> Vec<u8> {
    surface.pixels.lock().clone()
}

fn write(surface: &Surface, offset: usize, data: &[u8]) -> Result<(), DriverError> {
    let mut pixels = surface.pixels.lock();
    let end = offset
        .checked_add(data.len())
        .filter(|&end| end <= pixels.len())
        .ok_or_else(|| {
            DriverError::new(
                "UpdateSubresource",
                format!(
                    "write of {} bytes at {offset} exceeds {} byte surface",
                    data.len(),
                    pixels.len()
                ),
            )
        })?;
    pixels[offset..end].copy_from_slice(data);
    Ok(())
}

/// Primary texture of the software driver. Owns its surface.
pub struct SoftwareTexture {
    pub(crate) id: u64,
    pub(crate) surface: Arc<Surface>,
}

impl SoftwareTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identifier of the memory block, shared with every view over it.
    pub fn memory_id(&self) -> u64 {
        self.surface.memory
    }

    pub fn info(&self) -> SurfaceInfo {
        self.surface.info
    }

    pub fn row_pitch(&self) -> usize {
        self.surface.row_pitch
    }

    /// Copy of mip level 0.
    pub fn read_pixels(&self) -> Vec<u8> {
        read(&self.surface)
    }

    pub fn write_pixels(&self, offset: usize, data: &[u8]) -> Result<(), DriverError> {
        write(&self.surface, offset, data)
    }
}

/// Secondary view of the software driver. Aliases a texture's surface.
pub struct SoftwareView {
    pub(crate) id: u64,
    pub(crate) surface: Arc<Surface>,
    pub(crate) info: SurfaceInfo,
    pub(crate) read_only: bool,
}

impl SoftwareView {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn memory_id(&self) -> u64 {
        self.surface.memory
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn read_pixels(&self) -> Vec<u8> {
        read(&self.surface)
    }

    /// Fails on views imported through a read-only handle.
    pub fn write_pixels(&self, offset: usize, data: &[u8]) -> Result<(), DriverError> {
        if self.read_only {
            return Err(DriverError::new(
                "UpdateSubresource",
                "view was imported with read-only access",
            ));
        }
        write(&self.surface, offset, data)
    }
}

/// Keyed mutex over a software surface, with DXGI semantics: acquire blocks
/// until the mutex is free and carries the requested key.
pub struct SoftwareKeyedMutex {
    pub(crate) surface: Arc<Surface>,
    pub(crate) state: Arc<Mutex<State>>,
}

impl KeyedMutex for SoftwareKeyedMutex {
    fn acquire(&self, side: Side, key: u64, timeout: Duration) -> Result<(), KeyedMutexError> {
        if self.state.lock().take_fault(Fault::AcquireTimeout) {
            return Err(KeyedMutexError::Timeout);
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut keyed = self.surface.keyed.lock();
        while keyed.owner.is_some() || keyed.key != key {
            match deadline {
                Some(d) => {
                    if self.surface.keyed_changed.wait_until(&mut keyed, d).timed_out() {
                        return Err(KeyedMutexError::Timeout);
                    }
                }
                None => self.surface.keyed_changed.wait(&mut keyed),
            }
        }
        keyed.owner = Some(side);
        drop(keyed);

        self.state.lock().record(DriverEvent::KeyAcquired {
            memory: self.surface.memory,
            side,
            key,
        });
        Ok(())
    }

    fn release(&self, side: Side, key: u64) -> Result<(), DriverError> {
        let mut keyed = self.surface.keyed.lock();
        if keyed.owner != Some(side) {
            return Err(DriverError::new(
                "ReleaseSync",
                format!("{side} side does not own the keyed mutex"),
            ));
        }
        keyed.owner = None;
        keyed.key = key;
        drop(keyed);
        self.surface.keyed_changed.notify_all();

        self.state.lock().record(DriverEvent::KeyReleased {
            memory: self.surface.memory,
            side,
            key,
        });
        Ok(())
    }
}
