//! Primary device, immediate context and secondary device, owned together.
//!
//! A [`DeviceContext`] only exists once all three are up, and dropping it
//! (or calling [`DeviceContext::shutdown`]) tears them down in a fixed
//! order: secondary device, context, device.

use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use texshare_backend::{AdapterInfo, AdapterKind, InteropDriver};
use texshare_core::{AdapterPreference, DeviceCreationError, DriverError, InteropConfig};
use tracing::{debug, error, warn};

use crate::bridge::ResourceBridge;

/// Owning handle over the devices a session shares resources between.
pub struct DeviceContext<D: InteropDriver> {
    driver: Arc<D>,
    adapter: AdapterInfo,
    secondary: ManuallyDrop<D::SecondaryDevice>,
    context: ManuallyDrop<D::Context>,
    device: ManuallyDrop<D::Device>,
}

/// Adapters allowed by `config`, in the order device creation tries them.
fn candidate_adapters<'a>(adapters: &'a [AdapterInfo], config: &InteropConfig) -> Vec<&'a AdapterInfo> {
    let allowed = |kind: AdapterKind| match config.adapter {
        AdapterPreference::HardwareThenSoftware => true,
        AdapterPreference::HardwareOnly => kind == AdapterKind::Hardware,
        AdapterPreference::SoftwareOnly => kind == AdapterKind::Software,
    };

    let mut candidates: Vec<&AdapterInfo> = adapters
        .iter()
        .filter(|a| allowed(a.kind))
        .filter(|a| config.adapter_index.map_or(true, |index| a.index == index))
        .collect();
    // Stable: hardware keeps its enumeration order ahead of software.
    candidates.sort_by_key(|a| a.kind == AdapterKind::Software);
    candidates
}

impl<D: InteropDriver> DeviceContext<D> {
    /// Create the primary device and context on the best adapter `config`
    /// allows, then open the secondary API on the same adapter.
    ///
    /// Hardware adapters are tried first; if every one of them refuses and
    /// the preference allows it, the software rasterizer is used instead.
    /// On error nothing created along the way is left alive.
    pub fn initialize(driver: Arc<D>, config: &InteropConfig) -> Result<Self, DeviceCreationError> {
        let adapters = driver
            .enumerate_adapters()
            .map_err(DeviceCreationError::Enumeration)?;
        let candidates = candidate_adapters(&adapters, config);
        debug!(
            "{} driver: {} adapters, {} candidates",
            driver.name(),
            adapters.len(),
            candidates.len()
        );

        let mut last_error: Option<DriverError> = None;
        for adapter in candidates {
            if adapter.kind == AdapterKind::Software && last_error.is_some() {
                warn!("Hardware device creation failed, falling back to {}", adapter.name);
            }

            let (device, context) = match driver.create_device(adapter, config) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Device creation on {} failed: {e}", adapter.name);
                    last_error = Some(e);
                    continue;
                }
            };

            let secondary = match driver.open_secondary(adapter, &device) {
                Ok(secondary) => secondary,
                Err(e) => {
                    error!("Secondary device unavailable on {}: {e}", adapter.name);
                    driver.destroy_context(context);
                    driver.destroy_device(device);
                    return Err(DeviceCreationError::SecondaryUnavailable(e));
                }
            };

            debug!("Device context ready on {} ({:?})", adapter.name, adapter.kind);
            return Ok(Self {
                driver,
                adapter: adapter.clone(),
                secondary: ManuallyDrop::new(secondary),
                context: ManuallyDrop::new(context),
                device: ManuallyDrop::new(device),
            });
        }

        match last_error {
            Some(e) => {
                error!("Every candidate adapter refused device creation");
                Err(DeviceCreationError::DriverRefused(e))
            }
            None => {
                error!("No compatible GPU adapter (preference {:?})", config.adapter);
                Err(DeviceCreationError::NoCompatibleAdapter)
            }
        }
    }

    /// Whether the device is still usable. Reflects device removal (TDR,
    /// driver reset) reported after initialization.
    pub fn is_valid(&self) -> bool {
        match self.driver.device_status(&self.device) {
            Ok(()) => true,
            Err(e) => {
                warn!("Device lost: {e}");
                false
            }
        }
    }

    /// Submit pending commands on the immediate context.
    pub fn flush(&self) {
        self.driver.flush(&self.context);
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn device(&self) -> &D::Device {
        &self.device
    }

    pub fn context(&self) -> &D::Context {
        &self.context
    }

    pub fn secondary(&self) -> &D::SecondaryDevice {
        &self.secondary
    }

    /// Shared-resource factory bound to this device.
    pub fn bridge(&self) -> ResourceBridge<'_, D> {
        ResourceBridge::new(self)
    }

    pub(crate) fn driver_arc(&self) -> Arc<D> {
        Arc::clone(&self.driver)
    }

    /// Tear down the secondary device, the context and the device.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl<D: InteropDriver> Drop for DeviceContext<D> {
    fn drop(&mut self) {
        // SAFETY: each field is taken exactly once, here, and never touched again.
        let (secondary, context, device) = unsafe {
            (
                ManuallyDrop::take(&mut self.secondary),
                ManuallyDrop::take(&mut self.context),
                ManuallyDrop::take(&mut self.device),
            )
        };
        self.driver.destroy_secondary(secondary);
        self.driver.destroy_context(context);
        self.driver.destroy_device(device);
        debug!("Device context on {} shut down", self.adapter.name);
    }
}

impl<D: InteropDriver> fmt::Debug for DeviceContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("driver", &self.driver.name())
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(index: usize, kind: AdapterKind) -> AdapterInfo {
        AdapterInfo {
            index,
            name: format!("adapter {index}"),
            kind,
            dedicated_video_memory: 0,
        }
    }

    fn indices(candidates: Vec<&AdapterInfo>) -> Vec<usize> {
        candidates.into_iter().map(|a| a.index).collect()
    }

    #[test]
    fn hardware_is_tried_before_software() {
        let adapters = [
            adapter(0, AdapterKind::Software),
            adapter(1, AdapterKind::Hardware),
            adapter(2, AdapterKind::Hardware),
        ];
        let config = InteropConfig::default();
        assert_eq!(indices(candidate_adapters(&adapters, &config)), vec![1, 2, 0]);
    }

    #[test]
    fn preference_and_index_narrow_the_candidates() {
        let adapters = [
            adapter(0, AdapterKind::Hardware),
            adapter(1, AdapterKind::Hardware),
            adapter(2, AdapterKind::Software),
        ];

        let hw_only = InteropConfig::default().with_adapter(AdapterPreference::HardwareOnly);
        assert_eq!(indices(candidate_adapters(&adapters, &hw_only)), vec![0, 1]);

        let sw_only = InteropConfig::default().with_adapter(AdapterPreference::SoftwareOnly);
        assert_eq!(indices(candidate_adapters(&adapters, &sw_only)), vec![2]);

        let pinned = InteropConfig {
            adapter_index: Some(1),
            ..InteropConfig::default()
        };
        assert_eq!(indices(candidate_adapters(&adapters, &pinned)), vec![1]);

        let pinned_wrong_kind = InteropConfig {
            adapter_index: Some(1),
            ..sw_only
        };
        assert!(candidate_adapters(&adapters, &pinned_wrong_kind).is_empty());
    }
}
