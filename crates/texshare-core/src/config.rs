//! Runtime knobs for device selection and synchronization.

use std::time::Duration;

use tracing::warn;

/// Default wait for a keyed acquire, roughly six frames at 60 Hz.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Which kind of adapter may host the primary device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterPreference {
    /// Try hardware adapters first, fall back to a software rasterizer
    /// (WARP) for CI/headless machines.
    #[default]
    HardwareThenSoftware,
    HardwareOnly,
    SoftwareOnly,
}

impl AdapterPreference {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::HardwareThenSoftware),
            "hardware" | "hw" => Some(Self::HardwareOnly),
            "software" | "sw" | "warp" => Some(Self::SoftwareOnly),
            _ => None,
        }
    }
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteropConfig {
    pub adapter: AdapterPreference,
    /// Pin a specific adapter by enumeration index.
    pub adapter_index: Option<usize>,
    /// Ask the driver for its validation/debug layer.
    pub debug_layer: bool,
    /// Timeout used by scoped acquisition when the caller gives none.
    pub acquire_timeout: Duration,
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterPreference::default(),
            adapter_index: None,
            debug_layer: false,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl InteropConfig {
    pub const ENV_ADAPTER: &'static str = "TEXSHARE_ADAPTER";
    pub const ENV_ADAPTER_INDEX: &'static str = "TEXSHARE_ADAPTER_INDEX";
    pub const ENV_DEBUG_LAYER: &'static str = "TEXSHARE_DEBUG_LAYER";
    pub const ENV_ACQUIRE_TIMEOUT_MS: &'static str = "TEXSHARE_ACQUIRE_TIMEOUT_MS";

    /// Defaults overridden by `TEXSHARE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `TEXSHARE_*`
    /// names. Unparsable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(Self::ENV_ADAPTER) {
            match AdapterPreference::parse(&value) {
                Some(adapter) => config.adapter = adapter,
                None => warn!("Ignoring {}={value:?}", Self::ENV_ADAPTER),
            }
        }

        if let Some(value) = lookup(Self::ENV_ADAPTER_INDEX) {
            match value.trim().parse::<usize>() {
                Ok(index) => config.adapter_index = Some(index),
                Err(_) => warn!("Ignoring {}={value:?}", Self::ENV_ADAPTER_INDEX),
            }
        }

        if let Some(value) = lookup(Self::ENV_DEBUG_LAYER) {
            match value.trim() {
                "1" | "true" | "on" => config.debug_layer = true,
                "0" | "false" | "off" => config.debug_layer = false,
                _ => warn!("Ignoring {}={value:?}", Self::ENV_DEBUG_LAYER),
            }
        }

        if let Some(value) = lookup(Self::ENV_ACQUIRE_TIMEOUT_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => config.acquire_timeout = Duration::from_millis(ms),
                Err(_) => warn!("Ignoring {}={value:?}", Self::ENV_ACQUIRE_TIMEOUT_MS),
            }
        }

        config
    }

    pub fn with_adapter(mut self, adapter: AdapterPreference) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(InteropConfig::from_lookup(|_| None), InteropConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = InteropConfig::from_lookup(lookup(&[
            ("TEXSHARE_ADAPTER", "warp"),
            ("TEXSHARE_ADAPTER_INDEX", "2"),
            ("TEXSHARE_DEBUG_LAYER", "true"),
            ("TEXSHARE_ACQUIRE_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(config.adapter, AdapterPreference::SoftwareOnly);
        assert_eq!(config.adapter_index, Some(2));
        assert!(config.debug_layer);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
    }

    #[test]
    fn garbage_values_keep_defaults() {
        let config = InteropConfig::from_lookup(lookup(&[
            ("TEXSHARE_ADAPTER", "quantum"),
            ("TEXSHARE_ADAPTER_INDEX", "-1"),
            ("TEXSHARE_DEBUG_LAYER", "maybe"),
            ("TEXSHARE_ACQUIRE_TIMEOUT_MS", "soon"),
        ]));
        assert_eq!(config, InteropConfig::default());
    }
}
