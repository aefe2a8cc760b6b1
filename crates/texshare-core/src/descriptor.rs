//! [`SharedResourceDescriptor`] and its validation.
//!
//! Validation is a pure function over the descriptor so callers can batch
//! check a whole frame's worth of requests before touching the driver.

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::DescriptorError;
use crate::format::PixelFormat;

/// Largest edge the bridge accepts (the D3D11 feature level 11.0 limit).
pub const MAX_DIMENSION: u32 = 16384;

bitflags! {
    /// How the shared surface is bound by the two APIs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UsageFlags: u32 {
        /// Sampled / read in shaders.
        const SHADER_READ = 1 << 0;
        /// Written through unordered-access (storage) views.
        const SHADER_WRITE = 1 << 1;
        /// Bound as a color render target.
        const RENDER_TARGET = 1 << 2;
        /// Source of copy operations.
        const COPY_SRC = 1 << 3;
        /// Destination of copy operations.
        const COPY_DST = 1 << 4;
    }
}

impl UsageFlags {
    /// Usages that read the surface.
    pub const READABLE: UsageFlags = UsageFlags::SHADER_READ.union(UsageFlags::COPY_SRC);
    /// Usages that write the surface.
    pub const WRITABLE: UsageFlags = UsageFlags::SHADER_WRITE
        .union(UsageFlags::RENDER_TARGET)
        .union(UsageFlags::COPY_DST);
}

/// Access the secondary API gets through the shared handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SharingMode {
    /// The secondary only reads what the primary produced.
    ReadOnly,
    #[default]
    ReadWrite,
}

/// Geometry and format of a surface as a driver reports it.
///
/// Used to check that the secondary view opened through a shared handle
/// matches the descriptor it was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_levels: u32,
}

/// Description of a resource to be shared between the two APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedResourceDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: UsageFlags,
    pub sharing: SharingMode,
    /// Mip chain length. `None` means a single level.
    pub mip_levels: Option<u32>,
    /// Tightly packed texels for mip level 0, uploaded at creation.
    pub initial_data: Option<Arc<[u8]>>,
}

impl SharedResourceDescriptor {
    /// A read-write, sampled + render-target surface with a single mip level.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            usage: UsageFlags::SHADER_READ | UsageFlags::RENDER_TARGET,
            sharing: SharingMode::ReadWrite,
            mip_levels: None,
            initial_data: None,
        }
    }

    pub fn with_usage(mut self, usage: UsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_sharing(mut self, sharing: SharingMode) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = Some(mip_levels);
        self
    }

    pub fn with_initial_data(mut self, data: impl Into<Arc<[u8]>>) -> Self {
        self.initial_data = Some(data.into());
        self
    }

    /// Effective mip chain length.
    pub fn mip_count(&self) -> u32 {
        self.mip_levels.unwrap_or(1)
    }

    /// Row pitch of mip level 0 in bytes.
    pub fn row_pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel() as usize
    }

    /// Size of mip level 0 in bytes.
    pub fn level0_size(&self) -> usize {
        self.row_pitch() * self.height as usize
    }

    /// The surface a driver is expected to produce for this descriptor.
    pub fn surface_info(&self) -> SurfaceInfo {
        SurfaceInfo {
            width: self.width,
            height: self.height,
            format: self.format,
            mip_levels: self.mip_count(),
        }
    }

    /// Check the descriptor without side effects.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(DescriptorError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }

        if !self.format.is_shareable() {
            return Err(DescriptorError::UnsupportedFormat(self.format));
        }

        if self.usage.is_empty() {
            return Err(DescriptorError::IncompatibleUsage("no usage flags set"));
        }
        if self.sharing == SharingMode::ReadOnly && !self.usage.intersects(UsageFlags::READABLE) {
            return Err(DescriptorError::IncompatibleUsage(
                "read-only share without a readable usage",
            ));
        }
        if self.usage.contains(UsageFlags::SHADER_WRITE) && !self.format.supports_storage() {
            return Err(DescriptorError::IncompatibleUsage(
                "format cannot be written through storage views",
            ));
        }

        let max_mips = max_mip_levels(self.width, self.height);
        let mips = self.mip_count();
        if mips == 0 || mips > max_mips {
            return Err(DescriptorError::InvalidMipLevels {
                requested: mips,
                max: max_mips,
            });
        }

        if let Some(data) = &self.initial_data {
            let expected = self.level0_size();
            if data.len() != expected {
                return Err(DescriptorError::InitialDataSize {
                    expected,
                    actual: data.len(),
                });
            }
        }

        Ok(())
    }
}

/// Validate a batch of descriptors, returning every failure with its index.
pub fn validate_all<'a, I>(descriptors: I) -> Vec<(usize, DescriptorError)>
where
    I: IntoIterator<Item = &'a SharedResourceDescriptor>,
{
    descriptors
        .into_iter()
        .enumerate()
        .filter_map(|(i, d)| d.validate().err().map(|e| (i, e)))
        .collect()
}

/// Length of the full mip chain for a `width` x `height` surface.
pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    let edge = width.max(height).max(1);
    u32::BITS - edge.leading_zeros()
}
