//! Pixel formats understood by the bridge.

use std::fmt;

/// Texel format of a shared surface.
///
/// Only a subset can cross an API boundary: depth and block-compressed
/// formats are listed so descriptors coming from the application can be
/// rejected with a precise error instead of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgb10A2Unorm,
    Rgba16Float,
    Rgba32Float,
    R8Unorm,
    R32Float,
    Depth24Stencil8,
    Depth32Float,
    Bc1Unorm,
    Bc3Unorm,
}

impl PixelFormat {
    /// Bytes per texel. Block-compressed formats report the average over a
    /// 4x4 block rounded up, which is only used for size estimates.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R8Unorm => 1,
            PixelFormat::Rgba8Unorm
            | PixelFormat::Rgba8UnormSrgb
            | PixelFormat::Bgra8Unorm
            | PixelFormat::Bgra8UnormSrgb
            | PixelFormat::Rgb10A2Unorm
            | PixelFormat::R32Float
            | PixelFormat::Depth24Stencil8
            | PixelFormat::Depth32Float => 4,
            PixelFormat::Rgba16Float => 8,
            PixelFormat::Rgba32Float => 16,
            PixelFormat::Bc1Unorm | PixelFormat::Bc3Unorm => 1,
        }
    }

    /// Whether a surface of this format can be exported through a shared
    /// handle and imported by the secondary API.
    pub fn is_shareable(self) -> bool {
        !self.is_depth() && !self.is_compressed()
    }

    pub fn is_depth(self) -> bool {
        matches!(self, PixelFormat::Depth24Stencil8 | PixelFormat::Depth32Float)
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Bc1Unorm | PixelFormat::Bc3Unorm)
    }

    pub fn is_srgb(self) -> bool {
        matches!(self, PixelFormat::Rgba8UnormSrgb | PixelFormat::Bgra8UnormSrgb)
    }

    /// Whether the format may be bound as an unordered-access (storage)
    /// target. sRGB views cannot be written through UAVs.
    pub fn supports_storage(self) -> bool {
        self.is_shareable() && !self.is_srgb()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
