//! Common types shared between backends

use bytemuck::{Pod, Zeroable};

/// RGBA color with non-premultiplied straight alpha, components in [0, 1].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque gray of the given brightness.
    pub const fn gray(level: f32) -> Self {
        Self::new(level, level, level, 1.0)
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Axis-aligned rectangle in pixel coordinates, y growing downward.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Same-size rectangle moved by the given delta.
    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// Sampling mode used when a bitmap is stretched into a destination rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitmapInterpolation {
    Nearest,
    #[default]
    Linear,
}

/// How an image is combined with the content already in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeMode {
    /// Standard alpha blending of the image over the destination.
    #[default]
    SourceOver,
    /// Additive blending.
    Plus,
}

/// Offscreen render-target descriptor.
///
/// The target is created compatible with the primary render target (same
/// pixel format) so its bitmap can be drawn back without conversion.
#[derive(Debug, Clone)]
pub struct OffscreenDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl Default for OffscreenDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 64,
            height: 64,
        }
    }
}

/// Parameters of the highlight effect.
///
/// The effect tints its input bitmap toward `tint`; `strength` 0 leaves the
/// input untouched, 1 replaces covered pixels with the tint color.
#[derive(Debug, Clone, Copy)]
pub struct EffectDescriptor {
    pub tint: Color,
    pub strength: f32,
}

impl Default for EffectDescriptor {
    fn default() -> Self {
        Self {
            tint: Color::new(1.0, 1.0, 0.0, 1.0),
            strength: 0.5,
        }
    }
}
