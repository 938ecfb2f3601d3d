//! Frame content description
//!
//! A [`CanvasScene`] is plain device-independent data: it survives render
//! target recreation untouched, and the engine rebuilds the device-side
//! resources (brushes, bitmaps, offscreen target, effect) from it.

use crate::backend::types::*;
use crate::bitmap::BitmapData;
use glam::Vec2;

/// A rectangle filled with a brush from the scene palette
#[derive(Debug, Clone, Copy)]
pub struct RectFill {
    pub rect: RectF,
    /// Index into [`CanvasScene::brushes`]
    pub brush: usize,
}

impl RectFill {
    pub fn new(rect: RectF, brush: usize) -> Self {
        Self { rect, brush }
    }
}

/// A decoded bitmap stretched into a destination rectangle
pub struct BitmapLayer {
    pub data: BitmapData,
    /// Source region in bitmap pixels
    pub source: RectF,
    /// Destination region in target pixels
    pub dest: RectF,
    pub opacity: f32,
    pub interpolation: BitmapInterpolation,
}

impl BitmapLayer {
    /// Layer drawing the whole bitmap into `dest`
    pub fn new(data: BitmapData, dest: RectF) -> Self {
        let source = RectF::new(0.0, 0.0, data.width as f32, data.height as f32);
        Self {
            data,
            source,
            dest,
            opacity: 1.0,
            interpolation: BitmapInterpolation::Linear,
        }
    }
}

/// Content rendered through the offscreen target each frame.
///
/// The fills are recorded into the offscreen target in a nested session,
/// then the offscreen bitmap is drawn into the primary target at `dest`.
pub struct OffscreenLayer {
    pub width: u32,
    pub height: u32,
    pub clear: Color,
    pub fills: Vec<RectFill>,
    /// Source region in offscreen pixels
    pub source: RectF,
    /// Destination region in target pixels
    pub dest: RectF,
    pub opacity: f32,
    pub interpolation: BitmapInterpolation,
}

impl OffscreenLayer {
    pub fn new(width: u32, height: u32, dest: RectF) -> Self {
        Self {
            width,
            height,
            clear: Color::TRANSPARENT,
            fills: Vec::new(),
            source: RectF::new(0.0, 0.0, width as f32, height as f32),
            dest,
            opacity: 1.0,
            interpolation: BitmapInterpolation::Linear,
        }
    }

    pub fn with_fill(mut self, rect: RectF, brush: usize) -> Self {
        self.fills.push(RectFill::new(rect, brush));
        self
    }
}

/// Effect output composited over the primary target.
///
/// The effect's input is the scene's offscreen bitmap; a scene with an
/// effect layer but no offscreen layer renders without the effect.
pub struct EffectLayer {
    pub desc: EffectDescriptor,
    /// Target-pixel offset of the effect output's top-left corner
    pub offset: Vec2,
    pub composite: CompositeMode,
    pub interpolation: BitmapInterpolation,
}

impl EffectLayer {
    pub fn new(desc: EffectDescriptor, offset: Vec2) -> Self {
        Self {
            desc,
            offset,
            composite: CompositeMode::SourceOver,
            interpolation: BitmapInterpolation::Nearest,
        }
    }

    pub fn with_composite(mut self, composite: CompositeMode) -> Self {
        self.composite = composite;
        self
    }
}

/// Everything drawn in one frame
pub struct CanvasScene {
    pub background: Color,
    /// Brush palette; fills reference entries by index
    pub brushes: Vec<Color>,
    pub fills: Vec<RectFill>,
    pub bitmaps: Vec<BitmapLayer>,
    pub offscreen: Option<OffscreenLayer>,
    pub effect: Option<EffectLayer>,
}

impl CanvasScene {
    pub fn new(background: Color) -> Self {
        Self {
            background,
            brushes: Vec::new(),
            fills: Vec::new(),
            bitmaps: Vec::new(),
            offscreen: None,
            effect: None,
        }
    }

    /// Add a brush color to the palette, returning its index
    pub fn add_brush(&mut self, color: Color) -> usize {
        let id = self.brushes.len();
        self.brushes.push(color);
        id
    }

    /// Add a rectangle fill using a palette brush
    pub fn add_fill(&mut self, rect: RectF, brush: usize) {
        self.fills.push(RectFill::new(rect, brush));
    }

    /// Add a bitmap layer
    pub fn add_bitmap(&mut self, layer: BitmapLayer) {
        self.bitmaps.push(layer);
    }
}

impl Default for CanvasScene {
    fn default() -> Self {
        Self::new(Color::gray(0.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brush_indices_are_sequential() {
        let mut scene = CanvasScene::default();
        assert_eq!(scene.add_brush(Color::RED), 0);
        assert_eq!(scene.add_brush(Color::GREEN), 1);
        assert_eq!(scene.brushes.len(), 2);
    }

    #[test]
    fn offscreen_layer_defaults_to_full_source() {
        let layer = OffscreenLayer::new(64, 64, RectF::new(80.0, 8.0, 64.0, 64.0));
        assert_eq!(layer.source, RectF::new(0.0, 0.0, 64.0, 64.0));
        assert_eq!(layer.clear, Color::TRANSPARENT);
    }

    #[test]
    fn bitmap_layer_covers_whole_bitmap() {
        let layer = BitmapLayer::new(
            crate::bitmap::BitmapData::checkerboard(32, [0; 4], [255; 4]),
            RectF::new(0.0, 0.0, 64.0, 64.0),
        );
        assert_eq!(layer.source, RectF::new(0.0, 0.0, 32.0, 32.0));
        assert_eq!(layer.opacity, 1.0);
    }
}
