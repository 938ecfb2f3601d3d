//! Core backend abstraction traits
//!
//! These traits define the drawing interface the canvas engine consumes.
//! The production implementation lives in `wgpu_backend`; alternative
//! backends (including test doubles) implement the same trait.

use crate::backend::types::*;
use crate::bitmap::BitmapData;
use glam::Vec2;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create render target: {0}")]
    TargetCreationFailed(String),
    #[error("Failed to create brush: {0}")]
    BrushCreationFailed(String),
    #[error("Failed to create bitmap: {0}")]
    BitmapCreationFailed(String),
    #[error("Failed to create offscreen target: {0}")]
    OffscreenCreationFailed(String),
    #[error("Failed to create effect: {0}")]
    EffectCreationFailed(String),
    #[error("Effects are not supported by this target")]
    EffectsUnsupported,
    #[error("Failed to acquire frame: {0}")]
    AcquireFailed(String),
    #[error("Render target must be recreated")]
    RecreateTarget,
    #[error("Draw submission failed: {0}")]
    DrawFailed(String),
    #[error("A frame is already being recorded")]
    FrameInProgress,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a solid-color brush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrushHandle(pub(crate) u64);

/// Handle to an uploaded bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitmapHandle(pub(crate) u64);

/// Handle to an offscreen render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffscreenHandle(pub(crate) u64);

/// Handle to a constructed effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectHandle(pub(crate) u64);

macro_rules! impl_raw_handle {
    ($($handle:ident),*) => {
        $(impl $handle {
            /// Wrap a raw id. Intended for backend implementations outside
            /// this crate; ids are only meaningful to the backend that
            /// minted them.
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(&self) -> u64 {
                self.0
            }
        })*
    };
}

impl_raw_handle!(BrushHandle, BitmapHandle, OffscreenHandle, EffectHandle);

/// Main canvas backend trait
///
/// Resource handles are opaque ids minted by the backend. All recording
/// happens between `begin_draw` and `end_draw`; an offscreen session opened
/// with `begin_offscreen_draw` redirects `clear`/`fill_rect` until its
/// matching `end_offscreen_draw`. The backend guarantees that everything
/// recorded into an offscreen session executes before any primary-target
/// command that samples that offscreen bitmap in the same frame.
pub trait CanvasBackend {
    /// Reconfigure the primary render target for a new client size.
    fn resize(&mut self, width: u32, height: u32);

    /// Get the actual target size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Bind the primary render target to the window at the given size.
    ///
    /// Called once at startup and again after device loss. Unconditionally
    /// re-establishes the target even if the size is unchanged.
    fn recreate_target(&mut self, width: u32, height: u32) -> BackendResult<()>;

    // Resource creation

    /// Create a solid-color brush
    fn create_solid_brush(&mut self, color: Color) -> BackendResult<BrushHandle>;

    /// Upload a bitmap
    fn create_bitmap(&mut self, data: &BitmapData) -> BackendResult<BitmapHandle>;

    /// Create an offscreen render target compatible with the primary target
    fn create_offscreen_target(
        &mut self,
        desc: &OffscreenDescriptor,
    ) -> BackendResult<OffscreenHandle>;

    /// Construct an effect with the given offscreen bitmap as its input.
    ///
    /// Fails with [`BackendError::EffectsUnsupported`] when the target does
    /// not expose the extended drawing interface effects require.
    fn create_effect(
        &mut self,
        desc: &EffectDescriptor,
        input: OffscreenHandle,
    ) -> BackendResult<EffectHandle>;

    // Frame recording

    /// Begin recording a frame on the primary target
    fn begin_draw(&mut self) -> BackendResult<()>;

    /// Clear the active target
    fn clear(&mut self, color: Color);

    /// Fill a rectangle on the active target
    fn fill_rect(&mut self, rect: RectF, brush: BrushHandle);

    /// Draw a bitmap into the primary target
    fn draw_bitmap(
        &mut self,
        bitmap: BitmapHandle,
        source: RectF,
        dest: RectF,
        opacity: f32,
        interpolation: BitmapInterpolation,
    );

    /// Open a nested recording session on an offscreen target
    fn begin_offscreen_draw(&mut self, target: OffscreenHandle);

    /// Close the active offscreen session
    fn end_offscreen_draw(&mut self) -> BackendResult<()>;

    /// Draw an offscreen target's bitmap into the primary target
    fn draw_offscreen(
        &mut self,
        target: OffscreenHandle,
        source: RectF,
        dest: RectF,
        opacity: f32,
        interpolation: BitmapInterpolation,
    );

    /// Composite an effect's output into the primary target at an offset
    fn draw_effect(
        &mut self,
        effect: EffectHandle,
        offset: Vec2,
        composite: CompositeMode,
        interpolation: BitmapInterpolation,
    );

    /// Finish recording, submit and present.
    ///
    /// The returned status is the device-loss signal: a
    /// [`BackendError::RecreateTarget`] means the target and everything
    /// created from it must be recreated before the next frame.
    fn end_draw(&mut self) -> BackendResult<()>;

    // Resource release
    //
    // Release is synchronous: when a destroy call returns, the handle is
    // dead and the backend no longer references the resource. Destroying an
    // unknown or already-destroyed handle is a no-op.

    /// Destroy a brush
    fn destroy_brush(&mut self, brush: BrushHandle);

    /// Destroy a bitmap
    fn destroy_bitmap(&mut self, bitmap: BitmapHandle);

    /// Destroy an offscreen target
    fn destroy_offscreen_target(&mut self, target: OffscreenHandle);

    /// Destroy an effect
    fn destroy_effect(&mut self, effect: EffectHandle);
}
