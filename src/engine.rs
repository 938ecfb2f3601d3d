//! Render-target lifecycle and frame orchestration

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::scene::CanvasScene;
use crate::{CanvasConfig, RecoveryPolicy};
use std::sync::Arc;
use winit::window::Window as WinitWindow;

/// Rendering capability exposed to a host loop.
///
/// Implemented independently of windowing and input handling; the host owns
/// the window, forwards resizes and invokes [`render_frame`] once per tick
/// with the current client size.
///
/// [`render_frame`]: FrameRenderer::render_frame
pub trait FrameRenderer {
    /// (Re)create the render target and every resource derived from it
    fn create_resources(&mut self) -> BackendResult<()>;

    /// Record, submit and present one frame
    fn render_frame(&mut self, width: u32, height: u32) -> BackendResult<()>;

    /// Reconfigure the render target for a new client size
    fn resize(&mut self, width: u32, height: u32);

    /// Release all device-dependent resources
    fn shutdown(&mut self);
}

/// Device-dependent resource set.
///
/// All members are created from the same render target and become invalid
/// together when the device is lost, so they are created and released as an
/// atomic unit. The generation identifies one such creation.
pub struct SurfaceResources {
    pub(crate) generation: u64,
    pub(crate) brushes: Vec<BrushHandle>,
    pub(crate) bitmaps: Vec<BitmapHandle>,
    pub(crate) offscreen: Option<OffscreenHandle>,
    pub(crate) effect: Option<EffectHandle>,
}

impl SurfaceResources {
    fn empty(generation: u64) -> Self {
        Self {
            generation,
            brushes: Vec::new(),
            bitmaps: Vec::new(),
            offscreen: None,
            effect: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn brushes(&self) -> &[BrushHandle] {
        &self.brushes
    }

    pub fn bitmaps(&self) -> &[BitmapHandle] {
        &self.bitmaps
    }

    pub fn offscreen(&self) -> Option<OffscreenHandle> {
        self.offscreen
    }

    pub fn effect(&self) -> Option<EffectHandle> {
        self.effect
    }
}

/// Frame recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Idle,
    Recording,
}

/// Owns the render target and all target-dependent resources, drives one
/// frame's drawing sequence per tick, and recovers from device loss by
/// recreating the whole resource set inline.
pub struct CanvasEngine<B: CanvasBackend> {
    backend: B,
    scene: CanvasScene,
    recovery: RecoveryPolicy,
    resources: Option<SurfaceResources>,
    generation: u64,
    phase: FramePhase,
    width: u32,
    height: u32,
}

impl CanvasEngine<WgpuBackend> {
    /// Create an engine rendering to the given window.
    ///
    /// Backend acquisition failure (no adapter, no device) is fatal and
    /// propagates; everything created from the render target afterwards is
    /// recoverable through [`create_resources`](Self::create_resources).
    pub fn new(
        window: Arc<WinitWindow>,
        scene: CanvasScene,
        config: &CanvasConfig,
    ) -> BackendResult<Self> {
        let backend = WgpuBackend::new(Arc::clone(&window), config.vsync)?;
        let size = window.inner_size();
        Self::from_backend(
            backend,
            scene,
            config.recovery,
            size.width.max(1),
            size.height.max(1),
        )
    }

    /// Async variant of [`new`](Self::new)
    pub async fn new_async(
        window: Arc<WinitWindow>,
        scene: CanvasScene,
        config: &CanvasConfig,
    ) -> BackendResult<Self> {
        let backend = WgpuBackend::new_async(Arc::clone(&window), config.vsync).await?;
        let size = window.inner_size();
        Self::from_backend(
            backend,
            scene,
            config.recovery,
            size.width.max(1),
            size.height.max(1),
        )
    }
}

impl<B: CanvasBackend> CanvasEngine<B> {
    /// Create an engine from an already initialized backend
    pub fn from_backend(
        backend: B,
        scene: CanvasScene,
        recovery: RecoveryPolicy,
        width: u32,
        height: u32,
    ) -> BackendResult<Self> {
        let mut engine = Self {
            backend,
            scene,
            recovery,
            resources: None,
            generation: 0,
            phase: FramePhase::Idle,
            width: width.max(1),
            height: height.max(1),
        };
        engine.create_resources()?;
        Ok(engine)
    }

    /// (Re)create the render target and the full resource set.
    ///
    /// Idempotent: any previously held resources are released first, then
    /// the target, brushes, bitmaps, offscreen target and effect are created
    /// in dependency order. On success the set is internally consistent and
    /// carries a new generation; on failure everything created so far is
    /// released again and the error propagates.
    pub fn create_resources(&mut self) -> BackendResult<()> {
        self.release_resources();

        self.backend.recreate_target(self.width, self.height)?;
        let (width, height) = self.backend.surface_size();
        self.width = width;
        self.height = height;

        let generation = self.generation + 1;
        let mut set = SurfaceResources::empty(generation);
        match Self::populate(&mut self.backend, &self.scene, &mut set) {
            Ok(()) => {
                log::debug!(
                    "created device resources: generation {}, {} brushes, {} bitmaps",
                    generation,
                    set.brushes.len(),
                    set.bitmaps.len()
                );
                self.generation = generation;
                self.resources = Some(set);
                Ok(())
            }
            Err(err) => {
                Self::release_set(&mut self.backend, set);
                Err(err)
            }
        }
    }

    fn populate(
        backend: &mut B,
        scene: &CanvasScene,
        set: &mut SurfaceResources,
    ) -> BackendResult<()> {
        for &color in &scene.brushes {
            set.brushes.push(backend.create_solid_brush(color)?);
        }

        for layer in &scene.bitmaps {
            set.bitmaps.push(backend.create_bitmap(&layer.data)?);
        }

        if let Some(layer) = &scene.offscreen {
            let target = backend.create_offscreen_target(&OffscreenDescriptor {
                label: Some("offscreen buffer".into()),
                width: layer.width,
                height: layer.height,
            })?;
            set.offscreen = Some(target);

            if let Some(effect) = &scene.effect {
                set.effect = Some(backend.create_effect(&effect.desc, target)?);
            }
        } else if scene.effect.is_some() {
            log::warn!("scene has an effect layer but no offscreen layer to feed it; effect skipped");
        }

        Ok(())
    }

    fn release_set(backend: &mut B, set: SurfaceResources) {
        // Reverse acquisition order; each destroy is synchronous.
        if let Some(effect) = set.effect {
            backend.destroy_effect(effect);
        }
        if let Some(target) = set.offscreen {
            backend.destroy_offscreen_target(target);
        }
        for bitmap in set.bitmaps.into_iter().rev() {
            backend.destroy_bitmap(bitmap);
        }
        for brush in set.brushes.into_iter().rev() {
            backend.destroy_brush(brush);
        }
    }

    /// Release the current resource set, if any. Safe to call repeatedly.
    pub fn release_resources(&mut self) {
        if let Some(set) = self.resources.take() {
            Self::release_set(&mut self.backend, set);
        }
    }

    /// Record, submit and present one frame.
    ///
    /// `width`/`height` is the current client size reported by the host;
    /// a size change reconfigures the target before recording. An end-draw
    /// (or acquire) failure matching the engine's [`RecoveryPolicy`]
    /// triggers a full resource recreation inline before returning, so the
    /// next call proceeds against a fresh target. Failures outside the
    /// policy propagate to the caller.
    pub fn render_frame(&mut self, width: u32, height: u32) -> BackendResult<()> {
        if self.phase == FramePhase::Recording {
            return Err(BackendError::FrameInProgress);
        }

        if width != self.width || height != self.height {
            self.resize(width, height);
        }

        // Resources are rebuilt lazily after a shutdown.
        if self.resources.is_none() {
            self.create_resources()?;
        }

        self.phase = FramePhase::Recording;
        let result = self.record_frame();
        self.phase = FramePhase::Idle;

        match result {
            Ok(()) => Ok(()),
            Err(err) if self.recovery.should_recreate(&err) => {
                log::warn!("{err}; recreating render target resources");
                self.create_resources()
            }
            Err(err) => Err(err),
        }
    }

    fn record_frame(&mut self) -> BackendResult<()> {
        let Self {
            backend,
            scene,
            resources,
            ..
        } = self;

        backend.begin_draw()?;
        backend.clear(scene.background);

        if let Some(res) = resources.as_ref() {
            for fill in &scene.fills {
                if let Some(&brush) = res.brushes.get(fill.brush) {
                    backend.fill_rect(fill.rect, brush);
                }
            }

            for (layer, &bitmap) in scene.bitmaps.iter().zip(&res.bitmaps) {
                backend.draw_bitmap(
                    bitmap,
                    layer.source,
                    layer.dest,
                    layer.opacity,
                    layer.interpolation,
                );
            }

            if let (Some(layer), Some(target)) = (scene.offscreen.as_ref(), res.offscreen) {
                // The nested session must fully complete before its bitmap
                // is consumed below.
                backend.begin_offscreen_draw(target);
                backend.clear(layer.clear);
                for fill in &layer.fills {
                    if let Some(&brush) = res.brushes.get(fill.brush) {
                        backend.fill_rect(fill.rect, brush);
                    }
                }
                backend.end_offscreen_draw()?;

                backend.draw_offscreen(
                    target,
                    layer.source,
                    layer.dest,
                    layer.opacity,
                    layer.interpolation,
                );
            }

            if let (Some(layer), Some(effect)) = (scene.effect.as_ref(), res.effect) {
                backend.draw_effect(effect, layer.offset, layer.composite, layer.interpolation);
            }
        }

        backend.end_draw()
    }

    /// Reconfigure the render target for a new client size
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.backend.resize(width, height);

            // The backend may clamp to device limits.
            let (actual_width, actual_height) = self.backend.surface_size();
            self.width = actual_width;
            self.height = actual_height;
        }
    }

    /// Release all device-dependent resources.
    ///
    /// Safe after zero, partial or full creation and safe to call twice;
    /// absent resources are skipped. The backend itself is released when
    /// the engine is dropped.
    pub fn shutdown(&mut self) {
        self.release_resources();
        log::debug!("canvas engine shut down");
    }

    /// Get current dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Generation of the current resource set; increments on every
    /// (re)creation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The current device-dependent resource set, if one exists
    pub fn device_resources(&self) -> Option<&SurfaceResources> {
        self.resources.as_ref()
    }

    /// Get reference to the scene
    pub fn scene(&self) -> &CanvasScene {
        &self.scene
    }

    /// Get mutable reference to the scene.
    ///
    /// Scene changes take effect next frame; resource-backed entries
    /// (brushes, bitmaps, offscreen, effect) require a
    /// [`create_resources`](Self::create_resources) call to pick up.
    pub fn scene_mut(&mut self) -> &mut CanvasScene {
        &mut self.scene
    }

    /// Get reference to the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get mutable reference to the backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: CanvasBackend> FrameRenderer for CanvasEngine<B> {
    fn create_resources(&mut self) -> BackendResult<()> {
        CanvasEngine::create_resources(self)
    }

    fn render_frame(&mut self, width: u32, height: u32) -> BackendResult<()> {
        CanvasEngine::render_frame(self, width, height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        CanvasEngine::resize(self, width, height)
    }

    fn shutdown(&mut self) {
        CanvasEngine::shutdown(self)
    }
}

impl<B: CanvasBackend> Drop for CanvasEngine<B> {
    fn drop(&mut self) {
        self.release_resources();
    }
}
