//! Canvas Engine - a 2D canvas engine with device-loss recovery
//!
//! The engine owns a window-backed render target and everything created
//! from it (solid-color brushes, bitmaps, an offscreen render target, an
//! image effect). Those resources share the target's lifetime: when the
//! device reports loss they all become invalid at once, and the engine
//! recreates them as an atomic unit before the next frame.
//!
//! # Features
//! - Declarative per-frame content ([`CanvasScene`]): background, rectangle
//!   fills, bitmap layers, an offscreen composite, an image effect
//! - Atomic render-target recreation with a configurable recovery policy
//! - Backend abstraction ([`backend::CanvasBackend`]) with a wgpu
//!   implementation; deterministic, synchronous resource release
//! - winit host loop composing any [`FrameRenderer`] with a window

pub mod backend;
pub mod bitmap;
pub mod engine;
pub mod scene;
pub mod window;

pub use backend::wgpu_backend::WgpuBackend;
pub use backend::{BackendError, BackendResult};
pub use engine::{CanvasEngine, FrameRenderer, SurfaceResources};
pub use scene::CanvasScene;
pub use window::Window;

use backend::BackendError as Error;

/// Which draw-time failures trigger a full resource recreation.
///
/// The underlying graphics APIs disagree on how device loss surfaces: some
/// report one dedicated status, others raise assorted failures once the
/// device is gone. Both interpretations exist in the wild, so the predicate
/// is a policy rather than hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Recreate only on the dedicated recreate-target status; surface
    /// everything else to the caller.
    #[default]
    Strict,
    /// Recreate on any failure raised between begin-draw and end-draw.
    Lenient,
}

impl RecoveryPolicy {
    /// Whether a frame failure should be answered with resource recreation
    pub fn should_recreate(&self, error: &Error) -> bool {
        match self {
            RecoveryPolicy::Strict => matches!(error, Error::RecreateTarget),
            RecoveryPolicy::Lenient => true,
        }
    }
}

/// Configuration for a canvas engine and its host window
#[derive(Debug, Clone)]
pub struct CanvasConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Recovery predicate applied to frame failures
    pub recovery: RecoveryPolicy,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            title: "Canvas Engine".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            recovery: RecoveryPolicy::Strict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_recreates_only_on_recreate_target() {
        let policy = RecoveryPolicy::Strict;
        assert!(policy.should_recreate(&Error::RecreateTarget));
        assert!(!policy.should_recreate(&Error::DrawFailed("submit failed".into())));
        assert!(!policy.should_recreate(&Error::OutOfMemory));
    }

    #[test]
    fn lenient_recreates_on_any_failure() {
        let policy = RecoveryPolicy::Lenient;
        assert!(policy.should_recreate(&Error::RecreateTarget));
        assert!(policy.should_recreate(&Error::DrawFailed("submit failed".into())));
    }

    #[test]
    fn default_policy_is_strict() {
        assert_eq!(RecoveryPolicy::default(), RecoveryPolicy::Strict);
        assert_eq!(CanvasConfig::default().recovery, RecoveryPolicy::Strict);
    }
}
