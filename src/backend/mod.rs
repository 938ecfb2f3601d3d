//! Backend abstraction layer
//!
//! Provides the common trait and types the canvas engine draws through,
//! plus the wgpu production backend.

pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;
