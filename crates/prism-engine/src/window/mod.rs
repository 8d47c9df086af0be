//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and Window, and drives a [`Viewer`](crate::render::Viewer)
//! on the wgpu backend from window events.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig};
