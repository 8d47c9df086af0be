//! Prism engine crate.
//!
//! Two-pass HDR rendering: a geometry subpass into an offscreen HDR target,
//! then a composite subpass onto the window surface, behind a backend seam
//! with a wgpu implementation and a headless one for tests.

pub mod assets;
pub mod gfx;
pub mod logging;
pub mod render;
pub mod scene;
pub mod time;
pub mod window;
