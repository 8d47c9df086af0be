//! Two-pass HDR frame orchestration on top of [`Backend`](crate::gfx::Backend).
//!
//! - [`RenderGraph`]: one render pass, three attachments, two subpasses
//! - [`UniformResources`]: the aligned uniform buffer and both binding sets
//! - [`resize_surface`]: the four-step resize sequence
//! - [`FrameLoop`]: acquire, geometry, transition, composite, present
//! - [`ResourceRegistry`]: ownership and ordered teardown
//! - [`Viewer`]: all of the above wired together

mod frame;
mod graph;
mod registry;
mod resize;
mod uniforms;
mod viewer;

pub use frame::{FrameDraws, FrameInputs, FrameLoop, FrameOutcome, FrameState};
pub use graph::{
    RenderGraph, COMPOSITE_SUBPASS, DEPTH_ATTACHMENT, DEPTH_FORMAT, GEOMETRY_SUBPASS,
    HDR_ATTACHMENT, HDR_FORMAT, PRESENT_ATTACHMENT,
};
pub use registry::ResourceRegistry;
pub use resize::{resize_surface, ResizeOutcome, SurfaceExtent};
pub use uniforms::{
    align_to, FrameUniforms, TransformBlock, UniformRegions, UniformResources, ALBEDO_BINDING,
    HDR_BINDING, TIME_BINDING, TRANSFORM_BINDING,
};
pub use viewer::Viewer;
