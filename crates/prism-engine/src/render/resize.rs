use crate::gfx::{Backend, GfxResult, Region};

use super::graph::RenderGraph;
use super::registry::ResourceRegistry;
use super::uniforms::UniformResources;

/// Current drawable size in physical pixels.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SurfaceExtent {
    pub width: u32,
    pub height: u32,
}

impl SurfaceExtent {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height; 1.0 for an empty extent.
    pub fn aspect(self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    #[inline]
    pub fn region(self) -> Region {
        Region::full(self.width, self.height)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResizeOutcome {
    /// All four steps ran.
    Applied,
    /// Zero-area surface: only the surface was updated.
    Deferred,
    /// Nothing changed.
    Unchanged,
}

/// Runs the resize sequence for a surface-size change:
/// 1. resize the backend surface
/// 2. resize the render graph's attachments
/// 3. destroy the composite binding set
/// 4. create a new composite binding set on the resized HDR attachment
///
/// The backend is idled first, so nothing destroyed here can still be in use.
/// A zero-area `new` only runs step 1; the rest waits for a real size.
pub fn resize_surface<B: Backend>(
    registry: &mut ResourceRegistry<B>,
    graph: &mut RenderGraph,
    uniforms: &mut UniformResources,
    extent: &mut SurfaceExtent,
    new: SurfaceExtent,
) -> GfxResult<ResizeOutcome> {
    if new == *extent && graph.extent() == new && uniforms.is_composite_current(registry, graph) {
        return Ok(ResizeOutcome::Unchanged);
    }

    registry.backend_mut().wait_idle();
    registry.backend_mut().resize_surface(new.width, new.height);
    *extent = new;

    if new.is_empty() {
        log::debug!("resize: {}x{} deferred", new.width, new.height);
        return Ok(ResizeOutcome::Deferred);
    }

    graph.resize(registry, new)?;
    uniforms.rebuild_composite(registry, graph)?;

    log::debug!("resize: applied {}x{}", new.width, new.height);
    Ok(ResizeOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_of_startup_size() {
        assert_eq!(SurfaceExtent::new(800, 600).aspect(), 800.0 / 600.0);
    }

    #[test]
    fn empty_extent_has_unit_aspect() {
        let e = SurfaceExtent::new(0, 600);
        assert!(e.is_empty());
        assert_eq!(e.aspect(), 1.0);
    }
}
