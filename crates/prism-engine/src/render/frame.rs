use crate::gfx::{Backend, BufferHandle, GfxResult, IndexType, PipelineHandle};

use super::graph::RenderGraph;
use super::registry::ResourceRegistry;
use super::resize::SurfaceExtent;
use super::uniforms::{FrameUniforms, UniformResources};

/// Frame loop states, in order. `PresentFrame` returns to `AcquireFrame`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameState {
    AcquireFrame,
    Pass0Draw,
    TransitionSubpass,
    Pass1Draw,
    PresentFrame,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameOutcome {
    Presented,
    /// No frame was available; nothing was recorded.
    Skipped,
}

/// Static geometry and pipelines drawn every frame.
#[derive(Debug, Copy, Clone)]
pub struct FrameDraws {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub geometry_pipeline: PipelineHandle,
    pub composite_pipeline: PipelineHandle,
}

/// Everything one frame reads.
pub struct FrameInputs<'a> {
    pub graph: &'a RenderGraph,
    pub uniforms: &'a UniformResources,
    pub draws: &'a FrameDraws,
    pub extent: SurfaceExtent,
    pub elapsed: f32,
}

/// Per-frame state machine: acquire, geometry subpass, transition, composite
/// subpass, present.
#[derive(Debug)]
pub struct FrameLoop {
    state: FrameState,
    presented: u64,
    skipped: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            state: FrameState::AcquireFrame,
            presented: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn enter(&mut self, next: FrameState) {
        log::trace!("frame: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs one loop iteration. An error leaves the loop back in
    /// `AcquireFrame`; a frame that was already acquired is abandoned on the
    /// backend, unsubmitted.
    pub fn run<B: Backend>(
        &mut self,
        registry: &mut ResourceRegistry<B>,
        inputs: &FrameInputs<'_>,
    ) -> GfxResult<FrameOutcome> {
        let result = self.step_all(registry, inputs);
        if let Err(e) = &result {
            if self.state != FrameState::AcquireFrame {
                log::warn!("frame: abandoned in {:?}: {e}", self.state);
                registry.backend_mut().abandon_frame();
            }
            self.state = FrameState::AcquireFrame;
        }
        result
    }

    fn step_all<B: Backend>(
        &mut self,
        registry: &mut ResourceRegistry<B>,
        inputs: &FrameInputs<'_>,
    ) -> GfxResult<FrameOutcome> {
        debug_assert_eq!(self.state, FrameState::AcquireFrame);

        // A stale composite set cannot be recorded, so fail before acquiring.
        let composite = inputs.uniforms.composite_set(registry, inputs.graph)?;

        if !registry.backend_mut().begin_frame()? {
            self.skipped += 1;
            log::trace!("frame: unavailable, retrying next iteration");
            return Ok(FrameOutcome::Skipped);
        }

        self.enter(FrameState::Pass0Draw);
        self.geometry_pass(registry, inputs)?;

        self.enter(FrameState::TransitionSubpass);
        registry.backend_mut().next_subpass()?;

        self.enter(FrameState::Pass1Draw);
        let b = registry.backend_mut();
        b.apply_pipeline(inputs.draws.composite_pipeline)?;
        b.bind_uniform(composite, 0)?;
        b.draw(3, 1, 0, 0)?;

        self.enter(FrameState::PresentFrame);
        let b = registry.backend_mut();
        b.end_render_pass()?;
        b.end_frame()?;

        self.enter(FrameState::AcquireFrame);
        self.presented += 1;
        Ok(FrameOutcome::Presented)
    }

    fn geometry_pass<B: Backend>(
        &mut self,
        registry: &mut ResourceRegistry<B>,
        inputs: &FrameInputs<'_>,
    ) -> GfxResult<()> {
        let region = inputs.extent.region();
        let draws = inputs.draws;
        let scene_set = inputs.uniforms.scene_set()?;

        registry
            .backend_mut()
            .begin_render_pass(inputs.graph.pass(), region)?;
        registry.backend_mut().apply_pipeline(draws.geometry_pipeline)?;

        let frame = FrameUniforms::at(inputs.elapsed, inputs.extent);
        inputs.uniforms.update(registry, &frame)?;

        let b = registry.backend_mut();
        b.bind_index_buffer(draws.index_buffer, 0, IndexType::U16)?;
        b.bind_vertex_buffer(draws.vertex_buffer, 0)?;
        b.bind_uniform(scene_set, 0)?;
        b.set_viewport(region)?;
        b.set_scissor(region)?;
        b.draw_indexed(draws.index_count, 1, 0)
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}
