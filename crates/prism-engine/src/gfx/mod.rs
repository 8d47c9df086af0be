//! Graphics backend seam.
//!
//! Everything above this module talks to the GPU through [`Backend`]:
//! - resource creation/destruction keyed by typed handles
//! - render passes with explicit subpasses and dependencies
//! - per-frame command recording (acquire, passes, draws, present)
//!
//! Two implementations live here:
//! - [`wgpu_backend::WgpuBackend`] renders to a window surface
//! - [`headless::HeadlessBackend`] records calls and validates lifetimes

mod desc;
mod error;
mod handle;

pub mod headless;
pub mod wgpu_backend;

pub use desc::*;
pub use error::{GfxError, GfxResult};
pub use handle::{
    BufferHandle, ImageHandle, PipelineHandle, RenderPassHandle, SamplerHandle, ShaderHandle,
    UniformHandle, UniformLayoutHandle,
};

/// Operations the frame orchestration consumes from a graphics backend.
///
/// Per-frame methods are only valid between a successful [`begin_frame`] and
/// the matching [`end_frame`]; draw methods only inside a render pass.
///
/// [`begin_frame`]: Backend::begin_frame
/// [`end_frame`]: Backend::end_frame
pub trait Backend {
    /// Minimum offset alignment for uniform buffer bindings, in bytes.
    fn min_uniform_alignment(&self) -> u64;

    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferHandle>;
    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_image(&mut self, desc: &ImageDesc) -> GfxResult<ImageHandle>;
    fn update_image(&mut self, image: ImageHandle, pixels: &[u8]) -> GfxResult<()>;
    fn destroy_image(&mut self, image: ImageHandle);

    fn create_sampler(&mut self, desc: &SamplerDesc) -> GfxResult<SamplerHandle>;
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> GfxResult<ShaderHandle>;
    fn destroy_shader(&mut self, shader: ShaderHandle);

    fn create_uniform_layout(&mut self, desc: &UniformLayoutDesc)
        -> GfxResult<UniformLayoutHandle>;
    fn destroy_uniform_layout(&mut self, layout: UniformLayoutHandle);

    fn create_uniform(&mut self, desc: &UniformDesc) -> GfxResult<UniformHandle>;
    fn destroy_uniform(&mut self, uniform: UniformHandle);

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> GfxResult<RenderPassHandle>;
    /// Resizes every non-present attachment of `pass`. Attachments whose size
    /// changes get new images (and new handles); same-size calls are no-ops.
    fn resize_render_pass(&mut self, pass: RenderPassHandle, width: u32, height: u32)
        -> GfxResult<()>;
    /// Image currently backing `attachment`, or `None` for the present attachment.
    fn attachment_image(&self, pass: RenderPassHandle, attachment: usize) -> Option<ImageHandle>;
    fn destroy_render_pass(&mut self, pass: RenderPassHandle);

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GfxResult<PipelineHandle>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Tries to begin a frame. `Ok(false)` means no frame is available this
    /// iteration, which is not an error.
    fn begin_frame(&mut self) -> GfxResult<bool>;
    fn begin_render_pass(&mut self, pass: RenderPassHandle, region: Region) -> GfxResult<()>;
    fn apply_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()>;
    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) -> GfxResult<()>;
    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, ty: IndexType)
        -> GfxResult<()>;
    fn bind_uniform(&mut self, uniform: UniformHandle, slot: u32) -> GfxResult<()>;
    fn set_viewport(&mut self, region: Region) -> GfxResult<()>;
    fn set_scissor(&mut self, region: Region) -> GfxResult<()>;
    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GfxResult<()>;
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32)
        -> GfxResult<()>;
    fn next_subpass(&mut self) -> GfxResult<()>;
    fn end_render_pass(&mut self) -> GfxResult<()>;
    /// Submits the recorded work and presents.
    fn end_frame(&mut self) -> GfxResult<()>;
    /// Drops the open frame, and any open render pass, without submitting.
    /// No-op when no frame is open.
    fn abandon_frame(&mut self);

    fn resize_surface(&mut self, width: u32, height: u32);
    /// Blocks until the GPU has finished all submitted work.
    fn wait_idle(&mut self);
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn min_uniform_alignment(&self) -> u64 {
        (**self).min_uniform_alignment()
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        (**self).create_buffer(desc)
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        (**self).update_buffer(buffer, offset, data)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        (**self).destroy_buffer(buffer)
    }

    fn create_image(&mut self, desc: &ImageDesc) -> GfxResult<ImageHandle> {
        (**self).create_image(desc)
    }

    fn update_image(&mut self, image: ImageHandle, pixels: &[u8]) -> GfxResult<()> {
        (**self).update_image(image, pixels)
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        (**self).destroy_image(image)
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> GfxResult<SamplerHandle> {
        (**self).create_sampler(desc)
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        (**self).destroy_sampler(sampler)
    }

    fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> GfxResult<ShaderHandle> {
        (**self).create_shader(desc)
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        (**self).destroy_shader(shader)
    }

    fn create_uniform_layout(
        &mut self,
        desc: &UniformLayoutDesc,
    ) -> GfxResult<UniformLayoutHandle> {
        (**self).create_uniform_layout(desc)
    }

    fn destroy_uniform_layout(&mut self, layout: UniformLayoutHandle) {
        (**self).destroy_uniform_layout(layout)
    }

    fn create_uniform(&mut self, desc: &UniformDesc) -> GfxResult<UniformHandle> {
        (**self).create_uniform(desc)
    }

    fn destroy_uniform(&mut self, uniform: UniformHandle) {
        (**self).destroy_uniform(uniform)
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> GfxResult<RenderPassHandle> {
        (**self).create_render_pass(desc)
    }

    fn resize_render_pass(
        &mut self,
        pass: RenderPassHandle,
        width: u32,
        height: u32,
    ) -> GfxResult<()> {
        (**self).resize_render_pass(pass, width, height)
    }

    fn attachment_image(&self, pass: RenderPassHandle, attachment: usize) -> Option<ImageHandle> {
        (**self).attachment_image(pass, attachment)
    }

    fn destroy_render_pass(&mut self, pass: RenderPassHandle) {
        (**self).destroy_render_pass(pass)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GfxResult<PipelineHandle> {
        (**self).create_pipeline(desc)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        (**self).destroy_pipeline(pipeline)
    }

    fn begin_frame(&mut self) -> GfxResult<bool> {
        (**self).begin_frame()
    }

    fn begin_render_pass(&mut self, pass: RenderPassHandle, region: Region) -> GfxResult<()> {
        (**self).begin_render_pass(pass, region)
    }

    fn apply_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()> {
        (**self).apply_pipeline(pipeline)
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) -> GfxResult<()> {
        (**self).bind_vertex_buffer(buffer, offset)
    }

    fn bind_index_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        ty: IndexType,
    ) -> GfxResult<()> {
        (**self).bind_index_buffer(buffer, offset, ty)
    }

    fn bind_uniform(&mut self, uniform: UniformHandle, slot: u32) -> GfxResult<()> {
        (**self).bind_uniform(uniform, slot)
    }

    fn set_viewport(&mut self, region: Region) -> GfxResult<()> {
        (**self).set_viewport(region)
    }

    fn set_scissor(&mut self, region: Region) -> GfxResult<()> {
        (**self).set_scissor(region)
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GfxResult<()> {
        (**self).draw(vertex_count, instance_count, first_vertex, first_instance)
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    ) -> GfxResult<()> {
        (**self).draw_indexed(index_count, instance_count, first_index)
    }

    fn next_subpass(&mut self) -> GfxResult<()> {
        (**self).next_subpass()
    }

    fn end_render_pass(&mut self) -> GfxResult<()> {
        (**self).end_render_pass()
    }

    fn end_frame(&mut self) -> GfxResult<()> {
        (**self).end_frame()
    }

    fn abandon_frame(&mut self) {
        (**self).abandon_frame()
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        (**self).resize_surface(width, height)
    }

    fn wait_idle(&mut self) {
        (**self).wait_idle()
    }
}
