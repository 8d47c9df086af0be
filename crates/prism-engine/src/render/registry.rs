use crate::gfx::{
    Backend, BufferDesc, BufferHandle, GfxResult, ImageDesc, ImageHandle, PipelineDesc,
    PipelineHandle, RenderPassDesc, RenderPassHandle, SamplerDesc, SamplerHandle, ShaderDesc,
    ShaderHandle, UniformDesc, UniformHandle, UniformLayoutDesc, UniformLayoutHandle,
};

/// Exclusive owner of a backend and of every object created through it.
///
/// Dropping the registry waits for the GPU, then destroys what is left in
/// dependency order: binding sets, pipelines, render passes, layouts, shaders,
/// images, samplers, buffers.
pub struct ResourceRegistry<B: Backend> {
    backend: B,
    buffers: Vec<BufferHandle>,
    images: Vec<ImageHandle>,
    samplers: Vec<SamplerHandle>,
    shaders: Vec<ShaderHandle>,
    layouts: Vec<UniformLayoutHandle>,
    uniforms: Vec<UniformHandle>,
    passes: Vec<RenderPassHandle>,
    pipelines: Vec<PipelineHandle>,
}

impl<B: Backend> ResourceRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            buffers: Vec::new(),
            images: Vec::new(),
            samplers: Vec::new(),
            shaders: Vec::new(),
            layouts: Vec::new(),
            uniforms: Vec::new(),
            passes: Vec::new(),
            pipelines: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Number of objects the registry currently owns. Attachment images are
    /// owned by their render pass and not counted separately.
    pub fn len(&self) -> usize {
        self.buffers.len()
            + self.images.len()
            + self.samplers.len()
            + self.shaders.len()
            + self.layouts.len()
            + self.uniforms.len()
            + self.passes.len()
            + self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        let handle = self.backend.create_buffer(desc)?;
        self.buffers.push(handle);
        Ok(handle)
    }

    /// Creates a buffer and uploads `data` at offset 0.
    pub fn create_buffer_with_data(
        &mut self,
        desc: &BufferDesc,
        data: &[u8],
    ) -> GfxResult<BufferHandle> {
        let handle = self.create_buffer(desc)?;
        self.backend.update_buffer(handle, 0, data)?;
        Ok(handle)
    }

    pub fn create_image(&mut self, desc: &ImageDesc) -> GfxResult<ImageHandle> {
        let handle = self.backend.create_image(desc)?;
        self.images.push(handle);
        Ok(handle)
    }

    pub fn create_sampler(&mut self, desc: &SamplerDesc) -> GfxResult<SamplerHandle> {
        let handle = self.backend.create_sampler(desc)?;
        self.samplers.push(handle);
        Ok(handle)
    }

    pub fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> GfxResult<ShaderHandle> {
        let handle = self.backend.create_shader(desc)?;
        self.shaders.push(handle);
        Ok(handle)
    }

    pub fn create_uniform_layout(
        &mut self,
        desc: &UniformLayoutDesc,
    ) -> GfxResult<UniformLayoutHandle> {
        let handle = self.backend.create_uniform_layout(desc)?;
        self.layouts.push(handle);
        Ok(handle)
    }

    pub fn create_uniform(&mut self, desc: &UniformDesc) -> GfxResult<UniformHandle> {
        let handle = self.backend.create_uniform(desc)?;
        self.uniforms.push(handle);
        Ok(handle)
    }

    pub fn create_render_pass(&mut self, desc: &RenderPassDesc) -> GfxResult<RenderPassHandle> {
        let handle = self.backend.create_render_pass(desc)?;
        self.passes.push(handle);
        Ok(handle)
    }

    pub fn create_pipeline(&mut self, desc: &PipelineDesc) -> GfxResult<PipelineHandle> {
        let handle = self.backend.create_pipeline(desc)?;
        self.pipelines.push(handle);
        Ok(handle)
    }

    /// Destroys a binding set ahead of teardown. The caller must have idled
    /// the backend if the set may still be in use by submitted work.
    pub fn destroy_uniform(&mut self, uniform: UniformHandle) {
        if let Some(i) = self.uniforms.iter().position(|u| *u == uniform) {
            self.uniforms.swap_remove(i);
            self.backend.destroy_uniform(uniform);
        } else {
            log::warn!("registry: binding set {uniform:?} is not owned here");
        }
    }
}

impl<B: Backend> Drop for ResourceRegistry<B> {
    fn drop(&mut self) {
        log::debug!("registry: tearing down {} objects", self.len());
        self.backend.wait_idle();

        let b = &mut self.backend;
        for h in self.uniforms.drain(..).rev() {
            b.destroy_uniform(h);
        }
        for h in self.pipelines.drain(..).rev() {
            b.destroy_pipeline(h);
        }
        for h in self.passes.drain(..).rev() {
            b.destroy_render_pass(h);
        }
        for h in self.layouts.drain(..).rev() {
            b.destroy_uniform_layout(h);
        }
        for h in self.shaders.drain(..).rev() {
            b.destroy_shader(h);
        }
        for h in self.images.drain(..).rev() {
            b.destroy_image(h);
        }
        for h in self.samplers.drain(..).rev() {
            b.destroy_sampler(h);
        }
        for h in self.buffers.drain(..).rev() {
            b.destroy_buffer(h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{Call, HeadlessBackend};
    use crate::gfx::{BufferStorage, BufferUsage, Format, ShaderStage, UniformType};

    #[test]
    fn drop_waits_then_destroys_sets_before_their_resources() {
        let mut backend = HeadlessBackend::new(8, 8);
        {
            let mut registry = ResourceRegistry::new(&mut backend);
            let buffer = registry
                .create_buffer(&BufferDesc {
                    label: "ubo",
                    size: 64,
                    storage: BufferStorage::Dynamic,
                    usage: BufferUsage::Uniform,
                })
                .unwrap();
            let layout = registry
                .create_uniform_layout(&UniformLayoutDesc::new("l").with_binding(
                    0,
                    UniformType::UniformBuffer,
                    ShaderStage::Vertex,
                ))
                .unwrap();
            registry
                .create_uniform(&UniformDesc::new("set", layout).with_buffer(0, buffer, 0, 64))
                .unwrap();
            assert_eq!(registry.len(), 3);
        }

        let tail: Vec<Call> = backend.calls().iter().rev().take(4).rev().cloned().collect();
        assert!(matches!(tail[0], Call::WaitIdle));
        assert!(matches!(tail[1], Call::DestroyUniform(_)));
        assert!(matches!(tail[2], Call::DestroyUniformLayout(_)));
        assert!(matches!(tail[3], Call::DestroyBuffer(_)));
        assert!(backend.violations().is_empty());
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn failed_creation_registers_nothing() {
        let mut backend = HeadlessBackend::new(8, 8);
        backend.reject_format(Format::Rgba8Unorm);
        let mut registry = ResourceRegistry::new(&mut backend);
        let result = registry.create_image(&ImageDesc {
            label: "albedo",
            format: Format::Rgba8Unorm,
            width: 1,
            height: 1,
        });
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn destroy_uniform_unregisters() {
        let mut backend = HeadlessBackend::new(8, 8);
        {
            let mut registry = ResourceRegistry::new(&mut backend);
            let layout = registry
                .create_uniform_layout(&UniformLayoutDesc::new("empty"))
                .unwrap();
            let set = registry.create_uniform(&UniformDesc::new("set", layout)).unwrap();
            registry.destroy_uniform(set);
            assert_eq!(registry.len(), 1);
        }
        assert!(backend.violations().is_empty());
    }
}
