//! Recording backend without a GPU.
//!
//! `HeadlessBackend` keeps just enough state to behave like a strict driver:
//! - every object lives in a slot map, so recreated objects get fresh handles
//! - binding sets remember which buffers/images/samplers they reference
//! - pipelines remember their pass, shaders and layouts
//! - per-frame calls are checked against the frame/pass/subpass state
//!
//! Destroying something that is still referenced, destroying twice, or
//! destroying while submitted work may still be pending is recorded as a
//! violation instead of panicking, so tests can assert on the full picture.

use std::collections::VecDeque;

use slotmap::SlotMap;

use super::{
    AttachmentKind, Backend, BufferDesc, BufferHandle, Format, GfxError, GfxResult, ImageDesc,
    ImageHandle, IndexType, PipelineDesc, PipelineHandle, Region, RenderPassDesc,
    RenderPassHandle, SamplerDesc, SamplerHandle, ShaderDesc, ShaderHandle, ShaderStage,
    UniformAttribute, UniformDesc, UniformHandle, UniformLayoutDesc, UniformLayoutHandle,
    UniformType,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBuffer(BufferHandle),
    UpdateBuffer { buffer: BufferHandle, offset: u64, len: usize },
    DestroyBuffer(BufferHandle),
    CreateImage(ImageHandle),
    UpdateImage(ImageHandle),
    DestroyImage(ImageHandle),
    CreateSampler(SamplerHandle),
    DestroySampler(SamplerHandle),
    CreateShader(ShaderHandle),
    DestroyShader(ShaderHandle),
    CreateUniformLayout(UniformLayoutHandle),
    DestroyUniformLayout(UniformLayoutHandle),
    CreateUniform(UniformHandle),
    DestroyUniform(UniformHandle),
    CreateRenderPass(RenderPassHandle),
    ResizeRenderPass { pass: RenderPassHandle, width: u32, height: u32 },
    DestroyRenderPass(RenderPassHandle),
    CreatePipeline(PipelineHandle),
    DestroyPipeline(PipelineHandle),
    BeginFrame(bool),
    BeginRenderPass { pass: RenderPassHandle, region: Region },
    ApplyPipeline(PipelineHandle),
    BindVertexBuffer { buffer: BufferHandle, offset: u64 },
    BindIndexBuffer { buffer: BufferHandle, offset: u64, ty: IndexType },
    BindUniform { uniform: UniformHandle, slot: u32 },
    SetViewport(Region),
    SetScissor(Region),
    Draw { vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32 },
    DrawIndexed { index_count: u32, instance_count: u32, first_index: u32 },
    NextSubpass,
    EndRenderPass,
    EndFrame,
    AbandonFrame,
    ResizeSurface { width: u32, height: u32 },
    WaitIdle,
}

impl Call {
    pub fn is_draw(&self) -> bool {
        matches!(self, Call::Draw { .. } | Call::DrawIndexed { .. })
    }
}

struct BufferEntry {
    data: Vec<u8>,
}

struct ImageEntry {
    desc: ImageDesc,
    /// Set for images that back a render-pass attachment.
    owner: Option<RenderPassHandle>,
}

#[derive(Default)]
struct UniformEntry {
    layout: Option<UniformLayoutHandle>,
    buffers: Vec<BufferHandle>,
    images: Vec<ImageHandle>,
    samplers: Vec<SamplerHandle>,
}

struct PassEntry {
    desc: RenderPassDesc,
    images: Vec<Option<ImageHandle>>,
}

struct PipelineEntry {
    pass: RenderPassHandle,
    subpass: u32,
    shaders: Vec<ShaderHandle>,
    layouts: Vec<UniformLayoutHandle>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum FrameState {
    Idle,
    Open,
    InPass {
        pass: RenderPassHandle,
        subpass: u32,
        pipeline: Option<PipelineHandle>,
    },
}

/// Backend that records calls and models object lifetimes in memory.
pub struct HeadlessBackend {
    alignment: u64,
    surface: (u32, u32),
    calls: Vec<Call>,
    violations: Vec<String>,

    acquire_script: VecDeque<bool>,
    rejected_formats: Vec<Format>,
    rejected_shaders: Vec<String>,

    buffers: SlotMap<BufferHandle, BufferEntry>,
    images: SlotMap<ImageHandle, ImageEntry>,
    samplers: SlotMap<SamplerHandle, SamplerDesc>,
    shaders: SlotMap<ShaderHandle, ShaderStage>,
    layouts: SlotMap<UniformLayoutHandle, UniformLayoutDesc>,
    uniforms: SlotMap<UniformHandle, UniformEntry>,
    passes: SlotMap<RenderPassHandle, PassEntry>,
    pipelines: SlotMap<PipelineHandle, PipelineEntry>,

    frame: FrameState,
    /// True when no submitted work can still be in flight.
    idle: bool,
}

impl HeadlessBackend {
    /// Creates a backend with a surface of the given size and a uniform
    /// offset alignment of 256 bytes.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_alignment(width, height, 256)
    }

    pub fn with_alignment(width: u32, height: u32, alignment: u64) -> Self {
        debug_assert!(alignment.is_power_of_two());
        Self {
            alignment,
            surface: (width, height),
            calls: Vec::new(),
            violations: Vec::new(),
            acquire_script: VecDeque::new(),
            rejected_formats: Vec::new(),
            rejected_shaders: Vec::new(),
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            uniforms: SlotMap::with_key(),
            passes: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            frame: FrameState::Idle,
            idle: true,
        }
    }

    // ── scripting ─────────────────────────────────────────────────────────

    /// Queues results for upcoming `begin_frame` calls. Once the queue is
    /// drained, frames are available whenever the surface has a non-zero size.
    pub fn queue_acquire_results(&mut self, results: impl IntoIterator<Item = bool>) {
        self.acquire_script.extend(results);
    }

    /// Makes image and attachment creation fail for `format`.
    pub fn reject_format(&mut self, format: Format) {
        self.rejected_formats.push(format);
    }

    /// Makes shader creation fail for the shader named `name`.
    pub fn reject_shader(&mut self, name: impl Into<String>) {
        self.rejected_shaders.push(name.into());
    }

    // ── inspection ────────────────────────────────────────────────────────

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    /// Number of objects that are currently alive, attachment images included.
    pub fn live_objects(&self) -> usize {
        self.buffers.len()
            + self.images.len()
            + self.samplers.len()
            + self.shaders.len()
            + self.layouts.len()
            + self.uniforms.len()
            + self.passes.len()
            + self.pipelines.len()
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|b| b.data.as_slice())
    }

    pub fn image_size(&self, image: ImageHandle) -> Option<(u32, u32)> {
        self.images.get(image).map(|i| (i.desc.width, i.desc.height))
    }

    pub fn is_uniform_alive(&self, uniform: UniformHandle) -> bool {
        self.uniforms.contains_key(uniform)
    }

    /// Images a binding set samples, in attribute order.
    pub fn uniform_images(&self, uniform: UniformHandle) -> Vec<ImageHandle> {
        self.uniforms
            .get(uniform)
            .map(|u| u.images.clone())
            .unwrap_or_default()
    }

    pub fn render_pass_desc(&self, pass: RenderPassHandle) -> Option<&RenderPassDesc> {
        self.passes.get(pass).map(|p| &p.desc)
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn violation(&mut self, msg: String) {
        log::warn!("headless: {msg}");
        self.violations.push(msg);
    }

    fn check_destroy_allowed(&mut self, what: &str) {
        if self.frame != FrameState::Idle {
            self.violation(format!("{what} destroyed while a frame is being recorded"));
        } else if !self.idle {
            self.violation(format!("{what} destroyed without waiting for the GPU"));
        }
    }

    fn check_format(&self, format: Format, role: &'static str) -> GfxResult<()> {
        if self.rejected_formats.contains(&format) {
            return Err(GfxError::UnsupportedFormat(format, role));
        }
        Ok(())
    }

    fn in_pass(&self) -> GfxResult<(RenderPassHandle, u32, Option<PipelineHandle>)> {
        match self.frame {
            FrameState::InPass {
                pass,
                subpass,
                pipeline,
            } => Ok((pass, subpass, pipeline)),
            _ => Err(GfxError::usage("command recorded outside a render pass")),
        }
    }

    fn require_pipeline(&self) -> GfxResult<()> {
        match self.in_pass()? {
            (_, _, Some(_)) => Ok(()),
            _ => Err(GfxError::usage("draw without an applied pipeline")),
        }
    }

    fn resolve_attachment(
        &self,
        pass: RenderPassHandle,
        attachment: usize,
    ) -> GfxResult<ImageHandle> {
        let entry = self
            .passes
            .get(pass)
            .ok_or(GfxError::UnknownHandle("render pass"))?;
        entry
            .images
            .get(attachment)
            .copied()
            .flatten()
            .ok_or_else(|| {
                GfxError::usage(format!("attachment {attachment} cannot be sampled"))
            })
    }

    fn alloc_attachment(
        &mut self,
        owner: RenderPassHandle,
        format: Format,
        width: u32,
        height: u32,
    ) -> ImageHandle {
        self.images.insert(ImageEntry {
            desc: ImageDesc {
                label: "attachment",
                format,
                width,
                height,
            },
            owner: Some(owner),
        })
    }
}

impl Backend for HeadlessBackend {
    fn min_uniform_alignment(&self) -> u64 {
        self.alignment
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        if desc.size == 0 {
            return Err(GfxError::creation("buffer", format!("`{}` has zero size", desc.label)));
        }
        let handle = self.buffers.insert(BufferEntry {
            data: vec![0; desc.size as usize],
        });
        self.calls.push(Call::CreateBuffer(handle));
        Ok(handle)
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let entry = self
            .buffers
            .get_mut(buffer)
            .ok_or(GfxError::UnknownHandle("buffer"))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > entry.data.len() {
            return Err(GfxError::usage(format!(
                "write of {} bytes at {offset} overflows buffer of {}",
                data.len(),
                entry.data.len()
            )));
        }
        entry.data[start..end].copy_from_slice(data);
        self.calls.push(Call::UpdateBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.check_destroy_allowed("buffer");
        if self.uniforms.values().any(|u| u.buffers.contains(&buffer)) {
            self.violation(format!("buffer {buffer:?} destroyed while a binding set uses it"));
        }
        if self.buffers.remove(buffer).is_none() {
            self.violation(format!("buffer {buffer:?} destroyed twice"));
        }
        self.calls.push(Call::DestroyBuffer(buffer));
    }

    fn create_image(&mut self, desc: &ImageDesc) -> GfxResult<ImageHandle> {
        self.check_format(desc.format, "sampled image")?;
        if desc.width == 0 || desc.height == 0 {
            return Err(GfxError::creation("image", format!("`{}` has zero size", desc.label)));
        }
        let handle = self.images.insert(ImageEntry {
            desc: desc.clone(),
            owner: None,
        });
        self.calls.push(Call::CreateImage(handle));
        Ok(handle)
    }

    fn update_image(&mut self, image: ImageHandle, pixels: &[u8]) -> GfxResult<()> {
        let entry = self.images.get(image).ok_or(GfxError::UnknownHandle("image"))?;
        if entry.owner.is_some() {
            return Err(GfxError::usage("attachment images cannot be uploaded to"));
        }
        let expected = entry.desc.byte_len();
        if expected != Some(pixels.len() as u64) {
            return Err(GfxError::usage(format!(
                "upload of {} bytes does not match image ({expected:?} expected)",
                pixels.len()
            )));
        }
        self.calls.push(Call::UpdateImage(image));
        Ok(())
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.check_destroy_allowed("image");
        if self.uniforms.values().any(|u| u.images.contains(&image)) {
            self.violation(format!("image {image:?} destroyed while a binding set samples it"));
        }
        match self.images.get(image).map(|i| i.owner) {
            Some(Some(_)) => {
                self.violation(format!("image {image:?} belongs to a render pass"));
            }
            Some(None) => {
                self.images.remove(image);
            }
            None => self.violation(format!("image {image:?} destroyed twice")),
        }
        self.calls.push(Call::DestroyImage(image));
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> GfxResult<SamplerHandle> {
        let handle = self.samplers.insert(desc.clone());
        self.calls.push(Call::CreateSampler(handle));
        Ok(handle)
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.check_destroy_allowed("sampler");
        if self.uniforms.values().any(|u| u.samplers.contains(&sampler)) {
            self.violation(format!("sampler {sampler:?} destroyed while a binding set uses it"));
        }
        if self.samplers.remove(sampler).is_none() {
            self.violation(format!("sampler {sampler:?} destroyed twice"));
        }
        self.calls.push(Call::DestroySampler(sampler));
    }

    fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> GfxResult<ShaderHandle> {
        if desc.source.trim().is_empty() || self.rejected_shaders.iter().any(|n| n == desc.name) {
            return Err(GfxError::Shader {
                name: desc.name.to_string(),
                diagnostic: "rejected by headless backend".to_string(),
            });
        }
        let handle = self.shaders.insert(desc.stage);
        self.calls.push(Call::CreateShader(handle));
        Ok(handle)
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.check_destroy_allowed("shader");
        if self.pipelines.values().any(|p| p.shaders.contains(&shader)) {
            self.violation(format!("shader {shader:?} destroyed while a pipeline uses it"));
        }
        if self.shaders.remove(shader).is_none() {
            self.violation(format!("shader {shader:?} destroyed twice"));
        }
        self.calls.push(Call::DestroyShader(shader));
    }

    fn create_uniform_layout(
        &mut self,
        desc: &UniformLayoutDesc,
    ) -> GfxResult<UniformLayoutHandle> {
        for (i, b) in desc.bindings.iter().enumerate() {
            if desc.bindings[..i].iter().any(|o| o.binding == b.binding) {
                return Err(GfxError::creation(
                    "uniform layout",
                    format!("`{}` declares binding {} twice", desc.label, b.binding),
                ));
            }
        }
        let handle = self.layouts.insert(desc.clone());
        self.calls.push(Call::CreateUniformLayout(handle));
        Ok(handle)
    }

    fn destroy_uniform_layout(&mut self, layout: UniformLayoutHandle) {
        self.check_destroy_allowed("uniform layout");
        if self.uniforms.values().any(|u| u.layout == Some(layout)) {
            self.violation(format!("layout {layout:?} destroyed while a binding set uses it"));
        }
        if self.pipelines.values().any(|p| p.layouts.contains(&layout)) {
            self.violation(format!("layout {layout:?} destroyed while a pipeline uses it"));
        }
        if self.layouts.remove(layout).is_none() {
            self.violation(format!("layout {layout:?} destroyed twice"));
        }
        self.calls.push(Call::DestroyUniformLayout(layout));
    }

    fn create_uniform(&mut self, desc: &UniformDesc) -> GfxResult<UniformHandle> {
        let layout = self
            .layouts
            .get(desc.layout)
            .ok_or(GfxError::UnknownHandle("uniform layout"))?;

        let mut entry = UniformEntry {
            layout: Some(desc.layout),
            ..Default::default()
        };

        for attr in &desc.attributes {
            let declared = layout.binding(attr.binding()).map(|b| b.ty);
            let expected = match attr {
                UniformAttribute::Buffer { .. } => UniformType::UniformBuffer,
                _ => UniformType::SampledImage,
            };
            if declared != Some(expected) {
                return Err(GfxError::creation(
                    "binding set",
                    format!(
                        "`{}` binding {} is not declared as {expected:?}",
                        desc.label,
                        attr.binding()
                    ),
                ));
            }

            match *attr {
                UniformAttribute::Buffer {
                    buffer,
                    offset,
                    size,
                    ..
                } => {
                    let len = self
                        .buffers
                        .get(buffer)
                        .ok_or(GfxError::UnknownHandle("buffer"))?
                        .data
                        .len() as u64;
                    if offset % self.alignment != 0 || offset + size > len {
                        return Err(GfxError::creation(
                            "binding set",
                            format!("range {offset}+{size} is misaligned or exceeds {len} bytes"),
                        ));
                    }
                    entry.buffers.push(buffer);
                }
                UniformAttribute::Image { image, sampler, .. } => {
                    if !self.images.contains_key(image) {
                        return Err(GfxError::UnknownHandle("image"));
                    }
                    if !self.samplers.contains_key(sampler) {
                        return Err(GfxError::UnknownHandle("sampler"));
                    }
                    entry.images.push(image);
                    entry.samplers.push(sampler);
                }
                UniformAttribute::SampledAttachment {
                    pass,
                    attachment,
                    sampler,
                    ..
                } => {
                    let image = self.resolve_attachment(pass, attachment)?;
                    if !self.samplers.contains_key(sampler) {
                        return Err(GfxError::UnknownHandle("sampler"));
                    }
                    entry.images.push(image);
                    entry.samplers.push(sampler);
                }
            }
        }

        let handle = self.uniforms.insert(entry);
        self.calls.push(Call::CreateUniform(handle));
        Ok(handle)
    }

    fn destroy_uniform(&mut self, uniform: UniformHandle) {
        self.check_destroy_allowed("binding set");
        if self.uniforms.remove(uniform).is_none() {
            self.violation(format!("binding set {uniform:?} destroyed twice"));
        }
        self.calls.push(Call::DestroyUniform(uniform));
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> GfxResult<RenderPassHandle> {
        desc.validate()?;
        for att in &desc.attachments {
            let role = match att.kind {
                AttachmentKind::Present => "present attachment",
                AttachmentKind::Color => "color attachment",
                AttachmentKind::DepthStencil => "depth attachment",
            };
            self.check_format(att.format, role)?;
        }

        let handle = self.passes.insert(PassEntry {
            desc: desc.clone(),
            images: Vec::new(),
        });
        let images = desc
            .attachments
            .iter()
            .map(|att| match att.kind {
                AttachmentKind::Present => None,
                _ => Some(self.alloc_attachment(handle, att.format, desc.width, desc.height)),
            })
            .collect();
        if let Some(entry) = self.passes.get_mut(handle) {
            entry.images = images;
        }

        self.calls.push(Call::CreateRenderPass(handle));
        Ok(handle)
    }

    fn resize_render_pass(
        &mut self,
        pass: RenderPassHandle,
        width: u32,
        height: u32,
    ) -> GfxResult<()> {
        if width == 0 || height == 0 {
            return Err(GfxError::usage(format!("render pass resized to {width}x{height}")));
        }
        let entry = self
            .passes
            .get(pass)
            .ok_or(GfxError::UnknownHandle("render pass"))?;
        self.calls.push(Call::ResizeRenderPass {
            pass,
            width,
            height,
        });
        if entry.desc.width == width && entry.desc.height == height {
            return Ok(());
        }
        let old: Vec<Option<ImageHandle>> = entry.images.clone();
        let formats: Vec<Format> = entry.desc.attachments.iter().map(|a| a.format).collect();

        if !self.idle {
            self.violation("render pass attachments recreated without waiting for the GPU".into());
        }

        let mut fresh = Vec::with_capacity(old.len());
        for (image, format) in old.into_iter().zip(formats) {
            fresh.push(image.map(|old_image| {
                self.images.remove(old_image);
                self.alloc_attachment(pass, format, width, height)
            }));
        }

        if let Some(entry) = self.passes.get_mut(pass) {
            entry.desc.width = width;
            entry.desc.height = height;
            entry.images = fresh;
        }
        Ok(())
    }

    fn attachment_image(&self, pass: RenderPassHandle, attachment: usize) -> Option<ImageHandle> {
        self.passes.get(pass)?.images.get(attachment).copied().flatten()
    }

    fn destroy_render_pass(&mut self, pass: RenderPassHandle) {
        self.check_destroy_allowed("render pass");
        if self.pipelines.values().any(|p| p.pass == pass) {
            self.violation(format!("render pass {pass:?} destroyed while a pipeline targets it"));
        }
        match self.passes.remove(pass) {
            Some(entry) => {
                for image in entry.images.into_iter().flatten() {
                    if self.uniforms.values().any(|u| u.images.contains(&image)) {
                        self.violation(format!(
                            "render pass {pass:?} destroyed while its attachment is sampled"
                        ));
                    }
                    self.images.remove(image);
                }
            }
            None => self.violation(format!("render pass {pass:?} destroyed twice")),
        }
        self.calls.push(Call::DestroyRenderPass(pass));
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GfxResult<PipelineHandle> {
        let pass = self
            .passes
            .get(desc.render_pass)
            .ok_or(GfxError::UnknownHandle("render pass"))?;
        if desc.subpass as usize >= pass.desc.subpasses.len() {
            return Err(GfxError::creation(
                "pipeline",
                format!("`{}` targets missing subpass {}", desc.label, desc.subpass),
            ));
        }
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            let present = desc
                .shaders
                .iter()
                .filter_map(|s| self.shaders.get(*s))
                .any(|s| *s == stage);
            if !present {
                return Err(GfxError::creation(
                    "pipeline",
                    format!("`{}` has no {stage:?} shader", desc.label),
                ));
            }
        }
        if desc.uniform_layouts.iter().any(|l| !self.layouts.contains_key(*l)) {
            return Err(GfxError::UnknownHandle("uniform layout"));
        }

        let handle = self.pipelines.insert(PipelineEntry {
            pass: desc.render_pass,
            subpass: desc.subpass,
            shaders: desc.shaders.clone(),
            layouts: desc.uniform_layouts.clone(),
        });
        self.calls.push(Call::CreatePipeline(handle));
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.check_destroy_allowed("pipeline");
        if self.pipelines.remove(pipeline).is_none() {
            self.violation(format!("pipeline {pipeline:?} destroyed twice"));
        }
        self.calls.push(Call::DestroyPipeline(pipeline));
    }

    fn begin_frame(&mut self) -> GfxResult<bool> {
        if self.frame != FrameState::Idle {
            return Err(GfxError::usage("begin_frame while a frame is open"));
        }
        let available = match self.acquire_script.pop_front() {
            Some(scripted) => scripted,
            None => self.surface.0 > 0 && self.surface.1 > 0,
        };
        self.calls.push(Call::BeginFrame(available));
        if available {
            self.frame = FrameState::Open;
        }
        Ok(available)
    }

    fn begin_render_pass(&mut self, pass: RenderPassHandle, region: Region) -> GfxResult<()> {
        if self.frame != FrameState::Open {
            return Err(GfxError::usage("begin_render_pass outside an open frame"));
        }
        if !self.passes.contains_key(pass) {
            return Err(GfxError::UnknownHandle("render pass"));
        }
        self.frame = FrameState::InPass {
            pass,
            subpass: 0,
            pipeline: None,
        };
        self.calls.push(Call::BeginRenderPass { pass, region });
        Ok(())
    }

    fn apply_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()> {
        let (pass, subpass, _) = self.in_pass()?;
        let entry = self
            .pipelines
            .get(pipeline)
            .ok_or(GfxError::UnknownHandle("pipeline"))?;
        if entry.pass != pass || entry.subpass != subpass {
            return Err(GfxError::usage(format!(
                "pipeline for subpass {} applied in subpass {subpass}",
                entry.subpass
            )));
        }
        self.frame = FrameState::InPass {
            pass,
            subpass,
            pipeline: Some(pipeline),
        };
        self.calls.push(Call::ApplyPipeline(pipeline));
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) -> GfxResult<()> {
        self.in_pass()?;
        if !self.buffers.contains_key(buffer) {
            return Err(GfxError::UnknownHandle("buffer"));
        }
        self.calls.push(Call::BindVertexBuffer { buffer, offset });
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        ty: IndexType,
    ) -> GfxResult<()> {
        self.in_pass()?;
        if !self.buffers.contains_key(buffer) {
            return Err(GfxError::UnknownHandle("buffer"));
        }
        self.calls.push(Call::BindIndexBuffer { buffer, offset, ty });
        Ok(())
    }

    fn bind_uniform(&mut self, uniform: UniformHandle, slot: u32) -> GfxResult<()> {
        self.in_pass()?;
        let entry = self
            .uniforms
            .get(uniform)
            .ok_or(GfxError::UnknownHandle("binding set"))?;
        if entry.images.iter().any(|i| !self.images.contains_key(*i)) {
            return Err(GfxError::StaleBinding);
        }
        self.calls.push(Call::BindUniform { uniform, slot });
        Ok(())
    }

    fn set_viewport(&mut self, region: Region) -> GfxResult<()> {
        self.in_pass()?;
        self.calls.push(Call::SetViewport(region));
        Ok(())
    }

    fn set_scissor(&mut self, region: Region) -> GfxResult<()> {
        self.in_pass()?;
        self.calls.push(Call::SetScissor(region));
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GfxResult<()> {
        self.require_pipeline()?;
        self.calls.push(Call::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    ) -> GfxResult<()> {
        self.require_pipeline()?;
        self.calls.push(Call::DrawIndexed {
            index_count,
            instance_count,
            first_index,
        });
        Ok(())
    }

    fn next_subpass(&mut self) -> GfxResult<()> {
        let (pass, subpass, _) = self.in_pass()?;
        let count = self.passes.get(pass).map_or(0, |p| p.desc.subpasses.len()) as u32;
        if subpass + 1 >= count {
            return Err(GfxError::usage(format!("no subpass after {subpass}")));
        }
        self.frame = FrameState::InPass {
            pass,
            subpass: subpass + 1,
            pipeline: None,
        };
        self.calls.push(Call::NextSubpass);
        Ok(())
    }

    fn end_render_pass(&mut self) -> GfxResult<()> {
        let (pass, subpass, _) = self.in_pass()?;
        let count = self.passes.get(pass).map_or(0, |p| p.desc.subpasses.len()) as u32;
        if subpass + 1 != count {
            return Err(GfxError::usage(format!(
                "render pass ended in subpass {subpass} of {count}"
            )));
        }
        self.frame = FrameState::Open;
        self.calls.push(Call::EndRenderPass);
        Ok(())
    }

    fn end_frame(&mut self) -> GfxResult<()> {
        if self.frame != FrameState::Open {
            return Err(GfxError::usage("end_frame without an open frame or inside a pass"));
        }
        self.frame = FrameState::Idle;
        self.idle = false;
        self.calls.push(Call::EndFrame);
        Ok(())
    }

    fn abandon_frame(&mut self) {
        if self.frame == FrameState::Idle {
            return;
        }
        self.frame = FrameState::Idle;
        self.calls.push(Call::AbandonFrame);
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = (width, height);
        self.calls.push(Call::ResizeSurface { width, height });
    }

    fn wait_idle(&mut self) {
        self.idle = true;
        self.calls.push(Call::WaitIdle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{AttachmentDesc, ClearValue, LoadAction, StoreAction, SubpassDesc};

    fn single_pass(backend: &mut HeadlessBackend) -> RenderPassHandle {
        let desc = RenderPassDesc {
            label: "single",
            width: 16,
            height: 16,
            attachments: vec![
                AttachmentDesc {
                    format: Format::Swapchain,
                    kind: AttachmentKind::Present,
                    load: LoadAction::Clear,
                    store: StoreAction::Store,
                    clear: ClearValue::Color([0.0; 4]),
                },
                AttachmentDesc {
                    format: Format::Rgba16Float,
                    kind: AttachmentKind::Color,
                    load: LoadAction::Clear,
                    store: StoreAction::DontCare,
                    clear: ClearValue::Color([0.0; 4]),
                },
            ],
            subpasses: vec![SubpassDesc {
                colors: vec![1],
                ..Default::default()
            }],
            dependencies: Vec::new(),
        };
        backend.create_render_pass(&desc).unwrap()
    }

    #[test]
    fn present_attachment_has_no_image() {
        let mut backend = HeadlessBackend::new(16, 16);
        let pass = single_pass(&mut backend);
        assert!(backend.attachment_image(pass, 0).is_none());
        assert!(backend.attachment_image(pass, 1).is_some());
    }

    #[test]
    fn resize_replaces_attachment_images() {
        let mut backend = HeadlessBackend::new(16, 16);
        let pass = single_pass(&mut backend);
        let before = backend.attachment_image(pass, 1).unwrap();

        backend.resize_render_pass(pass, 32, 8).unwrap();
        let after = backend.attachment_image(pass, 1).unwrap();

        assert_ne!(before, after);
        assert_eq!(backend.image_size(after), Some((32, 8)));
        assert_eq!(backend.image_size(before), None);
    }

    #[test]
    fn scripted_acquire_results_come_first() {
        let mut backend = HeadlessBackend::new(16, 16);
        backend.queue_acquire_results([false]);
        assert!(!backend.begin_frame().unwrap());
        assert!(backend.begin_frame().unwrap());
    }

    #[test]
    fn zero_sized_surface_has_no_frames() {
        let mut backend = HeadlessBackend::new(16, 16);
        backend.resize_surface(0, 0);
        assert!(!backend.begin_frame().unwrap());
    }

    #[test]
    fn draw_outside_pass_is_an_error() {
        let mut backend = HeadlessBackend::new(16, 16);
        assert!(backend.begin_frame().unwrap());
        assert!(matches!(
            backend.draw(3, 1, 0, 0),
            Err(GfxError::InvalidUsage(_))
        ));
    }

    #[test]
    fn abandoned_frame_closes_the_open_pass() {
        let mut backend = HeadlessBackend::new(16, 16);
        let pass = single_pass(&mut backend);
        assert!(backend.begin_frame().unwrap());
        backend.begin_render_pass(pass, Region::full(16, 16)).unwrap();

        backend.abandon_frame();
        assert_eq!(backend.calls().last(), Some(&Call::AbandonFrame));
        assert!(backend.begin_frame().unwrap());

        backend.abandon_frame();
        let before = backend.calls().len();
        backend.abandon_frame();
        assert_eq!(backend.calls().len(), before);
    }

    #[test]
    fn destroying_a_sampled_image_is_a_violation() {
        let mut backend = HeadlessBackend::new(16, 16);
        let layout = backend
            .create_uniform_layout(&UniformLayoutDesc::new("l").with_binding(
                0,
                UniformType::SampledImage,
                ShaderStage::Fragment,
            ))
            .unwrap();
        let image = backend
            .create_image(&ImageDesc {
                label: "img",
                format: Format::Rgba8Unorm,
                width: 2,
                height: 2,
            })
            .unwrap();
        let sampler = backend.create_sampler(&SamplerDesc::default()).unwrap();
        let _set = backend
            .create_uniform(&UniformDesc::new("set", layout).with_image(0, image, sampler))
            .unwrap();

        backend.destroy_image(image);
        assert_eq!(backend.violations().len(), 1);
    }

    #[test]
    fn destroy_after_submit_requires_wait_idle() {
        let mut backend = HeadlessBackend::new(16, 16);
        let sampler = backend.create_sampler(&SamplerDesc::default()).unwrap();
        assert!(backend.begin_frame().unwrap());
        backend.end_frame().unwrap();

        backend.destroy_sampler(sampler);
        assert_eq!(backend.violations().len(), 1);
    }
}
