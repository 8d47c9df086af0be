//! wgpu implementation of [`Backend`](crate::gfx::Backend).
//!
//! Owns the instance, adapter, device, queue and the window surface, plus one
//! slot map per object kind. Render passes are emulated (see `pass`), and a
//! combined image+sampler declared at binding `N` occupies wgpu bindings `N`
//! (texture) and `N + 1` (sampler).

mod convert;
mod init;
mod pass;
mod surface;

use std::num::NonZeroU64;

use anyhow::{Context, Result};
use slotmap::SlotMap;
use winit::window::Window;

use crate::gfx::{
    AttachmentKind, Backend, BufferDesc, BufferHandle, Format, GfxError, GfxResult, ImageDesc,
    ImageHandle, IndexType, PipelineDesc, PipelineHandle, Region, RenderPassDesc,
    RenderPassHandle, SamplerDesc, SamplerHandle, ShaderDesc, ShaderHandle, ShaderStage,
    UniformAttribute, UniformDesc, UniformHandle, UniformLayoutDesc, UniformLayoutHandle,
    UniformType,
};

pub use init::GfxInit;
use pass::{PendingPass, RenderCommand};
use surface::SurfaceErrorAction;

struct BufferEntry {
    buffer: wgpu::Buffer,
}

struct ImageEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: ImageDesc,
}

struct ShaderEntry {
    module: wgpu::ShaderModule,
    stage: ShaderStage,
}

struct LayoutEntry {
    layout: wgpu::BindGroupLayout,
    desc: UniformLayoutDesc,
}

struct UniformEntry {
    group: wgpu::BindGroup,
    /// Images the bind group was built from.
    images: Vec<ImageHandle>,
}

struct PassEntry {
    desc: RenderPassDesc,
    /// One per attachment; `None` for the present attachment.
    images: Vec<Option<ImageHandle>>,
}

struct PipelineEntry {
    pipeline: wgpu::RenderPipeline,
    pass: RenderPassHandle,
    subpass: u32,
}

#[derive(Default)]
struct Resources {
    buffers: SlotMap<BufferHandle, BufferEntry>,
    images: SlotMap<ImageHandle, ImageEntry>,
    samplers: SlotMap<SamplerHandle, wgpu::Sampler>,
    shaders: SlotMap<ShaderHandle, ShaderEntry>,
    layouts: SlotMap<UniformLayoutHandle, LayoutEntry>,
    uniforms: SlotMap<UniformHandle, UniformEntry>,
    passes: SlotMap<RenderPassHandle, PassEntry>,
    pipelines: SlotMap<PipelineHandle, PipelineEntry>,
}

/// Frame between a successful acquire and present.
struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
    pass: Option<PendingPass>,
}

/// Window-backed graphics backend.
pub struct WgpuBackend<'w> {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'w>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,

    res: Resources,
    frame: Option<Frame>,
}

impl<'w> WgpuBackend<'w> {
    /// Creates the device and configures a surface for `window`.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(window: &'w Window, init: GfxInit) -> Result<Self> {
        let size = window.inner_size();
        anyhow::ensure!(size.width > 0 && size.height > 0, "window has zero size");

        let GfxInit {
            debug,
            prefer_srgb,
            present_mode,
            alpha_mode,
            required_features,
            required_limits,
            desired_maximum_frame_latency,
        } = init;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: if debug {
                wgpu::InstanceFlags::debugging()
            } else {
                wgpu::InstanceFlags::empty()
            },
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("prism device"),
                required_features,
                required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface::choose_surface_format(&surface_caps, prefer_srgb)
            .context("no supported surface formats")?;
        let alpha_mode = surface::choose_alpha_mode(&surface_caps, alpha_mode);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency,
        };
        surface.configure(&device, &config);

        log::info!(
            "gpu: adapter `{}` ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            format,
            size.width,
            size.height
        );

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            config,
            res: Resources::default(),
            frame: None,
        })
    }

    fn texture_format(&self, format: Format) -> wgpu::TextureFormat {
        convert::texture_format(format, self.config.format)
    }

    fn check_format(
        &self,
        format: Format,
        usages: wgpu::TextureUsages,
        role: &'static str,
    ) -> GfxResult<()> {
        if format == Format::Swapchain {
            return Ok(());
        }
        let features = self
            .adapter
            .get_texture_format_features(self.texture_format(format));
        if !features.allowed_usages.contains(usages) {
            return Err(GfxError::UnsupportedFormat(format, role));
        }
        Ok(())
    }

    fn insert_texture(
        &mut self,
        desc: ImageDesc,
        usage: wgpu::TextureUsages,
    ) -> ImageHandle {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.texture_format(desc.format),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.res.images.insert(ImageEntry {
            texture,
            view,
            desc,
        })
    }

    fn create_attachments(
        &mut self,
        desc: &RenderPassDesc,
        width: u32,
        height: u32,
    ) -> Vec<Option<ImageHandle>> {
        desc.attachments
            .iter()
            .map(|att| {
                let usage = match att.kind {
                    AttachmentKind::Present => return None,
                    AttachmentKind::Color => {
                        wgpu::TextureUsages::RENDER_ATTACHMENT
                            | wgpu::TextureUsages::TEXTURE_BINDING
                    }
                    AttachmentKind::DepthStencil => wgpu::TextureUsages::RENDER_ATTACHMENT,
                };
                let image = ImageDesc {
                    label: desc.label,
                    format: att.format,
                    width,
                    height,
                };
                Some(self.insert_texture(image, usage))
            })
            .collect()
    }

    fn pending(&mut self) -> GfxResult<&mut PendingPass> {
        self.frame
            .as_mut()
            .and_then(|f| f.pass.as_mut())
            .ok_or_else(|| GfxError::usage("command recorded outside a render pass"))
    }

    fn subpass_count(&self, pass: RenderPassHandle) -> u32 {
        self.res
            .passes
            .get(pass)
            .map_or(0, |p| p.desc.subpasses.len() as u32)
    }

    fn validate_wgsl(desc: &ShaderDesc<'_>) -> GfxResult<()> {
        let reject = |diagnostic: String| GfxError::Shader {
            name: desc.name.to_string(),
            diagnostic,
        };

        let module = naga::front::wgsl::parse_str(desc.source)
            .map_err(|e| reject(e.emit_to_string(desc.source)))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| reject(format!("validation error: {e}")))?;

        let stage = convert::naga_stage(desc.stage);
        let entry = desc.stage.entry_point();
        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == entry && ep.stage == stage)
        {
            return Err(reject(format!("missing {stage:?} entry point `{entry}`")));
        }
        Ok(())
    }
}

impl Backend for WgpuBackend<'_> {
    fn min_uniform_alignment(&self) -> u64 {
        self.device.limits().min_uniform_buffer_offset_alignment as u64
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        if desc.size == 0 {
            return Err(GfxError::creation("buffer", format!("`{}` has zero size", desc.label)));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: convert::buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        Ok(self.res.buffers.insert(BufferEntry { buffer }))
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let entry = self
            .res
            .buffers
            .get(buffer)
            .ok_or(GfxError::UnknownHandle("buffer"))?;
        let padded_len = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || offset + padded_len > entry.buffer.size() {
            return Err(GfxError::usage(format!(
                "write of {} bytes at {offset} does not fit buffer of {}",
                data.len(),
                entry.buffer.size()
            )));
        }
        if padded_len == data.len() as u64 {
            self.queue.write_buffer(&entry.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(padded_len as usize, 0);
            self.queue.write_buffer(&entry.buffer, offset, &padded);
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.res.buffers.remove(buffer).is_none() {
            log::warn!("destroy of unknown buffer {buffer:?}");
        }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> GfxResult<ImageHandle> {
        let usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        self.check_format(desc.format, usage, "sampled image")?;
        if desc.width == 0 || desc.height == 0 || desc.byte_len().is_none() {
            return Err(GfxError::creation(
                "image",
                format!("`{}` is empty or has no CPU layout", desc.label),
            ));
        }
        Ok(self.insert_texture(desc.clone(), usage))
    }

    fn update_image(&mut self, image: ImageHandle, pixels: &[u8]) -> GfxResult<()> {
        let entry = self
            .res
            .images
            .get(image)
            .ok_or(GfxError::UnknownHandle("image"))?;
        let desc = &entry.desc;
        let (Some(bpp), Some(len)) = (desc.format.bytes_per_pixel(), desc.byte_len()) else {
            return Err(GfxError::usage("image has no CPU layout"));
        };
        if pixels.len() as u64 != len {
            return Err(GfxError::usage(format!(
                "upload of {} bytes does not match image of {len}",
                pixels.len()
            )));
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bpp * desc.width),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if self.res.images.remove(image).is_none() {
            log::warn!("destroy of unknown image {image:?}");
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> GfxResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(desc.label),
            address_mode_u: convert::address_mode(desc.wrap_u),
            address_mode_v: convert::address_mode(desc.wrap_v),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: convert::filter(desc.mag_filter),
            min_filter: convert::filter(desc.min_filter),
            ..Default::default()
        });
        Ok(self.res.samplers.insert(sampler))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if self.res.samplers.remove(sampler).is_none() {
            log::warn!("destroy of unknown sampler {sampler:?}");
        }
    }

    fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> GfxResult<ShaderHandle> {
        Self::validate_wgsl(desc)?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.name),
                source: wgpu::ShaderSource::Wgsl(desc.source.into()),
            });
        Ok(self.res.shaders.insert(ShaderEntry {
            module,
            stage: desc.stage,
        }))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        if self.res.shaders.remove(shader).is_none() {
            log::warn!("destroy of unknown shader {shader:?}");
        }
    }

    fn create_uniform_layout(
        &mut self,
        desc: &UniformLayoutDesc,
    ) -> GfxResult<UniformLayoutHandle> {
        let mut entries = Vec::with_capacity(desc.bindings.len() * 2);
        for (i, b) in desc.bindings.iter().enumerate() {
            if desc.bindings[..i].iter().any(|o| o.binding == b.binding) {
                return Err(GfxError::creation(
                    "uniform layout",
                    format!("`{}` declares binding {} twice", desc.label, b.binding),
                ));
            }
            let visibility = convert::shader_stages(b.stage);
            match b.ty {
                UniformType::UniformBuffer => entries.push(wgpu::BindGroupLayoutEntry {
                    binding: b.binding,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }),
                UniformType::SampledImage => {
                    if desc.binding(b.binding + 1).is_some() {
                        return Err(GfxError::creation(
                            "uniform layout",
                            format!(
                                "`{}` binding {} is taken by the sampler of image {}",
                                desc.label,
                                b.binding + 1,
                                b.binding
                            ),
                        ));
                    }
                    entries.push(wgpu::BindGroupLayoutEntry {
                        binding: b.binding,
                        visibility,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    });
                    entries.push(wgpu::BindGroupLayoutEntry {
                        binding: b.binding + 1,
                        visibility,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    });
                }
            }
        }

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label),
                entries: &entries,
            });
        Ok(self.res.layouts.insert(LayoutEntry {
            layout,
            desc: desc.clone(),
        }))
    }

    fn destroy_uniform_layout(&mut self, layout: UniformLayoutHandle) {
        if self.res.layouts.remove(layout).is_none() {
            log::warn!("destroy of unknown uniform layout {layout:?}");
        }
    }

    fn create_uniform(&mut self, desc: &UniformDesc) -> GfxResult<UniformHandle> {
        let alignment = self.min_uniform_alignment();
        let res = &self.res;
        let layout = res
            .layouts
            .get(desc.layout)
            .ok_or(GfxError::UnknownHandle("uniform layout"))?;

        let mut images = Vec::new();
        let mut entries = Vec::with_capacity(desc.attributes.len() * 2);
        for attr in &desc.attributes {
            let binding = attr.binding();
            let declared = layout.desc.binding(binding).map(|b| b.ty);
            let expected = match attr {
                UniformAttribute::Buffer { .. } => UniformType::UniformBuffer,
                _ => UniformType::SampledImage,
            };
            if declared != Some(expected) {
                return Err(GfxError::creation(
                    "binding set",
                    format!("`{}` binding {binding} is not declared as {expected:?}", desc.label),
                ));
            }

            let (image, sampler) = match *attr {
                UniformAttribute::Buffer {
                    buffer,
                    offset,
                    size,
                    ..
                } => {
                    let buffer = &res
                        .buffers
                        .get(buffer)
                        .ok_or(GfxError::UnknownHandle("buffer"))?
                        .buffer;
                    if offset % alignment != 0 || offset + size > buffer.size() {
                        return Err(GfxError::creation(
                            "binding set",
                            format!("range {offset}+{size} is misaligned or out of bounds"),
                        ));
                    }
                    entries.push(wgpu::BindGroupEntry {
                        binding,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset,
                            size: NonZeroU64::new(size),
                        }),
                    });
                    continue;
                }
                UniformAttribute::Image { image, sampler, .. } => (image, sampler),
                UniformAttribute::SampledAttachment {
                    pass,
                    attachment,
                    sampler,
                    ..
                } => {
                    let image = res
                        .passes
                        .get(pass)
                        .ok_or(GfxError::UnknownHandle("render pass"))?
                        .images
                        .get(attachment)
                        .copied()
                        .flatten()
                        .ok_or_else(|| {
                            GfxError::usage(format!("attachment {attachment} cannot be sampled"))
                        })?;
                    (image, sampler)
                }
            };

            let view = &res
                .images
                .get(image)
                .ok_or(GfxError::UnknownHandle("image"))?
                .view;
            let sampler = res
                .samplers
                .get(sampler)
                .ok_or(GfxError::UnknownHandle("sampler"))?;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
            images.push(image);
        }

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(desc.label),
            layout: &layout.layout,
            entries: &entries,
        });
        Ok(self.res.uniforms.insert(UniformEntry { group, images }))
    }

    fn destroy_uniform(&mut self, uniform: UniformHandle) {
        if self.res.uniforms.remove(uniform).is_none() {
            log::warn!("destroy of unknown binding set {uniform:?}");
        }
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> GfxResult<RenderPassHandle> {
        desc.validate()?;
        for att in &desc.attachments {
            let (usages, role) = match att.kind {
                AttachmentKind::Present => continue,
                AttachmentKind::Color => (
                    wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                    "color attachment",
                ),
                AttachmentKind::DepthStencil => {
                    (wgpu::TextureUsages::RENDER_ATTACHMENT, "depth attachment")
                }
            };
            self.check_format(att.format, usages, role)?;
        }

        let images = self.create_attachments(desc, desc.width, desc.height);
        log::debug!(
            "render pass `{}`: {} attachments, {} subpasses, {}x{}",
            desc.label,
            desc.attachments.len(),
            desc.subpasses.len(),
            desc.width,
            desc.height
        );
        Ok(self.res.passes.insert(PassEntry {
            desc: desc.clone(),
            images,
        }))
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
            .res
            .passes
            .get(pass)
            .ok_or(GfxError::UnknownHandle("render pass"))?;
        if entry.desc.width == width && entry.desc.height == height {
            return Ok(());
        }

        let mut desc = entry.desc.clone();
        for image in entry.images.clone().into_iter().flatten() {
            self.res.images.remove(image);
        }
        desc.width = width;
        desc.height = height;
        let images = self.create_attachments(&desc, width, height);

        if let Some(entry) = self.res.passes.get_mut(pass) {
            entry.desc = desc;
            entry.images = images;
        }
        Ok(())
    }

    fn attachment_image(&self, pass: RenderPassHandle, attachment: usize) -> Option<ImageHandle> {
        self.res.passes.get(pass)?.images.get(attachment).copied().flatten()
    }

    fn destroy_render_pass(&mut self, pass: RenderPassHandle) {
        match self.res.passes.remove(pass) {
            Some(entry) => {
                for image in entry.images.into_iter().flatten() {
                    self.res.images.remove(image);
                }
            }
            None => log::warn!("destroy of unknown render pass {pass:?}"),
        }
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GfxResult<PipelineHandle> {
        let res = &self.res;
        let pass = res
            .passes
            .get(desc.render_pass)
            .ok_or(GfxError::UnknownHandle("render pass"))?;
        let subpass = pass.desc.subpasses.get(desc.subpass as usize).ok_or_else(|| {
            GfxError::creation(
                "pipeline",
                format!("`{}` targets missing subpass {}", desc.label, desc.subpass),
            )
        })?;

        let module = |stage: ShaderStage| {
            desc.shaders
                .iter()
                .filter_map(|s| res.shaders.get(*s))
                .find(|s| s.stage == stage)
                .map(|s| &s.module)
                .ok_or_else(|| {
                    GfxError::creation("pipeline", format!("`{}` has no {stage:?} shader", desc.label))
                })
        };
        let vs = module(ShaderStage::Vertex)?;
        let fs = module(ShaderStage::Fragment)?;

        let bind_group_layouts = desc
            .uniform_layouts
            .iter()
            .map(|h| {
                res.layouts
                    .get(*h)
                    .map(|l| &l.layout)
                    .ok_or(GfxError::UnknownHandle("uniform layout"))
            })
            .collect::<GfxResult<Vec<_>>>()?;

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &bind_group_layouts,
                immediate_size: 0,
            });

        let attributes: Vec<wgpu::VertexAttribute> = desc
            .vertex_layout
            .iter()
            .flat_map(|l| l.attributes.iter())
            .map(|a| wgpu::VertexAttribute {
                format: convert::vertex_format(a.format),
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = desc
            .vertex_layout
            .iter()
            .map(|l| wgpu::VertexBufferLayout {
                array_stride: l.stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            })
            .collect();

        let surface_format = self.config.format;
        let targets: Vec<Option<wgpu::ColorTargetState>> = subpass
            .colors
            .iter()
            .map(|&a| {
                Some(wgpu::ColorTargetState {
                    format: convert::texture_format(pass.desc.attachments[a].format, surface_format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = subpass.depth_stencil.map(|a| wgpu::DepthStencilState {
            format: convert::texture_format(pass.desc.attachments[a].format, surface_format),
            depth_write_enabled: desc.depth_test,
            depth_compare: if desc.depth_test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: vs,
                    entry_point: Some(ShaderStage::Vertex.entry_point()),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: fs,
                    entry_point: Some(ShaderStage::Fragment.entry_point()),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                primitive: wgpu::PrimitiveState {
                    topology: convert::topology(desc.topology),
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });

        Ok(self.res.pipelines.insert(PipelineEntry {
            pipeline,
            pass: desc.render_pass,
            subpass: desc.subpass,
        }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.res.pipelines.remove(pipeline).is_none() {
            log::warn!("destroy of unknown pipeline {pipeline:?}");
        }
    }

    fn begin_frame(&mut self) -> GfxResult<bool> {
        if self.frame.is_some() {
            return Err(GfxError::usage("begin_frame while a frame is open"));
        }
        if self.config.width == 0 || self.config.height == 0 {
            return Ok(false);
        }

        let surface_texture = match self.surface.get_current_texture() {
            Ok(t) => t,
            Err(err) => {
                log::debug!("surface acquire failed: {err:?}");
                return match surface::map_surface_error(
                    &self.surface,
                    &self.device,
                    &self.config,
                    err,
                ) {
                    SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame => Ok(false),
                    SurfaceErrorAction::Fatal => Err(GfxError::SurfaceOutOfMemory),
                };
            }
        };

        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prism frame encoder"),
            });

        self.frame = Some(Frame {
            surface_texture,
            view,
            encoder,
            pass: None,
        });
        Ok(true)
    }

    fn begin_render_pass(&mut self, pass: RenderPassHandle, region: Region) -> GfxResult<()> {
        if !self.res.passes.contains_key(pass) {
            return Err(GfxError::UnknownHandle("render pass"));
        }
        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| GfxError::usage("begin_render_pass outside an open frame"))?;
        if frame.pass.is_some() {
            return Err(GfxError::usage("render passes cannot nest"));
        }
        frame.pass = Some(PendingPass::new(pass, region));
        Ok(())
    }

    fn apply_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()> {
        let (pass, subpass) = {
            let p = self.pending()?;
            (p.pass, p.current_subpass())
        };
        let entry = self
            .res
            .pipelines
            .get(pipeline)
            .ok_or(GfxError::UnknownHandle("pipeline"))?;
        if entry.pass != pass || entry.subpass != subpass {
            return Err(GfxError::usage(format!(
                "pipeline for subpass {} applied in subpass {subpass}",
                entry.subpass
            )));
        }
        let pending = self.pending()?;
        pending.record(RenderCommand::SetPipeline(pipeline));
        pending.pipeline_applied = true;
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) -> GfxResult<()> {
        if !self.res.buffers.contains_key(buffer) {
            return Err(GfxError::UnknownHandle("buffer"));
        }
        self.pending()?
            .record(RenderCommand::SetVertexBuffer { buffer, offset });
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        ty: IndexType,
    ) -> GfxResult<()> {
        if !self.res.buffers.contains_key(buffer) {
            return Err(GfxError::UnknownHandle("buffer"));
        }
        self.pending()?
            .record(RenderCommand::SetIndexBuffer { buffer, offset, ty });
        Ok(())
    }

    fn bind_uniform(&mut self, uniform: UniformHandle, slot: u32) -> GfxResult<()> {
        let entry = self
            .res
            .uniforms
            .get(uniform)
            .ok_or(GfxError::UnknownHandle("binding set"))?;
        if entry.images.iter().any(|i| !self.res.images.contains_key(*i)) {
            return Err(GfxError::StaleBinding);
        }
        self.pending()?
            .record(RenderCommand::SetBindGroup { slot, uniform });
        Ok(())
    }

    fn set_viewport(&mut self, region: Region) -> GfxResult<()> {
        self.pending()?.record(RenderCommand::SetViewport(region));
        Ok(())
    }

    fn set_scissor(&mut self, region: Region) -> GfxResult<()> {
        self.pending()?.record(RenderCommand::SetScissor(region));
        Ok(())
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GfxResult<()> {
        let pending = self.pending()?;
        if !pending.pipeline_applied {
            return Err(GfxError::usage("draw without an applied pipeline"));
        }
        pending.record(RenderCommand::Draw {
            vertices: first_vertex..first_vertex + vertex_count,
            instances: first_instance..first_instance + instance_count,
        });
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    ) -> GfxResult<()> {
        let pending = self.pending()?;
        if !pending.pipeline_applied {
            return Err(GfxError::usage("draw without an applied pipeline"));
        }
        pending.record(RenderCommand::DrawIndexed {
            indices: first_index..first_index + index_count,
            instances: 0..instance_count,
        });
        Ok(())
    }

    fn next_subpass(&mut self) -> GfxResult<()> {
        let (pass, current) = {
            let p = self.pending()?;
            (p.pass, p.current_subpass())
        };
        if current + 1 >= self.subpass_count(pass) {
            return Err(GfxError::usage(format!("no subpass after {current}")));
        }
        self.pending()?.advance();
        Ok(())
    }

    fn end_render_pass(&mut self) -> GfxResult<()> {
        let (pass, current) = {
            let p = self.pending()?;
            (p.pass, p.current_subpass())
        };
        let count = self.subpass_count(pass);
        if current + 1 != count {
            return Err(GfxError::usage(format!(
                "render pass ended in subpass {current} of {count}"
            )));
        }

        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| GfxError::usage("end_render_pass outside a frame"))?;
        let Some(pending) = frame.pass.take() else {
            return Err(GfxError::usage("end_render_pass without a render pass"));
        };
        pass::replay(&mut frame.encoder, &pending, &frame.view, &self.res)
    }

    fn end_frame(&mut self) -> GfxResult<()> {
        let Some(frame) = self.frame.take() else {
            return Err(GfxError::usage("end_frame without an open frame"));
        };
        if frame.pass.is_some() {
            self.frame = Some(frame);
            return Err(GfxError::usage("end_frame inside a render pass"));
        }

        let Frame {
            surface_texture,
            view,
            encoder,
            ..
        } = frame;
        self.queue.submit(std::iter::once(encoder.finish()));
        drop(view);
        surface_texture.present();
        Ok(())
    }

    fn abandon_frame(&mut self) {
        if self.frame.take().is_some() {
            log::debug!("frame abandoned without submit");
        }
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        surface::apply_resize(&self.surface, &self.device, &mut self.config, width, height);
    }

    fn wait_idle(&mut self) {
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            log::warn!("device poll failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::scene;

    fn shipped(name: &str) -> String {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../prism-viewer/assets")
            .join(name);
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn shipped_shaders_validate() {
        for (name, stage) in [
            (scene::GEOMETRY_VERTEX_SHADER, ShaderStage::Vertex),
            (scene::GEOMETRY_FRAGMENT_SHADER, ShaderStage::Fragment),
            (scene::COMPOSITE_VERTEX_SHADER, ShaderStage::Vertex),
            (scene::COMPOSITE_FRAGMENT_SHADER, ShaderStage::Fragment),
        ] {
            let source = shipped(name);
            let desc = ShaderDesc {
                name,
                stage,
                source: &source,
            };
            if let Err(e) = WgpuBackend::validate_wgsl(&desc) {
                panic!("{e}");
            }
        }
    }

    #[test]
    fn syntax_error_carries_diagnostic() {
        let desc = ShaderDesc {
            name: "broken.wgsl",
            stage: ShaderStage::Vertex,
            source: "fn vs_main( {",
        };
        match WgpuBackend::validate_wgsl(&desc) {
            Err(GfxError::Shader { name, diagnostic }) => {
                assert_eq!(name, "broken.wgsl");
                assert!(!diagnostic.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wrong_stage_is_rejected() {
        let source = shipped(scene::COMPOSITE_FRAGMENT_SHADER);
        let desc = ShaderDesc {
            name: scene::COMPOSITE_FRAGMENT_SHADER,
            stage: ShaderStage::Vertex,
            source: &source,
        };
        assert!(WgpuBackend::validate_wgsl(&desc).is_err());
    }
}
