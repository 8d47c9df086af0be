//! Backend-neutral descriptors.
//!
//! Descriptors are plain data. Backends translate them into native objects and
//! never retain references to them.

use super::error::{GfxError, GfxResult};
use super::handle::{
    BufferHandle, ImageHandle, RenderPassHandle, SamplerHandle, ShaderHandle, UniformLayoutHandle,
};

// ── formats ───────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    /// Whatever format the presentation surface was configured with.
    Swapchain,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    Depth24PlusStencil8,
    Depth32Float,
}

impl Format {
    pub fn is_depth(self) -> bool {
        matches!(self, Format::Depth24PlusStencil8 | Format::Depth32Float)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::Depth24PlusStencil8)
    }

    /// Bytes per texel for formats that can be uploaded from the CPU.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            Format::Rgba8Unorm | Format::Rgba8UnormSrgb => Some(4),
            Format::Rgba16Float => Some(8),
            Format::Swapchain | Format::Depth24PlusStencil8 | Format::Depth32Float => None,
        }
    }
}

// ── buffers / images / samplers ───────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferStorage {
    /// Written once after creation.
    Static,
    /// Rewritten every frame.
    Dynamic,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub storage: BufferStorage,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageDesc {
    pub label: &'static str,
    pub format: Format,
    pub width: u32,
    pub height: u32,
}

impl ImageDesc {
    /// Size in bytes of a tightly packed upload for this image.
    pub fn byte_len(&self) -> Option<u64> {
        let bpp = self.format.bytes_per_pixel()?;
        Some(self.width as u64 * self.height as u64 * bpp as u64)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WrapMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub label: &'static str,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            label: "sampler",
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            wrap_u: WrapMode::ClampToEdge,
            wrap_v: WrapMode::ClampToEdge,
        }
    }
}

// ── shaders ───────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Entry point name expected in a module of this stage.
    pub fn entry_point(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs_main",
            ShaderStage::Fragment => "fs_main",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderDesc<'a> {
    pub name: &'a str,
    pub stage: ShaderStage,
    pub source: &'a str,
}

// ── binding sets ──────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UniformType {
    UniformBuffer,
    /// Combined image + sampler.
    SampledImage,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UniformBinding {
    pub binding: u32,
    pub ty: UniformType,
    pub stage: ShaderStage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformLayoutDesc {
    pub label: &'static str,
    pub bindings: Vec<UniformBinding>,
}

impl UniformLayoutDesc {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            bindings: Vec::new(),
        }
    }

    pub fn with_binding(mut self, binding: u32, ty: UniformType, stage: ShaderStage) -> Self {
        self.bindings.push(UniformBinding { binding, ty, stage });
        self
    }

    pub fn binding(&self, binding: u32) -> Option<&UniformBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformAttribute {
    Buffer {
        binding: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Image {
        binding: u32,
        image: ImageHandle,
        sampler: SamplerHandle,
    },
    /// Samples one attachment of a render pass. The backend resolves the
    /// attachment's current image when the binding set is created.
    SampledAttachment {
        binding: u32,
        pass: RenderPassHandle,
        attachment: usize,
        sampler: SamplerHandle,
    },
}

impl UniformAttribute {
    pub fn binding(&self) -> u32 {
        match *self {
            UniformAttribute::Buffer { binding, .. }
            | UniformAttribute::Image { binding, .. }
            | UniformAttribute::SampledAttachment { binding, .. } => binding,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformDesc {
    pub label: &'static str,
    pub layout: UniformLayoutHandle,
    pub attributes: Vec<UniformAttribute>,
}

impl UniformDesc {
    pub fn new(label: &'static str, layout: UniformLayoutHandle) -> Self {
        Self {
            label,
            layout,
            attributes: Vec::new(),
        }
    }

    pub fn with_buffer(mut self, binding: u32, buffer: BufferHandle, offset: u64, size: u64) -> Self {
        self.attributes.push(UniformAttribute::Buffer {
            binding,
            buffer,
            offset,
            size,
        });
        self
    }

    pub fn with_image(mut self, binding: u32, image: ImageHandle, sampler: SamplerHandle) -> Self {
        self.attributes.push(UniformAttribute::Image {
            binding,
            image,
            sampler,
        });
        self
    }

    pub fn with_sampled_attachment(
        mut self,
        binding: u32,
        pass: RenderPassHandle,
        attachment: usize,
        sampler: SamplerHandle,
    ) -> Self {
        self.attributes.push(UniformAttribute::SampledAttachment {
            binding,
            pass,
            attachment,
            sampler,
        });
        self
    }
}

// ── render passes ─────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AttachmentKind {
    Present,
    Color,
    DepthStencil,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadAction {
    Clear,
    Load,
    DontCare,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreAction {
    Store,
    DontCare,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDesc {
    pub format: Format,
    pub kind: AttachmentKind,
    pub load: LoadAction,
    pub store: StoreAction,
    pub clear: ClearValue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpassDesc {
    pub colors: Vec<usize>,
    pub inputs: Vec<usize>,
    pub depth_stencil: Option<usize>,
}

impl SubpassDesc {
    /// Attachments written or tested by this subpass (inputs excluded).
    pub fn targets(&self) -> impl Iterator<Item = usize> + '_ {
        self.colors.iter().copied().chain(self.depth_stencil)
    }

    /// Every attachment this subpass touches, inputs included.
    pub fn references(&self, attachment: usize) -> bool {
        self.colors.contains(&attachment)
            || self.inputs.contains(&attachment)
            || self.depth_stencil == Some(attachment)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PipelineStage {
    TopOfPipe,
    VertexShader,
    FragmentShader,
    EarlyFragmentTests,
    ColorAttachmentOutput,
    BottomOfPipe,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    None,
    ShaderRead,
    InputAttachmentRead,
    ColorAttachmentWrite,
    DepthStencilAttachmentWrite,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DependencyDesc {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub src_access: Access,
    pub dst_access: Access,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<DependencyDesc>,
}

impl RenderPassDesc {
    /// Structural checks shared by every backend.
    pub fn validate(&self) -> GfxResult<()> {
        let fail = |reason: String| -> GfxResult<()> {
            Err(GfxError::creation("render pass", reason))
        };

        if self.width == 0 || self.height == 0 {
            return fail(format!("zero-sized extent {}x{}", self.width, self.height));
        }
        if self.subpasses.is_empty() {
            return fail("no subpasses".into());
        }

        let count = self.attachments.len();
        for (i, sp) in self.subpasses.iter().enumerate() {
            for a in sp.colors.iter().chain(&sp.inputs).chain(&sp.depth_stencil) {
                if *a >= count {
                    return fail(format!("subpass {i} references attachment {a} of {count}"));
                }
            }
            for &c in &sp.colors {
                if self.attachments[c].kind == AttachmentKind::DepthStencil {
                    return fail(format!("subpass {i} uses depth attachment {c} as color"));
                }
            }
            if let Some(d) = sp.depth_stencil {
                if self.attachments[d].kind != AttachmentKind::DepthStencil {
                    return fail(format!("subpass {i} uses attachment {d} as depth"));
                }
            }
            for &input in &sp.inputs {
                if sp.targets().any(|t| t == input) {
                    return fail(format!("subpass {i} reads and writes attachment {input}"));
                }
            }
        }

        let subpasses = self.subpasses.len() as u32;
        for dep in &self.dependencies {
            if dep.src_subpass >= subpasses || dep.dst_subpass >= subpasses {
                return fail(format!(
                    "dependency {} -> {} is out of range",
                    dep.src_subpass, dep.dst_subpass
                ));
            }
            if dep.src_subpass >= dep.dst_subpass {
                return fail(format!(
                    "dependency {} -> {} does not point forward",
                    dep.src_subpass, dep.dst_subpass
                ));
            }
        }

        Ok(())
    }

    /// Whether any subpass after `subpass` touches `attachment`.
    pub fn used_after(&self, subpass: usize, attachment: usize) -> bool {
        self.subpasses
            .iter()
            .skip(subpass + 1)
            .any(|sp| sp.references(attachment))
    }

    /// Whether any subpass before `subpass` touches `attachment`.
    pub fn used_before(&self, subpass: usize, attachment: usize) -> bool {
        self.subpasses
            .iter()
            .take(subpass)
            .any(|sp| sp.references(attachment))
    }
}

// ── pipelines ─────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Topology {
    TriangleList,
    TriangleStrip,
    LineList,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(self) -> u64 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u64,
    pub format: VertexFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    pub label: &'static str,
    pub topology: Topology,
    pub shaders: Vec<ShaderHandle>,
    pub vertex_layout: Option<VertexLayout>,
    pub uniform_layouts: Vec<UniformLayoutHandle>,
    pub render_pass: RenderPassHandle,
    pub subpass: u32,
    pub depth_test: bool,
}

// ── per-frame ─────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IndexType {
    U16,
    U32,
}

/// Pixel rectangle used for render areas, viewports and scissors.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    #[inline]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(kind: AttachmentKind) -> AttachmentDesc {
        AttachmentDesc {
            format: if kind == AttachmentKind::DepthStencil {
                Format::Depth24PlusStencil8
            } else {
                Format::Rgba16Float
            },
            kind,
            load: LoadAction::Clear,
            store: StoreAction::Store,
            clear: ClearValue::Color([0.0; 4]),
        }
    }

    fn pass(subpasses: Vec<SubpassDesc>) -> RenderPassDesc {
        RenderPassDesc {
            label: "test",
            width: 4,
            height: 4,
            attachments: vec![
                color(AttachmentKind::Present),
                color(AttachmentKind::Color),
                color(AttachmentKind::DepthStencil),
            ],
            subpasses,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn out_of_range_attachment_is_rejected() {
        let desc = pass(vec![SubpassDesc {
            colors: vec![3],
            ..Default::default()
        }]);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn depth_attachment_as_color_is_rejected() {
        let desc = pass(vec![SubpassDesc {
            colors: vec![2],
            ..Default::default()
        }]);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn backward_dependency_is_rejected() {
        let mut desc = pass(vec![SubpassDesc::default(), SubpassDesc::default()]);
        desc.dependencies.push(DependencyDesc {
            src_subpass: 1,
            dst_subpass: 0,
            src_stage: PipelineStage::ColorAttachmentOutput,
            dst_stage: PipelineStage::FragmentShader,
            src_access: Access::ColorAttachmentWrite,
            dst_access: Access::ShaderRead,
        });
        assert!(desc.validate().is_err());
    }

    #[test]
    fn used_before_and_after() {
        let desc = pass(vec![
            SubpassDesc {
                colors: vec![1],
                depth_stencil: Some(2),
                ..Default::default()
            },
            SubpassDesc {
                colors: vec![0],
                inputs: vec![1],
                depth_stencil: Some(2),
            },
        ]);
        assert!(desc.validate().is_ok());
        assert!(desc.used_after(0, 1));
        assert!(!desc.used_after(1, 1));
        assert!(!desc.used_before(0, 2));
        assert!(desc.used_before(1, 2));
        assert!(!desc.used_before(1, 0));
    }

    #[test]
    fn image_byte_len() {
        let desc = ImageDesc {
            label: "albedo",
            format: Format::Rgba8UnormSrgb,
            width: 3,
            height: 2,
        };
        assert_eq!(desc.byte_len(), Some(24));
    }
}
