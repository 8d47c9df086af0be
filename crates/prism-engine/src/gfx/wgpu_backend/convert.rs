//! Descriptor → wgpu conversions.

use crate::gfx::{
    BufferUsage, ClearValue, FilterMode, Format, IndexType, LoadAction, ShaderStage, StoreAction,
    Topology, VertexFormat, WrapMode,
};

pub(super) fn texture_format(format: Format, surface: wgpu::TextureFormat) -> wgpu::TextureFormat {
    match format {
        Format::Swapchain => surface,
        Format::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        Format::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        Format::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        Format::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        Format::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

pub(super) fn buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let base = match usage {
        BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
        BufferUsage::Index => wgpu::BufferUsages::INDEX,
        BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM,
    };
    base | wgpu::BufferUsages::COPY_DST
}

pub(super) fn shader_stages(stage: ShaderStage) -> wgpu::ShaderStages {
    match stage {
        ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
        ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
    }
}

pub(super) fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

pub(super) fn filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub(super) fn address_mode(mode: WrapMode) -> wgpu::AddressMode {
    match mode {
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

pub(super) fn topology(topology: Topology) -> wgpu::PrimitiveTopology {
    match topology {
        Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        Topology::LineList => wgpu::PrimitiveTopology::LineList,
    }
}

pub(super) fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

pub(super) fn index_format(ty: IndexType) -> wgpu::IndexFormat {
    match ty {
        IndexType::U16 => wgpu::IndexFormat::Uint16,
        IndexType::U32 => wgpu::IndexFormat::Uint32,
    }
}

/// Load op for the first subpass that touches an attachment. wgpu has no
/// "don't care" load, so that case clears as well.
pub(super) fn color_load(load: LoadAction, clear: ClearValue) -> wgpu::LoadOp<wgpu::Color> {
    match (load, clear) {
        (LoadAction::Load, _) => wgpu::LoadOp::Load,
        (_, ClearValue::Color([r, g, b, a])) => wgpu::LoadOp::Clear(wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        }),
        (_, ClearValue::DepthStencil { .. }) => wgpu::LoadOp::Clear(wgpu::Color::BLACK),
    }
}

pub(super) fn depth_load(load: LoadAction, clear: ClearValue) -> (wgpu::LoadOp<f32>, wgpu::LoadOp<u32>) {
    match (load, clear) {
        (LoadAction::Load, _) => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
        (_, ClearValue::DepthStencil { depth, stencil }) => {
            (wgpu::LoadOp::Clear(depth), wgpu::LoadOp::Clear(stencil))
        }
        (_, ClearValue::Color(_)) => (wgpu::LoadOp::Clear(1.0), wgpu::LoadOp::Clear(0)),
    }
}

pub(super) fn store(store: StoreAction) -> wgpu::StoreOp {
    match store {
        StoreAction::Store => wgpu::StoreOp::Store,
        StoreAction::DontCare => wgpu::StoreOp::Discard,
    }
}
