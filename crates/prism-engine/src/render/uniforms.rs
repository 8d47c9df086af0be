use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::gfx::{
    Backend, BufferDesc, BufferHandle, BufferStorage, BufferUsage, GfxError, GfxResult,
    ImageHandle, SamplerDesc, SamplerHandle, ShaderStage, UniformDesc, UniformHandle,
    UniformLayoutDesc, UniformLayoutHandle, UniformType,
};
use crate::scene;

use super::graph::{RenderGraph, HDR_ATTACHMENT};
use super::registry::ResourceRegistry;
use super::resize::SurfaceExtent;

/// Scene layout: transform block (vertex).
pub const TRANSFORM_BINDING: u32 = 0;
/// Scene layout: time scalar (vertex).
pub const TIME_BINDING: u32 = 1;
/// Scene layout: albedo texture + sampler (fragment).
pub const ALBEDO_BINDING: u32 = 2;
/// Composite layout: HDR attachment + sampler (fragment).
pub const HDR_BINDING: u32 = 0;

/// Model, view and projection matrices, column-major.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct TransformBlock {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

/// Per-frame values written before the frame's draws.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameUniforms {
    pub transform: TransformBlock,
    pub time: f32,
}

impl FrameUniforms {
    /// Camera and model transforms for `elapsed` seconds on a surface of
    /// `extent`.
    pub fn at(elapsed: f32, extent: SurfaceExtent) -> Self {
        let cols = |m: Mat4| m.to_cols_array_2d();
        Self {
            transform: TransformBlock {
                model: cols(scene::model_matrix(elapsed)),
                view: cols(scene::view_matrix()),
                proj: cols(scene::projection_matrix(extent.aspect())),
            },
            time: elapsed,
        }
    }
}

/// Rounds `size` up to a multiple of `alignment` (a power of two).
#[inline]
pub fn align_to(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// Placement of the two regions inside the shared uniform buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UniformRegions {
    pub transform_offset: u64,
    pub transform_size: u64,
    pub time_offset: u64,
    pub time_size: u64,
    pub total_size: u64,
}

impl UniformRegions {
    pub fn new(alignment: u64) -> Self {
        let transform_size = std::mem::size_of::<TransformBlock>() as u64;
        let time_size = std::mem::size_of::<f32>() as u64;
        let time_offset = align_to(transform_size, alignment);
        Self {
            transform_offset: 0,
            transform_size,
            time_offset,
            time_size,
            total_size: time_offset + align_to(time_size, alignment),
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct CompositeBinding {
    set: UniformHandle,
    /// HDR image the set was built against.
    source: Option<ImageHandle>,
}

/// Frame uniform buffer, shared sampler, binding-set layouts and the two
/// binding sets.
#[derive(Debug)]
pub struct UniformResources {
    buffer: BufferHandle,
    regions: UniformRegions,
    sampler: SamplerHandle,
    scene_layout: UniformLayoutHandle,
    composite_layout: UniformLayoutHandle,
    scene_set: Option<UniformHandle>,
    composite: Option<CompositeBinding>,
}

impl UniformResources {
    /// Allocates the uniform buffer, the linear clamp sampler and both
    /// layouts. Binding sets come later, once their images exist.
    pub fn new<B: Backend>(registry: &mut ResourceRegistry<B>) -> GfxResult<Self> {
        let regions = UniformRegions::new(registry.backend().min_uniform_alignment());
        log::debug!(
            "uniforms: transform @0, time @{}, {} bytes",
            regions.time_offset,
            regions.total_size
        );

        let buffer = registry.create_buffer(&BufferDesc {
            label: "frame uniforms",
            size: regions.total_size,
            storage: BufferStorage::Dynamic,
            usage: BufferUsage::Uniform,
        })?;

        let sampler = registry.create_sampler(&SamplerDesc {
            label: "linear clamp",
            ..Default::default()
        })?;

        let scene_layout = registry.create_uniform_layout(
            &UniformLayoutDesc::new("scene layout")
                .with_binding(TRANSFORM_BINDING, UniformType::UniformBuffer, ShaderStage::Vertex)
                .with_binding(TIME_BINDING, UniformType::UniformBuffer, ShaderStage::Vertex)
                .with_binding(ALBEDO_BINDING, UniformType::SampledImage, ShaderStage::Fragment),
        )?;

        let composite_layout = registry.create_uniform_layout(
            &UniformLayoutDesc::new("composite layout").with_binding(
                HDR_BINDING,
                UniformType::SampledImage,
                ShaderStage::Fragment,
            ),
        )?;

        Ok(Self {
            buffer,
            regions,
            sampler,
            scene_layout,
            composite_layout,
            scene_set: None,
            composite: None,
        })
    }

    pub fn regions(&self) -> UniformRegions {
        self.regions
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn scene_layout(&self) -> UniformLayoutHandle {
        self.scene_layout
    }

    pub fn composite_layout(&self) -> UniformLayoutHandle {
        self.composite_layout
    }

    /// Creates the scene binding set: both buffer regions and `albedo`.
    pub fn bind_scene<B: Backend>(
        &mut self,
        registry: &mut ResourceRegistry<B>,
        albedo: ImageHandle,
    ) -> GfxResult<()> {
        let r = self.regions;
        let set = registry.create_uniform(
            &UniformDesc::new("scene set", self.scene_layout)
                .with_buffer(TRANSFORM_BINDING, self.buffer, r.transform_offset, r.transform_size)
                .with_buffer(TIME_BINDING, self.buffer, r.time_offset, r.time_size)
                .with_image(ALBEDO_BINDING, albedo, self.sampler),
        )?;
        self.scene_set = Some(set);
        Ok(())
    }

    /// Current composite set, whether or not it is still current.
    pub fn composite_handle(&self) -> Option<UniformHandle> {
        self.composite.map(|c| c.set)
    }

    pub fn scene_set(&self) -> GfxResult<UniformHandle> {
        self.scene_set
            .ok_or_else(|| GfxError::usage("scene binding set has not been created"))
    }

    /// Composite binding set, refusing one that samples a replaced image.
    pub fn composite_set<B: Backend>(
        &self,
        registry: &ResourceRegistry<B>,
        graph: &RenderGraph,
    ) -> GfxResult<UniformHandle> {
        match self.composite {
            Some(c) if self.is_composite_current(registry, graph) => Ok(c.set),
            Some(_) => Err(GfxError::StaleBinding),
            None => Err(GfxError::usage("composite binding set has not been created")),
        }
    }

    /// Whether the composite set samples the image currently backing the HDR
    /// attachment.
    pub fn is_composite_current<B: Backend>(
        &self,
        registry: &ResourceRegistry<B>,
        graph: &RenderGraph,
    ) -> bool {
        match (self.composite, graph.hdr_image(registry)) {
            (Some(c), Some(current)) => c.source == Some(current),
            _ => false,
        }
    }

    /// Destroys the composite set (if any) and creates one on the current HDR
    /// attachment image. The backend must be idle.
    pub fn rebuild_composite<B: Backend>(
        &mut self,
        registry: &mut ResourceRegistry<B>,
        graph: &RenderGraph,
    ) -> GfxResult<()> {
        if let Some(old) = self.composite.take() {
            registry.destroy_uniform(old.set);
        }
        let set = registry.create_uniform(
            &UniformDesc::new("composite set", self.composite_layout).with_sampled_attachment(
                HDR_BINDING,
                graph.pass(),
                HDR_ATTACHMENT,
                self.sampler,
            ),
        )?;
        self.composite = Some(CompositeBinding {
            set,
            source: graph.hdr_image(registry),
        });
        Ok(())
    }

    /// Writes both regions of the frame uniform buffer.
    pub fn update<B: Backend>(
        &self,
        registry: &mut ResourceRegistry<B>,
        frame: &FrameUniforms,
    ) -> GfxResult<()> {
        let backend = registry.backend_mut();
        backend.update_buffer(
            self.buffer,
            self.regions.transform_offset,
            bytemuck::bytes_of(&frame.transform),
        )?;
        backend.update_buffer(
            self.buffer,
            self.regions.time_offset,
            bytemuck::bytes_of(&frame.time),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessBackend;

    #[test]
    fn regions_are_aligned_and_disjoint() {
        for alignment in [1, 4, 16, 64, 256] {
            let r = UniformRegions::new(alignment);
            assert_eq!(r.time_offset % alignment, 0, "alignment {alignment}");
            assert_eq!(r.time_offset, align_to(192, alignment));
            assert!(r.transform_offset + r.transform_size <= r.time_offset);
            assert!(r.time_offset + r.time_size <= r.total_size);
            assert_eq!(r.total_size, align_to(192, alignment) + align_to(4, alignment));
        }
    }

    #[test]
    fn wgpu_default_alignment() {
        let r = UniformRegions::new(256);
        assert_eq!((r.time_offset, r.total_size), (256, 512));
    }

    #[test]
    fn transform_block_is_three_matrices() {
        assert_eq!(std::mem::size_of::<TransformBlock>(), 192);
    }

    #[test]
    fn update_writes_both_regions() {
        let mut backend = HeadlessBackend::with_alignment(800, 600, 64);
        let (buffer, regions) = {
            let mut registry = ResourceRegistry::new(&mut backend);
            let uniforms = UniformResources::new(&mut registry).unwrap();
            let frame = FrameUniforms::at(2.5, SurfaceExtent::new(800, 600));
            uniforms.update(&mut registry, &frame).unwrap();

            let data = registry.backend().buffer_data(uniforms.buffer()).unwrap().to_vec();
            let r = uniforms.regions();
            let time: f32 = bytemuck::pod_read_unaligned(
                &data[r.time_offset as usize..(r.time_offset + 4) as usize],
            );
            assert_eq!(time, 2.5);
            let transform: TransformBlock =
                bytemuck::pod_read_unaligned(&data[..r.transform_size as usize]);
            assert_eq!(transform, frame.transform);
            (uniforms.buffer(), r)
        };
        assert_eq!(regions.time_offset, 192);
        assert!(backend.buffer_data(buffer).is_none());
    }
}
