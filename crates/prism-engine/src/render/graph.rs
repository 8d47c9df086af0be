use crate::gfx::{
    Access, AttachmentDesc, AttachmentKind, Backend, ClearValue, DependencyDesc, Format,
    GfxResult, ImageHandle, LoadAction, PipelineStage, RenderPassDesc, RenderPassHandle,
    StoreAction, SubpassDesc,
};

use super::registry::ResourceRegistry;
use super::resize::SurfaceExtent;

/// Presentable surface attachment.
pub const PRESENT_ATTACHMENT: usize = 0;
/// Offscreen HDR color written by the geometry subpass.
pub const HDR_ATTACHMENT: usize = 1;
/// Depth/stencil shared by both subpasses.
pub const DEPTH_ATTACHMENT: usize = 2;

pub const GEOMETRY_SUBPASS: u32 = 0;
pub const COMPOSITE_SUBPASS: u32 = 1;

pub const HDR_FORMAT: Format = Format::Rgba16Float;
pub const DEPTH_FORMAT: Format = Format::Depth24PlusStencil8;

/// The two-subpass render pass: geometry into HDR, then composite to the
/// surface.
#[derive(Debug)]
pub struct RenderGraph {
    pass: RenderPassHandle,
    extent: SurfaceExtent,
}

impl RenderGraph {
    /// Attachments, subpasses and the single geometry → composite dependency
    /// for a surface of `extent`.
    pub fn describe(extent: SurfaceExtent) -> RenderPassDesc {
        let attachments = vec![
            AttachmentDesc {
                format: Format::Swapchain,
                kind: AttachmentKind::Present,
                load: LoadAction::Clear,
                store: StoreAction::Store,
                clear: ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
            },
            AttachmentDesc {
                format: HDR_FORMAT,
                kind: AttachmentKind::Color,
                load: LoadAction::Clear,
                store: StoreAction::DontCare,
                clear: ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
            },
            AttachmentDesc {
                format: DEPTH_FORMAT,
                kind: AttachmentKind::DepthStencil,
                load: LoadAction::Clear,
                store: StoreAction::DontCare,
                clear: ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let subpasses = vec![
            SubpassDesc {
                colors: vec![HDR_ATTACHMENT],
                inputs: Vec::new(),
                depth_stencil: Some(DEPTH_ATTACHMENT),
            },
            SubpassDesc {
                colors: vec![PRESENT_ATTACHMENT],
                inputs: vec![HDR_ATTACHMENT],
                depth_stencil: Some(DEPTH_ATTACHMENT),
            },
        ];

        let dependencies = vec![DependencyDesc {
            src_subpass: GEOMETRY_SUBPASS,
            dst_subpass: COMPOSITE_SUBPASS,
            src_stage: PipelineStage::ColorAttachmentOutput,
            dst_stage: PipelineStage::FragmentShader,
            src_access: Access::ColorAttachmentWrite,
            dst_access: Access::ShaderRead,
        }];

        RenderPassDesc {
            label: "hdr composite pass",
            width: extent.width,
            height: extent.height,
            attachments,
            subpasses,
            dependencies,
        }
    }

    /// Creates the render pass. Failure is fatal; there is no fallback graph.
    pub fn build<B: Backend>(
        registry: &mut ResourceRegistry<B>,
        extent: SurfaceExtent,
    ) -> GfxResult<Self> {
        let pass = registry.create_render_pass(&Self::describe(extent))?;
        log::debug!("render graph built at {}x{}", extent.width, extent.height);
        Ok(Self { pass, extent })
    }

    /// Resizes the attachments of the existing render pass. The pass handle
    /// is kept; resized attachments get new images.
    pub fn resize<B: Backend>(
        &mut self,
        registry: &mut ResourceRegistry<B>,
        extent: SurfaceExtent,
    ) -> GfxResult<()> {
        registry
            .backend_mut()
            .resize_render_pass(self.pass, extent.width, extent.height)?;
        self.extent = extent;
        Ok(())
    }

    pub fn pass(&self) -> RenderPassHandle {
        self.pass
    }

    pub fn extent(&self) -> SurfaceExtent {
        self.extent
    }

    /// Image currently backing the HDR attachment.
    pub fn hdr_image<B: Backend>(&self, registry: &ResourceRegistry<B>) -> Option<ImageHandle> {
        registry.backend().attachment_image(self.pass, HDR_ATTACHMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessBackend;

    #[test]
    fn describes_three_attachments_two_subpasses_one_dependency() {
        let desc = RenderGraph::describe(SurfaceExtent::new(800, 600));
        assert_eq!(desc.attachments.len(), 3);
        assert_eq!(desc.subpasses.len(), 2);
        assert_eq!(desc.dependencies.len(), 1);
        assert!(desc.validate().is_ok());

        let dep = desc.dependencies[0];
        assert_eq!((dep.src_subpass, dep.dst_subpass), (0, 1));
        assert_eq!(dep.src_stage, PipelineStage::ColorAttachmentOutput);
        assert_eq!(dep.dst_access, Access::ShaderRead);
    }

    #[test]
    fn hdr_attachment_is_never_stored() {
        let desc = RenderGraph::describe(SurfaceExtent::new(800, 600));
        assert_eq!(desc.attachments[HDR_ATTACHMENT].store, StoreAction::DontCare);
        assert_eq!(desc.attachments[PRESENT_ATTACHMENT].store, StoreAction::Store);
        assert_eq!(desc.subpasses[1].inputs, [HDR_ATTACHMENT]);
    }

    #[test]
    fn same_size_resize_keeps_handles_and_object_count() {
        let mut backend = HeadlessBackend::new(800, 600);
        {
            let mut registry = ResourceRegistry::new(&mut backend);
            let extent = SurfaceExtent::new(800, 600);
            let mut graph = RenderGraph::build(&mut registry, extent).unwrap();
            let hdr = graph.hdr_image(&registry);
            let live = registry.backend().live_objects();

            graph.resize(&mut registry, extent).unwrap();
            graph.resize(&mut registry, extent).unwrap();

            assert_eq!(graph.hdr_image(&registry), hdr);
            assert_eq!(registry.backend().live_objects(), live);
            let hdr = hdr.unwrap();
            assert_eq!(registry.backend().image_size(hdr), Some((800, 600)));
        }
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn unsupported_hdr_format_is_fatal() {
        let mut backend = HeadlessBackend::new(800, 600);
        backend.reject_format(HDR_FORMAT);
        let mut registry = ResourceRegistry::new(&mut backend);
        let err = RenderGraph::build(&mut registry, SurfaceExtent::new(800, 600)).unwrap_err();
        assert!(matches!(err, crate::gfx::GfxError::UnsupportedFormat(HDR_FORMAT, _)));
    }
}
