use anyhow::{Context, Result};

use crate::assets::Assets;
use crate::gfx::{
    Backend, BufferDesc, BufferStorage, BufferUsage, Format, ImageDesc, PipelineDesc,
    ShaderDesc, ShaderHandle, ShaderStage, Topology,
};
use crate::scene::{self, Vertex, INDICES, VERTICES};

use super::frame::{FrameDraws, FrameInputs, FrameLoop, FrameOutcome};
use super::graph::{RenderGraph, COMPOSITE_SUBPASS, GEOMETRY_SUBPASS};
use super::registry::ResourceRegistry;
use super::resize::{self, ResizeOutcome, SurfaceExtent};
use super::uniforms::UniformResources;

/// Format of the decoded albedo texture.
const ALBEDO_FORMAT: Format = Format::Rgba8UnormSrgb;

/// The two-pass HDR viewer: owns every GPU resource and drives frames and
/// resizes.
pub struct Viewer<B: Backend> {
    extent: SurfaceExtent,
    draws: FrameDraws,
    graph: RenderGraph,
    uniforms: UniformResources,
    frame_loop: FrameLoop,
    registry: ResourceRegistry<B>,
}

fn load_shader<B: Backend>(
    registry: &mut ResourceRegistry<B>,
    assets: &impl Assets,
    name: &str,
    stage: ShaderStage,
) -> Result<ShaderHandle> {
    let source = assets.shader_source(name)?;
    registry
        .create_shader(&ShaderDesc {
            name,
            stage,
            source: &source,
        })
        .with_context(|| format!("failed to create shader {name}"))
}

impl<B: Backend> Viewer<B> {
    /// Creates every resource the viewer needs for a surface of `extent`.
    ///
    /// On failure, whatever was already created is destroyed before the error
    /// is returned.
    pub fn new(backend: B, assets: &impl Assets, extent: SurfaceExtent) -> Result<Self> {
        let mut registry = ResourceRegistry::new(backend);

        let vertex_buffer = registry
            .create_buffer_with_data(
                &BufferDesc {
                    label: "vertices",
                    size: std::mem::size_of_val(&VERTICES) as u64,
                    storage: BufferStorage::Static,
                    usage: BufferUsage::Vertex,
                },
                bytemuck::cast_slice(&VERTICES),
            )
            .context("failed to create vertex buffer")?;

        let index_buffer = registry
            .create_buffer_with_data(
                &BufferDesc {
                    label: "indices",
                    size: std::mem::size_of_val(&INDICES) as u64,
                    storage: BufferStorage::Static,
                    usage: BufferUsage::Index,
                },
                bytemuck::cast_slice(&INDICES),
            )
            .context("failed to create index buffer")?;

        let mut uniforms =
            UniformResources::new(&mut registry).context("failed to create frame uniforms")?;

        let geometry_vs = load_shader(
            &mut registry,
            assets,
            scene::GEOMETRY_VERTEX_SHADER,
            ShaderStage::Vertex,
        )?;
        let geometry_fs = load_shader(
            &mut registry,
            assets,
            scene::GEOMETRY_FRAGMENT_SHADER,
            ShaderStage::Fragment,
        )?;
        let composite_vs = load_shader(
            &mut registry,
            assets,
            scene::COMPOSITE_VERTEX_SHADER,
            ShaderStage::Vertex,
        )?;
        let composite_fs = load_shader(
            &mut registry,
            assets,
            scene::COMPOSITE_FRAGMENT_SHADER,
            ShaderStage::Fragment,
        )?;

        let graph =
            RenderGraph::build(&mut registry, extent).context("failed to build render graph")?;

        let geometry_pipeline = registry
            .create_pipeline(&PipelineDesc {
                label: "geometry pipeline",
                topology: Topology::TriangleList,
                shaders: vec![geometry_vs, geometry_fs],
                vertex_layout: Some(Vertex::layout()),
                uniform_layouts: vec![uniforms.scene_layout()],
                render_pass: graph.pass(),
                subpass: GEOMETRY_SUBPASS,
                depth_test: true,
            })
            .context("failed to create geometry pipeline")?;

        let composite_pipeline = registry
            .create_pipeline(&PipelineDesc {
                label: "composite pipeline",
                topology: Topology::TriangleList,
                shaders: vec![composite_vs, composite_fs],
                vertex_layout: None,
                uniform_layouts: vec![uniforms.composite_layout()],
                render_pass: graph.pass(),
                subpass: COMPOSITE_SUBPASS,
                depth_test: false,
            })
            .context("failed to create composite pipeline")?;

        let albedo = {
            let decoded = assets.decode_image(scene::ALBEDO_TEXTURE)?;
            decoded.validate(scene::ALBEDO_TEXTURE)?;
            let image = registry
                .create_image(&ImageDesc {
                    label: scene::ALBEDO_TEXTURE,
                    format: ALBEDO_FORMAT,
                    width: decoded.width,
                    height: decoded.height,
                })
                .context("failed to create albedo image")?;
            registry
                .backend_mut()
                .update_image(image, &decoded.pixels)
                .context("failed to upload albedo image")?;
            image
        };

        uniforms
            .bind_scene(&mut registry, albedo)
            .context("failed to create scene binding set")?;
        uniforms
            .rebuild_composite(&mut registry, &graph)
            .context("failed to create composite binding set")?;

        log::info!(
            "viewer ready: {}x{}, {} objects",
            extent.width,
            extent.height,
            registry.len()
        );

        Ok(Self {
            extent,
            draws: FrameDraws {
                vertex_buffer,
                index_buffer,
                index_count: INDICES.len() as u32,
                geometry_pipeline,
                composite_pipeline,
            },
            graph,
            uniforms,
            frame_loop: FrameLoop::new(),
            registry,
        })
    }

    pub fn extent(&self) -> SurfaceExtent {
        self.extent
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn uniforms(&self) -> &UniformResources {
        &self.uniforms
    }

    pub fn frame_loop(&self) -> &FrameLoop {
        &self.frame_loop
    }

    pub fn backend(&self) -> &B {
        self.registry.backend()
    }

    /// Handles a surface-size change. Runs to completion before returning.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<ResizeOutcome> {
        resize::resize_surface(
            &mut self.registry,
            &mut self.graph,
            &mut self.uniforms,
            &mut self.extent,
            SurfaceExtent::new(width, height),
        )
        .with_context(|| format!("failed to resize to {width}x{height}"))
    }

    /// Runs one frame with the animation at `elapsed` seconds.
    pub fn frame(&mut self, elapsed: f32) -> Result<FrameOutcome> {
        let inputs = FrameInputs {
            graph: &self.graph,
            uniforms: &self.uniforms,
            draws: &self.draws,
            extent: self.extent,
            elapsed,
        };
        self.frame_loop
            .run(&mut self.registry, &inputs)
            .context("frame failed")
    }
}

impl<B: Backend> Drop for Viewer<B> {
    fn drop(&mut self) {
        log::info!(
            "viewer: shutting down ({} frames presented, {} skipped)",
            self.frame_loop.presented(),
            self.frame_loop.skipped()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::memory::MemoryAssets;
    use crate::assets::DecodedImage;
    use crate::gfx::headless::{Call, HeadlessBackend};
    use crate::gfx::{GfxError, ImageHandle, UniformHandle};
    use crate::render::frame::FrameState;
    use crate::render::graph::HDR_FORMAT;

    const START: SurfaceExtent = SurfaceExtent::new(800, 600);

    fn start(backend: &mut HeadlessBackend) -> Viewer<&mut HeadlessBackend> {
        Viewer::new(backend, &MemoryAssets::scene(), START).unwrap()
    }

    /// Calls of the last recorded render pass, split per subpass.
    fn subpasses(calls: &[Call]) -> Vec<Vec<Call>> {
        let begin = calls
            .iter()
            .rposition(|c| matches!(c, Call::BeginRenderPass { .. }))
            .unwrap();
        let mut out = vec![Vec::new()];
        for call in &calls[begin + 1..] {
            match call {
                Call::NextSubpass => out.push(Vec::new()),
                Call::EndRenderPass => break,
                other => out.last_mut().unwrap().push(other.clone()),
            }
        }
        out
    }

    fn destroy_rank(call: &Call) -> Option<u8> {
        Some(match call {
            Call::DestroyUniform(_) => 0,
            Call::DestroyPipeline(_) => 1,
            Call::DestroyRenderPass(_) => 2,
            Call::DestroyUniformLayout(_) => 3,
            Call::DestroyShader(_) => 4,
            Call::DestroyImage(_) => 5,
            Call::DestroySampler(_) => 6,
            Call::DestroyBuffer(_) => 7,
            _ => return None,
        })
    }

    fn composite(viewer: &Viewer<&mut HeadlessBackend>) -> UniformHandle {
        viewer.uniforms().composite_handle().unwrap()
    }

    fn hdr_image(viewer: &Viewer<&mut HeadlessBackend>) -> ImageHandle {
        viewer.graph().hdr_image(&viewer.registry).unwrap()
    }

    #[test]
    fn startup_builds_three_attachments_two_subpasses_one_dependency() {
        let mut backend = HeadlessBackend::new(800, 600);
        let viewer = start(&mut backend);

        let desc = viewer.backend().render_pass_desc(viewer.graph().pass()).unwrap();
        assert_eq!(desc.attachments.len(), 3);
        assert_eq!(desc.subpasses.len(), 2);
        assert_eq!(desc.dependencies.len(), 1);
        assert_eq!((desc.width, desc.height), (800, 600));
        assert_eq!(viewer.extent().aspect(), 800.0 / 600.0);
        assert!(viewer.uniforms().is_composite_current(&viewer.registry, viewer.graph()));
    }

    #[test]
    fn each_frame_draws_once_per_subpass() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);

        for i in 0..3 {
            assert_eq!(viewer.frame(i as f32 * 0.5).unwrap(), FrameOutcome::Presented);
            let calls = viewer.registry.backend_mut().take_calls();
            let split = subpasses(&calls);
            assert_eq!(split.len(), 2);

            let draws0: Vec<&Call> = split[0].iter().filter(|c| c.is_draw()).collect();
            assert_eq!(
                draws0,
                [&Call::DrawIndexed {
                    index_count: 12,
                    instance_count: 1,
                    first_index: 0
                }]
            );
            let draws1: Vec<&Call> = split[1].iter().filter(|c| c.is_draw()).collect();
            assert_eq!(
                draws1,
                [&Call::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0
                }]
            );
            assert!(matches!(calls.last(), Some(Call::EndFrame)));
        }
        assert_eq!(viewer.frame_loop().presented(), 3);
    }

    #[test]
    fn geometry_subpass_binds_in_order() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);
        viewer.registry.backend_mut().take_calls();
        viewer.frame(0.0).unwrap();

        let calls = viewer.registry.backend_mut().take_calls();
        let names: Vec<&str> = subpasses(&calls)[0]
            .iter()
            .map(|c| match c {
                Call::ApplyPipeline(_) => "pipeline",
                Call::UpdateBuffer { .. } => "uniforms",
                Call::BindIndexBuffer { .. } => "index",
                Call::BindVertexBuffer { .. } => "vertex",
                Call::BindUniform { .. } => "set",
                Call::SetViewport(_) => "viewport",
                Call::SetScissor(_) => "scissor",
                Call::DrawIndexed { .. } => "draw",
                _ => "other",
            })
            .collect();
        assert_eq!(
            names,
            [
                "pipeline", "uniforms", "uniforms", "index", "vertex", "set", "viewport",
                "scissor", "draw"
            ]
        );
    }

    #[test]
    fn resize_replaces_the_composite_set() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);
        let old = composite(&viewer);
        let pass = viewer.graph().pass();
        viewer.registry.backend_mut().take_calls();

        assert_eq!(viewer.resize(1024, 768).unwrap(), ResizeOutcome::Applied);

        let new = composite(&viewer);
        assert_ne!(old, new);
        let calls = viewer.registry.backend_mut().take_calls();
        assert_eq!(
            calls,
            [
                Call::WaitIdle,
                Call::ResizeSurface {
                    width: 1024,
                    height: 768
                },
                Call::ResizeRenderPass {
                    pass,
                    width: 1024,
                    height: 768
                },
                Call::DestroyUniform(old),
                Call::CreateUniform(new),
            ]
        );

        let hdr = hdr_image(&viewer);
        assert_eq!(viewer.backend().surface_size(), (1024, 768));
        assert_eq!(viewer.backend().image_size(hdr), Some((1024, 768)));
        assert_eq!(viewer.backend().uniform_images(new), [hdr]);
        assert!(!viewer.backend().is_uniform_alive(old));

        viewer.frame(1.0).unwrap();
        let calls = viewer.registry.backend_mut().take_calls();
        assert!(subpasses(&calls)[1].contains(&Call::BindUniform {
            uniform: new,
            slot: 0
        }));
    }

    #[test]
    fn composite_tracks_the_hdr_image_across_resizes() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);

        for (w, h) in [(1024, 768), (640, 480), (640, 480), (1920, 1080), (800, 600)] {
            viewer.resize(w, h).unwrap();
            let hdr = hdr_image(&viewer);
            assert_eq!(viewer.backend().uniform_images(composite(&viewer)), [hdr]);
            assert_eq!(viewer.backend().image_size(hdr), Some((w, h)));
            viewer.frame(0.0).unwrap();
        }
        assert!(viewer.backend().violations().is_empty());
    }

    #[test]
    fn repeated_same_size_resize_is_unchanged() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);
        let set = composite(&viewer);
        let live = viewer.backend().live_objects();

        assert_eq!(viewer.resize(800, 600).unwrap(), ResizeOutcome::Unchanged);
        assert_eq!(viewer.resize(800, 600).unwrap(), ResizeOutcome::Unchanged);
        assert_eq!(composite(&viewer), set);
        assert_eq!(viewer.backend().live_objects(), live);
    }

    #[test]
    fn unavailable_frames_record_nothing() {
        let mut backend = HeadlessBackend::new(800, 600);
        backend.queue_acquire_results([false, false, false]);
        let mut viewer = start(&mut backend);
        viewer.registry.backend_mut().take_calls();

        for _ in 0..3 {
            assert_eq!(viewer.frame(0.0).unwrap(), FrameOutcome::Skipped);
            assert_eq!(viewer.frame_loop().state(), FrameState::AcquireFrame);
        }
        let calls = viewer.registry.backend_mut().take_calls();
        assert_eq!(calls, vec![Call::BeginFrame(false); 3]);
        assert_eq!(viewer.frame_loop().skipped(), 3);

        assert_eq!(viewer.frame(0.0).unwrap(), FrameOutcome::Presented);
        let calls = viewer.registry.backend_mut().take_calls();
        assert_eq!(subpasses(&calls).len(), 2);
    }

    #[test]
    fn zero_area_resize_defers_attachment_recreation() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);
        let hdr = hdr_image(&viewer);
        let set = composite(&viewer);

        assert_eq!(viewer.resize(0, 0).unwrap(), ResizeOutcome::Deferred);
        assert_eq!(hdr_image(&viewer), hdr);
        assert_eq!(composite(&viewer), set);
        assert_eq!(viewer.extent(), SurfaceExtent::new(0, 0));
        assert_eq!(viewer.backend().surface_size(), (0, 0));
        assert_eq!(viewer.frame(0.0).unwrap(), FrameOutcome::Skipped);

        assert_eq!(viewer.resize(1024, 768).unwrap(), ResizeOutcome::Applied);
        assert_ne!(hdr_image(&viewer), hdr);
        assert_eq!(viewer.frame(0.0).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn restoring_the_original_size_after_minimize_rebuilds_the_composite() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);
        viewer.frame(0.0).unwrap();
        let hdr = hdr_image(&viewer);
        let old = composite(&viewer);

        assert_eq!(viewer.resize(0, 0).unwrap(), ResizeOutcome::Deferred);
        assert_eq!(viewer.frame(0.1).unwrap(), FrameOutcome::Skipped);

        assert_eq!(viewer.resize(800, 600).unwrap(), ResizeOutcome::Applied);
        assert_eq!(viewer.backend().surface_size(), (800, 600));

        // Same attachment size: the HDR image survives, the set is rebuilt.
        let new = composite(&viewer);
        assert_eq!(hdr_image(&viewer), hdr);
        assert_ne!(new, old);
        assert!(!viewer.backend().is_uniform_alive(old));
        assert_eq!(viewer.backend().uniform_images(new), [hdr]);
        assert!(viewer.uniforms().is_composite_current(&viewer.registry, viewer.graph()));

        viewer.registry.backend_mut().take_calls();
        assert_eq!(viewer.frame(0.2).unwrap(), FrameOutcome::Presented);
        let calls = viewer.registry.backend_mut().take_calls();
        assert!(subpasses(&calls)[1].contains(&Call::BindUniform {
            uniform: new,
            slot: 0
        }));
        assert!(viewer.backend().violations().is_empty(), "{:?}", viewer.backend().violations());
    }

    #[test]
    fn failure_inside_a_frame_abandons_it_and_the_next_frame_recovers() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);
        let scene_set = viewer.uniforms().scene_set().unwrap();
        let albedo = viewer.backend().uniform_images(scene_set)[0];
        viewer.registry.destroy_uniform(scene_set);
        viewer.registry.backend_mut().take_calls();

        let err = viewer.frame(0.0).unwrap_err();
        assert_eq!(
            err.downcast_ref::<GfxError>(),
            Some(&GfxError::UnknownHandle("binding set"))
        );
        assert_eq!(viewer.frame_loop().state(), FrameState::AcquireFrame);
        let calls = viewer.registry.backend_mut().take_calls();
        assert_eq!(calls.first(), Some(&Call::BeginFrame(true)));
        assert_eq!(calls.last(), Some(&Call::AbandonFrame));
        assert!(!calls.contains(&Call::EndFrame));

        viewer.uniforms.bind_scene(&mut viewer.registry, albedo).unwrap();
        assert_eq!(viewer.frame(0.1).unwrap(), FrameOutcome::Presented);
        assert_eq!(viewer.frame_loop().presented(), 1);
        assert!(viewer.backend().violations().is_empty(), "{:?}", viewer.backend().violations());
    }

    #[test]
    fn failure_before_acquire_does_not_abandon() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);
        viewer
            .graph
            .resize(&mut viewer.registry, SurfaceExtent::new(640, 480))
            .unwrap();
        viewer.registry.backend_mut().take_calls();

        assert!(viewer.frame(0.0).is_err());
        assert!(viewer.registry.backend_mut().take_calls().is_empty());
    }

    #[test]
    fn stale_composite_set_is_refused() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut viewer = start(&mut backend);

        viewer
            .graph
            .resize(&mut viewer.registry, SurfaceExtent::new(1024, 768))
            .unwrap();
        viewer.extent = SurfaceExtent::new(1024, 768);

        let err = viewer.frame(0.0).unwrap_err();
        assert_eq!(err.downcast_ref::<GfxError>(), Some(&GfxError::StaleBinding));
        assert_eq!(viewer.frame_loop().state(), FrameState::AcquireFrame);
    }

    #[test]
    fn shutdown_destroys_in_dependency_order() {
        let mut backend = HeadlessBackend::new(800, 600);
        {
            let mut viewer = start(&mut backend);
            viewer.frame(0.0).unwrap();
            viewer.resize(1024, 768).unwrap();
            viewer.frame(0.1).unwrap();
            viewer.registry.backend_mut().take_calls();
        }

        let calls = backend.calls();
        assert_eq!(calls.first(), Some(&Call::WaitIdle));
        let ranks: Vec<u8> = calls.iter().filter_map(destroy_rank).collect();
        assert!(!ranks.is_empty());
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{ranks:?}");
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn unsupported_hdr_format_fails_startup_cleanly() {
        let mut backend = HeadlessBackend::new(800, 600);
        backend.reject_format(HDR_FORMAT);
        let err = Viewer::new(&mut backend, &MemoryAssets::scene(), START)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("render graph"));
        assert!(backend.violations().is_empty());
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn bad_shader_fails_startup_cleanly() {
        let mut backend = HeadlessBackend::new(800, 600);
        backend.reject_shader(scene::COMPOSITE_FRAGMENT_SHADER);
        let err = Viewer::new(&mut backend, &MemoryAssets::scene(), START)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains(scene::COMPOSITE_FRAGMENT_SHADER));
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn empty_texture_fails_startup_cleanly() {
        let mut backend = HeadlessBackend::new(800, 600);
        let mut assets = MemoryAssets::scene();
        assets.set_image(
            scene::ALBEDO_TEXTURE,
            DecodedImage {
                pixels: Vec::new(),
                width: 0,
                height: 0,
            },
        );
        assert!(Viewer::new(&mut backend, &assets, START).is_err());
        assert!(backend.violations().is_empty());
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn uniform_alignment_comes_from_the_backend() {
        let mut backend = HeadlessBackend::with_alignment(800, 600, 64);
        let viewer = start(&mut backend);
        assert_eq!(viewer.backend().min_uniform_alignment(), 64);
        assert_eq!(viewer.uniforms().regions().time_offset, 192);
        assert_eq!(viewer.uniforms().regions().total_size, 256);
    }
}
