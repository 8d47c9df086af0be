//! Subpass emulation.
//!
//! wgpu has no subpasses, so commands are buffered per subpass while the
//! render pass is open and replayed as consecutive wgpu render passes when it
//! ends. Attachment load/store ops are derived from the subpass graph: an
//! attachment keeps its contents between the subpasses that use it, and only
//! its first and last use honor the declared load and store actions.

use std::ops::Range;

use crate::gfx::{
    BufferHandle, GfxError, GfxResult, IndexType, PipelineHandle, Region, RenderPassDesc,
    RenderPassHandle, UniformHandle,
};

use super::{convert, PassEntry, Resources};

/// Buffered render command.
#[derive(Debug, Clone)]
pub(super) enum RenderCommand {
    SetPipeline(PipelineHandle),
    SetBindGroup { slot: u32, uniform: UniformHandle },
    SetVertexBuffer { buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, ty: IndexType },
    SetViewport(Region),
    SetScissor(Region),
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, instances: Range<u32> },
}

/// Render pass being recorded.
pub(super) struct PendingPass {
    pub pass: RenderPassHandle,
    pub region: Region,
    /// Commands of every subpass begun so far; the last one is current.
    subpasses: Vec<Vec<RenderCommand>>,
    pub pipeline_applied: bool,
}

impl PendingPass {
    pub fn new(pass: RenderPassHandle, region: Region) -> Self {
        Self {
            pass,
            region,
            subpasses: vec![Vec::new()],
            pipeline_applied: false,
        }
    }

    pub fn current_subpass(&self) -> u32 {
        (self.subpasses.len() - 1) as u32
    }

    pub fn record(&mut self, cmd: RenderCommand) {
        if let Some(current) = self.subpasses.last_mut() {
            current.push(cmd);
        }
    }

    pub fn advance(&mut self) {
        self.subpasses.push(Vec::new());
        self.pipeline_applied = false;
    }
}

fn attachment_view<'a>(
    entry: &PassEntry,
    attachment: usize,
    present: &'a wgpu::TextureView,
    res: &'a Resources,
) -> GfxResult<&'a wgpu::TextureView> {
    match entry.images.get(attachment) {
        Some(Some(image)) => res
            .images
            .get(*image)
            .map(|i| &i.view)
            .ok_or(GfxError::UnknownHandle("image")),
        Some(None) => Ok(present),
        None => Err(GfxError::usage(format!("attachment {attachment} does not exist"))),
    }
}

fn color_ops(desc: &RenderPassDesc, subpass: usize, attachment: usize) -> wgpu::Operations<wgpu::Color> {
    let att = &desc.attachments[attachment];
    wgpu::Operations {
        load: if desc.used_before(subpass, attachment) {
            wgpu::LoadOp::Load
        } else {
            convert::color_load(att.load, att.clear)
        },
        store: if desc.used_after(subpass, attachment) {
            wgpu::StoreOp::Store
        } else {
            convert::store(att.store)
        },
    }
}

/// Replays every recorded subpass into `encoder`.
pub(super) fn replay(
    encoder: &mut wgpu::CommandEncoder,
    pending: &PendingPass,
    present: &wgpu::TextureView,
    res: &Resources,
) -> GfxResult<()> {
    let entry = res
        .passes
        .get(pending.pass)
        .ok_or(GfxError::UnknownHandle("render pass"))?;
    let desc = &entry.desc;

    for (index, commands) in pending.subpasses.iter().enumerate() {
        let subpass = &desc.subpasses[index];

        let mut colors = Vec::with_capacity(subpass.colors.len());
        for &a in &subpass.colors {
            colors.push(Some(wgpu::RenderPassColorAttachment {
                view: attachment_view(entry, a, present, res)?,
                depth_slice: None,
                resolve_target: None,
                ops: color_ops(desc, index, a),
            }));
        }

        let depth_stencil_attachment = match subpass.depth_stencil {
            Some(a) => {
                let att = &desc.attachments[a];
                let (depth_load, stencil_load) = if desc.used_before(index, a) {
                    (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
                } else {
                    convert::depth_load(att.load, att.clear)
                };
                let store = if desc.used_after(index, a) {
                    wgpu::StoreOp::Store
                } else {
                    convert::store(att.store)
                };
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: attachment_view(entry, a, present, res)?,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store,
                    }),
                    stencil_ops: att.format.has_stencil().then_some(wgpu::Operations {
                        load: stencil_load,
                        store,
                    }),
                })
            }
            None => None,
        };

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(desc.label),
            color_attachments: &colors,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        let area = pending.region;
        rpass.set_scissor_rect(area.x, area.y, area.width, area.height);

        for cmd in commands {
            execute(&mut rpass, cmd, res);
        }
    }

    Ok(())
}

fn execute(rpass: &mut wgpu::RenderPass<'_>, cmd: &RenderCommand, res: &Resources) {
    match cmd {
        RenderCommand::SetPipeline(handle) => {
            if let Some(p) = res.pipelines.get(*handle) {
                rpass.set_pipeline(&p.pipeline);
            }
        }
        RenderCommand::SetBindGroup { slot, uniform } => {
            if let Some(u) = res.uniforms.get(*uniform) {
                rpass.set_bind_group(*slot, &u.group, &[]);
            }
        }
        RenderCommand::SetVertexBuffer { buffer, offset } => {
            if let Some(b) = res.buffers.get(*buffer) {
                rpass.set_vertex_buffer(0, b.buffer.slice(*offset..));
            }
        }
        RenderCommand::SetIndexBuffer { buffer, offset, ty } => {
            if let Some(b) = res.buffers.get(*buffer) {
                rpass.set_index_buffer(b.buffer.slice(*offset..), convert::index_format(*ty));
            }
        }
        RenderCommand::SetViewport(r) => {
            rpass.set_viewport(
                r.x as f32,
                r.y as f32,
                r.width as f32,
                r.height as f32,
                0.0,
                1.0,
            );
        }
        RenderCommand::SetScissor(r) => {
            rpass.set_scissor_rect(r.x, r.y, r.width, r.height);
        }
        RenderCommand::Draw {
            vertices,
            instances,
        } => {
            rpass.draw(vertices.clone(), instances.clone());
        }
        RenderCommand::DrawIndexed { indices, instances } => {
            rpass.draw_indexed(indices.clone(), 0, instances.clone());
        }
    }
}
