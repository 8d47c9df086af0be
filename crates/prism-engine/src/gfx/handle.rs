use slotmap::new_key_type;

new_key_type! {
    /// GPU buffer (vertex, index or uniform storage).
    pub struct BufferHandle;

    /// Sampled image or render-pass attachment image.
    pub struct ImageHandle;

    /// Texture sampler.
    pub struct SamplerHandle;

    /// Single-stage shader module.
    pub struct ShaderHandle;

    /// Binding-set layout.
    pub struct UniformLayoutHandle;

    /// Binding set (resources matched to a layout).
    pub struct UniformHandle;

    /// Render pass with its attachments.
    pub struct RenderPassHandle;

    /// Graphics pipeline bound to one subpass.
    pub struct PipelineHandle;
}
