//! Opaque geometry pass: fills GBufferA/B/C (albedo, normal, material) and
//! the depth-stencil buffer later passes read back. Grounded on
//! `GBufferPass` in `DeferredPipeline.h`.

use crate::graph::{FrameGraphError, GraphicsPassPsoDesc, Pass, PassContext, ResourceId};
use rhi::{Buffer, DescriptorSet, GraphicsPipeline, IndexFormat};

/// One mesh draw: vertex buffer, index buffer/format/count, and the
/// instance's descriptor set (set index 2, per-draw transform + material).
pub type DrawItem = (Box<dyn Buffer>, Box<dyn Buffer>, IndexFormat, u32, Box<dyn DescriptorSet>);

pub struct GBufferPass {
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    pipeline: Box<dyn GraphicsPipeline>,
    scene_descriptor_set: Box<dyn DescriptorSet>,
    pso_desc: GraphicsPassPsoDesc,
    draw_list: Vec<DrawItem>,
}

impl GBufferPass {
    pub fn new(
        gbuffer_a: ResourceId,
        gbuffer_b: ResourceId,
        gbuffer_c: ResourceId,
        depth_stencil: ResourceId,
        pipeline: Box<dyn GraphicsPipeline>,
        scene_descriptor_set: Box<dyn DescriptorSet>,
    ) -> Self {
        Self {
            inputs: vec![],
            outputs: vec![gbuffer_a, gbuffer_b, gbuffer_c, depth_stencil],
            pipeline,
            scene_descriptor_set,
            pso_desc: GraphicsPassPsoDesc::default(),
            draw_list: Vec::new(),
        }
    }

    /// Replaces this frame's opaque draw list. Called by the caller's scene
    /// traversal before the frame graph executes.
    pub fn set_draw_list(&mut self, items: Vec<DrawItem>) {
        self.draw_list = items;
    }
}

impl Pass for GBufferPass {
    fn name(&self) -> &str {
        "GBuffer"
    }

    fn inputs(&self) -> &[ResourceId] {
        &self.inputs
    }

    fn outputs(&self) -> &[ResourceId] {
        &self.outputs
    }

    fn is_graphics(&self) -> bool {
        true
    }

    fn set_pso_desc(&mut self, desc: GraphicsPassPsoDesc) {
        self.pso_desc = desc;
    }

    fn execute(&mut self, ctx: &mut PassContext) -> Result<(), FrameGraphError> {
        let render_pass = ctx.render_pass.as_deref_mut().expect("gbuffer pass opens a render pass");
        render_pass.set_pipeline(self.pipeline.as_ref());
        render_pass.bind_descriptor_set(1, self.scene_descriptor_set.as_ref());
        for (vertex_buffer, index_buffer, index_format, index_count, instance_set) in &self.draw_list {
            render_pass.bind_descriptor_set(2, instance_set.as_ref());
            render_pass.set_vertex_buffer(0, vertex_buffer.as_ref(), 0);
            render_pass.set_index_buffer(index_buffer.as_ref(), 0, *index_format);
            render_pass.draw_indexed(*index_count, 1, 0, 0, 0);
        }
        Ok(())
    }
}
