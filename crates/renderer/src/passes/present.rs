//! Terminal pass: blits the tone-mapped texture into the swapchain-backed
//! back buffer. Modeled as a fullscreen-triangle draw rather than a raw
//! texture copy since the device facade has no texture-to-texture copy
//! operation, only buffer-to-buffer/buffer-to-texture (spec.md §4.3/§4.7).

use crate::graph::{FrameGraphError, GraphicsPassPsoDesc, Pass, PassContext, ResourceId};
use rhi::{DescriptorSet, GraphicsPipeline};

pub struct PresentPass {
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    pipeline: Box<dyn GraphicsPipeline>,
    descriptor_set: Box<dyn DescriptorSet>,
    pso_desc: GraphicsPassPsoDesc,
}

impl PresentPass {
    pub fn new(
        tone_mapped: ResourceId,
        back_buffer: ResourceId,
        pipeline: Box<dyn GraphicsPipeline>,
        descriptor_set: Box<dyn DescriptorSet>,
    ) -> Self {
        Self { inputs: vec![tone_mapped], outputs: vec![back_buffer], pipeline, descriptor_set, pso_desc: GraphicsPassPsoDesc::default() }
    }
}

impl Pass for PresentPass {
    fn name(&self) -> &str {
        "Present"
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
        let render_pass = ctx.render_pass.as_deref_mut().expect("present pass opens a render pass");
        render_pass.set_pipeline(self.pipeline.as_ref());
        render_pass.bind_descriptor_set(1, self.descriptor_set.as_ref());
        render_pass.draw(3, 1, 0, 0);
        Ok(())
    }
}
