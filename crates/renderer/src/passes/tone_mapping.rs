//! Tone mapping: reads the HDR shading target plus the bloom mip chain and
//! the auto-exposure result, writes the display-referred texture the
//! present pass blits to the swapchain. Grounded on `ToneMappingPass` in
//! `DeferredPipeline.h`.

use crate::graph::{FrameGraphError, GraphicsPassPsoDesc, Pass, PassContext, ResourceId};
use rhi::{DescriptorSet, GraphicsPipeline};

pub struct ToneMappingPass {
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    pipeline: Box<dyn GraphicsPipeline>,
    descriptor_set: Box<dyn DescriptorSet>,
    pso_desc: GraphicsPassPsoDesc,
}

impl ToneMappingPass {
    pub fn new(
        deferred_shading_rt: ResourceId,
        bloom_mipchain: ResourceId,
        average_luminance: ResourceId,
        tone_mapped: ResourceId,
        pipeline: Box<dyn GraphicsPipeline>,
        descriptor_set: Box<dyn DescriptorSet>,
    ) -> Self {
        Self {
            inputs: vec![deferred_shading_rt, bloom_mipchain, average_luminance],
            outputs: vec![tone_mapped],
            pipeline,
            descriptor_set,
            pso_desc: GraphicsPassPsoDesc::default(),
        }
    }
}

impl Pass for ToneMappingPass {
    fn name(&self) -> &str {
        "ToneMapping"
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
        let render_pass = ctx.render_pass.as_deref_mut().expect("tone mapping pass opens a render pass");
        render_pass.set_pipeline(self.pipeline.as_ref());
        render_pass.bind_descriptor_set(1, self.descriptor_set.as_ref());
        render_pass.draw(3, 1, 0, 0);
        Ok(())
    }
}
