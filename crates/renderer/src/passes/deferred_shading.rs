//! Deferred lighting resolve: reads the GBuffer plus the clustered light
//! data and writes the HDR shading target. Also binds the depth-stencil
//! buffer for a stencil test only (no depth write), matching
//! `DeferredShadingPass` in `DeferredPipeline.h`.

use crate::graph::{FrameGraphError, GraphicsPassPsoDesc, Pass, PassContext, ResourceId};
use rhi::{DescriptorSet, GraphicsPipeline};

pub struct DeferredShadingPass {
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    pipeline: Box<dyn GraphicsPipeline>,
    gbuffer_descriptor_set: Box<dyn DescriptorSet>,
    pso_desc: GraphicsPassPsoDesc,
}

impl DeferredShadingPass {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gbuffer_a: ResourceId,
        gbuffer_b: ResourceId,
        gbuffer_c: ResourceId,
        depth_stencil: ResourceId,
        frustum_cluster: ResourceId,
        point_lights: ResourceId,
        deferred_shading_rt: ResourceId,
        pipeline: Box<dyn GraphicsPipeline>,
        gbuffer_descriptor_set: Box<dyn DescriptorSet>,
    ) -> Self {
        Self {
            inputs: vec![gbuffer_a, gbuffer_b, gbuffer_c, depth_stencil, frustum_cluster, point_lights],
            outputs: vec![deferred_shading_rt, depth_stencil],
            pipeline,
            gbuffer_descriptor_set,
            pso_desc: GraphicsPassPsoDesc::default(),
        }
    }
}

impl Pass for DeferredShadingPass {
    fn name(&self) -> &str {
        "DeferredShading"
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
        let render_pass = ctx.render_pass.as_deref_mut().expect("deferred shading pass opens a render pass");
        render_pass.set_pipeline(self.pipeline.as_ref());
        render_pass.bind_descriptor_set(1, self.gbuffer_descriptor_set.as_ref());
        // Fullscreen triangle: one resolve draw per cluster-shaded pixel,
        // vertices generated in the vertex shader from the vertex index.
        render_pass.draw(3, 1, 0, 0);
        Ok(())
    }
}
