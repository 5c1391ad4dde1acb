//! Draws the environment background into whatever the deferred-shading pass
//! did not cover, depth-tested against the GBuffer's depth-stencil buffer.
//! Grounded on `SkyboxPass` in `DeferredPipeline.h`.

use crate::graph::{FrameGraphError, GraphicsPassPsoDesc, Pass, PassContext, ResourceId};
use rhi::{Buffer, DescriptorSet, GraphicsPipeline, IndexFormat};

pub struct SkyboxPass {
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    pipeline: Box<dyn GraphicsPipeline>,
    descriptor_set: Box<dyn DescriptorSet>,
    pso_desc: GraphicsPassPsoDesc,
    cube_vertex_buffer: Box<dyn Buffer>,
    cube_index_buffer: Box<dyn Buffer>,
    cube_index_count: u32,
}

impl SkyboxPass {
    pub fn new(
        depth_stencil: ResourceId,
        deferred_shading_rt: ResourceId,
        pipeline: Box<dyn GraphicsPipeline>,
        descriptor_set: Box<dyn DescriptorSet>,
        cube_vertex_buffer: Box<dyn Buffer>,
        cube_index_buffer: Box<dyn Buffer>,
        cube_index_count: u32,
    ) -> Self {
        Self {
            inputs: vec![depth_stencil],
            outputs: vec![deferred_shading_rt],
            pipeline,
            descriptor_set,
            pso_desc: GraphicsPassPsoDesc::default(),
            cube_vertex_buffer,
            cube_index_buffer,
            cube_index_count,
        }
    }
}

impl Pass for SkyboxPass {
    fn name(&self) -> &str {
        "Skybox"
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
        let render_pass = ctx.render_pass.as_deref_mut().expect("skybox pass opens a render pass");
        render_pass.set_pipeline(self.pipeline.as_ref());
        render_pass.bind_descriptor_set(1, self.descriptor_set.as_ref());
        render_pass.set_vertex_buffer(0, self.cube_vertex_buffer.as_ref(), 0);
        render_pass.set_index_buffer(self.cube_index_buffer.as_ref(), 0, IndexFormat::Uint16);
        render_pass.draw_indexed(self.cube_index_count, 1, 0, 0, 0);
        Ok(())
    }
}
