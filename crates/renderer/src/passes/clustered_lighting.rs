//! Clustered light culling: bins the scene's point lights into a 3D view
//! frustum grid before the deferred-shading pass runs. Grounded on
//! `ClusteredPass` in `DeferredPipeline.h`: a 24x16x9 cluster grid, up to
//! 1024 scene lights, up to 128 lights per cluster.

use crate::graph::{FrameGraphError, GraphicsPassPsoDesc, Pass, PassContext, ResourceId};
use rhi::{ComputePipeline, DescriptorSet};

pub const CLUSTER_GRID: (u32, u32, u32) = (24, 16, 9);
pub const MAX_SCENE_LIGHTS: u32 = 1024;
pub const MAX_CLUSTER_LIGHTS: u32 = 128;

pub struct ClusteredLightingPass {
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    pipeline: Box<dyn ComputePipeline>,
    descriptor_set: Box<dyn DescriptorSet>,
}

impl ClusteredLightingPass {
    pub fn new(
        frustum_cluster: ResourceId,
        point_lights: ResourceId,
        pipeline: Box<dyn ComputePipeline>,
        descriptor_set: Box<dyn DescriptorSet>,
    ) -> Self {
        Self { inputs: vec![], outputs: vec![frustum_cluster, point_lights], pipeline, descriptor_set }
    }
}

impl Pass for ClusteredLightingPass {
    fn name(&self) -> &str {
        "ClusteredLighting"
    }

    fn inputs(&self) -> &[ResourceId] {
        &self.inputs
    }

    fn outputs(&self) -> &[ResourceId] {
        &self.outputs
    }

    fn is_graphics(&self) -> bool {
        false
    }

    fn set_pso_desc(&mut self, _desc: GraphicsPassPsoDesc) {}

    fn execute(&mut self, ctx: &mut PassContext) -> Result<(), FrameGraphError> {
        let mut compute_pass = ctx.encoder.begin_compute_pass();
        compute_pass.set_pipeline(self.pipeline.as_ref());
        compute_pass.bind_descriptor_set(1, self.descriptor_set.as_ref());
        let (x, y, z) = CLUSTER_GRID;
        compute_pass.dispatch(x, y, z);
        Ok(())
    }
}
