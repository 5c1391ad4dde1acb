//! Bloom: successive downsample passes followed by successive upsample
//! passes that merge back into the mip chain, matching `BloomPass` in
//! `DeferredPipeline.h`'s `BloomStep = 3` downsample/upsample ladder.

use crate::graph::{FrameGraphError, GraphicsPassPsoDesc, Pass, PassContext, ResourceId};
use rhi::{ComputePipeline, DescriptorSet};

pub const BLOOM_STEPS: u32 = 3;

pub struct BloomPass {
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    downsample_pipeline: Box<dyn ComputePipeline>,
    upsample_pipeline: Box<dyn ComputePipeline>,
    mip_descriptor_sets: Vec<Box<dyn DescriptorSet>>,
    mip_extent: (u32, u32),
}

impl BloomPass {
    pub fn new(
        deferred_shading_rt: ResourceId,
        bloom_mipchain: ResourceId,
        downsample_pipeline: Box<dyn ComputePipeline>,
        upsample_pipeline: Box<dyn ComputePipeline>,
        mip_descriptor_sets: Vec<Box<dyn DescriptorSet>>,
        mip_extent: (u32, u32),
    ) -> Self {
        Self {
            inputs: vec![deferred_shading_rt],
            outputs: vec![bloom_mipchain],
            downsample_pipeline,
            upsample_pipeline,
            mip_descriptor_sets,
            mip_extent,
        }
    }
}

impl Pass for BloomPass {
    fn name(&self) -> &str {
        "Bloom"
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
        let (base_width, base_height) = self.mip_extent;

        compute_pass.set_pipeline(self.downsample_pipeline.as_ref());
        for (mip, set) in self.mip_descriptor_sets.iter().take(BLOOM_STEPS as usize).enumerate() {
            compute_pass.bind_descriptor_set(1, set.as_ref());
            let shift = mip as u32 + 1;
            compute_pass.dispatch((base_width >> shift).max(1), (base_height >> shift).max(1), 1);
        }

        compute_pass.set_pipeline(self.upsample_pipeline.as_ref());
        for (mip, set) in self.mip_descriptor_sets.iter().take(BLOOM_STEPS as usize).enumerate().rev() {
            compute_pass.bind_descriptor_set(1, set.as_ref());
            let shift = mip as u32;
            compute_pass.dispatch((base_width >> shift).max(1), (base_height >> shift).max(1), 1);
        }
        Ok(())
    }
}
