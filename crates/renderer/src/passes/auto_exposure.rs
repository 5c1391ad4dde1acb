//! Auto exposure: builds a log-luminance histogram over the HDR shading
//! target, then reduces it to a single average-luminance value the
//! tone-mapping pass reads back. Grounded on `AutoExposurePass` in
//! `DeferredPipeline.h`.

use crate::graph::{FrameGraphError, GraphicsPassPsoDesc, Pass, PassContext, ResourceId};
use rhi::{ComputePipeline, DescriptorSet};

pub const MIN_LOG_LUMINANCE: f32 = -10.0;
pub const MAX_LOG_LUMINANCE: f32 = 2.0;
pub const HISTOGRAM_BIN_COUNT: u32 = 256;

pub struct AutoExposurePass {
    inputs: Vec<ResourceId>,
    outputs: Vec<ResourceId>,
    histogram_pipeline: Box<dyn ComputePipeline>,
    average_pipeline: Box<dyn ComputePipeline>,
    histogram_descriptor_set: Box<dyn DescriptorSet>,
    average_descriptor_set: Box<dyn DescriptorSet>,
    extent: (u32, u32),
}

impl AutoExposurePass {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deferred_shading_rt: ResourceId,
        luminance_histogram: ResourceId,
        average_luminance: ResourceId,
        histogram_pipeline: Box<dyn ComputePipeline>,
        average_pipeline: Box<dyn ComputePipeline>,
        histogram_descriptor_set: Box<dyn DescriptorSet>,
        average_descriptor_set: Box<dyn DescriptorSet>,
        extent: (u32, u32),
    ) -> Self {
        Self {
            inputs: vec![deferred_shading_rt],
            outputs: vec![luminance_histogram, average_luminance],
            histogram_pipeline,
            average_pipeline,
            histogram_descriptor_set,
            average_descriptor_set,
            extent,
        }
    }
}

impl Pass for AutoExposurePass {
    fn name(&self) -> &str {
        "AutoExposure"
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

        compute_pass.set_pipeline(self.histogram_pipeline.as_ref());
        compute_pass.bind_descriptor_set(1, self.histogram_descriptor_set.as_ref());
        let (width, height) = self.extent;
        compute_pass.dispatch(width.div_ceil(16), height.div_ceil(16), 1);

        compute_pass.set_pipeline(self.average_pipeline.as_ref());
        compute_pass.bind_descriptor_set(1, self.average_descriptor_set.as_ref());
        compute_pass.dispatch(1, 1, 1);
        Ok(())
    }
}
