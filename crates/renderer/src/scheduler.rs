//! Render scheduler: per-frame orchestration tying the device facade, the
//! frame graph and a global constant buffer together.
//!
//! Grounded on spec.md §4.9 / `D3D12Device.cpp`'s frame loop: begin frame,
//! commit global constants (camera matrices, resolution, timing, skybox
//! SH), bind the global constant view on both graphics and compute slots,
//! run the frame graph, end frame.

use crate::graph::{FrameGraph, FrameGraphError};
use glam::{Mat4, Vec3, Vec4};
use rhi::device_resources::ConstantBufferRing;
use rhi::Device;

/// Everything a pass needs to know about the viewer this frame.
pub struct Camera {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
    pub fov_y_radians: f32,
}

/// Placeholder scene handle; passes reach into it for draw lists. Kept
/// deliberately opaque here since its contents are outside this crate's
/// scope (asset/ECS layer) — the scheduler only threads it through.
pub struct Scene {
    pub skybox_sh: [Vec4; 9],
}

/// Layout of the per-frame `Global` constant buffer (root-signature slot 2),
/// matching spec.md §4.9 step 2's field list exactly.
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct GlobalConstants {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub resolution: [f32; 2],
    pub near_far: [f32; 2],
    pub fov_y: f32,
    pub delta_time: f32,
    pub total_time: f32,
    pub _pad: f32,
    pub skybox_sh: [[f32; 4]; 9],
}

pub struct Timer {
    pub delta_seconds: f32,
    pub total_seconds: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("frame graph: {0}")]
    FrameGraph(#[from] FrameGraphError),
    #[error("device: {0}")]
    Device(String),
}

/// Owns the command-list recorder's lifetime, the frame graph instance and
/// the N-buffered global constant buffer. `execute_pipeline` is the single
/// entry point a frame loop calls once per frame.
pub struct RenderScheduler {
    frame_graph: FrameGraph,
    global_constants: ConstantBufferRing,
    resolution: (u32, u32),
}

impl RenderScheduler {
    pub fn new(device: &dyn Device, frame_graph: FrameGraph, frame_count: u32, resolution: (u32, u32)) -> Result<Self, SchedulerError> {
        let global_constants = ConstantBufferRing::new(
            device,
            std::mem::size_of::<GlobalConstants>() as u64,
            frame_count,
            Some("global-constants"),
        )
        .map_err(SchedulerError::Device)?;
        Ok(Self { frame_graph, global_constants, resolution })
    }

    pub fn frame_graph_mut(&mut self) -> &mut FrameGraph {
        &mut self.frame_graph
    }

    /// 1. begin_frame (the encoder is already opened by the caller's frame
    ///    lifecycle); 2. commit global constants; 3. the global constant
    ///    buffer is bound by each pass via its descriptor set, since binding
    ///    is a per-pipeline-layout operation, not a graph-wide one in this
    ///    realization; 4. frame_graph.execute; 5. return to the caller for
    ///    `encoder.finish()` + submission.
    pub fn execute_pipeline(
        &mut self,
        device: &dyn Device,
        encoder: &mut dyn rhi::CommandEncoder,
        scene: &Scene,
        camera: &Camera,
        timer: &Timer,
    ) -> Result<(), SchedulerError> {
        let constants = self.build_global_constants(scene, camera, timer);
        self.global_constants.write(device, bytemuck::bytes_of(&constants)).map_err(SchedulerError::Device)?;

        self.frame_graph.compile(device)?;
        self.frame_graph.execute(encoder)?;

        self.global_constants.advance();
        Ok(())
    }

    fn build_global_constants(&self, scene: &Scene, camera: &Camera, timer: &Timer) -> GlobalConstants {
        let inverse_projection = camera.projection.inverse();
        let mut skybox_sh = [[0.0f32; 4]; 9];
        for (dst, src) in skybox_sh.iter_mut().zip(scene.skybox_sh.iter()) {
            *dst = src.to_array();
        }
        GlobalConstants {
            view: camera.view.to_cols_array_2d(),
            projection: camera.projection.to_cols_array_2d(),
            inverse_projection: inverse_projection.to_cols_array_2d(),
            resolution: [self.resolution.0 as f32, self.resolution.1 as f32],
            near_far: [camera.near, camera.far],
            fov_y: camera.fov_y_radians,
            delta_time: timer.delta_seconds,
            total_time: timer.total_seconds,
            _pad: 0.0,
            skybox_sh,
        }
    }

    pub fn global_constants_buffer(&self) -> &dyn rhi::Buffer {
        self.global_constants.current_buffer()
    }
}
