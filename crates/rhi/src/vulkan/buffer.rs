//! Vulkan Buffer implementation.

use super::memory::MemoryBacking;
use crate::{Buffer, BufferUsage, ResourceId};
use ash::vk;
use std::sync::Arc;

pub fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    flags
}

pub struct VulkanBuffer {
    pub device: Arc<ash::Device>,
    pub buffer: vk::Buffer,
    pub backing: Option<MemoryBacking>,
    pub size: u64,
    pub id: ResourceId,
    pub host_visible: bool,
}

impl VulkanBuffer {
    pub fn memory(&self) -> vk::DeviceMemory {
        self.backing.as_ref().expect("backing taken before drop").memory()
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            if let Some(backing) = self.backing.take() {
                backing.release(&self.device);
            }
        }
    }
}

impl std::fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish()
    }
}

impl Buffer for VulkanBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn host_visible(&self) -> bool {
        self.host_visible
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
