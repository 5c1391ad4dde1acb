//! Reset-per-compile placed arena for frame-graph transient resources.
//!
//! Unlike `memory::MemoryAllocator`'s placed allocations, whose sub-ranges
//! are freed back one at a time by the owning resource's `Drop`, a resource
//! placed here is never freed by its own `Drop` — it returns a
//! [`crate::PlacementToken`] that the frame graph retires explicitly, once
//! it has scheduled every pass that touches the resource, so a later
//! resource with a disjoint lifetime can land on the same bytes within the
//! same generation. `reset()` additionally wipes every page's suballocator
//! between generations, without freeing the pages' `VkDeviceMemory`.

use super::buffer::{buffer_usage_to_vk, VulkanBuffer};
use super::memory::MemoryBacking;
use super::texture::{build_image, build_view, VulkanTexture};
use crate::{Buffer, BufferDescriptor, PlacementToken, ResourceId, Texture, TextureDescriptor, TransientHeap};
use ash::vk;
use rhi_alloc::{Tlsf, TlsfAllocation};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const PAGE_SIZE: u64 = 64 * 1024 * 1024;
const MIN_ALLOCATION_SIZE: u32 = 256;

struct Page {
    memory: vk::DeviceMemory,
    tlsf: Tlsf,
}

/// The page index plus the TLSF bookkeeping needed to free one placement.
struct VulkanPlacement {
    page_index: usize,
    allocation: TlsfAllocation,
}

pub struct VulkanTransientHeap {
    device: Arc<ash::Device>,
    memory_type_index: u32,
    pages: Vec<Page>,
    next_id: Arc<AtomicU64>,
}

impl VulkanTransientHeap {
    pub fn new(device: Arc<ash::Device>, memory_type_index: u32, next_id: Arc<AtomicU64>) -> Self {
        Self { device, memory_type_index, pages: Vec::new(), next_id }
    }

    fn next_id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn place(&mut self, requirements: vk::MemoryRequirements) -> Result<(vk::DeviceMemory, u64, VulkanPlacement), String> {
        if requirements.size > PAGE_SIZE {
            return Err("transient resource larger than one transient heap page".to_string());
        }
        for (page_index, page) in self.pages.iter_mut().enumerate() {
            if let Some(allocation) = page.tlsf.allocate(requirements.size as u32, requirements.alignment as u32) {
                let offset = allocation.offset as u64;
                return Ok((page.memory, offset, VulkanPlacement { page_index, allocation }));
            }
        }

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(PAGE_SIZE)
            .memory_type_index(self.memory_type_index);
        let memory = unsafe {
            self.device
                .allocate_memory(&allocate_info, None)
                .map_err(|e| e.to_string())?
        };
        let mut tlsf = Tlsf::new(PAGE_SIZE as u32, MIN_ALLOCATION_SIZE, 5);
        let allocation = tlsf
            .allocate(requirements.size as u32, requirements.alignment as u32)
            .ok_or_else(|| "fresh transient heap page too small for request".to_string())?;
        let offset = allocation.offset as u64;
        let page_index = self.pages.len();
        self.pages.push(Page { memory, tlsf });
        Ok((memory, offset, VulkanPlacement { page_index, allocation }))
    }
}

impl TransientHeap for VulkanTransientHeap {
    fn reset(&mut self) {
        for page in &mut self.pages {
            page.tlsf = Tlsf::new(PAGE_SIZE as u32, MIN_ALLOCATION_SIZE, 5);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<(Box<dyn Texture>, PlacementToken), String> {
        let unbound = build_image(&self.device, desc)?;
        let (memory, offset, placement) = self.place(unbound.requirements)?;
        unsafe {
            self.device
                .bind_image_memory(unbound.image, memory, offset)
                .map_err(|e| e.to_string())?;
        }
        let view = build_view(&self.device, unbound.image, desc, unbound.mip_levels, unbound.array_layers)?;
        let texture: Box<dyn Texture> = Box::new(VulkanTexture {
            device: self.device.clone(),
            image: unbound.image,
            backing: Some(MemoryBacking::Unowned { memory, offset }),
            view,
            format: desc.format,
            size: desc.size,
            dimension: desc.dimension,
            mip_level_count: unbound.mip_levels,
            id: self.next_id(),
            image_type: unbound.image_type,
        });
        Ok((texture, PlacementToken(Box::new(placement))))
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<(Box<dyn Buffer>, PlacementToken), String> {
        let size = desc.size.max(1);
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(buffer_usage_to_vk(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            self.device
                .create_buffer(&create_info, None)
                .map_err(|e| e.to_string())?
        };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let (memory, offset, placement) = self.place(requirements)?;
        unsafe {
            self.device
                .bind_buffer_memory(buffer, memory, offset)
                .map_err(|e| e.to_string())?;
        }
        let buf: Box<dyn Buffer> = Box::new(VulkanBuffer {
            device: self.device.clone(),
            buffer,
            backing: Some(MemoryBacking::Unowned { memory, offset }),
            size,
            id: self.next_id(),
            host_visible: false,
        });
        Ok((buf, PlacementToken(Box::new(placement))))
    }

    fn retire(&mut self, token: PlacementToken) {
        if let Ok(placement) = token.0.downcast::<VulkanPlacement>() {
            if let Some(page) = self.pages.get_mut(placement.page_index) {
                page.tlsf.free(placement.allocation);
            }
        }
    }
}

impl std::fmt::Debug for VulkanTransientHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanTransientHeap").field("page_count", &self.pages.len()).finish()
    }
}

impl Drop for VulkanTransientHeap {
    fn drop(&mut self) {
        for page in &self.pages {
            unsafe {
                self.device.free_memory(page.memory, None);
            }
        }
    }
}
