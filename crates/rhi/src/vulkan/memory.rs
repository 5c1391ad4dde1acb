//! GPU memory allocator: a small set of 64 MiB heaps, each sub-allocated by
//! a `rhi_alloc::Tlsf` instance, bucketed by heap usage × Vulkan memory type
//! preference so that resources with incompatible tiling or lifetime never
//! share a heap.
//!
//! Mirrors `D3D12Memory::MemoryAllocator` (`Renderer/Device/Direct12/MemoryAllocator.h`):
//! `HeapUsage` there distinguishes non-RT/DS textures, buffers and RT/DS
//! textures (they have different alignment/tiling requirements even when
//! otherwise placed in the same raw heap type); `HeapType` distinguishes
//! default (device-local), upload (host-visible) and readback heaps. This
//! module keeps that `usage × type` bucketing and realizes each bucket as a
//! page list instead of the original's fixed single heap, so a bucket can
//! grow past 64 MiB instead of failing once its one heap is full.
//!
//! Committed (non-placed) resources bypass this allocator entirely and keep
//! the teacher's original one-`vkAllocateMemory`-per-resource path in
//! `texture::create_texture` / `VulkanDevice::create_buffer` — this module
//! only adds the placed path alongside it.

use crate::error::RhiError;
use ash::vk;
use rhi_alloc::{Tlsf, TlsfAllocation};
use std::sync::{Arc, Mutex};

/// Matches `EHeapUsage`: resources with different tiling/alignment needs
/// never share a heap even if their raw Vulkan memory type matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapUsage {
    NonRtDsTexture,
    Buffer,
    RtDsTexture,
}

const HEAP_USAGE_COUNT: usize = 3;
const HEAP_USAGES: [HeapUsage; HEAP_USAGE_COUNT] =
    [HeapUsage::NonRtDsTexture, HeapUsage::Buffer, HeapUsage::RtDsTexture];

/// Matches `D3D12Memory::HeapType[]`: default (device-local), upload
/// (host-visible + coherent) and readback (host-visible + cached).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    Default,
    Upload,
    Readback,
}

const HEAP_TYPE_COUNT: usize = 3;
const HEAP_TYPES: [HeapType; HEAP_TYPE_COUNT] = [HeapType::Default, HeapType::Upload, HeapType::Readback];

/// One 64 MiB `vkAllocateMemory` call, sub-allocated by its own TLSF
/// instance. `D3D12Memory::HeapSize`.
const PAGE_SIZE: u64 = 64 * 1024 * 1024;
const MIN_ALLOCATION_SIZE: usize = 256;

struct Page {
    memory: vk::DeviceMemory,
    tlsf: Tlsf,
}

struct HeapBucket {
    memory_type_index: u32,
    pages: Vec<Page>,
}

impl HeapBucket {
    fn new(memory_type_index: u32) -> Self {
        Self { memory_type_index, pages: Vec::new() }
    }
}

/// A placed sub-allocation: backing memory plus the TLSF bookkeeping needed
/// to free it again.
pub struct PlacedAllocation {
    heap_index: usize,
    page_index: usize,
    tlsf_allocation: TlsfAllocation,
    pub memory: vk::DeviceMemory,
    pub offset: u64,
    pub size: u64,
}

impl std::fmt::Debug for PlacedAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacedAllocation")
            .field("heap_index", &self.heap_index)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

fn heap_index(usage: HeapUsage, heap_type: HeapType) -> usize {
    let usage_idx = HEAP_USAGES.iter().position(|u| *u == usage).expect("valid usage");
    let type_idx = HEAP_TYPES.iter().position(|t| *t == heap_type).expect("valid type");
    usage_idx * HEAP_TYPE_COUNT + type_idx
}

/// Owns every `usage × type` heap bucket for one device. Buffers and
/// textures both route placed allocations through here; committed
/// allocations (see module docs) never touch it.
pub struct MemoryAllocator {
    device: std::sync::Arc<ash::Device>,
    buckets: Vec<HeapBucket>,
}

impl MemoryAllocator {
    pub fn new(device: std::sync::Arc<ash::Device>, memory_properties: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let mut buckets = Vec::with_capacity(HEAP_USAGE_COUNT * HEAP_TYPE_COUNT);
        for usage in HEAP_USAGES {
            for heap_type in HEAP_TYPES {
                let _ = usage;
                let preferred = match heap_type {
                    HeapType::Default => vk::MemoryPropertyFlags::DEVICE_LOCAL,
                    HeapType::Upload => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                    HeapType::Readback => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
                };
                let index = (0..memory_properties.memory_type_count)
                    .find(|i| memory_properties.memory_types[*i as usize].property_flags.contains(preferred))
                    .or_else(|| {
                        // Fall back to any host-visible type for upload/readback, or type 0 for default.
                        (0..memory_properties.memory_type_count).find(|i| match heap_type {
                            HeapType::Default => true,
                            _ => memory_properties.memory_types[*i as usize]
                                .property_flags
                                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
                        })
                    })
                    .unwrap_or(0);
                buckets.push(HeapBucket::new(index));
            }
        }
        Self { device, buckets }
    }

    /// Reserve `requirements.size` bytes in the bucket for `(usage, heap_type)`,
    /// growing a fresh 64 MiB page when every existing page is full. Splits
    /// left-then-right inside the page's TLSF instance (`rhi_alloc::Tlsf`).
    pub fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        usage: HeapUsage,
        heap_type: HeapType,
    ) -> Result<PlacedAllocation, RhiError> {
        if requirements.size > PAGE_SIZE {
            return Err(RhiError::OutOfDeviceMemory { usage: "placed allocation larger than one page", requested: requirements.size });
        }
        let idx = heap_index(usage, heap_type);
        let bucket = &mut self.buckets[idx];

        for (page_index, page) in bucket.pages.iter_mut().enumerate() {
            if let Some(alloc) = page.tlsf.allocate(requirements.size as u32, requirements.alignment as u32) {
                return Ok(PlacedAllocation {
                    heap_index: idx,
                    page_index,
                    memory: page.memory,
                    offset: alloc.offset as u64,
                    size: alloc.size as u64,
                    tlsf_allocation: alloc,
                });
            }
        }

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(PAGE_SIZE)
            .memory_type_index(bucket.memory_type_index);
        let memory = unsafe {
            self.device
                .allocate_memory(&allocate_info, None)
                .map_err(|e| RhiError::Vulkan(format!("allocate page: {:?}", e)))?
        };
        let mut tlsf = Tlsf::new(PAGE_SIZE as u32, MIN_ALLOCATION_SIZE as u32, 5);
        let alloc = tlsf
            .allocate(requirements.size as u32, requirements.alignment as u32)
            .ok_or(RhiError::OutOfDeviceMemory { usage: "fresh page too small for request", requested: requirements.size })?;
        let page_index = bucket.pages.len();
        bucket.pages.push(Page { memory, tlsf });
        Ok(PlacedAllocation {
            heap_index: idx,
            page_index,
            memory,
            offset: alloc.offset as u64,
            size: alloc.size as u64,
            tlsf_allocation: alloc,
        })
    }

    /// Returns the sub-range to its page's TLSF instance. The backing page
    /// itself is never released back to the driver — pages live for the
    /// device's lifetime, matching the original's fixed per-bucket heap.
    pub fn free(&mut self, allocation: PlacedAllocation) {
        let bucket = &mut self.buckets[allocation.heap_index];
        if let Some(page) = bucket.pages.get_mut(allocation.page_index) {
            page.tlsf.free(allocation.tlsf_allocation);
        }
    }

    /// Frees every page's `VkDeviceMemory` up front, leaving every bucket
    /// empty. Called from `VulkanDevice`'s `Drop` before it destroys the
    /// `VkDevice`, since the struct's own `Drop` impl would otherwise run
    /// after the device handle is gone.
    pub fn release_all(&mut self) {
        for bucket in &mut self.buckets {
            for page in bucket.pages.drain(..) {
                unsafe {
                    self.device.free_memory(page.memory, None);
                }
            }
        }
    }
}

/// Shared handle to the device's allocator, cloned into every placed
/// resource so it can return its sub-allocation on `Drop` without borrowing
/// back from `VulkanDevice`.
pub type SharedMemoryAllocator = Arc<Mutex<MemoryAllocator>>;

/// How a resource's backing `VkDeviceMemory` was obtained, and therefore how
/// it must be released. Committed resources own a dedicated allocation made
/// with a direct `vkAllocateMemory` call; placed resources hold a
/// sub-allocation returned by [`MemoryAllocator::allocate`] and must hand it
/// back to that same allocator instead of freeing the (shared) page.
pub enum MemoryBacking {
    Committed(vk::DeviceMemory),
    Placed { allocator: SharedMemoryAllocator, allocation: PlacedAllocation },
    /// A view into memory owned by something outside this resource's own
    /// lifetime — a `vulkan::transient::TransientHeap` page that is reused
    /// (not freed) across frames. Dropping the resource destroys its
    /// `VkImage`/`VkBuffer`/view but never touches this memory.
    Unowned { memory: vk::DeviceMemory, offset: u64 },
}

impl MemoryBacking {
    pub fn memory(&self) -> vk::DeviceMemory {
        match self {
            MemoryBacking::Committed(memory) => *memory,
            MemoryBacking::Placed { allocation, .. } => allocation.memory,
            MemoryBacking::Unowned { memory, .. } => *memory,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            MemoryBacking::Committed(_) => 0,
            MemoryBacking::Placed { allocation, .. } => allocation.offset,
            MemoryBacking::Unowned { offset, .. } => *offset,
        }
    }

    /// Releases the backing memory: frees it directly if committed, returns
    /// the sub-range to its owning allocator if placed, or does nothing if
    /// unowned (the heap that placed it owns its lifetime).
    ///
    /// # Safety
    /// The caller must ensure no GPU work referencing this memory is still
    /// in flight and, for the committed case, that `device` is the device
    /// the memory was allocated from.
    pub unsafe fn release(self, device: &ash::Device) {
        match self {
            MemoryBacking::Committed(memory) => unsafe {
                device.free_memory(memory, None);
            },
            MemoryBacking::Placed { allocator, allocation } => {
                allocator.lock().unwrap().free(allocation);
            }
            MemoryBacking::Unowned { .. } => {}
        }
    }
}

impl std::fmt::Debug for MemoryAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("bucket_count", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        for bucket in &self.buckets {
            for page in &bucket.pages {
                unsafe {
                    self.device.free_memory(page.memory, None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_index_is_stable_and_distinct() {
        let mut seen = std::collections::HashSet::new();
        for usage in HEAP_USAGES {
            for heap_type in HEAP_TYPES {
                assert!(seen.insert(heap_index(usage, heap_type)));
            }
        }
        assert_eq!(seen.len(), HEAP_USAGE_COUNT * HEAP_TYPE_COUNT);
    }
}
