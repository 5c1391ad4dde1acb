//! Per-frame upload buffer ring: cheap bump allocation for the common small
//! per-draw constant/vertex upload, falling back to a size-keyed reuse map
//! for larger one-off transfers that would otherwise fragment the bump page.
//!
//! Mirrors `UploadBufferPool` / `UploadBufferAllocator`
//! (`Renderer/Device/Direct12/MemoryAllocator.h`): each in-flight frame owns
//! one pool; `next_frame()` rotates to the following frame's pool and resets
//! its bump cursor, recycling its large pages back into the size map instead
//! of freeing them, since the same upload sizes recur frame to frame (e.g. a
//! camera UBO).

use crate::error::RhiError;
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

const SMALL_PAGE_SIZE: u64 = 1024 * 1024;

struct Page {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: u64,
    mapped: *mut u8,
}

unsafe impl Send for Page {}

/// One page's worth of host-visible memory, bump-allocated until exhausted.
struct SmallPage {
    page: Page,
    cursor: u64,
}

struct FramePool {
    small_pages: Vec<SmallPage>,
    /// Large (> SMALL_PAGE_SIZE) pages keyed by exact size, reused across
    /// frames when a same-size request recurs instead of reallocating.
    large_pages: HashMap<u64, Vec<Page>>,
    /// Large pages handed out this frame; returned to `large_pages` on `next_frame`.
    large_in_use: Vec<(u64, Page)>,
}

impl FramePool {
    fn new() -> Self {
        Self { small_pages: Vec::new(), large_pages: HashMap::new(), large_in_use: Vec::new() }
    }
}

/// A host-visible sub-range ready for `memcpy` + a subsequent
/// `copy_buffer_to_buffer`/`copy_buffer_to_texture` into its real
/// destination.
pub struct UploadAllocation {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
    pub mapped_ptr: *mut u8,
}

unsafe impl Send for UploadAllocation {}

pub struct UploadRing {
    device: Arc<ash::Device>,
    memory_type_index: u32,
    frames: Vec<FramePool>,
    current_frame: usize,
}

impl UploadRing {
    pub fn new(device: Arc<ash::Device>, memory_type_index: u32, frame_count: u32) -> Self {
        let frames = (0..frame_count.max(1)).map(|_| FramePool::new()).collect();
        Self { device, memory_type_index, frames, current_frame: 0 }
    }

    fn create_page(&self, size: u64) -> Result<Page, RhiError> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            self.device.create_buffer(&create_info, None).map_err(|e| RhiError::Vulkan(format!("{:?}", e)))?
        };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(self.memory_type_index);
        let memory = unsafe {
            self.device.allocate_memory(&allocate_info, None).map_err(|e| RhiError::Vulkan(format!("{:?}", e)))?
        };
        unsafe {
            self.device.bind_buffer_memory(buffer, memory, 0).map_err(|e| RhiError::Vulkan(format!("{:?}", e)))?;
        }
        let mapped = unsafe {
            self.device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(|e| RhiError::Vulkan(format!("{:?}", e)))?
        } as *mut u8;
        Ok(Page { buffer, memory, size: requirements.size, mapped })
    }

    /// Returns a host-visible sub-range at least `size` bytes, aligned to
    /// `alignment`. Sizes above `SMALL_PAGE_SIZE` always get a dedicated,
    /// size-keyed page; smaller ones bump-allocate out of the frame's small
    /// pages, growing a new one when the current page can't fit the request.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<UploadAllocation, RhiError> {
        if size > SMALL_PAGE_SIZE {
            return self.allocate_large(size);
        }
        let frame = &mut self.frames[self.current_frame];
        for small in frame.small_pages.iter_mut() {
            let aligned = align_up64(small.cursor, alignment);
            if aligned + size <= small.page.size {
                small.cursor = aligned + size;
                return Ok(UploadAllocation {
                    buffer: small.page.buffer,
                    offset: aligned,
                    size,
                    mapped_ptr: unsafe { small.page.mapped.add(aligned as usize) },
                });
            }
        }
        let page = self.create_page(SMALL_PAGE_SIZE)?;
        let aligned = align_up64(0, alignment);
        let mapped_ptr = unsafe { page.mapped.add(aligned as usize) };
        let buffer = page.buffer;
        self.frames[self.current_frame].small_pages.push(SmallPage { page, cursor: aligned + size });
        Ok(UploadAllocation { buffer, offset: aligned, size, mapped_ptr })
    }

    fn allocate_large(&mut self, size: u64) -> Result<UploadAllocation, RhiError> {
        let frame = &mut self.frames[self.current_frame];
        let page = if let Some(pages) = frame.large_pages.get_mut(&size) {
            pages.pop()
        } else {
            None
        };
        let page = match page {
            Some(p) => p,
            None => self.create_page(size)?,
        };
        let alloc = UploadAllocation { buffer: page.buffer, offset: 0, size, mapped_ptr: page.mapped };
        self.frames[self.current_frame].large_in_use.push((size, page));
        Ok(alloc)
    }

    /// Rotate to the next frame's pool: reset all bump cursors to zero and
    /// move this frame's large pages back into the reuse map for the next
    /// time this frame slot comes around.
    pub fn next_frame(&mut self) {
        {
            let frame = &mut self.frames[self.current_frame];
            for small in frame.small_pages.iter_mut() {
                small.cursor = 0;
            }
            for (size, page) in frame.large_in_use.drain(..) {
                frame.large_pages.entry(size).or_default().push(page);
            }
        }
        self.current_frame = (self.current_frame + 1) % self.frames.len();
    }

    /// Unmaps and frees every page up front, leaving every frame pool empty.
    /// Called from `VulkanDevice`'s `Drop` before it destroys the `VkDevice`.
    pub fn release_all(&mut self) {
        for frame in &mut self.frames {
            for small in frame.small_pages.drain(..) {
                unsafe {
                    self.device.unmap_memory(small.page.memory);
                    self.device.destroy_buffer(small.page.buffer, None);
                    self.device.free_memory(small.page.memory, None);
                }
            }
            for (_, pages) in frame.large_pages.drain() {
                for page in pages {
                    unsafe {
                        self.device.unmap_memory(page.memory);
                        self.device.destroy_buffer(page.buffer, None);
                        self.device.free_memory(page.memory, None);
                    }
                }
            }
            for (_, page) in frame.large_in_use.drain(..) {
                unsafe {
                    self.device.unmap_memory(page.memory);
                    self.device.destroy_buffer(page.buffer, None);
                    self.device.free_memory(page.memory, None);
                }
            }
        }
    }
}

fn align_up64(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

impl std::fmt::Debug for UploadRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRing").field("frame_count", &self.frames.len()).finish_non_exhaustive()
    }
}

impl Drop for UploadRing {
    fn drop(&mut self) {
        for frame in &mut self.frames {
            for small in frame.small_pages.drain(..) {
                unsafe {
                    self.device.unmap_memory(small.page.memory);
                    self.device.destroy_buffer(small.page.buffer, None);
                    self.device.free_memory(small.page.memory, None);
                }
            }
            for (_, pages) in frame.large_pages.drain() {
                for page in pages {
                    unsafe {
                        self.device.unmap_memory(page.memory);
                        self.device.destroy_buffer(page.buffer, None);
                        self.device.free_memory(page.memory, None);
                    }
                }
            }
            for (_, page) in frame.large_in_use.drain(..) {
                unsafe {
                    self.device.unmap_memory(page.memory);
                    self.device.destroy_buffer(page.buffer, None);
                    self.device.free_memory(page.memory, None);
                }
            }
        }
    }
}
