//! Paged handle allocators (§4.1): a random-free slab allocator for
//! RAII-style slots, and a bump-pointer frame arena for per-frame ranges.
//!
//! Ported from `original_source/Engine/Include/Utils/Allocator.h`
//! (`RandomObjectAllocatorMeta` / `FrameObjectAllocatorMeta`): these classes
//! only track `{page_index, offset}` pairs, they never own the allocated
//! object itself — that's the caller's job.

use crate::{AllocError, MAX_PAGE_CAPACITY};

/// A `{page_index:16, offset:16}` pair uniformly used by descriptor-slot
/// allocators (§3 Object handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub page_index: u16,
    pub offset: u16,
}

/// Carves a fixed-capacity slot page each time exhaustion occurs, and hands
/// out/recycles slots through a LIFO free list. No compaction.
pub struct RandomSlotAllocator {
    page_capacity: u16,
    page_count: u32,
    free_list: Vec<ObjectHandle>,
}

impl RandomSlotAllocator {
    pub fn new(page_capacity: u32) -> Result<Self, AllocError> {
        if page_capacity == 0 || page_capacity > MAX_PAGE_CAPACITY {
            return Err(AllocError::PageCapacityTooLarge(page_capacity, MAX_PAGE_CAPACITY));
        }
        Ok(Self {
            page_capacity: page_capacity as u16,
            page_count: 0,
            free_list: Vec::new(),
        })
    }

    pub fn allocate(&mut self) -> Result<ObjectHandle, AllocError> {
        if self.free_list.is_empty() {
            if self.page_count >= MAX_PAGE_CAPACITY {
                return Err(AllocError::DescriptorSpaceExhausted(MAX_PAGE_CAPACITY));
            }
            let page_index = self.page_count as u16;
            for offset in (0..self.page_capacity).rev() {
                self.free_list.push(ObjectHandle { page_index, offset });
            }
            self.page_count += 1;
        }
        // LIFO: pop the most recently freed handle for cache locality.
        Ok(self.free_list.pop().expect("just replenished"))
    }

    pub fn free(&mut self, handle: ObjectHandle) {
        self.free_list.push(handle);
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn live_slot_count(&self) -> u32 {
        self.page_count * self.page_capacity as u32 - self.free_list.len() as u32
    }
}

/// Bump-pointer allocator across fixed-capacity pages; never frees
/// individual slots, only `reset()` as a whole (e.g. once per frame).
pub struct FrameArenaAllocator {
    page_capacity: u16,
    page_index: u16,
    page_count: u32,
    offset: u16,
}

impl FrameArenaAllocator {
    pub fn new(page_capacity: u32) -> Result<Self, AllocError> {
        if page_capacity == 0 || page_capacity > MAX_PAGE_CAPACITY {
            return Err(AllocError::PageCapacityTooLarge(page_capacity, MAX_PAGE_CAPACITY));
        }
        Ok(Self {
            page_capacity: page_capacity as u16,
            page_index: 0,
            page_count: 0,
            offset: 0,
        })
    }

    /// Allocate a single slot.
    pub fn allocate(&mut self) -> Result<ObjectHandle, AllocError> {
        self.allocate_range(1)
    }

    /// Allocate `n` contiguous slots. If the current page doesn't have `n`
    /// slots left, advance to the next page, leaving the remaining slots in
    /// the old page as residue (never handed out).
    pub fn allocate_range(&mut self, n: u16) -> Result<ObjectHandle, AllocError> {
        assert!(n >= 1 && n <= self.page_capacity, "range must fit within one page");
        let needs_new_page = self.page_count == 0 || self.offset as u32 + n as u32 > self.page_capacity as u32;
        if needs_new_page {
            if self.page_count == 0 {
                self.page_index = 0;
            } else {
                if self.page_index as u32 + 1 >= MAX_PAGE_CAPACITY {
                    return Err(AllocError::DescriptorSpaceExhausted(MAX_PAGE_CAPACITY));
                }
                self.page_index += 1;
            }
            self.offset = 0;
            if self.page_index as u32 == self.page_count {
                self.page_count += 1;
            }
        }
        let handle = ObjectHandle { page_index: self.page_index, offset: self.offset };
        self.offset += n;
        Ok(handle)
    }

    /// Rewind to page 0, offset 0. Does not release page memory.
    pub fn reset(&mut self) {
        self.page_index = 0;
        self.offset = 0;
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_slot_raii_roundtrip() {
        let mut alloc = RandomSlotAllocator::new(4).unwrap();
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_eq!(alloc.live_slot_count(), 2);
        alloc.free(a);
        assert_eq!(alloc.live_slot_count(), 1);
        let c = alloc.allocate().unwrap();
        // LIFO: c should reuse `a`'s slot, not grow a new page.
        assert_eq!(c, a);
        alloc.free(b);
        alloc.free(c);
        assert_eq!(alloc.live_slot_count(), 0);
        assert_eq!(alloc.page_count(), 1);
    }

    #[test]
    fn random_slot_grows_pages_on_exhaustion() {
        let mut alloc = RandomSlotAllocator::new(2).unwrap();
        let handles: Vec<_> = (0..5).map(|_| alloc.allocate().unwrap()).collect();
        assert_eq!(alloc.page_count(), 3); // ceil(5/2)
        assert_eq!(handles.len(), 5);
    }

    #[test]
    fn frame_arena_reset_rewinds_to_origin() {
        let mut arena = FrameArenaAllocator::new(8).unwrap();
        let _ = arena.allocate_range(5).unwrap();
        let _ = arena.allocate_range(5).unwrap(); // doesn't fit in first page, rolls to page 1
        assert_eq!(arena.page_count(), 2);
        arena.reset();
        let h = arena.allocate_range(1).unwrap();
        assert_eq!(h.page_index, 0);
        assert_eq!(h.offset, 0);
    }

    #[test]
    fn frame_arena_range_leaves_residue_on_overflow() {
        let mut arena = FrameArenaAllocator::new(4).unwrap();
        let first = arena.allocate_range(3).unwrap();
        assert_eq!(first, ObjectHandle { page_index: 0, offset: 0 });
        // Only 1 slot left in page 0; a range of 2 must roll to a fresh page.
        let second = arena.allocate_range(2).unwrap();
        assert_eq!(second, ObjectHandle { page_index: 1, offset: 0 });
    }
}
