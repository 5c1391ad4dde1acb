//! CPU and GPU descriptor heap allocators.
//!
//! Grounded on `DescriptorAllocator.h`'s `CPUDescriptorAllocator` /
//! `GPUDescriptorAllocator`: the original wraps 4 CPU heap types
//! (CBV/SRV/UAV, sampler, RTV, DSV) with RAII slot allocation
//! (`D3D12CPUDescriptorHeap`, backed by `RandomObjectAllocatorMeta`), and 2
//! shader-visible GPU heap types (only CBV/SRV/UAV and sampler can be bound
//! simultaneously in D3D12) with frame-arena allocation
//! (`D3D12GPUDescriptorHeap`, backed by `FrameObjectAllocatorMeta`).
//!
//! Vulkan has no raw descriptor-heap-offset addressing — descriptor sets are
//! opaque, pool-allocated objects, not slots into a flat table. This module
//! keeps the original's two-tier *lifetime* model (RAII slots for
//! long-lived bindless-style resources vs. frame-arena slots for per-frame
//! transient ones) while realizing each "slot" as a `VulkanDescriptorSet`
//! handed out from a `VulkanDescriptorPool`, rather than as an offset into a
//! descriptor heap.

use crate::error::RhiError;
use crate::{
    canonical_sampler_descriptors, DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBinding,
    DescriptorType, Sampler, ShaderStages, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage,
};
use rhi_alloc::{FrameArenaAllocator, ObjectHandle, RandomSlotAllocator};

const CPU_PAGE_CAPACITY: u32 = 1024;
const GPU_PAGE_CAPACITY: u32 = 1024;

/// Up to 8 SRVs and 8 UAVs staged by [`GpuDescriptorAllocator::stage_resource_binding`].
const RESOURCE_SLOT_COUNT: usize = 8;
/// Slots in the fixed canonical sampler set.
const CANONICAL_SAMPLER_COUNT: usize = 6;

/// The 4 CPU-visible descriptor heap types from `CPUDescriptorAllocator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

/// The 2 types that can be bound as shader-visible GPU heaps simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuHeapType {
    CbvSrvUav,
    Sampler,
}

/// A long-lived descriptor slot, freed explicitly (or via RAII `Drop`) the
/// way `CPUDescriptor`'s move-only swap-based destructor does.
pub struct CpuDescriptorHandle {
    heap_type: CpuHeapType,
    handle: ObjectHandle,
    pub set: Box<dyn DescriptorSet>,
}

/// One CPU-visible heap type: a pool of `VulkanDescriptorSet`s indexed by a
/// `RandomSlotAllocator`, growing a fresh descriptor pool page whenever the
/// slot allocator grows a fresh page.
struct CpuHeap {
    slots: RandomSlotAllocator,
    pools: Vec<Box<dyn DescriptorPool>>,
}

impl CpuHeap {
    fn new() -> Result<Self, RhiError> {
        Ok(Self { slots: RandomSlotAllocator::new(CPU_PAGE_CAPACITY)?, pools: Vec::new() })
    }
}

/// Host-side CPU descriptor allocator: one `CpuHeap` per `CpuHeapType`,
/// mirroring `CPUDescriptorAllocator`'s 4 `D3D12CPUDescriptorHeap` members.
pub struct CpuDescriptorAllocator<'d> {
    device: &'d dyn crate::Device,
    heaps: std::collections::HashMap<CpuHeapType, CpuHeap>,
}

impl<'d> CpuDescriptorAllocator<'d> {
    pub fn new(device: &'d dyn crate::Device) -> Result<Self, RhiError> {
        let mut heaps = std::collections::HashMap::new();
        for ty in [CpuHeapType::CbvSrvUav, CpuHeapType::Sampler, CpuHeapType::Rtv, CpuHeapType::Dsv] {
            heaps.insert(ty, CpuHeap::new()?);
        }
        Ok(Self { device, heaps })
    }

    /// Allocate a persistent descriptor set from `layout` in the given heap
    /// type's pool, growing a new 1024-set descriptor pool page when the
    /// slot allocator needs one.
    pub fn allocate(
        &mut self,
        heap_type: CpuHeapType,
        layout: &dyn DescriptorSetLayout,
    ) -> Result<CpuDescriptorHandle, RhiError> {
        let heap = self.heaps.get_mut(&heap_type).expect("all 4 heap types registered in new()");
        let handle = heap.slots.allocate()?;
        if handle.page_index as usize == heap.pools.len() {
            let pool = self
                .device
                .create_descriptor_pool(CPU_PAGE_CAPACITY)
                .map_err(RhiError::Vulkan)?;
            heap.pools.push(pool);
        }
        let pool = &heap.pools[handle.page_index as usize];
        let set = pool.allocate_set(layout).map_err(RhiError::Vulkan)?;
        Ok(CpuDescriptorHandle { heap_type, handle, set })
    }

    pub fn free(&mut self, handle: CpuDescriptorHandle) {
        if let Some(heap) = self.heaps.get_mut(&handle.heap_type) {
            heap.slots.free(handle.handle);
        }
    }
}

/// One GPU-visible (shader-visible) heap type: a single frame-arena and a
/// growing list of descriptor pool pages, reset (not freed) each frame.
struct GpuHeap {
    arena: FrameArenaAllocator,
    pools: Vec<Box<dyn DescriptorPool>>,
}

impl GpuHeap {
    fn new() -> Result<Self, RhiError> {
        Ok(Self { arena: FrameArenaAllocator::new(GPU_PAGE_CAPACITY)?, pools: Vec::new() })
    }
}

/// Per-frame transient descriptor allocator for the 2 shader-visible heap
/// types, mirroring `GPUDescriptorAllocator`. Reset once per frame instead
/// of being individually freed.
pub struct GpuDescriptorAllocator<'d> {
    device: &'d dyn crate::Device,
    heaps: std::collections::HashMap<GpuHeapType, GpuHeap>,
    resource_binding_layout: Box<dyn DescriptorSetLayout>,
    sampler_set_layout: Box<dyn DescriptorSetLayout>,
    null_texture: Box<dyn Texture>,
    canonical_samplers: Vec<Box<dyn Sampler>>,
}

impl<'d> GpuDescriptorAllocator<'d> {
    pub fn new(device: &'d dyn crate::Device) -> Result<Self, RhiError> {
        let mut heaps = std::collections::HashMap::new();
        for ty in [GpuHeapType::CbvSrvUav, GpuHeapType::Sampler] {
            heaps.insert(ty, GpuHeap::new()?);
        }

        let resource_binding_layout = device
            .create_descriptor_set_layout(&[
                DescriptorSetLayoutBinding {
                    binding: 0,
                    descriptor_type: DescriptorType::SampledImage,
                    count: RESOURCE_SLOT_COUNT as u32,
                    stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT | ShaderStages::COMPUTE,
                },
                DescriptorSetLayoutBinding {
                    binding: 1,
                    descriptor_type: DescriptorType::StorageImage,
                    count: RESOURCE_SLOT_COUNT as u32,
                    stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT | ShaderStages::COMPUTE,
                },
            ])
            .map_err(RhiError::Vulkan)?;
        let sampler_set_layout = device
            .create_descriptor_set_layout(&[DescriptorSetLayoutBinding {
                binding: 0,
                descriptor_type: DescriptorType::Sampler,
                count: CANONICAL_SAMPLER_COUNT as u32,
                stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT | ShaderStages::COMPUTE,
            }])
            .map_err(RhiError::Vulkan)?;

        let null_texture = device
            .create_texture(&TextureDescriptor {
                label: Some("canonical-null-texture"),
                size: (1, 1, 1),
                dimension: TextureDimension::D2,
                format: TextureFormat::Rgba8Unorm,
                mip_level_count: 1,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::STORAGE_BINDING | TextureUsage::COPY_DST,
            })
            .map_err(RhiError::Vulkan)?;
        let canonical_samplers = canonical_sampler_descriptors()
            .iter()
            .map(|desc| device.create_sampler(desc).map_err(RhiError::Vulkan))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            device,
            heaps,
            resource_binding_layout,
            sampler_set_layout,
            null_texture,
            canonical_samplers,
        })
    }

    pub fn allocate(
        &mut self,
        heap_type: GpuHeapType,
        layout: &dyn DescriptorSetLayout,
    ) -> Result<Box<dyn DescriptorSet>, RhiError> {
        let heap = self.heaps.get_mut(&heap_type).expect("both heap types registered in new()");
        Self::allocate_from_heap(heap, self.device, layout)
    }

    /// Shared by `allocate` and `stage_resource_binding`. Takes the heap and
    /// device as plain parameters rather than `&mut self` so a caller that
    /// already holds a borrow of one `self` field (e.g. a cached layout) can
    /// still pass it in without aliasing a `&mut self` receiver.
    fn allocate_from_heap(heap: &mut GpuHeap, device: &dyn crate::Device, layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, RhiError> {
        let handle = heap.arena.allocate()?;
        if handle.page_index as usize == heap.pools.len() {
            let pool = device.create_descriptor_pool(GPU_PAGE_CAPACITY).map_err(RhiError::Vulkan)?;
            heap.pools.push(pool);
        }
        let pool = &heap.pools[handle.page_index as usize];
        pool.allocate_set(layout).map_err(RhiError::Vulkan)
    }

    /// Stage up to 8 SRVs and up to 8 UAVs into one freshly allocated
    /// CBV/SRV/UAV-heap descriptor set, filling every unbound slot with the
    /// canonical null texture, and bind the canonical 6-sampler set into a
    /// second, sampler-heap descriptor set. Mirrors `set_resource_binding`'s
    /// staging half; the caller still issues the per-resource transitions
    /// and binds both sets on the recorder.
    pub fn stage_resource_binding(
        &mut self,
        srvs: &[Option<&dyn Texture>; RESOURCE_SLOT_COUNT],
        uavs: &[Option<&dyn Texture>; RESOURCE_SLOT_COUNT],
    ) -> Result<(Box<dyn DescriptorSet>, Box<dyn DescriptorSet>), RhiError> {
        let resource_heap = self.heaps.get_mut(&GpuHeapType::CbvSrvUav).expect("both heap types registered in new()");
        let mut resource_set = Self::allocate_from_heap(resource_heap, self.device, self.resource_binding_layout.as_ref())?;
        for (i, srv) in srvs.iter().enumerate() {
            let texture = srv.unwrap_or_else(|| self.null_texture.as_ref());
            resource_set.write_texture_at(0, i as u32, texture).map_err(RhiError::Vulkan)?;
        }
        for (i, uav) in uavs.iter().enumerate() {
            let texture = uav.unwrap_or_else(|| self.null_texture.as_ref());
            resource_set.write_texture_at(1, i as u32, texture).map_err(RhiError::Vulkan)?;
        }

        let sampler_heap = self.heaps.get_mut(&GpuHeapType::Sampler).expect("both heap types registered in new()");
        let mut sampler_set = Self::allocate_from_heap(sampler_heap, self.device, self.sampler_set_layout.as_ref())?;
        for (i, sampler) in self.canonical_samplers.iter().enumerate() {
            sampler_set.write_sampler_at(0, i as u32, sampler.as_ref()).map_err(RhiError::Vulkan)?;
        }

        Ok((resource_set, sampler_set))
    }

    /// Rewind every heap's frame arena and recycle its descriptor pool
    /// pages. Pool memory stays allocated and gets overwritten by the next
    /// frame's `allocate` calls.
    pub fn reset(&mut self) -> Result<(), RhiError> {
        for heap in self.heaps.values_mut() {
            heap.arena.reset();
            for pool in &heap.pools {
                pool.reset().map_err(RhiError::Vulkan)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Buffer, BufferDescriptor, CommandEncoder, ComputePipeline, ComputePipelineDescriptor, DescriptorPoolDescriptor,
        Fence, GraphicsPipeline, GraphicsPipelineDescriptor, Queue, ResourceId, Semaphore, TransientHeap,
    };
    use std::any::Any;
    use std::cell::Cell;

    #[derive(Debug)]
    struct StubTexture {
        id: ResourceId,
    }

    impl Texture for StubTexture {
        fn id(&self) -> ResourceId {
            self.id
        }
        fn format(&self) -> TextureFormat {
            TextureFormat::Rgba8Unorm
        }
        fn size(&self) -> (u32, u32, u32) {
            (1, 1, 1)
        }
        fn dimension(&self) -> TextureDimension {
            TextureDimension::D2
        }
        fn mip_level_count(&self) -> u32 {
            1
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct StubSampler {
        id: u64,
    }

    impl Sampler for StubSampler {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct StubLayout;

    impl DescriptorSetLayout for StubLayout {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Records every write by binding/array-element instead of touching any
    /// real GPU object, so a test can assert on staged slot contents.
    #[derive(Debug, Default)]
    struct StubSet {
        srv: [Option<ResourceId>; RESOURCE_SLOT_COUNT],
        uav: [Option<ResourceId>; RESOURCE_SLOT_COUNT],
        samplers: [Option<u64>; CANONICAL_SAMPLER_COUNT],
    }

    impl DescriptorSet for StubSet {
        fn write_buffer(&mut self, _binding: u32, _buffer: &dyn Buffer, _offset: u64, _size: u64) -> Result<(), String> {
            unimplemented!("not exercised by the resource-binding staging test")
        }
        fn write_texture(&mut self, binding: u32, texture: &dyn Texture) -> Result<(), String> {
            self.write_texture_at(binding, 0, texture)
        }
        fn write_sampled_image(&mut self, _binding: u32, _texture: &dyn Texture, _sampler: &dyn Sampler) -> Result<(), String> {
            unimplemented!("not exercised by the resource-binding staging test")
        }
        fn write_sampler(&mut self, binding: u32, sampler: &dyn Sampler) -> Result<(), String> {
            self.write_sampler_at(binding, 0, sampler)
        }
        fn write_buffer_at(
            &mut self,
            _binding: u32,
            _array_element: u32,
            _buffer: &dyn Buffer,
            _offset: u64,
            _size: u64,
        ) -> Result<(), String> {
            unimplemented!("not exercised by the resource-binding staging test")
        }
        fn write_texture_at(&mut self, binding: u32, array_element: u32, texture: &dyn Texture) -> Result<(), String> {
            let id = texture.as_any().downcast_ref::<StubTexture>().ok_or("not a StubTexture")?.id;
            match binding {
                0 => self.srv[array_element as usize] = Some(id),
                1 => self.uav[array_element as usize] = Some(id),
                _ => return Err("unexpected binding".to_string()),
            }
            Ok(())
        }
        fn write_sampled_image_at(
            &mut self,
            _binding: u32,
            _array_element: u32,
            _texture: &dyn Texture,
            _sampler: &dyn Sampler,
        ) -> Result<(), String> {
            unimplemented!("not exercised by the resource-binding staging test")
        }
        fn write_sampler_at(&mut self, binding: u32, array_element: u32, sampler: &dyn Sampler) -> Result<(), String> {
            if binding != 0 {
                return Err("unexpected binding".to_string());
            }
            let id = sampler.as_any().downcast_ref::<StubSampler>().ok_or("not a StubSampler")?.id;
            self.samplers[array_element as usize] = Some(id);
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct StubPool;

    impl DescriptorPool for StubPool {
        fn allocate_set(&self, _layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, String> {
            Ok(Box::new(StubSet::default()))
        }
        fn reset(&self) -> Result<(), String> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct StubDevice {
        next_id: Cell<u64>,
    }

    impl StubDevice {
        fn new() -> Self {
            Self { next_id: Cell::new(0) }
        }

        fn next_id(&self) -> u64 {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            id
        }
    }

    impl crate::Device for StubDevice {
        fn create_buffer(&self, _desc: &BufferDescriptor) -> Result<Box<dyn Buffer>, String> {
            unimplemented!()
        }
        fn create_texture(&self, _desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String> {
            Ok(Box::new(StubTexture { id: self.next_id() }))
        }
        fn create_transient_heap(&self) -> Box<dyn TransientHeap> {
            unimplemented!()
        }
        fn create_sampler(&self, _desc: &crate::SamplerDescriptor) -> Result<Box<dyn Sampler>, String> {
            Ok(Box::new(StubSampler { id: self.next_id() }))
        }
        fn create_compute_pipeline(&self, _desc: &ComputePipelineDescriptor) -> Result<Box<dyn ComputePipeline>, String> {
            unimplemented!()
        }
        fn create_graphics_pipeline(&self, _desc: &GraphicsPipelineDescriptor) -> Result<Box<dyn GraphicsPipeline>, String> {
            unimplemented!()
        }
        fn create_descriptor_set_layout(&self, _bindings: &[DescriptorSetLayoutBinding]) -> Result<Box<dyn DescriptorSetLayout>, String> {
            Ok(Box::new(StubLayout))
        }
        fn create_descriptor_pool(&self, _max_sets: u32) -> Result<Box<dyn DescriptorPool>, String> {
            Ok(Box::new(StubPool))
        }
        fn create_descriptor_pool_with_descriptor(&self, _desc: &DescriptorPoolDescriptor) -> Result<Box<dyn DescriptorPool>, String> {
            unimplemented!()
        }
        fn create_command_encoder(&self) -> Result<Box<dyn CommandEncoder>, String> {
            unimplemented!()
        }
        fn write_buffer(&self, _buffer: &dyn Buffer, _offset: u64, _data: &[u8]) -> Result<(), String> {
            unimplemented!()
        }
        fn upload_to_buffer(&self, _buffer: &dyn Buffer, _offset: u64, _data: &[u8]) -> Result<(), String> {
            unimplemented!()
        }
        fn upload_to_buffer_async(&self, _buffer: &dyn Buffer, _offset: u64, _data: &[u8], _signal_fence: Option<&dyn Fence>) -> Result<(), String> {
            unimplemented!()
        }
        fn submit_buffer_copy(
            &self,
            _src: &dyn Buffer,
            _src_offset: u64,
            _dst: &dyn Buffer,
            _dst_offset: u64,
            _size: u64,
            _signal_fence: Option<&dyn Fence>,
        ) -> Result<(), String> {
            unimplemented!()
        }
        fn submit(&self, _command_buffers: Vec<Box<dyn crate::CommandBuffer>>) -> Result<(), String> {
            unimplemented!()
        }
        fn queue(&self) -> Result<Box<dyn Queue>, String> {
            unimplemented!()
        }
        fn transfer_queue(&self) -> Option<Box<dyn Queue>> {
            unimplemented!()
        }
        fn wait_idle(&self) -> Result<(), String> {
            unimplemented!()
        }
        fn create_fence(&self, _signaled: bool) -> Result<Box<dyn Fence>, String> {
            unimplemented!()
        }
        fn create_semaphore(&self) -> Result<Box<dyn Semaphore>, String> {
            unimplemented!()
        }
    }

    /// Scenario S6: 2 SRVs at bind-points 0 and 3. The staged SRV range
    /// contains both supplied descriptors at their declared positions and
    /// the canonical null SRV everywhere else; the sampler range equals the
    /// canonical 6-sampler set.
    #[test]
    fn s6_descriptor_staging_completeness() {
        let device = StubDevice::new();
        let mut allocator = GpuDescriptorAllocator::new(&device).unwrap();

        let srv0 = StubTexture { id: 1000 };
        let srv3 = StubTexture { id: 1001 };
        let mut srvs: [Option<&dyn Texture>; RESOURCE_SLOT_COUNT] = [None; RESOURCE_SLOT_COUNT];
        srvs[0] = Some(&srv0);
        srvs[3] = Some(&srv3);
        let uavs: [Option<&dyn Texture>; RESOURCE_SLOT_COUNT] = [None; RESOURCE_SLOT_COUNT];

        let (resource_set, sampler_set) = allocator.stage_resource_binding(&srvs, &uavs).unwrap();
        let resource_set = resource_set.as_any().downcast_ref::<StubSet>().unwrap();

        assert_eq!(resource_set.srv[0], Some(1000));
        assert_eq!(resource_set.srv[3], Some(1001));
        let null_id = resource_set.srv[1].expect("unbound slot filled with the canonical null texture");
        for i in [1usize, 2, 4, 5, 6, 7] {
            assert_eq!(resource_set.srv[i], Some(null_id), "slot {i} should hold the canonical null SRV");
        }
        for i in 0..RESOURCE_SLOT_COUNT {
            assert_eq!(resource_set.uav[i], Some(null_id), "every UAV slot is unbound in this scenario");
        }

        let sampler_set = sampler_set.as_any().downcast_ref::<StubSet>().unwrap();
        let sampler_ids: Vec<u64> = sampler_set.samplers.iter().map(|s| s.expect("all 6 canonical slots written")).collect();
        assert_eq!(sampler_ids.len(), CANONICAL_SAMPLER_COUNT);
        // The null texture claims id 0 in GpuDescriptorAllocator::new before
        // the 6 canonical samplers are created, so their StubDevice ids run
        // 1..=6 in construction order — which is also canonical slot order.
        assert_eq!(sampler_ids, (1..=CANONICAL_SAMPLER_COUNT as u64).collect::<Vec<_>>(), "canonical sampler order is fixed");
    }
}
