//! Render hardware interface: a thin, explicit GPU abstraction modeled on
//! command lists, descriptor heaps and placed resources rather than a
//! bind-group-style wrapper. The Vulkan backend (`vulkan` module) is the only
//! realization today; the trait surface stays backend-agnostic so a D3D12 or
//! Metal backend could be added without touching callers.
//!
//! `rhi-alloc` supplies the host-side bookkeeping (handle slots, TLSF) that
//! the Vulkan backend's memory allocator and descriptor heaps build on.

pub mod device_resources;
pub mod error;
pub mod pso;
pub mod vulkan;

pub use error::RhiError;
pub use vulkan::VulkanDevice;

use std::any::Any;
use std::fmt::Debug;

/// Process-wide unique id handed out for every buffer, texture and swapchain
/// image, monotonically increasing. Used as a frame-graph resource key.
pub type ResourceId = u64;

/// Renderer-wide knobs read once at device creation.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Number of frames the CPU is allowed to record ahead of the GPU.
    pub frame_count: u32,
    /// Enable validation layers (Vulkan) / debug layer (D3D12-class backends).
    pub validation: bool,
    /// Initial swapchain extent in pixels.
    pub window_extent: (u32, u32),
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frame_count: 3,
            validation: cfg!(debug_assertions),
            window_extent: (1920, 1080),
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX   = 1 << 0;
        const INDEX    = 1 << 1;
        const UNIFORM  = 1 << 2;
        const STORAGE  = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
        const INDIRECT = 1 << 6;
    }
}

/// Where a buffer's backing memory should live. `HostVisible` maps to an
/// upload/readback heap (mappable, usually not device-local); `DeviceLocal`
/// maps to the fast on-device heap and requires a staging copy to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferMemoryPreference {
    HostVisible,
    DeviceLocal,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    pub label: Option<&'a str>,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: BufferMemoryPreference,
}

pub trait Buffer: Debug {
    fn id(&self) -> ResourceId;
    fn size(&self) -> u64;
    fn host_visible(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R16Float,
    R32Float,
    D32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::D32Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    D2Array,
    D3,
    Cube,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC          = 1 << 0;
        const COPY_DST          = 1 << 1;
        const TEXTURE_BINDING   = 1 << 2;
        const STORAGE_BINDING   = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    pub label: Option<&'a str>,
    pub size: (u32, u32, u32),
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub mip_level_count: u32,
    pub usage: TextureUsage,
}

pub trait Texture: Debug {
    fn id(&self) -> ResourceId;
    fn format(&self) -> TextureFormat;
    fn size(&self) -> (u32, u32, u32);
    fn dimension(&self) -> TextureDimension;
    fn mip_level_count(&self) -> u32;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerDescriptor {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub anisotropy_clamp: Option<f32>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            anisotropy_clamp: None,
        }
    }
}

pub trait Sampler: Debug {
    fn as_any(&self) -> &dyn Any;
}

/// The fixed 6-slot sampler set bound in this order on every shading state:
/// point/linear/anisotropic filtering crossed with wrap/clamp addressing.
/// Slot order is part of the shader-binding contract and must never change.
pub fn canonical_sampler_descriptors() -> [SamplerDescriptor; 6] {
    let wrap = (AddressMode::Repeat, AddressMode::Repeat, AddressMode::Repeat);
    let clamp = (AddressMode::ClampToEdge, AddressMode::ClampToEdge, AddressMode::ClampToEdge);
    let make = |mag: FilterMode, min: FilterMode, addr: (AddressMode, AddressMode, AddressMode), aniso: Option<f32>| SamplerDescriptor {
        mag_filter: mag,
        min_filter: min,
        address_mode_u: addr.0,
        address_mode_v: addr.1,
        address_mode_w: addr.2,
        anisotropy_clamp: aniso,
    };
    [
        make(FilterMode::Nearest, FilterMode::Nearest, wrap, None),
        make(FilterMode::Nearest, FilterMode::Nearest, clamp, None),
        make(FilterMode::Linear, FilterMode::Linear, wrap, None),
        make(FilterMode::Linear, FilterMode::Linear, clamp, None),
        make(FilterMode::Linear, FilterMode::Linear, wrap, Some(16.0)),
        make(FilterMode::Linear, FilterMode::Linear, clamp, Some(16.0)),
    ]
}

#[derive(Debug, Clone)]
pub struct ShaderStage<'a> {
    pub source: &'a [u8],
    pub entry_point: String,
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub shader_source: String,
    pub entry_point: String,
    pub layout_bindings: Vec<DescriptorSetLayoutBinding>,
}

pub trait ComputePipeline: Debug {
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
}

#[derive(Debug, Clone)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Default)]
pub struct VertexInputDescriptor {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Back,
    Front,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizationState {
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOp,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

#[derive(Debug, Clone)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareOp,
}

#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub vertex_shader: ShaderStage<'a>,
    pub fragment_shader: Option<ShaderStage<'a>>,
    pub vertex_input: VertexInputDescriptor,
    pub primitive_topology: PrimitiveTopology,
    pub rasterization: RasterizationState,
    pub color_targets: Vec<ColorTargetState>,
    pub depth_stencil: Option<DepthStencilState>,
    pub layout_bindings: Vec<DescriptorSetLayoutBinding>,
}

pub trait GraphicsPipeline: Debug {
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    StorageImage,
    SampledImage,
    CombinedImageSampler,
    Sampler,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
}

pub trait DescriptorSetLayout: Debug {
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorPoolDescriptor {
    pub max_sets: u32,
    pub pool_sizes: Vec<(DescriptorType, u32)>,
}

pub trait DescriptorPool: Debug {
    fn allocate_set(&self, layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, String>;
    /// Recycle every set this pool has handed out without destroying the
    /// pool itself, for a frame-arena heap that's reused generation to
    /// generation instead of being torn down.
    fn reset(&self) -> Result<(), String>;
}

pub trait DescriptorSet: Debug {
    fn write_buffer(&mut self, binding: u32, buffer: &dyn Buffer, offset: u64, size: u64) -> Result<(), String>;
    fn write_texture(&mut self, binding: u32, texture: &dyn Texture) -> Result<(), String>;
    fn write_sampled_image(&mut self, binding: u32, texture: &dyn Texture, sampler: &dyn Sampler) -> Result<(), String>;
    fn write_sampler(&mut self, binding: u32, sampler: &dyn Sampler) -> Result<(), String>;
    fn write_buffer_at(
        &mut self,
        binding: u32,
        array_element: u32,
        buffer: &dyn Buffer,
        offset: u64,
        size: u64,
    ) -> Result<(), String>;
    fn write_texture_at(&mut self, binding: u32, array_element: u32, texture: &dyn Texture) -> Result<(), String>;
    fn write_sampled_image_at(
        &mut self,
        binding: u32,
        array_element: u32,
        texture: &dyn Texture,
        sampler: &dyn Sampler,
    ) -> Result<(), String>;
    fn write_sampler_at(&mut self, binding: u32, array_element: u32, sampler: &dyn Sampler) -> Result<(), String>;
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    TransferDst,
    TransferSrc,
    ShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    General,
    PresentSrc,
}

#[derive(Debug, Clone, Copy)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

#[derive(Debug, Clone)]
pub struct ColorAttachment<'a> {
    pub texture: &'a dyn Texture,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: Option<ClearColor>,
    /// Layout the texture is already in when the pass begins; the render
    /// pass attachment description uses this instead of always assuming
    /// `Undefined`, so a resource already transitioned by the frame graph
    /// doesn't pay for a redundant barrier.
    pub initial_layout: ImageLayout,
}

#[derive(Debug, Clone)]
pub struct DepthStencilAttachment<'a> {
    pub texture: &'a dyn Texture,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub clear_depth: f32,
}

#[derive(Debug, Clone)]
pub struct RenderPassDescriptor<'a> {
    pub color_attachments: &'a [ColorAttachment<'a>],
    pub depth_stencil_attachment: Option<DepthStencilAttachment<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

pub trait RenderPass: Debug {
    fn set_pipeline(&mut self, pipeline: &dyn GraphicsPipeline);
    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet);
    fn set_vertex_buffer(&mut self, index: u32, buffer: &dyn Buffer, offset: u64);
    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, index_format: IndexFormat);
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn draw_indexed_indirect(&mut self, buffer: &dyn Buffer, offset: u64);
    fn end(self: Box<Self>);
}

pub trait ComputePass: Debug {
    fn set_pipeline(&mut self, pipeline: &dyn ComputePipeline);
    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet);
    fn dispatch(&mut self, x: u32, y: u32, z: u32);
    fn dispatch_indirect(&mut self, buffer: &dyn Buffer, offset: u64);
}

pub trait CommandBuffer: Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Records GPU work into a single command buffer. Mirrors the explicit,
/// single-threaded-recording model of a D3D12 command list: callers open an
/// encoder, record passes and copies in order, then `finish()` it into a
/// submittable buffer.
pub trait CommandEncoder: Debug {
    fn begin_compute_pass(&mut self) -> Box<dyn ComputePass>;
    fn begin_render_pass<'a>(&mut self, desc: RenderPassDescriptor<'a>) -> Result<Box<dyn RenderPass>, String>;
    fn copy_buffer_to_buffer(&mut self, src: &dyn Buffer, src_offset: u64, dst: &dyn Buffer, dst_offset: u64, size: u64);
    fn copy_buffer_to_texture(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Texture,
        dst_mip: u32,
        dst_origin: (u32, u32, u32),
        size: (u32, u32, u32),
    );
    fn pipeline_barrier_texture(&mut self, texture: &dyn Texture, old_layout: ImageLayout, new_layout: ImageLayout);
    fn pipeline_barrier_buffer(&mut self, buffer: &dyn Buffer, offset: u64, size: u64);
    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String>;
}

pub trait Fence: Debug {
    fn wait(&self, timeout_ns: u64) -> Result<(), String>;
    fn reset(&self) -> Result<(), String>;
    fn as_any(&self) -> &dyn Any;
}

pub trait Semaphore: Debug {
    fn as_any(&self) -> &dyn Any;
}

pub trait Queue: Debug {
    fn submit(
        &self,
        command_buffers: &[&dyn CommandBuffer],
        wait_semaphores: &[&dyn Semaphore],
        signal_semaphores: &[&dyn Semaphore],
        signal_fence: Option<&dyn Fence>,
    ) -> Result<(), String>;
}

#[cfg(feature = "window")]
pub struct SwapchainFrame<'a> {
    pub image_index: u32,
    pub texture: &'a dyn Texture,
}

#[cfg(feature = "window")]
pub trait Swapchain: Debug {
    fn acquire_next_image(&mut self, wait_semaphore: Option<&dyn Semaphore>) -> Result<SwapchainFrame<'_>, String>;
    fn present(&self, image_index: u32, wait_semaphore: Option<&dyn Semaphore>) -> Result<(), String>;
    fn extent(&self) -> (u32, u32);
    fn as_any(&self) -> &dyn Any;
}

/// Opaque handle to one resource's sub-allocation within a [`TransientHeap`],
/// returned alongside the resource itself and passed back into
/// [`TransientHeap::retire`] to free that sub-range before the resource's
/// wrapper object is dropped — letting a later resource with a disjoint
/// lifetime reuse the same bytes within the same generation.
pub struct PlacementToken(pub Box<dyn std::any::Any>);

/// A resettable arena of placed resources for one frame's transient
/// frame-graph allocations. `reset` discards every previous placement made
/// against it, for the start of a new compile; within one generation,
/// `retire`-ing a resource once its lifetime ends lets a later resource with
/// a disjoint lifetime land at the same backing byte range (aliasing). The
/// physical memory backing the arena is kept and grown across resets rather
/// than freed and reallocated every frame.
pub trait TransientHeap: Debug {
    fn reset(&mut self);
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<(Box<dyn Texture>, PlacementToken), String>;
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> Result<(Box<dyn Buffer>, PlacementToken), String>;
    fn retire(&mut self, token: PlacementToken);
}

/// Device facade: owns the instance/logical device and is the sole factory
/// for every other GPU object. One `Device` per adapter.
pub trait Device: Debug {
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>, String>;
    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String>;
    /// A fresh transient-resource arena backed by the device's placed
    /// allocator. Callers reset it once per compile, before placing any of
    /// that generation's transient resources.
    fn create_transient_heap(&self) -> Box<dyn TransientHeap>;
    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>, String>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDescriptor) -> Result<Box<dyn ComputePipeline>, String>;
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDescriptor) -> Result<Box<dyn GraphicsPipeline>, String>;
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<Box<dyn DescriptorSetLayout>, String>;
    fn create_descriptor_pool(&self, max_sets: u32) -> Result<Box<dyn DescriptorPool>, String>;
    fn create_descriptor_pool_with_descriptor(
        &self,
        desc: &DescriptorPoolDescriptor,
    ) -> Result<Box<dyn DescriptorPool>, String>;
    fn create_command_encoder(&self) -> Result<Box<dyn CommandEncoder>, String>;

    /// Write into a host-visible buffer directly. Errors if `buffer` isn't
    /// host-visible — use `upload_to_buffer` for device-local buffers.
    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String>;
    /// Upload into any buffer, staging through a temporary host-visible
    /// buffer and a blocking copy + wait_idle when the target is
    /// device-local.
    fn upload_to_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String>;
    /// Same as `upload_to_buffer` but submits on the dedicated transfer
    /// queue when one exists, and signals `signal_fence` instead of
    /// blocking the whole device.
    fn upload_to_buffer_async(
        &self,
        buffer: &dyn Buffer,
        offset: u64,
        data: &[u8],
        signal_fence: Option<&dyn Fence>,
    ) -> Result<(), String>;
    /// Record and submit a standalone buffer-to-buffer copy on the transfer
    /// queue (or the graphics queue if none exists).
    fn submit_buffer_copy(
        &self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
        signal_fence: Option<&dyn Fence>,
    ) -> Result<(), String>;

    fn submit(&self, command_buffers: Vec<Box<dyn CommandBuffer>>) -> Result<(), String>;
    fn queue(&self) -> Result<Box<dyn Queue>, String>;
    /// `None` when the device has no queue family distinct from the
    /// graphics queue to dedicate to transfers.
    fn transfer_queue(&self) -> Option<Box<dyn Queue>>;
    fn wait_idle(&self) -> Result<(), String>;

    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>, String>;
    fn create_semaphore(&self) -> Result<Box<dyn Semaphore>, String>;

    #[cfg(feature = "window")]
    fn create_swapchain(
        &self,
        extent: (u32, u32),
        old_swapchain: Option<&dyn Swapchain>,
    ) -> Result<Box<dyn Swapchain>, String>;
}
