//! Vulkan Texture: full implementation with VkImage, memory, and ImageView.

use super::memory::{HeapType, HeapUsage, MemoryBacking, SharedMemoryAllocator};
use crate::{ResourceId, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage};
use ash::vk;
use std::sync::Arc;

/// The unbound `VkImage` plus everything needed to place and view it.
/// Factored out of `create_texture` so `transient::VulkanTransientHeap` can
/// bind the same image against its own arena instead of the device's
/// per-resource placed allocator.
pub(crate) struct UnboundImage {
    pub image: vk::Image,
    pub requirements: vk::MemoryRequirements,
    pub image_type: vk::ImageType,
    pub mip_levels: u32,
    pub array_layers: u32,
}

pub(crate) fn build_image(device: &ash::Device, descriptor: &TextureDescriptor) -> Result<UnboundImage, String> {
    let (width, height, depth_or_layers) = descriptor.size;
    let extent = vk::Extent3D {
        width: width.max(1),
        height: height.max(1),
        depth: depth_or_layers.max(1),
    };

    let vk_format = texture_format_to_vk(descriptor.format);
    let usage_flags = texture_usage_to_vk(descriptor.usage, descriptor.format);
    let image_type = texture_dimension_to_image_type(descriptor.dimension);

    let mut array_layers = 1u32;
    let mut flags = vk::ImageCreateFlags::empty();
    match descriptor.dimension {
        TextureDimension::D2 => {
            array_layers = 1;
        }
        TextureDimension::D2Array => {
            array_layers = depth_or_layers.max(1);
        }
        TextureDimension::D3 => {
            // depth is depth
        }
        TextureDimension::Cube => {
            array_layers = 6;
            flags = vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
    }

    let mip_levels = descriptor.mip_level_count.max(1);

    let create_info = vk::ImageCreateInfo::default()
        .image_type(image_type)
        .format(vk_format)
        .extent(extent)
        .mip_levels(mip_levels)
        .array_layers(array_layers)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage_flags)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .flags(flags);

    let image = unsafe {
        device
            .create_image(&create_info, None)
            .map_err(|e| e.to_string())?
    };
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    Ok(UnboundImage { image, requirements, image_type, mip_levels, array_layers })
}

pub(crate) fn build_view(
    device: &ash::Device,
    image: vk::Image,
    descriptor: &TextureDescriptor,
    mip_levels: u32,
    array_layers: u32,
) -> Result<vk::ImageView, String> {
    let vk_format = texture_format_to_vk(descriptor.format);
    let view_type = texture_dimension_to_view_type(descriptor.dimension, descriptor.size);
    let aspect_mask = if format_is_depth(descriptor.format) {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };

    let view_create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(vk_format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(array_layers),
        );

    unsafe {
        device
            .create_image_view(&view_create_info, None)
            .map_err(|e| e.to_string())
    }
}

/// Create a Vulkan texture from descriptor. Always placed: textures are
/// never host-mapped directly, so there is no analogue of `write_buffer`'s
/// offset-from-zero mapping hazard to avoid.
pub fn create_texture(
    device: Arc<ash::Device>,
    memory_allocator: SharedMemoryAllocator,
    descriptor: &TextureDescriptor,
    next_id: impl FnOnce() -> ResourceId,
) -> Result<VulkanTexture, String> {
    let unbound = build_image(&device, descriptor)?;
    let heap_usage = if descriptor.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        HeapUsage::RtDsTexture
    } else {
        HeapUsage::NonRtDsTexture
    };
    let allocation = memory_allocator
        .lock()
        .unwrap()
        .allocate(unbound.requirements, heap_usage, HeapType::Default)
        .map_err(|e| e.to_string())?;

    unsafe {
        device
            .bind_image_memory(unbound.image, allocation.memory, allocation.offset)
            .map_err(|e| e.to_string())?;
    }
    let backing = MemoryBacking::Placed { allocator: memory_allocator, allocation };
    let view = build_view(&device, unbound.image, descriptor, unbound.mip_levels, unbound.array_layers)?;

    Ok(VulkanTexture {
        device,
        image: unbound.image,
        backing: Some(backing),
        view,
        format: descriptor.format,
        size: descriptor.size,
        dimension: descriptor.dimension,
        mip_level_count: unbound.mip_levels,
        id: next_id(),
        image_type: unbound.image_type,
    })
}

/// Fully implemented Vulkan texture with image, memory, and view.
pub struct VulkanTexture {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) image: vk::Image,
    pub(crate) backing: Option<MemoryBacking>,
    pub(crate) view: vk::ImageView,
    pub(crate) format: TextureFormat,
    pub(crate) size: (u32, u32, u32),
    pub(crate) dimension: TextureDimension,
    pub(crate) mip_level_count: u32,
    pub(crate) id: ResourceId,
    #[allow(dead_code)]
    pub(crate) image_type: vk::ImageType,
}

impl VulkanTexture {
    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn current_layout(&self) -> vk::ImageLayout {
        // Layout is tracked per-use; for simplicity we expose UNDEFINED as initial.
        // Caller should transition via barrier before use.
        vk::ImageLayout::UNDEFINED
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            if let Some(backing) = self.backing.take() {
                backing.release(&self.device);
            }
        }
    }
}

impl std::fmt::Debug for VulkanTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanTexture")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl Texture for VulkanTexture {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn format(&self) -> TextureFormat {
        self.format
    }
    fn size(&self) -> (u32, u32, u32) {
        self.size
    }
    fn dimension(&self) -> TextureDimension {
        self.dimension
    }
    fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub fn texture_format_to_vk(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::D32Float => vk::Format::D32_SFLOAT,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub fn texture_usage_to_vk(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        if format_is_depth(format) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }
    flags
}

fn format_is_depth(format: TextureFormat) -> bool {
    matches!(format, TextureFormat::D32Float)
}

pub fn texture_dimension_to_image_type(dim: TextureDimension) -> vk::ImageType {
    match dim {
        TextureDimension::D2 | TextureDimension::D2Array | TextureDimension::Cube => {
            vk::ImageType::TYPE_2D
        }
        TextureDimension::D3 => vk::ImageType::TYPE_3D,
    }
}

pub fn texture_dimension_to_view_type(dim: TextureDimension, _size: (u32, u32, u32)) -> vk::ImageViewType {
    match dim {
        TextureDimension::D2 => vk::ImageViewType::TYPE_2D,
        TextureDimension::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureDimension::D3 => vk::ImageViewType::TYPE_3D,
        TextureDimension::Cube => vk::ImageViewType::CUBE,
    }
}
