//! Error types for the allocator, descriptor-heap and recorder layers added
//! on top of the Vulkan backend. The Vulkan FFI glue (`vulkan::*`) keeps its
//! own `Result<_, String>` convention for leaf calls into `ash` — wrapping
//! every `vk::Result` in a `thiserror` variant here would just duplicate
//! `ash`'s own `Display` impl with no added structure, so `RhiError::Vulkan`
//! carries that string through instead of re-parsing it.

use rhi_alloc::AllocError;

#[derive(Debug, thiserror::Error)]
pub enum RhiError {
    #[error("GPU memory allocator: {0}")]
    Allocator(#[from] AllocError),

    #[error("GPU memory exhausted: no heap of usage {usage:?} has {requested} bytes free")]
    OutOfDeviceMemory { usage: &'static str, requested: u64 },

    #[error("descriptor heap exhausted: {0}")]
    DescriptorHeapExhausted(String),

    #[error("upload ring: requested allocation of {requested} bytes exceeds the large-page threshold with no page available")]
    UploadRingExhausted { requested: u64 },

    #[error("vulkan: {0}")]
    Vulkan(String),
}

impl From<String> for RhiError {
    fn from(s: String) -> Self {
        RhiError::Vulkan(s)
    }
}
