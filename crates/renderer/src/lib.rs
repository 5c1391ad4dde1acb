//! Frame graph, render scheduler and the deferred pipeline's pass
//! definitions, built over the `rhi` crate's explicit GPU vocabulary.

pub mod graph;
pub mod passes;
pub mod scheduler;

pub use graph::{FrameGraph, FrameGraphError, Pass, PassContext, ResourceId, TextureRole};
pub use passes::DeferredResources;
pub use scheduler::{Camera, RenderScheduler, Scene, SchedulerError, Timer};
