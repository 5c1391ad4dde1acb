//! Deferred pipeline pass definitions.
//!
//! Supplements the distilled spec from `original_source/Engine/Include/
//! Renderer/Pipeline/DeferredPipeline.h`, which names a GBuffer pass,
//! clustered-lighting compute pass, deferred-shading pass, skybox pass,
//! bloom compute chain, auto-exposure compute pass, tone-mapping pass and a
//! present pass. IBL precompute (`PreFilterEnvMapPass`, `PrecomputeBRDFPass`)
//! runs once at load time rather than per frame and is out of scope here.
//!
//! Every pass takes its pipeline objects pre-built: shader compilation is a
//! collaborator's responsibility (spec.md §6's shader reflection contract),
//! not this crate's.

mod auto_exposure;
mod bloom;
mod clustered_lighting;
mod deferred_shading;
mod gbuffer;
mod present;
mod skybox;
mod tone_mapping;

pub use auto_exposure::AutoExposurePass;
pub use bloom::BloomPass;
pub use clustered_lighting::ClusteredLightingPass;
pub use deferred_shading::DeferredShadingPass;
pub use gbuffer::GBufferPass;
pub use present::PresentPass;
pub use skybox::SkyboxPass;
pub use tone_mapping::ToneMappingPass;

use crate::graph::{FrameGraph, FrameGraphError, ResourceId, TextureRole};
use rhi::TextureFormat;

/// Interned ids for every resource the deferred pipeline's passes share,
/// mirroring `DeferredPipelineResource`'s static id table.
#[derive(Debug, Clone, Copy)]
pub struct DeferredResources {
    pub gbuffer_a: ResourceId,
    pub gbuffer_b: ResourceId,
    pub gbuffer_c: ResourceId,
    pub depth_stencil: ResourceId,
    pub frustum_cluster: ResourceId,
    pub point_lights: ResourceId,
    pub deferred_shading_rt: ResourceId,
    pub bloom_mipchain: ResourceId,
    pub luminance_histogram: ResourceId,
    pub average_luminance: ResourceId,
    pub tone_mapped: ResourceId,
    pub back_buffer: ResourceId,
}

impl DeferredResources {
    pub fn intern(graph: &mut FrameGraph) -> Self {
        Self {
            gbuffer_a: graph.intern("GBufferA"),
            gbuffer_b: graph.intern("GBufferB"),
            gbuffer_c: graph.intern("GBufferC"),
            depth_stencil: graph.intern("GBufferDepthStencil"),
            frustum_cluster: graph.intern("FrustumCluster"),
            point_lights: graph.intern("ClusteredLights"),
            deferred_shading_rt: graph.intern("DeferredShadingRT"),
            bloom_mipchain: graph.intern("BloomMipchain"),
            luminance_histogram: graph.intern("LuminanceHistogram"),
            average_luminance: graph.intern("AverageLuminance"),
            tone_mapped: graph.intern("ToneMappedTexture"),
            back_buffer: graph.intern("BackBuffer"),
        }
    }

    /// Declares every transient resource's description. The back buffer is
    /// registered separately as persistent by the caller, since its backing
    /// image comes from the swapchain.
    pub fn declare(&self, graph: &mut FrameGraph, width: u32, height: u32) -> Result<(), FrameGraphError> {
        let rt = TextureRole::RENDER_TARGET | TextureRole::SHADER_RESOURCE;
        graph.declare_transient_texture(self.gbuffer_a, width, height, 1, TextureFormat::Rgba8Unorm, rt)?;
        graph.declare_transient_texture(self.gbuffer_b, width, height, 1, TextureFormat::Rgba8Unorm, rt)?;
        graph.declare_transient_texture(self.gbuffer_c, width, height, 1, TextureFormat::Rgba8Unorm, rt)?;
        graph.declare_transient_texture(
            self.depth_stencil,
            width,
            height,
            1,
            TextureFormat::D32Float,
            TextureRole::DEPTH_STENCIL | TextureRole::SHADER_RESOURCE,
        )?;
        graph.declare_transient_buffer(self.frustum_cluster, (24 * 16 * 9 * 160) as u64, 160)?;
        graph.declare_transient_buffer(self.point_lights, (1024 * 32) as u64, 32)?;
        graph.declare_transient_texture(
            self.deferred_shading_rt,
            width,
            height,
            1,
            TextureFormat::Rgba16Float,
            rt,
        )?;
        graph.declare_transient_texture(
            self.bloom_mipchain,
            width / 2,
            height / 2,
            5,
            TextureFormat::Rgba16Float,
            TextureRole::SHADER_RESOURCE | TextureRole::STORAGE,
        )?;
        graph.declare_transient_buffer(self.luminance_histogram, 256 * 4, 4)?;
        graph.declare_transient_buffer(self.average_luminance, 4, 4)?;
        graph.declare_transient_texture(self.tone_mapped, width, height, 1, TextureFormat::Rgba8Unorm, rt)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ids_are_distinct_and_declaration_succeeds() {
        let mut graph = FrameGraph::new();
        let resources = DeferredResources::intern(&mut graph);
        let ids = [
            resources.gbuffer_a,
            resources.gbuffer_b,
            resources.gbuffer_c,
            resources.depth_stencil,
            resources.frustum_cluster,
            resources.point_lights,
            resources.deferred_shading_rt,
            resources.bloom_mipchain,
            resources.luminance_histogram,
            resources.average_luminance,
            resources.tone_mapped,
            resources.back_buffer,
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
        resources.declare(&mut graph, 1920, 1080).expect("declaring deferred resources should not conflict");
    }

    #[test]
    fn re_interning_the_same_name_returns_the_same_id() {
        let mut graph = FrameGraph::new();
        let first = DeferredResources::intern(&mut graph);
        let second = DeferredResources::intern(&mut graph);
        assert_eq!(first.gbuffer_a, second.gbuffer_a);
        assert_eq!(first.back_buffer, second.back_buffer);
    }
}
