//! Packed pipeline-state key types.
//!
//! A graphics PSO is fully determined by its raster/depth/stencil/blend
//! state, the render pass it's recorded against, its vertex layout and its
//! shader. Packing all of that into three 64-bit words lets a recorder
//! compare "did the PSO-relevant state actually change since the last draw"
//! with three integer compares instead of a struct diff, the same way a
//! command-list recorder tracks its other last-bound state (pipeline,
//! vertex/index buffers, resource-binding set) by identity rather than by
//! deep comparison.

use crate::{BlendComponent, CompareOp, CullMode, PolygonMode, TextureFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

impl Default for StencilOp {
    fn default() -> Self {
        StencilOp::Keep
    }
}

/// One stencil face's compare/pass/depth-fail/fail ops, 4 bits each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StencilFaceDesc {
    pub compare: CompareOp,
    pub pass: StencilOp,
    pub depth_fail: StencilOp,
    pub fail: StencilOp,
}

impl Default for CompareOp {
    fn default() -> Self {
        CompareOp::Always
    }
}

fn pack_stencil_face(face: StencilFaceDesc) -> u64 {
    let compare = compare_op_tag(face.compare) as u64;
    let pass = stencil_op_tag(face.pass) as u64;
    let depth_fail = stencil_op_tag(face.depth_fail) as u64;
    let fail = stencil_op_tag(face.fail) as u64;
    compare | (pass << 4) | (depth_fail << 8) | (fail << 12)
}

fn compare_op_tag(op: CompareOp) -> u8 {
    match op {
        CompareOp::Never => 0,
        CompareOp::Less => 1,
        CompareOp::Equal => 2,
        CompareOp::LessOrEqual => 3,
        CompareOp::Greater => 4,
        CompareOp::NotEqual => 5,
        CompareOp::GreaterOrEqual => 6,
        CompareOp::Always => 7,
    }
}

fn stencil_op_tag(op: StencilOp) -> u8 {
    match op {
        StencilOp::Keep => 0,
        StencilOp::Zero => 1,
        StencilOp::Replace => 2,
        StencilOp::IncrementClamp => 3,
        StencilOp::DecrementClamp => 4,
        StencilOp::Invert => 5,
        StencilOp::IncrementWrap => 6,
        StencilOp::DecrementWrap => 7,
    }
}

fn fill_mode_tag(mode: PolygonMode) -> u64 {
    match mode {
        PolygonMode::Fill => 0,
        PolygonMode::Line => 1,
        PolygonMode::Point => 2,
    }
}

fn cull_mode_tag(mode: CullMode) -> u64 {
    match mode {
        CullMode::None => 0,
        CullMode::Back => 1,
        CullMode::Front => 2,
        CullMode::FrontAndBack => 3,
    }
}

fn blend_factor_tag(f: crate::BlendFactor) -> u64 {
    match f {
        crate::BlendFactor::Zero => 0,
        crate::BlendFactor::One => 1,
        crate::BlendFactor::SrcAlpha => 2,
        crate::BlendFactor::OneMinusSrcAlpha => 3,
        crate::BlendFactor::DstAlpha => 4,
        crate::BlendFactor::OneMinusDstAlpha => 5,
    }
}

/// The rasterizer/depth/stencil/blend half of a PSO key, packed into 8
/// bytes per the fixed bit layout: fill-mode(2)+cull-mode(2)+depth-test(1)+
/// depth-write(1)+stencil-test(1)+stencil-write(1)+depth-compare(4)+
/// front-face-stencil(16)+back-face-stencil(16)+blend-state(16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineStateDesc(u64);

impl PipelineStateDesc {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fill_mode: PolygonMode,
        cull_mode: CullMode,
        depth_test: bool,
        depth_write: bool,
        stencil_test: bool,
        stencil_write: bool,
        depth_compare: CompareOp,
        front_face_stencil: StencilFaceDesc,
        back_face_stencil: StencilFaceDesc,
        blend: Option<BlendComponent>,
    ) -> Self {
        let mut bits = fill_mode_tag(fill_mode);
        bits |= cull_mode_tag(cull_mode) << 2;
        bits |= (depth_test as u64) << 4;
        bits |= (depth_write as u64) << 5;
        bits |= (stencil_test as u64) << 6;
        bits |= (stencil_write as u64) << 7;
        bits |= (compare_op_tag(depth_compare) as u64) << 8;
        bits |= pack_stencil_face(front_face_stencil) << 12;
        bits |= pack_stencil_face(back_face_stencil) << 28;
        let blend_bits = match blend {
            Some(b) => 1 | ((b.operation == crate::BlendOp::Subtract) as u64) << 1 | blend_factor_tag(b.src_factor) << 2 | blend_factor_tag(b.dst_factor) << 5,
            None => 0,
        };
        bits |= blend_bits << 44;
        Self(bits)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

fn texture_format_tag(format: Option<TextureFormat>) -> u64 {
    match format {
        None => 0xF,
        Some(TextureFormat::Rgba8Unorm) => 0,
        Some(TextureFormat::Bgra8Unorm) => 1,
        Some(TextureFormat::Rgba16Float) => 2,
        Some(TextureFormat::Rgba32Float) => 3,
        Some(TextureFormat::R16Float) => 4,
        Some(TextureFormat::R32Float) => 5,
        Some(TextureFormat::D32Float) => 6,
    }
}

/// The render-pass half of a PSO key: depth-stencil format plus up to 8
/// render-target formats and their count, in output-declaration order.
#[derive(Debug, Clone, Default)]
pub struct RenderPassPsoDesc {
    pub depth_stencil_format: Option<TextureFormat>,
    pub render_target_formats: Vec<TextureFormat>,
}

impl RenderPassPsoDesc {
    fn pack(&self) -> u64 {
        let mut bits = texture_format_tag(self.depth_stencil_format);
        for (i, format) in self.render_target_formats.iter().take(8).enumerate() {
            bits |= texture_format_tag(Some(*format)) << (4 + i * 4);
        }
        bits |= (self.render_target_formats.len().min(8) as u64) << 36;
        bits
    }
}

/// The packed triple `(PipelineStateDesc, RenderPassPsoDesc, vertex-format,
/// shader-hash, is-compute)`, 24 bytes total, compared and hashed as three
/// 64-bit words. `vertex_format_tag` and `is_compute` are folded into the
/// render-pass word's spare high bits; `shader_hash` gets a dedicated word
/// so a 64-bit shader content hash isn't truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsoKey([u64; 3]);

impl PsoKey {
    pub fn new(pipeline: PipelineStateDesc, render_pass: &RenderPassPsoDesc, vertex_format_tag: u8, shader_hash: u64, is_compute: bool) -> Self {
        let mut render_pass_word = render_pass.pack();
        render_pass_word |= (vertex_format_tag as u64) << 40;
        render_pass_word |= (is_compute as u64) << 48;
        Self([pipeline.as_u64(), render_pass_word, shader_hash])
    }

    pub fn words(&self) -> [u64; 3] {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_state_packs_to_identical_key() {
        let pipeline = PipelineStateDesc::new(
            PolygonMode::Fill,
            CullMode::Back,
            true,
            true,
            false,
            false,
            CompareOp::Less,
            StencilFaceDesc::default(),
            StencilFaceDesc::default(),
            None,
        );
        let pass = RenderPassPsoDesc {
            depth_stencil_format: Some(TextureFormat::D32Float),
            render_target_formats: vec![TextureFormat::Rgba16Float],
        };
        let a = PsoKey::new(pipeline, &pass, 0, 0xdead_beef, false);
        let b = PsoKey::new(pipeline, &pass, 0, 0xdead_beef, false);
        assert_eq!(a, b);
    }

    #[test]
    fn changing_cull_mode_changes_the_key() {
        let back = PipelineStateDesc::new(
            PolygonMode::Fill,
            CullMode::Back,
            true,
            true,
            false,
            false,
            CompareOp::Less,
            StencilFaceDesc::default(),
            StencilFaceDesc::default(),
            None,
        );
        let none = PipelineStateDesc::new(
            PolygonMode::Fill,
            CullMode::None,
            true,
            true,
            false,
            false,
            CompareOp::Less,
            StencilFaceDesc::default(),
            StencilFaceDesc::default(),
            None,
        );
        assert_ne!(back.as_u64(), none.as_u64());
    }

    #[test]
    fn render_target_format_and_count_round_trip_into_distinct_words() {
        let pass_one_target = RenderPassPsoDesc {
            depth_stencil_format: None,
            render_target_formats: vec![TextureFormat::Rgba8Unorm],
        };
        let pass_two_targets = RenderPassPsoDesc {
            depth_stencil_format: None,
            render_target_formats: vec![TextureFormat::Rgba8Unorm, TextureFormat::Rgba16Float],
        };
        assert_ne!(pass_one_target.pack(), pass_two_targets.pack());
    }
}
