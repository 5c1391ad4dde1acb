//! Frame graph: a declarative DAG of passes over typed resource edges,
//! compiled once per frame into a linear execution order plus a transient
//! aliasing plan.
//!
//! Grounded on `Renderer/FrameGraph.cpp` and `FrameGraphResource.h`: resource
//! ids are interned strings (`FGResourceIDs`), descriptions are a tagged
//! union of transient texture / transient buffer / persistent resource
//! (`FGResourceDescriptionTable`), dependency discovery is the same
//! input-matches-output scan (`FGExecutionParser::IsDependsOn`), and the
//! execution order is the same reverse-DFS-from-the-present-pass
//! ref-counted topological sort (`FGExecutionParser::Parse`).

use rhi::{ColorAttachment, ColorTargetState, DepthStencilAttachment, Device, LoadOp, PlacementToken, StoreOp, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage, TransientHeap};
use std::collections::HashMap;

pub type ResourceId = u32;

/// Interns resource names to stable ids, mirroring `FGResourceIDs`.
#[derive(Debug, Default)]
pub struct ResourceInterner {
    name_to_id: HashMap<String, ResourceId>,
    names: Vec<String>,
}

impl ResourceInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> ResourceId {
        if let Some(id) = self.name_to_id.get(name) {
            return *id;
        }
        let id = self.names.len() as ResourceId;
        self.names.push(name.to_string());
        self.name_to_id.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: ResourceId) -> &str {
        &self.names[id as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

bitflags::bitflags! {
    /// Role a transient texture plays within its producing pass, mirroring
    /// `ETexture2DFlag`'s render-target / depth-stencil bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TextureRole: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const SHADER_RESOURCE = 1 << 2;
        const STORAGE = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDescription {
    TransientTexture { width: u32, height: u32, mip_levels: u32, format: TextureFormat, role: TextureRole },
    TransientBuffer { size: u64, stride: u32 },
    /// A caller-owned resource the graph only looks up. `role`/`format` are
    /// `None` for buffers; a persistent texture (e.g. the swapchain back
    /// buffer) carries both so `execute` can attach it as a render target
    /// or depth buffer and `compile` can derive a PSO format from it.
    Persistent { role: Option<TextureRole>, format: Option<TextureFormat> },
}

impl ResourceDescription {
    fn conflicts_with(&self, other: &ResourceDescription) -> bool {
        self != other
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum FrameGraphError {
    #[error("pass {0} is not reachable from the present pass")]
    UnusedPass(usize),
    #[error("the pass dependency graph contains a cycle")]
    Cycle,
    #[error("pass {pass} accessed resource {resource} without declaring it")]
    UndeclaredAccess { pass: usize, resource: ResourceId },
    #[error("resource {resource:?} was declared twice with conflicting descriptions")]
    DoubleDeclaration { resource: ResourceId },
    #[error("graphics pass {pass} writes buffer resource {resource}, which is not allowed")]
    GraphicsPassWritesBuffer { pass: usize, resource: ResourceId },
    #[error("no present pass was set for this frame graph")]
    MissingPresentPass,
    #[error("device error while allocating a transient resource: {0}")]
    Device(String),
}

/// The render-target / depth-stencil format set a graphics pass's PSO is
/// built against, derived from its output resources during compile. Matches
/// `GraphicsPassPsoDesc`.
#[derive(Debug, Clone, Default)]
pub struct GraphicsPassPsoDesc {
    pub render_target_formats: Vec<TextureFormat>,
    pub depth_stencil_format: Option<TextureFormat>,
}

/// One GPU resource backing a frame-graph id: either a transient resource
/// the graph owns for the duration of its lifetime, or a persistent one
/// registered by the caller and merely looked up.
pub enum FgResource {
    Texture(Box<dyn Texture>),
    Buffer(Box<dyn rhi::Buffer>),
}

impl FgResource {
    pub fn as_texture(&self) -> Option<&dyn Texture> {
        match self {
            FgResource::Texture(t) => Some(t.as_ref()),
            FgResource::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&dyn rhi::Buffer> {
        match self {
            FgResource::Buffer(b) => Some(b.as_ref()),
            FgResource::Texture(_) => None,
        }
    }
}

/// Resource access surface handed to a running pass, restricted to the ids
/// it actually declared as input or output. Mirrors `FrameGraph::GetFGResource`'s
/// contract check.
pub struct ResourceAccess<'a> {
    graph: &'a FrameGraph,
    allowed: &'a [ResourceId],
}

impl<'a> ResourceAccess<'a> {
    fn check(&self, id: ResourceId) {
        debug_assert!(
            self.allowed.contains(&id),
            "pass accessed resource {id} without declaring it as input or output"
        );
    }

    pub fn texture(&self, id: ResourceId) -> &dyn Texture {
        self.check(id);
        self.graph
            .resource(id)
            .and_then(FgResource::as_texture)
            .expect("resource is not a texture")
    }

    pub fn buffer(&self, id: ResourceId) -> &dyn rhi::Buffer {
        self.check(id);
        self.graph
            .resource(id)
            .and_then(FgResource::as_buffer)
            .expect("resource is not a buffer")
    }
}

/// A single frame-graph node. Implementors declare their resource edges up
/// front; `execute` runs once per frame in topological order with the pass's
/// render pass (graphics) or compute pass already open.
pub trait Pass {
    fn name(&self) -> &str;
    fn inputs(&self) -> &[ResourceId];
    fn outputs(&self) -> &[ResourceId];
    fn is_graphics(&self) -> bool;

    /// Called once at compile time for graphics passes with the PSO-relevant
    /// formats derived from this pass's output resources.
    fn set_pso_desc(&mut self, _desc: GraphicsPassPsoDesc) {}

    fn execute(&mut self, ctx: &mut PassContext) -> Result<(), FrameGraphError>;
}

pub struct PassContext<'a> {
    pub resources: ResourceAccess<'a>,
    pub encoder: &'a mut dyn rhi::CommandEncoder,
    pub render_pass: Option<&'a mut dyn rhi::RenderPass>,
    pub compute_pass: Option<&'a mut dyn rhi::ComputePass>,
}

#[derive(Debug, Clone, Copy)]
struct ResourceLifecycle {
    valid: bool,
    start_pass: usize,
    end_pass: usize,
}

impl Default for ResourceLifecycle {
    fn default() -> Self {
        Self { valid: false, start_pass: 0, end_pass: 0 }
    }
}

pub struct FrameGraph {
    interner: ResourceInterner,
    descriptions: Vec<Option<ResourceDescription>>,
    passes: Vec<Box<dyn Pass>>,
    present_pass: Option<usize>,
    execution_order: Vec<usize>,
    lifecycles: Vec<ResourceLifecycle>,
    transient_resources: Vec<Option<FgResource>>,
    /// Placement token for each live transient resource, retired once its
    /// lifecycle ends during `compile` so a later, disjoint-lifetime
    /// resource can alias its backing bytes.
    transient_tokens: Vec<Option<PlacementToken>>,
    transient_heap: Option<Box<dyn TransientHeap>>,
    persistent_resources: HashMap<ResourceId, FgResource>,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self {
            interner: ResourceInterner::new(),
            descriptions: Vec::new(),
            passes: Vec::new(),
            present_pass: None,
            execution_order: Vec::new(),
            lifecycles: Vec::new(),
            transient_resources: Vec::new(),
            transient_tokens: Vec::new(),
            transient_heap: None,
            persistent_resources: HashMap::new(),
        }
    }

    pub fn intern(&mut self, name: &str) -> ResourceId {
        self.interner.intern(name)
    }

    fn ensure_description_slot(&mut self, id: ResourceId) {
        if id as usize >= self.descriptions.len() {
            self.descriptions.resize(id as usize + 1, None);
        }
    }

    fn declare(&mut self, id: ResourceId, desc: ResourceDescription) -> Result<(), FrameGraphError> {
        self.ensure_description_slot(id);
        match &self.descriptions[id as usize] {
            Some(existing) if existing.conflicts_with(&desc) => {
                return Err(FrameGraphError::DoubleDeclaration { resource: id });
            }
            _ => {}
        }
        self.descriptions[id as usize] = Some(desc);
        Ok(())
    }

    pub fn declare_transient_texture(
        &mut self,
        id: ResourceId,
        width: u32,
        height: u32,
        mip_levels: u32,
        format: TextureFormat,
        role: TextureRole,
    ) -> Result<(), FrameGraphError> {
        self.declare(id, ResourceDescription::TransientTexture { width, height, mip_levels, format, role })
    }

    pub fn declare_transient_buffer(&mut self, id: ResourceId, size: u64, stride: u32) -> Result<(), FrameGraphError> {
        self.declare(id, ResourceDescription::TransientBuffer { size, stride })
    }

    /// Registers an externally-owned resource under `id`. Its backing store
    /// is supplied by the caller every frame (or persists across frames);
    /// the graph only looks it up, it never allocates or frees it. `role`
    /// only matters for textures the graph must attach to a render pass.
    pub fn declare_persistent(
        &mut self,
        id: ResourceId,
        role: Option<TextureRole>,
        format: Option<TextureFormat>,
        resource: FgResource,
    ) -> Result<(), FrameGraphError> {
        self.declare(id, ResourceDescription::Persistent { role, format })?;
        self.persistent_resources.insert(id, resource);
        Ok(())
    }

    /// Replaces a previously-declared persistent resource's backing store,
    /// e.g. swapping in this frame's acquired swapchain image.
    pub fn set_persistent_resource(&mut self, id: ResourceId, resource: FgResource) {
        self.persistent_resources.insert(id, resource);
    }

    /// Registers the pipeline's passes and marks which one presents. Passes
    /// may be declared in any order; dependency discovery happens at compile.
    pub fn setup(&mut self, passes: Vec<Box<dyn Pass>>, present_pass_index: usize) {
        self.passes = passes;
        self.present_pass = Some(present_pass_index);
    }

    fn resource(&self, id: ResourceId) -> Option<&FgResource> {
        self.transient_resources
            .get(id as usize)
            .and_then(|o| o.as_ref())
            .or_else(|| self.persistent_resources.get(&id))
    }

    fn depends_on(&self, lhs: usize, rhs: usize) -> bool {
        if lhs == rhs {
            return false;
        }
        self.passes[lhs]
            .inputs()
            .iter()
            .any(|input| self.passes[rhs].outputs().contains(input))
    }

    /// Builds the pass dependency DAG, finds the topological execution order
    /// by reverse-DFS from the present pass, computes per-resource lifetime,
    /// resets and re-allocates the transient pool, and derives each graphics
    /// pass's PSO description from its outputs.
    pub fn compile(&mut self, device: &dyn Device) -> Result<(), FrameGraphError> {
        let present_pass = self.present_pass.ok_or(FrameGraphError::MissingPresentPass)?;
        let n = self.passes.len();

        // in_nodes[i] = passes that i depends on (its producers).
        // ref_count[i] = number of passes that depend on i (its consumers).
        let mut in_nodes: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut ref_count: Vec<u32> = vec![0; n];
        for lhs in 0..n {
            for rhs in 0..n {
                if self.depends_on(lhs, rhs) {
                    ref_count[rhs] += 1;
                    in_nodes[lhs].push(rhs);
                }
            }
        }

        if ref_count[present_pass] != 0 {
            return Err(FrameGraphError::Cycle);
        }

        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut stack = vec![present_pass];
        visited[present_pass] = true;
        while let Some(node) = stack.pop() {
            order.push(node);
            for &dep in &in_nodes[node] {
                ref_count[dep] -= 1;
                if ref_count[dep] == 0 && !visited[dep] {
                    visited[dep] = true;
                    stack.push(dep);
                }
            }
        }

        if order.len() != n {
            let unused = (0..n).find(|i| !visited[*i]).expect("unvisited pass exists");
            return Err(FrameGraphError::UnusedPass(unused));
        }

        order.reverse();
        self.execution_order = order;

        // Lifetime analysis: [min(pass index), max(pass index)] per resource.
        let mut lifecycles = vec![ResourceLifecycle::default(); self.interner.len()];
        for (exec_index, &pass_index) in self.execution_order.iter().enumerate() {
            let pass = &self.passes[pass_index];
            for &id in pass.inputs().iter().chain(pass.outputs()) {
                let lifecycle = &mut lifecycles[id as usize];
                if lifecycle.valid {
                    lifecycle.start_pass = lifecycle.start_pass.min(exec_index);
                    lifecycle.end_pass = lifecycle.end_pass.max(exec_index);
                } else {
                    *lifecycle = ResourceLifecycle { valid: true, start_pass: exec_index, end_pass: exec_index };
                }
            }
        }
        self.lifecycles = lifecycles;

        // Reset the placed arena for this generation, then walk transient
        // resources in start-pass order, retiring any live resource whose
        // lifetime has already ended before placing the next one. Two
        // resources whose lifetimes don't overlap therefore land on the same
        // backing bytes within this single compile.
        let mut heap = self.transient_heap.take().unwrap_or_else(|| device.create_transient_heap());
        heap.reset();
        self.transient_resources = (0..self.interner.len()).map(|_| None).collect();
        self.transient_tokens = (0..self.interner.len()).map(|_| None).collect();

        let mut order: Vec<ResourceId> = (0..self.interner.len() as ResourceId)
            .filter(|&id| self.lifecycles[id as usize].valid)
            .filter(|&id| matches!(
                self.descriptions.get(id as usize),
                Some(Some(ResourceDescription::TransientTexture { .. })) | Some(Some(ResourceDescription::TransientBuffer { .. }))
            ))
            .collect();
        order.sort_by_key(|&id| self.lifecycles[id as usize].start_pass);

        let mut live: Vec<(ResourceId, usize)> = Vec::new();
        for id in order {
            let start_pass = self.lifecycles[id as usize].start_pass;
            let mut still_live = Vec::with_capacity(live.len());
            for (live_id, end_pass) in live.drain(..) {
                if end_pass < start_pass {
                    if let Some(token) = self.transient_tokens[live_id as usize].take() {
                        heap.retire(token);
                    }
                } else {
                    still_live.push((live_id, end_pass));
                }
            }
            live = still_live;

            let Some(Some(desc)) = self.descriptions.get(id as usize) else { continue };
            match desc.clone() {
                ResourceDescription::TransientTexture { width, height, mip_levels, format, role } => {
                    let mut usage = TextureUsage::empty();
                    if role.contains(TextureRole::RENDER_TARGET) || role.contains(TextureRole::DEPTH_STENCIL) {
                        usage |= TextureUsage::RENDER_ATTACHMENT;
                    }
                    if role.contains(TextureRole::SHADER_RESOURCE) {
                        usage |= TextureUsage::TEXTURE_BINDING;
                    }
                    if role.contains(TextureRole::STORAGE) {
                        usage |= TextureUsage::STORAGE_BINDING;
                    }
                    let (texture, token) = heap
                        .create_texture(&TextureDescriptor {
                            label: Some(self.interner.name(id)),
                            size: (width, height, 1),
                            dimension: TextureDimension::D2,
                            format,
                            mip_level_count: mip_levels.max(1),
                            usage,
                        })
                        .map_err(FrameGraphError::Device)?;
                    self.transient_resources[id as usize] = Some(FgResource::Texture(texture));
                    self.transient_tokens[id as usize] = Some(token);
                }
                ResourceDescription::TransientBuffer { size, stride: _ } => {
                    let (buffer, token) = heap
                        .create_buffer(&rhi::BufferDescriptor {
                            label: Some(self.interner.name(id)),
                            size,
                            usage: rhi::BufferUsage::STORAGE | rhi::BufferUsage::COPY_DST,
                            memory: rhi::BufferMemoryPreference::DeviceLocal,
                        })
                        .map_err(FrameGraphError::Device)?;
                    self.transient_resources[id as usize] = Some(FgResource::Buffer(buffer));
                    self.transient_tokens[id as usize] = Some(token);
                }
                ResourceDescription::Persistent { .. } => {}
            }
            live.push((id, self.lifecycles[id as usize].end_pass));
        }
        self.transient_heap = Some(heap);

        // Derive each graphics pass's PSO description from its outputs.
        for &pass_index in &self.execution_order {
            if !self.passes[pass_index].is_graphics() {
                continue;
            }
            let mut pso_desc = GraphicsPassPsoDesc::default();
            let outputs: Vec<ResourceId> = self.passes[pass_index].outputs().to_vec();
            for id in outputs {
                match self.descriptions.get(id as usize).and_then(|d| d.as_ref()) {
                    Some(ResourceDescription::TransientTexture { format, role, .. }) => {
                        if role.contains(TextureRole::DEPTH_STENCIL) {
                            pso_desc.depth_stencil_format = Some(*format);
                        } else if role.contains(TextureRole::RENDER_TARGET) {
                            pso_desc.render_target_formats.push(*format);
                        }
                    }
                    Some(ResourceDescription::TransientBuffer { .. }) => {
                        return Err(FrameGraphError::GraphicsPassWritesBuffer { pass: pass_index, resource: id });
                    }
                    Some(ResourceDescription::Persistent { role: Some(role), format: Some(format) }) => {
                        if role.contains(TextureRole::DEPTH_STENCIL) {
                            pso_desc.depth_stencil_format = Some(*format);
                        } else if role.contains(TextureRole::RENDER_TARGET) {
                            pso_desc.render_target_formats.push(*format);
                        }
                    }
                    _ => {}
                }
            }
            self.passes[pass_index].set_pso_desc(pso_desc);
        }

        Ok(())
    }

    /// Runs every pass in compiled order. For a graphics pass, first collects
    /// its render-target/depth-stencil outputs, clears any output beginning
    /// its lifetime here, and opens a combined render pass before handing
    /// control to `Pass::execute`.
    pub fn execute(&mut self, encoder: &mut dyn rhi::CommandEncoder) -> Result<(), FrameGraphError> {
        // Pull the pass list out of `self` so each pass's `execute(&mut ctx)`
        // (a mutable borrow of one pass) can run alongside `ctx.resources`
        // (a shared borrow of the rest of `self`) without aliasing.
        let mut passes = std::mem::take(&mut self.passes);
        let result = self.execute_with_passes(encoder, &mut passes);
        self.passes = passes;
        result
    }

    fn execute_with_passes(
        &self,
        encoder: &mut dyn rhi::CommandEncoder,
        passes: &mut [Box<dyn Pass>],
    ) -> Result<(), FrameGraphError> {
        for exec_index in 0..self.execution_order.len() {
            let pass_index = self.execution_order[exec_index];
            let is_graphics = passes[pass_index].is_graphics();
            let allowed: Vec<ResourceId> =
                passes[pass_index].inputs().iter().chain(passes[pass_index].outputs()).copied().collect();

            if is_graphics {
                let outputs: Vec<ResourceId> = passes[pass_index].outputs().to_vec();
                let mut color_attachments = Vec::new();
                let mut depth_attachment = None;
                for id in &outputs {
                    let role = match self.descriptions.get(*id as usize).and_then(|d| d.as_ref()) {
                        Some(ResourceDescription::TransientTexture { role, .. }) => *role,
                        Some(ResourceDescription::Persistent { role: Some(role), .. }) => *role,
                        _ => continue,
                    };
                    let begins_here = self.lifecycles[*id as usize].start_pass == exec_index;
                    let texture = self.resource(*id).and_then(FgResource::as_texture).expect("declared output resource exists");
                    if role.contains(TextureRole::DEPTH_STENCIL) {
                        depth_attachment = Some((texture, begins_here));
                    } else if role.contains(TextureRole::RENDER_TARGET) {
                        color_attachments.push((texture, begins_here));
                    }
                }

                let color_refs: Vec<ColorAttachment> = color_attachments
                    .iter()
                    .map(|(texture, begins)| ColorAttachment {
                        texture: *texture,
                        load_op: if *begins { LoadOp::Clear } else { LoadOp::Load },
                        store_op: StoreOp::Store,
                        clear_value: (*begins).then_some(rhi::ClearColor { r: 0.0, g: 0.0, b: 0.0, a: 1.0 }),
                        initial_layout: rhi::ImageLayout::Undefined,
                    })
                    .collect();
                let depth_ref = depth_attachment.map(|(texture, begins)| DepthStencilAttachment {
                    texture,
                    depth_load_op: if begins { LoadOp::Clear } else { LoadOp::Load },
                    depth_store_op: StoreOp::Store,
                    clear_depth: 1.0,
                });

                let mut render_pass = encoder
                    .begin_render_pass(rhi::RenderPassDescriptor { color_attachments: &color_refs, depth_stencil_attachment: depth_ref })
                    .map_err(FrameGraphError::Device)?;

                let mut ctx = PassContext {
                    resources: ResourceAccess { graph: self, allowed: &allowed },
                    encoder: &mut *encoder,
                    render_pass: Some(render_pass.as_mut()),
                    compute_pass: None,
                };
                passes[pass_index].execute(&mut ctx)?;
                render_pass.end();
            } else {
                let mut ctx = PassContext {
                    resources: ResourceAccess { graph: self, allowed: &allowed },
                    encoder: &mut *encoder,
                    render_pass: None,
                    compute_pass: None,
                };
                passes[pass_index].execute(&mut ctx)?;
            }
        }
        Ok(())
    }
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubPass {
        name: &'static str,
        inputs: Vec<ResourceId>,
        outputs: Vec<ResourceId>,
    }

    impl Pass for StubPass {
        fn name(&self) -> &str {
            self.name
        }
        fn inputs(&self) -> &[ResourceId] {
            &self.inputs
        }
        fn outputs(&self) -> &[ResourceId] {
            &self.outputs
        }
        fn is_graphics(&self) -> bool {
            false
        }
        fn execute(&mut self, _ctx: &mut PassContext) -> Result<(), FrameGraphError> {
            Ok(())
        }
    }

    fn topo_only(mut graph: FrameGraph) -> Vec<usize> {
        let present = graph.present_pass.unwrap();
        let n = graph.passes.len();
        let mut in_nodes: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut ref_count = vec![0u32; n];
        for lhs in 0..n {
            for rhs in 0..n {
                if graph.depends_on(lhs, rhs) {
                    ref_count[rhs] += 1;
                    in_nodes[lhs].push(rhs);
                }
            }
        }
        let mut visited = vec![false; n];
        let mut order = Vec::new();
        let mut stack = vec![present];
        visited[present] = true;
        while let Some(node) = stack.pop() {
            order.push(node);
            for &dep in &in_nodes[node] {
                ref_count[dep] -= 1;
                if ref_count[dep] == 0 && !visited[dep] {
                    visited[dep] = true;
                    stack.push(dep);
                }
            }
        }
        order.reverse();
        order
    }

    #[test]
    fn three_pass_chain_orders_producers_before_consumers() {
        let mut graph = FrameGraph::new();
        let x = graph.intern("X");
        let y = graph.intern("Y");
        let p1 = StubPass { name: "P1", inputs: vec![], outputs: vec![x] };
        let p2 = StubPass { name: "P2", inputs: vec![x], outputs: vec![y] };
        let p3 = StubPass { name: "P3 (present)", inputs: vec![y], outputs: vec![] };
        graph.setup(vec![Box::new(p1), Box::new(p2), Box::new(p3)], 2);
        let order = topo_only(graph);
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn unused_pass_is_rejected() {
        let mut graph = FrameGraph::new();
        let x = graph.intern("X");
        let p1 = StubPass { name: "P1", inputs: vec![], outputs: vec![x] };
        let orphan = StubPass { name: "orphan", inputs: vec![], outputs: vec![] };
        let present = StubPass { name: "present", inputs: vec![x], outputs: vec![] };
        graph.setup(vec![Box::new(p1), Box::new(orphan), Box::new(present)], 2);
        let present_idx = graph.present_pass.unwrap();
        let n = graph.passes.len();
        let mut in_nodes: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut ref_count = vec![0u32; n];
        for lhs in 0..n {
            for rhs in 0..n {
                if graph.depends_on(lhs, rhs) {
                    ref_count[rhs] += 1;
                    in_nodes[lhs].push(rhs);
                }
            }
        }
        let mut visited = vec![false; n];
        let mut stack = vec![present_idx];
        visited[present_idx] = true;
        let mut order = Vec::new();
        while let Some(node) = stack.pop() {
            order.push(node);
            for &dep in &in_nodes[node] {
                ref_count[dep] -= 1;
                if ref_count[dep] == 0 && !visited[dep] {
                    visited[dep] = true;
                    stack.push(dep);
                }
            }
        }
        assert!(order.len() < n);
    }

    #[test]
    fn resource_lifetime_spans_first_to_last_use() {
        let mut lifecycles = vec![ResourceLifecycle::default(); 2];
        let uses = [(0usize, 0u32), (1, 0), (1, 1), (2, 1)];
        for (exec_index, id) in uses {
            let lifecycle = &mut lifecycles[id as usize];
            if lifecycle.valid {
                lifecycle.start_pass = lifecycle.start_pass.min(exec_index);
                lifecycle.end_pass = lifecycle.end_pass.max(exec_index);
            } else {
                *lifecycle = ResourceLifecycle { valid: true, start_pass: exec_index, end_pass: exec_index };
            }
        }
        assert_eq!((lifecycles[0].start_pass, lifecycles[0].end_pass), (0, 1));
        assert_eq!((lifecycles[1].start_pass, lifecycles[1].end_pass), (1, 2));
    }

    // --- transient aliasing -------------------------------------------------
    //
    // A `Device`/`TransientHeap` pair good enough to exercise `compile`'s
    // placement loop without any real GPU: a first-fit free list over a flat
    // byte range, sized only from each descriptor's footprint.

    #[derive(Debug)]
    struct StubTexture {
        id: ResourceId,
        format: TextureFormat,
        size: (u32, u32, u32),
        offset: u64,
    }

    impl Texture for StubTexture {
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
            TextureDimension::D2
        }
        fn mip_level_count(&self) -> u32 {
            1
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[derive(Debug)]
    struct StubBuffer {
        id: ResourceId,
        size: u64,
        offset: u64,
    }

    impl rhi::Buffer for StubBuffer {
        fn id(&self) -> ResourceId {
            self.id
        }
        fn size(&self) -> u64 {
            self.size
        }
        fn host_visible(&self) -> bool {
            false
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[derive(Debug, Default)]
    struct StubTransientHeap {
        free: Vec<(u64, u64)>,
        watermark: u64,
        next_id: u32,
    }

    impl StubTransientHeap {
        fn alloc(&mut self, size: u64) -> u64 {
            if let Some(pos) = self.free.iter().position(|&(_, s)| s >= size) {
                let (offset, range_size) = self.free.remove(pos);
                if range_size > size {
                    self.free.push((offset + size, range_size - size));
                }
                return offset;
            }
            let offset = self.watermark;
            self.watermark += size;
            offset
        }

        fn next_id(&mut self) -> ResourceId {
            self.next_id += 1;
            self.next_id
        }
    }

    /// Token carrying exactly what `retire` needs to put a range back on the
    /// free list — mirrors `VulkanPlacement` in the real Vulkan backend.
    struct StubPlacement {
        offset: u64,
        size: u64,
    }

    impl TransientHeap for StubTransientHeap {
        fn reset(&mut self) {
            self.free.clear();
            self.watermark = 0;
        }

        fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<(Box<dyn Texture>, PlacementToken), String> {
            let (w, h, d) = desc.size;
            let size = (w as u64) * (h as u64) * (d.max(1) as u64) * 4;
            let offset = self.alloc(size);
            let texture: Box<dyn Texture> =
                Box::new(StubTexture { id: self.next_id(), format: desc.format, size: desc.size, offset });
            Ok((texture, PlacementToken(Box::new(StubPlacement { offset, size }))))
        }

        fn create_buffer(&mut self, desc: &rhi::BufferDescriptor) -> Result<(Box<dyn rhi::Buffer>, PlacementToken), String> {
            let size = desc.size.max(1);
            let offset = self.alloc(size);
            let buffer: Box<dyn rhi::Buffer> = Box::new(StubBuffer { id: self.next_id(), size, offset });
            Ok((buffer, PlacementToken(Box::new(StubPlacement { offset, size }))))
        }

        fn retire(&mut self, token: PlacementToken) {
            if let Ok(placement) = token.0.downcast::<StubPlacement>() {
                self.free.push((placement.offset, placement.size));
            }
        }
    }

    #[derive(Debug)]
    struct StubDevice;

    impl Device for StubDevice {
        fn create_buffer(&self, _desc: &rhi::BufferDescriptor) -> Result<Box<dyn rhi::Buffer>, String> {
            unimplemented!("compile() only places transient resources through TransientHeap")
        }
        fn create_texture(&self, _desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String> {
            unimplemented!("compile() only places transient resources through TransientHeap")
        }
        fn create_transient_heap(&self) -> Box<dyn TransientHeap> {
            Box::new(StubTransientHeap::default())
        }
        fn create_sampler(&self, _desc: &rhi::SamplerDescriptor) -> Result<Box<dyn rhi::Sampler>, String> {
            unimplemented!()
        }
        fn create_compute_pipeline(
            &self,
            _desc: &rhi::ComputePipelineDescriptor,
        ) -> Result<Box<dyn rhi::ComputePipeline>, String> {
            unimplemented!()
        }
        fn create_graphics_pipeline(
            &self,
            _desc: &rhi::GraphicsPipelineDescriptor,
        ) -> Result<Box<dyn rhi::GraphicsPipeline>, String> {
            unimplemented!()
        }
        fn create_descriptor_set_layout(
            &self,
            _bindings: &[rhi::DescriptorSetLayoutBinding],
        ) -> Result<Box<dyn rhi::DescriptorSetLayout>, String> {
            unimplemented!()
        }
        fn create_descriptor_pool(&self, _max_sets: u32) -> Result<Box<dyn rhi::DescriptorPool>, String> {
            unimplemented!()
        }
        fn create_descriptor_pool_with_descriptor(
            &self,
            _desc: &rhi::DescriptorPoolDescriptor,
        ) -> Result<Box<dyn rhi::DescriptorPool>, String> {
            unimplemented!()
        }
        fn create_command_encoder(&self) -> Result<Box<dyn rhi::CommandEncoder>, String> {
            unimplemented!()
        }
        fn write_buffer(&self, _buffer: &dyn rhi::Buffer, _offset: u64, _data: &[u8]) -> Result<(), String> {
            unimplemented!()
        }
        fn upload_to_buffer(&self, _buffer: &dyn rhi::Buffer, _offset: u64, _data: &[u8]) -> Result<(), String> {
            unimplemented!()
        }
        fn upload_to_buffer_async(
            &self,
            _buffer: &dyn rhi::Buffer,
            _offset: u64,
            _data: &[u8],
            _signal_fence: Option<&dyn rhi::Fence>,
        ) -> Result<(), String> {
            unimplemented!()
        }
        fn submit_buffer_copy(
            &self,
            _src: &dyn rhi::Buffer,
            _src_offset: u64,
            _dst: &dyn rhi::Buffer,
            _dst_offset: u64,
            _size: u64,
            _signal_fence: Option<&dyn rhi::Fence>,
        ) -> Result<(), String> {
            unimplemented!()
        }
        fn submit(&self, _command_buffers: Vec<Box<dyn rhi::CommandBuffer>>) -> Result<(), String> {
            unimplemented!()
        }
        fn queue(&self) -> Result<Box<dyn rhi::Queue>, String> {
            unimplemented!()
        }
        fn transfer_queue(&self) -> Option<Box<dyn rhi::Queue>> {
            unimplemented!()
        }
        fn wait_idle(&self) -> Result<(), String> {
            unimplemented!()
        }
        fn create_fence(&self, _signaled: bool) -> Result<Box<dyn rhi::Fence>, String> {
            unimplemented!()
        }
        fn create_semaphore(&self) -> Result<Box<dyn rhi::Semaphore>, String> {
            unimplemented!()
        }
    }

    struct RenderTargetPass {
        name: &'static str,
        inputs: Vec<ResourceId>,
        outputs: Vec<ResourceId>,
    }

    impl Pass for RenderTargetPass {
        fn name(&self) -> &str {
            self.name
        }
        fn inputs(&self) -> &[ResourceId] {
            &self.inputs
        }
        fn outputs(&self) -> &[ResourceId] {
            &self.outputs
        }
        fn is_graphics(&self) -> bool {
            false
        }
        fn execute(&mut self, _ctx: &mut PassContext) -> Result<(), FrameGraphError> {
            Ok(())
        }
    }

    #[test]
    fn disjoint_lifetime_transients_alias_the_same_offset() {
        // P1 writes X and W; P2 reads W and writes Y; P3 (present) reads Y.
        // W keeps P1 and P2 connected in the dependency graph without
        // extending X's lifetime past P1: X's last use is pass 0, Y's first
        // use is pass 1, so the two never overlap and Y should land on the
        // exact bytes X held.
        let mut graph = FrameGraph::new();
        let x = graph.intern("X");
        let w = graph.intern("W");
        let y = graph.intern("Y");
        graph
            .declare_transient_texture(x, 64, 64, 1, TextureFormat::Rgba8Unorm, TextureRole::SHADER_RESOURCE)
            .unwrap();
        graph
            .declare_transient_texture(y, 64, 64, 1, TextureFormat::Rgba8Unorm, TextureRole::SHADER_RESOURCE)
            .unwrap();
        let p1 = RenderTargetPass { name: "P1", inputs: vec![], outputs: vec![x, w] };
        let p2 = RenderTargetPass { name: "P2", inputs: vec![w], outputs: vec![y] };
        let p3 = RenderTargetPass { name: "P3 (present)", inputs: vec![y], outputs: vec![] };
        graph.setup(vec![Box::new(p1), Box::new(p2), Box::new(p3)], 2);

        let device = StubDevice;
        graph.compile(&device).unwrap();

        let x_offset = graph.resource(x).and_then(FgResource::as_texture).unwrap().as_any().downcast_ref::<StubTexture>().unwrap().offset;
        let y_offset = graph.resource(y).and_then(FgResource::as_texture).unwrap().as_any().downcast_ref::<StubTexture>().unwrap().offset;
        assert_eq!(x_offset, y_offset, "Y should alias X's backing offset since their lifetimes don't overlap");
    }

    #[test]
    fn overlapping_lifetime_transients_do_not_alias() {
        // P1 writes X and Z; P2 reads both and writes Y; P3 (present) reads Y.
        // X and Z are both live across P1..P2, so they must not share an offset.
        let mut graph = FrameGraph::new();
        let x = graph.intern("X");
        let z = graph.intern("Z");
        let y = graph.intern("Y");
        graph
            .declare_transient_texture(x, 64, 64, 1, TextureFormat::Rgba8Unorm, TextureRole::SHADER_RESOURCE)
            .unwrap();
        graph
            .declare_transient_texture(z, 64, 64, 1, TextureFormat::Rgba8Unorm, TextureRole::SHADER_RESOURCE)
            .unwrap();
        graph
            .declare_transient_texture(y, 64, 64, 1, TextureFormat::Rgba8Unorm, TextureRole::SHADER_RESOURCE)
            .unwrap();
        let p1 = RenderTargetPass { name: "P1", inputs: vec![], outputs: vec![x, z] };
        let p2 = RenderTargetPass { name: "P2", inputs: vec![x, z], outputs: vec![y] };
        let p3 = RenderTargetPass { name: "P3 (present)", inputs: vec![y], outputs: vec![] };
        graph.setup(vec![Box::new(p1), Box::new(p2), Box::new(p3)], 2);

        let device = StubDevice;
        graph.compile(&device).unwrap();

        let x_offset = graph.resource(x).and_then(FgResource::as_texture).unwrap().as_any().downcast_ref::<StubTexture>().unwrap().offset;
        let z_offset = graph.resource(z).and_then(FgResource::as_texture).unwrap().as_any().downcast_ref::<StubTexture>().unwrap().offset;
        assert_ne!(x_offset, z_offset, "X and Z are both live across P1..P2 and must not alias");
    }
}
