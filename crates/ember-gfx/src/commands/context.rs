use glam::{UVec3, Vec4};

use crate::backend::memory::MemoryClass;
use crate::backend::{
    BufferCopy, BufferImageCopy, BufferTransition, ClearValue, DescriptorWrite, GraphicsPipelineInfo, ImageTransition, IndexType, NativeBuffer,
    NativeCommandBuffer, NativeDescriptorSet, NativeDescriptorSetLayout, NativeImageView, NativePipeline,
    NativePipelineLayout, NativeRenderPass, NativeSemaphore, PipelineBindPoint, RenderPassBeginInfo, RhiBackend,
    ShaderStageInfo,
};
use crate::cache::{FramebufferKey, PipelineKey, RenderPassKey, TargetSignature};
use crate::commands::barrier::{request_transition, PendingBarriers, PipelineStages, ResourceState};
use crate::commands::state::{BindingState, ContextEvent, ContextPhase, DirtyFlags};
use crate::commands::GfxShared;
use crate::desc::{
    BindingKind, BindingLayout, ClearFlags, DepthStencilDesc, PrimitiveType, QueueKind, Rect, RenderPassDesc, VertexFormatDesc,
    Viewport, MAX_COLOR_TARGETS, MAX_CONSTANT_BUFFERS, MAX_STORAGE_BUFFERS, MAX_VERTEX_STREAMS,
};
use crate::device::resources::Resources;
use crate::error::{GfxError, GfxResult, GfxResultExt};
use crate::frame::allocator::FrameAllocation;
use crate::frame::slot::GpuTimer;
use crate::handles::{BlendState, Buffer, DepthStencilState, Handle, RasterizerState, Sampler, Technique, Texture};

const READBACK_ALIGNMENT: u64 = 16;

/// 已经录制进 command buffer 的原生绑定
///
/// 用来跳过重复的绑定调用。换一个新的 command buffer 之后必须清空。
#[derive(Clone, Copy, Default)]
struct BoundNative {
    bind_point: Option<PipelineBindPoint>,
    pipeline: NativePipeline,
    pipeline_layout: NativePipelineLayout,
    strides: [u32; MAX_VERTEX_STREAMS],
    vertex: [(NativeBuffer, u64); MAX_VERTEX_STREAMS],
    index: (NativeBuffer, u64),
    set: NativeDescriptorSet,
    /// 原生 buffer 与 dynamic offset
    constant_buffers: [(NativeBuffer, u32); MAX_CONSTANT_BUFFERS],
    storage_buffers: [(NativeBuffer, u64); MAX_STORAGE_BUFFERS],
}

/// 一个逻辑队列上的命令录制器
///
/// 状态 setter 只修改 [`BindingState`]，原生的绑定推迟到 draw / dispatch 之前的 `apply_state`。
pub struct CommandContext {
    queue: QueueKind,
    phase: ContextPhase,
    cmd: NativeCommandBuffer,

    state: BindingState,
    barriers: PendingBarriers,
    bound: BoundNative,

    render_pass: NativeRenderPass,
    pass_extent: (u32, u32),

    /// 是否访问过本帧 acquire 到的 swapchain image
    uses_backbuffer: bool,
    marker_depth: u32,
    /// 提交时需要等待的 semaphore
    waits: Vec<(NativeSemaphore, PipelineStages)>,

    /// descriptor 写入的暂存区，避免每次 draw 分配
    writes: Vec<DescriptorWrite>,
}

// new & init
impl CommandContext {
    pub fn new(queue: QueueKind) -> Self {
        Self {
            queue,
            phase: ContextPhase::Idle,
            cmd: NativeCommandBuffer::null(),
            state: BindingState::default(),
            barriers: PendingBarriers::default(),
            bound: BoundNative::default(),
            render_pass: NativeRenderPass::null(),
            pass_extent: (0, 0),
            uses_backbuffer: false,
            marker_depth: 0,
            waits: Vec::new(),
            writes: Vec::new(),
        }
    }
}

// getters
impl CommandContext {
    #[inline]
    pub fn queue(&self) -> QueueKind {
        self.queue
    }
    #[inline]
    pub fn phase(&self) -> ContextPhase {
        self.phase
    }
    #[inline]
    pub fn command_buffer(&self) -> NativeCommandBuffer {
        self.cmd
    }
    #[inline]
    pub fn uses_backbuffer(&self) -> bool {
        self.uses_backbuffer
    }
    #[inline]
    pub fn state(&self) -> &BindingState {
        &self.state
    }
}

// 生命周期，由 device 驱动
impl CommandContext {
    fn advance(&mut self, event: ContextEvent) {
        let next = self.phase.next(event);
        debug_assert!(next.is_some(), "invalid context event {event:?} in phase {:?}", self.phase);
        if let Some(next) = next {
            self.phase = next;
        }
    }

    /// 取一个 command buffer 并开始录制
    pub(crate) fn begin(&mut self, shared: &mut GfxShared) {
        self.advance(ContextEvent::Begin);
        self.start_command_buffer(shared);
    }

    fn start_command_buffer(&mut self, shared: &mut GfxShared) {
        self.cmd = shared
            .command_buffers
            .acquire(shared.backend, self.queue)
            .or_fatal("acquiring a command buffer");
        shared.backend.begin_command_buffer(self.cmd).or_fatal("beginning a command buffer");

        self.bound = BoundNative::default();
        self.state.invalidate();
    }

    /// 结束录制，返回需要提交的 command buffer
    ///
    /// `event` 为 [`ContextEvent::Split`] 时 context 保持 building，调用者随后需要 [`CommandContext::restart`]。
    pub(crate) fn end(&mut self, shared: &mut GfxShared, event: ContextEvent) -> NativeCommandBuffer {
        debug_assert!(
            self.phase != ContextPhase::RenderPass,
            "context submitted inside a render pass"
        );
        debug_assert_eq!(self.marker_depth, 0, "unbalanced debug markers at submission");
        self.advance(event);

        flush_pending(&mut self.barriers, shared, self.cmd);
        shared.backend.end_command_buffer(self.cmd).or_fatal("ending a command buffer");
        std::mem::replace(&mut self.cmd, NativeCommandBuffer::null())
    }

    /// split 之后在新的 command buffer 上继续录制，绑定状态保留
    pub(crate) fn restart(&mut self, shared: &mut GfxShared) {
        self.start_command_buffer(shared);
    }

    /// 提交完成，回到 idle 等待复用
    pub(crate) fn recycle(&mut self) {
        self.advance(ContextEvent::Recycle);
        self.state.reset();
        self.barriers.clear();
        self.bound = BoundNative::default();
        self.render_pass = NativeRenderPass::null();
        self.uses_backbuffer = false;
        self.marker_depth = 0;
        self.waits.clear();
    }

    #[inline]
    pub(crate) fn add_wait(&mut self, semaphore: NativeSemaphore, stages: PipelineStages) {
        self.waits.push((semaphore, stages));
    }

    #[inline]
    pub(crate) fn take_waits(&mut self) -> Vec<(NativeSemaphore, PipelineStages)> {
        std::mem::take(&mut self.waits)
    }
}

fn flush_pending(barriers: &mut PendingBarriers, shared: &mut GfxShared, cmd: NativeCommandBuffer) {
    if let Some(transitions) = barriers.flush(shared.backend, cmd) {
        shared.stats.barrier_batches += 1;
        shared.stats.barrier_transitions += transitions as u32;
    }
}

/// 修改 buffer 记录的状态，需要时追加一个 transition；transient buffer 不参与状态追踪
pub(crate) fn request_buffer_state(
    barriers: &mut PendingBarriers,
    resources: &mut Resources,
    handle: Handle<Buffer>,
    target: ResourceState,
    force: bool,
) {
    let record = &mut resources.buffers[handle];
    if record.is_transient() {
        return;
    }
    if let Some(before) = request_transition(&mut record.state, target, force) {
        barriers.push_buffer(BufferTransition {
            buffer: record.binding.buffer,
            before,
            after: target,
        });
    }
}

/// constant buffer 的 dynamic offset 只有 32 位
#[inline]
fn dynamic_offset(offset: u64) -> GfxResult<u32> {
    u32::try_from(offset).map_err(|_| GfxError::DynamicOffsetOverflow(offset))
}

/// 修改 texture 记录的状态，返回该 texture 是否是 backbuffer
pub(crate) fn request_texture_state(
    barriers: &mut PendingBarriers,
    resources: &mut Resources,
    handle: Handle<Texture>,
    target: ResourceState,
    force: bool,
) -> bool {
    let record = &mut resources.textures[handle];
    if let Some(before) = request_transition(&mut record.state, target, force) {
        barriers.push_image(ImageTransition {
            image: record.image,
            format: record.desc.format,
            mip_count: record.desc.mip_count,
            layer_count: record.desc.layer_count(),
            before,
            after: target,
        });
    }
    record.is_backbuffer()
}

/// 在 context 上录制命令
///
/// 由 `Device::record` 得到，持有 context 以及 device 状态的借用。
pub struct Recorder<'a> {
    pub(crate) context: &'a mut CommandContext,
    pub(crate) shared: GfxShared<'a>,
}

// 状态 setter，只记录状态
impl Recorder<'_> {
    #[inline]
    pub fn set_technique(&mut self, technique: impl Into<Handle<Technique>>) {
        self.context.state.set_technique(technique.into());
    }
    #[inline]
    pub fn set_primitive(&mut self, primitive: PrimitiveType) {
        self.context.state.set_primitive(primitive);
    }
    #[inline]
    pub fn set_blend_state(&mut self, blend: impl Into<Handle<BlendState>>) {
        self.context.state.set_blend(blend.into());
    }
    #[inline]
    pub fn set_depth_stencil_state(&mut self, depth_stencil: impl Into<Handle<DepthStencilState>>) {
        self.context.state.set_depth_stencil(depth_stencil.into());
    }
    #[inline]
    pub fn set_rasterizer_state(&mut self, rasterizer: impl Into<Handle<RasterizerState>>) {
        self.context.state.set_rasterizer(rasterizer.into());
    }
    #[inline]
    pub fn set_vertex_stream(&mut self, stream: usize, buffer: impl Into<Handle<Buffer>>) {
        self.context.state.set_vertex_stream(stream, buffer.into());
    }
    #[inline]
    pub fn set_index_buffer(&mut self, buffer: impl Into<Handle<Buffer>>) {
        self.context.state.set_index_buffer(buffer.into());
    }
    #[inline]
    pub fn set_constant_buffer(&mut self, slot: usize, buffer: impl Into<Handle<Buffer>>) {
        self.context.state.set_constant_buffer(slot, buffer.into());
    }
    #[inline]
    pub fn set_sampler(&mut self, slot: usize, sampler: impl Into<Handle<Sampler>>) {
        self.context.state.set_sampler(slot, sampler.into());
    }
    #[inline]
    pub fn set_texture(&mut self, slot: usize, texture: impl Into<Handle<Texture>>) {
        self.context.state.set_texture(slot, texture.into());
    }
    #[inline]
    pub fn set_storage_image(&mut self, slot: usize, texture: impl Into<Handle<Texture>>) {
        self.context.state.set_storage_image(slot, texture.into());
    }
    #[inline]
    pub fn set_storage_buffer(&mut self, slot: usize, buffer: impl Into<Handle<Buffer>>) {
        self.context.state.set_storage_buffer(slot, buffer.into());
    }
    #[inline]
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.context.state.set_viewport(viewport);
    }
    #[inline]
    pub fn set_scissor(&mut self, scissor: Rect) {
        self.context.state.set_scissor(scissor);
    }
    #[inline]
    pub fn set_push_constants(&mut self, data: &[u8]) {
        self.context.state.set_push_constants(data);
    }
    /// 以 POD 类型设置 push constant
    #[inline]
    pub fn set_push_constants_pod<T: bytemuck::Pod>(&mut self, data: &T) {
        self.context.state.set_push_constants(bytemuck::bytes_of(data));
    }
}

// render pass
impl Recorder<'_> {
    pub fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        let _span = tracy_client::span!("Recorder::begin_render_pass");
        let context = &mut *self.context;
        let shared = &mut self.shared;
        context.advance(ContextEvent::BeginRenderPass);

        let mut target = TargetSignature::default();
        let mut views: Vec<NativeImageView> = Vec::with_capacity(MAX_COLOR_TARGETS + 1);
        let mut colors = [0u32; MAX_COLOR_TARGETS];
        let mut depth = 0;
        let mut extent = None;

        let attachments = desc
            .colors
            .iter()
            .map_while(|c| *c)
            .map(|texture| (texture, ResourceState::RenderTarget))
            .chain(desc.depth.map(|texture| (texture, ResourceState::DepthWrite)));
        for (i, (texture, state)) in attachments.enumerate() {
            let record = &shared.resources.textures[texture];
            let (width, height, _) = record.desc.mip_extent(0);
            debug_assert!(
                extent.is_none_or(|e| e == (width, height)),
                "render pass attachments differ in size"
            );
            extent = Some((width, height));
            target.samples = record.desc.samples;
            views.push(record.view);

            if state == ResourceState::DepthWrite {
                target.depth_format = record.desc.format;
                depth = texture.index();
            } else {
                target.color_formats[i] = record.desc.format;
                target.color_count += 1;
                colors[i] = texture.index();
            }

            if request_texture_state(&mut context.barriers, shared.resources, texture, state, false) {
                context.uses_backbuffer = true;
            }
        }
        debug_assert!(extent.is_some(), "render pass without attachments");
        let (width, height) = extent.unwrap_or((1, 1));

        flush_pending(&mut context.barriers, shared, context.cmd);

        let backend = &mut *shared.backend;
        let rp_key = RenderPassKey {
            target,
            clear: effective_clear(desc.clear, &target),
        };
        let (render_pass, hit) = shared
            .caches
            .render_passes
            .get_or_create(rp_key, |key| {
                log::debug!("create render pass: {key:?}");
                backend.create_render_pass(key)
            })
            .or_fatal("creating a render pass");
        if hit {
            shared.stats.render_pass_cache_hits += 1;
        } else {
            shared.stats.render_pass_cache_misses += 1;
        }

        let fb_key = FramebufferKey {
            render_pass,
            colors,
            depth,
            width,
            height,
        };
        let (framebuffer, hit) = shared
            .caches
            .framebuffers
            .get_or_create(fb_key, |key| {
                log::debug!("create framebuffer {}x{} for {:?}", key.width, key.height, key.render_pass);
                backend.create_framebuffer(key.render_pass, &views, key.width, key.height)
            })
            .or_fatal("creating a framebuffer");
        if hit {
            shared.stats.framebuffer_cache_hits += 1;
        } else {
            shared.stats.framebuffer_cache_misses += 1;
        }

        let mut clear_values = Vec::with_capacity(views.len());
        clear_values.extend(
            desc.clear_colors[..target.color_count as usize]
                .iter()
                .map(|color| ClearValue::Color(color.to_array())),
        );
        if target.has_depth() {
            clear_values.push(ClearValue::DepthStencil {
                depth: desc.clear_depth,
                stencil: desc.clear_stencil,
            });
        }

        backend.cmd_begin_render_pass(
            context.cmd,
            &RenderPassBeginInfo {
                render_pass,
                framebuffer,
                width,
                height,
                clear_values: &clear_values,
            },
        );

        context.render_pass = render_pass;
        context.pass_extent = (width, height);
        context.state.set_target(target);
        context.state.set_viewport(Viewport::from_extent(width, height));
        context.state.set_scissor(Rect {
            x: 0,
            y: 0,
            width,
            height,
        });
        // 动态状态在新的 render pass 中重新设置
        context.state.mark(DirtyFlags::VIEWPORT | DirtyFlags::SCISSOR);
    }

    pub fn end_render_pass(&mut self) {
        self.context.advance(ContextEvent::EndRenderPass);
        self.shared.backend.cmd_end_render_pass(self.context.cmd);
        self.context.render_pass = NativeRenderPass::null();
    }

    /// 当前 render pass 的尺寸
    #[inline]
    pub fn render_pass_extent(&self) -> (u32, u32) {
        self.context.pass_extent
    }
}

// draw & dispatch
impl Recorder<'_> {
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        debug_assert_eq!(self.context.phase, ContextPhase::RenderPass, "draw outside of a render pass");
        self.apply_state(PipelineBindPoint::Graphics);
        self.shared
            .backend
            .cmd_draw(self.context.cmd, vertex_count, instance_count, first_vertex, first_instance);
        self.shared.stats.draws += 1;
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        debug_assert_eq!(self.context.phase, ContextPhase::RenderPass, "draw outside of a render pass");
        debug_assert!(self.context.state.index_buffer.is_valid(), "draw_indexed without an index buffer");
        self.apply_state(PipelineBindPoint::Graphics);
        self.shared.backend.cmd_draw_indexed(
            self.context.cmd,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        self.shared.stats.draws += 1;
    }

    pub fn draw_indexed_indirect(&mut self, args: impl Into<Handle<Buffer>>, offset: u64, draw_count: u32, stride: u32) {
        debug_assert_eq!(self.context.phase, ContextPhase::RenderPass, "draw outside of a render pass");
        let args = args.into();
        request_buffer_state(
            &mut self.context.barriers,
            self.shared.resources,
            args,
            ResourceState::IndirectArgument,
            false,
        );
        self.apply_state(PipelineBindPoint::Graphics);

        let binding = self.shared.resources.buffers[args].binding;
        self.shared.backend.cmd_draw_indexed_indirect(
            self.context.cmd,
            binding.buffer,
            binding.offset + offset,
            draw_count,
            stride,
        );
        self.shared.stats.draws += 1;
    }

    pub fn dispatch(&mut self, groups: UVec3) {
        debug_assert_eq!(self.context.phase, ContextPhase::Building, "dispatch inside a render pass");
        self.apply_state(PipelineBindPoint::Compute);
        self.shared.backend.cmd_dispatch(self.context.cmd, groups);
        self.shared.stats.dispatches += 1;
    }

    pub fn dispatch_indirect(&mut self, args: impl Into<Handle<Buffer>>, offset: u64) {
        debug_assert_eq!(self.context.phase, ContextPhase::Building, "dispatch inside a render pass");
        let args = args.into();
        request_buffer_state(
            &mut self.context.barriers,
            self.shared.resources,
            args,
            ResourceState::IndirectArgument,
            false,
        );
        self.apply_state(PipelineBindPoint::Compute);

        let binding = self.shared.resources.buffers[args].binding;
        self.shared
            .backend
            .cmd_dispatch_indirect(self.context.cmd, binding.buffer, binding.offset + offset);
        self.shared.stats.dispatches += 1;
    }
}

// barriers
impl Recorder<'_> {
    /// 请求一次 texture 的状态转换，barrier 会延迟到下一次 flush
    pub fn transition_texture(&mut self, texture: impl Into<Handle<Texture>>, state: ResourceState) {
        if request_texture_state(&mut self.context.barriers, self.shared.resources, texture.into(), state, false) {
            self.context.uses_backbuffer = true;
        }
    }

    pub fn transition_buffer(&mut self, buffer: impl Into<Handle<Buffer>>, state: ResourceState) {
        request_buffer_state(&mut self.context.barriers, self.shared.resources, buffer.into(), state, false);
    }

    /// 两次 unordered access 之间的 barrier，即使状态没有改变
    pub fn uav_barrier_texture(&mut self, texture: impl Into<Handle<Texture>>) {
        request_texture_state(
            &mut self.context.barriers,
            self.shared.resources,
            texture.into(),
            ResourceState::UnorderedAccess,
            true,
        );
    }

    pub fn uav_barrier_buffer(&mut self, buffer: impl Into<Handle<Buffer>>) {
        request_buffer_state(
            &mut self.context.barriers,
            self.shared.resources,
            buffer.into(),
            ResourceState::UnorderedAccess,
            true,
        );
    }

    pub fn flush_barriers(&mut self) {
        debug_assert!(
            self.context.phase != ContextPhase::RenderPass || self.context.barriers.is_empty(),
            "barriers cannot be flushed inside a render pass"
        );
        flush_pending(&mut self.context.barriers, &mut self.shared, self.context.cmd);
    }
}

// readback
impl Recorder<'_> {
    /// 录制 buffer 到 host cached 内存的拷贝，提交并等待完成之后才能读取结果
    pub(crate) fn copy_buffer_to_readback(&mut self, buffer: Handle<Buffer>) -> FrameAllocation {
        debug_assert_eq!(self.context.phase, ContextPhase::Building, "readback inside a render pass");
        request_buffer_state(&mut self.context.barriers, self.shared.resources, buffer, ResourceState::CopySrc, false);
        flush_pending(&mut self.context.barriers, &mut self.shared, self.context.cmd);

        let record = &self.shared.resources.buffers[buffer];
        let (binding, size) = (record.binding, record.desc.size());
        let readback = self
            .shared
            .slot
            .allocator(MemoryClass::HostCached)
            .alloc(self.shared.backend, size, READBACK_ALIGNMENT)
            .or_fatal("allocating readback memory");
        self.shared.backend.cmd_copy_buffer(
            self.context.cmd,
            binding.buffer,
            readback.buffer,
            &[BufferCopy {
                src_offset: binding.offset,
                dst_offset: readback.offset,
                size,
            }],
        );
        readback
    }

    /// 录制 texture 某一级 mip（所有 layer）到 host cached 内存的拷贝
    pub(crate) fn copy_texture_to_readback(&mut self, texture: Handle<Texture>, mip: u32) -> FrameAllocation {
        debug_assert_eq!(self.context.phase, ContextPhase::Building, "readback inside a render pass");
        if request_texture_state(&mut self.context.barriers, self.shared.resources, texture, ResourceState::CopySrc, false)
        {
            self.context.uses_backbuffer = true;
        }
        flush_pending(&mut self.context.barriers, &mut self.shared, self.context.cmd);

        let record = &self.shared.resources.textures[texture];
        let (desc, image) = (record.desc, record.image);
        debug_assert!(mip < desc.mip_count, "{texture:?} has no mip {mip}");
        let readback = self
            .shared
            .slot
            .allocator(MemoryClass::HostCached)
            .alloc(self.shared.backend, desc.mip_size(mip), READBACK_ALIGNMENT)
            .or_fatal("allocating readback memory");
        let (width, height, depth) = desc.mip_extent(mip);
        self.shared.backend.cmd_copy_image_to_buffer(
            self.context.cmd,
            image,
            readback.buffer,
            &[BufferImageCopy {
                buffer_offset: readback.offset,
                mip_level: mip,
                base_layer: 0,
                layer_count: desc.layer_count(),
                width,
                height,
                depth,
            }],
        );
        readback
    }
}

// debug markers & timers
impl Recorder<'_> {
    pub fn push_marker(&mut self, name: &str, color: Vec4) {
        self.shared.backend.cmd_begin_label(self.context.cmd, name, color);
        self.context.marker_depth += 1;
    }

    pub fn pop_marker(&mut self) {
        debug_assert!(self.context.marker_depth > 0, "pop_marker without push_marker");
        self.shared.backend.cmd_end_label(self.context.cmd);
        self.context.marker_depth = self.context.marker_depth.saturating_sub(1);
    }

    pub fn insert_marker(&mut self, name: &str, color: Vec4) {
        self.shared.backend.cmd_insert_label(self.context.cmd, name, color);
    }

    /// 开始一个 GPU timer，本帧的 timer 用完时返回 None
    pub fn begin_timer(&mut self, name: &str) -> Option<GpuTimer> {
        let Some((timer, query)) = self.shared.slot.alloc_timer(name) else {
            log::warn!("out of gpu timers for this frame, `{name}` is not measured");
            return None;
        };
        let pool = self.shared.slot.query_pool();
        self.shared.backend.cmd_write_timestamp(self.context.cmd, pool, query);
        Some(timer)
    }

    pub fn end_timer(&mut self, timer: GpuTimer) {
        let query = self.shared.slot.finish_timer(timer);
        let pool = self.shared.slot.query_pool();
        self.shared.backend.cmd_write_timestamp(self.context.cmd, pool, query);
    }
}

// apply state
impl Recorder<'_> {
    /// 在 draw / dispatch 之前，按依赖顺序解析 dirty 的状态
    ///
    /// 1. 资源状态转换，作为一批 barrier 提交
    /// 2. pipeline
    /// 3. vertex / index buffer，viewport 与 scissor
    /// 4. push constant
    /// 5. descriptor set：只有 constant buffer 的偏移改变时，只用新的 dynamic offset 重新绑定
    fn apply_state(&mut self, bind_point: PipelineBindPoint) {
        let _span = tracy_client::span!("Recorder::apply_state");
        let context = &mut *self.context;
        let shared = &mut self.shared;

        let technique_handle = context.state.technique;
        debug_assert!(technique_handle.is_valid(), "draw or dispatch without a technique");
        let technique = &shared.resources.techniques[technique_handle];
        debug_assert_eq!(
            technique.is_compute,
            bind_point == PipelineBindPoint::Compute,
            "{technique_handle:?} does not match the bind point"
        );
        let layout = technique.layout;
        let pipeline_layout = technique.pipeline_layout;
        let set_layout = technique.set_layout;

        context.request_binding_states(shared, bind_point, &layout);
        debug_assert!(
            context.phase != ContextPhase::RenderPass || context.barriers.is_empty(),
            "bound resources need transitions inside a render pass, transition them before begin_render_pass"
        );
        flush_pending(&mut context.barriers, shared, context.cmd);

        if context.bound.bind_point != Some(bind_point) {
            context.bound.bind_point = Some(bind_point);
            context
                .state
                .mark(DirtyFlags::PIPELINE | DirtyFlags::DESCRIPTORS | DirtyFlags::PUSH_CONSTANTS);
        }

        // pipeline
        let strides = match bind_point {
            PipelineBindPoint::Graphics => context.vertex_strides(shared.resources),
            PipelineBindPoint::Compute => [0; MAX_VERTEX_STREAMS],
        };
        let strides_changed = strides != context.bound.strides;
        let pipeline_dirty = !context.state.take(DirtyFlags::PIPELINE).is_empty();
        if pipeline_dirty || strides_changed {
            context.bound.strides = strides;
            let pipeline = context.resolve_pipeline(shared, bind_point, strides);
            if pipeline != context.bound.pipeline {
                shared.backend.cmd_bind_pipeline(context.cmd, bind_point, pipeline);
                shared.stats.pipeline_binds += 1;
                context.bound.pipeline = pipeline;
            }
            if pipeline_layout != context.bound.pipeline_layout {
                context.bound.pipeline_layout = pipeline_layout;
                context.state.mark(DirtyFlags::DESCRIPTORS | DirtyFlags::PUSH_CONSTANTS);
            }
        }

        if bind_point == PipelineBindPoint::Graphics {
            context.bind_vertex_input(shared);
            if !context.state.take(DirtyFlags::VIEWPORT).is_empty() {
                shared.backend.cmd_set_viewport(context.cmd, &context.state.viewport);
            }
            if !context.state.take(DirtyFlags::SCISSOR).is_empty() {
                shared.backend.cmd_set_scissor(context.cmd, &context.state.scissor);
            }
        }

        if !context.state.take(DirtyFlags::PUSH_CONSTANTS).is_empty() && !context.state.push_constants.is_empty() {
            debug_assert_eq!(
                context.state.push_constants.len() as u32,
                layout.push_constant_size,
                "push constant size does not match the technique layout"
            );
            shared
                .backend
                .cmd_push_constants(context.cmd, pipeline_layout, 0, &context.state.push_constants);
        }

        context.bind_descriptors(shared, bind_point, &layout, set_layout, pipeline_layout);
    }
}

// apply state 的各个步骤
impl CommandContext {
    /// 绑定的非 transient 资源转换到使用时的状态，并检查 transient buffer 是否在本帧更新过
    fn request_binding_states(&mut self, shared: &mut GfxShared, bind_point: PipelineBindPoint, layout: &BindingLayout) {
        let frame_id = shared.frame_id;
        let resources = &mut *shared.resources;
        let state = &self.state;
        let barriers = &mut self.barriers;

        let mut buffer = |handle: Handle<Buffer>, target: ResourceState| {
            if !handle.is_valid() {
                return;
            }
            let record = &resources.buffers[handle];
            debug_assert!(
                !record.is_transient() || record.last_update_frame == Some(frame_id),
                "transient {handle:?} is used in frame {frame_id} without being updated"
            );
            request_buffer_state(barriers, resources, handle, target, false);
        };

        if bind_point == PipelineBindPoint::Graphics {
            state
                .vertex_streams
                .iter()
                .for_each(|h| buffer(*h, ResourceState::VertexBuffer));
            buffer(state.index_buffer, ResourceState::IndexBuffer);
        }
        state.constant_buffers[..layout.constant_buffers as usize]
            .iter()
            .for_each(|h| buffer(*h, ResourceState::ConstantBuffer));
        state.storage_buffers[..layout.storage_buffers as usize]
            .iter()
            .for_each(|h| buffer(*h, ResourceState::UnorderedAccess));

        let mut uses_backbuffer = false;
        let textures = state.textures[..layout.textures as usize]
            .iter()
            .map(|h| (*h, ResourceState::ShaderResource));
        let storage_images = state.storage_images[..layout.storage_images as usize]
            .iter()
            .map(|h| (*h, ResourceState::UnorderedAccess));
        for (handle, target) in textures.chain(storage_images) {
            debug_assert!(handle.is_valid(), "texture slot used by the technique is not bound");
            if handle.is_valid() {
                uses_backbuffer |= request_texture_state(barriers, resources, handle, target, false);
            }
        }
        self.uses_backbuffer |= uses_backbuffer;
    }

    fn vertex_strides(&self, resources: &Resources) -> [u32; MAX_VERTEX_STREAMS] {
        self.state.vertex_streams.map(|handle| match resources.buffers.get(handle) {
            Some(record) => record.desc.stride,
            None => 0,
        })
    }

    fn resolve_pipeline(
        &self,
        shared: &mut GfxShared,
        bind_point: PipelineBindPoint,
        strides: [u32; MAX_VERTEX_STREAMS],
    ) -> NativePipeline {
        let state = &self.state;
        let key = match bind_point {
            PipelineBindPoint::Compute => PipelineKey::compute(state.technique.index()),
            PipelineBindPoint::Graphics => PipelineKey {
                technique: state.technique.index(),
                blend: state.blend.index(),
                depth_stencil: state.depth_stencil.index(),
                rasterizer: state.rasterizer.index(),
                strides,
                primitive: state.primitive,
                target: state.target,
            },
        };

        let render_pass = self.render_pass;
        let backend = &mut *shared.backend;
        let resources = &*shared.resources;
        let (pipeline, hit) = shared
            .caches
            .pipelines
            .get_or_create(key, |key| {
                log::debug!("create pipeline for technique #{} ({:?})", key.technique, key.target);
                build_pipeline(backend, resources, key, render_pass)
            })
            .or_fatal("creating a pipeline");
        if hit {
            shared.stats.pipeline_cache_hits += 1;
        } else {
            shared.stats.pipeline_cache_misses += 1;
        }
        pipeline
    }

    fn bind_vertex_input(&mut self, shared: &mut GfxShared) {
        // transient buffer 在 rename 之后，同一个句柄对应不同的原生 buffer，所以比较的是原生绑定
        self.state.take(DirtyFlags::VERTEX_INPUT);

        for (stream, handle) in self.state.vertex_streams.iter().enumerate() {
            let Some(record) = shared.resources.buffers.get(*handle) else {
                continue;
            };
            let native = (record.binding.buffer, record.binding.offset);
            if native != self.bound.vertex[stream] {
                shared
                    .backend
                    .cmd_bind_vertex_buffers(self.cmd, stream as u32, &[native.0], &[native.1]);
                self.bound.vertex[stream] = native;
            }
        }

        if let Some(record) = shared.resources.buffers.get(self.state.index_buffer) {
            let native = (record.binding.buffer, record.binding.offset);
            if native != self.bound.index {
                let stride = record.desc.stride;
                debug_assert!(stride == 2 || stride == 4, "index buffer stride must be 2 or 4, got {stride}");
                let index_type = if stride == 2 { IndexType::U16 } else { IndexType::U32 };
                shared.backend.cmd_bind_index_buffer(self.cmd, native.0, native.1, index_type);
                self.bound.index = native;
            }
        }
    }

    fn bind_descriptors(
        &mut self,
        shared: &mut GfxShared,
        bind_point: PipelineBindPoint,
        layout: &BindingLayout,
        set_layout: NativeDescriptorSetLayout,
        pipeline_layout: NativePipelineLayout,
    ) {
        let resources = &*shared.resources;
        let cb_count = layout.constant_buffers as usize;
        let sb_count = layout.storage_buffers as usize;

        let mut constant_buffers = [(NativeBuffer::null(), 0u32); MAX_CONSTANT_BUFFERS];
        for (slot, handle) in self.state.constant_buffers[..cb_count].iter().enumerate() {
            debug_assert!(handle.is_valid(), "constant buffer slot {slot} is not bound");
            if let Some(record) = resources.buffers.get(*handle) {
                let offset = dynamic_offset(record.binding.offset).or_fatal("binding a constant buffer");
                constant_buffers[slot] = (record.binding.buffer, offset);
            }
        }
        let mut storage_buffers = [(NativeBuffer::null(), 0u64); MAX_STORAGE_BUFFERS];
        for (slot, handle) in self.state.storage_buffers[..sb_count].iter().enumerate() {
            debug_assert!(handle.is_valid(), "storage buffer slot {slot} is not bound");
            if let Some(record) = resources.buffers.get(*handle) {
                storage_buffers[slot] = (record.binding.buffer, record.binding.offset);
            }
        }

        let cb_natives_changed = constant_buffers[..cb_count]
            .iter()
            .zip(&self.bound.constant_buffers)
            .any(|(new, old)| new.0 != old.0);
        if cb_natives_changed {
            self.state.mark(DirtyFlags::CONSTANT_BUFFERS);
        } else if constant_buffers[..cb_count] != self.bound.constant_buffers[..cb_count] {
            self.state.mark(DirtyFlags::CONSTANT_BUFFER_OFFSETS);
        }
        if storage_buffers[..sb_count] != self.bound.storage_buffers[..sb_count] {
            self.state.mark(DirtyFlags::STORAGE_BUFFERS);
        }

        let rebuild = !self.state.take(DirtyFlags::DESCRIPTORS).is_empty();
        let offsets_only = !self.state.take(DirtyFlags::CONSTANT_BUFFER_OFFSETS).is_empty();
        if layout.is_empty() || !(rebuild || offsets_only) {
            return;
        }

        if rebuild {
            let set = shared
                .slot
                .descriptors()
                .acquire(shared.backend, set_layout)
                .or_fatal("allocating a descriptor set");
            self.collect_writes(resources, layout, &constant_buffers, &storage_buffers);
            shared.backend.write_descriptor_set(set, &self.writes);
            shared.stats.descriptor_sets_written += 1;
            self.bound.set = set;
        } else {
            shared.stats.dynamic_offset_rebinds += 1;
        }

        let offsets = constant_buffers.map(|(_, offset)| offset);
        shared
            .backend
            .cmd_bind_descriptor_set(self.cmd, bind_point, pipeline_layout, self.bound.set, &offsets[..cb_count]);
        self.bound.constant_buffers = constant_buffers;
        self.bound.storage_buffers = storage_buffers;
    }

    /// 按照 binding 的顺序生成所有写入
    fn collect_writes(
        &mut self,
        resources: &Resources,
        layout: &BindingLayout,
        constant_buffers: &[(NativeBuffer, u32)],
        storage_buffers: &[(NativeBuffer, u64)],
    ) {
        let state = &self.state;
        let writes = &mut self.writes;
        writes.clear();

        for slot in 0..layout.constant_buffers {
            let range = resources
                .buffers
                .get(state.constant_buffers[slot as usize])
                .map_or(0, |record| record.desc.size());
            writes.push(DescriptorWrite::ConstantBuffer {
                binding: layout.binding(BindingKind::ConstantBuffer, slot),
                buffer: constant_buffers[slot as usize].0,
                range,
            });
        }
        for slot in 0..layout.samplers {
            let handle = state.samplers[slot as usize];
            debug_assert!(handle.is_valid(), "sampler slot {slot} is not bound");
            if let Some(record) = resources.samplers.get(handle) {
                writes.push(DescriptorWrite::Sampler {
                    binding: layout.binding(BindingKind::Sampler, slot),
                    sampler: record.native,
                });
            }
        }
        for slot in 0..layout.textures {
            if let Some(record) = resources.textures.get(state.textures[slot as usize]) {
                writes.push(DescriptorWrite::Texture {
                    binding: layout.binding(BindingKind::Texture, slot),
                    view: record.view,
                });
            }
        }
        for slot in 0..layout.storage_images {
            if let Some(record) = resources.textures.get(state.storage_images[slot as usize]) {
                writes.push(DescriptorWrite::StorageImage {
                    binding: layout.binding(BindingKind::StorageImage, slot),
                    view: record.view,
                });
            }
        }
        for slot in 0..layout.storage_buffers {
            let (buffer, offset) = storage_buffers[slot as usize];
            let range = resources
                .buffers
                .get(state.storage_buffers[slot as usize])
                .map_or(0, |record| record.desc.size());
            writes.push(DescriptorWrite::StorageBuffer {
                binding: layout.binding(BindingKind::StorageBuffer, slot),
                buffer,
                offset,
                range,
            });
        }
    }
}

fn build_pipeline(
    backend: &mut dyn RhiBackend,
    resources: &Resources,
    key: &PipelineKey,
    render_pass: NativeRenderPass,
) -> GfxResult<NativePipeline> {
    let technique = &resources.techniques[Handle::<Technique>::from_index(key.technique)];
    let stages: Vec<ShaderStageInfo> = technique
        .shaders
        .iter()
        .map(|shader| {
            let record = &resources.shaders[shader.handle()];
            ShaderStageInfo {
                stage: record.stage,
                module: record.module,
                entry_point: &record.entry_point,
            }
        })
        .collect();

    if technique.is_compute {
        return backend.create_compute_pipeline(technique.pipeline_layout, &stages[0]);
    }

    debug_assert!(!render_pass.is_null(), "graphics pipeline requested outside of a render pass");
    let no_attributes = VertexFormatDesc::default();
    let vertex_format = resources
        .vertex_formats
        .get(technique.vertex_format.handle())
        .unwrap_or(&no_attributes);
    let blend = resources
        .blend_states
        .get(Handle::from_index(key.blend))
        .copied()
        .unwrap_or_default();
    let depth_stencil = match resources.depth_stencil_states.get(Handle::from_index(key.depth_stencil)) {
        Some(desc) => *desc,
        // 没有 depth attachment 时默认关闭深度测试
        None if !key.target.has_depth() => DepthStencilDesc::disabled(),
        None => DepthStencilDesc::default(),
    };
    let rasterizer = resources
        .rasterizer_states
        .get(Handle::from_index(key.rasterizer))
        .copied()
        .unwrap_or_default();

    backend.create_graphics_pipeline(&GraphicsPipelineInfo {
        layout: technique.pipeline_layout,
        render_pass,
        stages: &stages,
        attributes: &vertex_format.attributes,
        strides: &key.strides,
        instance_stream_mask: vertex_format.instance_stream_mask,
        primitive: key.primitive,
        blend: &blend,
        depth_stencil: &depth_stencil,
        rasterizer: &rasterizer,
        color_count: key.target.color_count as u32,
        samples: key.target.samples,
    })
}

/// render pass key 中的 clear 位只保留存在的 attachment
fn effective_clear(clear: ClearFlags, target: &TargetSignature) -> ClearFlags {
    let mut flags = ClearFlags::empty();
    for i in 0..target.color_count as usize {
        flags |= clear & ClearFlags::color(i);
    }
    if target.has_depth() {
        flags |= clear & (ClearFlags::DEPTH | ClearFlags::STENCIL);
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_offset_rejects_offsets_past_32_bits() {
        assert_eq!(dynamic_offset(0).unwrap(), 0);
        assert_eq!(dynamic_offset(u32::MAX as u64).unwrap(), u32::MAX);
        assert!(matches!(
            dynamic_offset(u32::MAX as u64 + 256),
            Err(GfxError::DynamicOffsetOverflow(offset)) if offset == u32::MAX as u64 + 256
        ));
    }
}
