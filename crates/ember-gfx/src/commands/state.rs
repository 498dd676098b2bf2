use bitflags::bitflags;

use crate::cache::TargetSignature;
use crate::desc::{
    PrimitiveType, Rect, Viewport, MAX_CONSTANT_BUFFERS, MAX_SAMPLERS, MAX_STORAGE_BUFFERS, MAX_STORAGE_IMAGES,
    MAX_TEXTURES, MAX_VERTEX_STREAMS,
};
use crate::handles::{BlendState, Buffer, DepthStencilState, Handle, RasterizerState, Sampler, Technique, Texture};

bitflags! {
    /// 需要在下一次 draw / dispatch 之前重新解析的状态
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u32 {
        const TECHNIQUE               = 1 << 0;
        const PRIMITIVE               = 1 << 1;
        const BLEND                   = 1 << 2;
        const DEPTH_STENCIL           = 1 << 3;
        const RASTERIZER              = 1 << 4;
        const RENDER_TARGETS          = 1 << 5;

        const VERTEX_STREAMS          = 1 << 6;
        const INDEX_BUFFER            = 1 << 7;

        const CONSTANT_BUFFERS        = 1 << 8;
        /// 只有 constant buffer 的偏移改变了
        const CONSTANT_BUFFER_OFFSETS = 1 << 9;
        const SAMPLERS                = 1 << 10;
        const TEXTURES                = 1 << 11;
        const STORAGE_IMAGES          = 1 << 12;
        const STORAGE_BUFFERS         = 1 << 13;

        const VIEWPORT                = 1 << 14;
        const SCISSOR                 = 1 << 15;
        const PUSH_CONSTANTS          = 1 << 16;

        const PIPELINE = Self::TECHNIQUE.bits()
            | Self::PRIMITIVE.bits()
            | Self::BLEND.bits()
            | Self::DEPTH_STENCIL.bits()
            | Self::RASTERIZER.bits()
            | Self::RENDER_TARGETS.bits();
        const VERTEX_INPUT = Self::VERTEX_STREAMS.bits() | Self::INDEX_BUFFER.bits();
        const DESCRIPTORS = Self::CONSTANT_BUFFERS.bits()
            | Self::SAMPLERS.bits()
            | Self::TEXTURES.bits()
            | Self::STORAGE_IMAGES.bits()
            | Self::STORAGE_BUFFERS.bits();
    }
}

/// context 所处的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextPhase {
    Idle,
    Building,
    /// building 的子状态
    RenderPass,
    Submitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextEvent {
    Begin,
    BeginRenderPass,
    EndRenderPass,
    /// 提交当前的 command buffer，然后立即开始新的一个
    Split,
    Submit,
    Recycle,
}

impl ContextPhase {
    /// 状态转换表，非法的转换返回 None
    pub fn next(self, event: ContextEvent) -> Option<ContextPhase> {
        use ContextEvent as E;
        use ContextPhase as P;
        match (self, event) {
            (P::Idle, E::Begin) => Some(P::Building),
            (P::Building, E::BeginRenderPass) => Some(P::RenderPass),
            (P::RenderPass, E::EndRenderPass) => Some(P::Building),
            (P::Building, E::Split) => Some(P::Building),
            (P::Building, E::Submit) => Some(P::Submitted),
            (P::Submitted, E::Recycle) => Some(P::Idle),
            _ => None,
        }
    }

    #[inline]
    pub fn is_recording(self) -> bool {
        matches!(self, ContextPhase::Building | ContextPhase::RenderPass)
    }
}

#[inline]
fn update<T: PartialEq>(slot: &mut T, value: T, dirty: &mut DirtyFlags, flag: DirtyFlags) {
    if *slot != value {
        *slot = value;
        *dirty |= flag;
    }
}

/// 当前绑定的状态
///
/// setter 只记录新值，值发生变化时设置对应的 dirty 位；真正的原生绑定发生在 `apply_state` 中。
#[derive(Clone, Debug)]
pub struct BindingState {
    pub technique: Handle<Technique>,
    pub primitive: PrimitiveType,
    pub blend: Handle<BlendState>,
    pub depth_stencil: Handle<DepthStencilState>,
    pub rasterizer: Handle<RasterizerState>,
    pub target: TargetSignature,

    pub vertex_streams: [Handle<Buffer>; MAX_VERTEX_STREAMS],
    pub index_buffer: Handle<Buffer>,

    pub constant_buffers: [Handle<Buffer>; MAX_CONSTANT_BUFFERS],
    pub samplers: [Handle<Sampler>; MAX_SAMPLERS],
    pub textures: [Handle<Texture>; MAX_TEXTURES],
    pub storage_images: [Handle<Texture>; MAX_STORAGE_IMAGES],
    pub storage_buffers: [Handle<Buffer>; MAX_STORAGE_BUFFERS],

    pub viewport: Viewport,
    pub scissor: Rect,
    pub push_constants: Vec<u8>,

    dirty: DirtyFlags,
}

impl Default for BindingState {
    fn default() -> Self {
        Self {
            technique: Handle::INVALID,
            primitive: PrimitiveType::TriangleList,
            blend: Handle::INVALID,
            depth_stencil: Handle::INVALID,
            rasterizer: Handle::INVALID,
            target: TargetSignature::default(),
            vertex_streams: [Handle::INVALID; MAX_VERTEX_STREAMS],
            index_buffer: Handle::INVALID,
            constant_buffers: [Handle::INVALID; MAX_CONSTANT_BUFFERS],
            samplers: [Handle::INVALID; MAX_SAMPLERS],
            textures: [Handle::INVALID; MAX_TEXTURES],
            storage_images: [Handle::INVALID; MAX_STORAGE_IMAGES],
            storage_buffers: [Handle::INVALID; MAX_STORAGE_BUFFERS],
            viewport: Viewport::default(),
            scissor: Rect::default(),
            push_constants: Vec::new(),
            dirty: DirtyFlags::all(),
        }
    }
}

// setters
impl BindingState {
    pub fn set_technique(&mut self, technique: Handle<Technique>) {
        // layout 可能改变，descriptor 需要整体重建
        update(
            &mut self.technique,
            technique,
            &mut self.dirty,
            DirtyFlags::TECHNIQUE | DirtyFlags::DESCRIPTORS | DirtyFlags::PUSH_CONSTANTS,
        );
    }
    pub fn set_primitive(&mut self, primitive: PrimitiveType) {
        update(&mut self.primitive, primitive, &mut self.dirty, DirtyFlags::PRIMITIVE);
    }
    pub fn set_blend(&mut self, blend: Handle<BlendState>) {
        update(&mut self.blend, blend, &mut self.dirty, DirtyFlags::BLEND);
    }
    pub fn set_depth_stencil(&mut self, depth_stencil: Handle<DepthStencilState>) {
        update(&mut self.depth_stencil, depth_stencil, &mut self.dirty, DirtyFlags::DEPTH_STENCIL);
    }
    pub fn set_rasterizer(&mut self, rasterizer: Handle<RasterizerState>) {
        update(&mut self.rasterizer, rasterizer, &mut self.dirty, DirtyFlags::RASTERIZER);
    }
    pub fn set_target(&mut self, target: TargetSignature) {
        update(&mut self.target, target, &mut self.dirty, DirtyFlags::RENDER_TARGETS);
    }
    pub fn set_vertex_stream(&mut self, stream: usize, buffer: Handle<Buffer>) {
        update(&mut self.vertex_streams[stream], buffer, &mut self.dirty, DirtyFlags::VERTEX_STREAMS);
    }
    pub fn set_index_buffer(&mut self, buffer: Handle<Buffer>) {
        update(&mut self.index_buffer, buffer, &mut self.dirty, DirtyFlags::INDEX_BUFFER);
    }
    pub fn set_constant_buffer(&mut self, slot: usize, buffer: Handle<Buffer>) {
        update(&mut self.constant_buffers[slot], buffer, &mut self.dirty, DirtyFlags::CONSTANT_BUFFERS);
    }
    pub fn set_sampler(&mut self, slot: usize, sampler: Handle<Sampler>) {
        update(&mut self.samplers[slot], sampler, &mut self.dirty, DirtyFlags::SAMPLERS);
    }
    pub fn set_texture(&mut self, slot: usize, texture: Handle<Texture>) {
        update(&mut self.textures[slot], texture, &mut self.dirty, DirtyFlags::TEXTURES);
    }
    pub fn set_storage_image(&mut self, slot: usize, texture: Handle<Texture>) {
        update(&mut self.storage_images[slot], texture, &mut self.dirty, DirtyFlags::STORAGE_IMAGES);
    }
    pub fn set_storage_buffer(&mut self, slot: usize, buffer: Handle<Buffer>) {
        update(&mut self.storage_buffers[slot], buffer, &mut self.dirty, DirtyFlags::STORAGE_BUFFERS);
    }
    pub fn set_viewport(&mut self, viewport: Viewport) {
        update(&mut self.viewport, viewport, &mut self.dirty, DirtyFlags::VIEWPORT);
    }
    pub fn set_scissor(&mut self, scissor: Rect) {
        update(&mut self.scissor, scissor, &mut self.dirty, DirtyFlags::SCISSOR);
    }
    pub fn set_push_constants(&mut self, data: &[u8]) {
        if self.push_constants != data {
            self.push_constants.clear();
            self.push_constants.extend_from_slice(data);
            self.dirty |= DirtyFlags::PUSH_CONSTANTS;
        }
    }
}

// dirty bits
impl BindingState {
    #[inline]
    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    #[inline]
    pub fn mark(&mut self, flags: DirtyFlags) {
        self.dirty |= flags;
    }

    /// 取出 `flags` 中为 dirty 的部分并清除
    #[inline]
    pub fn take(&mut self, flags: DirtyFlags) -> DirtyFlags {
        let taken = self.dirty & flags;
        self.dirty -= taken;
        taken
    }

    /// 新的 command buffer 中没有任何绑定，所有状态都需要重新应用
    #[inline]
    pub fn invalidate(&mut self) {
        self.dirty = DirtyFlags::all();
    }

    /// 清空所有的绑定，用于 context 的复用
    pub fn reset(&mut self) {
        let mut push_constants = std::mem::take(&mut self.push_constants);
        push_constants.clear();
        *self = Self {
            push_constants,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_value_does_not_dirty() {
        let mut state = BindingState::default();
        state.take(DirtyFlags::all());

        state.set_primitive(PrimitiveType::TriangleList);
        state.set_texture(0, Handle::INVALID);
        assert_eq!(state.dirty(), DirtyFlags::empty());

        state.set_texture(0, Handle::from_index(4));
        assert_eq!(state.dirty(), DirtyFlags::TEXTURES);
        state.set_blend(Handle::from_index(1));
        assert!(state.dirty().intersects(DirtyFlags::PIPELINE));
    }

    #[test]
    fn test_take_clears_only_requested_bits() {
        let mut state = BindingState::default();
        state.take(DirtyFlags::all());
        state.set_technique(Handle::from_index(1));
        state.set_vertex_stream(0, Handle::from_index(2));

        let pipeline = state.take(DirtyFlags::PIPELINE);
        assert_eq!(pipeline, DirtyFlags::TECHNIQUE);
        assert!(state.dirty().contains(DirtyFlags::VERTEX_STREAMS | DirtyFlags::CONSTANT_BUFFERS));
        assert!(!state.dirty().intersects(DirtyFlags::PIPELINE));
    }

    #[test]
    fn test_phase_transition_table() {
        let mut phase = ContextPhase::Idle;
        for event in [
            ContextEvent::Begin,
            ContextEvent::BeginRenderPass,
            ContextEvent::EndRenderPass,
            ContextEvent::Split,
            ContextEvent::Submit,
            ContextEvent::Recycle,
        ] {
            phase = phase.next(event).unwrap();
        }
        assert_eq!(phase, ContextPhase::Idle);

        assert_eq!(ContextPhase::Idle.next(ContextEvent::BeginRenderPass), None);
        assert_eq!(ContextPhase::RenderPass.next(ContextEvent::Submit), None);
        assert_eq!(ContextPhase::RenderPass.next(ContextEvent::Split), None);
        assert_eq!(ContextPhase::Submitted.next(ContextEvent::Begin), None);
    }
}
