use bitflags::bitflags;

use crate::backend::{BarrierBatch, BufferTransition, ImageTransition, NativeCommandBuffer, RhiBackend};

bitflags! {
    /// 与具体 API 无关的 pipeline stage
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP                  = 1 << 0;
        const DRAW_INDIRECT        = 1 << 1;
        const VERTEX_INPUT         = 1 << 2;
        const VERTEX_SHADER        = 1 << 3;
        const GEOMETRY_SHADER      = 1 << 4;
        const FRAGMENT_SHADER      = 1 << 5;
        const EARLY_FRAGMENT_TESTS = 1 << 6;
        const LATE_FRAGMENT_TESTS  = 1 << 7;
        const COLOR_OUTPUT         = 1 << 8;
        const COMPUTE_SHADER       = 1 << 9;
        const TRANSFER             = 1 << 10;
        const BOTTOM               = 1 << 11;
        const ALL_COMMANDS         = 1 << 12;
    }
}

/// 资源的逻辑状态，记录在资源自身上
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    #[default]
    Undefined,
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthWrite,
    DepthRead,
    CopySrc,
    CopyDst,
    Present,
    IndirectArgument,
}

impl ResourceState {
    /// 处于该状态时会访问资源的 stage
    pub fn stages(self) -> PipelineStages {
        type S = PipelineStages;
        match self {
            ResourceState::Undefined => S::TOP,
            ResourceState::VertexBuffer | ResourceState::IndexBuffer => S::VERTEX_INPUT,
            ResourceState::ConstantBuffer | ResourceState::ShaderResource => {
                S::VERTEX_SHADER | S::GEOMETRY_SHADER | S::FRAGMENT_SHADER | S::COMPUTE_SHADER
            }
            ResourceState::UnorderedAccess => S::FRAGMENT_SHADER | S::COMPUTE_SHADER,
            ResourceState::RenderTarget => S::COLOR_OUTPUT,
            ResourceState::DepthWrite | ResourceState::DepthRead => S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            ResourceState::CopySrc | ResourceState::CopyDst => S::TRANSFER,
            ResourceState::Present => S::BOTTOM,
            ResourceState::IndirectArgument => S::DRAW_INDIRECT,
        }
    }

    #[inline]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ResourceState::UnorderedAccess
                | ResourceState::RenderTarget
                | ResourceState::DepthWrite
                | ResourceState::CopyDst
        )
    }
}

/// 更新资源上记录的状态，需要 barrier 时返回之前的状态
///
/// 状态相同的请求是空操作，除非 `force`（例如两次 UAV 写之间的 barrier）。
#[inline]
pub fn request_transition(current: &mut ResourceState, target: ResourceState, force: bool) -> Option<ResourceState> {
    if *current == target && !force {
        return None;
    }
    Some(std::mem::replace(current, target))
}

/// 尚未提交的 barrier
///
/// 所有 transition 的 stage 取并集，在 render pass 开始、draw、dispatch
/// 或者显式 flush 之前作为一次 pipeline barrier 提交。
///
/// 目前的 image barrier 总是覆盖整张 image（所有 mip 与 layer），即使调用者只关心其中一部分。
#[derive(Default)]
pub struct PendingBarriers {
    src_stages: PipelineStages,
    dst_stages: PipelineStages,
    buffers: Vec<BufferTransition>,
    images: Vec<ImageTransition>,
}

impl PendingBarriers {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    pub fn push_buffer(&mut self, transition: BufferTransition) {
        self.src_stages |= transition.before.stages();
        self.dst_stages |= transition.after.stages();

        // 同一批次中对同一个资源的多次转换合并为一次
        match self.buffers.iter_mut().find(|t| t.buffer == transition.buffer) {
            Some(pending) => pending.after = transition.after,
            None => self.buffers.push(transition),
        }
    }

    pub fn push_image(&mut self, transition: ImageTransition) {
        self.src_stages |= transition.before.stages();
        self.dst_stages |= transition.after.stages();

        match self.images.iter_mut().find(|t| t.image == transition.image) {
            Some(pending) => pending.after = transition.after,
            None => self.images.push(transition),
        }
    }

    /// 作为一次 barrier 提交，返回其中 transition 的数量
    pub fn flush(&mut self, backend: &mut dyn RhiBackend, cmd: NativeCommandBuffer) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let _span = tracy_client::span!("PendingBarriers::flush");

        let count = self.len();
        backend.cmd_pipeline_barrier(
            cmd,
            &BarrierBatch {
                src_stages: self.src_stages,
                dst_stages: self.dst_stages,
                buffers: &self.buffers,
                images: &self.images,
            },
        );
        self.clear();
        Some(count)
    }

    pub fn clear(&mut self) {
        self.src_stages = PipelineStages::empty();
        self.dst_stages = PipelineStages::empty();
        self.buffers.clear();
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NativeBuffer, NativeImage};
    use crate::desc::Format;

    fn image_transition(raw: u64, before: ResourceState, after: ResourceState) -> ImageTransition {
        ImageTransition {
            image: NativeImage::from_raw(raw),
            format: Format::Rgba8Unorm,
            mip_count: 1,
            layer_count: 1,
            before,
            after,
        }
    }

    #[test]
    fn test_same_state_is_noop_unless_forced() {
        let mut state = ResourceState::ShaderResource;
        assert_eq!(request_transition(&mut state, ResourceState::ShaderResource, false), None);
        assert_eq!(
            request_transition(&mut state, ResourceState::UnorderedAccess, false),
            Some(ResourceState::ShaderResource)
        );
        assert_eq!(
            request_transition(&mut state, ResourceState::UnorderedAccess, true),
            Some(ResourceState::UnorderedAccess)
        );
        assert_eq!(state, ResourceState::UnorderedAccess);
    }

    #[test]
    fn test_stages_are_unioned() {
        let mut pending = PendingBarriers::default();
        pending.push_image(image_transition(1, ResourceState::Undefined, ResourceState::RenderTarget));
        pending.push_buffer(BufferTransition {
            buffer: NativeBuffer::from_raw(2),
            before: ResourceState::CopyDst,
            after: ResourceState::VertexBuffer,
        });
        assert_eq!(pending.src_stages, PipelineStages::TOP | PipelineStages::TRANSFER);
        assert_eq!(pending.dst_stages, PipelineStages::COLOR_OUTPUT | PipelineStages::VERTEX_INPUT);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_repeated_transition_is_merged() {
        let mut pending = PendingBarriers::default();
        pending.push_image(image_transition(1, ResourceState::Undefined, ResourceState::CopyDst));
        pending.push_image(image_transition(1, ResourceState::CopyDst, ResourceState::ShaderResource));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.images[0].before, ResourceState::Undefined);
        assert_eq!(pending.images[0].after, ResourceState::ShaderResource);
    }
}
