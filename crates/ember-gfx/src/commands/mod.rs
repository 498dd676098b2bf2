//! 命令录制
//!
//! - [`state`]：绑定状态与 dirty 位
//! - [`barrier`]：资源状态与 barrier 的批处理
//! - [`descriptor`]：帧内的 descriptor set 分配
//! - [`context`]：command context，draw / dispatch 之前的 `apply_state`
//! - [`upload`]：数据上传与 transient buffer 的 rename

pub mod barrier;
pub mod context;
pub mod descriptor;
pub mod state;
pub mod upload;

use crate::backend::{NativeCommandBuffer, NativeSemaphore, RhiBackend};
use crate::desc::QueueKind;
use crate::device::resources::{Caches, Resources};
use crate::error::GfxResult;
use crate::frame::slot::FrameSlot;
use crate::stats::{DeviceCaps, FrameStats};

/// 录制命令时需要访问的 device 状态
///
/// 由 device 按字段拆分借用得到，使得 context 与 device 的其他部分可以同时被修改。
pub struct GfxShared<'a> {
    pub backend: &'a mut dyn RhiBackend,
    pub resources: &'a mut Resources,
    pub caches: &'a mut Caches,
    /// 当前帧的 slot
    pub slot: &'a mut FrameSlot,
    pub stats: &'a mut FrameStats,
    pub command_buffers: &'a mut CommandBufferPool,
    pub caps: &'a DeviceCaps,
    pub frame_id: u64,
}

/// 一次提交的结果，其他 context 可以通过 `add_dependency` 等待它
///
/// token 只在提交它的那一帧内有效，且只能被消费一次。
#[derive(Debug, PartialEq, Eq)]
pub struct SubmitToken {
    pub(crate) semaphore: NativeSemaphore,
    pub(crate) frame_id: u64,
}

impl SubmitToken {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
}

/// 按队列回收的 command buffer
///
/// 提交过的 command buffer 进入 slot 的延迟销毁队列，slot 被复用时回到这里。
#[derive(Default)]
pub struct CommandBufferPool {
    free: [Vec<NativeCommandBuffer>; QueueKind::COUNT],
    created: u32,
}

impl CommandBufferPool {
    pub fn acquire(&mut self, backend: &mut dyn RhiBackend, queue: QueueKind) -> GfxResult<NativeCommandBuffer> {
        if let Some(cmd) = self.free[queue.index()].pop() {
            return Ok(cmd);
        }
        let cmd = backend.create_command_buffer(queue)?;
        self.created += 1;
        log::debug!("create {queue:?} command buffer #{}", self.created);
        Ok(cmd)
    }

    #[inline]
    pub fn recycle(&mut self, queue: QueueKind, cmd: NativeCommandBuffer) {
        self.free[queue.index()].push(cmd);
    }

    /// 累计创建过的 command buffer 数量
    #[inline]
    pub fn created(&self) -> u32 {
        self.created
    }

    pub fn destroy(&mut self, backend: &mut dyn RhiBackend) {
        for list in &mut self.free {
            list.drain(..).for_each(|cmd| backend.destroy_command_buffer(cmd));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig};

    #[test]
    fn test_recycled_command_buffers_stay_on_their_queue() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let mut pool = CommandBufferPool::default();

        let graphics = pool.acquire(&mut backend, QueueKind::Graphics).unwrap();
        pool.recycle(QueueKind::Graphics, graphics);

        let compute = pool.acquire(&mut backend, QueueKind::Compute).unwrap();
        assert_ne!(compute, graphics);
        assert_eq!(pool.acquire(&mut backend, QueueKind::Graphics).unwrap(), graphics);
        assert_eq!(pool.created(), 2);

        pool.recycle(QueueKind::Graphics, graphics);
        pool.recycle(QueueKind::Compute, compute);
        pool.destroy(&mut backend);
        assert!(backend.probe().violations().is_empty());
    }
}
