use crate::backend::SubmitDesc;
use crate::commands::barrier::PipelineStages;
use crate::commands::context::{CommandContext, Recorder};
use crate::commands::state::ContextEvent;
use crate::commands::SubmitToken;
use crate::desc::QueueKind;
use crate::device::{ContextHandle, Device};
use crate::error::GfxResultExt;

// command context
impl Device {
    /// 在 `queue` 上开始录制一个新的 context
    ///
    /// 同一个队列上同时只能有一个 context 处于录制中。
    pub fn begin_context(&mut self, queue: QueueKind) -> ContextHandle {
        let _span = tracy_client::span!("Device::begin_context");
        debug_assert!(
            !self.contexts.iter().any(|c| c.queue() == queue && c.phase().is_recording()),
            "a {queue:?} context is already recording"
        );
        self.prepare_slot();

        let index = match self.free_contexts.iter().position(|&i| self.contexts[i].queue() == queue) {
            Some(pos) => self.free_contexts.swap_remove(pos),
            None => {
                log::debug!("create {queue:?} context #{}", self.contexts.len());
                self.contexts.push(CommandContext::new(queue));
                self.contexts.len() - 1
            }
        };

        let mut shared = gfx_shared!(self);
        self.contexts[index].begin(&mut shared);
        ContextHandle(index)
    }

    /// 借用 context 录制命令
    pub fn record(&mut self, ctx: ContextHandle) -> Recorder<'_> {
        debug_assert!(self.contexts[ctx.0].phase().is_recording(), "{ctx:?} is not recording");
        Recorder {
            context: &mut self.contexts[ctx.0],
            shared: gfx_shared!(self),
        }
    }

    /// 提交 context，之后句柄失效
    pub fn submit(&mut self, ctx: ContextHandle) -> SubmitToken {
        let token = self.submit_context(ctx, ContextEvent::Submit);
        self.contexts[ctx.0].recycle();
        self.free_contexts.push(ctx.0);
        token
    }

    /// 提交目前为止录制的命令，context 在新的 command buffer 上继续录制，绑定状态保留
    pub fn split(&mut self, ctx: ContextHandle) -> SubmitToken {
        let token = self.submit_context(ctx, ContextEvent::Split);
        let mut shared = gfx_shared!(self);
        self.contexts[ctx.0].restart(&mut shared);
        token
    }

    /// `ctx` 的下一次提交在 `stages` 等待 `token` 对应的提交完成
    pub fn add_dependency(&mut self, ctx: ContextHandle, token: SubmitToken, stages: PipelineStages) {
        debug_assert_eq!(
            token.frame_id,
            self.frame_counter.frame_id(),
            "submit tokens cannot cross frames"
        );
        let Some(pos) = self.unconsumed_tokens.iter().position(|s| *s == token.semaphore) else {
            debug_assert!(false, "{token:?} has already been consumed");
            return;
        };
        self.unconsumed_tokens.swap_remove(pos);
        self.contexts[ctx.0].add_wait(token.semaphore, stages);
    }

    fn submit_context(&mut self, ctx: ContextHandle, event: ContextEvent) -> SubmitToken {
        let _span = tracy_client::span!("Device::submit");

        // 上传先于任何依赖它的提交
        let mut shared = gfx_shared!(self);
        let upload = self.upload.flush(&mut shared);

        let context = &mut self.contexts[ctx.0];
        let cmd = context.end(&mut shared, event);
        let mut waits = context.take_waits();
        if let Some(semaphore) = upload {
            waits.push((semaphore, PipelineStages::ALL_COMMANDS));
        }
        if context.uses_backbuffer() && self.swapchain.acquire_pending {
            waits.push((shared.slot.acquire_semaphore(), PipelineStages::ALL_COMMANDS));
            self.swapchain.acquire_pending = false;
        }

        let signal = shared.slot.temp_semaphore(shared.backend).or_fatal("creating a semaphore");
        shared
            .backend
            .submit(
                context.queue(),
                &SubmitDesc {
                    command_buffers: &[cmd],
                    waits: &waits,
                    signals: &[signal],
                    fence: None,
                },
            )
            .or_fatal("submitting a context");
        shared.slot.destroy_queue().enqueue_context(context.queue(), cmd);
        shared.stats.submits += 1;

        self.unconsumed_tokens.push(signal);
        SubmitToken {
            semaphore: signal,
            frame_id: shared.frame_id,
        }
    }
}
