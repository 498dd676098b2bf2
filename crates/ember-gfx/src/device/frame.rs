use crate::backend::{AcquireResult, NativeSemaphore, PresentResult, SubmitDesc};
use crate::commands::barrier::{PendingBarriers, PipelineStages, ResourceState};
use crate::commands::context::request_texture_state;
use crate::desc::QueueKind;
use crate::device::Device;
use crate::error::{GfxError, GfxResult, GfxResultExt};
use crate::frame::destroy_queue::DestroyQueue;

// frame 生命周期
impl Device {
    /// 开始新的一帧
    ///
    /// 1. 等待当前 slot 上一次使用时的 fence，回收其中的内存、descriptor 与延迟销毁的对象
    /// 2. 需要时重建 swapchain
    /// 3. acquire 下一张 swapchain image
    pub fn begin_frame(&mut self) {
        let _span = tracy_client::span!("Device::begin_frame");
        debug_assert!(!self.in_frame, "begin_frame called twice without end_frame");

        self.prepare_slot();
        if self.swapchain.dirty {
            self.rebuild_swapchain();
        }
        self.acquire_backbuffer().or_fatal("acquiring a swapchain image");
        self.in_frame = true;

        log::trace!("{} begin", self.frame_counter.frame_name());
    }

    /// 结束当前帧：提交上传与收尾的 command buffer，present，然后推进帧序号
    ///
    /// 所有 context 都必须已经提交。
    pub fn end_frame(&mut self) {
        let _span = tracy_client::span!("Device::end_frame");
        debug_assert!(self.in_frame, "end_frame without begin_frame");
        debug_assert!(
            self.contexts.iter().all(|c| !c.phase().is_recording()),
            "every context must be submitted before end_frame"
        );

        self.collect_released();

        let mut shared = gfx_shared!(self);
        if let Some(semaphore) = self.upload.flush(&mut shared) {
            self.unconsumed_tokens.push(semaphore);
        }

        // 收尾的提交：backbuffer 转换到 present，等待本帧所有未被等待的提交，signal fence
        let cmd = shared
            .command_buffers
            .acquire(shared.backend, QueueKind::Graphics)
            .or_fatal("acquiring the final command buffer");
        shared.backend.begin_command_buffer(cmd).or_fatal("beginning the final command buffer");
        if let Some(index) = self.swapchain.current {
            let backbuffer = self.swapchain.backbuffers[index as usize].handle();
            let mut barriers = PendingBarriers::default();
            request_texture_state(&mut barriers, shared.resources, backbuffer, ResourceState::Present, false);
            if let Some(transitions) = barriers.flush(shared.backend, cmd) {
                shared.stats.barrier_batches += 1;
                shared.stats.barrier_transitions += transitions as u32;
            }
        }
        shared.backend.end_command_buffer(cmd).or_fatal("ending the final command buffer");

        let mut waits: Vec<_> = self
            .unconsumed_tokens
            .drain(..)
            .map(|semaphore| (semaphore, PipelineStages::ALL_COMMANDS))
            .collect();
        if self.swapchain.acquire_pending {
            waits.push((shared.slot.acquire_semaphore(), PipelineStages::COLOR_OUTPUT));
            self.swapchain.acquire_pending = false;
        }
        let render_finished = [shared.slot.render_finished_semaphore()];
        let signals: &[_] = if self.swapchain.current.is_some() { &render_finished } else { &[] };
        shared
            .backend
            .submit(
                QueueKind::Graphics,
                &SubmitDesc {
                    command_buffers: &[cmd],
                    waits: &waits,
                    signals,
                    fence: Some(shared.slot.fence()),
                },
            )
            .or_fatal("submitting the final command buffer");
        shared.slot.mark_in_flight();
        shared.slot.destroy_queue().enqueue_context(QueueKind::Graphics, cmd);
        shared.stats.submits += 1;

        if let Some(index) = self.swapchain.current.take() {
            self.present(index, render_finished[0]);
        }

        self.finish_frame_stats();
        log::trace!("{} end", self.frame_counter.frame_name());

        self.frame_counter.next_frame();
        self.slot_ready = false;
        self.in_frame = false;
    }

    fn present(&mut self, index: u32, wait: NativeSemaphore) {
        let _span = tracy_client::span!("Device::present");
        match self.backend.present(index, wait).or_fatal("presenting") {
            PresentResult::Presented => {}
            PresentResult::Suboptimal => {
                log::info!("swapchain is suboptimal, rebuild in the next frame");
                self.swapchain.dirty = true;
            }
            PresentResult::OutOfDate => {
                log::warn!("swapchain is out of date, rebuild in the next frame");
                self.swapchain.dirty = true;
            }
        }
    }

    fn finish_frame_stats(&mut self) {
        let blocks_created: u32 = self.frame_slots.iter().map(|slot| slot.blocks_created()).sum();
        self.frame_stats.allocator_blocks_created = blocks_created - self.blocks_created;
        self.blocks_created = blocks_created;

        self.last_frame_stats = self.frame_stats;
        self.total_stats += self.frame_stats;
        self.frame_stats = Default::default();
    }
}

// swapchain
impl Device {
    /// 修改 present interval，在下一帧开始时重建 swapchain
    pub fn set_present_interval(&mut self, interval: u32) {
        if self.swapchain.present_interval != interval {
            self.swapchain.present_interval = interval;
            self.swapchain.dirty = true;
        }
    }

    /// 窗口尺寸改变之后调用，在下一帧开始时重建 swapchain
    #[inline]
    pub fn invalidate_swapchain(&mut self) {
        self.swapchain.dirty = true;
    }

    #[inline]
    pub fn swapchain_dirty(&self) -> bool {
        self.swapchain.dirty
    }

    fn acquire_backbuffer(&mut self) -> GfxResult<()> {
        // out of date 时重建一次再试
        for _ in 0..2 {
            let semaphore = self.frame_slots[self.frame_counter.slot_index()].acquire_semaphore();
            match self.backend.acquire_next_image(semaphore)? {
                AcquireResult::Acquired { index, suboptimal } => {
                    if suboptimal {
                        log::info!("acquired a suboptimal swapchain image, rebuild in the next frame");
                        self.swapchain.dirty = true;
                    }
                    self.swapchain.current = Some(index);
                    self.swapchain.acquire_pending = true;

                    // swapchain image 的内容不需要保留
                    let handle = self.swapchain.backbuffers[index as usize].handle();
                    self.resources.textures[handle].state = ResourceState::Undefined;
                    return Ok(());
                }
                AcquireResult::OutOfDate => {
                    log::warn!("swapchain is out of date on acquire, rebuild");
                    self.rebuild_swapchain();
                }
            }
        }
        Err(GfxError::Swapchain("still out of date after rebuilding".to_string()))
    }

    /// 等待设备空闲，销毁旧的 backbuffer 并注册新的 swapchain image
    fn rebuild_swapchain(&mut self) {
        let _span = tracy_client::span!("Device::rebuild_swapchain");
        self.backend.wait_idle().or_fatal("waiting for the device before rebuilding the swapchain");

        // 设备已经空闲，旧的 view 与引用它们的 framebuffer 可以立即销毁
        self.swapchain.backbuffers.clear();
        let mut queue = DestroyQueue::default();
        self.resources.drain_released(&self.tracker, &mut self.caches, &mut queue);
        let mut recycled = Vec::new();
        queue.flush(self.backend.as_mut(), &mut recycled);
        debug_assert!(recycled.is_empty());

        self.backend
            .recreate_swapchain(self.swapchain.present_interval)
            .or_fatal("recreating the swapchain");
        self.register_backbuffers().or_fatal("registering swapchain images");
        for slot in &mut self.frame_slots {
            slot.replace_acquire_semaphore(self.backend.as_mut())
                .or_fatal("replacing an acquire semaphore");
        }

        self.swapchain.dirty = false;
        log::info!(
            "swapchain rebuilt: {}x{} {:?}, {} images",
            self.swapchain.width,
            self.swapchain.height,
            self.swapchain.format,
            self.swapchain.backbuffers.len()
        );
    }
}
