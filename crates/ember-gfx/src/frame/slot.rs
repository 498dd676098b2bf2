use crate::backend::memory::MemoryClass;
use crate::backend::{NativeCommandBuffer, NativeFence, NativeQueryPool, NativeSemaphore, RhiBackend};
use crate::commands::descriptor::DescriptorSetCache;
use crate::config::DeviceConfig;
use crate::desc::QueueKind;
use crate::error::GfxResult;
use crate::frame::allocator::FrameAllocator;
use crate::frame::destroy_queue::DestroyQueue;
use crate::stats::TimerResult;

/// 一个 GPU timer，只在创建它的那一帧有效
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuTimer(u32);

struct TimerEntry {
    name: String,
    ended: bool,
}

/// slot 被复用时回收得到的信息
#[derive(Default)]
pub struct RetiredSlot {
    pub destroyed: usize,
    pub recycled: Vec<(QueueKind, NativeCommandBuffer)>,
    pub timers: Vec<TimerResult>,
}

/// 一个 frame in flight 所拥有的资源
///
/// slot 按照帧序号轮流使用，只有在 [`FrameSlot::retire`] 等待过 fence 之后，
/// 其中的 allocator、descriptor set 与延迟销毁队列才可以被回收。
pub struct FrameSlot {
    index: usize,

    /// 本帧最后一次提交会 signal 这个 fence
    fence: NativeFence,
    /// fence 是否还对应着未等待的提交
    in_flight: bool,
    /// 本 slot 最后一次使用时的帧序号
    frame_id: u64,

    acquire_semaphore: NativeSemaphore,
    render_finished_semaphore: NativeSemaphore,
    /// context 之间依赖所使用的临时 semaphore
    free_semaphores: Vec<NativeSemaphore>,
    used_semaphores: Vec<NativeSemaphore>,

    allocators: [FrameAllocator; 4],
    descriptors: DescriptorSetCache,

    query_pool: NativeQueryPool,
    max_timers: u32,
    timers: Vec<TimerEntry>,

    destroy_queue: DestroyQueue,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl FrameSlot {
    pub fn new(backend: &mut dyn RhiBackend, index: usize, config: &DeviceConfig) -> GfxResult<Self> {
        let fence = backend.create_fence(false)?;
        let acquire_semaphore = backend.create_semaphore()?;
        let render_finished_semaphore = backend.create_semaphore()?;

        let query_count = config.max_timers_per_frame * 2;
        let query_pool = backend.create_query_pool(query_count)?;
        backend.reset_query_pool(query_pool, 0, query_count);

        let block_size = |class: MemoryClass| config.block_size(class);
        Ok(Self {
            index,
            fence,
            in_flight: false,
            frame_id: 0,
            acquire_semaphore,
            render_finished_semaphore,
            free_semaphores: Vec::new(),
            used_semaphores: Vec::new(),
            allocators: MemoryClass::ALL.map(|class| FrameAllocator::new(class, block_size(class))),
            descriptors: DescriptorSetCache::new(config.descriptor_sets_per_pool, config.descriptor_sets_per_batch),
            query_pool,
            max_timers: config.max_timers_per_frame,
            timers: Vec::new(),
            destroy_queue: DestroyQueue::default(),

            #[cfg(debug_assertions)]
            destroyed: false,
        })
    }
}

// getters
impl FrameSlot {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
    #[inline]
    pub fn fence(&self) -> NativeFence {
        self.fence
    }
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn acquire_semaphore(&self) -> NativeSemaphore {
        self.acquire_semaphore
    }
    #[inline]
    pub fn render_finished_semaphore(&self) -> NativeSemaphore {
        self.render_finished_semaphore
    }
    #[inline]
    pub fn allocator(&mut self, class: MemoryClass) -> &mut FrameAllocator {
        &mut self.allocators[class.index()]
    }
    #[inline]
    pub fn descriptors(&mut self) -> &mut DescriptorSetCache {
        &mut self.descriptors
    }
    #[inline]
    pub fn destroy_queue(&mut self) -> &mut DestroyQueue {
        &mut self.destroy_queue
    }
    #[inline]
    pub fn query_pool(&self) -> NativeQueryPool {
        self.query_pool
    }
    pub fn allocator_blocks(&self) -> usize {
        self.allocators.iter().map(FrameAllocator::block_count).sum()
    }
    /// 所有 allocator 累计创建过的 block 数量
    pub fn blocks_created(&self) -> u32 {
        self.allocators.iter().map(FrameAllocator::blocks_created).sum()
    }
}

// frame 生命周期
impl FrameSlot {
    /// 开始新的一帧：等待 fence，然后回收所有的帧内资源
    pub fn retire(&mut self, backend: &mut dyn RhiBackend, timestamp_period_ns: f32) -> GfxResult<RetiredSlot> {
        let _span = tracy_client::span!("FrameSlot::retire");

        if self.in_flight {
            backend.wait_fence(self.fence)?;
            backend.reset_fence(self.fence)?;
            self.in_flight = false;
        }

        let mut retired = RetiredSlot::default();
        retired.destroyed = self.destroy_queue.flush(backend, &mut retired.recycled);
        retired.timers = self.read_timers(backend, timestamp_period_ns)?;

        self.free_semaphores.append(&mut self.used_semaphores);
        self.allocators.iter_mut().for_each(FrameAllocator::reset);
        self.descriptors.reset(backend);

        Ok(retired)
    }

    /// 标记本 slot 开始被第 `frame_id` 帧使用
    #[inline]
    pub fn begin(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
    }

    /// 本帧最后的提交已经 signal 了 fence
    #[inline]
    pub fn mark_in_flight(&mut self) {
        self.in_flight = true;
    }

    /// 取一个本帧使用的 binary semaphore
    pub fn temp_semaphore(&mut self, backend: &mut dyn RhiBackend) -> GfxResult<NativeSemaphore> {
        let semaphore = match self.free_semaphores.pop() {
            Some(semaphore) => semaphore,
            None => backend.create_semaphore()?,
        };
        self.used_semaphores.push(semaphore);
        Ok(semaphore)
    }

    /// 重建 swapchain 之后，acquire semaphore 可能处于未知状态，需要替换
    pub fn replace_acquire_semaphore(&mut self, backend: &mut dyn RhiBackend) -> GfxResult<()> {
        let semaphore = backend.create_semaphore()?;
        backend.destroy_semaphore(std::mem::replace(&mut self.acquire_semaphore, semaphore));
        Ok(())
    }
}

// timers
impl FrameSlot {
    /// 分配一对 timestamp query，超过上限时返回 None
    pub fn alloc_timer(&mut self, name: &str) -> Option<(GpuTimer, u32)> {
        let index = self.timers.len() as u32;
        if index >= self.max_timers {
            return None;
        }
        self.timers.push(TimerEntry {
            name: name.to_string(),
            ended: false,
        });
        Some((GpuTimer(index), index * 2))
    }

    /// 结束 timer，返回需要写入的 query 下标
    pub fn finish_timer(&mut self, timer: GpuTimer) -> u32 {
        let entry = &mut self.timers[timer.0 as usize];
        debug_assert!(!entry.ended, "timer `{}` ended twice", entry.name);
        entry.ended = true;
        timer.0 * 2 + 1
    }

    fn read_timers(&mut self, backend: &mut dyn RhiBackend, period_ns: f32) -> GfxResult<Vec<TimerResult>> {
        if self.timers.is_empty() {
            return Ok(Vec::new());
        }

        let query_count = self.timers.len() as u32 * 2;
        let mut ticks = vec![0u64; query_count as usize];
        backend.query_timestamps(self.query_pool, 0, &mut ticks)?;
        backend.reset_query_pool(self.query_pool, 0, query_count);

        let results = self
            .timers
            .drain(..)
            .zip(ticks.chunks_exact(2))
            .filter(|(entry, _)| entry.ended)
            .map(|(entry, pair)| TimerResult {
                name: entry.name,
                milliseconds: pair[1].saturating_sub(pair[0]) as f64 * period_ns as f64 / 1_000_000.0,
            })
            .collect();
        Ok(results)
    }
}

// destroy
impl FrameSlot {
    pub fn destroy(&mut self, backend: &mut dyn RhiBackend) {
        let mut recycled = Vec::new();
        self.destroy_queue.flush(backend, &mut recycled);
        recycled.into_iter().for_each(|(_, cmd)| backend.destroy_command_buffer(cmd));

        self.allocators.iter_mut().for_each(|a| a.release_blocks(backend));
        self.descriptors.destroy(backend);
        backend.destroy_query_pool(self.query_pool);

        for semaphore in self.free_semaphores.drain(..).chain(self.used_semaphores.drain(..)) {
            backend.destroy_semaphore(semaphore);
        }
        backend.destroy_semaphore(self.acquire_semaphore);
        backend.destroy_semaphore(self.render_finished_semaphore);
        backend.destroy_fence(self.fence);

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(self.destroyed || std::thread::panicking(), "FrameSlot {} dropped without destroy", self.index);
        }
    }
}
