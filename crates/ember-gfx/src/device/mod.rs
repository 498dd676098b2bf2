//! 设备：资源的创建与释放、帧的生命周期以及 command context 的提交
//!
//! 所有的状态都属于 [`Device`]，通过 `&mut self` 访问，只能在一个线程中使用。
//! 录制命令时按字段拆分借用，得到 [`crate::commands::GfxShared`]。

pub mod resources;

use std::rc::Rc;

use crate::backend::{ImageCreateInfo, NativeMemory, NativeSemaphore, RhiBackend};
use crate::commands::barrier::ResourceState;
use crate::commands::context::CommandContext;
use crate::commands::upload::UploadContext;
use crate::commands::CommandBufferPool;
use crate::config::DeviceConfig;
use crate::desc::{Format, TextureDesc, TextureUsage};
use crate::error::{GfxResult, GfxResultExt};
use crate::frame::counter::FrameCounter;
use crate::frame::destroy_queue::DestroyQueue;
use crate::frame::slot::FrameSlot;
use crate::handles::{Handle, Own, Ref, RefTracker, ResourceType, Texture};
use crate::stats::{DeviceCaps, FrameStats, TimerResult};
use resources::{Caches, Resources, TextureRecord};

/// 按字段拆分借用 device，得到录制命令所需的状态
macro_rules! gfx_shared {
    ($device:ident) => {
        $crate::commands::GfxShared {
            backend: $device.backend.as_mut(),
            resources: &mut $device.resources,
            caches: &mut $device.caches,
            slot: &mut $device.frame_slots[$device.frame_counter.slot_index()],
            stats: &mut $device.frame_stats,
            command_buffers: &mut $device.command_buffers,
            caps: &$device.caps,
            frame_id: $device.frame_counter.frame_id(),
        }
    };
}

mod create;
mod frame;
mod record;
#[cfg(test)]
mod tests;

/// [`Device::begin_context`] 返回的 context 句柄，提交之后失效
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextHandle(usize);

struct SwapchainState {
    backbuffers: Vec<Own<Texture>>,
    format: Format,
    width: u32,
    height: u32,

    /// 本帧 acquire 到的 image
    current: Option<u32>,
    /// acquire semaphore 已经 signal，但还没有任何提交等待它
    acquire_pending: bool,
    /// 需要在下一帧开始时重建
    dirty: bool,
    present_interval: u32,
}

pub struct Device {
    backend: Box<dyn RhiBackend>,
    config: DeviceConfig,
    caps: DeviceCaps,

    tracker: Rc<RefTracker>,
    resources: Resources,
    caches: Caches,

    frame_slots: Vec<FrameSlot>,
    frame_counter: FrameCounter,
    /// 当前 slot 是否已经 retire 过，可以在其中分配
    slot_ready: bool,
    in_frame: bool,

    command_buffers: CommandBufferPool,
    contexts: Vec<CommandContext>,
    free_contexts: Vec<usize>,
    upload: UploadContext,

    swapchain: SwapchainState,
    /// 本帧提交 signal 的、还没有被任何提交等待的 semaphore
    unconsumed_tokens: Vec<NativeSemaphore>,

    frame_stats: FrameStats,
    last_frame_stats: FrameStats,
    total_stats: FrameStats,
    blocks_created: u32,
    timer_results: Vec<TimerResult>,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl Device {
    /// 在给定的 backend 上创建 device，backend 已经创建好了 swapchain（或者模拟的 swapchain）
    pub fn new(mut backend: Box<dyn RhiBackend>, config: DeviceConfig) -> GfxResult<Self> {
        let _span = tracy_client::span!("Device::new");
        config.validate()?;

        let caps = backend.caps();
        log::info!("create device on {} ({})", caps.device_name, caps.api_name);

        let image_count = backend.swapchain_info().images.len();
        let fif_count = config.resolve_frames_in_flight(image_count);
        let mut frame_slots = Vec::with_capacity(fif_count);
        for index in 0..fif_count {
            match FrameSlot::new(backend.as_mut(), index, &config) {
                Ok(slot) => frame_slots.push(slot),
                Err(err) => {
                    frame_slots.iter_mut().for_each(|slot: &mut FrameSlot| slot.destroy(backend.as_mut()));
                    return Err(err);
                }
            }
        }
        log::info!("frames in flight: {fif_count}, swapchain images: {image_count}");

        let mut device = Self {
            frame_counter: FrameCounter::new(fif_count),
            swapchain: SwapchainState {
                backbuffers: Vec::new(),
                format: Format::Undefined,
                width: 0,
                height: 0,
                current: None,
                acquire_pending: false,
                dirty: false,
                present_interval: config.present_interval,
            },
            backend,
            config,
            caps,
            tracker: Rc::new(RefTracker::new()),
            resources: Resources::default(),
            caches: Caches::default(),
            frame_slots,
            slot_ready: false,
            in_frame: false,
            command_buffers: CommandBufferPool::default(),
            contexts: Vec::new(),
            free_contexts: Vec::new(),
            upload: UploadContext::new(),
            unconsumed_tokens: Vec::new(),
            frame_stats: FrameStats::default(),
            last_frame_stats: FrameStats::default(),
            total_stats: FrameStats::default(),
            blocks_created: 0,
            timer_results: Vec::new(),

            #[cfg(debug_assertions)]
            destroyed: false,
        };

        if let Err(err) = device.register_backbuffers() {
            device.destroy_mut();
            return Err(err);
        }
        Ok(device)
    }

    /// 为 swapchain 的每一张 image 创建 view，注册为 texture
    fn register_backbuffers(&mut self) -> GfxResult<()> {
        let info = self.backend.swapchain_info();
        let desc = TextureDesc::new_2d(info.width, info.height, info.format, TextureUsage::RENDER_TARGET);
        for (i, image) in info.images.iter().enumerate() {
            let view = self.backend.create_image_view(*image, &image_info(&desc, "backbuffer"))?;
            let handle = self.resources.textures.push(TextureRecord {
                desc,
                image: *image,
                memory: NativeMemory::null(),
                view,
                state: ResourceState::Undefined,
            });
            log::debug!("register backbuffer {i} as {handle:?}");
            self.swapchain.backbuffers.push(self.register(handle));
        }
        self.swapchain.format = info.format;
        self.swapchain.width = info.width;
        self.swapchain.height = info.height;
        Ok(())
    }
}

// getters
impl Device {
    #[inline]
    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }
    #[inline]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.frame_id()
    }
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frame_counter.fif_count()
    }
    #[inline]
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }
    /// 上一帧的统计数据
    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.last_frame_stats
    }
    /// 当前帧到目前为止的统计数据
    #[inline]
    pub fn current_stats(&self) -> FrameStats {
        self.frame_stats
    }
    /// 所有已结束帧的累计统计数据
    #[inline]
    pub fn total_stats(&self) -> FrameStats {
        self.total_stats
    }
    /// 最近一次被回收的 slot 中的 timer 结果
    #[inline]
    pub fn timer_results(&self) -> &[TimerResult] {
        &self.timer_results
    }
    /// 本帧 acquire 到的 swapchain image；不在帧内时为无效句柄
    pub fn backbuffer(&self) -> Handle<Texture> {
        match self.swapchain.current {
            Some(index) => self.swapchain.backbuffers[index as usize].handle(),
            None => Handle::INVALID,
        }
    }
    #[inline]
    pub fn backbuffer_format(&self) -> Format {
        self.swapchain.format
    }
    #[inline]
    pub fn backbuffer_extent(&self) -> (u32, u32) {
        (self.swapchain.width, self.swapchain.height)
    }
    /// 当前存活的资源数量（不包括 swapchain image）
    pub fn live_resources(&self) -> usize {
        let r = &self.resources;
        r.buffers.len() + r.textures.len() - self.swapchain.backbuffers.len()
            + r.samplers.len()
            + r.shaders.len()
            + r.techniques.len()
            + r.vertex_formats.len()
            + r.blend_states.len()
            + r.depth_stencil_states.len()
            + r.rasterizer_states.len()
    }
}

// 引用计数
impl Device {
    fn register<T: ResourceType>(&self, handle: Handle<T>) -> Own<T> {
        self.tracker.register(T::KIND, handle.index());
        Own::new(handle, self.tracker.clone())
    }

    /// 增加一个引用，需要与 [`Device::release`] 配对
    #[inline]
    pub fn retain<T: ResourceType>(&self, handle: Handle<T>) {
        self.tracker.retain(T::KIND, handle.index());
    }

    /// 减少一个引用，计数归零的资源在下一次回收时进入延迟销毁队列
    #[inline]
    pub fn release<T: ResourceType>(&self, handle: Handle<T>) {
        self.tracker.release(T::KIND, handle.index());
    }

    /// 从普通句柄得到一个共享引用
    pub fn share<T: ResourceType>(&self, handle: Handle<T>) -> Ref<T> {
        debug_assert!(self.tracker.count(T::KIND, handle.index()) > 0, "sharing a dead {handle:?}");
        Ref::retain(handle, Some(self.tracker.clone()))
    }

    #[inline]
    pub fn ref_count<T: ResourceType>(&self, handle: Handle<T>) -> u32 {
        self.tracker.count(T::KIND, handle.index())
    }
}

// frame slot
impl Device {
    /// 回收当前 slot，之后才能在其中分配内存或者放入延迟销毁的对象
    ///
    /// 由 `begin_frame` 调用；帧外的资源操作（例如初始化时的上传）也会触发。
    fn prepare_slot(&mut self) {
        if self.slot_ready {
            return;
        }
        let _span = tracy_client::span!("Device::prepare_slot");

        let frame_id = self.frame_counter.frame_id();
        let slot = &mut self.frame_slots[self.frame_counter.slot_index()];
        let retired = slot
            .retire(self.backend.as_mut(), self.caps.timestamp_period_ns)
            .or_fatal("retiring a frame slot");
        slot.begin(frame_id);
        self.slot_ready = true;

        for (queue, cmd) in retired.recycled {
            self.command_buffers.recycle(queue, cmd);
        }
        self.frame_stats.deferred_destructions += retired.destroyed as u32;
        self.timer_results = retired.timers;

        self.collect_released();
    }

    /// 计数归零的资源进入当前 slot 的延迟销毁队列
    fn collect_released(&mut self) -> usize {
        self.prepare_slot();
        let slot = &mut self.frame_slots[self.frame_counter.slot_index()];
        let count = self
            .resources
            .drain_released(&self.tracker, &mut self.caches, slot.destroy_queue());
        if count > 0 {
            log::debug!(
                "{} {count} resources released, destroyed after slot {} retires",
                self.frame_counter.frame_name(),
                slot.index()
            );
        }
        count
    }

    /// 等待 GPU 执行完所有已经提交的命令
    pub fn finish(&mut self) {
        self.backend.wait_idle().or_fatal("waiting for the device");
    }
}

// destroy
impl Device {
    pub fn destroy(mut self) {
        self.destroy_mut();
    }

    pub fn destroy_mut(&mut self) {
        let _span = tracy_client::span!("Device::destroy");
        log::info!("destroy device after {} frames", self.frame_counter.frame_id());

        if !self.upload.is_empty() {
            self.prepare_slot();
            let mut shared = gfx_shared!(self);
            if let Some(semaphore) = self.upload.flush(&mut shared) {
                self.unconsumed_tokens.push(semaphore);
            }
        }
        self.backend.wait_idle().or_fatal("waiting for the device");
        debug_assert!(
            self.contexts.iter().all(|c| !c.phase().is_recording()),
            "device destroyed while a context is still recording"
        );
        self.unconsumed_tokens.clear();

        self.swapchain.backbuffers.clear();
        self.tracker.take_released();

        for slot in &mut self.frame_slots {
            slot.destroy(self.backend.as_mut());
        }
        self.frame_slots.clear();

        let mut queue = DestroyQueue::default();
        self.resources.drain_all(&mut queue);
        self.caches.drain_all(&mut queue);
        let mut recycled = Vec::new();
        queue.flush(self.backend.as_mut(), &mut recycled);
        recycled.into_iter().for_each(|(_, cmd)| self.backend.destroy_command_buffer(cmd));
        self.command_buffers.destroy(self.backend.as_mut());

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(self.destroyed || std::thread::panicking(), "Device dropped without destroy");
        }
    }
}

/// texture 描述对应的原生 image 参数
pub(crate) fn image_info<'a>(desc: &TextureDesc, name: &'a str) -> ImageCreateInfo<'a> {
    let (width, height, depth) = desc.mip_extent(0);
    ImageCreateInfo {
        kind: desc.kind,
        width,
        height,
        depth,
        layers: desc.layer_count(),
        mip_count: desc.mip_count,
        samples: desc.samples,
        format: desc.format,
        usage: desc.usage,
        name,
    }
}
