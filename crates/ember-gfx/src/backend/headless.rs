//! 纯内存的 backend
//!
//! 所有原生对象都放在一张 slotmap 中，内存对象持有真实的字节，所以映射的指针可以直接读写，
//! 拷贝命令在提交时执行。提交有递增的序号，等待 fence 时模拟的 GPU 完成该序号之前的所有提交。
//!
//! 销毁一个仍然被未完成的提交引用的对象，会被记录为 violation，测试通过 [`HeadlessProbe`] 检查。

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::Rc;

use glam::{UVec3, Vec4};
use slotmap::{Key, KeyData, SlotMap};

use crate::backend::memory::{select_memory_type, MemoryProperties};
use crate::backend::{
    AcquireResult, BarrierBatch, BufferAllocation, BufferCopy, BufferCreateInfo, BufferImageCopy, BufferTransition,
    DescriptorWrite, GraphicsPipelineInfo, ImageAllocation, ImageCreateInfo, IndexType, NativeBuffer, NativeBufferView,
    NativeCommandBuffer, NativeDescriptorPool, NativeDescriptorSet, NativeDescriptorSetLayout, NativeFence,
    NativeFramebuffer, NativeImage, NativeImageView, NativeMemory, NativePipeline, NativePipelineLayout,
    NativeQueryPool, NativeRenderPass, NativeSampler, NativeSemaphore, NativeShaderModule, PipelineBindPoint,
    PresentResult, RenderPassBeginInfo, RhiBackend, ShaderStageInfo, SubmitDesc, SwapchainInfo,
};
use crate::cache::RenderPassKey;
use crate::desc::{BindingLayout, Format, QueueKind, Rect, SamplerDesc, ShaderDesc, Viewport};
use crate::error::{GfxError, GfxResult};
use crate::stats::DeviceCaps;

slotmap::new_key_type! {
    struct ObjectKey;
}

/// headless backend 的配置
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub swapchain_images: u32,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub min_constant_buffer_alignment: u64,
    pub min_storage_buffer_alignment: u64,
    /// 模拟的内存类型，用于内存类别的选择
    pub memory_types: Vec<MemoryProperties>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        const DL: MemoryProperties = MemoryProperties::DEVICE_LOCAL;
        const HV: MemoryProperties = MemoryProperties::HOST_VISIBLE;
        const HC: MemoryProperties = MemoryProperties::HOST_COHERENT;
        const CACHED: MemoryProperties = MemoryProperties::HOST_CACHED;
        Self {
            swapchain_images: 3,
            width: 1280,
            height: 720,
            format: Format::Bgra8Unorm,
            min_constant_buffer_alignment: 256,
            min_storage_buffer_alignment: 64,
            memory_types: vec![DL, HV | HC, HV | HC | CACHED],
        }
    }
}

impl HeadlessConfig {
    #[inline]
    pub fn with_swapchain_images(mut self, count: u32) -> Self {
        self.swapchain_images = count;
        self
    }

    #[inline]
    pub fn with_extent(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Buffer,
    Memory,
    Image,
    ImageView,
    BufferView,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
    DescriptorPool,
    DescriptorSet,
    CommandBuffer,
    Fence,
    Semaphore,
    QueryPool,
}

impl ObjectKind {
    pub const COUNT: usize = 18;
}

/// 一段堆上的字节，地址在整个生命周期内不变，只通过裸指针访问
struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
}

impl HostMemory {
    fn zeroed(len: usize) -> Self {
        let boxed = vec![0u8; len.max(1)].into_boxed_slice();
        let len = boxed.len();
        let ptr = NonNull::from(Box::leak(boxed)).cast::<u8>();
        Self { ptr, len }
    }

    fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= self.len, "read out of bounds");
        // SAFETY: 范围在分配之内
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }.to_vec()
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // SAFETY: ptr 与 len 来自 zeroed 中 leak 的 Box<[u8]>
        unsafe { drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len))) };
    }
}

/// 拷贝的一端：内存的起始地址与大小
#[derive(Clone, Copy)]
struct Span {
    ptr: NonNull<u8>,
    len: usize,
}

#[derive(Clone, Copy, Debug)]
struct ImageInfo {
    width: u32,
    height: u32,
    depth: u32,
    layers: u32,
    mip_count: u32,
    bytes_per_pixel: u32,
}

impl ImageInfo {
    fn layer_size(&self, mip: u32) -> usize {
        let w = (self.width >> mip).max(1) as usize;
        let h = (self.height >> mip).max(1) as usize;
        let d = (self.depth >> mip).max(1) as usize;
        w * h * d * self.bytes_per_pixel as usize
    }

    fn mip_offset(&self, mip: u32) -> usize {
        (0..mip).map(|m| self.layer_size(m) * self.layers as usize).sum()
    }

    fn total_size(&self) -> usize {
        self.mip_offset(self.mip_count)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmdPhase {
    Initial,
    Recording,
    Executable,
}

enum Transfer {
    Buffer {
        src: u64,
        dst: u64,
        regions: Vec<BufferCopy>,
    },
    BufferToImage {
        src: u64,
        dst: u64,
        regions: Vec<BufferImageCopy>,
    },
    ImageToBuffer {
        src: u64,
        dst: u64,
        regions: Vec<BufferImageCopy>,
    },
}

struct CommandBufferState {
    phase: CmdPhase,
    /// 最近一次提交的序号
    last_submit: u64,
    references: Vec<u64>,
    transfers: Vec<Transfer>,
}

enum Object {
    Buffer { memory: u64, size: u64 },
    Memory { bytes: HostMemory },
    Image { info: ImageInfo, bytes: HostMemory, swapchain: bool },
    ImageView { image: u64 },
    BufferView { buffer: u64 },
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer { attachments: Vec<u64> },
    DescriptorPool { max_sets: u32, sets: Vec<u64> },
    DescriptorSet { references: Vec<u64> },
    CommandBuffer(CommandBufferState),
    Fence { signaled: bool, serial: Option<u64> },
    Semaphore { signaled: bool },
    QueryPool { timestamps: Vec<u64> },
}

impl Object {
    fn kind(&self) -> ObjectKind {
        match self {
            Object::Buffer { .. } => ObjectKind::Buffer,
            Object::Memory { .. } => ObjectKind::Memory,
            Object::Image { .. } => ObjectKind::Image,
            Object::ImageView { .. } => ObjectKind::ImageView,
            Object::BufferView { .. } => ObjectKind::BufferView,
            Object::Sampler => ObjectKind::Sampler,
            Object::ShaderModule => ObjectKind::ShaderModule,
            Object::DescriptorSetLayout => ObjectKind::DescriptorSetLayout,
            Object::PipelineLayout => ObjectKind::PipelineLayout,
            Object::Pipeline => ObjectKind::Pipeline,
            Object::RenderPass => ObjectKind::RenderPass,
            Object::Framebuffer { .. } => ObjectKind::Framebuffer,
            Object::DescriptorPool { .. } => ObjectKind::DescriptorPool,
            Object::DescriptorSet { .. } => ObjectKind::DescriptorSet,
            Object::CommandBuffer(_) => ObjectKind::CommandBuffer,
            Object::Fence { .. } => ObjectKind::Fence,
            Object::Semaphore { .. } => ObjectKind::Semaphore,
            Object::QueryPool { .. } => ObjectKind::QueryPool,
        }
    }
}

/// 已经提交但还没有被确认完成的工作
struct InFlight {
    serial: u64,
    references: Vec<u64>,
}

struct SwapchainSim {
    images: Vec<u64>,
    next_image: u32,
    image_count: u32,
    width: u32,
    height: u32,
    format: Format,
    out_of_date: bool,
    rebuilds: u32,
    presents: u32,
    present_interval: u32,
}

struct State {
    objects: SlotMap<ObjectKey, Object>,
    created: [u32; ObjectKind::COUNT],
    destroyed: [u32; ObjectKind::COUNT],
    violations: Vec<String>,

    last_serial: u64,
    completed_serial: u64,
    in_flight: Vec<InFlight>,
    /// 模拟的 GPU 时钟，单位为 tick（1ns）
    gpu_clock: u64,

    submissions: u32,
    semaphore_waits: u32,
    barrier_batches: u32,
    descriptor_set_allocations: u32,
    command_counts: HashMap<&'static str, u32>,
    vertex_binds: Vec<(u32, NativeBuffer, u64)>,
    dynamic_offsets: Vec<Vec<u32>>,
    buffer_transitions: Vec<BufferTransition>,
    /// 写入 descriptor set 的 buffer 区间：(buffer, offset, range)
    buffer_writes: Vec<(NativeBuffer, u64, u64)>,

    swapchain: SwapchainSim,
}

#[inline]
fn key(raw: u64) -> ObjectKey {
    KeyData::from_ffi(raw).into()
}

// 对象表
impl State {
    fn insert(&mut self, object: Object) -> u64 {
        self.created[object.kind() as usize] += 1;
        self.objects.insert(object).data().as_ffi()
    }

    fn violation(&mut self, message: String) {
        log::error!("headless violation: {message}");
        self.violations.push(message);
    }

    fn get_mut(&mut self, raw: u64, kind: ObjectKind, call: &str) -> Option<&mut Object> {
        let found = self.objects.get(key(raw)).map(Object::kind);
        match found {
            Some(found) if found == kind => self.objects.get_mut(key(raw)),
            Some(found) => {
                self.violation(format!("{call}: {raw:#x} is a {found:?}, expected {kind:?}"));
                None
            }
            None => {
                self.violation(format!("{call}: {kind:?} {raw:#x} does not exist"));
                None
            }
        }
    }

    /// 仍然被未完成的提交引用的对象，返回该提交的序号
    fn pending_use(&self, raw: u64) -> Option<u64> {
        self.in_flight
            .iter()
            .find(|work| work.serial > self.completed_serial && work.references.contains(&raw))
            .map(|work| work.serial)
    }

    fn remove(&mut self, raw: u64, kind: ObjectKind, call: &str) -> Option<Object> {
        if raw == 0 {
            return None;
        }
        self.get_mut(raw, kind, call)?;
        if let Some(serial) = self.pending_use(raw) {
            self.violation(format!(
                "{call}: premature destruction of {kind:?} {raw:#x}, still used by submission #{serial}"
            ));
        }
        self.destroyed[kind as usize] += 1;
        self.objects.remove(key(raw))
    }

    /// 对象以及它间接引用的对象
    fn expand_references(&self, roots: &[u64], out: &mut Vec<u64>) {
        let mut stack = roots.to_vec();
        while let Some(raw) = stack.pop() {
            if raw == 0 || out.contains(&raw) {
                continue;
            }
            out.push(raw);
            match self.objects.get(key(raw)) {
                Some(Object::Buffer { memory, .. }) => stack.push(*memory),
                Some(Object::ImageView { image }) => stack.push(*image),
                Some(Object::BufferView { buffer }) => stack.push(*buffer),
                Some(Object::Framebuffer { attachments }) => stack.extend_from_slice(attachments),
                Some(Object::DescriptorSet { references }) => stack.extend_from_slice(references),
                _ => {}
            }
        }
    }

    fn retire_until(&mut self, serial: u64) {
        if serial <= self.completed_serial {
            return;
        }
        self.completed_serial = serial;
        let completed = self.completed_serial;
        self.in_flight.retain(|work| work.serial > completed);
    }
}

// 命令录制
impl State {
    /// 录制命令前的检查，返回引用的对象列表
    fn recording(&mut self, cmd: NativeCommandBuffer, name: &'static str) -> Option<&mut CommandBufferState> {
        *self.command_counts.entry(name).or_default() += 1;
        let phase = match self.objects.get(key(cmd.raw())) {
            Some(Object::CommandBuffer(state)) => state.phase,
            _ => {
                self.violation(format!("{name}: command buffer {:#x} does not exist", cmd.raw()));
                return None;
            }
        };
        if phase != CmdPhase::Recording {
            self.violation(format!("{name}: command buffer {:#x} is not recording", cmd.raw()));
            return None;
        }
        match self.objects.get_mut(key(cmd.raw())) {
            Some(Object::CommandBuffer(state)) => Some(state),
            _ => None,
        }
    }

    /// 记录命令引用的对象，引用不存在的对象属于 violation
    fn touch(&mut self, cmd: NativeCommandBuffer, name: &'static str, raws: &[u64]) {
        for raw in raws.iter().copied().filter(|raw| *raw != 0) {
            if !self.objects.contains_key(key(raw)) {
                self.violation(format!("{name}: use of destroyed object {raw:#x}"));
            }
        }
        let mut expanded = Vec::new();
        self.expand_references(raws, &mut expanded);
        if let Some(state) = self.recording(cmd, name) {
            state.references.extend(expanded);
        }
    }

    fn buffer_span(&mut self, buffer: u64, call: &str) -> Option<Span> {
        let memory = match self.get_mut(buffer, ObjectKind::Buffer, call)? {
            Object::Buffer { memory, .. } => *memory,
            _ => return None,
        };
        match self.get_mut(memory, ObjectKind::Memory, call)? {
            Object::Memory { bytes } => Some(Span {
                ptr: bytes.ptr,
                len: bytes.len,
            }),
            _ => None,
        }
    }

    fn image_span(&mut self, image: u64, call: &str) -> Option<(Span, ImageInfo)> {
        match self.get_mut(image, ObjectKind::Image, call)? {
            Object::Image { info, bytes, .. } => Some((
                Span {
                    ptr: bytes.ptr,
                    len: bytes.len,
                },
                *info,
            )),
            _ => None,
        }
    }

    fn copy(&mut self, src: Span, src_offset: usize, dst: Span, dst_offset: usize, len: usize, call: &str) {
        if src_offset + len > src.len || dst_offset + len > dst.len {
            self.violation(format!(
                "{call}: copy of {len} bytes out of bounds (src {src_offset}/{}, dst {dst_offset}/{})",
                src.len, dst.len
            ));
            return;
        }
        // SAFETY: 两端的范围都在各自的分配之内；同一块内存中的拷贝可能重叠
        unsafe { std::ptr::copy(src.ptr.as_ptr().add(src_offset), dst.ptr.as_ptr().add(dst_offset), len) };
    }

    /// 模拟的 GPU 执行拷贝命令
    fn execute(&mut self, transfers: &[Transfer]) {
        for transfer in transfers {
            match transfer {
                Transfer::Buffer { src, dst, regions } => {
                    let (Some(s), Some(d)) = (self.buffer_span(*src, "copy_buffer"), self.buffer_span(*dst, "copy_buffer"))
                    else {
                        continue;
                    };
                    for r in regions {
                        self.copy(s, r.src_offset as usize, d, r.dst_offset as usize, r.size as usize, "copy_buffer");
                    }
                }
                Transfer::BufferToImage { src, dst, regions } => {
                    let Some(s) = self.buffer_span(*src, "copy_buffer_to_image") else {
                        continue;
                    };
                    let Some((d, info)) = self.image_span(*dst, "copy_buffer_to_image") else {
                        continue;
                    };
                    for r in regions {
                        let layer = info.layer_size(r.mip_level);
                        let offset = info.mip_offset(r.mip_level) + layer * r.base_layer as usize;
                        let len = layer * r.layer_count as usize;
                        self.copy(s, r.buffer_offset as usize, d, offset, len, "copy_buffer_to_image");
                    }
                }
                Transfer::ImageToBuffer { src, dst, regions } => {
                    let Some((s, info)) = self.image_span(*src, "copy_image_to_buffer") else {
                        continue;
                    };
                    let Some(d) = self.buffer_span(*dst, "copy_image_to_buffer") else {
                        continue;
                    };
                    for r in regions {
                        let layer = info.layer_size(r.mip_level);
                        let offset = info.mip_offset(r.mip_level) + layer * r.base_layer as usize;
                        let len = layer * r.layer_count as usize;
                        self.copy(s, offset, d, r.buffer_offset as usize, len, "copy_image_to_buffer");
                    }
                }
            }
        }
    }
}

// 同步
impl State {
    fn signal(&mut self, semaphore: NativeSemaphore, call: &str) {
        if let Some(Object::Semaphore { signaled }) = self.get_mut(semaphore.raw(), ObjectKind::Semaphore, call) {
            if *signaled {
                self.violation(format!("{call}: semaphore {:#x} is signaled twice", semaphore.raw()));
            } else {
                *signaled = true;
            }
        }
    }

    fn wait(&mut self, semaphore: NativeSemaphore, call: &str) {
        self.semaphore_waits += 1;
        if let Some(Object::Semaphore { signaled }) = self.get_mut(semaphore.raw(), ObjectKind::Semaphore, call) {
            if *signaled {
                *signaled = false;
            } else {
                self.violation(format!("{call}: wait on semaphore {:#x} without a pending signal", semaphore.raw()));
            }
        }
    }

    fn create_swapchain_images(&mut self) {
        let sc = &self.swapchain;
        let info = ImageInfo {
            width: sc.width,
            height: sc.height,
            depth: 1,
            layers: 1,
            mip_count: 1,
            bytes_per_pixel: sc.format.bytes_per_pixel(),
        };
        let images = (0..sc.image_count)
            .map(|_| {
                self.insert(Object::Image {
                    info,
                    bytes: HostMemory::zeroed(info.total_size()),
                    swapchain: true,
                })
            })
            .collect();
        self.swapchain.images = images;
        self.swapchain.next_image = 0;
    }
}

/// 纯内存的 [`RhiBackend`]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    state: Rc<RefCell<State>>,
}

// new & init
impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        let mut state = State {
            objects: SlotMap::with_key(),
            created: [0; ObjectKind::COUNT],
            destroyed: [0; ObjectKind::COUNT],
            violations: Vec::new(),
            last_serial: 0,
            completed_serial: 0,
            in_flight: Vec::new(),
            gpu_clock: 0,
            submissions: 0,
            semaphore_waits: 0,
            barrier_batches: 0,
            descriptor_set_allocations: 0,
            command_counts: HashMap::new(),
            vertex_binds: Vec::new(),
            dynamic_offsets: Vec::new(),
            buffer_transitions: Vec::new(),
            buffer_writes: Vec::new(),
            swapchain: SwapchainSim {
                images: Vec::new(),
                next_image: 0,
                image_count: config.swapchain_images,
                width: config.width,
                height: config.height,
                format: config.format,
                out_of_date: false,
                rebuilds: 0,
                presents: 0,
                present_interval: 1,
            },
        };
        state.create_swapchain_images();
        log::debug!(
            "headless backend: {} swapchain images {}x{}",
            config.swapchain_images,
            config.width,
            config.height
        );

        Self {
            config,
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// 共享的状态视图，backend 被 device 拿走之后依然可以检查
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            state: self.state.clone(),
        }
    }

    #[inline]
    fn state(&self) -> RefMut<'_, State> {
        self.state.borrow_mut()
    }
}

impl RhiBackend for HeadlessBackend {
    fn caps(&self) -> DeviceCaps {
        DeviceCaps {
            api_name: "headless",
            device_name: "headless device".to_string(),
            min_constant_buffer_alignment: self.config.min_constant_buffer_alignment,
            min_storage_buffer_alignment: self.config.min_storage_buffer_alignment,
            max_texture_size: 16384,
            timestamp_period_ns: 1.0,
            distinct_compute_queue: false,
            distinct_transfer_queue: false,
        }
    }

    // buffer & memory
    fn create_buffer(&mut self, info: &BufferCreateInfo) -> GfxResult<BufferAllocation> {
        let all_types = (1u32 << self.config.memory_types.len()) - 1;
        let type_index = select_memory_type(&self.config.memory_types, all_types, info.memory)?;
        let host_visible = self.config.memory_types[type_index as usize].contains(MemoryProperties::HOST_VISIBLE);

        let mut state = self.state();
        let bytes = HostMemory::zeroed(info.size as usize);
        let mapped = host_visible.then_some(bytes.ptr);
        let memory = state.insert(Object::Memory { bytes });
        let buffer = state.insert(Object::Buffer {
            memory,
            size: info.size,
        });
        Ok(BufferAllocation {
            buffer: NativeBuffer::from_raw(buffer),
            memory: NativeMemory::from_raw(memory),
            size: info.size,
            mapped,
        })
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        self.state().remove(buffer.raw(), ObjectKind::Buffer, "destroy_buffer");
    }

    fn free_memory(&mut self, memory: NativeMemory) {
        self.state().remove(memory.raw(), ObjectKind::Memory, "free_memory");
    }

    fn invalidate_memory(&mut self, memory: NativeMemory) {
        self.state().get_mut(memory.raw(), ObjectKind::Memory, "invalidate_memory");
    }

    fn create_buffer_view(
        &mut self,
        buffer: NativeBuffer,
        _format: Format,
        _offset: u64,
        _range: u64,
    ) -> GfxResult<NativeBufferView> {
        let mut state = self.state();
        state.get_mut(buffer.raw(), ObjectKind::Buffer, "create_buffer_view");
        Ok(NativeBufferView::from_raw(state.insert(Object::BufferView { buffer: buffer.raw() })))
    }

    fn destroy_buffer_view(&mut self, view: NativeBufferView) {
        self.state().remove(view.raw(), ObjectKind::BufferView, "destroy_buffer_view");
    }

    // image
    fn create_image(&mut self, info: &ImageCreateInfo) -> GfxResult<ImageAllocation> {
        let image_info = ImageInfo {
            width: info.width,
            height: info.height,
            depth: info.depth,
            layers: info.layers,
            mip_count: info.mip_count,
            bytes_per_pixel: info.format.bytes_per_pixel(),
        };
        let mut state = self.state();
        let image = state.insert(Object::Image {
            info: image_info,
            bytes: HostMemory::zeroed(image_info.total_size()),
            swapchain: false,
        });
        // image 的字节放在 image 自身中，memory 对象只用于配对释放
        let memory = state.insert(Object::Memory {
            bytes: HostMemory::zeroed(0),
        });
        Ok(ImageAllocation {
            image: NativeImage::from_raw(image),
            memory: NativeMemory::from_raw(memory),
        })
    }

    fn destroy_image(&mut self, image: NativeImage) {
        let mut state = self.state();
        if let Some(Object::Image { swapchain: true, .. }) = state.objects.get(key(image.raw())) {
            state.violation(format!("destroy_image: {:#x} belongs to the swapchain", image.raw()));
            return;
        }
        state.remove(image.raw(), ObjectKind::Image, "destroy_image");
    }

    fn create_image_view(&mut self, image: NativeImage, _info: &ImageCreateInfo) -> GfxResult<NativeImageView> {
        let mut state = self.state();
        state.get_mut(image.raw(), ObjectKind::Image, "create_image_view");
        Ok(NativeImageView::from_raw(state.insert(Object::ImageView { image: image.raw() })))
    }

    fn destroy_image_view(&mut self, view: NativeImageView) {
        self.state().remove(view.raw(), ObjectKind::ImageView, "destroy_image_view");
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> GfxResult<NativeSampler> {
        Ok(NativeSampler::from_raw(self.state().insert(Object::Sampler)))
    }

    fn destroy_sampler(&mut self, sampler: NativeSampler) {
        self.state().remove(sampler.raw(), ObjectKind::Sampler, "destroy_sampler");
    }

    // program
    fn create_shader_module(&mut self, desc: &ShaderDesc) -> GfxResult<NativeShaderModule> {
        if desc.code.bytes().is_empty() {
            return Err(GfxError::native("create_shader_module", "empty shader blob"));
        }
        Ok(NativeShaderModule::from_raw(self.state().insert(Object::ShaderModule)))
    }

    fn destroy_shader_module(&mut self, module: NativeShaderModule) {
        self.state().remove(module.raw(), ObjectKind::ShaderModule, "destroy_shader_module");
    }

    fn create_descriptor_set_layout(&mut self, _layout: &BindingLayout) -> GfxResult<NativeDescriptorSetLayout> {
        Ok(NativeDescriptorSetLayout::from_raw(self.state().insert(Object::DescriptorSetLayout)))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: NativeDescriptorSetLayout) {
        self.state()
            .remove(layout.raw(), ObjectKind::DescriptorSetLayout, "destroy_descriptor_set_layout");
    }

    fn create_pipeline_layout(
        &mut self,
        set_layout: NativeDescriptorSetLayout,
        _push_constant_size: u32,
    ) -> GfxResult<NativePipelineLayout> {
        let mut state = self.state();
        state.get_mut(set_layout.raw(), ObjectKind::DescriptorSetLayout, "create_pipeline_layout");
        Ok(NativePipelineLayout::from_raw(state.insert(Object::PipelineLayout)))
    }

    fn destroy_pipeline_layout(&mut self, layout: NativePipelineLayout) {
        self.state()
            .remove(layout.raw(), ObjectKind::PipelineLayout, "destroy_pipeline_layout");
    }

    fn create_graphics_pipeline(&mut self, info: &GraphicsPipelineInfo) -> GfxResult<NativePipeline> {
        let mut state = self.state();
        state.get_mut(info.layout.raw(), ObjectKind::PipelineLayout, "create_graphics_pipeline");
        state.get_mut(info.render_pass.raw(), ObjectKind::RenderPass, "create_graphics_pipeline");
        for stage in info.stages {
            state.get_mut(stage.module.raw(), ObjectKind::ShaderModule, "create_graphics_pipeline");
        }
        Ok(NativePipeline::from_raw(state.insert(Object::Pipeline)))
    }

    fn create_compute_pipeline(
        &mut self,
        layout: NativePipelineLayout,
        stage: &ShaderStageInfo,
    ) -> GfxResult<NativePipeline> {
        let mut state = self.state();
        state.get_mut(layout.raw(), ObjectKind::PipelineLayout, "create_compute_pipeline");
        state.get_mut(stage.module.raw(), ObjectKind::ShaderModule, "create_compute_pipeline");
        Ok(NativePipeline::from_raw(state.insert(Object::Pipeline)))
    }

    fn destroy_pipeline(&mut self, pipeline: NativePipeline) {
        self.state().remove(pipeline.raw(), ObjectKind::Pipeline, "destroy_pipeline");
    }

    fn create_render_pass(&mut self, _key: &RenderPassKey) -> GfxResult<NativeRenderPass> {
        Ok(NativeRenderPass::from_raw(self.state().insert(Object::RenderPass)))
    }

    fn destroy_render_pass(&mut self, render_pass: NativeRenderPass) {
        self.state().remove(render_pass.raw(), ObjectKind::RenderPass, "destroy_render_pass");
    }

    fn create_framebuffer(
        &mut self,
        render_pass: NativeRenderPass,
        attachments: &[NativeImageView],
        _width: u32,
        _height: u32,
    ) -> GfxResult<NativeFramebuffer> {
        let mut state = self.state();
        state.get_mut(render_pass.raw(), ObjectKind::RenderPass, "create_framebuffer");
        for view in attachments {
            state.get_mut(view.raw(), ObjectKind::ImageView, "create_framebuffer");
        }
        let framebuffer = state.insert(Object::Framebuffer {
            attachments: attachments.iter().map(|v| v.raw()).collect(),
        });
        Ok(NativeFramebuffer::from_raw(framebuffer))
    }

    fn destroy_framebuffer(&mut self, framebuffer: NativeFramebuffer) {
        self.state().remove(framebuffer.raw(), ObjectKind::Framebuffer, "destroy_framebuffer");
    }

    // descriptor
    fn create_descriptor_pool(&mut self, max_sets: u32) -> GfxResult<NativeDescriptorPool> {
        let pool = self.state().insert(Object::DescriptorPool {
            max_sets,
            sets: Vec::new(),
        });
        Ok(NativeDescriptorPool::from_raw(pool))
    }

    fn reset_descriptor_pool(&mut self, pool: NativeDescriptorPool) {
        let mut state = self.state();
        let sets = match state.get_mut(pool.raw(), ObjectKind::DescriptorPool, "reset_descriptor_pool") {
            Some(Object::DescriptorPool { sets, .. }) => std::mem::take(sets),
            _ => return,
        };
        for set in sets {
            state.remove(set, ObjectKind::DescriptorSet, "reset_descriptor_pool");
        }
    }

    fn destroy_descriptor_pool(&mut self, pool: NativeDescriptorPool) {
        self.reset_descriptor_pool(pool);
        self.state()
            .remove(pool.raw(), ObjectKind::DescriptorPool, "destroy_descriptor_pool");
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: NativeDescriptorPool,
        layout: NativeDescriptorSetLayout,
        count: u32,
        out: &mut Vec<NativeDescriptorSet>,
    ) -> GfxResult<()> {
        let mut state = self.state();
        state.get_mut(layout.raw(), ObjectKind::DescriptorSetLayout, "allocate_descriptor_sets");
        let fits = match state.get_mut(pool.raw(), ObjectKind::DescriptorPool, "allocate_descriptor_sets") {
            Some(Object::DescriptorPool { max_sets, sets }) => sets.len() as u32 + count <= *max_sets,
            _ => return Err(GfxError::native("allocate_descriptor_sets", "invalid pool")),
        };
        if !fits {
            return Err(GfxError::OutOfPoolMemory);
        }

        let new_sets: Vec<u64> = (0..count)
            .map(|_| state.insert(Object::DescriptorSet { references: Vec::new() }))
            .collect();
        if let Some(Object::DescriptorPool { sets, .. }) = state.objects.get_mut(key(pool.raw())) {
            sets.extend_from_slice(&new_sets);
        }
        state.descriptor_set_allocations += 1;
        out.extend(new_sets.into_iter().map(NativeDescriptorSet::from_raw));
        Ok(())
    }

    fn write_descriptor_set(&mut self, set: NativeDescriptorSet, writes: &[DescriptorWrite]) {
        let mut state = self.state();
        if let Some(serial) = state.pending_use(set.raw()) {
            state.violation(format!(
                "write_descriptor_set: set {:#x} is in use by submission #{serial}",
                set.raw()
            ));
        }
        let written: Vec<u64> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::ConstantBuffer { buffer, .. } | DescriptorWrite::StorageBuffer { buffer, .. } => {
                    buffer.raw()
                }
                DescriptorWrite::Sampler { sampler, .. } => sampler.raw(),
                DescriptorWrite::Texture { view, .. } | DescriptorWrite::StorageImage { view, .. } => view.raw(),
            })
            .collect();
        for raw in &written {
            if !state.objects.contains_key(key(*raw)) {
                state.violation(format!("write_descriptor_set: {raw:#x} does not exist"));
            }
        }
        for write in writes {
            let (buffer, offset, range) = match *write {
                DescriptorWrite::ConstantBuffer { buffer, range, .. } => (buffer, 0, range),
                DescriptorWrite::StorageBuffer {
                    buffer, offset, range, ..
                } => (buffer, offset, range),
                _ => continue,
            };
            // constant buffer 的 offset 是 dynamic offset，绑定时才知道
            let size = match state.objects.get(key(buffer.raw())) {
                Some(Object::Buffer { size, .. }) => Some(*size),
                _ => None,
            };
            if let Some(size) = size {
                if offset + range > size {
                    state.violation(format!(
                        "write_descriptor_set: range [{offset}, {}) exceeds {buffer:?} ({size} bytes)",
                        offset + range
                    ));
                }
            }
            state.buffer_writes.push((buffer, offset, range));
        }
        if let Some(Object::DescriptorSet { references }) =
            state.get_mut(set.raw(), ObjectKind::DescriptorSet, "write_descriptor_set")
        {
            *references = written;
        }
    }

    // command buffer
    fn create_command_buffer(&mut self, _queue: QueueKind) -> GfxResult<NativeCommandBuffer> {
        let cmd = self.state().insert(Object::CommandBuffer(CommandBufferState {
            phase: CmdPhase::Initial,
            last_submit: 0,
            references: Vec::new(),
            transfers: Vec::new(),
        }));
        Ok(NativeCommandBuffer::from_raw(cmd))
    }

    fn destroy_command_buffer(&mut self, cmd: NativeCommandBuffer) {
        self.state().remove(cmd.raw(), ObjectKind::CommandBuffer, "destroy_command_buffer");
    }

    fn begin_command_buffer(&mut self, cmd: NativeCommandBuffer) -> GfxResult<()> {
        let mut state = self.state();
        let completed = state.completed_serial;
        let pending = match state.get_mut(cmd.raw(), ObjectKind::CommandBuffer, "begin_command_buffer") {
            Some(Object::CommandBuffer(cb)) => {
                let pending = cb.last_submit > completed;
                cb.phase = CmdPhase::Recording;
                cb.references.clear();
                cb.transfers.clear();
                pending
            }
            _ => return Err(GfxError::native("begin_command_buffer", "invalid command buffer")),
        };
        if pending {
            state.violation(format!("begin_command_buffer: {:#x} is still pending", cmd.raw()));
        }
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: NativeCommandBuffer) -> GfxResult<()> {
        let mut state = self.state();
        match state.recording(cmd, "end_command_buffer") {
            Some(cb) => {
                cb.phase = CmdPhase::Executable;
                Ok(())
            }
            None => Err(GfxError::native("end_command_buffer", "not recording")),
        }
    }

    fn cmd_begin_render_pass(&mut self, cmd: NativeCommandBuffer, info: &RenderPassBeginInfo) {
        self.state().touch(
            cmd,
            "begin_render_pass",
            &[info.render_pass.raw(), info.framebuffer.raw()],
        );
    }

    fn cmd_end_render_pass(&mut self, cmd: NativeCommandBuffer) {
        self.state().recording(cmd, "end_render_pass");
    }

    fn cmd_set_viewport(&mut self, cmd: NativeCommandBuffer, _viewport: &Viewport) {
        self.state().recording(cmd, "set_viewport");
    }

    fn cmd_set_scissor(&mut self, cmd: NativeCommandBuffer, _scissor: &Rect) {
        self.state().recording(cmd, "set_scissor");
    }

    fn cmd_bind_pipeline(&mut self, cmd: NativeCommandBuffer, _bind_point: PipelineBindPoint, pipeline: NativePipeline) {
        self.state().touch(cmd, "bind_pipeline", &[pipeline.raw()]);
    }

    fn cmd_bind_vertex_buffers(
        &mut self,
        cmd: NativeCommandBuffer,
        first_binding: u32,
        buffers: &[NativeBuffer],
        offsets: &[u64],
    ) {
        let mut state = self.state();
        let raws: Vec<u64> = buffers.iter().map(|b| b.raw()).collect();
        state.touch(cmd, "bind_vertex_buffers", &raws);
        for (i, (buffer, offset)) in buffers.iter().zip(offsets).enumerate() {
            state.vertex_binds.push((first_binding + i as u32, *buffer, *offset));
        }
    }

    fn cmd_bind_index_buffer(&mut self, cmd: NativeCommandBuffer, buffer: NativeBuffer, _offset: u64, _index_type: IndexType) {
        self.state().touch(cmd, "bind_index_buffer", &[buffer.raw()]);
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: NativeCommandBuffer,
        _bind_point: PipelineBindPoint,
        layout: NativePipelineLayout,
        set: NativeDescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        let mut state = self.state();
        state.touch(cmd, "bind_descriptor_set", &[layout.raw(), set.raw()]);
        state.dynamic_offsets.push(dynamic_offsets.to_vec());
    }

    fn cmd_push_constants(&mut self, cmd: NativeCommandBuffer, layout: NativePipelineLayout, _offset: u32, _data: &[u8]) {
        self.state().touch(cmd, "push_constants", &[layout.raw()]);
    }

    fn cmd_draw(&mut self, cmd: NativeCommandBuffer, _vertex_count: u32, _instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        let mut state = self.state();
        state.recording(cmd, "draw");
        state.gpu_clock += 1000;
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: NativeCommandBuffer,
        _index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        let mut state = self.state();
        state.recording(cmd, "draw_indexed");
        state.gpu_clock += 1000;
    }

    fn cmd_draw_indexed_indirect(
        &mut self,
        cmd: NativeCommandBuffer,
        buffer: NativeBuffer,
        _offset: u64,
        _draw_count: u32,
        _stride: u32,
    ) {
        let mut state = self.state();
        state.touch(cmd, "draw_indexed_indirect", &[buffer.raw()]);
        state.gpu_clock += 1000;
    }

    fn cmd_dispatch(&mut self, cmd: NativeCommandBuffer, _groups: UVec3) {
        let mut state = self.state();
        state.recording(cmd, "dispatch");
        state.gpu_clock += 1000;
    }

    fn cmd_dispatch_indirect(&mut self, cmd: NativeCommandBuffer, buffer: NativeBuffer, _offset: u64) {
        let mut state = self.state();
        state.touch(cmd, "dispatch_indirect", &[buffer.raw()]);
        state.gpu_clock += 1000;
    }

    fn cmd_pipeline_barrier(&mut self, cmd: NativeCommandBuffer, batch: &BarrierBatch) {
        let mut state = self.state();
        let raws: Vec<u64> = batch
            .buffers
            .iter()
            .map(|b| b.buffer.raw())
            .chain(batch.images.iter().map(|i| i.image.raw()))
            .collect();
        state.touch(cmd, "pipeline_barrier", &raws);
        state.barrier_batches += 1;
        state.buffer_transitions.extend_from_slice(batch.buffers);
    }

    fn cmd_copy_buffer(&mut self, cmd: NativeCommandBuffer, src: NativeBuffer, dst: NativeBuffer, regions: &[BufferCopy]) {
        let mut state = self.state();
        state.touch(cmd, "copy_buffer", &[src.raw(), dst.raw()]);
        if let Some(cb) = state.recording(cmd, "copy_buffer") {
            cb.transfers.push(Transfer::Buffer {
                src: src.raw(),
                dst: dst.raw(),
                regions: regions.to_vec(),
            });
        }
        state.gpu_clock += 100;
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: NativeCommandBuffer,
        src: NativeBuffer,
        dst: NativeImage,
        regions: &[BufferImageCopy],
    ) {
        let mut state = self.state();
        state.touch(cmd, "copy_buffer_to_image", &[src.raw(), dst.raw()]);
        if let Some(cb) = state.recording(cmd, "copy_buffer_to_image") {
            cb.transfers.push(Transfer::BufferToImage {
                src: src.raw(),
                dst: dst.raw(),
                regions: regions.to_vec(),
            });
        }
        state.gpu_clock += 100;
    }

    fn cmd_copy_image_to_buffer(
        &mut self,
        cmd: NativeCommandBuffer,
        src: NativeImage,
        dst: NativeBuffer,
        regions: &[BufferImageCopy],
    ) {
        let mut state = self.state();
        state.touch(cmd, "copy_image_to_buffer", &[src.raw(), dst.raw()]);
        if let Some(cb) = state.recording(cmd, "copy_image_to_buffer") {
            cb.transfers.push(Transfer::ImageToBuffer {
                src: src.raw(),
                dst: dst.raw(),
                regions: regions.to_vec(),
            });
        }
        state.gpu_clock += 100;
    }

    fn cmd_begin_label(&mut self, cmd: NativeCommandBuffer, _name: &str, _color: Vec4) {
        self.state().recording(cmd, "begin_label");
    }

    fn cmd_end_label(&mut self, cmd: NativeCommandBuffer) {
        self.state().recording(cmd, "end_label");
    }

    fn cmd_insert_label(&mut self, cmd: NativeCommandBuffer, _name: &str, _color: Vec4) {
        self.state().recording(cmd, "insert_label");
    }

    fn cmd_write_timestamp(&mut self, cmd: NativeCommandBuffer, pool: NativeQueryPool, query: u32) {
        let mut state = self.state();
        state.touch(cmd, "write_timestamp", &[pool.raw()]);
        let clock = state.gpu_clock;
        if let Some(Object::QueryPool { timestamps }) =
            state.get_mut(pool.raw(), ObjectKind::QueryPool, "write_timestamp")
        {
            if let Some(slot) = timestamps.get_mut(query as usize) {
                *slot = clock;
            }
        }
    }

    // synchronization
    fn create_fence(&mut self, signaled: bool) -> GfxResult<NativeFence> {
        let fence = self.state().insert(Object::Fence { signaled, serial: None });
        Ok(NativeFence::from_raw(fence))
    }

    fn destroy_fence(&mut self, fence: NativeFence) {
        self.state().remove(fence.raw(), ObjectKind::Fence, "destroy_fence");
    }

    fn wait_fence(&mut self, fence: NativeFence) -> GfxResult<()> {
        let mut state = self.state();
        let (signaled, serial) = match state.get_mut(fence.raw(), ObjectKind::Fence, "wait_fence") {
            Some(Object::Fence { signaled, serial }) => (*signaled, *serial),
            _ => return Err(GfxError::native("wait_fence", "invalid fence")),
        };
        match serial {
            Some(serial) => state.retire_until(serial),
            None if !signaled => {
                state.violation(format!("wait_fence: {:#x} would never be signaled", fence.raw()));
            }
            None => {}
        }
        if let Some(Object::Fence { signaled, .. }) = state.objects.get_mut(key(fence.raw())) {
            *signaled = true;
        }
        Ok(())
    }

    fn reset_fence(&mut self, fence: NativeFence) -> GfxResult<()> {
        let mut state = self.state();
        if let Some(Object::Fence { signaled, serial }) = state.get_mut(fence.raw(), ObjectKind::Fence, "reset_fence") {
            *signaled = false;
            *serial = None;
        }
        Ok(())
    }

    fn create_semaphore(&mut self) -> GfxResult<NativeSemaphore> {
        let semaphore = self.state().insert(Object::Semaphore { signaled: false });
        Ok(NativeSemaphore::from_raw(semaphore))
    }

    fn destroy_semaphore(&mut self, semaphore: NativeSemaphore) {
        self.state().remove(semaphore.raw(), ObjectKind::Semaphore, "destroy_semaphore");
    }

    fn submit(&mut self, _queue: QueueKind, desc: &SubmitDesc) -> GfxResult<()> {
        let mut state = self.state();
        state.last_serial += 1;
        let serial = state.last_serial;
        state.submissions += 1;

        let mut references = Vec::new();
        for cmd in desc.command_buffers {
            let transfers = match state.get_mut(cmd.raw(), ObjectKind::CommandBuffer, "submit") {
                Some(Object::CommandBuffer(cb)) if cb.phase == CmdPhase::Executable => {
                    cb.last_submit = serial;
                    references.extend_from_slice(&cb.references);
                    std::mem::take(&mut cb.transfers)
                }
                Some(_) => {
                    state.violation(format!("submit: command buffer {:#x} is not executable", cmd.raw()));
                    continue;
                }
                None => continue,
            };
            references.push(cmd.raw());
            state.execute(&transfers);
        }

        for (semaphore, _) in desc.waits {
            state.wait(*semaphore, "submit");
            references.push(semaphore.raw());
        }
        for semaphore in desc.signals {
            state.signal(*semaphore, "submit");
            references.push(semaphore.raw());
        }
        if let Some(fence) = desc.fence {
            if let Some(Object::Fence { signaled, serial: fence_serial }) =
                state.get_mut(fence.raw(), ObjectKind::Fence, "submit")
            {
                if *signaled {
                    state.violation(format!("submit: fence {:#x} is already signaled", fence.raw()));
                } else {
                    *fence_serial = Some(serial);
                }
            }
            references.push(fence.raw());
        }

        state.in_flight.push(InFlight { serial, references });
        Ok(())
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        let mut state = self.state();
        let last = state.last_serial;
        state.retire_until(last);
        Ok(())
    }

    // query
    fn create_query_pool(&mut self, count: u32) -> GfxResult<NativeQueryPool> {
        let pool = self.state().insert(Object::QueryPool {
            timestamps: vec![0; count as usize],
        });
        Ok(NativeQueryPool::from_raw(pool))
    }

    fn reset_query_pool(&mut self, pool: NativeQueryPool, first: u32, count: u32) {
        let mut state = self.state();
        if let Some(Object::QueryPool { timestamps }) =
            state.get_mut(pool.raw(), ObjectKind::QueryPool, "reset_query_pool")
        {
            let end = (first + count).min(timestamps.len() as u32) as usize;
            timestamps[first as usize..end].fill(0);
        }
    }

    fn destroy_query_pool(&mut self, pool: NativeQueryPool) {
        self.state().remove(pool.raw(), ObjectKind::QueryPool, "destroy_query_pool");
    }

    fn query_timestamps(&mut self, pool: NativeQueryPool, first: u32, out: &mut [u64]) -> GfxResult<()> {
        let mut state = self.state();
        match state.get_mut(pool.raw(), ObjectKind::QueryPool, "query_timestamps") {
            Some(Object::QueryPool { timestamps }) => {
                let first = first as usize;
                let Some(src) = timestamps.get(first..first + out.len()) else {
                    return Err(GfxError::native("query_timestamps", "query range out of bounds"));
                };
                out.copy_from_slice(src);
                Ok(())
            }
            _ => Err(GfxError::native("query_timestamps", "invalid query pool")),
        }
    }

    // swapchain
    fn swapchain_info(&self) -> SwapchainInfo {
        let state = self.state.borrow();
        SwapchainInfo {
            images: state.swapchain.images.iter().map(|raw| NativeImage::from_raw(*raw)).collect(),
            format: state.swapchain.format,
            width: state.swapchain.width,
            height: state.swapchain.height,
        }
    }

    fn acquire_next_image(&mut self, signal: NativeSemaphore) -> GfxResult<AcquireResult> {
        let mut state = self.state();
        if state.swapchain.out_of_date {
            return Ok(AcquireResult::OutOfDate);
        }
        state.signal(signal, "acquire_next_image");
        let index = state.swapchain.next_image;
        state.swapchain.next_image = (index + 1) % state.swapchain.image_count;
        Ok(AcquireResult::Acquired {
            index,
            suboptimal: false,
        })
    }

    fn present(&mut self, image_index: u32, wait: NativeSemaphore) -> GfxResult<PresentResult> {
        let mut state = self.state();
        if image_index >= state.swapchain.image_count {
            return Err(GfxError::native("present", format!("image index {image_index} out of range")));
        }
        state.wait(wait, "present");
        state.swapchain.presents += 1;
        if state.swapchain.out_of_date {
            return Ok(PresentResult::OutOfDate);
        }
        Ok(PresentResult::Presented)
    }

    fn recreate_swapchain(&mut self, present_interval: u32) -> GfxResult<()> {
        let mut state = self.state();
        for image in std::mem::take(&mut state.swapchain.images) {
            state.remove(image, ObjectKind::Image, "recreate_swapchain");
        }
        state.swapchain.present_interval = present_interval;
        state.swapchain.out_of_date = false;
        state.swapchain.rebuilds += 1;
        state.create_swapchain_images();
        Ok(())
    }
}

/// [`HeadlessBackend`] 状态的共享视图
#[derive(Clone)]
pub struct HeadlessProbe {
    state: Rc<RefCell<State>>,
}

impl HeadlessProbe {
    #[inline]
    fn state(&self) -> Ref<'_, State> {
        self.state.borrow()
    }

    /// 所有记录下来的违规操作
    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    /// 某一类对象当前存活的数量
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.state().objects.values().filter(|o| o.kind() == kind).count()
    }

    #[inline]
    pub fn live_buffers(&self) -> usize {
        self.live(ObjectKind::Buffer)
    }

    #[inline]
    pub fn live_objects(&self) -> usize {
        self.state().objects.len()
    }

    pub fn created(&self, kind: ObjectKind) -> u32 {
        self.state().created[kind as usize]
    }

    pub fn destroyed(&self, kind: ObjectKind) -> u32 {
        self.state().destroyed[kind as usize]
    }

    /// 读取 buffer 所在内存中的字节
    pub fn read_buffer(&self, buffer: NativeBuffer, offset: u64, len: usize) -> Vec<u8> {
        let state = self.state();
        let memory = match state.objects.get(key(buffer.raw())) {
            Some(Object::Buffer { memory, .. }) => *memory,
            _ => panic!("{buffer:?} does not exist"),
        };
        match state.objects.get(key(memory)) {
            Some(Object::Memory { bytes }) => bytes.read(offset as usize, len),
            _ => panic!("memory of {buffer:?} does not exist"),
        }
    }

    /// 读取 image 某一级 mip 的全部字节
    pub fn read_image(&self, image: NativeImage, mip: u32) -> Vec<u8> {
        let state = self.state();
        match state.objects.get(key(image.raw())) {
            Some(Object::Image { info, bytes, .. }) => {
                bytes.read(info.mip_offset(mip), info.layer_size(mip) * info.layers as usize)
            }
            _ => panic!("{image:?} does not exist"),
        }
    }

    #[inline]
    pub fn submissions(&self) -> u32 {
        self.state().submissions
    }

    #[inline]
    pub fn semaphore_waits(&self) -> u32 {
        self.state().semaphore_waits
    }

    #[inline]
    pub fn barrier_batches(&self) -> u32 {
        self.state().barrier_batches
    }

    #[inline]
    pub fn descriptor_set_allocations(&self) -> u32 {
        self.state().descriptor_set_allocations
    }

    /// 某个录制命令被调用的次数，例如 `"bind_pipeline"`、`"draw"`
    pub fn command_count(&self, name: &str) -> u32 {
        self.state().command_counts.get(name).copied().unwrap_or(0)
    }

    /// 所有 vertex buffer 绑定：(binding, buffer, offset)
    pub fn vertex_binds(&self) -> Vec<(u32, NativeBuffer, u64)> {
        self.state().vertex_binds.clone()
    }

    /// 每一次 descriptor set 绑定使用的 dynamic offset
    pub fn dynamic_offsets(&self) -> Vec<Vec<u32>> {
        self.state().dynamic_offsets.clone()
    }

    /// 所有 barrier 中的 buffer 状态转换，按录制顺序
    pub fn buffer_transitions(&self) -> Vec<BufferTransition> {
        self.state().buffer_transitions.clone()
    }

    /// 所有写入 descriptor set 的 buffer 区间：(buffer, offset, range)
    ///
    /// constant buffer 的 offset 总是 0，真正的偏移在 [`HeadlessProbe::dynamic_offsets`] 中。
    pub fn buffer_writes(&self) -> Vec<(NativeBuffer, u64, u64)> {
        self.state().buffer_writes.clone()
    }

    /// 提交过但还没有被确认完成的工作数量
    pub fn pending_submissions(&self) -> usize {
        let state = self.state();
        state
            .in_flight
            .iter()
            .filter(|work| work.serial > state.completed_serial)
            .count()
    }

    #[inline]
    pub fn swapchain_rebuilds(&self) -> u32 {
        self.state().swapchain.rebuilds
    }

    #[inline]
    pub fn presents(&self) -> u32 {
        self.state().swapchain.presents
    }

    /// 之后的 acquire 与 present 都报告 out of date，直到 swapchain 被重建
    pub fn set_out_of_date(&self) {
        self.state.borrow_mut().swapchain.out_of_date = true;
    }

    /// 模拟窗口尺寸的改变：下一次重建使用新的尺寸
    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.borrow_mut();
        state.swapchain.width = width;
        state.swapchain.height = height;
        state.swapchain.out_of_date = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryClass;
    use crate::backend::BufferUsage;
    use crate::commands::barrier::PipelineStages;

    fn buffer(backend: &mut HeadlessBackend, size: u64, memory: MemoryClass) -> BufferAllocation {
        backend
            .create_buffer(&BufferCreateInfo {
                size,
                usage: BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
                memory,
                name: "test",
            })
            .unwrap()
    }

    fn submit(backend: &mut HeadlessBackend, cmd: NativeCommandBuffer, fence: Option<NativeFence>) {
        backend
            .submit(
                QueueKind::Graphics,
                &SubmitDesc {
                    command_buffers: &[cmd],
                    waits: &[],
                    signals: &[],
                    fence,
                },
            )
            .unwrap();
    }

    #[test]
    fn test_copies_execute_at_submit() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let probe = backend.probe();
        let src = buffer(&mut backend, 16, MemoryClass::HostOnly);
        let dst = buffer(&mut backend, 16, MemoryClass::DeviceLocal);
        assert!(dst.mapped.is_none());

        // SAFETY: 映射覆盖 16 字节
        unsafe { std::ptr::copy_nonoverlapping([9u8, 8, 7, 6].as_ptr(), src.mapped.unwrap().as_ptr(), 4) };

        let cmd = backend.create_command_buffer(QueueKind::Graphics).unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        backend.cmd_copy_buffer(
            cmd,
            src.buffer,
            dst.buffer,
            &[BufferCopy {
                src_offset: 0,
                dst_offset: 8,
                size: 4,
            }],
        );
        backend.end_command_buffer(cmd).unwrap();
        assert_eq!(probe.read_buffer(dst.buffer, 8, 4), vec![0, 0, 0, 0]);

        submit(&mut backend, cmd, None);
        assert_eq!(probe.read_buffer(dst.buffer, 8, 4), vec![9, 8, 7, 6]);
        assert!(probe.violations().is_empty());
    }

    #[test]
    fn test_premature_destruction_is_a_violation() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let probe = backend.probe();
        let vb = buffer(&mut backend, 64, MemoryClass::DeviceLocal);
        let fence = backend.create_fence(false).unwrap();

        let cmd = backend.create_command_buffer(QueueKind::Graphics).unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        backend.cmd_bind_vertex_buffers(cmd, 0, &[vb.buffer], &[0]);
        backend.end_command_buffer(cmd).unwrap();
        submit(&mut backend, cmd, Some(fence));

        backend.destroy_buffer(vb.buffer);
        let violations = probe.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("premature destruction"), "{violations:?}");

        // fence 等待之后引用被释放
        backend.wait_fence(fence).unwrap();
        backend.free_memory(vb.memory);
        assert_eq!(probe.violations().len(), 1);
        assert_eq!(probe.pending_submissions(), 0);
    }

    #[test]
    fn test_double_destroy_and_pending_begin_are_violations() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let probe = backend.probe();

        let sampler = backend.create_sampler(&SamplerDesc::default()).unwrap();
        backend.destroy_sampler(sampler);
        backend.destroy_sampler(sampler);
        assert_eq!(probe.violations().len(), 1);

        let cmd = backend.create_command_buffer(QueueKind::Graphics).unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        backend.end_command_buffer(cmd).unwrap();
        submit(&mut backend, cmd, None);
        backend.begin_command_buffer(cmd).unwrap();
        assert_eq!(probe.violations().len(), 2);
    }

    #[test]
    fn test_binary_semaphore_rules() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let probe = backend.probe();
        let semaphore = backend.create_semaphore().unwrap();

        let AcquireResult::Acquired { index, .. } = backend.acquire_next_image(semaphore).unwrap() else {
            panic!("swapchain should not be out of date");
        };
        assert_eq!(index, 0);

        let cmd = backend.create_command_buffer(QueueKind::Graphics).unwrap();
        backend.begin_command_buffer(cmd).unwrap();
        backend.end_command_buffer(cmd).unwrap();
        backend
            .submit(
                QueueKind::Graphics,
                &SubmitDesc {
                    command_buffers: &[cmd],
                    waits: &[(semaphore, PipelineStages::COLOR_OUTPUT)],
                    signals: &[],
                    fence: None,
                },
            )
            .unwrap();
        assert_eq!(probe.semaphore_waits(), 1);
        assert!(probe.violations().is_empty());

        // 没有 signal 的 wait
        backend.present(0, semaphore).unwrap();
        assert_eq!(probe.violations().len(), 1);
    }

    #[test]
    fn test_out_of_date_until_recreated() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default().with_swapchain_images(2));
        let probe = backend.probe();
        let semaphore = backend.create_semaphore().unwrap();
        let old_images = backend.swapchain_info().images;

        probe.resize(640, 480);
        assert_eq!(backend.acquire_next_image(semaphore).unwrap(), AcquireResult::OutOfDate);

        backend.recreate_swapchain(0).unwrap();
        let info = backend.swapchain_info();
        assert_eq!((info.width, info.height), (640, 480));
        assert_eq!(info.images.len(), 2);
        assert_ne!(info.images, old_images);
        assert!(matches!(
            backend.acquire_next_image(semaphore).unwrap(),
            AcquireResult::Acquired { index: 0, .. }
        ));
        assert_eq!(probe.swapchain_rebuilds(), 1);
        assert!(probe.violations().is_empty());
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let layout = backend.create_descriptor_set_layout(&BindingLayout::default()).unwrap();
        let pool = backend.create_descriptor_pool(4).unwrap();

        let mut sets = Vec::new();
        backend.allocate_descriptor_sets(pool, layout, 3, &mut sets).unwrap();
        let err = backend.allocate_descriptor_sets(pool, layout, 2, &mut sets).unwrap_err();
        assert!(matches!(err, GfxError::OutOfPoolMemory));
        assert_eq!(sets.len(), 3);

        backend.reset_descriptor_pool(pool);
        backend.allocate_descriptor_sets(pool, layout, 4, &mut sets).unwrap();
        assert_eq!(backend.probe().live(ObjectKind::DescriptorSet), 4);
    }
}
