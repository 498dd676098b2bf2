use std::ptr::NonNull;

use crate::backend::{
    NativeBuffer, NativeBufferView, NativeDescriptorSetLayout, NativeFramebuffer, NativeImage, NativeImageView,
    NativeMemory, NativePipeline, NativePipelineLayout, NativeRenderPass, NativeSampler, NativeShaderModule,
};
use crate::cache::{FramebufferKey, ObjectCache, PipelineKey, RenderPassKey};
use crate::commands::barrier::ResourceState;
use crate::desc::{
    BindingLayout, BlendDesc, BufferDesc, BufferFlags, DepthStencilDesc, RasterizerDesc, SamplerDesc, ShaderStage,
    TextureDesc, VertexFormatDesc,
};
use crate::frame::allocator::FrameAllocation;
use crate::frame::destroy_queue::DestroyQueue;
use crate::handles::{
    BlendState, Buffer, DepthStencilState, Handle, HandlePool, RasterizerState, Ref, RefTracker, ResourceKind,
    Sampler, Shader, Technique, Texture, VertexFormat,
};

/// buffer 当前绑定的原生存储
///
/// transient buffer 每次更新都会改变绑定（renaming），其余 buffer 的绑定在创建后不变。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBinding {
    pub buffer: NativeBuffer,
    pub offset: u64,
    pub mapped: Option<NonNull<u8>>,
}

impl BufferBinding {
    pub const NONE: Self = Self {
        buffer: NativeBuffer::null(),
        offset: 0,
        mapped: None,
    };
}

/// `begin_update_buffer` 与 `end_update_buffer` 之间的暂存区
#[derive(Clone, Copy, Debug)]
pub struct PendingUpdate {
    pub staging: FrameAllocation,
    /// 调用者要写入的字节数，从 staging 的开头算起
    pub written: u64,
    /// constant buffer 直接写入 host visible 内存，不需要拷贝
    pub direct: bool,
}

pub struct BufferRecord {
    pub desc: BufferDesc,
    /// 独占的存储，纯 transient buffer 没有
    pub storage: Option<(NativeBuffer, NativeMemory)>,
    pub view: NativeBufferView,
    pub binding: BufferBinding,
    pub state: ResourceState,
    /// transient buffer 最近一次更新所在的帧
    pub last_update_frame: Option<u64>,
    pub pending_update: Option<PendingUpdate>,
    pub mapped_by_user: bool,
}

impl BufferRecord {
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.desc.flags.contains(BufferFlags::TRANSIENT)
    }

    fn enqueue_destroy(&self, queue: &mut DestroyQueue) {
        if !self.view.is_null() {
            queue.enqueue_buffer_view(self.view);
        }
        if let Some((buffer, memory)) = self.storage {
            queue.enqueue_buffer(buffer);
            queue.enqueue_memory(memory);
        }
    }
}

pub struct TextureRecord {
    pub desc: TextureDesc,
    pub image: NativeImage,
    /// swapchain 的 image 不属于 texture，memory 为空
    pub memory: NativeMemory,
    pub view: NativeImageView,
    pub state: ResourceState,
}

impl TextureRecord {
    #[inline]
    pub fn is_backbuffer(&self) -> bool {
        self.memory.is_null()
    }

    fn enqueue_destroy(&self, queue: &mut DestroyQueue) {
        queue.enqueue_image_view(self.view);
        if !self.is_backbuffer() {
            queue.enqueue_image(self.image);
            queue.enqueue_memory(self.memory);
        }
    }
}

pub struct SamplerRecord {
    pub desc: SamplerDesc,
    pub native: NativeSampler,
}

pub struct ShaderRecord {
    pub stage: ShaderStage,
    pub module: NativeShaderModule,
    pub entry_point: String,
}

pub struct TechniqueRecord {
    pub shaders: Vec<Ref<Shader>>,
    pub vertex_format: Ref<VertexFormat>,
    pub layout: BindingLayout,
    pub set_layout: NativeDescriptorSetLayout,
    pub pipeline_layout: NativePipelineLayout,
    pub is_compute: bool,
}

/// 所有资源的 pool
#[derive(Default)]
pub struct Resources {
    pub buffers: HandlePool<Buffer, BufferRecord>,
    pub textures: HandlePool<Texture, TextureRecord>,
    pub samplers: HandlePool<Sampler, SamplerRecord>,
    pub shaders: HandlePool<Shader, ShaderRecord>,
    pub techniques: HandlePool<Technique, TechniqueRecord>,
    pub vertex_formats: HandlePool<VertexFormat, VertexFormatDesc>,
    pub blend_states: HandlePool<BlendState, BlendDesc>,
    pub depth_stencil_states: HandlePool<DepthStencilState, DepthStencilDesc>,
    pub rasterizer_states: HandlePool<RasterizerState, RasterizerDesc>,
}

/// 按照 key 缓存的原生对象
#[derive(Default)]
pub struct Caches {
    pub render_passes: ObjectCache<RenderPassKey, NativeRenderPass>,
    pub framebuffers: ObjectCache<FramebufferKey, NativeFramebuffer>,
    pub pipelines: ObjectCache<PipelineKey, NativePipeline>,
}

// 资源释放
impl Resources {
    /// 移除一个计数已经归零的资源，原生对象进入 `queue`
    ///
    /// technique 持有的 shader 引用在这里被释放，可能让更多的资源进入 released 队列。
    pub fn remove(
        &mut self,
        kind: ResourceKind,
        index: u32,
        caches: &mut Caches,
        queue: &mut DestroyQueue,
    ) {
        match kind {
            ResourceKind::Buffer => {
                if let Some(record) = self.buffers.remove(Handle::from_index(index)) {
                    record.enqueue_destroy(queue);
                }
            }
            ResourceKind::Texture => {
                if let Some(record) = self.textures.remove(Handle::from_index(index)) {
                    record.enqueue_destroy(queue);
                }
                caches
                    .framebuffers
                    .purge(|key| key.references_texture(index), |fb| queue.enqueue_framebuffer(fb));
            }
            ResourceKind::Sampler => {
                if let Some(record) = self.samplers.remove(Handle::from_index(index)) {
                    queue.enqueue_sampler(record.native);
                }
            }
            ResourceKind::Shader => {
                if let Some(record) = self.shaders.remove(Handle::from_index(index)) {
                    queue.enqueue_shader_module(record.module);
                }
            }
            ResourceKind::Technique => {
                if let Some(record) = self.techniques.remove(Handle::from_index(index)) {
                    queue.enqueue_pipeline_layout(record.pipeline_layout);
                    queue.enqueue_set_layout(record.set_layout);
                    // 在这里 drop 掉 shader 与 vertex format 的引用
                    drop(record);
                }
            }
            ResourceKind::VertexFormat => {
                self.vertex_formats.remove(Handle::from_index(index));
            }
            ResourceKind::BlendState => {
                self.blend_states.remove(Handle::from_index(index));
            }
            ResourceKind::DepthStencilState => {
                self.depth_stencil_states.remove(Handle::from_index(index));
            }
            ResourceKind::RasterizerState => {
                self.rasterizer_states.remove(Handle::from_index(index));
            }
        }

        if matches!(
            kind,
            ResourceKind::Technique
                | ResourceKind::BlendState
                | ResourceKind::DepthStencilState
                | ResourceKind::RasterizerState
        ) {
            caches
                .pipelines
                .purge(|key| key.references(kind, index), |p| queue.enqueue_pipeline(p));
        }
    }
}

impl Resources {
    /// 回收所有计数归零的资源，返回回收的数量
    ///
    /// 移除 technique 会释放它持有的 shader 引用，所以循环直到没有新的释放。
    pub fn drain_released(&mut self, tracker: &RefTracker, caches: &mut Caches, queue: &mut DestroyQueue) -> usize {
        let mut count = 0;
        while tracker.has_released() {
            for (kind, index) in tracker.take_released() {
                self.remove(kind, index, caches, queue);
                count += 1;
            }
        }
        count
    }

    /// 不论引用计数，移除所有的资源，只在 device 销毁时使用
    pub fn drain_all(&mut self, queue: &mut DestroyQueue) {
        self.buffers.drain().for_each(|(_, record)| record.enqueue_destroy(queue));
        self.textures.drain().for_each(|(_, record)| record.enqueue_destroy(queue));
        self.samplers.drain().for_each(|(_, record)| queue.enqueue_sampler(record.native));
        for (_, record) in self.techniques.drain() {
            queue.enqueue_pipeline_layout(record.pipeline_layout);
            queue.enqueue_set_layout(record.set_layout);
        }
        self.shaders.drain().for_each(|(_, record)| queue.enqueue_shader_module(record.module));
        self.vertex_formats.drain().for_each(drop);
        self.blend_states.drain().for_each(drop);
        self.depth_stencil_states.drain().for_each(drop);
        self.rasterizer_states.drain().for_each(drop);
    }
}

impl Caches {
    /// 所有缓存的原生对象进入 `queue`
    pub fn drain_all(&mut self, queue: &mut DestroyQueue) {
        self.framebuffers.drain().for_each(|(_, fb)| queue.enqueue_framebuffer(fb));
        self.pipelines.drain().for_each(|(_, pipeline)| queue.enqueue_pipeline(pipeline));
        self.render_passes.drain().for_each(|(_, rp)| queue.enqueue_render_pass(rp));
    }
}
