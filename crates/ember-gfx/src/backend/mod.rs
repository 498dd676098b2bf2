//! 原生图形 API 的边界
//!
//! core 中的所有逻辑只通过 [`RhiBackend`] 访问 GPU，目前有两个实现：
//! - [`vulkan::VulkanBackend`]：基于 ash 的 Vulkan 实现
//! - [`headless::HeadlessBackend`]：纯内存的实现，用于测试以及没有 GPU 的环境

pub mod headless;
pub mod memory;
pub mod types;
pub mod vulkan;

use glam::UVec3;

pub use types::*;

use crate::cache::RenderPassKey;
use crate::desc::{BindingLayout, Format, QueueKind, Rect, SamplerDesc, ShaderDesc, Viewport};
use crate::error::GfxResult;
use crate::stats::DeviceCaps;

/// 对原生图形 API 的抽象
///
/// 创建类的调用返回 [`GfxResult`]，由调用方决定如何处理失败；
/// 录制类的调用（`cmd_*`）不会失败。
pub trait RhiBackend {
    fn caps(&self) -> DeviceCaps;

    // buffer & memory
    fn create_buffer(&mut self, info: &BufferCreateInfo) -> GfxResult<BufferAllocation>;
    fn destroy_buffer(&mut self, buffer: NativeBuffer);
    fn free_memory(&mut self, memory: NativeMemory);
    /// 让 CPU 可以看到 GPU 写入的数据，用于非 coherent 的 cached 内存
    fn invalidate_memory(&mut self, memory: NativeMemory);
    fn create_buffer_view(
        &mut self,
        buffer: NativeBuffer,
        format: Format,
        offset: u64,
        range: u64,
    ) -> GfxResult<NativeBufferView>;
    fn destroy_buffer_view(&mut self, view: NativeBufferView);

    // image
    fn create_image(&mut self, info: &ImageCreateInfo) -> GfxResult<ImageAllocation>;
    fn destroy_image(&mut self, image: NativeImage);
    /// 覆盖整张 image 的 view
    fn create_image_view(&mut self, image: NativeImage, info: &ImageCreateInfo) -> GfxResult<NativeImageView>;
    fn destroy_image_view(&mut self, view: NativeImageView);
    fn create_sampler(&mut self, desc: &SamplerDesc) -> GfxResult<NativeSampler>;
    fn destroy_sampler(&mut self, sampler: NativeSampler);

    // program
    fn create_shader_module(&mut self, desc: &ShaderDesc) -> GfxResult<NativeShaderModule>;
    fn destroy_shader_module(&mut self, module: NativeShaderModule);
    fn create_descriptor_set_layout(&mut self, layout: &BindingLayout) -> GfxResult<NativeDescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&mut self, layout: NativeDescriptorSetLayout);
    fn create_pipeline_layout(
        &mut self,
        set_layout: NativeDescriptorSetLayout,
        push_constant_size: u32,
    ) -> GfxResult<NativePipelineLayout>;
    fn destroy_pipeline_layout(&mut self, layout: NativePipelineLayout);
    fn create_graphics_pipeline(&mut self, info: &GraphicsPipelineInfo) -> GfxResult<NativePipeline>;
    fn create_compute_pipeline(
        &mut self,
        layout: NativePipelineLayout,
        stage: &ShaderStageInfo,
    ) -> GfxResult<NativePipeline>;
    fn destroy_pipeline(&mut self, pipeline: NativePipeline);
    fn create_render_pass(&mut self, key: &RenderPassKey) -> GfxResult<NativeRenderPass>;
    fn destroy_render_pass(&mut self, render_pass: NativeRenderPass);
    fn create_framebuffer(
        &mut self,
        render_pass: NativeRenderPass,
        attachments: &[NativeImageView],
        width: u32,
        height: u32,
    ) -> GfxResult<NativeFramebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: NativeFramebuffer);

    // descriptor
    fn create_descriptor_pool(&mut self, max_sets: u32) -> GfxResult<NativeDescriptorPool>;
    fn reset_descriptor_pool(&mut self, pool: NativeDescriptorPool);
    fn destroy_descriptor_pool(&mut self, pool: NativeDescriptorPool);
    /// pool 用尽时返回 [`crate::error::GfxError::OutOfPoolMemory`]
    fn allocate_descriptor_sets(
        &mut self,
        pool: NativeDescriptorPool,
        layout: NativeDescriptorSetLayout,
        count: u32,
        out: &mut Vec<NativeDescriptorSet>,
    ) -> GfxResult<()>;
    fn write_descriptor_set(&mut self, set: NativeDescriptorSet, writes: &[DescriptorWrite]);

    // command buffer
    fn create_command_buffer(&mut self, queue: QueueKind) -> GfxResult<NativeCommandBuffer>;
    fn destroy_command_buffer(&mut self, cmd: NativeCommandBuffer);
    /// 开始录制，隐式地 reset 之前的内容
    fn begin_command_buffer(&mut self, cmd: NativeCommandBuffer) -> GfxResult<()>;
    fn end_command_buffer(&mut self, cmd: NativeCommandBuffer) -> GfxResult<()>;

    fn cmd_begin_render_pass(&mut self, cmd: NativeCommandBuffer, info: &RenderPassBeginInfo);
    fn cmd_end_render_pass(&mut self, cmd: NativeCommandBuffer);
    fn cmd_set_viewport(&mut self, cmd: NativeCommandBuffer, viewport: &Viewport);
    fn cmd_set_scissor(&mut self, cmd: NativeCommandBuffer, scissor: &Rect);
    fn cmd_bind_pipeline(&mut self, cmd: NativeCommandBuffer, bind_point: PipelineBindPoint, pipeline: NativePipeline);
    fn cmd_bind_vertex_buffers(
        &mut self,
        cmd: NativeCommandBuffer,
        first_binding: u32,
        buffers: &[NativeBuffer],
        offsets: &[u64],
    );
    fn cmd_bind_index_buffer(&mut self, cmd: NativeCommandBuffer, buffer: NativeBuffer, offset: u64, index_type: IndexType);
    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: NativeCommandBuffer,
        bind_point: PipelineBindPoint,
        layout: NativePipelineLayout,
        set: NativeDescriptorSet,
        dynamic_offsets: &[u32],
    );
    fn cmd_push_constants(&mut self, cmd: NativeCommandBuffer, layout: NativePipelineLayout, offset: u32, data: &[u8]);
    fn cmd_draw(
        &mut self,
        cmd: NativeCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &mut self,
        cmd: NativeCommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_draw_indexed_indirect(
        &mut self,
        cmd: NativeCommandBuffer,
        buffer: NativeBuffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    );
    fn cmd_dispatch(&mut self, cmd: NativeCommandBuffer, groups: UVec3);
    fn cmd_dispatch_indirect(&mut self, cmd: NativeCommandBuffer, buffer: NativeBuffer, offset: u64);
    fn cmd_pipeline_barrier(&mut self, cmd: NativeCommandBuffer, batch: &BarrierBatch);
    fn cmd_copy_buffer(&mut self, cmd: NativeCommandBuffer, src: NativeBuffer, dst: NativeBuffer, regions: &[BufferCopy]);
    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: NativeCommandBuffer,
        src: NativeBuffer,
        dst: NativeImage,
        regions: &[BufferImageCopy],
    );
    fn cmd_copy_image_to_buffer(
        &mut self,
        cmd: NativeCommandBuffer,
        src: NativeImage,
        dst: NativeBuffer,
        regions: &[BufferImageCopy],
    );
    fn cmd_begin_label(&mut self, cmd: NativeCommandBuffer, name: &str, color: glam::Vec4);
    fn cmd_end_label(&mut self, cmd: NativeCommandBuffer);
    fn cmd_insert_label(&mut self, cmd: NativeCommandBuffer, name: &str, color: glam::Vec4);
    fn cmd_write_timestamp(&mut self, cmd: NativeCommandBuffer, pool: NativeQueryPool, query: u32);

    // synchronization
    fn create_fence(&mut self, signaled: bool) -> GfxResult<NativeFence>;
    fn destroy_fence(&mut self, fence: NativeFence);
    fn wait_fence(&mut self, fence: NativeFence) -> GfxResult<()>;
    fn reset_fence(&mut self, fence: NativeFence) -> GfxResult<()>;
    fn create_semaphore(&mut self) -> GfxResult<NativeSemaphore>;
    fn destroy_semaphore(&mut self, semaphore: NativeSemaphore);
    fn submit(&mut self, queue: QueueKind, desc: &SubmitDesc) -> GfxResult<()>;
    fn wait_idle(&mut self) -> GfxResult<()>;

    // query
    fn create_query_pool(&mut self, count: u32) -> GfxResult<NativeQueryPool>;
    /// 在 host 端 reset，调用前必须确认 GPU 已经不再使用这些 query
    fn reset_query_pool(&mut self, pool: NativeQueryPool, first: u32, count: u32);
    fn destroy_query_pool(&mut self, pool: NativeQueryPool);
    /// 读取 timestamp 的原始 tick 值
    fn query_timestamps(&mut self, pool: NativeQueryPool, first: u32, out: &mut [u64]) -> GfxResult<()>;

    // swapchain
    fn swapchain_info(&self) -> SwapchainInfo;
    fn acquire_next_image(&mut self, signal: NativeSemaphore) -> GfxResult<AcquireResult>;
    fn present(&mut self, image_index: u32, wait: NativeSemaphore) -> GfxResult<PresentResult>;
    /// 重建 swapchain，之前通过 [`RhiBackend::swapchain_info`] 得到的 image 全部失效
    fn recreate_swapchain(&mut self, present_interval: u32) -> GfxResult<()>;
}
