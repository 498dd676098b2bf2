use crate::backend::{
    NativeBuffer, NativeBufferView, NativeCommandBuffer, NativeDescriptorSetLayout, NativeFramebuffer, NativeImage,
    NativeImageView, NativeMemory, NativePipeline, NativePipelineLayout, NativeRenderPass, NativeSampler,
    NativeShaderModule, RhiBackend,
};
use crate::desc::QueueKind;

/// 延迟销毁队列
///
/// 每个 frame slot 一个。对象在"最后一次使用"之后立即入队，
/// 只有在该 slot 的 fence 被等待之后（即 N 帧之后）才会 [`DestroyQueue::flush`]。
#[derive(Default)]
pub struct DestroyQueue {
    memories: Vec<NativeMemory>,
    buffers: Vec<NativeBuffer>,
    images: Vec<NativeImage>,
    image_views: Vec<NativeImageView>,
    buffer_views: Vec<NativeBufferView>,
    samplers: Vec<NativeSampler>,
    /// 已经提交过的 command buffer，flush 之后交还给调用者回收
    contexts: Vec<(QueueKind, NativeCommandBuffer)>,

    pipelines: Vec<NativePipeline>,
    framebuffers: Vec<NativeFramebuffer>,
    render_passes: Vec<NativeRenderPass>,
    shader_modules: Vec<NativeShaderModule>,
    pipeline_layouts: Vec<NativePipelineLayout>,
    set_layouts: Vec<NativeDescriptorSetLayout>,
}

// enqueue
impl DestroyQueue {
    #[inline]
    pub fn enqueue_memory(&mut self, memory: NativeMemory) {
        self.memories.push(memory);
    }
    #[inline]
    pub fn enqueue_buffer(&mut self, buffer: NativeBuffer) {
        self.buffers.push(buffer);
    }
    #[inline]
    pub fn enqueue_image(&mut self, image: NativeImage) {
        self.images.push(image);
    }
    #[inline]
    pub fn enqueue_image_view(&mut self, view: NativeImageView) {
        self.image_views.push(view);
    }
    #[inline]
    pub fn enqueue_buffer_view(&mut self, view: NativeBufferView) {
        self.buffer_views.push(view);
    }
    #[inline]
    pub fn enqueue_sampler(&mut self, sampler: NativeSampler) {
        self.samplers.push(sampler);
    }
    #[inline]
    pub fn enqueue_context(&mut self, queue: QueueKind, cmd: NativeCommandBuffer) {
        self.contexts.push((queue, cmd));
    }
    #[inline]
    pub fn enqueue_pipeline(&mut self, pipeline: NativePipeline) {
        self.pipelines.push(pipeline);
    }
    #[inline]
    pub fn enqueue_framebuffer(&mut self, framebuffer: NativeFramebuffer) {
        self.framebuffers.push(framebuffer);
    }
    #[inline]
    pub fn enqueue_render_pass(&mut self, render_pass: NativeRenderPass) {
        self.render_passes.push(render_pass);
    }
    #[inline]
    pub fn enqueue_shader_module(&mut self, module: NativeShaderModule) {
        self.shader_modules.push(module);
    }
    #[inline]
    pub fn enqueue_pipeline_layout(&mut self, layout: NativePipelineLayout) {
        self.pipeline_layouts.push(layout);
    }
    #[inline]
    pub fn enqueue_set_layout(&mut self, layout: NativeDescriptorSetLayout) {
        self.set_layouts.push(layout);
    }
}

// flush
impl DestroyQueue {
    /// 队列中等待销毁的原生对象数量（不包括待回收的 command buffer）
    pub fn pending(&self) -> usize {
        self.memories.len()
            + self.buffers.len()
            + self.images.len()
            + self.image_views.len()
            + self.buffer_views.len()
            + self.samplers.len()
            + self.pipelines.len()
            + self.framebuffers.len()
            + self.render_passes.len()
            + self.shader_modules.len()
            + self.pipeline_layouts.len()
            + self.set_layouts.len()
    }

    /// 销毁队列中的所有对象，返回销毁的数量
    ///
    /// 调用者必须保证 GPU 已经执行完了所有可能引用这些对象的命令。
    /// 队列中的 command buffer 不会被销毁，而是放入 `recycled` 中供复用。
    pub fn flush(
        &mut self,
        backend: &mut dyn RhiBackend,
        recycled: &mut Vec<(QueueKind, NativeCommandBuffer)>,
    ) -> usize {
        let _span = tracy_client::span!("DestroyQueue::flush");

        let count = self.pending();
        if count > 0 {
            log::debug!("flush destroy queue: {count} objects");
        }

        // 先销毁引用其他对象的对象
        self.framebuffers.drain(..).for_each(|o| backend.destroy_framebuffer(o));
        self.pipelines.drain(..).for_each(|o| backend.destroy_pipeline(o));
        self.pipeline_layouts.drain(..).for_each(|o| backend.destroy_pipeline_layout(o));
        self.set_layouts.drain(..).for_each(|o| backend.destroy_descriptor_set_layout(o));
        self.render_passes.drain(..).for_each(|o| backend.destroy_render_pass(o));
        self.shader_modules.drain(..).for_each(|o| backend.destroy_shader_module(o));
        self.image_views.drain(..).for_each(|o| backend.destroy_image_view(o));
        self.buffer_views.drain(..).for_each(|o| backend.destroy_buffer_view(o));
        self.samplers.drain(..).for_each(|o| backend.destroy_sampler(o));
        self.images.drain(..).for_each(|o| backend.destroy_image(o));
        self.buffers.drain(..).for_each(|o| backend.destroy_buffer(o));
        self.memories.drain(..).for_each(|o| backend.free_memory(o));

        recycled.append(&mut self.contexts);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig};
    use crate::backend::memory::MemoryClass;
    use crate::backend::{BufferCreateInfo, BufferUsage};

    #[test]
    fn test_flush_destroys_everything_and_recycles_contexts() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let probe = backend.probe();

        let buffer = backend
            .create_buffer(&BufferCreateInfo {
                size: 64,
                usage: BufferUsage::VERTEX,
                memory: MemoryClass::DeviceLocal,
                name: "test",
            })
            .unwrap();
        let cmd = backend.create_command_buffer(QueueKind::Graphics).unwrap();

        let mut queue = DestroyQueue::default();
        queue.enqueue_buffer(buffer.buffer);
        queue.enqueue_memory(buffer.memory);
        queue.enqueue_context(QueueKind::Graphics, cmd);
        assert_eq!(queue.pending(), 2);
        assert_eq!(probe.live_buffers(), 1);

        let mut recycled = Vec::new();
        assert_eq!(queue.flush(&mut backend, &mut recycled), 2);
        assert_eq!(recycled, vec![(QueueKind::Graphics, cmd)]);
        assert_eq!(queue.pending(), 0);
        assert_eq!(probe.live_buffers(), 0);
        assert!(probe.violations().is_empty());
    }
}
