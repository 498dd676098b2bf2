//! 基于 ash 的 Vulkan backend
//!
//! - [`core`]：instance、debug messenger、physical device 与 device
//! - [`swapchain`]：窗口 swapchain 以及没有窗口时的离屏 image 环
//! - [`pipeline`]：render pass、descriptor set layout 与 pipeline 的创建
//! - [`convert`]：中立类型到 vk 类型的转换
//!
//! 每个 buffer / image 独占一块 `vk::DeviceMemory`，子分配由 frame allocator 在 core 中完成。

pub mod convert;
pub mod core;
pub mod pipeline;
pub mod swapchain;

use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::ptr::NonNull;

use ash::vk;
use ash::vk::Handle;
use glam::{UVec3, Vec4};
use itertools::Itertools;

use crate::backend::memory::{MemoryClass, MemoryProperties};
use crate::backend::vulkan::core::{vk_err, VkCore};
use crate::backend::vulkan::swapchain::{OffscreenRing, Presenter, WindowHandles, WindowSwapchain};
use crate::backend::{
    AcquireResult, BarrierBatch, BufferAllocation, BufferCopy, BufferCreateInfo, BufferImageCopy, ClearValue,
    DescriptorWrite, GraphicsPipelineInfo, ImageAllocation, ImageCreateInfo, IndexType, NativeBuffer,
    NativeBufferView, NativeCommandBuffer, NativeDescriptorPool, NativeDescriptorSet, NativeDescriptorSetLayout,
    NativeFence, NativeFramebuffer, NativeImage, NativeImageView, NativeMemory, NativePipeline,
    NativePipelineLayout, NativeQueryPool, NativeRenderPass, NativeSampler, NativeSemaphore, NativeShaderModule,
    PipelineBindPoint, PresentResult, RenderPassBeginInfo, RhiBackend, ShaderStageInfo, SubmitDesc, SwapchainInfo,
};
use crate::cache::RenderPassKey;
use crate::config::DeviceConfig;
use crate::desc::{BindingLayout, Format, QueueKind, Rect, SamplerDesc, ShaderCode, ShaderDesc, Viewport};
use crate::error::{GfxError, GfxResult};
use crate::stats::DeviceCaps;

/// 没有窗口时离屏 image 环的大小
const OFFSCREEN_IMAGE_COUNT: u32 = 3;
/// 每个 descriptor pool 中，每种 descriptor 相对于 set 数量的倍数
const DESCRIPTORS_PER_SET: u32 = 8;

/// 原生句柄到 vk 句柄
#[inline]
fn vkh<H: vk::Handle>(raw: u64) -> H {
    H::from_raw(raw)
}

#[inline]
fn bind_point(bind_point: PipelineBindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

pub struct VulkanBackend {
    core: VkCore,
    presenter: Option<Presenter>,

    command_pools: [vk::CommandPool; QueueKind::COUNT],
    /// command buffer 来自哪个队列的 pool
    command_buffer_queues: HashMap<vk::CommandBuffer, QueueKind>,
    /// 拷贝时需要知道 image 的 aspect
    image_formats: HashMap<vk::Image, Format>,
    /// 需要显式 invalidate 的内存
    non_coherent: HashSet<vk::DeviceMemory>,

    caps: DeviceCaps,
}

// new & init
impl VulkanBackend {
    /// `window` 为 None 时使用离屏的 image 环代替 swapchain
    pub fn new(config: &DeviceConfig, window: Option<WindowHandles>) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanBackend::new");
        let core = VkCore::new(config, window.map(|w| w.display))?;

        let limits = &core.props.limits;
        let device_name = unsafe { std::ffi::CStr::from_ptr(core.props.device_name.as_ptr()) };
        let caps = DeviceCaps {
            api_name: "vulkan",
            device_name: device_name.to_string_lossy().into_owned(),
            min_constant_buffer_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_alignment: limits.min_storage_buffer_offset_alignment,
            max_texture_size: limits.max_image_dimension2_d,
            timestamp_period_ns: limits.timestamp_period,
            distinct_compute_queue: core.queue(QueueKind::Compute).dedicated,
            distinct_transfer_queue: core.queue(QueueKind::Transfer).dedicated,
        };

        let mut backend = Self {
            core,
            presenter: None,
            command_pools: [vk::CommandPool::null(); QueueKind::COUNT],
            command_buffer_queues: HashMap::new(),
            image_formats: HashMap::new(),
            non_coherent: HashSet::new(),
            caps,
        };

        // 出错时 backend 的 drop 负责清理已经创建的对象
        for kind in [QueueKind::Graphics, QueueKind::Compute, QueueKind::Transfer] {
            let create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(backend.core.queue(kind).family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            backend.command_pools[kind.index()] = unsafe { backend.core.device.create_command_pool(&create_info, None) }
                .map_err(vk_err("vkCreateCommandPool"))?;
        }

        let extent = vk::Extent2D {
            width: config.window_extent.x,
            height: config.window_extent.y,
        };
        let presenter = match window {
            Some(handles) => Presenter::Window(WindowSwapchain::new(
                &backend.core,
                handles,
                extent,
                config.present_interval,
            )?),
            None => Presenter::Offscreen(OffscreenRing::new(
                &backend.core,
                OFFSCREEN_IMAGE_COUNT,
                Format::Bgra8Unorm,
                extent,
            )?),
        };
        backend.presenter = Some(presenter);
        backend.register_presenter_images();

        log::info!("vulkan backend ready: {}", backend.caps.device_name);
        Ok(backend)
    }

    fn register_presenter_images(&mut self) {
        let info = self.swapchain_info();
        for image in info.images {
            self.image_formats.insert(vkh(image.raw()), info.format);
        }
    }
}

// tools
impl VulkanBackend {
    #[inline]
    fn device(&self) -> &ash::Device {
        &self.core.device
    }

    #[inline]
    fn queue(&self, kind: QueueKind) -> vk::Queue {
        self.core.queue(kind).handle
    }

    #[inline]
    fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.core.debug_device.as_ref()
    }

    /// 拷贝只访问 depth（或 color）aspect
    fn copy_aspect(&self, image: vk::Image) -> vk::ImageAspectFlags {
        match self.image_formats.get(&image) {
            Some(format) if format.is_depth() => vk::ImageAspectFlags::DEPTH,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    fn buffer_image_copies(&self, image: vk::Image, regions: &[BufferImageCopy]) -> Vec<vk::BufferImageCopy> {
        let aspect_mask = self.copy_aspect(image);
        regions
            .iter()
            .map(|r| vk::BufferImageCopy {
                buffer_offset: r.buffer_offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask,
                    mip_level: r.mip_level,
                    base_array_layer: r.base_layer,
                    layer_count: r.layer_count,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: r.width,
                    height: r.height,
                    depth: r.depth,
                },
            })
            .collect()
    }

    fn label(name: &str, color: Vec4) -> (CString, [f32; 4]) {
        (CString::new(name).unwrap_or_default(), color.to_array())
    }
}

impl RhiBackend for VulkanBackend {
    fn caps(&self) -> DeviceCaps {
        self.caps.clone()
    }

    // buffer & memory
    fn create_buffer(&mut self, info: &BufferCreateInfo) -> GfxResult<BufferAllocation> {
        let create_info = vk::BufferCreateInfo::default()
            .size(info.size)
            .usage(convert::buffer_usage(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device().create_buffer(&create_info, None) }.map_err(vk_err("vkCreateBuffer"))?;

        let requirements = unsafe { self.device().get_buffer_memory_requirements(buffer) };
        let (memory, props) = match self.core.allocate_memory(requirements, info.memory) {
            Ok(allocated) => allocated,
            Err(e) => {
                unsafe { self.device().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        unsafe { self.device().bind_buffer_memory(buffer, memory, 0) }.map_err(vk_err("vkBindBufferMemory"))?;

        let mapped = if props.contains(MemoryProperties::HOST_VISIBLE) {
            let ptr = unsafe {
                self.device()
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(vk_err("vkMapMemory"))?;
            if !props.contains(MemoryProperties::HOST_COHERENT) {
                self.non_coherent.insert(memory);
            }
            NonNull::new(ptr.cast::<u8>())
        } else {
            None
        };
        if !info.name.is_empty() {
            self.core.set_debug_name(buffer, info.name);
        }

        Ok(BufferAllocation {
            buffer: NativeBuffer::from_raw(buffer.as_raw()),
            memory: NativeMemory::from_raw(memory.as_raw()),
            size: info.size,
            mapped,
        })
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        unsafe { self.device().destroy_buffer(vkh(buffer.raw()), None) };
    }

    fn free_memory(&mut self, memory: NativeMemory) {
        let memory: vk::DeviceMemory = vkh(memory.raw());
        self.non_coherent.remove(&memory);
        // 释放内存时隐式 unmap
        unsafe { self.device().free_memory(memory, None) };
    }

    fn invalidate_memory(&mut self, memory: NativeMemory) {
        let memory: vk::DeviceMemory = vkh(memory.raw());
        if !self.non_coherent.contains(&memory) {
            return;
        }
        let range = vk::MappedMemoryRange::default().memory(memory).size(vk::WHOLE_SIZE);
        if let Err(e) = unsafe { self.device().invalidate_mapped_memory_ranges(&[range]) } {
            log::error!("vkInvalidateMappedMemoryRanges failed: {e:?}");
        }
    }

    fn create_buffer_view(
        &mut self,
        buffer: NativeBuffer,
        format: Format,
        offset: u64,
        range: u64,
    ) -> GfxResult<NativeBufferView> {
        let create_info = vk::BufferViewCreateInfo::default()
            .buffer(vkh(buffer.raw()))
            .format(convert::format(format))
            .offset(offset)
            .range(range);
        let view =
            unsafe { self.device().create_buffer_view(&create_info, None) }.map_err(vk_err("vkCreateBufferView"))?;
        Ok(NativeBufferView::from_raw(view.as_raw()))
    }

    fn destroy_buffer_view(&mut self, view: NativeBufferView) {
        unsafe { self.device().destroy_buffer_view(vkh(view.raw()), None) };
    }

    // image
    fn create_image(&mut self, info: &ImageCreateInfo) -> GfxResult<ImageAllocation> {
        let mut flags = vk::ImageCreateFlags::empty();
        if info.kind == crate::desc::TextureKind::Cube {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(convert::image_type(info.kind))
            .format(convert::format(info.format))
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: info.depth,
            })
            .mip_levels(info.mip_count)
            .array_layers(info.layers)
            .samples(convert::samples(info.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert::image_usage(info.usage, info.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device().create_image(&create_info, None) }.map_err(vk_err("vkCreateImage"))?;

        let requirements = unsafe { self.device().get_image_memory_requirements(image) };
        let (memory, _) = match self.core.allocate_memory(requirements, MemoryClass::DeviceLocal) {
            Ok(allocated) => allocated,
            Err(e) => {
                unsafe { self.device().destroy_image(image, None) };
                return Err(e);
            }
        };
        unsafe { self.device().bind_image_memory(image, memory, 0) }.map_err(vk_err("vkBindImageMemory"))?;
        if !info.name.is_empty() {
            self.core.set_debug_name(image, info.name);
        }
        self.image_formats.insert(image, info.format);

        Ok(ImageAllocation {
            image: NativeImage::from_raw(image.as_raw()),
            memory: NativeMemory::from_raw(memory.as_raw()),
        })
    }

    fn destroy_image(&mut self, image: NativeImage) {
        let image: vk::Image = vkh(image.raw());
        self.image_formats.remove(&image);
        unsafe { self.device().destroy_image(image, None) };
    }

    fn create_image_view(&mut self, image: NativeImage, info: &ImageCreateInfo) -> GfxResult<NativeImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(vkh(image.raw()))
            .view_type(convert::view_type(info.kind))
            .format(convert::format(info.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: convert::aspect(info.format),
                base_mip_level: 0,
                level_count: info.mip_count,
                base_array_layer: 0,
                layer_count: info.layers,
            });
        let view =
            unsafe { self.device().create_image_view(&create_info, None) }.map_err(vk_err("vkCreateImageView"))?;
        Ok(NativeImageView::from_raw(view.as_raw()))
    }

    fn destroy_image_view(&mut self, view: NativeImageView) {
        unsafe { self.device().destroy_image_view(vkh(view.raw()), None) };
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> GfxResult<NativeSampler> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .min_filter(convert::filter(desc.min_filter))
            .mag_filter(convert::filter(desc.mag_filter))
            .mipmap_mode(convert::mipmap_mode(desc.mip_filter))
            .address_mode_u(convert::address_mode(desc.address_u))
            .address_mode_v(convert::address_mode(desc.address_v))
            .address_mode_w(convert::address_mode(desc.address_w))
            .anisotropy_enable(desc.max_anisotropy > 1.0)
            .max_anisotropy(desc.max_anisotropy)
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);
        if let Some(compare) = desc.compare {
            create_info = create_info.compare_enable(true).compare_op(convert::compare_op(compare));
        }
        let sampler =
            unsafe { self.device().create_sampler(&create_info, None) }.map_err(vk_err("vkCreateSampler"))?;
        Ok(NativeSampler::from_raw(sampler.as_raw()))
    }

    fn destroy_sampler(&mut self, sampler: NativeSampler) {
        unsafe { self.device().destroy_sampler(vkh(sampler.raw()), None) };
    }

    // program
    fn create_shader_module(&mut self, desc: &ShaderDesc) -> GfxResult<NativeShaderModule> {
        let ShaderCode::SpirV(bytes) = desc.code else {
            return Err(GfxError::UnsupportedShaderFormat(desc.code.tag()));
        };
        let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes))
            .map_err(|e| GfxError::native("vkCreateShaderModule", e))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { self.device().create_shader_module(&create_info, None) }
            .map_err(vk_err("vkCreateShaderModule"))?;
        Ok(NativeShaderModule::from_raw(module.as_raw()))
    }

    fn destroy_shader_module(&mut self, module: NativeShaderModule) {
        unsafe { self.device().destroy_shader_module(vkh(module.raw()), None) };
    }

    fn create_descriptor_set_layout(&mut self, layout: &BindingLayout) -> GfxResult<NativeDescriptorSetLayout> {
        let set_layout = pipeline::create_descriptor_set_layout(&self.core, layout)?;
        Ok(NativeDescriptorSetLayout::from_raw(set_layout.as_raw()))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: NativeDescriptorSetLayout) {
        unsafe { self.device().destroy_descriptor_set_layout(vkh(layout.raw()), None) };
    }

    fn create_pipeline_layout(
        &mut self,
        set_layout: NativeDescriptorSetLayout,
        push_constant_size: u32,
    ) -> GfxResult<NativePipelineLayout> {
        let layout = pipeline::create_pipeline_layout(&self.core, vkh(set_layout.raw()), push_constant_size)?;
        Ok(NativePipelineLayout::from_raw(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&mut self, layout: NativePipelineLayout) {
        unsafe { self.device().destroy_pipeline_layout(vkh(layout.raw()), None) };
    }

    fn create_graphics_pipeline(&mut self, info: &GraphicsPipelineInfo) -> GfxResult<NativePipeline> {
        let _span = tracy_client::span!("VulkanBackend::create_graphics_pipeline");
        let pipeline = pipeline::create_graphics_pipeline(&self.core, info)?;
        Ok(NativePipeline::from_raw(pipeline.as_raw()))
    }

    fn create_compute_pipeline(
        &mut self,
        layout: NativePipelineLayout,
        stage: &ShaderStageInfo,
    ) -> GfxResult<NativePipeline> {
        let pipeline = pipeline::create_compute_pipeline(&self.core, vkh(layout.raw()), stage)?;
        Ok(NativePipeline::from_raw(pipeline.as_raw()))
    }

    fn destroy_pipeline(&mut self, pipeline: NativePipeline) {
        unsafe { self.device().destroy_pipeline(vkh(pipeline.raw()), None) };
    }

    fn create_render_pass(&mut self, key: &RenderPassKey) -> GfxResult<NativeRenderPass> {
        let render_pass = pipeline::create_render_pass(&self.core, key)?;
        Ok(NativeRenderPass::from_raw(render_pass.as_raw()))
    }

    fn destroy_render_pass(&mut self, render_pass: NativeRenderPass) {
        unsafe { self.device().destroy_render_pass(vkh(render_pass.raw()), None) };
    }

    fn create_framebuffer(
        &mut self,
        render_pass: NativeRenderPass,
        attachments: &[NativeImageView],
        width: u32,
        height: u32,
    ) -> GfxResult<NativeFramebuffer> {
        let views = attachments.iter().map(|v| vkh::<vk::ImageView>(v.raw())).collect_vec();
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(vkh(render_pass.raw()))
            .attachments(&views)
            .width(width)
            .height(height)
            .layers(1);
        let framebuffer =
            unsafe { self.device().create_framebuffer(&create_info, None) }.map_err(vk_err("vkCreateFramebuffer"))?;
        Ok(NativeFramebuffer::from_raw(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&mut self, framebuffer: NativeFramebuffer) {
        unsafe { self.device().destroy_framebuffer(vkh(framebuffer.raw()), None) };
    }

    // descriptor
    fn create_descriptor_pool(&mut self, max_sets: u32) -> GfxResult<NativeDescriptorPool> {
        let pool_sizes = [
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            vk::DescriptorType::SAMPLER,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::DescriptorType::STORAGE_BUFFER,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: max_sets * DESCRIPTORS_PER_SET,
        });
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.device().create_descriptor_pool(&create_info, None) }
            .map_err(vk_err("vkCreateDescriptorPool"))?;
        Ok(NativeDescriptorPool::from_raw(pool.as_raw()))
    }

    fn reset_descriptor_pool(&mut self, pool: NativeDescriptorPool) {
        if let Err(e) =
            unsafe { self.device().reset_descriptor_pool(vkh(pool.raw()), vk::DescriptorPoolResetFlags::empty()) }
        {
            log::error!("vkResetDescriptorPool failed: {e:?}");
        }
    }

    fn destroy_descriptor_pool(&mut self, pool: NativeDescriptorPool) {
        unsafe { self.device().destroy_descriptor_pool(vkh(pool.raw()), None) };
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: NativeDescriptorPool,
        layout: NativeDescriptorSetLayout,
        count: u32,
        out: &mut Vec<NativeDescriptorSet>,
    ) -> GfxResult<()> {
        let layouts = vec![vkh::<vk::DescriptorSetLayout>(layout.raw()); count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vkh(pool.raw()))
            .set_layouts(&layouts);
        match unsafe { self.device().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => {
                out.extend(sets.into_iter().map(|set| NativeDescriptorSet::from_raw(set.as_raw())));
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                Err(GfxError::OutOfPoolMemory)
            }
            Err(e) => Err(GfxError::native("vkAllocateDescriptorSets", e)),
        }
    }

    fn write_descriptor_set(&mut self, set: NativeDescriptorSet, writes: &[DescriptorWrite]) {
        let set: vk::DescriptorSet = vkh(set.raw());

        // 先收集所有的 info，再构造引用它们的 write
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        for write in writes {
            match *write {
                DescriptorWrite::ConstantBuffer { buffer, range, .. } => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: vkh(buffer.raw()),
                    offset: 0,
                    range,
                }),
                DescriptorWrite::StorageBuffer {
                    buffer, offset, range, ..
                } => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: vkh(buffer.raw()),
                    offset,
                    range,
                }),
                DescriptorWrite::Sampler { sampler, .. } => image_infos.push(vk::DescriptorImageInfo {
                    sampler: vkh(sampler.raw()),
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }),
                DescriptorWrite::Texture { view, .. } => image_infos.push(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: vkh(view.raw()),
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }),
                DescriptorWrite::StorageImage { view, .. } => image_infos.push(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: vkh(view.raw()),
                    image_layout: vk::ImageLayout::GENERAL,
                }),
            }
        }

        let mut vk_writes = Vec::with_capacity(writes.len());
        let (mut next_buffer, mut next_image) = (0, 0);
        for write in writes {
            let (ty, is_buffer) = match write {
                DescriptorWrite::ConstantBuffer { .. } => (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, true),
                DescriptorWrite::StorageBuffer { .. } => (vk::DescriptorType::STORAGE_BUFFER, true),
                DescriptorWrite::Sampler { .. } => (vk::DescriptorType::SAMPLER, false),
                DescriptorWrite::Texture { .. } => (vk::DescriptorType::SAMPLED_IMAGE, false),
                DescriptorWrite::StorageImage { .. } => (vk::DescriptorType::STORAGE_IMAGE, false),
            };
            let base = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding())
                .descriptor_type(ty);
            if is_buffer {
                vk_writes.push(base.buffer_info(std::slice::from_ref(&buffer_infos[next_buffer])));
                next_buffer += 1;
            } else {
                vk_writes.push(base.image_info(std::slice::from_ref(&image_infos[next_image])));
                next_image += 1;
            }
        }

        unsafe { self.device().update_descriptor_sets(&vk_writes, &[]) };
    }

    // command buffer
    fn create_command_buffer(&mut self, queue: QueueKind) -> GfxResult<NativeCommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pools[queue.index()])
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device().allocate_command_buffers(&alloc_info) }
            .map_err(vk_err("vkAllocateCommandBuffers"))?
            .into_iter()
            .next()
            .ok_or_else(|| GfxError::native("vkAllocateCommandBuffers", "no command buffer returned"))?;
        self.command_buffer_queues.insert(cmd, queue);
        Ok(NativeCommandBuffer::from_raw(cmd.as_raw()))
    }

    fn destroy_command_buffer(&mut self, cmd: NativeCommandBuffer) {
        let cmd: vk::CommandBuffer = vkh(cmd.raw());
        let Some(queue) = self.command_buffer_queues.remove(&cmd) else {
            log::error!("destroying an unknown command buffer {cmd:?}");
            return;
        };
        unsafe { self.device().free_command_buffers(self.command_pools[queue.index()], &[cmd]) };
    }

    fn begin_command_buffer(&mut self, cmd: NativeCommandBuffer) -> GfxResult<()> {
        // pool 带有 RESET_COMMAND_BUFFER，begin 会隐式地 reset
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device().begin_command_buffer(vkh(cmd.raw()), &begin_info) }
            .map_err(vk_err("vkBeginCommandBuffer"))
    }

    fn end_command_buffer(&mut self, cmd: NativeCommandBuffer) -> GfxResult<()> {
        unsafe { self.device().end_command_buffer(vkh(cmd.raw())) }.map_err(vk_err("vkEndCommandBuffer"))
    }

    fn cmd_begin_render_pass(&mut self, cmd: NativeCommandBuffer, info: &RenderPassBeginInfo) {
        let clear_values = info
            .clear_values
            .iter()
            .map(|value| match *value {
                ClearValue::Color(color) => vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
                ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
                },
            })
            .collect_vec();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vkh(info.render_pass.raw()))
            .framebuffer(vkh(info.framebuffer.raw()))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: info.width,
                    height: info.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device()
                .cmd_begin_render_pass(vkh(cmd.raw()), &begin_info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&mut self, cmd: NativeCommandBuffer) {
        unsafe { self.device().cmd_end_render_pass(vkh(cmd.raw())) };
    }

    fn cmd_set_viewport(&mut self, cmd: NativeCommandBuffer, viewport: &Viewport) {
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device().cmd_set_viewport(vkh(cmd.raw()), 0, &[viewport]) };
    }

    fn cmd_set_scissor(&mut self, cmd: NativeCommandBuffer, scissor: &Rect) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device().cmd_set_scissor(vkh(cmd.raw()), 0, &[scissor]) };
    }

    fn cmd_bind_pipeline(&mut self, cmd: NativeCommandBuffer, bp: PipelineBindPoint, pipeline: NativePipeline) {
        unsafe {
            self.device()
                .cmd_bind_pipeline(vkh(cmd.raw()), bind_point(bp), vkh(pipeline.raw()))
        };
    }

    fn cmd_bind_vertex_buffers(
        &mut self,
        cmd: NativeCommandBuffer,
        first_binding: u32,
        buffers: &[NativeBuffer],
        offsets: &[u64],
    ) {
        let buffers = buffers.iter().map(|b| vkh::<vk::Buffer>(b.raw())).collect_vec();
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(vkh(cmd.raw()), first_binding, &buffers, offsets)
        };
    }

    fn cmd_bind_index_buffer(&mut self, cmd: NativeCommandBuffer, buffer: NativeBuffer, offset: u64, index_type: IndexType) {
        let index_type = match index_type {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.device()
                .cmd_bind_index_buffer(vkh(cmd.raw()), vkh(buffer.raw()), offset, index_type)
        };
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: NativeCommandBuffer,
        bp: PipelineBindPoint,
        layout: NativePipelineLayout,
        set: NativeDescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                vkh(cmd.raw()),
                bind_point(bp),
                vkh(layout.raw()),
                0,
                &[vkh(set.raw())],
                dynamic_offsets,
            )
        };
    }

    fn cmd_push_constants(&mut self, cmd: NativeCommandBuffer, layout: NativePipelineLayout, offset: u32, data: &[u8]) {
        unsafe {
            self.device().cmd_push_constants(
                vkh(cmd.raw()),
                vkh(layout.raw()),
                vk::ShaderStageFlags::ALL,
                offset,
                data,
            )
        };
    }

    fn cmd_draw(
        &mut self,
        cmd: NativeCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device()
                .cmd_draw(vkh(cmd.raw()), vertex_count, instance_count, first_vertex, first_instance)
        };
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: NativeCommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw_indexed(
                vkh(cmd.raw()),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn cmd_draw_indexed_indirect(
        &mut self,
        cmd: NativeCommandBuffer,
        buffer: NativeBuffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device()
                .cmd_draw_indexed_indirect(vkh(cmd.raw()), vkh(buffer.raw()), offset, draw_count, stride)
        };
    }

    fn cmd_dispatch(&mut self, cmd: NativeCommandBuffer, groups: UVec3) {
        unsafe { self.device().cmd_dispatch(vkh(cmd.raw()), groups.x, groups.y, groups.z) };
    }

    fn cmd_dispatch_indirect(&mut self, cmd: NativeCommandBuffer, buffer: NativeBuffer, offset: u64) {
        unsafe {
            self.device()
                .cmd_dispatch_indirect(vkh(cmd.raw()), vkh(buffer.raw()), offset)
        };
    }

    fn cmd_pipeline_barrier(&mut self, cmd: NativeCommandBuffer, batch: &BarrierBatch) {
        let buffer_barriers = batch
            .buffers
            .iter()
            .map(|t| {
                vk::BufferMemoryBarrier::default()
                    .buffer(vkh(t.buffer.raw()))
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
                    .src_access_mask(convert::access(t.before))
                    .dst_access_mask(convert::access(t.after))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            })
            .collect_vec();
        let image_barriers = batch
            .images
            .iter()
            .map(|t| {
                vk::ImageMemoryBarrier::default()
                    .image(vkh(t.image.raw()))
                    .old_layout(convert::layout(t.before))
                    .new_layout(convert::layout(t.after))
                    .src_access_mask(convert::access(t.before))
                    .dst_access_mask(convert::access(t.after))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: convert::aspect(t.format),
                        base_mip_level: 0,
                        level_count: t.mip_count,
                        base_array_layer: 0,
                        layer_count: t.layer_count,
                    })
            })
            .collect_vec();

        unsafe {
            self.device().cmd_pipeline_barrier(
                vkh(cmd.raw()),
                convert::pipeline_stages(batch.src_stages),
                convert::pipeline_stages(batch.dst_stages),
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            )
        };
    }

    fn cmd_copy_buffer(&mut self, cmd: NativeCommandBuffer, src: NativeBuffer, dst: NativeBuffer, regions: &[BufferCopy]) {
        let regions = regions
            .iter()
            .map(|r| vk::BufferCopy {
                src_offset: r.src_offset,
                dst_offset: r.dst_offset,
                size: r.size,
            })
            .collect_vec();
        unsafe {
            self.device()
                .cmd_copy_buffer(vkh(cmd.raw()), vkh(src.raw()), vkh(dst.raw()), &regions)
        };
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: NativeCommandBuffer,
        src: NativeBuffer,
        dst: NativeImage,
        regions: &[BufferImageCopy],
    ) {
        let image: vk::Image = vkh(dst.raw());
        let regions = self.buffer_image_copies(image, regions);
        unsafe {
            self.device().cmd_copy_buffer_to_image(
                vkh(cmd.raw()),
                vkh(src.raw()),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            )
        };
    }

    fn cmd_copy_image_to_buffer(
        &mut self,
        cmd: NativeCommandBuffer,
        src: NativeImage,
        dst: NativeBuffer,
        regions: &[BufferImageCopy],
    ) {
        let image: vk::Image = vkh(src.raw());
        let regions = self.buffer_image_copies(image, regions);
        unsafe {
            self.device().cmd_copy_image_to_buffer(
                vkh(cmd.raw()),
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vkh(dst.raw()),
                &regions,
            )
        };
    }

    fn cmd_begin_label(&mut self, cmd: NativeCommandBuffer, name: &str, color: Vec4) {
        let Some(debug_utils) = self.debug_utils() else {
            return;
        };
        let (name, color) = Self::label(name, color);
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(vkh(cmd.raw()), &label) };
    }

    fn cmd_end_label(&mut self, cmd: NativeCommandBuffer) {
        if let Some(debug_utils) = self.debug_utils() {
            unsafe { debug_utils.cmd_end_debug_utils_label(vkh(cmd.raw())) };
        }
    }

    fn cmd_insert_label(&mut self, cmd: NativeCommandBuffer, name: &str, color: Vec4) {
        let Some(debug_utils) = self.debug_utils() else {
            return;
        };
        let (name, color) = Self::label(name, color);
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        unsafe { debug_utils.cmd_insert_debug_utils_label(vkh(cmd.raw()), &label) };
    }

    fn cmd_write_timestamp(&mut self, cmd: NativeCommandBuffer, pool: NativeQueryPool, query: u32) {
        unsafe {
            self.device().cmd_write_timestamp(
                vkh(cmd.raw()),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vkh(pool.raw()),
                query,
            )
        };
    }

    // synchronization
    fn create_fence(&mut self, signaled: bool) -> GfxResult<NativeFence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe { self.device().create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
            .map_err(vk_err("vkCreateFence"))?;
        Ok(NativeFence::from_raw(fence.as_raw()))
    }

    fn destroy_fence(&mut self, fence: NativeFence) {
        unsafe { self.device().destroy_fence(vkh(fence.raw()), None) };
    }

    fn wait_fence(&mut self, fence: NativeFence) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanBackend::wait_fence");
        unsafe { self.device().wait_for_fences(&[vkh(fence.raw())], true, u64::MAX) }
            .map_err(vk_err("vkWaitForFences"))
    }

    fn reset_fence(&mut self, fence: NativeFence) -> GfxResult<()> {
        unsafe { self.device().reset_fences(&[vkh(fence.raw())]) }.map_err(vk_err("vkResetFences"))
    }

    fn create_semaphore(&mut self) -> GfxResult<NativeSemaphore> {
        let semaphore = unsafe { self.device().create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(vk_err("vkCreateSemaphore"))?;
        Ok(NativeSemaphore::from_raw(semaphore.as_raw()))
    }

    fn destroy_semaphore(&mut self, semaphore: NativeSemaphore) {
        unsafe { self.device().destroy_semaphore(vkh(semaphore.raw()), None) };
    }

    fn submit(&mut self, queue: QueueKind, desc: &SubmitDesc) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanBackend::submit");
        let command_buffers = desc
            .command_buffers
            .iter()
            .map(|c| vkh::<vk::CommandBuffer>(c.raw()))
            .collect_vec();
        let wait_semaphores = desc.waits.iter().map(|(s, _)| vkh::<vk::Semaphore>(s.raw())).collect_vec();
        let wait_stages = desc
            .waits
            .iter()
            .map(|(_, stages)| convert::pipeline_stages(*stages))
            .collect_vec();
        let signal_semaphores = desc.signals.iter().map(|s| vkh::<vk::Semaphore>(s.raw())).collect_vec();

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);
        let fence = desc.fence.map_or(vk::Fence::null(), |f| vkh(f.raw()));
        unsafe { self.device().queue_submit(self.queue(queue), &[submit_info], fence) }
            .map_err(vk_err("vkQueueSubmit"))
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        unsafe { self.device().device_wait_idle() }.map_err(vk_err("vkDeviceWaitIdle"))
    }

    // query
    fn create_query_pool(&mut self, count: u32) -> GfxResult<NativeQueryPool> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        let pool =
            unsafe { self.device().create_query_pool(&create_info, None) }.map_err(vk_err("vkCreateQueryPool"))?;
        // 新建的 query 处于未定义状态，必须先重置
        unsafe { self.device().reset_query_pool(pool, 0, count) };
        Ok(NativeQueryPool::from_raw(pool.as_raw()))
    }

    fn reset_query_pool(&mut self, pool: NativeQueryPool, first: u32, count: u32) {
        unsafe { self.device().reset_query_pool(vkh(pool.raw()), first, count) };
    }

    fn destroy_query_pool(&mut self, pool: NativeQueryPool) {
        unsafe { self.device().destroy_query_pool(vkh(pool.raw()), None) };
    }

    fn query_timestamps(&mut self, pool: NativeQueryPool, first: u32, out: &mut [u64]) -> GfxResult<()> {
        unsafe {
            self.device().get_query_pool_results(
                vkh(pool.raw()),
                first,
                out,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .map_err(vk_err("vkGetQueryPoolResults"))
    }

    // swapchain
    fn swapchain_info(&self) -> SwapchainInfo {
        let (images, format, extent) = match &self.presenter {
            Some(Presenter::Window(swapchain)) => (swapchain.images().to_vec(), swapchain.format(), swapchain.extent()),
            Some(Presenter::Offscreen(ring)) => (ring.images(), ring.format(), ring.extent()),
            None => (Vec::new(), Format::Undefined, vk::Extent2D::default()),
        };
        SwapchainInfo {
            images: images.into_iter().map(|image| NativeImage::from_raw(image.as_raw())).collect(),
            format,
            width: extent.width,
            height: extent.height,
        }
    }

    fn acquire_next_image(&mut self, signal: NativeSemaphore) -> GfxResult<AcquireResult> {
        let _span = tracy_client::span!("VulkanBackend::acquire_next_image");
        let signal: vk::Semaphore = vkh(signal.raw());
        match &mut self.presenter {
            Some(Presenter::Window(swapchain)) => swapchain.acquire(signal),
            Some(Presenter::Offscreen(ring)) => ring.acquire(&self.core, signal),
            None => Err(GfxError::Swapchain("no presenter".to_string())),
        }
    }

    fn present(&mut self, image_index: u32, wait: NativeSemaphore) -> GfxResult<PresentResult> {
        let _span = tracy_client::span!("VulkanBackend::present");
        let wait: vk::Semaphore = vkh(wait.raw());
        let queue = self.queue(QueueKind::Graphics);
        match &mut self.presenter {
            Some(Presenter::Window(swapchain)) => swapchain.present(queue, image_index, wait),
            Some(Presenter::Offscreen(ring)) => ring.present(&self.core, wait),
            None => Err(GfxError::Swapchain("no presenter".to_string())),
        }
    }

    fn recreate_swapchain(&mut self, present_interval: u32) -> GfxResult<()> {
        self.wait_idle()?;
        for image in self.swapchain_info().images {
            self.image_formats.remove(&vkh::<vk::Image>(image.raw()));
        }
        match &mut self.presenter {
            Some(Presenter::Window(swapchain)) => swapchain.recreate(&self.core, present_interval)?,
            Some(Presenter::Offscreen(ring)) => ring.recreate(&self.core)?,
            None => return Err(GfxError::Swapchain("no presenter".to_string())),
        }
        self.register_presenter_images();
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.core.device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed during shutdown: {e:?}");
            }
            match self.presenter.take() {
                Some(Presenter::Window(swapchain)) => swapchain.destroy(),
                Some(Presenter::Offscreen(ring)) => ring.destroy(&self.core),
                None => {}
            }
            for pool in self.command_pools {
                if pool != vk::CommandPool::null() {
                    self.core.device.destroy_command_pool(pool, None);
                }
            }
        }
        self.core.destroy();
    }
}
