//! render pass、descriptor set layout 与 pipeline 的创建

use std::ffi::CString;

use ash::vk;
use ash::vk::Handle;
use itertools::Itertools;

use crate::backend::vulkan::convert;
use crate::backend::vulkan::core::{vk_err, VkCore};
use crate::backend::{GraphicsPipelineInfo, ShaderStageInfo};
use crate::cache::RenderPassKey;
use crate::desc::{BindingKind, BindingLayout, ClearFlags};
use crate::error::{GfxError, GfxResult};

/// 所有 attachment 的布局在 render pass 前后保持不变，布局转换由外部的 barrier 完成
pub fn create_render_pass(core: &VkCore, key: &RenderPassKey) -> GfxResult<vk::RenderPass> {
    let samples = convert::samples(key.target.samples);
    let load_op = |clear: bool| {
        if clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        }
    };

    let mut attachments = key
        .target
        .colors()
        .iter()
        .enumerate()
        .map(|(i, format)| {
            vk::AttachmentDescription::default()
                .format(convert::format(*format))
                .samples(samples)
                .load_op(load_op(key.clear.contains(ClearFlags::color(i))))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        })
        .collect_vec();
    let color_refs = (0..attachments.len() as u32)
        .map(|i| {
            vk::AttachmentReference::default()
                .attachment(i)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        })
        .collect_vec();

    let depth_ref = vk::AttachmentReference::default()
        .attachment(attachments.len() as u32)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    if key.target.has_depth() {
        let depth_format = key.target.depth_format;
        let (stencil_load, stencil_store) = if depth_format.has_stencil() {
            (load_op(key.clear.contains(ClearFlags::STENCIL)), vk::AttachmentStoreOp::STORE)
        } else {
            (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
        };
        attachments.push(
            vk::AttachmentDescription::default()
                .format(convert::format(depth_format))
                .samples(samples)
                .load_op(load_op(key.clear.contains(ClearFlags::DEPTH)))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(stencil_load)
                .stencil_store_op(stencil_store)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if key.target.has_depth() {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }
    let subpasses = [subpass];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses);
    unsafe { core.device.create_render_pass(&create_info, None) }.map_err(vk_err("vkCreateRenderPass"))
}

/// binding 的顺序：constant buffers -> samplers -> textures -> storage images -> storage buffers
pub fn create_descriptor_set_layout(core: &VkCore, layout: &BindingLayout) -> GfxResult<vk::DescriptorSetLayout> {
    let groups = [
        (BindingKind::ConstantBuffer, layout.constant_buffers, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
        (BindingKind::Sampler, layout.samplers, vk::DescriptorType::SAMPLER),
        (BindingKind::Texture, layout.textures, vk::DescriptorType::SAMPLED_IMAGE),
        (BindingKind::StorageImage, layout.storage_images, vk::DescriptorType::STORAGE_IMAGE),
        (BindingKind::StorageBuffer, layout.storage_buffers, vk::DescriptorType::STORAGE_BUFFER),
    ];
    let bindings = groups
        .iter()
        .flat_map(|&(kind, count, ty)| {
            (0..count).map(move |slot| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(layout.binding(kind, slot))
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
        })
        .collect_vec();

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    unsafe { core.device.create_descriptor_set_layout(&create_info, None) }
        .map_err(vk_err("vkCreateDescriptorSetLayout"))
}

pub fn create_pipeline_layout(
    core: &VkCore,
    set_layout: vk::DescriptorSetLayout,
    push_constant_size: u32,
) -> GfxResult<vk::PipelineLayout> {
    let set_layouts = [set_layout];
    let push_ranges = [vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::ALL,
        offset: 0,
        size: push_constant_size,
    }];
    let mut create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    if push_constant_size > 0 {
        create_info = create_info.push_constant_ranges(&push_ranges);
    }
    unsafe { core.device.create_pipeline_layout(&create_info, None) }.map_err(vk_err("vkCreatePipelineLayout"))
}

fn entry_points(stages: &[ShaderStageInfo]) -> GfxResult<Vec<CString>> {
    stages
        .iter()
        .map(|stage| {
            CString::new(stage.entry_point)
                .map_err(|_| GfxError::native("vkCreatePipeline", format!("bad entry point {:?}", stage.entry_point)))
        })
        .collect()
}

pub fn create_graphics_pipeline(core: &VkCore, info: &GraphicsPipelineInfo) -> GfxResult<vk::Pipeline> {
    let names = entry_points(info.stages)?;
    let stages = info
        .stages
        .iter()
        .zip(&names)
        .map(|(stage, name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(convert::shader_stage(stage.stage))
                .module(vk::ShaderModule::from_raw(stage.module.raw()))
                .name(name)
        })
        .collect_vec();

    // stride 为 0 的 stream 没有被使用
    let vertex_bindings = info
        .strides
        .iter()
        .enumerate()
        .filter(|(_, stride)| **stride > 0)
        .map(|(stream, stride)| {
            let input_rate = if info.instance_stream_mask & (1 << stream) != 0 {
                vk::VertexInputRate::INSTANCE
            } else {
                vk::VertexInputRate::VERTEX
            };
            vk::VertexInputBindingDescription {
                binding: stream as u32,
                stride: *stride,
                input_rate,
            }
        })
        .collect_vec();
    let vertex_attributes = info
        .attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: a.stream,
            format: convert::format(a.format),
            offset: a.offset,
        })
        .collect_vec();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly =
        vk::PipelineInputAssemblyStateCreateInfo::default().topology(convert::topology(info.primitive));

    // viewport 与 scissor 都是动态状态
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let rs = info.rasterizer;
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(rs.depth_clamp)
        .polygon_mode(convert::polygon_mode(rs.fill))
        .cull_mode(convert::cull_mode(rs.cull))
        .front_face(if rs.front_ccw {
            vk::FrontFace::COUNTER_CLOCKWISE
        } else {
            vk::FrontFace::CLOCKWISE
        })
        .depth_bias_enable(rs.depth_bias != 0 || rs.slope_scaled_depth_bias != 0.0)
        .depth_bias_constant_factor(rs.depth_bias as f32)
        .depth_bias_slope_factor(rs.slope_scaled_depth_bias)
        .line_width(1.0);

    let multisample =
        vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(convert::samples(info.samples));

    let ds = info.depth_stencil;
    let mut depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(ds.depth_test)
        .depth_write_enable(ds.depth_write)
        .depth_compare_op(convert::compare_op(ds.depth_compare));
    if let Some(stencil) = &ds.stencil {
        let op_state = convert::stencil_state(stencil);
        depth_stencil = depth_stencil.stencil_test_enable(true).front(op_state).back(op_state);
    }

    let blend = info.blend;
    let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(blend.enable)
        .src_color_blend_factor(convert::blend_factor(blend.src_color))
        .dst_color_blend_factor(convert::blend_factor(blend.dst_color))
        .color_blend_op(convert::blend_op(blend.color_op))
        .src_alpha_blend_factor(convert::blend_factor(blend.src_alpha))
        .dst_alpha_blend_factor(convert::blend_factor(blend.dst_alpha))
        .alpha_blend_op(convert::blend_op(blend.alpha_op))
        .color_write_mask(convert::color_mask(blend.write_mask));
    let blend_attachments = vec![blend_attachment; info.color_count as usize];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(vk::PipelineLayout::from_raw(info.layout.raw()))
        .render_pass(vk::RenderPass::from_raw(info.render_pass.raw()))
        .subpass(0);

    let pipelines = unsafe {
        core.device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| GfxError::native("vkCreateGraphicsPipelines", e))?;
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GfxError::native("vkCreateGraphicsPipelines", "no pipeline returned"))
}

pub fn create_compute_pipeline(
    core: &VkCore,
    layout: vk::PipelineLayout,
    stage: &ShaderStageInfo,
) -> GfxResult<vk::Pipeline> {
    let names = entry_points(std::slice::from_ref(stage))?;
    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(vk::ShaderModule::from_raw(stage.module.raw()))
        .name(&names[0]);
    let create_info = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(layout);

    let pipelines = unsafe {
        core.device
            .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| GfxError::native("vkCreateComputePipelines", e))?;
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GfxError::native("vkCreateComputePipelines", "no pipeline returned"))
}
