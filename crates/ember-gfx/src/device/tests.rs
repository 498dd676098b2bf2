use glam::{UVec3, Vec4};

use super::*;
use crate::backend::headless::{HeadlessBackend, HeadlessConfig, HeadlessProbe, ObjectKind};
use crate::commands::barrier::PipelineStages;
use crate::desc::{
    BindingLayout, BufferDesc, BufferFlags, QueueKind, RenderPassDesc, ShaderCode, ShaderDesc, ShaderStage,
    TechniqueDesc, VertexFormatDesc, MAX_STORAGE_BUFFERS,
};
use crate::handles::{Buffer, Technique};

const TRIANGLE: [f32; 9] = [0.0, 0.5, 0.0, -0.5, -0.5, 0.0, 0.5, -0.5, 0.0];
const FAKE_SPIRV: &[u8] = &[0x03, 0x02, 0x23, 0x07];

fn setup(frames_in_flight: usize) -> (Device, HeadlessProbe) {
    setup_with(HeadlessConfig::default(), frames_in_flight)
}

fn setup_with(headless: HeadlessConfig, frames_in_flight: usize) -> (Device, HeadlessProbe) {
    setup_config(headless, test_config(frames_in_flight))
}

fn test_config(frames_in_flight: usize) -> DeviceConfig {
    DeviceConfig::default()
        .with_frames_in_flight(frames_in_flight)
        .with_validation(false)
}

fn setup_config(headless: HeadlessConfig, config: DeviceConfig) -> (Device, HeadlessProbe) {
    ember_crate_tools::init_test_log();
    let backend = HeadlessBackend::new(headless);
    let probe = backend.probe();
    let device = Device::new(Box::new(backend), config).unwrap();
    (device, probe)
}

fn shader(device: &mut Device, stage: ShaderStage) -> Own<crate::handles::Shader> {
    device.create_shader(&ShaderDesc {
        stage,
        code: ShaderCode::SpirV(FAKE_SPIRV),
        entry_point: "main",
    })
}

/// 位置属性 + 给定布局的 graphics technique
fn graphics_technique(device: &mut Device, layout: BindingLayout) -> Own<Technique> {
    let vs = shader(device, ShaderStage::Vertex);
    let ps = shader(device, ShaderStage::Pixel);
    let vertex_format = device.create_vertex_format(&VertexFormatDesc::new().attribute(0, 0, Format::Rgb32Float, 0));
    device.create_technique(&TechniqueDesc {
        vertex: Some(vs.handle()),
        pixel: Some(ps.handle()),
        vertex_format: Some(vertex_format.handle()),
        layout,
        ..Default::default()
    })
}

fn triangle_buffer(device: &mut Device) -> Own<Buffer> {
    device.create_buffer(
        &BufferDesc::new(BufferFlags::VERTEX, 12, 3),
        Some(bytemuck::cast_slice(&TRIANGLE)),
    )
}

/// 在 `target` 上画一个三角形并提交
fn draw_triangle(device: &mut Device, technique: &Own<Technique>, vertices: &Own<Buffer>, target: Handle<Texture>) {
    let ctx = device.begin_context(QueueKind::Graphics);
    {
        let mut rec = device.record(ctx);
        rec.begin_render_pass(&RenderPassDesc::new().color(0, target).clear_color(0, Vec4::ZERO));
        rec.set_technique(technique);
        rec.set_vertex_stream(0, vertices);
        rec.draw(3, 1, 0, 0);
        rec.end_render_pass();
    }
    device.submit(ctx);
}

fn empty_frames(device: &mut Device, count: usize) {
    for _ in 0..count {
        device.begin_frame();
        device.end_frame();
    }
}

fn finish(device: Device, probe: &HeadlessProbe) {
    device.destroy();
    assert_eq!(probe.violations(), Vec::<String>::new());
    // swapchain image 属于 backend
    assert_eq!(probe.live_objects(), probe.live(ObjectKind::Image));
}

fn check_deferred_destroy(frames_in_flight: usize) {
    let (mut device, probe) = setup(frames_in_flight);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    let vertices = triangle_buffer(&mut device);

    device.begin_frame();
    let backbuffer = device.backbuffer();
    draw_triangle(&mut device, &technique, &vertices, backbuffer);
    device.end_frame();

    // 释放时 GPU 还在使用它
    let destroyed = probe.destroyed(ObjectKind::Buffer);
    drop(vertices);
    for frame in 0..frames_in_flight {
        device.begin_frame();
        assert_eq!(
            probe.destroyed(ObjectKind::Buffer),
            destroyed,
            "destroyed {frame} frames after release with {frames_in_flight} frames in flight"
        );
        device.end_frame();
    }

    device.begin_frame();
    assert_eq!(probe.destroyed(ObjectKind::Buffer), destroyed + 1);
    assert_eq!(device.current_stats().deferred_destructions, 2, "buffer and its memory");
    device.end_frame();

    assert_eq!(probe.violations(), Vec::<String>::new());
    finish(device, &probe);
}

#[test]
fn test_deferred_destroy_two_frames_in_flight() {
    check_deferred_destroy(2);
}

#[test]
fn test_deferred_destroy_three_frames_in_flight() {
    check_deferred_destroy(3);
}

#[test]
fn test_release_inside_frame_waits_for_slot_reuse() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    let vertices = triangle_buffer(&mut device);
    let destroyed = probe.destroyed(ObjectKind::Buffer);

    // frame 0 使用并释放，进入 slot 0 的队列
    device.begin_frame();
    let backbuffer = device.backbuffer();
    draw_triangle(&mut device, &technique, &vertices, backbuffer);
    drop(vertices);
    device.end_frame();

    device.begin_frame();
    assert_eq!(probe.destroyed(ObjectKind::Buffer), destroyed);
    device.end_frame();

    // frame 2 第一次复用 slot 0
    device.begin_frame();
    assert_eq!(probe.destroyed(ObjectKind::Buffer), destroyed + 1);
    device.end_frame();

    finish(device, &probe);
}

#[test]
fn test_shared_reference_keeps_resource_alive() {
    let (mut device, probe) = setup(2);
    let vertices = triangle_buffer(&mut device);
    let shared = device.share(vertices.handle());
    assert_eq!(device.ref_count(vertices.handle()), 2);

    let handle = vertices.handle();
    drop(vertices);
    empty_frames(&mut device, 4);
    assert_eq!(device.ref_count(handle), 1);
    assert_eq!(device.live_resources(), 1);

    drop(shared);
    empty_frames(&mut device, 4);
    assert_eq!(device.live_resources(), 0);
    finish(device, &probe);
}

#[test]
fn test_technique_release_cascades_to_shaders() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    // shader 与 vertex format 的 Own 已经 drop，technique 仍然持有引用
    empty_frames(&mut device, 3);
    assert_eq!(probe.live(ObjectKind::ShaderModule), 2);

    drop(technique);
    empty_frames(&mut device, 3);
    assert_eq!(probe.live(ObjectKind::ShaderModule), 0);
    assert_eq!(probe.live(ObjectKind::PipelineLayout), 0);
    assert_eq!(device.live_resources(), 0);
    finish(device, &probe);
}

#[test]
fn test_transient_buffer_renames_on_every_update() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    let vertices = device.create_buffer(&BufferDesc::new(BufferFlags::TRANSIENT | BufferFlags::VERTEX, 12, 3), None);
    let first: Vec<u8> = bytemuck::cast_slice(&TRIANGLE).to_vec();
    let second: Vec<u8> = first.iter().map(|b| b.wrapping_add(1)).collect();

    device.begin_frame();
    let backbuffer = device.backbuffer();
    let ctx = device.begin_context(QueueKind::Graphics);
    device.update_buffer(&vertices, &first);
    {
        let mut rec = device.record(ctx);
        rec.begin_render_pass(&RenderPassDesc::new().color(0, backbuffer));
        rec.set_technique(&technique);
        rec.set_vertex_stream(0, &vertices);
        rec.draw(3, 1, 0, 0);
    }
    device.update_buffer(&vertices, &second);
    {
        let mut rec = device.record(ctx);
        rec.draw(3, 1, 0, 0);
        rec.end_render_pass();
    }
    device.submit(ctx);

    let binds = probe.vertex_binds();
    assert_eq!(binds.len(), 2);
    assert_eq!(binds[0].0, 0);
    assert_eq!(binds[1].0, 0);
    assert_ne!((binds[0].1, binds[0].2), (binds[1].1, binds[1].2));
    // 上传在 context 提交之前执行
    assert_eq!(probe.read_buffer(binds[0].1, binds[0].2, 36), first);
    assert_eq!(probe.read_buffer(binds[1].1, binds[1].2, 36), second);

    assert_eq!(probe.command_count("bind_pipeline"), 1);
    assert_eq!(device.current_stats().pipeline_binds, 1);
    device.end_frame();
    finish(device, &probe);
}

#[test]
fn test_constant_buffer_update_only_rebinds_offsets() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(
        &mut device,
        BindingLayout {
            constant_buffers: 1,
            ..Default::default()
        },
    );
    let vertices = triangle_buffer(&mut device);
    let constants = device.create_buffer(&BufferDesc::new(BufferFlags::TRANSIENT | BufferFlags::CONSTANT, 64, 1), None);

    device.begin_frame();
    let backbuffer = device.backbuffer();
    let ctx = device.begin_context(QueueKind::Graphics);
    device.update_buffer(&constants, &[1; 64]);
    {
        let mut rec = device.record(ctx);
        rec.begin_render_pass(&RenderPassDesc::new().color(0, backbuffer));
        rec.set_technique(&technique);
        rec.set_vertex_stream(0, &vertices);
        rec.set_constant_buffer(0, &constants);
        rec.draw(3, 1, 0, 0);
    }
    device.update_buffer(&constants, &[2; 64]);
    {
        let mut rec = device.record(ctx);
        rec.draw(3, 1, 0, 0);
        rec.end_render_pass();
    }
    device.submit(ctx);

    let stats = device.current_stats();
    assert_eq!(stats.draws, 2);
    assert_eq!(stats.pipeline_binds, 1);
    assert_eq!(stats.descriptor_sets_written, 1);
    assert_eq!(stats.dynamic_offset_rebinds, 1);
    assert_eq!(probe.command_count("bind_pipeline"), 1);
    assert_eq!(probe.command_count("bind_descriptor_set"), 2);

    let offsets = probe.dynamic_offsets();
    assert_eq!(offsets.len(), 2);
    assert_ne!(offsets[0], offsets[1]);
    let alignment = device.caps().min_constant_buffer_alignment as u32;
    assert!(offsets.iter().all(|o| o.len() == 1 && o[0] % alignment == 0));

    device.end_frame();
    finish(device, &probe);
}

#[test]
fn test_transitions_for_a_dispatch_form_one_batch() {
    let (mut device, probe) = setup(2);
    let cs = shader(&mut device, ShaderStage::Compute);
    let technique = device.create_technique(&TechniqueDesc {
        compute: Some(cs.handle()),
        layout: BindingLayout {
            storage_images: 2,
            storage_buffers: 1,
            ..Default::default()
        },
        ..Default::default()
    });
    let storage_desc = TextureDesc::new_2d(16, 16, Format::Rgba8Unorm, TextureUsage::STORAGE);
    let image_a = device.create_texture(&storage_desc, None);
    let image_b = device.create_texture(&storage_desc, None);
    let counters = device.create_buffer(&BufferDesc::new(BufferFlags::STORAGE, 4, 64), None);

    device.begin_frame();
    let before = probe.command_count("pipeline_barrier");
    let ctx = device.begin_context(QueueKind::Compute);
    {
        let mut rec = device.record(ctx);
        rec.set_technique(&technique);
        rec.set_storage_image(0, &image_a);
        rec.set_storage_image(1, &image_b);
        rec.set_storage_buffer(0, &counters);
        rec.dispatch(UVec3::new(4, 4, 1));
        // 状态没有改变，不需要新的 barrier
        rec.dispatch(UVec3::new(4, 4, 1));
        rec.uav_barrier_buffer(&counters);
        rec.dispatch(UVec3::new(4, 4, 1));
    }
    device.submit(ctx);

    let stats = device.current_stats();
    assert_eq!(stats.dispatches, 3);
    assert_eq!(stats.barrier_batches, 2);
    assert_eq!(stats.barrier_transitions, 4);
    assert_eq!(probe.command_count("pipeline_barrier") - before, 2);
    assert_eq!(probe.command_count("bind_pipeline"), 1);
    device.end_frame();
    finish(device, &probe);
}

#[test]
fn test_pending_upload_is_flushed_before_dependent_submit() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    let vertices = triangle_buffer(&mut device);
    assert_eq!(probe.submissions(), 0, "uploads are batched until something is submitted");

    device.begin_frame();
    let backbuffer = device.backbuffer();
    let waits = probe.semaphore_waits();
    draw_triangle(&mut device, &technique, &vertices, backbuffer);
    // 上传的提交 + context 的提交
    assert_eq!(probe.submissions(), 2);
    // context 等待上传与 acquire
    assert_eq!(probe.semaphore_waits() - waits, 2);
    assert_eq!(device.current_stats().uploads, 1);
    device.end_frame();

    assert_eq!(device.read_buffer_sync(&vertices), bytemuck::cast_slice::<f32, u8>(&TRIANGLE));
    finish(device, &probe);
}

#[test]
fn test_upload_into_a_buffer_in_use_is_surrounded_by_barriers() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    let vertices = triangle_buffer(&mut device);
    let native = device.resources.buffers[vertices.handle()].binding.buffer;
    let transitions_of_vertices = |probe: &HeadlessProbe| -> Vec<(ResourceState, ResourceState)> {
        probe
            .buffer_transitions()
            .iter()
            .filter(|t| t.buffer == native)
            .map(|t| (t.before, t.after))
            .collect()
    };

    device.begin_frame();
    let backbuffer = device.backbuffer();
    draw_triangle(&mut device, &technique, &vertices, backbuffer);
    device.end_frame();
    // 初始数据的上传
    assert_eq!(
        transitions_of_vertices(&probe),
        vec![
            (ResourceState::Undefined, ResourceState::CopyDst),
            (ResourceState::CopyDst, ResourceState::VertexBuffer),
        ]
    );

    // 上一帧的 draw 可能还在读取
    let moved: Vec<f32> = TRIANGLE.iter().map(|v| v * 0.5).collect();
    device.begin_frame();
    device.upload_buffer(&vertices, 0, bytemuck::cast_slice(&moved));
    let backbuffer = device.backbuffer();
    draw_triangle(&mut device, &technique, &vertices, backbuffer);
    device.end_frame();

    let transitions = transitions_of_vertices(&probe);
    assert_eq!(
        &transitions[2..],
        &[
            (ResourceState::VertexBuffer, ResourceState::CopyDst),
            (ResourceState::CopyDst, ResourceState::VertexBuffer),
        ]
    );
    assert_eq!(device.resources.buffers[vertices.handle()].state, ResourceState::VertexBuffer);
    assert_eq!(device.read_buffer_sync(&vertices), bytemuck::cast_slice::<f32, u8>(&moved));
    finish(device, &probe);
}

#[test]
fn test_upload_after_storage_writes_moves_out_of_unordered_access() {
    let (mut device, probe) = setup(2);
    let data = device.create_buffer(&BufferDesc::new(BufferFlags::STORAGE, 4, 16), Some(&[0; 64]));
    let native = device.resources.buffers[data.handle()].binding.buffer;

    device.begin_frame();
    device.upload_buffer(&data, 16, &[7; 16]);
    device.end_frame();

    let transitions: Vec<_> = probe
        .buffer_transitions()
        .into_iter()
        .filter(|t| t.buffer == native)
        .map(|t| (t.before, t.after))
        .collect();
    assert_eq!(
        &transitions[2..],
        &[
            (ResourceState::UnorderedAccess, ResourceState::CopyDst),
            (ResourceState::CopyDst, ResourceState::UnorderedAccess),
        ]
    );
    finish(device, &probe);
}

#[test]
fn test_partial_transient_updates_bind_whole_buffer_ranges() {
    const BLOCK_SIZE: u64 = 256;
    let (mut device, probe) = setup_config(HeadlessConfig::default(), test_config(2).with_block_size(BLOCK_SIZE));
    let cs = shader(&mut device, ShaderStage::Compute);
    let technique = device.create_technique(&TechniqueDesc {
        compute: Some(cs.handle()),
        layout: BindingLayout {
            storage_buffers: 2,
            ..Default::default()
        },
        ..Default::default()
    });
    let desc = BufferDesc::new(BufferFlags::TRANSIENT | BufferFlags::STORAGE, 4, 64);
    let a = device.create_buffer(&desc, None);
    let b = device.create_buffer(&desc, None);

    device.begin_frame();
    device.update_buffer(&a, &[1; 16]);
    device.update_buffer(&b, &[2; 16]);
    let ctx = device.begin_context(QueueKind::Compute);
    {
        let mut rec = device.record(ctx);
        rec.set_technique(&technique);
        rec.set_storage_buffer(0, &a);
        rec.set_storage_buffer(1, &b);
        rec.dispatch(UVec3::ONE);
    }
    device.submit(ctx);

    let bound = [a.handle(), b.handle()].map(|h| device.resources.buffers[h].binding);
    let writes = probe.buffer_writes();
    assert_eq!(writes.len(), 2);
    for (&(buffer, offset, range), binding) in writes.iter().zip(&bound) {
        assert_eq!((buffer, offset), (binding.buffer, binding.offset));
        assert_eq!(range, desc.size());
        assert!(offset + range <= BLOCK_SIZE, "[{offset}, {}) exceeds the block", offset + range);
    }
    let (wa, wb) = (writes[0], writes[1]);
    assert!(
        wa.0 != wb.0 || wa.1 + wa.2 <= wb.1 || wb.1 + wb.2 <= wa.1,
        "bound ranges overlap: {wa:?} {wb:?}"
    );
    assert_eq!(probe.read_buffer(bound[0].buffer, bound[0].offset, 16), vec![1; 16]);
    assert_eq!(probe.read_buffer(bound[1].buffer, bound[1].offset, 16), vec![2; 16]);
    assert_eq!(device.current_stats().uploaded_bytes, 32);
    device.end_frame();
    finish(device, &probe);
}

#[test]
#[should_panic(expected = "invalid binding layout")]
fn test_technique_with_too_many_bindings_is_rejected() {
    let (mut device, _) = setup(2);
    let cs = shader(&mut device, ShaderStage::Compute);
    device.create_technique(&TechniqueDesc {
        compute: Some(cs.handle()),
        layout: BindingLayout {
            storage_buffers: MAX_STORAGE_BUFFERS as u32 + 1,
            ..Default::default()
        },
        ..Default::default()
    });
}

#[test]
fn test_sync_readback_of_buffers_and_textures() {
    let (mut device, probe) = setup(2);
    let bytes: Vec<u8> = (0..64).collect();
    let buffer = device.create_buffer(&BufferDesc::new(BufferFlags::STORAGE, 4, 16), Some(&bytes));
    let texture = device.create_texture(
        &TextureDesc::new_2d(4, 4, Format::Rgba8Unorm, TextureUsage::SAMPLED),
        Some(&bytes),
    );

    assert_eq!(device.read_buffer_sync(&buffer), bytes);
    assert_eq!(device.read_texture_sync(&texture, 0), bytes);

    // 帧内同样可以读回
    device.begin_frame();
    device.upload_buffer(&buffer, 4, &[9, 9, 9, 9]);
    let mut expected = bytes.clone();
    expected[4..8].fill(9);
    assert_eq!(device.read_buffer_sync(&buffer), expected);
    device.end_frame();
    finish(device, &probe);
}

#[test]
fn test_submit_token_is_consumed_once() {
    let (mut device, probe) = setup(2);
    let cs = shader(&mut device, ShaderStage::Compute);
    let technique = device.create_technique(&TechniqueDesc {
        compute: Some(cs.handle()),
        layout: BindingLayout {
            storage_buffers: 1,
            ..Default::default()
        },
        ..Default::default()
    });
    let data = device.create_buffer(&BufferDesc::new(BufferFlags::STORAGE, 4, 64), None);

    for _ in 0..3 {
        device.begin_frame();
        let compute = device.begin_context(QueueKind::Compute);
        {
            let mut rec = device.record(compute);
            rec.set_technique(&technique);
            rec.set_storage_buffer(0, &data);
            rec.dispatch(UVec3::ONE);
        }
        let token = device.submit(compute);
        assert_eq!(token.frame_id(), device.frame_id());

        let graphics = device.begin_context(QueueKind::Graphics);
        device.add_dependency(graphics, token, PipelineStages::COMPUTE_SHADER);
        {
            let mut rec = device.record(graphics);
            rec.transition_buffer(&data, ResourceState::CopySrc);
            rec.flush_barriers();
        }
        device.submit(graphics);
        device.end_frame();
    }

    // 同一个 semaphore 被等待两次会被记录为 violation
    assert_eq!(probe.violations(), Vec::<String>::new());
    finish(device, &probe);
}

#[test]
fn test_gpu_timers_resolve_when_slot_retires() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    let vertices = triangle_buffer(&mut device);

    device.begin_frame();
    let backbuffer = device.backbuffer();
    let ctx = device.begin_context(QueueKind::Graphics);
    {
        let mut rec = device.record(ctx);
        rec.push_marker("scene", Vec4::ONE);
        let timer = rec.begin_timer("triangle").unwrap();
        rec.begin_render_pass(&RenderPassDesc::new().color(0, backbuffer));
        rec.set_technique(&technique);
        rec.set_vertex_stream(0, &vertices);
        rec.draw(3, 1, 0, 0);
        rec.end_render_pass();
        rec.end_timer(timer);
        rec.pop_marker();
    }
    device.submit(ctx);
    device.end_frame();
    assert!(device.timer_results().is_empty());

    // 第 0 帧的 slot 在第 2 帧开始时被回收
    device.begin_frame();
    device.end_frame();
    device.begin_frame();
    let results = device.timer_results().to_vec();
    device.end_frame();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "triangle");
    assert!(results[0].milliseconds > 0.0);
    finish(device, &probe);
}

#[test]
fn test_out_of_date_swapchain_is_rebuilt() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    let vertices = triangle_buffer(&mut device);
    let old_framebuffers = |probe: &HeadlessProbe| probe.destroyed(ObjectKind::Framebuffer);

    device.begin_frame();
    let backbuffer = device.backbuffer();
    draw_triangle(&mut device, &technique, &vertices, backbuffer);
    probe.set_out_of_date();
    device.end_frame();
    assert!(device.swapchain_dirty());
    assert_eq!(probe.swapchain_rebuilds(), 0);

    device.begin_frame();
    assert!(!device.swapchain_dirty());
    assert_eq!(probe.swapchain_rebuilds(), 1);
    assert!(old_framebuffers(&probe) >= 1, "framebuffers of the old images are purged");
    let backbuffer = device.backbuffer();
    assert!(backbuffer.is_valid());
    draw_triangle(&mut device, &technique, &vertices, backbuffer);
    device.end_frame();

    // 窗口尺寸改变：acquire 时发现 out of date，重建之后重试
    probe.resize(800, 600);
    device.begin_frame();
    assert_eq!(probe.swapchain_rebuilds(), 2);
    assert_eq!(device.backbuffer_extent(), (800, 600));
    device.end_frame();

    device.set_present_interval(0);
    assert!(device.swapchain_dirty());
    empty_frames(&mut device, 1);
    assert_eq!(probe.swapchain_rebuilds(), 3);

    assert_eq!(probe.violations(), Vec::<String>::new());
    finish(device, &probe);
}

#[test]
fn test_render_pass_and_framebuffer_are_reused() {
    let (mut device, probe) = setup(2);
    let technique = graphics_technique(&mut device, BindingLayout::default());
    let vertices = triangle_buffer(&mut device);
    let target = device.create_texture(
        &TextureDesc::new_2d(64, 64, Format::Rgba8Unorm, TextureUsage::RENDER_TARGET),
        None,
    );

    for frame in 0..3 {
        device.begin_frame();
        draw_triangle(&mut device, &technique, &vertices, target.handle());
        let stats = device.current_stats();
        if frame == 0 {
            assert_eq!(stats.render_pass_cache_misses, 1);
            assert_eq!(stats.framebuffer_cache_misses, 1);
            assert_eq!(stats.pipeline_cache_misses, 1);
        } else {
            assert_eq!(stats.render_pass_cache_hits, 1);
            assert_eq!(stats.framebuffer_cache_hits, 1);
            assert_eq!(stats.pipeline_cache_hits, 1);
        }
        device.end_frame();
    }
    assert_eq!(probe.created(ObjectKind::RenderPass), 1);
    assert_eq!(probe.created(ObjectKind::Framebuffer), 1);
    assert_eq!(probe.created(ObjectKind::Pipeline), 1);

    // 释放 texture 会清除引用它的 framebuffer
    drop(target);
    empty_frames(&mut device, 3);
    assert_eq!(probe.live(ObjectKind::Framebuffer), 0);
    assert_eq!(probe.live(ObjectKind::RenderPass), 1);

    let totals = device.total_stats();
    assert_eq!(totals.draws, 3);
    finish(device, &probe);
}

#[test]
fn test_frames_in_flight_follow_swapchain_image_count() {
    ember_crate_tools::init_test_log();
    let backend = HeadlessBackend::new(HeadlessConfig::default().with_swapchain_images(2));
    let probe = backend.probe();
    let device = Device::new(Box::new(backend), DeviceConfig::default().with_validation(false)).unwrap();
    assert_eq!(device.frames_in_flight(), 2);
    assert_eq!(device.backbuffer_format(), Format::Bgra8Unorm);
    assert!(!device.backbuffer().is_valid(), "no image is acquired outside of a frame");
    finish(device, &probe);

    let (device, probe) = setup_with(HeadlessConfig::default().with_swapchain_images(4), 3);
    assert_eq!(device.frames_in_flight(), 3);
    finish(device, &probe);
}
