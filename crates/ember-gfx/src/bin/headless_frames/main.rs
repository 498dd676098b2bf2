//! 在 headless 后端上跑若干帧：一个 compute pass 写 storage buffer，一个 graphics pass 画三角形
//!
//! 用法：`headless_frames [帧数]`

use anyhow::Context;
use ember_gfx::backend::headless::{HeadlessBackend, HeadlessConfig};
use ember_gfx::commands::barrier::PipelineStages;
use ember_gfx::config::DeviceConfig;
use ember_gfx::desc::{
    BindingLayout, BufferDesc, BufferFlags, Format, QueueKind, RenderPassDesc, ShaderCode, ShaderDesc, ShaderStage,
    TechniqueDesc, VertexFormatDesc,
};
use ember_gfx::device::Device;
use ember_gfx::handles::{Buffer, Own, Technique};
use glam::{UVec3, Vec3, Vec4};

/// headless 后端不解析 shader，只需要一段非空的字节
const PLACEHOLDER_SPIRV: &[u8] = &[0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

struct HelloTriangle {
    triangle: Own<Technique>,
    particles: Own<Technique>,
    vertices: Own<Buffer>,
    /// 每帧更新，transient
    constants: Own<Buffer>,
    counters: Own<Buffer>,
}

impl HelloTriangle {
    fn new(device: &mut Device) -> Self {
        let shader = |device: &mut Device, stage| {
            device.create_shader(&ShaderDesc {
                stage,
                code: ShaderCode::SpirV(PLACEHOLDER_SPIRV),
                entry_point: "main",
            })
        };
        let vs = shader(device, ShaderStage::Vertex);
        let ps = shader(device, ShaderStage::Pixel);
        let cs = shader(device, ShaderStage::Compute);

        let vertex_format = device.create_vertex_format(&VertexFormatDesc::new().attribute(0, 0, Format::Rgb32Float, 0));
        let triangle = device.create_technique(&TechniqueDesc {
            vertex: Some(vs.handle()),
            pixel: Some(ps.handle()),
            vertex_format: Some(vertex_format.handle()),
            layout: BindingLayout {
                constant_buffers: 1,
                ..Default::default()
            },
            ..Default::default()
        });
        let particles = device.create_technique(&TechniqueDesc {
            compute: Some(cs.handle()),
            layout: BindingLayout {
                storage_buffers: 1,
                ..Default::default()
            },
            ..Default::default()
        });

        let positions = [Vec3::new(0.0, 0.5, 0.0), Vec3::new(-0.5, -0.5, 0.0), Vec3::new(0.5, -0.5, 0.0)];
        let vertices = device.create_buffer(
            &BufferDesc::new(BufferFlags::VERTEX, 12, 3),
            Some(bytemuck::cast_slice(&positions)),
        );
        let constants =
            device.create_buffer(&BufferDesc::new(BufferFlags::TRANSIENT | BufferFlags::CONSTANT, 16, 1), None);
        let counters = device.create_buffer(&BufferDesc::new(BufferFlags::STORAGE, 4, 256), None);

        Self {
            triangle,
            particles,
            vertices,
            constants,
            counters,
        }
    }

    fn draw(&self, device: &mut Device) {
        let compute = device.begin_context(QueueKind::Compute);
        {
            let mut rec = device.record(compute);
            rec.push_marker("particles", Vec4::new(0.2, 0.8, 0.2, 1.0));
            let timer = rec.begin_timer("particles");
            rec.set_technique(&self.particles);
            rec.set_storage_buffer(0, &self.counters);
            rec.dispatch(UVec3::new(4, 1, 1));
            if let Some(timer) = timer {
                rec.end_timer(timer);
            }
            rec.pop_marker();
        }
        let token = device.submit(compute);

        let tint = Vec4::new(1.0, 0.5, (device.frame_id() % 60) as f32 / 60.0, 1.0);
        device.update_buffer(&self.constants, bytemuck::bytes_of(&tint));

        let backbuffer = device.backbuffer();
        let graphics = device.begin_context(QueueKind::Graphics);
        device.add_dependency(graphics, token, PipelineStages::VERTEX_SHADER);
        {
            let mut rec = device.record(graphics);
            let timer = rec.begin_timer("triangle");
            rec.begin_render_pass(&RenderPassDesc::new().color(0, backbuffer).clear_color(0, Vec4::ZERO));
            rec.set_technique(&self.triangle);
            rec.set_vertex_stream(0, &self.vertices);
            rec.set_constant_buffer(0, &self.constants);
            rec.draw(3, 1, 0, 0);
            rec.end_render_pass();
            if let Some(timer) = timer {
                rec.end_timer(timer);
            }
        }
        device.submit(graphics);
    }
}

fn main() -> anyhow::Result<()> {
    ember_crate_tools::init_log();

    let frames = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<u64>().with_context(|| format!("invalid frame count: {arg}"))?,
        None => 8,
    };

    let backend = HeadlessBackend::new(HeadlessConfig::default());
    let probe = backend.probe();
    let config = DeviceConfig::default().with_app_name("headless_frames").with_validation(false);
    let mut device = Device::new(Box::new(backend), config).context("creating the device")?;
    log::info!("device caps: {:#?}", device.caps());

    let app = HelloTriangle::new(&mut device);
    for _ in 0..frames {
        device.begin_frame();
        app.draw(&mut device);
        device.end_frame();

        log::info!("frame {}: {:?}", device.frame_id(), device.stats());
        for timer in device.timer_results() {
            log::info!("  gpu timer {}: {:.3} ms", timer.name, timer.milliseconds);
        }
    }

    log::info!("total: {:?}", device.total_stats());
    drop(app);
    device.destroy();

    let violations = probe.violations();
    anyhow::ensure!(violations.is_empty(), "backend reported misuse: {violations:#?}");
    Ok(())
}
