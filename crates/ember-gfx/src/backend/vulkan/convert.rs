//! 中立类型到 vk 类型的转换

use ash::vk;

use crate::backend::BufferUsage;
use crate::commands::barrier::{PipelineStages, ResourceState};
use crate::desc::{
    AddressMode, BlendFactor, BlendOp, ColorMask, CompareOp, CullMode, Filter, FillMode, Format, PrimitiveType,
    ShaderStage, StencilDesc, StencilOp, TextureKind, TextureUsage,
};

pub fn format(format: Format) -> vk::Format {
    match format {
        Format::Undefined => vk::Format::UNDEFINED,
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::Rg8Unorm => vk::Format::R8G8_UNORM,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R16Uint => vk::Format::R16_UINT,
        Format::R16Float => vk::Format::R16_SFLOAT,
        Format::Rg16Float => vk::Format::R16G16_SFLOAT,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::Rg32Float => vk::Format::R32G32_SFLOAT,
        Format::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::D32FloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// swapchain 只会用到少数几种格式，其他格式视为 Undefined
pub fn format_from_vk(format: vk::Format) -> Format {
    match format {
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::Bgra8Srgb,
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        _ => Format::Undefined,
    }
}

pub fn aspect(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    let table = [
        (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
        (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
        (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
        (BufferUsage::INDIRECT, vk::BufferUsageFlags::INDIRECT_BUFFER),
        (BufferUsage::UNIFORM_TEXEL, vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER),
        (BufferUsage::STORAGE_TEXEL, vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER),
        (BufferUsage::COPY_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
        (BufferUsage::COPY_DST, vk::BufferUsageFlags::TRANSFER_DST),
    ];
    for (usage_bit, vk_bit) in table {
        if usage.contains(usage_bit) {
            flags |= vk_bit;
        }
    }
    flags
}

pub fn image_usage(usage: TextureUsage, format: Format) -> vk::ImageUsageFlags {
    // 上传与回读总是需要 transfer
    let mut flags = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if usage.contains(TextureUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::RENDER_TARGET) && !format.is_depth() {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL) || (usage.contains(TextureUsage::RENDER_TARGET) && format.is_depth())
    {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(TextureUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    flags
}

pub fn image_type(kind: TextureKind) -> vk::ImageType {
    match kind {
        TextureKind::D3 => vk::ImageType::TYPE_3D,
        _ => vk::ImageType::TYPE_2D,
    }
}

pub fn view_type(kind: TextureKind) -> vk::ImageViewType {
    match kind {
        TextureKind::D2 => vk::ImageViewType::TYPE_2D,
        TextureKind::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureKind::D3 => vk::ImageViewType::TYPE_3D,
        TextureKind::Cube => vk::ImageViewType::CUBE,
    }
}

pub fn samples(count: u32) -> vk::SampleCountFlags {
    match count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

pub fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        ShaderStage::Mesh => vk::ShaderStageFlags::MESH_EXT,
    }
}

pub fn pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    type S = PipelineStages;
    type V = vk::PipelineStageFlags;
    let table = [
        (S::TOP, V::TOP_OF_PIPE),
        (S::DRAW_INDIRECT, V::DRAW_INDIRECT),
        (S::VERTEX_INPUT, V::VERTEX_INPUT),
        (S::VERTEX_SHADER, V::VERTEX_SHADER),
        (S::GEOMETRY_SHADER, V::GEOMETRY_SHADER),
        (S::FRAGMENT_SHADER, V::FRAGMENT_SHADER),
        (S::EARLY_FRAGMENT_TESTS, V::EARLY_FRAGMENT_TESTS),
        (S::LATE_FRAGMENT_TESTS, V::LATE_FRAGMENT_TESTS),
        (S::COLOR_OUTPUT, V::COLOR_ATTACHMENT_OUTPUT),
        (S::COMPUTE_SHADER, V::COMPUTE_SHADER),
        (S::TRANSFER, V::TRANSFER),
        (S::BOTTOM, V::BOTTOM_OF_PIPE),
        (S::ALL_COMMANDS, V::ALL_COMMANDS),
    ];
    let mut flags = V::empty();
    for (stage, vk_stage) in table {
        if stages.contains(stage) {
            flags |= vk_stage;
        }
    }
    if flags.is_empty() { V::TOP_OF_PIPE } else { flags }
}

pub fn access(state: ResourceState) -> vk::AccessFlags {
    type A = vk::AccessFlags;
    match state {
        ResourceState::Undefined | ResourceState::Present => A::empty(),
        ResourceState::VertexBuffer => A::VERTEX_ATTRIBUTE_READ,
        ResourceState::IndexBuffer => A::INDEX_READ,
        ResourceState::ConstantBuffer => A::UNIFORM_READ,
        ResourceState::ShaderResource => A::SHADER_READ,
        ResourceState::UnorderedAccess => A::SHADER_READ | A::SHADER_WRITE,
        ResourceState::RenderTarget => A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ResourceState::DepthWrite => A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ResourceState::DepthRead => A::DEPTH_STENCIL_ATTACHMENT_READ,
        ResourceState::CopySrc => A::TRANSFER_READ,
        ResourceState::CopyDst => A::TRANSFER_WRITE,
        ResourceState::IndirectArgument => A::INDIRECT_COMMAND_READ,
    }
}

pub fn layout(state: ResourceState) -> vk::ImageLayout {
    type L = vk::ImageLayout;
    match state {
        ResourceState::Undefined => L::UNDEFINED,
        ResourceState::ShaderResource => L::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::UnorderedAccess => L::GENERAL,
        ResourceState::RenderTarget => L::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthWrite => L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => L::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::CopySrc => L::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDst => L::TRANSFER_DST_OPTIMAL,
        ResourceState::Present => L::PRESENT_SRC_KHR,
        // buffer 专用的状态不会出现在 image 上
        _ => L::GENERAL,
    }
}

pub fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub fn mipmap_mode(filter: Filter) -> vk::SamplerMipmapMode {
    match filter {
        Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
        Filter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub fn blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn color_mask(mask: ColorMask) -> vk::ColorComponentFlags {
    let mut flags = vk::ColorComponentFlags::empty();
    for (bit, vk_bit) in [
        (ColorMask::R, vk::ColorComponentFlags::R),
        (ColorMask::G, vk::ColorComponentFlags::G),
        (ColorMask::B, vk::ColorComponentFlags::B),
        (ColorMask::A, vk::ColorComponentFlags::A),
    ] {
        if mask.contains(bit) {
            flags |= vk_bit;
        }
    }
    flags
}

fn stencil_op(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub fn stencil_state(desc: &StencilDesc) -> vk::StencilOpState {
    vk::StencilOpState {
        fail_op: stencil_op(desc.fail),
        pass_op: stencil_op(desc.pass),
        depth_fail_op: stencil_op(desc.depth_fail),
        compare_op: compare_op(desc.compare),
        compare_mask: desc.read_mask as u32,
        write_mask: desc.write_mask as u32,
        reference: desc.reference as u32,
    }
}

pub fn cull_mode(cull: CullMode) -> vk::CullModeFlags {
    match cull {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn polygon_mode(fill: FillMode) -> vk::PolygonMode {
    match fill {
        FillMode::Solid => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
    }
}

pub fn topology(primitive: PrimitiveType) -> vk::PrimitiveTopology {
    match primitive {
        PrimitiveType::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveType::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveType::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveType::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveType::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_stages_union() {
        let stages = pipeline_stages(PipelineStages::VERTEX_INPUT | PipelineStages::COLOR_OUTPUT);
        assert_eq!(
            stages,
            vk::PipelineStageFlags::VERTEX_INPUT | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(pipeline_stages(PipelineStages::empty()), vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(aspect(Format::D32Float), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect(Format::D24UnormS8Uint),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect(Format::Rgba8Unorm), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_depth_render_target_usage() {
        let usage = image_usage(TextureUsage::RENDER_TARGET, Format::D32Float);
        assert!(usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }
}
