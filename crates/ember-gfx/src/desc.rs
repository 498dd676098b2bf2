//! 对外的资源描述类型
//!
//! 这些都是与具体图形 API 无关的值类型，由 backend 负责翻译成原生结构体。

use bitflags::bitflags;

use crate::error::{GfxError, GfxResult};
use crate::handles::{Handle, Shader, Texture, VertexFormat};

pub const MAX_COLOR_TARGETS: usize = 4;
pub const MAX_VERTEX_STREAMS: usize = 4;
pub const MAX_CONSTANT_BUFFERS: usize = 4;
pub const MAX_SAMPLERS: usize = 8;
pub const MAX_TEXTURES: usize = 8;
pub const MAX_STORAGE_IMAGES: usize = 4;
pub const MAX_STORAGE_BUFFERS: usize = 4;
/// 所有实现都保证支持的 push constant 大小
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Undefined,
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    R16Uint,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Uint,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8Uint,
}

impl Format {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Undefined => 0,
            Format::R8Unorm => 1,
            Format::Rg8Unorm | Format::R16Uint | Format::R16Float | Format::D16Unorm => 2,
            Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Unorm
            | Format::Bgra8Srgb
            | Format::Rg16Float
            | Format::R32Uint
            | Format::R32Float
            | Format::D24UnormS8Uint
            | Format::D32Float => 4,
            Format::Rgba16Float | Format::Rg32Float | Format::D32FloatS8Uint => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
        }
    }

    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, Format::D16Unorm | Format::D24UnormS8Uint | Format::D32Float | Format::D32FloatS8Uint)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8Uint)
    }
}

bitflags! {
    /// buffer 的用途
    ///
    /// - `TRANSIENT`：每次更新都会重新分配存储（renaming），数据只在更新的那一帧有效
    /// - `HOST_VISIBLE`：常驻映射的 buffer，可以通过 map/unmap 直接访问
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        const VERTEX       = 1 << 0;
        const INDEX        = 1 << 1;
        const CONSTANT     = 1 << 2;
        const STORAGE      = 1 << 3;
        const INDIRECT     = 1 << 4;
        const TEXEL        = 1 << 5;
        const TRANSIENT    = 1 << 6;
        const HOST_VISIBLE = 1 << 7;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub flags: BufferFlags,
    /// 只有 `TEXEL` buffer 需要
    pub format: Format,
    pub stride: u32,
    pub count: u32,
}

impl BufferDesc {
    pub fn new(flags: BufferFlags, stride: u32, count: u32) -> Self {
        Self {
            flags,
            format: Format::Undefined,
            stride,
            count,
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.stride as u64 * self.count as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TextureKind {
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED       = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
        const STORAGE       = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    /// 3D 纹理的深度，或者数组纹理的层数
    pub depth_or_layers: u32,
    pub mip_count: u32,
    pub samples: u32,
    pub format: Format,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            kind: TextureKind::D2,
            width,
            height,
            depth_or_layers: 1,
            mip_count: 1,
            samples: 1,
            format,
            usage,
        }
    }

    #[inline]
    pub fn with_mips(mut self, mip_count: u32) -> Self {
        self.mip_count = mip_count;
        self
    }

    #[inline]
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    #[inline]
    pub fn layer_count(&self) -> u32 {
        match self.kind {
            TextureKind::D2 | TextureKind::D3 => 1,
            TextureKind::D2Array => self.depth_or_layers,
            TextureKind::Cube => 6,
        }
    }

    /// 第 `mip` 级的尺寸，最小为 1
    #[inline]
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let depth = if self.kind == TextureKind::D3 { self.depth_or_layers } else { 1 };
        ((self.width >> mip).max(1), (self.height >> mip).max(1), (depth >> mip).max(1))
    }

    /// 紧密排列的某一级 mip（包含所有 layer）的字节数
    pub fn mip_size(&self, mip: u32) -> u64 {
        let (w, h, d) = self.mip_extent(mip);
        w as u64 * h as u64 * d as u64 * self.layer_count() as u64 * self.format.bytes_per_pixel() as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mip_filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    /// 1.0 表示不开启各向异性过滤
    pub max_anisotropy: f32,
    pub compare: Option<CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            mip_filter: Filter::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            max_anisotropy: 1.0,
            compare: None,
            min_lod: 0.0,
            max_lod: 1000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    Zero,
    #[default]
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
    }
}

/// 作用于所有 color target 的混合状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub enable: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: ColorMask,
}

impl BlendDesc {
    pub fn opaque() -> Self {
        Self {
            enable: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: ColorMask::all(),
        }
    }

    pub fn alpha() -> Self {
        Self {
            enable: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
            ..Self::opaque()
        }
    }

    pub fn additive() -> Self {
        Self {
            enable: true,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::One,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::One,
            ..Self::opaque()
        }
    }
}

impl Default for BlendDesc {
    fn default() -> Self {
        Self::opaque()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct StencilDesc {
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
    pub compare: CompareOp,
    pub read_mask: u8,
    pub write_mask: u8,
    pub reference: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub stencil: Option<StencilDesc>,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareOp::Less,
            stencil: None,
        }
    }
}

impl DepthStencilDesc {
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_compare: CompareOp::Always,
            stencil: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerDesc {
    pub cull: CullMode,
    /// 按照 OpenGL 的传统，将 CCW 视为 front face
    pub front_ccw: bool,
    pub fill: FillMode,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clamp: bool,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            cull: CullMode::Back,
            front_ccw: true,
            fill: FillMode::Solid,
            depth_bias: 0,
            slope_scaled_depth_bias: 0.0,
            depth_clamp: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub stream: u32,
    pub format: Format,
    pub offset: u32,
}

/// 顶点格式：只描述属性布局，stride 来自绑定的 vertex buffer
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct VertexFormatDesc {
    pub attributes: Vec<VertexAttribute>,
    /// 第 i 位为 1 表示第 i 个 stream 按 instance 步进
    pub instance_stream_mask: u32,
}

impl VertexFormatDesc {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder
    pub fn attribute(mut self, location: u32, stream: u32, format: Format, offset: u32) -> Self {
        self.attributes.push(VertexAttribute {
            location,
            stream,
            format,
            offset,
        });
        self
    }

    /// builder
    pub fn per_instance(mut self, stream: u32) -> Self {
        self.instance_stream_mask |= 1 << stream;
        self
    }

    pub fn stream_count(&self) -> usize {
        self.attributes.iter().map(|a| a.stream as usize + 1).max().unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Compute,
    Mesh,
}

/// 带标签的 shader 字节块
#[derive(Clone, Copy, Debug)]
pub enum ShaderCode<'a> {
    SpirV(&'a [u8]),
    Dxbc(&'a [u8]),
    Dxil(&'a [u8]),
    Glsl(&'a str),
    Hlsl(&'a str),
    Msl(&'a str),
}

impl ShaderCode<'_> {
    pub fn tag(&self) -> &'static str {
        match self {
            ShaderCode::SpirV(_) => "spirv",
            ShaderCode::Dxbc(_) => "dxbc",
            ShaderCode::Dxil(_) => "dxil",
            ShaderCode::Glsl(_) => "glsl",
            ShaderCode::Hlsl(_) => "hlsl",
            ShaderCode::Msl(_) => "msl",
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            ShaderCode::SpirV(b) | ShaderCode::Dxbc(b) | ShaderCode::Dxil(b) => b,
            ShaderCode::Glsl(s) | ShaderCode::Hlsl(s) | ShaderCode::Msl(s) => s.as_bytes(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ShaderDesc<'a> {
    pub stage: ShaderStage,
    pub code: ShaderCode<'a>,
    pub entry_point: &'a str,
}

/// 一个 technique 使用的资源绑定布局
///
/// 所有资源都在 set 0 中，binding 顺序固定为：
/// constant buffers -> samplers -> textures -> storage images -> storage buffers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BindingLayout {
    pub constant_buffers: u32,
    pub samplers: u32,
    pub textures: u32,
    pub storage_images: u32,
    pub storage_buffers: u32,
    pub push_constant_size: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ConstantBuffer,
    Sampler,
    Texture,
    StorageImage,
    StorageBuffer,
}

impl BindingLayout {
    /// 某个资源槽在 set 0 中对应的 binding 编号
    pub fn binding(&self, kind: BindingKind, slot: u32) -> u32 {
        let base = match kind {
            BindingKind::ConstantBuffer => 0,
            BindingKind::Sampler => self.constant_buffers,
            BindingKind::Texture => self.constant_buffers + self.samplers,
            BindingKind::StorageImage => self.constant_buffers + self.samplers + self.textures,
            BindingKind::StorageBuffer => {
                self.constant_buffers + self.samplers + self.textures + self.storage_images
            }
        };
        base + slot
    }

    #[inline]
    pub fn total_bindings(&self) -> u32 {
        self.constant_buffers + self.samplers + self.textures + self.storage_images + self.storage_buffers
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_bindings() == 0
    }

    /// 每一类资源的数量不能超过 context 中对应的槽位数
    pub fn validate(&self) -> GfxResult<()> {
        let limits = [
            ("constant buffers", self.constant_buffers, MAX_CONSTANT_BUFFERS),
            ("samplers", self.samplers, MAX_SAMPLERS),
            ("textures", self.textures, MAX_TEXTURES),
            ("storage images", self.storage_images, MAX_STORAGE_IMAGES),
            ("storage buffers", self.storage_buffers, MAX_STORAGE_BUFFERS),
        ];
        for (kind, count, max) in limits {
            if count as usize > max {
                return Err(GfxError::InvalidLayout(format!("{count} {kind}, at most {max}")));
            }
        }
        if self.push_constant_size > MAX_PUSH_CONSTANT_SIZE || self.push_constant_size % 4 != 0 {
            return Err(GfxError::InvalidLayout(format!(
                "push constant size {} must be a multiple of 4 and at most {MAX_PUSH_CONSTANT_SIZE}",
                self.push_constant_size
            )));
        }
        Ok(())
    }
}

/// technique = 一组 shader + 顶点格式 + 绑定布局
#[derive(Clone, Copy, Debug, Default)]
pub struct TechniqueDesc {
    pub vertex: Option<Handle<Shader>>,
    pub pixel: Option<Handle<Shader>>,
    pub geometry: Option<Handle<Shader>>,
    pub mesh: Option<Handle<Shader>>,
    pub compute: Option<Handle<Shader>>,
    pub vertex_format: Option<Handle<VertexFormat>>,
    pub layout: BindingLayout,
}

impl TechniqueDesc {
    #[inline]
    pub fn is_compute(&self) -> bool {
        self.compute.is_some()
    }
}

bitflags! {
    /// render pass 开始时需要清除的 attachment
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR0  = 1 << 0;
        const COLOR1  = 1 << 1;
        const COLOR2  = 1 << 2;
        const COLOR3  = 1 << 3;
        const DEPTH   = 1 << 4;
        const STENCIL = 1 << 5;
        const COLOR = Self::COLOR0.bits() | Self::COLOR1.bits() | Self::COLOR2.bits() | Self::COLOR3.bits();
    }
}

impl ClearFlags {
    #[inline]
    pub fn color(index: usize) -> Self {
        Self::from_bits_truncate(1 << index)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassDesc {
    pub colors: [Option<Handle<Texture>>; MAX_COLOR_TARGETS],
    pub depth: Option<Handle<Texture>>,
    pub clear: ClearFlags,
    pub clear_colors: [glam::Vec4; MAX_COLOR_TARGETS],
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

impl Default for RenderPassDesc {
    fn default() -> Self {
        Self {
            colors: [None; MAX_COLOR_TARGETS],
            depth: None,
            clear: ClearFlags::empty(),
            clear_colors: [glam::Vec4::ZERO; MAX_COLOR_TARGETS],
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

// builder
impl RenderPassDesc {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn color(mut self, index: usize, texture: impl Into<Handle<Texture>>) -> Self {
        self.colors[index] = Some(texture.into());
        self
    }

    #[inline]
    pub fn depth(mut self, texture: impl Into<Handle<Texture>>) -> Self {
        self.depth = Some(texture.into());
        self
    }

    #[inline]
    pub fn clear_color(mut self, index: usize, color: glam::Vec4) -> Self {
        self.clear |= ClearFlags::color(index);
        self.clear_colors[index] = color;
        self
    }

    #[inline]
    pub fn clear_depth(mut self, depth: f32, stencil: Option<u32>) -> Self {
        self.clear |= ClearFlags::DEPTH;
        self.clear_depth = depth;
        if let Some(stencil) = stencil {
            self.clear |= ClearFlags::STENCIL;
            self.clear_stencil = stencil;
        }
        self
    }

    #[inline]
    pub fn color_count(&self) -> usize {
        self.colors.iter().take_while(|c| c.is_some()).count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_extent(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// 逻辑队列
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    pub const COUNT: usize = 3;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_slots_follow_layout_order() {
        let layout = BindingLayout {
            constant_buffers: 2,
            samplers: 1,
            textures: 3,
            storage_images: 1,
            storage_buffers: 2,
            push_constant_size: 0,
        };
        assert_eq!(layout.binding(BindingKind::ConstantBuffer, 1), 1);
        assert_eq!(layout.binding(BindingKind::Sampler, 0), 2);
        assert_eq!(layout.binding(BindingKind::Texture, 2), 5);
        assert_eq!(layout.binding(BindingKind::StorageImage, 0), 6);
        assert_eq!(layout.binding(BindingKind::StorageBuffer, 1), 8);
        assert_eq!(layout.total_bindings(), 9);
    }

    #[test]
    fn test_binding_layout_counts_are_bounded_by_slots() {
        let full = BindingLayout {
            constant_buffers: MAX_CONSTANT_BUFFERS as u32,
            samplers: MAX_SAMPLERS as u32,
            textures: MAX_TEXTURES as u32,
            storage_images: MAX_STORAGE_IMAGES as u32,
            storage_buffers: MAX_STORAGE_BUFFERS as u32,
            push_constant_size: MAX_PUSH_CONSTANT_SIZE,
        };
        assert!(full.validate().is_ok());

        let too_many = [
            BindingLayout {
                constant_buffers: MAX_CONSTANT_BUFFERS as u32 + 1,
                ..Default::default()
            },
            BindingLayout {
                samplers: MAX_SAMPLERS as u32 + 1,
                ..Default::default()
            },
            BindingLayout {
                textures: MAX_TEXTURES as u32 + 1,
                ..Default::default()
            },
            BindingLayout {
                storage_images: MAX_STORAGE_IMAGES as u32 + 1,
                ..Default::default()
            },
            BindingLayout {
                storage_buffers: MAX_STORAGE_BUFFERS as u32 + 1,
                ..Default::default()
            },
            BindingLayout {
                push_constant_size: 6,
                ..Default::default()
            },
        ];
        for layout in too_many {
            assert!(matches!(layout.validate(), Err(GfxError::InvalidLayout(_))), "{layout:?}");
        }
    }

    #[test]
    fn test_mip_size_never_reaches_zero() {
        let desc = TextureDesc::new_2d(8, 2, Format::Rgba8Unorm, TextureUsage::SAMPLED).with_mips(4);
        assert_eq!(desc.mip_extent(3), (1, 1, 1));
        assert_eq!(desc.mip_size(0), 8 * 2 * 4);
        assert_eq!(desc.mip_size(2), 2 * 4);
    }

    #[test]
    fn test_render_pass_desc_clear_flags() {
        let desc = RenderPassDesc::new().clear_color(1, glam::Vec4::ONE).clear_depth(0.0, Some(1));
        assert!(desc.clear.contains(ClearFlags::COLOR1 | ClearFlags::DEPTH | ClearFlags::STENCIL));
        assert!(!desc.clear.contains(ClearFlags::COLOR0));
    }
}
