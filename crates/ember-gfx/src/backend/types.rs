//! 跨越 backend 边界的数据类型
//!
//! 原生对象统一用 64 位整数表示，0 表示空对象；具体含义由各个 backend 自己解释。

use std::ptr::NonNull;

use bitflags::bitflags;

use crate::backend::memory::MemoryClass;
use crate::commands::barrier::{PipelineStages, ResourceState};
use crate::desc::{
    BlendDesc, DepthStencilDesc, Format, PrimitiveType, RasterizerDesc, ShaderStage, TextureKind, TextureUsage,
    VertexAttribute,
};

macro_rules! native_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
            pub struct $name(u64);

            impl $name {
                #[inline]
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }
                #[inline]
                pub const fn null() -> Self {
                    Self(0)
                }
                #[inline]
                pub const fn raw(self) -> u64 {
                    self.0
                }
                #[inline]
                pub const fn is_null(self) -> bool {
                    self.0 == 0
                }
            }
        )*
    };
}

native_handle! {
    NativeBuffer;
    NativeImage;
    NativeImageView;
    NativeBufferView;
    NativeSampler;
    NativeMemory;
    NativeShaderModule;
    NativeDescriptorSetLayout;
    NativePipelineLayout;
    NativePipeline;
    NativeRenderPass;
    NativeFramebuffer;
    NativeDescriptorPool;
    NativeDescriptorSet;
    NativeCommandBuffer;
    NativeFence;
    NativeSemaphore;
    NativeQueryPool;
}

bitflags! {
    /// 原生 buffer 的用途
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX        = 1 << 0;
        const INDEX         = 1 << 1;
        const UNIFORM       = 1 << 2;
        const STORAGE       = 1 << 3;
        const INDIRECT      = 1 << 4;
        const UNIFORM_TEXEL = 1 << 5;
        const STORAGE_TEXEL = 1 << 6;
        const COPY_SRC      = 1 << 7;
        const COPY_DST      = 1 << 8;
    }
}

impl BufferUsage {
    /// frame allocator 中的 block 会被用作任何用途
    pub fn transient_block() -> Self {
        Self::VERTEX | Self::INDEX | Self::UNIFORM | Self::STORAGE | Self::INDIRECT | Self::COPY_SRC | Self::COPY_DST
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BufferCreateInfo<'a> {
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryClass,
    pub name: &'a str,
}

/// 一个 buffer 以及它独占的内存
#[derive(Clone, Copy, Debug)]
pub struct BufferAllocation {
    pub buffer: NativeBuffer,
    pub memory: NativeMemory,
    pub size: u64,
    /// 可映射的内存会在创建时常驻映射
    pub mapped: Option<NonNull<u8>>,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageCreateInfo<'a> {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub layers: u32,
    pub mip_count: u32,
    pub samples: u32,
    pub format: Format,
    pub usage: TextureUsage,
    pub name: &'a str,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageAllocation {
    pub image: NativeImage,
    pub memory: NativeMemory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

#[derive(Clone, Copy, Debug)]
pub struct ShaderStageInfo<'a> {
    pub stage: ShaderStage,
    pub module: NativeShaderModule,
    pub entry_point: &'a str,
}

#[derive(Clone, Copy, Debug)]
pub struct GraphicsPipelineInfo<'a> {
    pub layout: NativePipelineLayout,
    pub render_pass: NativeRenderPass,
    pub stages: &'a [ShaderStageInfo<'a>],
    pub attributes: &'a [VertexAttribute],
    /// 每个 vertex stream 的 stride，0 表示该 stream 未使用
    pub strides: &'a [u32],
    pub instance_stream_mask: u32,
    pub primitive: PrimitiveType,
    pub blend: &'a BlendDesc,
    pub depth_stencil: &'a DepthStencilDesc,
    pub rasterizer: &'a RasterizerDesc,
    pub color_count: u32,
    pub samples: u32,
}

/// render pass 中一个 attachment 的清除值，顺序为 color 在前、depth 在后
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassBeginInfo<'a> {
    pub render_pass: NativeRenderPass,
    pub framebuffer: NativeFramebuffer,
    pub width: u32,
    pub height: u32,
    pub clear_values: &'a [ClearValue],
}

/// 写入 descriptor set 的一项资源
///
/// constant buffer 都是 dynamic uniform buffer，偏移量在绑定时通过 dynamic offset 给出
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorWrite {
    ConstantBuffer { binding: u32, buffer: NativeBuffer, range: u64 },
    Sampler { binding: u32, sampler: NativeSampler },
    Texture { binding: u32, view: NativeImageView },
    StorageImage { binding: u32, view: NativeImageView },
    StorageBuffer { binding: u32, buffer: NativeBuffer, offset: u64, range: u64 },
}

impl DescriptorWrite {
    #[inline]
    pub fn binding(&self) -> u32 {
        match *self {
            DescriptorWrite::ConstantBuffer { binding, .. }
            | DescriptorWrite::Sampler { binding, .. }
            | DescriptorWrite::Texture { binding, .. }
            | DescriptorWrite::StorageImage { binding, .. }
            | DescriptorWrite::StorageBuffer { binding, .. } => binding,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferTransition {
    pub buffer: NativeBuffer,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 整张 image 的状态转换（所有 mip 与 layer）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageTransition {
    pub image: NativeImage,
    pub format: Format,
    pub mip_count: u32,
    pub layer_count: u32,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 一次批量的 pipeline barrier
#[derive(Clone, Copy, Debug)]
pub struct BarrierBatch<'a> {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub buffers: &'a [BufferTransition],
    pub images: &'a [ImageTransition],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// buffer 与 image 某一级 mip 之间的拷贝，buffer 中的数据是紧密排列的
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub mip_level: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct SubmitDesc<'a> {
    pub command_buffers: &'a [NativeCommandBuffer],
    pub waits: &'a [(NativeSemaphore, PipelineStages)],
    pub signals: &'a [NativeSemaphore],
    pub fence: Option<NativeFence>,
}

#[derive(Clone, Debug)]
pub struct SwapchainInfo {
    pub images: Vec<NativeImage>,
    pub format: Format,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    Suboptimal,
    OutOfDate,
}
