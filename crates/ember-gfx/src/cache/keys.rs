use crate::backend::NativeRenderPass;
use crate::desc::{ClearFlags, Format, PrimitiveType, MAX_COLOR_TARGETS, MAX_VERTEX_STREAMS};
use crate::handles::ResourceKind;

/// render target 的格式签名，决定了 pipeline 与 render pass 是否兼容
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct TargetSignature {
    pub color_formats: [Format; MAX_COLOR_TARGETS],
    pub color_count: u8,
    /// `Format::Undefined` 表示没有 depth
    pub depth_format: Format,
    pub samples: u32,
}

impl TargetSignature {
    #[inline]
    pub fn colors(&self) -> &[Format] {
        &self.color_formats[..self.color_count as usize]
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        self.depth_format != Format::Undefined
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    pub target: TargetSignature,
    pub clear: ClearFlags,
}

/// framebuffer 由 render pass 与 attachment 的身份（texture 的下标）决定
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub render_pass: NativeRenderPass,
    /// 0 表示该 color target 未使用
    pub colors: [u32; MAX_COLOR_TARGETS],
    pub depth: u32,
    pub width: u32,
    pub height: u32,
}

impl FramebufferKey {
    #[inline]
    pub fn references_texture(&self, index: u32) -> bool {
        self.depth == index || self.colors.contains(&index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub technique: u32,
    pub blend: u32,
    pub depth_stencil: u32,
    pub rasterizer: u32,
    pub strides: [u32; MAX_VERTEX_STREAMS],
    pub primitive: PrimitiveType,
    pub target: TargetSignature,
}

impl PipelineKey {
    /// compute pipeline 只由 technique 决定
    pub fn compute(technique: u32) -> Self {
        Self {
            technique,
            blend: 0,
            depth_stencil: 0,
            rasterizer: 0,
            strides: [0; MAX_VERTEX_STREAMS],
            primitive: PrimitiveType::TriangleList,
            target: TargetSignature::default(),
        }
    }

    pub fn references(&self, kind: ResourceKind, index: u32) -> bool {
        match kind {
            ResourceKind::Technique => self.technique == index,
            ResourceKind::BlendState => self.blend == index,
            ResourceKind::DepthStencilState => self.depth_stencil == index,
            ResourceKind::RasterizerState => self.rasterizer == index,
            _ => false,
        }
    }
}
