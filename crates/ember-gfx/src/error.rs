use crate::backend::memory::MemoryClass;

/// GFX 层的错误类型
///
/// 只有设备创建会把错误交还给调用者；运行期的原生错误统一通过 [`GfxResultExt::or_fatal`] 终止。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    /// 原生 API 调用返回了非成功的状态
    #[error("native call `{call}` failed: {code}")]
    Native { call: &'static str, code: String },

    /// descriptor pool 已经分配满了，调用者应该换一个新的 pool 重试
    #[error("descriptor pool is out of memory")]
    OutOfPoolMemory,

    #[error("no memory type satisfies {class:?} (type bits: {type_bits:#b})")]
    NoSuitableMemoryType { class: MemoryClass, type_bits: u32 },

    #[error("shader blob format is not supported by this backend: {0}")]
    UnsupportedShaderFormat(&'static str),

    #[error("no usable gpu found")]
    NoDevice,

    #[error("swapchain error: {0}")]
    Swapchain(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid binding layout: {0}")]
    InvalidLayout(String),

    #[error("dynamic offset {0} does not fit in 32 bits")]
    DynamicOffsetOverflow(u64),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    #[inline]
    pub fn native(call: &'static str, code: impl std::fmt::Debug) -> Self {
        Self::Native {
            call,
            code: format!("{code:?}"),
        }
    }
}

/// 原生错误属于致命错误：记录原因后终止，不做重试
pub trait GfxResultExt<T> {
    fn or_fatal(self, what: &str) -> T;
}

impl<T> GfxResultExt<T> for GfxResult<T> {
    #[inline]
    #[track_caller]
    fn or_fatal(self, what: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                log::error!("fatal gfx error while {what}: {err}");
                panic!("fatal gfx error while {what}: {err}");
            }
        }
    }
}
