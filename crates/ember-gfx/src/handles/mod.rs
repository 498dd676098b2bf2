//! 资源句柄
//!
//! - [`Handle`]：不持有引用的轻量句柄，用作函数参数
//! - [`Own`]：唯一的创建者引用，只能 move
//! - [`Ref`]：共享引用，clone 时 retain，drop 时 release

pub mod ownership;
pub mod pool;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

pub use ownership::{Own, Ref, RefTracker};
pub use pool::HandlePool;

/// 资源的类别，用于区分不同的 pool 以及引用计数表
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
    Shader,
    Technique,
    VertexFormat,
    BlendState,
    DepthStencilState,
    RasterizerState,
}

impl ResourceKind {
    pub const COUNT: usize = 9;

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// 标记类型与 [`ResourceKind`] 的对应关系
pub trait ResourceType: 'static {
    const KIND: ResourceKind;
}

macro_rules! resource_markers {
    ($($name:ident,)*) => {
        $(
            #[derive(Debug)]
            pub enum $name {}

            impl ResourceType for $name {
                const KIND: ResourceKind = ResourceKind::$name;
            }
        )*
    };
}

resource_markers! {
    Buffer,
    Texture,
    Sampler,
    Shader,
    Technique,
    VertexFormat,
    BlendState,
    DepthStencilState,
    RasterizerState,
}

/// pool 中的下标，0 是保留的无效句柄
///
/// 句柄没有 generation，是否还有效由引用计数保证。
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const INVALID: Self = Self::from_index(0);

    #[inline]
    pub const fn from_index(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != 0
    }
}

impl<T> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>();
        let name = name.rsplit("::").next().unwrap_or(name);
        write!(f, "{}#{}", name, self.index)
    }
}

impl<T: ResourceType> From<&Own<T>> for Handle<T> {
    #[inline]
    fn from(value: &Own<T>) -> Self {
        value.handle()
    }
}

impl<T: ResourceType> From<&Ref<T>> for Handle<T> {
    #[inline]
    fn from(value: &Ref<T>) -> Self {
        value.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handle_is_invalid() {
        let handle: Handle<Buffer> = Handle::default();
        assert!(!handle.is_valid());
        assert_eq!(handle, Handle::INVALID);
        assert!(Handle::<Texture>::from_index(3).is_valid());
    }

    #[test]
    fn test_debug_uses_marker_name() {
        let handle: Handle<Texture> = Handle::from_index(7);
        assert_eq!(format!("{handle:?}"), "Texture#7");
    }
}
