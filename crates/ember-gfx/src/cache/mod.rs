//! render pass / framebuffer / pipeline 缓存
//!
//! key 只包含逻辑上相关的字段，相同的 key 总是得到同一个原生对象。
//! 缓存项只会在两种情况下被移除：device 销毁，或者 key 引用的资源槽被释放（见 [`ObjectCache::purge`]）。

pub mod keys;

use std::collections::HashMap;
use std::hash::Hash;

pub use keys::{FramebufferKey, PipelineKey, RenderPassKey, TargetSignature};

use crate::error::GfxResult;

pub struct ObjectCache<K, V> {
    map: HashMap<K, V>,
    hits: u64,
    misses: u64,
}

impl<K, V> Default for ObjectCache<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }
}

impl<K: Eq + Hash + Copy, V: Copy> ObjectCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命中时直接返回，否则调用 `create` 创建并插入；第二个返回值表示是否命中
    pub fn get_or_create(&mut self, key: K, create: impl FnOnce(&K) -> GfxResult<V>) -> GfxResult<(V, bool)> {
        if let Some(value) = self.map.get(&key) {
            self.hits += 1;
            return Ok((*value, true));
        }

        let value = create(&key)?;
        self.misses += 1;
        self.map.insert(key, value);
        Ok((value, false))
    }

    #[inline]
    pub fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).copied()
    }

    /// 移除所有满足条件的缓存项，被移除的对象交给 `on_removed`
    pub fn purge(&mut self, mut predicate: impl FnMut(&K) -> bool, mut on_removed: impl FnMut(V)) -> usize {
        let before = self.map.len();
        self.map.retain(|key, value| {
            if predicate(key) {
                on_removed(*value);
                false
            } else {
                true
            }
        });
        before - self.map.len()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.map.drain()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{Format, PrimitiveType};
    use crate::handles::ResourceKind;

    fn key(technique: u32) -> PipelineKey {
        PipelineKey {
            technique,
            blend: 1,
            depth_stencil: 1,
            rasterizer: 1,
            strides: [12, 0, 0, 0],
            primitive: PrimitiveType::TriangleList,
            target: TargetSignature {
                color_formats: [Format::Rgba8Unorm, Format::Undefined, Format::Undefined, Format::Undefined],
                color_count: 1,
                depth_format: Format::D32Float,
                samples: 1,
            },
        }
    }

    #[test]
    fn test_create_runs_once_per_key() {
        let mut cache: ObjectCache<PipelineKey, u64> = ObjectCache::new();
        let mut created = 0;
        for _ in 0..3 {
            let (value, _) = cache
                .get_or_create(key(1), |_| {
                    created += 1;
                    Ok(100)
                })
                .unwrap();
            assert_eq!(value, 100);
        }
        assert_eq!(created, 1);
        assert_eq!((cache.hits(), cache.misses()), (2, 1));
    }

    #[test]
    fn test_each_field_changes_key() {
        let base = key(1);
        let mut variants = vec![key(2)];
        variants.push(PipelineKey { blend: 2, ..base });
        variants.push(PipelineKey { depth_stencil: 2, ..base });
        variants.push(PipelineKey { rasterizer: 2, ..base });
        variants.push(PipelineKey {
            strides: [16, 0, 0, 0],
            ..base
        });
        variants.push(PipelineKey {
            primitive: PrimitiveType::LineList,
            ..base
        });
        let mut target = base.target;
        target.color_count = 2;
        variants.push(PipelineKey { target, ..base });
        let mut target = base.target;
        target.samples = 4;
        variants.push(PipelineKey { target, ..base });

        let mut cache: ObjectCache<PipelineKey, u64> = ObjectCache::new();
        cache.get_or_create(base, |_| Ok(0)).unwrap();
        for (i, variant) in variants.into_iter().enumerate() {
            let (_, hit) = cache.get_or_create(variant, |_| Ok(i as u64 + 1)).unwrap();
            assert!(!hit, "variant {i} must miss");
        }
    }

    #[test]
    fn test_purge_removes_referencing_entries() {
        let mut cache: ObjectCache<PipelineKey, u64> = ObjectCache::new();
        cache.get_or_create(key(1), |_| Ok(10)).unwrap();
        cache.get_or_create(key(2), |_| Ok(20)).unwrap();

        let mut removed = Vec::new();
        let count = cache.purge(|k| k.references(ResourceKind::Technique, 1), |v| removed.push(v));
        assert_eq!(count, 1);
        assert_eq!(removed, vec![10]);
        assert_eq!(cache.get(&key(2)), Some(20));
    }
}
