use std::collections::HashMap;

use crate::backend::{NativeDescriptorPool, NativeDescriptorSet, NativeDescriptorSetLayout, RhiBackend};
use crate::error::{GfxError, GfxResult};

/// 帧内的 descriptor set 缓存
///
/// 每次从 pool 中批量分配 `sets_per_batch` 个 set，用完之后再分配下一批；
/// pool 耗尽时切换到下一个 pool，没有的话就新建一个。
/// 所有的 set 只在本帧有效，slot 被复用时整体 reset。
pub struct DescriptorSetCache {
    pools: Vec<NativeDescriptorPool>,
    current_pool: usize,
    sets_per_pool: u32,
    sets_per_batch: u32,
    free_sets: HashMap<NativeDescriptorSetLayout, Vec<NativeDescriptorSet>>,
    /// 本帧分配过的 batch 数量
    batches: u32,
}

// new & init
impl DescriptorSetCache {
    pub fn new(sets_per_pool: u32, sets_per_batch: u32) -> Self {
        debug_assert!(sets_per_batch > 0 && sets_per_batch <= sets_per_pool);
        Self {
            pools: Vec::new(),
            current_pool: 0,
            sets_per_pool,
            sets_per_batch,
            free_sets: HashMap::new(),
            batches: 0,
        }
    }
}

// getters
impl DescriptorSetCache {
    #[inline]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    #[inline]
    pub fn batches(&self) -> u32 {
        self.batches
    }
}

// tools
impl DescriptorSetCache {
    pub fn acquire(
        &mut self,
        backend: &mut dyn RhiBackend,
        layout: NativeDescriptorSetLayout,
    ) -> GfxResult<NativeDescriptorSet> {
        let free = self.free_sets.entry(layout).or_default();
        if let Some(set) = free.pop() {
            return Ok(set);
        }

        let _span = tracy_client::span!("DescriptorSetCache::refill");
        loop {
            let fresh_pool = self.current_pool >= self.pools.len();
            if fresh_pool {
                let pool = backend.create_descriptor_pool(self.sets_per_pool)?;
                log::info!(
                    "grow descriptor pools: {} -> {} ({} sets each)",
                    self.pools.len(),
                    self.pools.len() + 1,
                    self.sets_per_pool
                );
                self.pools.push(pool);
            }

            let pool = self.pools[self.current_pool];
            let free = self.free_sets.entry(layout).or_default();
            match backend.allocate_descriptor_sets(pool, layout, self.sets_per_batch, free) {
                Ok(()) => break,
                Err(GfxError::OutOfPoolMemory) if !fresh_pool => self.current_pool += 1,
                Err(err) => return Err(err),
            }
        }
        self.batches += 1;

        let free = self.free_sets.entry(layout).or_default();
        free.pop().ok_or(GfxError::OutOfPoolMemory)
    }

    /// 回收所有的 set，只能在 slot 的 fence 被等待之后调用
    pub fn reset(&mut self, backend: &mut dyn RhiBackend) {
        for pool in &self.pools {
            backend.reset_descriptor_pool(*pool);
        }
        self.free_sets.clear();
        self.current_pool = 0;
        self.batches = 0;
    }

    pub fn destroy(&mut self, backend: &mut dyn RhiBackend) {
        self.free_sets.clear();
        for pool in self.pools.drain(..) {
            backend.destroy_descriptor_pool(pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig};
    use crate::desc::BindingLayout;

    fn setup() -> (HeadlessBackend, NativeDescriptorSetLayout) {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let layout = backend
            .create_descriptor_set_layout(&BindingLayout {
                constant_buffers: 1,
                ..Default::default()
            })
            .unwrap();
        (backend, layout)
    }

    #[test]
    fn test_sets_come_from_batches() {
        let (mut backend, layout) = setup();
        let probe = backend.probe();
        let mut cache = DescriptorSetCache::new(16, 4);

        let sets: Vec<_> = (0..4).map(|_| cache.acquire(&mut backend, layout).unwrap()).collect();
        assert_eq!(cache.batches(), 1);
        assert_eq!(probe.descriptor_set_allocations(), 1);

        cache.acquire(&mut backend, layout).unwrap();
        assert_eq!(cache.batches(), 2);

        let mut unique = sets.clone();
        unique.dedup();
        assert_eq!(unique.len(), 4);
        cache.destroy(&mut backend);
    }

    #[test]
    fn test_out_of_pool_memory_grows_pool() {
        let (mut backend, layout) = setup();
        let mut cache = DescriptorSetCache::new(4, 2);

        for _ in 0..9 {
            cache.acquire(&mut backend, layout).unwrap();
        }
        assert_eq!(cache.pool_count(), 3);

        // reset 之后复用已有的 pool
        cache.reset(&mut backend);
        for _ in 0..9 {
            cache.acquire(&mut backend, layout).unwrap();
        }
        assert_eq!(cache.pool_count(), 3);
        cache.destroy(&mut backend);
    }
}
