use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use crate::handles::Handle;

/// 句柄到资源记录的表
///
/// 下标 0 保留给无效句柄；被移除的下标进入 free list，下一次 push 时复用。
/// backing store 可能重新分配，但句柄的数值保持不变。
pub struct HandlePool<H, R> {
    slots: Vec<Option<R>>,
    free: Vec<u32>,
    len: usize,
    _marker: PhantomData<fn() -> H>,
}

impl<H, R> Default for HandlePool<H, R> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<H, R> HandlePool<H, R> {
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            free: Vec::new(),
            len: 0,
            _marker: PhantomData,
        }
    }
}

// tools
impl<H, R> HandlePool<H, R> {
    pub fn push(&mut self, record: R) -> Handle<H> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            debug_assert!(self.slots[index as usize].is_none());
            self.slots[index as usize] = Some(record);
            Handle::from_index(index)
        } else {
            self.slots.push(Some(record));
            Handle::from_index((self.slots.len() - 1) as u32)
        }
    }

    pub fn remove(&mut self, handle: Handle<H>) -> Option<R> {
        if !handle.is_valid() {
            return None;
        }
        let record = self.slots.get_mut(handle.index() as usize)?.take()?;
        self.free.push(handle.index());
        self.len -= 1;
        Some(record)
    }

    #[inline]
    pub fn get(&self, handle: Handle<H>) -> Option<&R> {
        if !handle.is_valid() {
            return None;
        }
        self.slots.get(handle.index() as usize)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, handle: Handle<H>) -> Option<&mut R> {
        if !handle.is_valid() {
            return None;
        }
        self.slots.get_mut(handle.index() as usize)?.as_mut()
    }

    #[inline]
    pub fn contains(&self, handle: Handle<H>) -> bool {
        self.get(handle).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<H>, &R)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|r| (Handle::from_index(index as u32), r)))
    }

    /// 移除所有记录，用于设备销毁
    pub fn drain(&mut self) -> impl Iterator<Item = (Handle<H>, R)> + '_ {
        self.free.clear();
        self.len = 0;
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.take().map(|r| (Handle::from_index(index as u32), r)))
    }
}

impl<H, R> Index<Handle<H>> for HandlePool<H, R> {
    type Output = R;

    #[inline]
    fn index(&self, handle: Handle<H>) -> &R {
        debug_assert!(handle.is_valid(), "indexing the reserved handle 0");
        match self.slots.get(handle.index() as usize) {
            Some(Some(record)) => record,
            _ => panic!("stale or invalid handle {handle:?}"),
        }
    }
}

impl<H, R> IndexMut<Handle<H>> for HandlePool<H, R> {
    #[inline]
    fn index_mut(&mut self, handle: Handle<H>) -> &mut R {
        debug_assert!(handle.is_valid(), "indexing the reserved handle 0");
        match self.slots.get_mut(handle.index() as usize) {
            Some(Some(record)) => record,
            _ => panic!("stale or invalid handle {handle:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::Buffer;

    #[test]
    fn test_first_handle_skips_reserved_slot() {
        let mut pool: HandlePool<Buffer, &str> = HandlePool::new();
        let a = pool.push("a");
        assert_eq!(a.index(), 1);
        assert_eq!(pool[a], "a");
        assert!(pool.get(Handle::INVALID).is_none());
    }

    #[test]
    fn test_removed_slot_is_reused() {
        let mut pool: HandlePool<Buffer, u32> = HandlePool::new();
        let a = pool.push(10);
        let b = pool.push(20);
        assert_eq!(pool.remove(a), Some(10));
        assert_eq!(pool.remove(a), None);
        assert_eq!(pool.len(), 1);

        let c = pool.push(30);
        assert_eq!(c, a);
        assert_eq!(pool[c], 30);
        assert_eq!(pool[b], 20);
    }

    #[test]
    fn test_handles_stay_stable_while_growing() {
        let mut pool: HandlePool<Buffer, usize> = HandlePool::new();
        let handles: Vec<_> = (0..100).map(|i| pool.push(i)).collect();
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(pool[*handle], i);
        }
        assert_eq!(pool.iter().count(), 100);
    }

    #[test]
    #[should_panic]
    fn test_indexing_removed_handle_panics() {
        let mut pool: HandlePool<Buffer, u32> = HandlePool::new();
        let a = pool.push(1);
        pool.remove(a);
        let _ = pool[a];
    }
}
