use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::handles::{Handle, ResourceKind, ResourceType};

/// 所有资源的引用计数表
///
/// 由 device 与所有的 [`Own`] / [`Ref`] 共享。计数归零的资源进入 released 队列，
/// 由 device 在帧边界统一回收（移出 pool，原生对象进入延迟销毁队列）。
#[derive(Default)]
pub struct RefTracker {
    inner: RefCell<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    counts: [Vec<u32>; ResourceKind::COUNT],
    released: Vec<(ResourceKind, u32)>,
}

impl RefTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 资源刚刚创建，计数置为 1
    pub fn register(&self, kind: ResourceKind, index: u32) {
        let mut inner = self.inner.borrow_mut();
        let counts = &mut inner.counts[kind.index()];
        if counts.len() <= index as usize {
            counts.resize(index as usize + 1, 0);
        }
        debug_assert_eq!(counts[index as usize], 0, "{kind:?}#{index} registered twice");
        counts[index as usize] = 1;
    }

    pub fn retain(&self, kind: ResourceKind, index: u32) {
        let mut inner = self.inner.borrow_mut();
        let count = &mut inner.counts[kind.index()][index as usize];
        debug_assert!(*count > 0, "retain on dead resource {kind:?}#{index}");
        *count += 1;
    }

    /// 计数减一，归零时返回 true 并加入 released 队列
    pub fn release(&self, kind: ResourceKind, index: u32) -> bool {
        let mut inner = self.inner.borrow_mut();
        let count = &mut inner.counts[kind.index()][index as usize];
        debug_assert!(*count > 0, "release on dead resource {kind:?}#{index}");
        *count -= 1;
        if *count == 0 {
            inner.released.push((kind, index));
            true
        } else {
            false
        }
    }

    pub fn count(&self, kind: ResourceKind, index: u32) -> u32 {
        let inner = self.inner.borrow();
        inner.counts[kind.index()].get(index as usize).copied().unwrap_or(0)
    }

    #[inline]
    pub fn has_released(&self) -> bool {
        !self.inner.borrow().released.is_empty()
    }

    pub fn take_released(&self) -> Vec<(ResourceKind, u32)> {
        std::mem::take(&mut self.inner.borrow_mut().released)
    }
}

/// 资源的唯一创建者引用
///
/// 只能 move，drop 或 [`Own::reset`] 时 release 一次。
pub struct Own<T: ResourceType> {
    handle: Handle<T>,
    tracker: Option<Rc<RefTracker>>,
}

// new & init
impl<T: ResourceType> Own<T> {
    /// 只有创建资源的 device 可以构造 `Own`，此时资源的计数已经是 1
    pub(crate) fn new(handle: Handle<T>, tracker: Rc<RefTracker>) -> Self {
        Self {
            handle,
            tracker: Some(tracker),
        }
    }
}

// getters
impl<T: ResourceType> Own<T> {
    #[inline]
    pub fn handle(&self) -> Handle<T> {
        self.handle
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.handle.is_valid()
    }
}

// tools
impl<T: ResourceType> Own<T> {
    pub fn reset(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            if self.handle.is_valid() {
                tracker.release(T::KIND, self.handle.index());
            }
        }
        self.handle = Handle::INVALID;
    }

    /// 转换为共享引用，计数不变
    pub fn into_ref(mut self) -> Ref<T> {
        Ref {
            handle: std::mem::take(&mut self.handle),
            tracker: self.tracker.take(),
        }
    }

    /// 额外创建一个共享引用
    pub fn share(&self) -> Ref<T> {
        Ref::retain(self.handle, self.tracker.clone())
    }
}

impl<T: ResourceType> Default for Own<T> {
    fn default() -> Self {
        Self {
            handle: Handle::INVALID,
            tracker: None,
        }
    }
}

impl<T: ResourceType> Drop for Own<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ResourceType> fmt::Debug for Own<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Own({:?})", self.handle)
    }
}

/// 共享引用
pub struct Ref<T: ResourceType> {
    handle: Handle<T>,
    tracker: Option<Rc<RefTracker>>,
}

impl<T: ResourceType> Ref<T> {
    pub(crate) fn retain(handle: Handle<T>, tracker: Option<Rc<RefTracker>>) -> Self {
        if let Some(tracker) = &tracker {
            if handle.is_valid() {
                tracker.retain(T::KIND, handle.index());
            }
        }
        Self { handle, tracker }
    }

    #[inline]
    pub fn handle(&self) -> Handle<T> {
        self.handle
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn reset(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            if self.handle.is_valid() {
                tracker.release(T::KIND, self.handle.index());
            }
        }
        self.handle = Handle::INVALID;
    }
}

impl<T: ResourceType> From<Own<T>> for Ref<T> {
    fn from(value: Own<T>) -> Self {
        value.into_ref()
    }
}

impl<T: ResourceType> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self::retain(self.handle, self.tracker.clone())
    }
}

impl<T: ResourceType> Default for Ref<T> {
    fn default() -> Self {
        Self {
            handle: Handle::INVALID,
            tracker: None,
        }
    }
}

impl<T: ResourceType> Drop for Ref<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ResourceType> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:?})", self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{Buffer, Texture};

    fn make_own<T: ResourceType>(tracker: &Rc<RefTracker>, index: u32) -> Own<T> {
        tracker.register(T::KIND, index);
        Own::new(Handle::from_index(index), tracker.clone())
    }

    #[test]
    fn test_own_move_leaves_source_invalid() {
        let tracker = Rc::new(RefTracker::new());
        let mut a: Own<Buffer> = make_own(&tracker, 1);

        let b = std::mem::take(&mut a);
        assert!(!a.valid());
        assert!(b.valid());
        assert_eq!(tracker.count(ResourceKind::Buffer, 1), 1);

        drop(a);
        assert_eq!(tracker.count(ResourceKind::Buffer, 1), 1);
        assert!(!tracker.has_released());

        drop(b);
        assert_eq!(tracker.count(ResourceKind::Buffer, 1), 0);
        assert_eq!(tracker.take_released(), vec![(ResourceKind::Buffer, 1)]);
    }

    #[test]
    fn test_own_reset_releases_once() {
        let tracker = Rc::new(RefTracker::new());
        let mut own: Own<Texture> = make_own(&tracker, 2);
        own.reset();
        own.reset();
        assert!(!own.valid());
        assert_eq!(tracker.take_released(), vec![(ResourceKind::Texture, 2)]);
    }

    #[test]
    fn test_ref_needs_n_plus_one_releases() {
        let tracker = Rc::new(RefTracker::new());
        let original: Ref<Buffer> = make_own(&tracker, 3).into_ref();
        assert_eq!(tracker.count(ResourceKind::Buffer, 3), 1);

        let copies: Vec<_> = (0..4).map(|_| original.clone()).collect();
        assert_eq!(tracker.count(ResourceKind::Buffer, 3), 5);

        for copy in copies {
            drop(copy);
            assert!(!tracker.has_released());
        }
        drop(original);
        assert_eq!(tracker.take_released(), vec![(ResourceKind::Buffer, 3)]);
    }

    #[test]
    fn test_ref_move_keeps_count() {
        let tracker = Rc::new(RefTracker::new());
        let own: Own<Buffer> = make_own(&tracker, 1);
        let shared = own.share();
        assert_eq!(tracker.count(ResourceKind::Buffer, 1), 2);

        let moved = shared;
        assert_eq!(tracker.count(ResourceKind::Buffer, 1), 2);
        drop(own);
        assert_eq!(tracker.count(ResourceKind::Buffer, 1), 1);
        drop(moved);
        assert_eq!(tracker.count(ResourceKind::Buffer, 1), 0);
    }

    #[test]
    fn test_handle_from_wrappers_does_not_retain() {
        let tracker = Rc::new(RefTracker::new());
        let own: Own<Buffer> = make_own(&tracker, 1);
        let handle: Handle<Buffer> = (&own).into();
        assert_eq!(handle.index(), 1);
        assert_eq!(tracker.count(ResourceKind::Buffer, 1), 1);
    }
}
