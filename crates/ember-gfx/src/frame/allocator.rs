use std::ptr::NonNull;

use crate::backend::memory::MemoryClass;
use crate::backend::{BufferCreateInfo, BufferUsage, NativeBuffer, NativeMemory, RhiBackend};
use crate::error::GfxResult;

/// 向上对齐到 `align` 的整数倍
#[inline]
pub fn align_up(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        return offset;
    }
    offset.div_ceil(align) * align
}

/// 一块固定大小的内存以及 bump 偏移
#[derive(Debug)]
pub struct MemoryBlock {
    buffer: NativeBuffer,
    memory: NativeMemory,
    size: u64,
    offset: u64,
    mapped: Option<NonNull<u8>>,
}

impl MemoryBlock {
    /// 尝试在当前 block 中分配，空间不足时返回 None
    fn try_alloc(&mut self, size: u64, align: u64) -> Option<FrameAllocation> {
        let offset = align_up(self.offset, align);
        if offset + size > self.size {
            return None;
        }
        self.offset = offset + size;

        // SAFETY: offset + size <= block size，映射覆盖整个 block
        let mapped = self.mapped.map(|ptr| unsafe { NonNull::new_unchecked(ptr.as_ptr().add(offset as usize)) });
        Some(FrameAllocation {
            buffer: self.buffer,
            memory: self.memory,
            offset,
            size,
            mapped,
        })
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }

    #[inline]
    fn is_exhausted(&self) -> bool {
        self.offset >= self.size
    }
}

/// 从 frame allocator 中分配到的一段内存，只在分配它的那一帧有效
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameAllocation {
    pub buffer: NativeBuffer,
    pub memory: NativeMemory,
    pub offset: u64,
    pub size: u64,
    /// 已经加上了 offset 的映射地址
    pub mapped: Option<NonNull<u8>>,
}

impl FrameAllocation {
    /// 拷贝数据到映射的内存中
    ///
    /// # Panics
    /// 内存不可映射，或者 data 超出了分配的大小
    pub fn write(&self, data: &[u8]) {
        assert!(data.len() as u64 <= self.size, "write exceeds allocation");
        let Some(ptr) = self.mapped else {
            panic!("frame allocation is not host visible");
        };
        // SAFETY: 映射区域至少有 self.size 字节，且在本帧内不会被其他分配复用
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
    }

    /// 读回映射内存中的数据，非 coherent 的内存需要先 invalidate
    pub fn read(&self) -> Vec<u8> {
        let Some(ptr) = self.mapped else {
            panic!("frame allocation is not host visible");
        };
        // SAFETY: 同上
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) }.to_vec()
    }
}

/// 每个 frame slot、每种内存类别各一个的 bump allocator
///
/// 只有在 slot 的 fence 被等待之后才能 [`FrameAllocator::reset`]。
pub struct FrameAllocator {
    class: MemoryClass,
    default_block_size: u64,
    /// 还有剩余空间的 block，最后一个是当前正在使用的
    available: Vec<MemoryBlock>,
    /// 用完的 block，直到 reset 才会再次使用
    full: Vec<MemoryBlock>,
    blocks_created: u32,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl FrameAllocator {
    pub fn new(class: MemoryClass, default_block_size: u64) -> Self {
        Self {
            class,
            default_block_size,
            available: Vec::new(),
            full: Vec::new(),
            blocks_created: 0,

            #[cfg(debug_assertions)]
            destroyed: false,
        }
    }
}

// getters
impl FrameAllocator {
    #[inline]
    pub fn class(&self) -> MemoryClass {
        self.class
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.available.len() + self.full.len()
    }

    /// 累计创建过的 block 数量
    #[inline]
    pub fn blocks_created(&self) -> u32 {
        self.blocks_created
    }
}

// tools
impl FrameAllocator {
    pub fn alloc(&mut self, backend: &mut dyn RhiBackend, size: u64, align: u64) -> GfxResult<FrameAllocation> {
        let _span = tracy_client::span!("FrameAllocator::alloc");

        // 从当前 block 往前找，放不下的 block 留给之后较小的分配
        for index in (0..self.available.len()).rev() {
            let block = &mut self.available[index];
            if let Some(allocation) = block.try_alloc(size, align) {
                if block.is_exhausted() {
                    let block = self.available.remove(index);
                    self.full.push(block);
                }
                return Ok(allocation);
            }
        }

        let block_size = size.max(self.default_block_size);
        if size > self.default_block_size {
            log::warn!(
                "{:?} frame allocation of {} bytes exceeds default block size {}, creating an oversized block",
                self.class,
                size,
                self.default_block_size
            );
        }
        let mut block = self.create_block(backend, block_size)?;
        let allocation = block.try_alloc(size, align);
        if block.is_exhausted() {
            self.full.push(block);
        } else {
            self.available.push(block);
        }

        // 新 block 从 0 开始，0 满足任何对齐
        Ok(allocation.unwrap_or_else(|| unreachable!("fresh block must fit the allocation")))
    }

    /// 所有 block 回到 available，偏移置 0
    pub fn reset(&mut self) {
        self.available.append(&mut self.full);
        for block in &mut self.available {
            block.offset = 0;
        }
        // 让较大的 block 排在最后，优先被使用
        self.available.sort_by_key(|b| b.size);
    }

    /// 释放所有的 block，只在 device 销毁时调用
    pub fn release_blocks(&mut self, backend: &mut dyn RhiBackend) {
        for block in self.available.drain(..).chain(self.full.drain(..)) {
            backend.destroy_buffer(block.buffer);
            backend.free_memory(block.memory);
        }

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }

    fn create_block(&mut self, backend: &mut dyn RhiBackend, size: u64) -> GfxResult<MemoryBlock> {
        let name = format!("frame-block-{:?}-{}", self.class, self.blocks_created);
        let allocation = backend.create_buffer(&BufferCreateInfo {
            size,
            usage: BufferUsage::transient_block(),
            memory: self.class,
            name: &name,
        })?;
        self.blocks_created += 1;
        log::debug!("create frame block {name}: {size} bytes");

        Ok(MemoryBlock {
            buffer: allocation.buffer,
            memory: allocation.memory,
            size,
            offset: 0,
            mapped: allocation.mapped,
        })
    }
}

impl Drop for FrameAllocator {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(
                self.destroyed || self.block_count() == 0 || std::thread::panicking(),
                "FrameAllocator dropped without release_blocks"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig};

    fn host_allocator(block_size: u64) -> (HeadlessBackend, FrameAllocator) {
        (
            HeadlessBackend::new(HeadlessConfig::default()),
            FrameAllocator::new(MemoryClass::HostVisible, block_size),
        )
    }

    #[test]
    fn test_align_up_rounds_to_ceiling() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(13, 12), 24);
        assert_eq!(align_up(7, 1), 7);
    }

    #[test]
    fn test_allocations_never_overlap() {
        let (mut backend, mut allocator) = host_allocator(1024);
        let requests = [(10, 4), (100, 64), (3, 1), (256, 256), (17, 16), (1, 8)];

        let mut last_end = 0;
        for (size, align) in requests {
            let a = allocator.alloc(&mut backend, size, align).unwrap();
            assert_eq!(a.offset % align, 0);
            assert!(a.offset >= last_end, "offsets must increase monotonically");
            last_end = a.offset + a.size;
        }
        assert_eq!(allocator.block_count(), 1);
        allocator.release_blocks(&mut backend);
    }

    #[test]
    fn test_new_block_is_created_when_nothing_fits() {
        let (mut backend, mut allocator) = host_allocator(256);
        let a = allocator.alloc(&mut backend, 200, 4).unwrap();
        let b = allocator.alloc(&mut backend, 100, 4).unwrap();
        assert_ne!(a.buffer, b.buffer);
        assert_eq!(b.offset, 0);
        assert_eq!(allocator.block_count(), 2);
        // 第一个 block 还剩 56 字节，没有用完
        assert!(allocator.full.is_empty());

        // 用完之后才移到 full
        let c = allocator.alloc(&mut backend, 156, 4).unwrap();
        assert_eq!((c.buffer, c.offset), (b.buffer, 100));
        assert_eq!(allocator.full.len(), 1);
        let d = allocator.alloc(&mut backend, 56, 4).unwrap();
        assert_eq!((d.buffer, d.offset), (a.buffer, 200));
        assert_eq!(allocator.full.len(), 2);
        assert_eq!(allocator.blocks_created(), 2);
        allocator.release_blocks(&mut backend);
    }

    #[test]
    fn test_oversized_allocation_gets_own_block() {
        let (mut backend, mut allocator) = host_allocator(256);
        let a = allocator.alloc(&mut backend, 1000, 16).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(a.size, 1000);
        assert_eq!(allocator.full.last().map(|b| b.size()), Some(1000));
        allocator.release_blocks(&mut backend);
    }

    #[test]
    fn test_oversized_allocation_keeps_smaller_blocks_available() {
        let (mut backend, mut allocator) = host_allocator(256);
        let small = allocator.alloc(&mut backend, 64, 4).unwrap();
        allocator.reset();

        let big = allocator.alloc(&mut backend, 1000, 16).unwrap();
        assert_ne!(big.buffer, small.buffer);
        let again = allocator.alloc(&mut backend, 64, 4).unwrap();
        assert_eq!((again.buffer, again.offset), (small.buffer, 0));
        assert_eq!(allocator.blocks_created(), 2);
        assert_eq!(allocator.available.len(), 1);
        allocator.release_blocks(&mut backend);
    }

    #[test]
    fn test_reset_reuses_blocks_without_creating() {
        let (mut backend, mut allocator) = host_allocator(256);
        for _ in 0..4 {
            allocator.alloc(&mut backend, 200, 4).unwrap();
        }
        assert_eq!(allocator.blocks_created(), 4);

        allocator.reset();
        let a = allocator.alloc(&mut backend, 256, 4).unwrap();
        assert_eq!(a.offset, 0);
        for _ in 0..3 {
            allocator.alloc(&mut backend, 200, 4).unwrap();
        }
        assert_eq!(allocator.blocks_created(), 4);
        allocator.release_blocks(&mut backend);
    }

    #[test]
    fn test_mapped_pointer_is_offset() {
        let (mut backend, mut allocator) = host_allocator(1024);
        let a = allocator.alloc(&mut backend, 8, 4).unwrap();
        let b = allocator.alloc(&mut backend, 8, 256).unwrap();
        let (pa, pb) = (a.mapped.unwrap(), b.mapped.unwrap());
        assert_eq!(pb.as_ptr() as usize - pa.as_ptr() as usize, 256);

        b.write(&[1, 2, 3, 4]);
        let probe = backend.probe();
        assert_eq!(probe.read_buffer(b.buffer, 256, 4), vec![1, 2, 3, 4]);
        allocator.release_blocks(&mut backend);
    }
}
