use crate::backend::memory::MemoryClass;
use crate::backend::{BufferCopy, BufferImageCopy, NativeBuffer, NativeCommandBuffer, NativeSemaphore, SubmitDesc};
use crate::commands::barrier::{PendingBarriers, ResourceState};
use crate::commands::context::{request_buffer_state, request_texture_state};
use crate::commands::GfxShared;
use crate::desc::QueueKind;
use crate::error::GfxResultExt;
use crate::frame::allocator::FrameAllocation;
use crate::handles::{Buffer, Handle, Texture};

/// staging 数据的对齐，满足所有格式的 texel 对齐
const STAGING_ALIGNMENT: u64 = 16;

/// 上传用的 context
///
/// 一帧内所有的上传都录制到同一个 command buffer 中，在第一次有 context 提交之前
/// （或者帧结束时）作为一次提交 flush，之后提交的 context 通过 semaphore 等待它。
///
/// 上传在 graphics 队列上执行，避免了队列之间的所有权转移。
pub struct UploadContext {
    /// 为空表示本帧还没有录制任何上传
    cmd: NativeCommandBuffer,
    barriers: PendingBarriers,
    copies: u32,
    bytes: u64,
}

impl Default for UploadContext {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl UploadContext {
    pub fn new() -> Self {
        Self {
            cmd: NativeCommandBuffer::null(),
            barriers: PendingBarriers::default(),
            copies: 0,
            bytes: 0,
        }
    }
}

// getters
impl UploadContext {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cmd.is_null()
    }

    /// 尚未提交的拷贝数量
    #[inline]
    pub fn pending_copies(&self) -> u32 {
        self.copies
    }
}

// tools
impl UploadContext {
    fn recording(&mut self, shared: &mut GfxShared) -> NativeCommandBuffer {
        if self.cmd.is_null() {
            let cmd = shared
                .command_buffers
                .acquire(shared.backend, QueueKind::Graphics)
                .or_fatal("acquiring the upload command buffer");
            shared.backend.begin_command_buffer(cmd).or_fatal("beginning the upload command buffer");
            self.cmd = cmd;
        }
        self.cmd
    }

    /// 从本帧的 host only allocator 中分配 staging 内存并写入数据
    pub fn stage(shared: &mut GfxShared, data: &[u8]) -> FrameAllocation {
        let staging = shared
            .slot
            .allocator(MemoryClass::HostOnly)
            .alloc(shared.backend, data.len() as u64, STAGING_ALIGNMENT)
            .or_fatal("allocating upload staging memory");
        staging.write(data);
        staging
    }

    /// 录制一次从 staging 到 `dst` 的拷贝，拷贝 staging 开头的 `size` 字节
    ///
    /// `dst` 是本帧刚刚分配的内存，不需要 barrier。
    pub fn copy_from_staging(
        &mut self,
        shared: &mut GfxShared,
        staging: &FrameAllocation,
        size: u64,
        dst: NativeBuffer,
        dst_offset: u64,
    ) {
        debug_assert!(size <= staging.size, "copy of {size} bytes exceeds the staging allocation");
        let cmd = self.recording(shared);
        shared.backend.cmd_copy_buffer(
            cmd,
            staging.buffer,
            dst,
            &[BufferCopy {
                src_offset: staging.offset,
                dst_offset,
                size,
            }],
        );
        self.count(shared, size);
    }

    /// 上传 `data` 到非 transient buffer 的 `offset` 处，之后 buffer 处于 `steady` 状态
    ///
    /// 拷贝之前 buffer 转换到 copy dst，等待之前所有提交中对它的读写。
    pub fn upload_buffer(
        &mut self,
        shared: &mut GfxShared,
        buffer: Handle<Buffer>,
        offset: u64,
        data: &[u8],
        steady: ResourceState,
    ) {
        let _span = tracy_client::span!("UploadContext::upload_buffer");
        let staging = Self::stage(shared, data);
        let binding = shared.resources.buffers[buffer].binding;

        let cmd = self.recording(shared);
        request_buffer_state(&mut self.barriers, shared.resources, buffer, ResourceState::CopyDst, false);
        self.flush_barriers(shared, cmd);
        self.copy_from_staging(shared, &staging, staging.size, binding.buffer, binding.offset + offset);
        request_buffer_state(&mut self.barriers, shared.resources, buffer, steady, false);
        self.flush_barriers(shared, cmd);
    }

    /// 上传所有 mip 的数据，之后 texture 处于 shader resource 状态
    ///
    /// `data` 中按 mip 顺序紧密排列，每一级 mip 包含所有的 layer。
    pub fn upload_texture(&mut self, shared: &mut GfxShared, texture: Handle<Texture>, data: &[u8]) {
        let _span = tracy_client::span!("UploadContext::upload_texture");
        let record = &shared.resources.textures[texture];
        let desc = record.desc;
        let image = record.image;

        let total: u64 = (0..desc.mip_count).map(|mip| desc.mip_size(mip)).sum();
        debug_assert!(
            data.len() as u64 >= total,
            "texture data has {} bytes, {total} expected",
            data.len()
        );
        let staging = Self::stage(shared, &data[..(total as usize).min(data.len())]);

        let mut offset = staging.offset;
        let regions: Vec<BufferImageCopy> = (0..desc.mip_count)
            .map(|mip| {
                let (width, height, depth) = desc.mip_extent(mip);
                let region = BufferImageCopy {
                    buffer_offset: offset,
                    mip_level: mip,
                    base_layer: 0,
                    layer_count: desc.layer_count(),
                    width,
                    height,
                    depth,
                };
                offset += desc.mip_size(mip);
                region
            })
            .collect();

        let cmd = self.recording(shared);
        request_texture_state(&mut self.barriers, shared.resources, texture, ResourceState::CopyDst, false);
        self.flush_barriers(shared, cmd);
        shared.backend.cmd_copy_buffer_to_image(cmd, staging.buffer, image, &regions);
        request_texture_state(
            &mut self.barriers,
            shared.resources,
            texture,
            ResourceState::ShaderResource,
            false,
        );
        self.flush_barriers(shared, cmd);

        self.count(shared, staging.size);
    }

    fn flush_barriers(&mut self, shared: &mut GfxShared, cmd: NativeCommandBuffer) {
        if let Some(transitions) = self.barriers.flush(shared.backend, cmd) {
            shared.stats.barrier_batches += 1;
            shared.stats.barrier_transitions += transitions as u32;
        }
    }

    fn count(&mut self, shared: &mut GfxShared, bytes: u64) {
        self.copies += 1;
        self.bytes += bytes;
        shared.stats.uploads += 1;
        shared.stats.uploaded_bytes += bytes;
    }

    /// 结束录制并提交，返回提交完成时 signal 的 semaphore；没有上传时返回 None
    pub fn flush(&mut self, shared: &mut GfxShared) -> Option<NativeSemaphore> {
        if self.is_empty() {
            return None;
        }
        let _span = tracy_client::span!("UploadContext::flush");

        let cmd = std::mem::replace(&mut self.cmd, NativeCommandBuffer::null());
        self.flush_barriers(shared, cmd);
        shared.backend.end_command_buffer(cmd).or_fatal("ending the upload command buffer");

        let semaphore = shared.slot.temp_semaphore(shared.backend).or_fatal("creating a semaphore");
        shared
            .backend
            .submit(
                QueueKind::Graphics,
                &SubmitDesc {
                    command_buffers: &[cmd],
                    waits: &[],
                    signals: &[semaphore],
                    fence: None,
                },
            )
            .or_fatal("submitting uploads");
        shared.slot.destroy_queue().enqueue_context(QueueKind::Graphics, cmd);
        shared.stats.submits += 1;

        log::debug!("flush {} uploads ({} bytes)", self.copies, self.bytes);
        self.copies = 0;
        self.bytes = 0;
        Some(semaphore)
    }
}
