use std::ptr::NonNull;

use crate::backend::memory::MemoryClass;
use crate::backend::{BufferCreateInfo, BufferUsage, NativeBufferView};
use crate::commands::barrier::ResourceState;
use crate::desc::{
    BlendDesc, BufferDesc, BufferFlags, DepthStencilDesc, QueueKind, RasterizerDesc, SamplerDesc, ShaderDesc,
    TechniqueDesc, TextureDesc, VertexFormatDesc,
};
use crate::device::resources::{
    BufferBinding, BufferRecord, PendingUpdate, SamplerRecord, ShaderRecord, TechniqueRecord, TextureRecord,
};
use crate::device::{image_info, Device};
use crate::error::{GfxError, GfxResultExt};
use crate::handles::{
    BlendState, Buffer, DepthStencilState, Handle, Own, RasterizerState, Ref, Sampler, Shader, Technique, Texture,
    VertexFormat,
};

/// 原生 buffer 的用途，所有独占的 buffer 都可以作为拷贝的源与目标
fn buffer_usage(flags: BufferFlags) -> BufferUsage {
    let mut usage = BufferUsage::COPY_SRC | BufferUsage::COPY_DST;
    if flags.contains(BufferFlags::VERTEX) {
        usage |= BufferUsage::VERTEX;
    }
    if flags.contains(BufferFlags::INDEX) {
        usage |= BufferUsage::INDEX;
    }
    if flags.contains(BufferFlags::CONSTANT) {
        usage |= BufferUsage::UNIFORM;
    }
    if flags.contains(BufferFlags::STORAGE) {
        usage |= BufferUsage::STORAGE;
    }
    if flags.contains(BufferFlags::INDIRECT) {
        usage |= BufferUsage::INDIRECT;
    }
    if flags.contains(BufferFlags::TEXEL) {
        usage |= if flags.contains(BufferFlags::STORAGE) {
            BufferUsage::STORAGE_TEXEL
        } else {
            BufferUsage::UNIFORM_TEXEL
        };
    }
    usage
}

/// 每次上传之后 buffer 回到的稳定状态，按该用途使用时不需要 barrier
fn initial_state(flags: BufferFlags) -> ResourceState {
    if flags.contains(BufferFlags::VERTEX) {
        ResourceState::VertexBuffer
    } else if flags.contains(BufferFlags::INDEX) {
        ResourceState::IndexBuffer
    } else if flags.contains(BufferFlags::INDIRECT) {
        ResourceState::IndirectArgument
    } else if flags.contains(BufferFlags::CONSTANT) {
        ResourceState::ConstantBuffer
    } else if flags.contains(BufferFlags::STORAGE) {
        ResourceState::UnorderedAccess
    } else {
        ResourceState::CopyDst
    }
}

/// 映射内存上的可写切片，内存不可映射属于致命错误
///
/// # Safety
/// `ptr` 指向的映射区域至少有 `len` 字节，且在 `'a` 内没有其他的访问
unsafe fn mapped_slice<'a>(ptr: Option<NonNull<u8>>, len: u64, what: &str) -> &'a mut [u8] {
    let ptr = ptr
        .ok_or_else(|| GfxError::native("map", "memory is not host visible"))
        .or_fatal(what);
    unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len as usize) }
}

// buffer
impl Device {
    /// 创建 buffer，`data` 不为空时作为初始内容
    ///
    /// transient buffer 不分配存储，每次更新时从当前帧的 allocator 中 rename。
    pub fn create_buffer(&mut self, desc: &BufferDesc, data: Option<&[u8]>) -> Own<Buffer> {
        let _span = tracy_client::span!("Device::create_buffer");
        let size = desc.size();
        debug_assert!(size > 0, "buffer with zero size: {desc:?}");
        let transient = desc.flags.contains(BufferFlags::TRANSIENT);
        debug_assert!(
            !(transient && desc.flags.intersects(BufferFlags::TEXEL | BufferFlags::HOST_VISIBLE)),
            "transient buffers cannot be texel or host visible: {desc:?}"
        );

        let mut record = BufferRecord {
            desc: *desc,
            storage: None,
            view: NativeBufferView::null(),
            binding: BufferBinding::NONE,
            state: ResourceState::Undefined,
            last_update_frame: None,
            pending_update: None,
            mapped_by_user: false,
        };
        if !transient {
            let memory = if desc.flags.contains(BufferFlags::HOST_VISIBLE) {
                MemoryClass::HostVisible
            } else {
                MemoryClass::DeviceLocal
            };
            let allocation = self
                .backend
                .create_buffer(&BufferCreateInfo {
                    size,
                    usage: buffer_usage(desc.flags),
                    memory,
                    name: "buffer",
                })
                .or_fatal("creating a buffer");
            record.storage = Some((allocation.buffer, allocation.memory));
            record.binding = BufferBinding {
                buffer: allocation.buffer,
                offset: 0,
                mapped: allocation.mapped,
            };
            if desc.flags.contains(BufferFlags::TEXEL) {
                record.view = self
                    .backend
                    .create_buffer_view(allocation.buffer, desc.format, 0, size)
                    .or_fatal("creating a buffer view");
            }
        }

        let handle = self.resources.buffers.push(record);
        let own = self.register(handle);
        if let Some(data) = data {
            self.write_initial_data(handle, data);
        }
        own
    }

    fn write_initial_data(&mut self, handle: Handle<Buffer>, data: &[u8]) {
        let record = &self.resources.buffers[handle];
        debug_assert!(data.len() as u64 <= record.desc.size(), "initial data larger than {handle:?}");
        let (flags, binding) = (record.desc.flags, record.binding);

        if flags.contains(BufferFlags::TRANSIENT) {
            self.begin_update_buffer(handle, data.len() as u64).copy_from_slice(data);
            self.end_update_buffer(handle);
        } else if let Some(ptr) = binding.mapped {
            // SAFETY: 常驻映射覆盖整个 buffer，buffer 刚刚创建，GPU 还没有使用它
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
        } else {
            self.prepare_slot();
            let mut shared = gfx_shared!(self);
            self.upload.upload_buffer(&mut shared, handle, 0, data, initial_state(flags));
        }
    }

    /// 取得 host visible buffer 的常驻映射
    ///
    /// 调用者需要自己保证 GPU 不会同时读取正在写入的区域。
    pub fn map_buffer(&mut self, buffer: impl Into<Handle<Buffer>>) -> &mut [u8] {
        let handle = buffer.into();
        let record = &mut self.resources.buffers[handle];
        debug_assert!(
            record.desc.flags.contains(BufferFlags::HOST_VISIBLE),
            "{handle:?} is not host visible"
        );
        debug_assert!(!record.mapped_by_user, "{handle:?} is already mapped");
        record.mapped_by_user = true;

        // SAFETY: 常驻映射覆盖整个 buffer，返回的切片借用了 device
        unsafe { mapped_slice(record.binding.mapped, record.desc.size(), "mapping a buffer") }
    }

    pub fn unmap_buffer(&mut self, buffer: impl Into<Handle<Buffer>>) {
        let handle = buffer.into();
        let record = &mut self.resources.buffers[handle];
        debug_assert!(record.mapped_by_user, "{handle:?} is not mapped");
        record.mapped_by_user = false;
    }

    /// 开始更新 transient buffer 开头的 `size` 字节，返回可写入的内存
    ///
    /// constant buffer 直接写入 host visible 内存；其他用途先写入 staging，
    /// 在 [`Device::end_update_buffer`] 时拷贝到当前帧的 device local 内存。
    /// 无论更新多少字节，rename 总是分配整个 buffer 的大小，descriptor 的 range 才不会越界。
    /// 没有写入的部分内容未定义。
    pub fn begin_update_buffer(&mut self, buffer: impl Into<Handle<Buffer>>, size: u64) -> &mut [u8] {
        let handle = buffer.into();
        self.prepare_slot();

        let record = &self.resources.buffers[handle];
        debug_assert!(record.is_transient(), "begin_update_buffer on a non-transient {handle:?}");
        debug_assert!(record.pending_update.is_none(), "{handle:?} is already being updated");
        debug_assert!(
            size > 0 && size <= record.desc.size(),
            "update of {size} bytes does not fit {handle:?} ({} bytes)",
            record.desc.size()
        );
        let direct = record.desc.flags.contains(BufferFlags::CONSTANT);
        let full_size = record.desc.size();

        let (class, align) = if direct {
            (MemoryClass::HostVisible, self.caps.min_constant_buffer_alignment)
        } else {
            (MemoryClass::HostOnly, 16)
        };
        let slot = &mut self.frame_slots[self.frame_counter.slot_index()];
        let staging = slot
            .allocator(class)
            .alloc(self.backend.as_mut(), full_size, align)
            .or_fatal("allocating transient buffer memory");

        self.resources.buffers[handle].pending_update = Some(PendingUpdate {
            staging,
            written: size,
            direct,
        });
        // SAFETY: 映射区域有 size 字节，只属于本次更新，在本帧结束之前不会被复用
        unsafe { mapped_slice(staging.mapped, size, "updating a buffer") }
    }

    /// 结束更新，buffer 绑定到新的内存
    pub fn end_update_buffer(&mut self, buffer: impl Into<Handle<Buffer>>) {
        let handle = buffer.into();
        let Some(update) = self.resources.buffers[handle].pending_update.take() else {
            debug_assert!(false, "end_update_buffer without begin_update_buffer on {handle:?}");
            return;
        };

        let binding = if update.direct {
            BufferBinding {
                buffer: update.staging.buffer,
                offset: update.staging.offset,
                mapped: update.staging.mapped,
            }
        } else {
            let align = self.caps.min_storage_buffer_alignment.max(16);
            let mut shared = gfx_shared!(self);
            let dst = shared
                .slot
                .allocator(MemoryClass::DeviceLocal)
                .alloc(shared.backend, update.staging.size, align)
                .or_fatal("allocating transient buffer memory");
            self.upload
                .copy_from_staging(&mut shared, &update.staging, update.written, dst.buffer, dst.offset);
            BufferBinding {
                buffer: dst.buffer,
                offset: dst.offset,
                mapped: None,
            }
        };

        let record = &mut self.resources.buffers[handle];
        record.binding = binding;
        record.last_update_frame = Some(self.frame_counter.frame_id());
    }

    /// 一次性更新 transient buffer 的全部内容
    pub fn update_buffer(&mut self, buffer: impl Into<Handle<Buffer>>, data: &[u8]) {
        let handle = buffer.into();
        self.begin_update_buffer(handle, data.len() as u64).copy_from_slice(data);
        self.end_update_buffer(handle);
    }

    /// 把非 transient buffer 的 `data` 上传到 `offset` 处
    pub fn upload_buffer(&mut self, buffer: impl Into<Handle<Buffer>>, offset: u64, data: &[u8]) {
        let handle = buffer.into();
        self.prepare_slot();
        let record = &self.resources.buffers[handle];
        debug_assert!(!record.is_transient(), "use update_buffer for transient {handle:?}");
        debug_assert!(offset + data.len() as u64 <= record.desc.size(), "upload exceeds {handle:?}");
        let flags = record.desc.flags;

        let mut shared = gfx_shared!(self);
        self.upload.upload_buffer(&mut shared, handle, offset, data, initial_state(flags));
    }
}

// texture & sampler
impl Device {
    /// 创建 texture，`data` 按 mip 顺序紧密排列
    pub fn create_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> Own<Texture> {
        let _span = tracy_client::span!("Device::create_texture");
        let info = image_info(desc, "texture");
        let allocation = self.backend.create_image(&info).or_fatal("creating a texture");
        let view = self
            .backend
            .create_image_view(allocation.image, &info)
            .or_fatal("creating a texture view");

        let handle = self.resources.textures.push(TextureRecord {
            desc: *desc,
            image: allocation.image,
            memory: allocation.memory,
            view,
            state: ResourceState::Undefined,
        });
        let own = self.register(handle);
        if let Some(data) = data {
            self.upload_texture(handle, data);
        }
        own
    }

    /// 上传所有 mip 的数据，之后 texture 处于 shader resource 状态
    pub fn upload_texture(&mut self, texture: impl Into<Handle<Texture>>, data: &[u8]) {
        let handle = texture.into();
        self.prepare_slot();
        let mut shared = gfx_shared!(self);
        self.upload.upload_texture(&mut shared, handle, data);
    }

    pub fn create_sampler(&mut self, desc: &SamplerDesc) -> Own<Sampler> {
        let native = self.backend.create_sampler(desc).or_fatal("creating a sampler");
        let handle = self.resources.samplers.push(SamplerRecord { desc: *desc, native });
        self.register(handle)
    }
}

// program & fixed function state
impl Device {
    pub fn create_shader(&mut self, desc: &ShaderDesc) -> Own<Shader> {
        let module = self.backend.create_shader_module(desc).or_fatal("creating a shader module");
        let handle = self.resources.shaders.push(ShaderRecord {
            stage: desc.stage,
            module,
            entry_point: desc.entry_point.to_string(),
        });
        self.register(handle)
    }

    /// 创建 technique，它持有所有 shader 与 vertex format 的引用
    pub fn create_technique(&mut self, desc: &TechniqueDesc) -> Own<Technique> {
        let _span = tracy_client::span!("Device::create_technique");
        let is_compute = desc.is_compute();
        debug_assert!(
            !is_compute || (desc.vertex.is_none() && desc.pixel.is_none() && desc.geometry.is_none() && desc.mesh.is_none()),
            "a compute technique cannot have graphics stages"
        );
        debug_assert!(is_compute || desc.vertex.is_some() || desc.mesh.is_some(), "technique without a vertex or mesh stage");
        desc.layout.validate().or_fatal("creating a technique");

        let stages = if is_compute {
            vec![desc.compute]
        } else {
            vec![desc.vertex, desc.mesh, desc.geometry, desc.pixel]
        };
        let shaders: Vec<Ref<Shader>> = stages.into_iter().flatten().map(|h| self.share(h)).collect();
        let vertex_format = desc.vertex_format.map(|h| self.share(h)).unwrap_or_default();

        let set_layout = self
            .backend
            .create_descriptor_set_layout(&desc.layout)
            .or_fatal("creating a descriptor set layout");
        let pipeline_layout = self
            .backend
            .create_pipeline_layout(set_layout, desc.layout.push_constant_size)
            .or_fatal("creating a pipeline layout");

        let handle = self.resources.techniques.push(TechniqueRecord {
            shaders,
            vertex_format,
            layout: desc.layout,
            set_layout,
            pipeline_layout,
            is_compute,
        });
        log::debug!("create technique {handle:?}: {:?}", desc.layout);
        self.register(handle)
    }

    pub fn create_vertex_format(&mut self, desc: &VertexFormatDesc) -> Own<VertexFormat> {
        let handle = self.resources.vertex_formats.push(desc.clone());
        self.register(handle)
    }

    pub fn create_blend_state(&mut self, desc: &BlendDesc) -> Own<BlendState> {
        let handle = self.resources.blend_states.push(*desc);
        self.register(handle)
    }

    pub fn create_depth_stencil_state(&mut self, desc: &DepthStencilDesc) -> Own<DepthStencilState> {
        let handle = self.resources.depth_stencil_states.push(*desc);
        self.register(handle)
    }

    pub fn create_rasterizer_state(&mut self, desc: &RasterizerDesc) -> Own<RasterizerState> {
        let handle = self.resources.rasterizer_states.push(*desc);
        self.register(handle)
    }
}

// readback
impl Device {
    /// 同步读回 buffer 的全部内容，会等待设备空闲
    pub fn read_buffer_sync(&mut self, buffer: impl Into<Handle<Buffer>>) -> Vec<u8> {
        let _span = tracy_client::span!("Device::read_buffer_sync");
        let handle = buffer.into();
        let ctx = self.begin_context(QueueKind::Graphics);
        let readback = self.record(ctx).copy_buffer_to_readback(handle);
        self.submit(ctx);
        self.finish();

        self.backend.invalidate_memory(readback.memory);
        readback.read()
    }

    /// 同步读回 texture 某一级 mip 的全部 layer，会等待设备空闲
    pub fn read_texture_sync(&mut self, texture: impl Into<Handle<Texture>>, mip: u32) -> Vec<u8> {
        let _span = tracy_client::span!("Device::read_texture_sync");
        let handle = texture.into();
        let ctx = self.begin_context(QueueKind::Graphics);
        let readback = self.record(ctx).copy_texture_to_readback(handle, mip);
        self.submit(ctx);
        self.finish();

        self.backend.invalidate_memory(readback.memory);
        readback.read()
    }
}
