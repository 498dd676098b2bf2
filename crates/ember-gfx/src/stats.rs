use std::ops::AddAssign;

/// 设备能力
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceCaps {
    pub api_name: &'static str,
    pub device_name: String,
    /// dynamic uniform buffer 偏移量的最小对齐
    pub min_constant_buffer_alignment: u64,
    pub min_storage_buffer_alignment: u64,
    pub max_texture_size: u32,
    /// 一个 timestamp tick 对应的纳秒数
    pub timestamp_period_ns: f32,
    pub distinct_compute_queue: bool,
    pub distinct_transfer_queue: bool,
}

/// 每帧的统计数据
///
/// 设备同时维护当前帧与累计两份，累计值在 `end_frame` 时合并。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draws: u32,
    pub dispatches: u32,
    pub pipeline_binds: u32,
    pub descriptor_sets_written: u32,
    /// 只改变了 dynamic offset 的重新绑定
    pub dynamic_offset_rebinds: u32,
    pub barrier_batches: u32,
    pub barrier_transitions: u32,
    pub uploads: u32,
    pub uploaded_bytes: u64,
    pub submits: u32,

    pub pipeline_cache_hits: u32,
    pub pipeline_cache_misses: u32,
    pub render_pass_cache_hits: u32,
    pub render_pass_cache_misses: u32,
    pub framebuffer_cache_hits: u32,
    pub framebuffer_cache_misses: u32,

    pub deferred_destructions: u32,
    pub allocator_blocks_created: u32,
}

impl AddAssign for FrameStats {
    fn add_assign(&mut self, rhs: Self) {
        self.draws += rhs.draws;
        self.dispatches += rhs.dispatches;
        self.pipeline_binds += rhs.pipeline_binds;
        self.descriptor_sets_written += rhs.descriptor_sets_written;
        self.dynamic_offset_rebinds += rhs.dynamic_offset_rebinds;
        self.barrier_batches += rhs.barrier_batches;
        self.barrier_transitions += rhs.barrier_transitions;
        self.uploads += rhs.uploads;
        self.uploaded_bytes += rhs.uploaded_bytes;
        self.submits += rhs.submits;
        self.pipeline_cache_hits += rhs.pipeline_cache_hits;
        self.pipeline_cache_misses += rhs.pipeline_cache_misses;
        self.render_pass_cache_hits += rhs.render_pass_cache_hits;
        self.render_pass_cache_misses += rhs.render_pass_cache_misses;
        self.framebuffer_cache_hits += rhs.framebuffer_cache_hits;
        self.framebuffer_cache_misses += rhs.framebuffer_cache_misses;
        self.deferred_destructions += rhs.deferred_destructions;
        self.allocator_blocks_created += rhs.allocator_blocks_created;
    }
}

/// 一个 GPU timer 的结果
#[derive(Clone, Debug, PartialEq)]
pub struct TimerResult {
    pub name: String,
    pub milliseconds: f64,
}
