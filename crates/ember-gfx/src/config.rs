use crate::backend::memory::MemoryClass;
use crate::error::{GfxError, GfxResult};

/// 创建 device 时使用的配置
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub app_name: String,
    pub engine_name: String,

    /// frame slot 的数量，None 表示和 swapchain 的 image 数量一致（限制在 2..=3）
    pub frames_in_flight: Option<usize>,
    /// 是否开启 validation layer 以及 debug messenger
    pub enable_validation: bool,
    /// 0 表示 immediate，>= 1 表示 vsync
    pub present_interval: u32,
    pub window_extent: glam::UVec2,

    pub device_local_block_size: u64,
    pub host_visible_block_size: u64,
    pub host_only_block_size: u64,
    pub host_cached_block_size: u64,

    /// 每次从 descriptor pool 中批量分配的 set 数量
    pub descriptor_sets_per_batch: u32,
    /// 每个 descriptor pool 的容量
    pub descriptor_sets_per_pool: u32,

    /// 每个 frame slot 的 timestamp query pool 中可以容纳的 timer 数量
    pub max_timers_per_frame: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "ember".to_string(),
            engine_name: "ember-gfx".to_string(),
            frames_in_flight: None,
            enable_validation: cfg!(debug_assertions),
            present_interval: 1,
            window_extent: glam::UVec2::new(1280, 720),
            device_local_block_size: 4 * 1024 * 1024,
            host_visible_block_size: 4 * 1024 * 1024,
            host_only_block_size: 8 * 1024 * 1024,
            host_cached_block_size: 1024 * 1024,
            descriptor_sets_per_batch: 32,
            descriptor_sets_per_pool: 1024,
            max_timers_per_frame: 64,
        }
    }
}

// builder
impl DeviceConfig {
    #[inline]
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    #[inline]
    pub fn with_frames_in_flight(mut self, count: usize) -> Self {
        self.frames_in_flight = Some(count);
        self
    }

    #[inline]
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    #[inline]
    pub fn with_present_interval(mut self, interval: u32) -> Self {
        self.present_interval = interval;
        self
    }

    #[inline]
    pub fn with_window_extent(mut self, width: u32, height: u32) -> Self {
        self.window_extent = glam::UVec2::new(width, height);
        self
    }

    /// 所有内存类别使用同样的 block 大小
    #[inline]
    pub fn with_block_size(mut self, size: u64) -> Self {
        self.device_local_block_size = size;
        self.host_visible_block_size = size;
        self.host_only_block_size = size;
        self.host_cached_block_size = size;
        self
    }

    #[inline]
    pub fn with_descriptor_batching(mut self, sets_per_batch: u32, sets_per_pool: u32) -> Self {
        self.descriptor_sets_per_batch = sets_per_batch;
        self.descriptor_sets_per_pool = sets_per_pool;
        self
    }

    #[inline]
    pub fn with_max_timers(mut self, count: u32) -> Self {
        self.max_timers_per_frame = count;
        self
    }
}

// tools
impl DeviceConfig {
    #[inline]
    pub fn block_size(&self, class: MemoryClass) -> u64 {
        match class {
            MemoryClass::DeviceLocal => self.device_local_block_size,
            MemoryClass::HostVisible => self.host_visible_block_size,
            MemoryClass::HostOnly => self.host_only_block_size,
            MemoryClass::HostCached => self.host_cached_block_size,
        }
    }

    /// 根据 swapchain 的 image 数量决定 frame slot 的数量
    #[inline]
    pub fn resolve_frames_in_flight(&self, swapchain_images: usize) -> usize {
        self.frames_in_flight.unwrap_or_else(|| swapchain_images.clamp(2, 3))
    }

    pub fn validate(&self) -> GfxResult<()> {
        for class in MemoryClass::ALL {
            if self.block_size(class) == 0 {
                return Err(GfxError::InvalidConfig(format!("{class:?} block size must not be zero")));
            }
        }
        if self.descriptor_sets_per_batch == 0 || self.descriptor_sets_per_pool == 0 {
            return Err(GfxError::InvalidConfig("descriptor batch and pool sizes must not be zero".to_string()));
        }
        if self.descriptor_sets_per_batch > self.descriptor_sets_per_pool {
            return Err(GfxError::InvalidConfig(format!(
                "descriptor batch ({}) is larger than a pool ({})",
                self.descriptor_sets_per_batch, self.descriptor_sets_per_pool
            )));
        }
        if let Some(count) = self.frames_in_flight {
            if !(1..=4).contains(&count) {
                return Err(GfxError::InvalidConfig(format!("frames_in_flight must be in 1..=4, got {count}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DeviceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            DeviceConfig::default().with_block_size(0),
            DeviceConfig::default().with_descriptor_batching(0, 16),
            DeviceConfig::default().with_descriptor_batching(64, 16),
            DeviceConfig::default().with_frames_in_flight(0),
            DeviceConfig::default().with_frames_in_flight(5),
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(GfxError::InvalidConfig(_))), "{config:?}");
        }
    }

    #[test]
    fn test_frames_in_flight_follows_swapchain() {
        let config = DeviceConfig::default();
        assert_eq!(config.resolve_frames_in_flight(2), 2);
        assert_eq!(config.resolve_frames_in_flight(5), 3);
        assert_eq!(config.resolve_frames_in_flight(1), 2);
        assert_eq!(config.with_frames_in_flight(1).resolve_frames_in_flight(3), 1);
    }
}
