use bitflags::bitflags;

use crate::error::{GfxError, GfxResult};

bitflags! {
    /// 与具体 API 无关的内存属性，数值与 Vulkan 的 `VkMemoryPropertyFlags` 一致
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        const DEVICE_LOCAL  = 1 << 0;
        const HOST_VISIBLE  = 1 << 1;
        const HOST_COHERENT = 1 << 2;
        const HOST_CACHED   = 1 << 3;
    }
}

/// 按照使用方式划分的内存类别，每个 frame slot 对每个类别各有一个 allocator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// GPU 读写，CPU 不可见
    DeviceLocal,
    /// CPU 写、GPU 读，优先使用 ReBAR 之类的 device local + host visible 内存
    HostVisible,
    /// 纯 staging 内存
    HostOnly,
    /// GPU 写、CPU 读，用于回读
    HostCached,
}

impl MemoryClass {
    pub const ALL: [MemoryClass; 4] = [
        MemoryClass::DeviceLocal,
        MemoryClass::HostVisible,
        MemoryClass::HostOnly,
        MemoryClass::HostCached,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn is_mappable(self) -> bool {
        !matches!(self, MemoryClass::DeviceLocal)
    }

    /// 候选属性，按照优先级从高到低排列
    pub fn priority_list(self) -> &'static [MemoryProperties] {
        const DL: MemoryProperties = MemoryProperties::DEVICE_LOCAL;
        const HV: MemoryProperties = MemoryProperties::HOST_VISIBLE;
        const HC: MemoryProperties = MemoryProperties::HOST_COHERENT;
        const CACHED: MemoryProperties = MemoryProperties::HOST_CACHED;

        const DEVICE_LOCAL: &[MemoryProperties] = &[DL, MemoryProperties::empty()];
        const HOST_VISIBLE: &[MemoryProperties] = &[DL.union(HV).union(HC), HV.union(HC), HV];
        const HOST_ONLY: &[MemoryProperties] = &[HV.union(HC), HV];
        const HOST_CACHED: &[MemoryProperties] = &[HV.union(HC).union(CACHED), HV.union(CACHED), HV.union(HC), HV];

        match self {
            MemoryClass::DeviceLocal => DEVICE_LOCAL,
            MemoryClass::HostVisible => HOST_VISIBLE,
            MemoryClass::HostOnly => HOST_ONLY,
            MemoryClass::HostCached => HOST_CACHED,
        }
    }
}

/// 在 `memory_types` 中为 `class` 挑选一个内存类型
///
/// 依次尝试优先级列表中的每一项，返回第一个被 `type_bits` 允许且属性包含该项的类型下标。
pub fn select_memory_type(
    memory_types: &[MemoryProperties],
    type_bits: u32,
    class: MemoryClass,
) -> GfxResult<u32> {
    for wanted in class.priority_list() {
        let found = memory_types
            .iter()
            .enumerate()
            .find(|(index, props)| type_bits & (1 << index) != 0 && props.contains(*wanted));
        if let Some((index, _)) = found {
            return Ok(index as u32);
        }
    }

    Err(GfxError::NoSuitableMemoryType { class, type_bits })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DL: MemoryProperties = MemoryProperties::DEVICE_LOCAL;
    const HV: MemoryProperties = MemoryProperties::HOST_VISIBLE;
    const HC: MemoryProperties = MemoryProperties::HOST_COHERENT;
    const CACHED: MemoryProperties = MemoryProperties::HOST_CACHED;

    /// 常见的独显：没有 ReBAR
    fn discrete_types() -> Vec<MemoryProperties> {
        vec![DL, HV | HC, HV | HC | CACHED]
    }

    #[test]
    fn test_select_prefers_first_priority() {
        let types = discrete_types();
        assert_eq!(select_memory_type(&types, 0b111, MemoryClass::DeviceLocal).unwrap(), 0);
        assert_eq!(select_memory_type(&types, 0b111, MemoryClass::HostOnly).unwrap(), 1);
        assert_eq!(select_memory_type(&types, 0b111, MemoryClass::HostCached).unwrap(), 2);
    }

    #[test]
    fn test_host_visible_falls_back_without_rebar() {
        let types = discrete_types();
        assert_eq!(select_memory_type(&types, 0b111, MemoryClass::HostVisible).unwrap(), 1);

        let rebar = vec![DL, HV | HC, DL | HV | HC];
        assert_eq!(select_memory_type(&rebar, 0b111, MemoryClass::HostVisible).unwrap(), 2);
    }

    #[test]
    fn test_type_bits_restrict_candidates() {
        let types = discrete_types();
        // cached 类型不允许使用，退回到 coherent
        assert_eq!(select_memory_type(&types, 0b011, MemoryClass::HostCached).unwrap(), 1);
        // device local 不允许使用，退回到任意类型
        assert_eq!(select_memory_type(&types, 0b110, MemoryClass::DeviceLocal).unwrap(), 1);
    }

    #[test]
    fn test_no_suitable_type() {
        let types = vec![DL];
        let err = select_memory_type(&types, 0b1, MemoryClass::HostOnly).unwrap_err();
        assert!(matches!(
            err,
            GfxError::NoSuitableMemoryType {
                class: MemoryClass::HostOnly,
                type_bits: 0b1
            }
        ));
    }
}
