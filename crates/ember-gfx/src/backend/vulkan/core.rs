use std::ffi::{CStr, CString};

use ash::vk;
use itertools::Itertools;

use crate::backend::memory::{select_memory_type, MemoryClass, MemoryProperties};
use crate::config::DeviceConfig;
use crate::desc::QueueKind;
use crate::error::{GfxError, GfxResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[inline]
pub fn vk_err(call: &'static str) -> impl FnOnce(vk::Result) -> GfxError {
    move |code| GfxError::native(call, code)
}

/// 一个逻辑队列实际使用的 queue family 与 vk::Queue
#[derive(Clone, Copy, Debug)]
pub struct VkQueue {
    pub family: u32,
    pub handle: vk::Queue,
    /// 是否是独立的 queue family（而不是回退到 graphics）
    pub dedicated: bool,
}

/// debug messenger，将 validation layer 的消息输出到 log
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    fn new(entry: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&Self::create_info(), None) }
            .map_err(vk_err("vkCreateDebugUtilsMessengerEXT"))?;
        Ok(Self { loader, messenger })
    }

    fn create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.messenger, None) };
    }
}

/// debug messenger 的回调函数
/// # Safety
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };
    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[{message_type:?}] {msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[{message_type:?}] {msg}"),
        _ => log::info!("[{message_type:?}] {msg}"),
    }

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// instance、physical device、device 以及队列
pub struct VkCore {
    /// 在 drop 之后会卸载 dll，因此最后 drop
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub debug_messenger: Option<DebugMessenger>,

    pub physical_device: vk::PhysicalDevice,
    pub props: vk::PhysicalDeviceProperties,
    pub memory_types: Vec<MemoryProperties>,

    pub device: ash::Device,
    /// 只有打开 validation 时才有，用于 debug label 与对象命名
    pub debug_device: Option<ash::ext::debug_utils::Device>,

    /// 以 [`QueueKind::index`] 为下标
    pub queues: [VkQueue; QueueKind::COUNT],
}

// new & init
impl VkCore {
    pub fn new(config: &DeviceConfig, display: Option<raw_window_handle::RawDisplayHandle>) -> GfxResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GfxError::native("vkGetInstanceProcAddr", e))?;
        let instance = Self::create_instance(&entry, config, display)?;

        let debug_messenger = if config.enable_validation {
            Some(DebugMessenger::new(&entry, &instance)?)
        } else {
            None
        };

        let physical_device = Self::pick_physical_device(&instance)?;
        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
        log::info!("found gpu: {device_name:?} ({:?})", props.device_type);

        let mem_props = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let memory_types = mem_props.memory_types[..mem_props.memory_type_count as usize]
            .iter()
            .map(|t| MemoryProperties::from_bits_truncate(t.property_flags.as_raw()))
            .collect_vec();

        let families = Self::find_queue_families(&instance, physical_device)?;
        let device = Self::create_device(&instance, physical_device, &families, display.is_some())?;
        let queues = families.map(|(family, dedicated)| VkQueue {
            family,
            handle: unsafe { device.get_device_queue(family, 0) },
            dedicated,
        });
        log::info!("queue families: {queues:#?}");

        let debug_device = config
            .enable_validation
            .then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            physical_device,
            props,
            memory_types,
            device,
            debug_device,
            queues,
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        config: &DeviceConfig,
        display: Option<raw_window_handle::RawDisplayHandle>,
    ) -> GfxResult<ash::Instance> {
        let app_name = CString::new(config.app_name.as_str()).unwrap_or_default();
        let engine_name = CString::new(config.engine_name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .engine_name(&engine_name)
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(vk_err("vkEnumerateInstanceExtensionProperties"))?
                .to_vec(),
            None => Vec::new(),
        };
        let mut layers = Vec::new();
        if config.enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        unsafe { entry.create_instance(&create_info, None) }.map_err(vk_err("vkCreateInstance"))
    }

    /// 优先使用独立显卡，如果没有则选择第一个可用的显卡
    fn pick_physical_device(instance: &ash::Instance) -> GfxResult<vk::PhysicalDevice> {
        let devices =
            unsafe { instance.enumerate_physical_devices() }.map_err(vk_err("vkEnumeratePhysicalDevices"))?;
        devices
            .into_iter()
            .find_or_first(|pdevice| {
                let props = unsafe { instance.get_physical_device_properties(*pdevice) };
                props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            })
            .ok_or(GfxError::NoDevice)
    }

    /// 每个逻辑队列对应的 (queue family, 是否独立)
    ///
    /// graphics 使用全能的 family；compute 与 transfer 优先使用专用的 family，没有时回退到 graphics
    fn find_queue_families(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
    ) -> GfxResult<[(u32, bool); QueueKind::COUNT]> {
        let family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let find = |include: vk::QueueFlags, exclude: vk::QueueFlags| {
            family_props
                .iter()
                .position(|props| props.queue_flags.contains(include) && (props.queue_flags & exclude).is_empty())
                .map(|index| index as u32)
        };

        let graphics = find(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            vk::QueueFlags::empty(),
        )
        .ok_or(GfxError::NoDevice)?;
        let compute = find(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS);
        let transfer = find(vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);

        Ok([
            (graphics, false),
            compute.map_or((graphics, false), |family| (family, true)),
            transfer.map_or((graphics, false), |family| (family, true)),
        ])
    }

    fn create_device(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        families: &[(u32, bool); QueueKind::COUNT],
        with_swapchain: bool,
    ) -> GfxResult<ash::Device> {
        let priorities = [1.0];
        let queue_create_infos = families
            .iter()
            .map(|(family, _)| *family)
            .unique()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect_vec();

        let mut extensions = Vec::new();
        if with_swapchain {
            extensions.push(ash::khr::swapchain::NAME.as_ptr());
        }

        let features = unsafe { instance.get_physical_device_features(pdevice) };
        // timestamp query pool 在 host 端重置
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default().host_query_reset(true);
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut features12);

        unsafe { instance.create_device(pdevice, &create_info, None) }.map_err(vk_err("vkCreateDevice"))
    }
}

// tools
impl VkCore {
    #[inline]
    pub fn queue(&self, kind: QueueKind) -> VkQueue {
        self.queues[kind.index()]
    }

    /// 为资源分配独占的内存，返回内存与所选类型的属性
    pub fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        class: MemoryClass,
    ) -> GfxResult<(vk::DeviceMemory, MemoryProperties)> {
        let type_index = select_memory_type(&self.memory_types, requirements.memory_type_bits, class)?;
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);
        let memory =
            unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(vk_err("vkAllocateMemory"))?;
        Ok((memory, self.memory_types[type_index as usize]))
    }

    /// 只有打开 validation 时生效
    pub fn set_debug_name(&self, handle: impl vk::Handle, name: &str) {
        let Some(debug_device) = &self.debug_device else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        unsafe {
            // 命名失败不影响功能
            let _ = debug_device.set_debug_utils_object_name(&name_info);
        }
    }
}

// destroy
impl VkCore {
    /// 调用之前所有由 device 创建的对象都必须已经销毁
    pub fn destroy(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.debug_messenger = None;
            self.instance.destroy_instance(None);
        }
        log::info!("vulkan core destroyed");
    }
}
