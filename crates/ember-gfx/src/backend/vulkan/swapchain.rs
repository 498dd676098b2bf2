use ash::vk;
use itertools::Itertools;

use crate::backend::memory::MemoryClass;
use crate::backend::vulkan::convert;
use crate::backend::vulkan::core::{vk_err, VkCore};
use crate::backend::{AcquireResult, PresentResult};
use crate::desc::{Format, QueueKind};
use crate::error::{GfxError, GfxResult};

/// 窗口的原生句柄
#[derive(Clone, Copy, Debug)]
pub struct WindowHandles {
    pub display: raw_window_handle::RawDisplayHandle,
    pub window: raw_window_handle::RawWindowHandle,
}

/// 获取 image 与 present 的两种方式：窗口 swapchain，或者没有窗口时的离屏 image 环
pub enum Presenter {
    Window(WindowSwapchain),
    Offscreen(OffscreenRing),
}

pub struct WindowSwapchain {
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,

    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    /// surface 不限定尺寸时使用的窗口尺寸
    window_extent: vk::Extent2D,
}

// new & init
impl WindowSwapchain {
    pub fn new(
        core: &VkCore,
        handles: WindowHandles,
        window_extent: vk::Extent2D,
        present_interval: u32,
    ) -> GfxResult<Self> {
        let surface_loader = ash::khr::surface::Instance::new(&core.entry, &core.instance);
        let surface =
            unsafe { ash_window::create_surface(&core.entry, &core.instance, handles.display, handles.window, None) }
                .map_err(vk_err("vkCreateSurfaceKHR"))?;

        let graphics = core.queue(QueueKind::Graphics);
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(core.physical_device, graphics.family, surface)
        }
        .map_err(vk_err("vkGetPhysicalDeviceSurfaceSupportKHR"))?;
        if !supported {
            unsafe { surface_loader.destroy_surface(surface, None) };
            return Err(GfxError::Swapchain("graphics queue cannot present to the surface".to_string()));
        }

        let formats = unsafe { surface_loader.get_physical_device_surface_formats(core.physical_device, surface) }
            .map_err(vk_err("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        let format = formats
            .iter()
            .copied()
            .find_or_first(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .ok_or_else(|| GfxError::Swapchain("surface reports no formats".to_string()))?;

        let mut swapchain = Self {
            surface_loader,
            surface,
            loader: ash::khr::swapchain::Device::new(&core.instance, &core.device),
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format,
            extent: window_extent,
            window_extent,
        };
        swapchain.recreate(core, present_interval)?;
        Ok(swapchain)
    }

    /// 创建新的 swapchain，旧的 swapchain 作为 old_swapchain 传入后销毁
    pub fn recreate(&mut self, core: &VkCore, present_interval: u32) -> GfxResult<()> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(core.physical_device, self.surface)
        }
        .map_err(vk_err("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(core.physical_device, self.surface)
        }
        .map_err(vk_err("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;

        let extent = Self::calculate_extent(&capabilities, self.window_extent);
        let present_mode = Self::choose_present_mode(&present_modes, present_interval);

        // max_image_count == 0，表示不限制 image 数量
        let image_count = if capabilities.max_image_count == 0 {
            capabilities.min_image_count + 1
        } else {
            u32::min(capabilities.max_image_count, capabilities.min_image_count + 1)
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(self.handle);

        let handle =
            unsafe { self.loader.create_swapchain(&create_info, None) }.map_err(vk_err("vkCreateSwapchainKHR"))?;
        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.handle, None) };
        }
        self.handle = handle;
        self.images = unsafe { self.loader.get_swapchain_images(handle) }.map_err(vk_err("vkGetSwapchainImagesKHR"))?;
        self.extent = extent;
        core.set_debug_name(handle, "main");

        log::info!(
            "create swapchain: {}x{} {:?} {:?}, {} images",
            extent.width,
            extent.height,
            self.format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// 如果 current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    fn calculate_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
        let surface_extent = capabilities.current_extent;
        if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
            vk::Extent2D {
                width: window_extent
                    .width
                    .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                height: window_extent
                    .height
                    .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
            }
        } else {
            surface_extent
        }
    }

    /// interval 为 0 时优先 mailbox，其次 immediate；否则总是 FIFO
    fn choose_present_mode(modes: &[vk::PresentModeKHR], present_interval: u32) -> vk::PresentModeKHR {
        if present_interval > 0 {
            return vk::PresentModeKHR::FIFO;
        }
        [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|mode| modes.contains(mode))
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }
}

// getters
impl WindowSwapchain {
    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn format(&self) -> Format {
        convert::format_from_vk(self.format.format)
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

// update
impl WindowSwapchain {
    pub fn acquire(&mut self, signal: vk::Semaphore) -> GfxResult<AcquireResult> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireResult::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(e) => Err(GfxError::native("vkAcquireNextImageKHR", e)),
        }
    }

    pub fn present(&mut self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> GfxResult<PresentResult> {
        let waits = [wait];
        let swapchains = [self.handle];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(GfxError::native("vkQueuePresentKHR", e)),
        }
    }
}

// destroy
impl WindowSwapchain {
    pub fn destroy(self) {
        unsafe {
            self.loader.destroy_swapchain(self.handle, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

/// 没有窗口时使用的 image 环
///
/// acquire 与 present 都通过一次空的提交完成 semaphore 的 signal 与 wait。
pub struct OffscreenRing {
    images: Vec<(vk::Image, vk::DeviceMemory)>,
    next: u32,
    image_count: u32,
    format: Format,
    extent: vk::Extent2D,
}

// new & init
impl OffscreenRing {
    pub fn new(core: &VkCore, image_count: u32, format: Format, extent: vk::Extent2D) -> GfxResult<Self> {
        let mut ring = Self {
            images: Vec::new(),
            next: 0,
            image_count,
            format,
            extent,
        };
        ring.recreate(core)?;
        Ok(ring)
    }

    pub fn recreate(&mut self, core: &VkCore) -> GfxResult<()> {
        self.destroy_images(core);
        for index in 0..self.image_count {
            let create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(convert::format(self.format))
                .extent(vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(
                    vk::ImageUsageFlags::COLOR_ATTACHMENT
                        | vk::ImageUsageFlags::TRANSFER_SRC
                        | vk::ImageUsageFlags::TRANSFER_DST,
                )
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let image =
                unsafe { core.device.create_image(&create_info, None) }.map_err(vk_err("vkCreateImage"))?;
            let requirements = unsafe { core.device.get_image_memory_requirements(image) };
            let (memory, _) = core.allocate_memory(requirements, MemoryClass::DeviceLocal)?;
            unsafe { core.device.bind_image_memory(image, memory, 0) }.map_err(vk_err("vkBindImageMemory"))?;
            core.set_debug_name(image, &format!("offscreen-backbuffer-{index}"));
            self.images.push((image, memory));
        }
        self.next = 0;
        log::info!(
            "create offscreen ring: {}x{} {:?}, {} images",
            self.extent.width,
            self.extent.height,
            self.format,
            self.image_count
        );
        Ok(())
    }
}

// getters
impl OffscreenRing {
    #[inline]
    pub fn images(&self) -> Vec<vk::Image> {
        self.images.iter().map(|(image, _)| *image).collect()
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

// update
impl OffscreenRing {
    pub fn acquire(&mut self, core: &VkCore, signal: vk::Semaphore) -> GfxResult<AcquireResult> {
        let signals = [signal];
        let submit_info = vk::SubmitInfo::default().signal_semaphores(&signals);
        unsafe {
            core.device
                .queue_submit(core.queue(QueueKind::Graphics).handle, &[submit_info], vk::Fence::null())
        }
        .map_err(vk_err("vkQueueSubmit"))?;

        let index = self.next;
        self.next = (self.next + 1) % self.image_count;
        Ok(AcquireResult::Acquired {
            index,
            suboptimal: false,
        })
    }

    pub fn present(&mut self, core: &VkCore, wait: vk::Semaphore) -> GfxResult<PresentResult> {
        let waits = [wait];
        let stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages);
        unsafe {
            core.device
                .queue_submit(core.queue(QueueKind::Graphics).handle, &[submit_info], vk::Fence::null())
        }
        .map_err(vk_err("vkQueueSubmit"))?;
        Ok(PresentResult::Presented)
    }
}

// destroy
impl OffscreenRing {
    fn destroy_images(&mut self, core: &VkCore) {
        for (image, memory) in self.images.drain(..) {
            unsafe {
                core.device.destroy_image(image, None);
                core.device.free_memory(memory, None);
            }
        }
    }

    pub fn destroy(mut self, core: &VkCore) {
        self.destroy_images(core);
    }
}
