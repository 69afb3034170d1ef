use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

/// 队列族信息
#[derive(Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub props: vk::QueueFamilyProperties,
}

/// 物理设备封装
///
/// 负责设备选择和属性查询。优先选择独立显卡。
pub struct GfxPhysicalDevice {
    pub vk_handle: vk::PhysicalDevice,

    pub basic_props: vk::PhysicalDeviceProperties,
    pub memory_props: vk::PhysicalDeviceMemoryProperties,

    pub gfx_queue_family: QueueFamily,
    /// 独立的 transfer 队列族，不存在时回落到 gfx 队列族
    pub transfer_queue_family: QueueFamily,

    pub device_name: String,
}

// new & init
impl GfxPhysicalDevice {
    pub fn new_descrete_gpu(instance: &ash::Instance) -> Self {
        let physical_devices = unsafe { instance.enumerate_physical_devices().unwrap() };
        assert!(!physical_devices.is_empty(), "no vulkan physical device found");

        // 优先独立显卡，否则取第一个支持 graphics 的设备
        let chosen = physical_devices
            .iter()
            .copied()
            .filter(|pdevice| Self::find_queue_family(instance, *pdevice, vk::QueueFlags::GRAPHICS).is_some())
            .sorted_by_key(|pdevice| {
                let props = unsafe { instance.get_physical_device_properties(*pdevice) };
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    _ => 2,
                }
            })
            .next()
            .expect("no suitable physical device found");

        let basic_props = unsafe { instance.get_physical_device_properties(chosen) };
        let memory_props = unsafe { instance.get_physical_device_memory_properties(chosen) };

        let gfx_queue_family = Self::find_queue_family(instance, chosen, vk::QueueFlags::GRAPHICS).unwrap();

        // 找一个不带 graphics 的 transfer 队列族，让上传和渲染并行
        let transfer_queue_family = Self::find_dedicated_transfer_family(instance, chosen)
            .unwrap_or_else(|| gfx_queue_family.clone());

        let device_name = unsafe {
            CStr::from_ptr(basic_props.device_name.as_ptr()).to_string_lossy().into_owned()
        };
        log::info!("physical device: {}", device_name);

        Self {
            vk_handle: chosen,
            basic_props,
            memory_props,
            gfx_queue_family,
            transfer_queue_family,
            device_name,
        }
    }

    fn find_queue_family(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        flags: vk::QueueFlags,
    ) -> Option<QueueFamily> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        families
            .iter()
            .enumerate()
            .find(|(_, props)| props.queue_flags.contains(flags))
            .map(|(index, props)| QueueFamily {
                index: index as u32,
                props: *props,
            })
    }

    fn find_dedicated_transfer_family(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> Option<QueueFamily> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        families
            .iter()
            .enumerate()
            .find(|(_, props)| {
                props.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|(index, props)| QueueFamily {
                index: index as u32,
                props: *props,
            })
    }
}

// getter
impl GfxPhysicalDevice {
    #[inline]
    pub fn vendor_id(&self) -> u32 {
        self.basic_props.vendor_id
    }

    #[inline]
    pub fn device_id(&self) -> u32 {
        self.basic_props.device_id
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.basic_props.limits
    }

    /// 设备支持的最大 MSAA 采样数（color 与 depth 的交集）
    pub fn max_msaa_samples(&self) -> vk::SampleCountFlags {
        let counts = self.basic_props.limits.framebuffer_color_sample_counts
            & self.basic_props.limits.framebuffer_depth_sample_counts;

        for candidate in [
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_2,
        ] {
            if counts.contains(candidate) {
                return candidate;
            }
        }
        vk::SampleCountFlags::TYPE_1
    }
}
