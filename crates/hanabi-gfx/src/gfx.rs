use std::ffi::CStr;

use ash::vk;

use crate::commands::command_buffer::GfxCommandBuffer;
use crate::commands::command_pool::GfxCommandPool;
use crate::commands::command_queue::GfxCommandQueue;
use crate::commands::submit_info::GfxSubmitInfo;
use crate::descriptors::descriptor_pool::GfxDescriptorPool;
use crate::foundation::debug_messenger::GfxDebugMsger;
use crate::foundation::device::GfxDevice;
use crate::foundation::instance::GfxInstance;
use crate::foundation::mem_allocator::MemAllocator;
use crate::foundation::physical_device::GfxPhysicalDevice;

/// Vulkan 图形上下文单例
///
/// 管理所有 Vulkan 核心资源，包括实例、设备、队列、内存分配器等。
/// 采用单例模式简化参数传递和生命周期管理；初始化和销毁只能发生在主线程，
/// 之后的只读访问可以跨线程（backend 调用由 render commands mutex 串行化）。
///
/// # 初始化流程
/// ```ignore
/// Gfx::init("MyApp".to_string(), extra_extensions);
/// let device = Gfx::get().gfx_device();
/// // 使用...
/// Gfx::destroy();
/// ```
pub struct Gfx {
    vk_entry: ash::Entry,
    instance: GfxInstance,
    debug_msger: GfxDebugMsger,
    physical_device: GfxPhysicalDevice,
    gfx_device: GfxDevice,

    vm_allocator: MemAllocator,
    descriptor_pool: GfxDescriptorPool,

    gfx_queue: GfxCommandQueue,
    transfer_queue: GfxCommandQueue,

    /// 临时的 graphics command pool，用于 one-time 命令
    ///
    /// 依赖单例访问，只能在单例就位后创建
    temp_graphics_command_pool: Option<GfxCommandPool>,
}

static mut G_GFX: Option<Gfx> = None;

// 创建与销毁
impl Gfx {
    const ENGINE_NAME: &'static str = "Hanabi";

    fn new(app_name: String, instance_extra_exts: Vec<&'static CStr>) -> Self {
        let _span = tracy_client::span!("Gfx::new");

        let vk_entry = unsafe { ash::Entry::load().expect("failed to load vulkan entry") };
        let instance = GfxInstance::new(&vk_entry, app_name, Self::ENGINE_NAME.to_string(), instance_extra_exts);
        let debug_msger = GfxDebugMsger::new(&vk_entry, instance.ash_instance());

        let physical_device = GfxPhysicalDevice::new_descrete_gpu(instance.ash_instance());

        // gfx 和 transfer 队列族可能相同，相同时只声明一个
        let queue_priorities = [1.0_f32];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical_device.gfx_queue_family.index)
            .queue_priorities(&queue_priorities)];
        let has_dedicated_transfer =
            physical_device.transfer_queue_family.index != physical_device.gfx_queue_family.index;
        if has_dedicated_transfer {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(physical_device.transfer_queue_family.index)
                    .queue_priorities(&queue_priorities),
            );
        }

        let gfx_device = GfxDevice::new(instance.ash_instance(), physical_device.vk_handle, &queue_create_infos);

        let gfx_queue =
            GfxCommandQueue::from_device(&gfx_device, physical_device.gfx_queue_family.clone(), 0);
        let transfer_queue =
            GfxCommandQueue::from_device(&gfx_device, physical_device.transfer_queue_family.clone(), 0);

        let vm_allocator = MemAllocator::new(instance.ash_instance(), physical_device.vk_handle, &gfx_device);
        let descriptor_pool = GfxDescriptorPool::new(&gfx_device);

        Self {
            vk_entry,
            instance,
            debug_msger,
            physical_device,
            gfx_device,
            vm_allocator,
            descriptor_pool,
            gfx_queue,
            transfer_queue,
            temp_graphics_command_pool: None,
        }
    }

    /// 初始化 Gfx 单例
    ///
    /// # Panics
    /// 如果 Gfx 已经被初始化，此方法会 panic
    pub fn init(app_name: String, instance_extra_exts: Vec<&'static CStr>) {
        unsafe {
            // 使用 addr_of_mut! 避免直接对 static mut 创建可变引用
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            assert!((*ptr).is_none(), "Gfx already initialized");
            *ptr = Some(Self::new(app_name, instance_extra_exts));

            // 依赖单例的资源在单例就位后创建
            let pool = GfxCommandPool::new(
                Self::get().physical_device.gfx_queue_family.clone(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                "gfx-temp-graphics",
            );
            (*ptr).as_mut().unwrap().temp_graphics_command_pool = Some(pool);
        }
    }

    /// 获取单例实例
    ///
    /// # Panics
    /// 如果 Gfx 还未初始化，此方法会 panic
    #[inline]
    pub fn get() -> &'static Gfx {
        unsafe {
            // 使用 addr_of! 避免直接对 static mut 创建引用
            let ptr = std::ptr::addr_of!(G_GFX);
            (*ptr).as_ref().expect("Gfx not initialized. Call Gfx::init() first.")
        }
    }

    /// 销毁 Gfx 单例
    ///
    /// 调用此方法后，不应再使用 Gfx::get()
    pub fn destroy() {
        unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            let gfx = (*ptr).take().expect("Gfx not initialized");

            gfx.gfx_device.wait_idle();
            if let Some(pool) = &gfx.temp_graphics_command_pool {
                gfx.gfx_device.destroy_command_pool(pool.handle(), None);
            }
            gfx.descriptor_pool.destroy(&gfx.gfx_device);
            gfx.vm_allocator.destroy();
            gfx.gfx_device.destroy();
            gfx.debug_msger.destroy();
            gfx.instance.destroy();
        }
    }
}

// getter
impl Gfx {
    #[inline]
    pub fn vk_entry(&self) -> &ash::Entry {
        &self.vk_entry
    }

    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.instance
    }

    #[inline]
    pub fn gfx_device(&self) -> &GfxDevice {
        &self.gfx_device
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.physical_device
    }

    #[inline]
    pub fn allocator(&self) -> &MemAllocator {
        &self.vm_allocator
    }

    #[inline]
    pub fn descriptor_pool(&self) -> &GfxDescriptorPool {
        &self.descriptor_pool
    }

    #[inline]
    pub fn gfx_queue(&self) -> &GfxCommandQueue {
        &self.gfx_queue
    }

    #[inline]
    pub fn transfer_queue(&self) -> &GfxCommandQueue {
        &self.transfer_queue
    }

    /// uniform buffer 的 descriptor 更新时，offset 必须是这个值的整数倍
    #[inline]
    pub fn min_ubo_offset_align(&self) -> vk::DeviceSize {
        self.physical_device.basic_props.limits.min_uniform_buffer_offset_alignment
    }
}

// tools
impl Gfx {
    /// 根据给定的候选格式，返回受支持的格式
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Vec<vk::Format> {
        candidates
            .iter()
            .filter(|f| {
                let props = unsafe {
                    self.instance
                        .ash_instance
                        .get_physical_device_format_properties(self.physical_device.vk_handle, **f)
                };
                match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                    vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                    _ => panic!("not supported tiling."),
                }
            })
            .copied()
            .collect()
    }

    /// 立即执行某个 command，并同步等待执行结果
    pub fn one_time_exec<F, R>(&self, func: F, name: impl AsRef<str>) -> R
    where
        F: FnOnce(&GfxCommandBuffer) -> R,
    {
        let pool = self.temp_graphics_command_pool.as_ref().unwrap();
        let command_buffer = GfxCommandBuffer::new(pool, &format!("one-time-{}", name.as_ref()));

        command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name.as_ref());
        let result = func(&command_buffer);
        command_buffer.end();

        self.gfx_queue.submit(vec![GfxSubmitInfo::new(std::slice::from_ref(&command_buffer))], None);
        self.gfx_queue.wait_idle();
        unsafe {
            self.gfx_device.free_command_buffers(pool.handle(), &[command_buffer.vk_handle()]);
        }

        result
    }

    pub fn wait_idle(&self) {
        self.gfx_device.wait_idle();
    }
}
