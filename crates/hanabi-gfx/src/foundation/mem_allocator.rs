use std::ops::Deref;

use ash::vk;

pub struct MemAllocator {
    inner: vk_mem::Allocator,
}

impl MemAllocator {
    /// vma 需要引用 Instance 以及 Device，并确保在其生命周期之内这两个引用有效。
    /// 因此在 Gfx 的其他部分都初始化完成后再初始化 vma。
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> Self {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;

        let vma = unsafe { vk_mem::Allocator::new(vma_ci).unwrap() };

        Self { inner: vma }
    }

    pub fn destroy(self) {
        // 通过 drop 触发销毁
    }
}

impl Deref for MemAllocator {
    type Target = vk_mem::Allocator;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
