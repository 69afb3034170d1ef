use ash::vk;

use crate::gfx::Gfx;

/// 全局描述符池
///
/// 尺寸是启动期常量，bindless 纹理数组要求 UPDATE_AFTER_BIND。
pub struct GfxDescriptorPool {
    handle: vk::DescriptorPool,
}

impl GfxDescriptorPool {
    const MAX_SETS: u32 = 8192;
    const MAX_UNIFORM_BUFFERS: u32 = 8192;
    const MAX_STORAGE_BUFFERS: u32 = 2048;
    const MAX_COMBINED_IMAGE_SAMPLERS: u32 = 16384;

    pub(crate) fn new(device: &ash::Device) -> Self {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: Self::MAX_UNIFORM_BUFFERS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: Self::MAX_STORAGE_BUFFERS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: Self::MAX_COMBINED_IMAGE_SAMPLERS,
            },
        ];

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(
                vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
                    | vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            )
            .max_sets(Self::MAX_SETS)
            .pool_sizes(&pool_sizes);

        let handle = unsafe { device.create_descriptor_pool(&create_info, None).unwrap() };
        Self { handle }
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    pub(crate) fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.handle, None);
        }
    }
}

impl GfxDescriptorPool {
    pub fn allocate_set(&self, layout: vk::DescriptorSetLayout, debug_name: &str) -> vk::DescriptorSet {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle)
            .set_layouts(std::slice::from_ref(&layout));
        let set = unsafe { Gfx::get().gfx_device().allocate_descriptor_sets(&alloc_info).unwrap()[0] };
        Gfx::get().gfx_device().set_object_debug_name(set, format!("DescriptorSet::{debug_name}"));
        set
    }

    pub fn free_set(&self, set: vk::DescriptorSet) {
        unsafe {
            let _ = Gfx::get().gfx_device().free_descriptor_sets(self.handle, &[set]);
        }
    }
}
