use ash::vk;
use itertools::Itertools;

use crate::gfx::Gfx;

/// bind group 中单个绑定点的描述
///
/// 由 shader 反射得到，或由调用方手动声明（bindless 数组）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxBindingDesc {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    pub flags: vk::DescriptorBindingFlags,
}

/// 描述符集布局
///
/// 对应 shader 中的一个 descriptor set。
///
/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxBindGroupLayout {
    handle: vk::DescriptorSetLayout,
    bindings: Vec<GfxBindingDesc>,
}

// new & init
impl GfxBindGroupLayout {
    pub fn new(bindings: Vec<GfxBindingDesc>, debug_name: &str) -> Self {
        let vk_bindings = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stage_flags)
            })
            .collect_vec();
        let binding_flags = bindings.iter().map(|b| b.flags).collect_vec();

        let needs_update_after_bind =
            bindings.iter().any(|b| b.flags.contains(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND));
        let layout_flags = if needs_update_after_bind {
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };

        let mut bind_flags_ci =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(layout_flags)
            .bindings(&vk_bindings)
            .push_next(&mut bind_flags_ci);

        let handle = unsafe { Gfx::get().gfx_device().create_descriptor_set_layout(&create_info, None).unwrap() };
        Gfx::get().gfx_device().set_object_debug_name(handle, format!("BindGroupLayout::{debug_name}"));

        Self { handle, bindings }
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    #[inline]
    pub fn bindings(&self) -> &[GfxBindingDesc] {
        &self.bindings
    }

    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

/// 更新 bind group 的单次写入
pub enum GfxBindingUpdate {
    UniformBuffer {
        binding: u32,
        element_index: u32,
        buffers: Vec<vk::DescriptorBufferInfo>,
    },
    StorageBuffer {
        binding: u32,
        element_index: u32,
        buffers: Vec<vk::DescriptorBufferInfo>,
    },
    CombinedImageSampler {
        binding: u32,
        element_index: u32,
        images: Vec<vk::DescriptorImageInfo>,
    },
}

/// 描述符集
///
/// # Destroy
///
/// 跟随 descriptor pool 释放，或通过 pool 的 free_set。
#[derive(Clone, Copy)]
pub struct GfxBindGroup {
    handle: vk::DescriptorSet,
}

// new & init
impl GfxBindGroup {
    pub fn new(layout: &GfxBindGroupLayout, debug_name: &str) -> Self {
        let handle = Gfx::get().descriptor_pool().allocate_set(layout.handle(), debug_name);
        Self { handle }
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }
}

// tools
impl GfxBindGroup {
    pub fn update(&self, updates: &[GfxBindingUpdate]) {
        let writes = updates
            .iter()
            .map(|update| match update {
                GfxBindingUpdate::UniformBuffer {
                    binding,
                    element_index,
                    buffers,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(self.handle)
                    .dst_binding(*binding)
                    .dst_array_element(*element_index)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(buffers),
                GfxBindingUpdate::StorageBuffer {
                    binding,
                    element_index,
                    buffers,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(self.handle)
                    .dst_binding(*binding)
                    .dst_array_element(*element_index)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(buffers),
                GfxBindingUpdate::CombinedImageSampler {
                    binding,
                    element_index,
                    images,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(self.handle)
                    .dst_binding(*binding)
                    .dst_array_element(*element_index)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(images),
            })
            .collect_vec();

        unsafe {
            Gfx::get().gfx_device().update_descriptor_sets(&writes, &[]);
        }
    }

    pub fn free(self) {
        Gfx::get().descriptor_pool().free_set(self.handle);
    }
}
