use ash::vk;
use hanabi_gfx::descriptors::bind_group::{GfxBindGroup, GfxBindingUpdate};
use itertools::Itertools;

use crate::handles::RawHandle;
use crate::resources::RenderResourceManager;
use crate::settings::{FrameLabel, MAX_TEXTURE_COUNT};

/// bindless 纹理管理
///
/// 每个 frame in flight 一个 descriptor set，begin_frame 时整体重写，
/// 覆盖纹理池的每个 slot；空 slot 回落到 white-pixel 纹理。
/// 纹理在数组中的下标就是它在池中的 slot 序号，材质 uniform 里存的
/// 就是这个下标。
pub struct BindlessManager {
    sets: Vec<GfxBindGroup>,
}

// new & init
impl BindlessManager {
    pub fn new(rm: &RenderResourceManager, frames_in_flight: usize) -> Self {
        let layout_handle = rm.bindless_set_layout();
        let state = rm.lock();
        let layout = &state.bind_group_layouts.get(layout_handle).unwrap().gfx;

        let sets = (0..frames_in_flight)
            .map(|fif| GfxBindGroup::new(layout, &format!("bindless-textures-{fif}")))
            .collect_vec();

        Self { sets }
    }
}

// getter
impl BindlessManager {
    #[inline]
    pub fn current_set(&self, frame_label: FrameLabel) -> vk::DescriptorSet {
        self.sets[*frame_label].handle()
    }
}

// phase call
impl BindlessManager {
    /// 重建当前帧的 bindless 描述符数组
    ///
    /// depth attachment 不能以 SHADER_READ_ONLY 采样，同样回落到 white-pixel。
    pub fn update(&self, rm: &RenderResourceManager, frame_label: FrameLabel) {
        let _span = tracy_client::span!("BindlessManager::update");

        let state = rm.lock();
        let sampler = state.samplers.get(state.default_sampler).unwrap().gfx.handle();
        let white = state.textures.get(state.white_pixel_texture).unwrap();
        let white_info = vk::DescriptorImageInfo::default()
            .image_view(white.image.default_view())
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .sampler(sampler);

        let mut image_infos = vec![white_info; MAX_TEXTURE_COUNT];
        for (handle, texture) in state.textures.iter() {
            let slot = handle.slot_index() as usize;
            if slot >= MAX_TEXTURE_COUNT {
                continue;
            }
            if texture.image.aspect_flags().contains(vk::ImageAspectFlags::DEPTH) {
                continue;
            }
            if texture.is_attachment {
                // attachment 的布局由 render pass 控制，不进 bindless 数组
                continue;
            }
            image_infos[slot] = vk::DescriptorImageInfo::default()
                .image_view(texture.image.default_view())
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .sampler(sampler);
        }

        self.sets[*frame_label].update(&[GfxBindingUpdate::CombinedImageSampler {
            binding: 0,
            element_index: 0,
            images: image_infos,
        }]);
    }
}
