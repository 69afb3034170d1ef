use ash::vk;

use crate::gfx::Gfx;

/// sampler 的创建参数
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    /// 0 表示关闭各向异性过滤
    pub max_anisotropy: u32,
}

impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 0,
        }
    }
}

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxSampler {
    handle: vk::Sampler,
    desc: GfxSamplerDesc,
}

impl GfxSampler {
    pub fn new(desc: &GfxSamplerDesc, debug_name: &str) -> Self {
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode_u)
            .address_mode_v(desc.address_mode_v)
            .address_mode_w(desc.address_mode_w)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

        if desc.max_anisotropy > 0 {
            create_info = create_info.anisotropy_enable(true).max_anisotropy(desc.max_anisotropy as f32);
        } else {
            create_info = create_info.anisotropy_enable(false);
        }

        let handle = unsafe { Gfx::get().gfx_device().create_sampler(&create_info, None).unwrap() };
        Gfx::get().gfx_device().set_object_debug_name(handle, format!("Sampler::{debug_name}"));

        Self { handle, desc: *desc }
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &GfxSamplerDesc {
        &self.desc
    }

    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_sampler(self.handle, None);
        }
    }
}
