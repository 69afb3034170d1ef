use ash::vk;

use crate::gfx::Gfx;

/// GPU image 封装
///
/// 创建时附带一个覆盖全部 subresource 的默认 view。
///
/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxImage {
    image: vk::Image,
    /// 外部 image（例如 swapchain image）没有 allocation
    allocation: Option<vk_mem::Allocation>,
    default_view: vk::ImageView,

    extent: vk::Extent2D,
    format: vk::Format,
    layer_count: u32,
    mip_levels: u32,
    samples: vk::SampleCountFlags,
    aspect_flags: vk::ImageAspectFlags,
}

/// image 的创建参数
pub struct GfxImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub layer_count: u32,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub is_cubemap: bool,
}

impl Default for GfxImageDesc {
    fn default() -> Self {
        Self {
            extent: vk::Extent2D { width: 1, height: 1 },
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            layer_count: 1,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            is_cubemap: false,
        }
    }
}

// new & init
impl GfxImage {
    pub fn new(desc: &GfxImageDesc, name: impl AsRef<str>) -> Self {
        let _span = tracy_client::span!("GfxImage::new");

        let flags = if desc.is_cubemap {
            assert_eq!(desc.layer_count, 6);
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.layer_count)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, allocation) = unsafe {
            use vk_mem::Alloc;
            Gfx::get().allocator().create_image(&create_info, &alloc_ci).unwrap()
        };
        Gfx::get().gfx_device().set_object_debug_name(image, format!("Image::{}", name.as_ref()));

        let aspect_flags = Self::format_aspect_mask(desc.format);
        let default_view = Self::create_view(image, desc, aspect_flags, name.as_ref());

        Self {
            image,
            allocation: Some(allocation),
            default_view,
            extent: desc.extent,
            format: desc.format,
            layer_count: desc.layer_count,
            mip_levels: desc.mip_levels,
            samples: desc.samples,
            aspect_flags,
        }
    }

    /// 包装外部 image（例如 swapchain image），不管理其内存
    pub fn new_external(image: vk::Image, extent: vk::Extent2D, format: vk::Format, name: impl AsRef<str>) -> Self {
        Gfx::get().gfx_device().set_object_debug_name(image, format!("Image::External::{}", name.as_ref()));

        let desc = GfxImageDesc {
            extent,
            format,
            ..Default::default()
        };
        let aspect_flags = Self::format_aspect_mask(format);
        let default_view = Self::create_view(image, &desc, aspect_flags, name.as_ref());

        Self {
            image,
            allocation: None,
            default_view,
            extent,
            format,
            layer_count: 1,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            aspect_flags,
        }
    }

    fn create_view(image: vk::Image, desc: &GfxImageDesc, aspect: vk::ImageAspectFlags, name: &str) -> vk::ImageView {
        let view_type = if desc.is_cubemap { vk::ImageViewType::CUBE } else { vk::ImageViewType::TYPE_2D };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.layer_count,
            });

        let view = unsafe { Gfx::get().gfx_device().create_image_view(&view_info, None).unwrap() };
        Gfx::get().gfx_device().set_object_debug_name(view, format!("ImageView::Default::{name}"));
        view
    }

    fn format_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
        match format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }
            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

// getter
impl GfxImage {
    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn default_view(&self) -> vk::ImageView {
        self.default_view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    #[inline]
    pub fn aspect_flags(&self) -> vk::ImageAspectFlags {
        self.aspect_flags
    }
}

// destroy
impl GfxImage {
    pub fn destroy(mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_image_view(self.default_view, None);
            if let Some(allocation) = self.allocation.as_mut() {
                use vk_mem::Alloc;
                Gfx::get().allocator().destroy_image(self.image, allocation);
            }
        }
    }
}
