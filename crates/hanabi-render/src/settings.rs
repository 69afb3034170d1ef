use std::fmt::Display;
use std::ops::Deref;

use ash::vk;

/// 资源池容量，启动期常量，超出视为程序错误
pub const MAX_BUFFER_COUNT: usize = 4096;
pub const MAX_TEXTURE_COUNT: usize = 4096;
pub const MAX_SAMPLER_COUNT: usize = 4096;
pub const MAX_SHADER_COUNT: usize = 4096;
pub const MAX_SHADER_GROUP_COUNT: usize = 4096;
pub const MAX_PIPELINE_STATE_COUNT: usize = 4096;
pub const MAX_BIND_GROUP_LAYOUT_COUNT: usize = 4096;
pub const MAX_BIND_GROUP_COUNT: usize = 4096;
pub const MAX_RENDER_PASS_COUNT: usize = 4096;
pub const MAX_FRAME_BUFFER_COUNT: usize = 4096;
pub const MAX_STATIC_MESH_COUNT: usize = 4096;
pub const MAX_MATERIAL_COUNT: usize = 4096;
pub const MAX_SEMAPHORE_COUNT: usize = 4096;

/// 每帧的 object data 上限，溢出由 host 负责避免
pub const MAX_OBJECT_DATA_COUNT: usize = u16::MAX as usize;

/// 全局几何 buffer 的顶点容量
pub const MAX_VERTEX_COUNT: usize = 1_000_000;
pub const MAX_INDEX_COUNT: usize = 4_000_000;

/// transfer buffer 尺寸
pub const TRANSFER_BUFFER_SIZE: u64 = 512 * 1024 * 1024;

/// 最大 frames in flight 数量
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// 渲染器默认配置
pub struct DefaultRendererSettings;
impl DefaultRendererSettings {
    pub const BACK_BUFFER_WIDTH: u32 = 1280;
    pub const BACK_BUFFER_HEIGHT: u32 = 720;

    pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        // shader 输出会被自动转换: linear -> sRGB
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    pub const DEPTH_FORMAT_CANDIDATES: &'static [vk::Format] = &[
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ];
}

/// 运行时可变的渲染设置
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RendererSettings {
    pub vsync: bool,
    /// true: 3 帧 in flight；false: 2 帧
    pub triple_buffering: bool,
    /// [2.0, 2.4]
    pub gamma: f32,
    /// {1, 2, 4, 8}
    pub msaa_samples: u32,
    /// {1, 2, 4, 8, 16}
    pub anisotropy: u32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            triple_buffering: true,
            gamma: 2.2,
            msaa_samples: 4,
            anisotropy: 16,
        }
    }
}

impl RendererSettings {
    pub fn frames_in_flight(&self) -> usize {
        if self.triple_buffering { 3 } else { 2 }
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        if self.vsync { vk::PresentModeKHR::FIFO } else { vk::PresentModeKHR::IMMEDIATE }
    }

    pub fn vk_sample_count(&self) -> vk::SampleCountFlags {
        match self.msaa_samples {
            1 => vk::SampleCountFlags::TYPE_1,
            2 => vk::SampleCountFlags::TYPE_2,
            4 => vk::SampleCountFlags::TYPE_4,
            8 => vk::SampleCountFlags::TYPE_8,
            other => panic!("invalid msaa sample count: {other}"),
        }
    }

    pub fn clamp(&mut self) {
        self.gamma = self.gamma.clamp(2.0, 2.4);
        assert!(matches!(self.msaa_samples, 1 | 2 | 4 | 8), "invalid msaa setting");
        assert!(matches!(self.anisotropy, 1 | 2 | 4 | 8 | 16), "invalid anisotropy setting");
    }
}

/// 帧标签（A/B/C）
///
/// 表示当前处于 frames in flight 的哪一帧。
/// 通过 `Deref` 转换为索引 0/1/2。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLabel {
    A,
    B,
    C,
}

impl Deref for FrameLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        match self {
            Self::A => &Self::INDEX[0],
            Self::B => &Self::INDEX[1],
            Self::C => &Self::INDEX[2],
        }
    }
}

impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}

impl FrameLabel {
    const INDEX: [usize; 3] = [0, 1, 2];

    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        match idx {
            0 => Self::A,
            1 => Self::B,
            2 => Self::C,
            _ => panic!("Invalid frame index: {idx}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_in_flight_follows_triple_buffering() {
        let mut settings = RendererSettings::default();
        assert_eq!(settings.frames_in_flight(), 3);
        settings.triple_buffering = false;
        assert_eq!(settings.frames_in_flight(), 2);
    }

    #[test]
    fn test_gamma_is_clamped() {
        let mut settings = RendererSettings {
            gamma: 5.0,
            ..Default::default()
        };
        settings.clamp();
        assert_eq!(settings.gamma, 2.4);
    }

    #[test]
    fn test_frame_label_roundtrip() {
        for idx in 0..3 {
            assert_eq!(*FrameLabel::from_usize(idx), idx);
        }
    }
}
