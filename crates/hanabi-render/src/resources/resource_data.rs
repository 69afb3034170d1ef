use ash::vk;
use hanabi_asset::AssetHandle;
use hanabi_gfx::descriptors::bind_group::{GfxBindGroup, GfxBindGroupLayout};
use hanabi_gfx::pipelines::framebuffer::GfxFramebuffer;
use hanabi_gfx::pipelines::graphics_pipeline::{GfxGraphicsPipeline, RasterizationSettings};
use hanabi_gfx::pipelines::render_pass::GfxRenderPass;
use hanabi_gfx::pipelines::shader::{ShaderDataType, ShaderReflection};
use hanabi_gfx::resources::buffer::GfxBuffer;
use hanabi_gfx::resources::image::GfxImage;
use hanabi_gfx::resources::sampler::{GfxSampler, GfxSamplerDesc};

use crate::handles::*;
use crate::settings::MAX_FRAMES_IN_FLIGHT;

//
// Buffer
//

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BufferUsage {
    Transfer,
    Vertex,
    Index,
    Uniform,
    Storage,
}

impl BufferUsage {
    pub fn vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Transfer => vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Storage => vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        }
    }
}

pub struct BufferDescriptor {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub is_device_local: bool,
}

pub struct BufferResource {
    pub name: String,
    pub usage: BufferUsage,
    pub is_device_local: bool,
    pub gfx: GfxBuffer,
}

//
// Texture
//

pub struct TextureDescriptor<'a> {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub layer_count: u32,
    pub mipmapping: bool,
    pub is_cubemap: bool,
    pub sample_count: vk::SampleCountFlags,
    /// attachment 纹理没有初始数据
    pub data: Option<&'a [u8]>,
    pub is_attachment: bool,
}

impl Default for TextureDescriptor<'_> {
    fn default() -> Self {
        Self {
            name: String::new(),
            width: 1,
            height: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            layer_count: 1,
            mipmapping: false,
            is_cubemap: false,
            sample_count: vk::SampleCountFlags::TYPE_1,
            data: None,
            is_attachment: false,
        }
    }
}

pub struct TextureResource {
    pub name: String,
    pub image: GfxImage,
    pub is_attachment: bool,
}

//
// Sampler
//

pub struct SamplerResource {
    pub gfx: GfxSampler,
}

pub type SamplerDescriptor = GfxSamplerDesc;

//
// Shader
//

pub struct ShaderResource {
    pub name: String,
    pub module: hanabi_gfx::pipelines::shader::GfxShaderModule,
    pub reflection: ShaderReflection,
}

pub struct ShaderGroupResource {
    pub name: String,
    pub shaders: Vec<ShaderHandle>,
    /// 每个 descriptor set 一个 layout
    pub bind_group_layouts: Vec<Option<BindGroupLayoutHandle>>,
}

//
// Bind group
//

pub struct BindGroupLayoutResource {
    pub gfx: GfxBindGroupLayout,
}

pub struct BindGroupResource {
    pub gfx: GfxBindGroup,
    pub layout: BindGroupLayoutHandle,
}

//
// Pipeline
//

pub struct PipelineStateResource {
    pub name: String,
    pub gfx: GfxGraphicsPipeline,
    pub settings: RasterizationSettings,
    pub shader_group: ShaderGroupHandle,
    pub render_pass: RenderPassHandle,
}

//
// Render pass & frame buffer
//

pub struct RenderPassResource {
    pub name: String,
    pub gfx: GfxRenderPass,
}

pub struct FrameBufferResource {
    pub name: String,
    pub gfx: GfxFramebuffer,
    pub attachments: Vec<TextureHandle>,
}

//
// Static mesh
//

/// 静态网格的一个子网格，几何偏移是全局 buffer 中的绝对位置
#[derive(Clone)]
pub struct SubMesh {
    pub vertex_offset: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub vertex_count: u32,
    /// 渲染时解析；未加载时替换为默认材质
    pub material: AssetHandle,
}

pub struct StaticMeshDescriptor {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub tangents: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
    pub sub_meshes: Vec<SubMeshDescriptor>,
}

#[derive(Clone)]
pub struct SubMeshDescriptor {
    /// 相对本 mesh 的偏移
    pub vertex_offset: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub vertex_count: u32,
    pub material: AssetHandle,
}

pub struct StaticMeshResource {
    pub name: String,
    pub vertex_count: u32,
    pub index_count: u32,
    pub sub_meshes: Vec<SubMesh>,
}

//
// Material
//

#[derive(Clone, Debug)]
pub struct MaterialProperty {
    pub name: String,
    pub data_type: ShaderDataType,
    pub offset: u32,
    pub size: u32,
    /// `_texture` 结尾的成员是纹理引用，uniform 中存 bindless 下标
    pub is_texture: bool,
    /// `_color` 结尾的成员按 sRGB 颜色处理
    pub is_color: bool,
    /// 纹理引用当前指向的 asset
    pub texture_asset: AssetHandle,
}

pub struct MaterialResource {
    pub name: String,
    pub pipeline_state: PipelineStateHandle,
    pub properties: Vec<MaterialProperty>,
    /// uniform buffer 的 CPU 侧影子
    pub data: Vec<u8>,
    pub buffers: [BufferHandle; MAX_FRAMES_IN_FLIGHT],
    pub bind_groups: [BindGroupHandle; MAX_FRAMES_IN_FLIGHT],
    /// [0, frames_in_flight]；use_material 时递减，属性变更时重置
    pub dirty_count: u32,
}

//
// Semaphore
//

pub struct SemaphoreResource {
    pub gfx: hanabi_gfx::commands::semaphore::GfxSemaphore,
}

/// 材质属性的赋值
#[derive(Clone, Copy, Debug)]
pub enum MaterialPropertyValue {
    F32(f32),
    U32(u32),
    Bool(bool),
    Vector2([f32; 2]),
    Vector3([f32; 3]),
    Vector4([f32; 4]),
    /// 纹理引用，存 asset uuid
    Texture(AssetHandle),
}

/// 按命名约定判定属性含义
pub fn is_texture_property(name: &str) -> bool {
    name.ends_with("_texture")
}

pub fn is_color_property(name: &str) -> bool {
    name.ends_with("_color")
}
