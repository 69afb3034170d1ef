use ash::vk;
use spirv_reflect::types::{ReflectBlockVariable, ReflectDescriptorType, ReflectFormat, ReflectShaderStageFlags};

use crate::descriptors::bind_group::GfxBindingDesc;
use crate::gfx::Gfx;

/// shader 最多使用的 descriptor set 数量
pub const MAX_DESCRIPTOR_SET_COUNT: usize = 4;

/// shader 反射出的数据类型
///
/// 成员布局遵循 std140，字节大小见 `byte_size`。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShaderDataType {
    Bool,
    S32,
    U32,
    U64,
    F32,
    Vector2F,
    Vector3F,
    Vector4F,
    Matrix3F,
    Matrix4F,
    Struct,
}

impl ShaderDataType {
    pub fn byte_size(self) -> u32 {
        match self {
            Self::Bool | Self::S32 | Self::U32 | Self::F32 => 4,
            Self::U64 => 8,
            Self::Vector2F => 8,
            Self::Vector3F => 12,
            Self::Vector4F => 16,
            Self::Matrix3F => 36,
            Self::Matrix4F => 64,
            Self::Struct => 0,
        }
    }
}

/// shader 中具名 struct 的一个成员
#[derive(Clone, Debug)]
pub struct ShaderStructMember {
    pub name: String,
    pub data_type: ShaderDataType,
    pub offset: u32,
    pub size: u32,
}

/// shader 中的具名 struct 定义（uniform block）
#[derive(Clone, Debug)]
pub struct ShaderStruct {
    pub name: String,
    pub members: Vec<ShaderStructMember>,
}

impl ShaderStruct {
    /// struct 的紧凑尺寸：最后一个成员的 offset + size
    pub fn byte_size(&self) -> u32 {
        self.members.last().map_or(0, |m| m.offset + m.size)
    }

    pub fn find_member(&self, name: &str) -> Option<&ShaderStructMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// shader 的输入/输出变量
#[derive(Clone, Debug)]
pub struct ShaderIoVariable {
    pub name: String,
    pub location: u32,
    pub format: vk::Format,
}

/// SPIR-V 反射结果
///
/// 包含每个 descriptor set 的绑定、入口的输入输出变量、具名 struct 定义。
pub struct ShaderReflection {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: String,

    /// 按 set 序号分组的绑定
    pub set_bindings: [Vec<GfxBindingDesc>; MAX_DESCRIPTOR_SET_COUNT],

    pub inputs: Vec<ShaderIoVariable>,
    pub outputs: Vec<ShaderIoVariable>,

    pub structs: Vec<ShaderStruct>,
}

impl ShaderReflection {
    pub fn reflect(spv: &[u8]) -> anyhow::Result<Self> {
        let module = spirv_reflect::ShaderModule::load_u8_data(spv)
            .map_err(|e| anyhow::anyhow!("spirv reflection failed: {e}"))?;

        let stage = Self::convert_stage(module.get_shader_stage())?;
        let entry_point = module.get_entry_point_name();

        let mut set_bindings: [Vec<GfxBindingDesc>; MAX_DESCRIPTOR_SET_COUNT] = Default::default();
        let mut structs = Vec::new();

        let sets = module
            .enumerate_descriptor_sets(None)
            .map_err(|e| anyhow::anyhow!("enumerate_descriptor_sets failed: {e}"))?;
        for set in &sets {
            assert!(
                (set.set as usize) < MAX_DESCRIPTOR_SET_COUNT,
                "descriptor set {} exceeds the supported set count",
                set.set
            );
            for binding in &set.bindings {
                let descriptor_type = Self::convert_descriptor_type(binding.descriptor_type)?;
                set_bindings[set.set as usize].push(GfxBindingDesc {
                    binding: binding.binding,
                    descriptor_type,
                    count: binding.count.max(1),
                    stage_flags: stage,
                    flags: vk::DescriptorBindingFlags::empty(),
                });

                // uniform block 记录为具名 struct，材质系统按名字查找
                if descriptor_type == vk::DescriptorType::UNIFORM_BUFFER {
                    if let Some(shader_struct) = Self::convert_block(binding) {
                        structs.push(shader_struct);
                    }
                }
            }
        }

        let inputs = module
            .enumerate_input_variables(None)
            .map_err(|e| anyhow::anyhow!("enumerate_input_variables failed: {e}"))?
            .iter()
            .filter(|var| var.location != u32::MAX)
            .map(|var| ShaderIoVariable {
                name: var.name.clone(),
                location: var.location,
                format: Self::convert_format(var.format),
            })
            .collect();
        let outputs = module
            .enumerate_output_variables(None)
            .map_err(|e| anyhow::anyhow!("enumerate_output_variables failed: {e}"))?
            .iter()
            .filter(|var| var.location != u32::MAX)
            .map(|var| ShaderIoVariable {
                name: var.name.clone(),
                location: var.location,
                format: Self::convert_format(var.format),
            })
            .collect();

        Ok(Self {
            stage,
            entry_point,
            set_bindings,
            inputs,
            outputs,
            structs,
        })
    }

    pub fn find_struct(&self, name: &str) -> Option<&ShaderStruct> {
        self.structs.iter().find(|s| s.name == name)
    }
}

// 反射数据转换
impl ShaderReflection {
    fn convert_stage(stage: ReflectShaderStageFlags) -> anyhow::Result<vk::ShaderStageFlags> {
        if stage == ReflectShaderStageFlags::VERTEX {
            Ok(vk::ShaderStageFlags::VERTEX)
        } else if stage == ReflectShaderStageFlags::FRAGMENT {
            Ok(vk::ShaderStageFlags::FRAGMENT)
        } else {
            anyhow::bail!("unsupported shader stage: {stage:?}")
        }
    }

    fn convert_descriptor_type(ty: ReflectDescriptorType) -> anyhow::Result<vk::DescriptorType> {
        match ty {
            ReflectDescriptorType::UniformBuffer => Ok(vk::DescriptorType::UNIFORM_BUFFER),
            ReflectDescriptorType::StorageBuffer => Ok(vk::DescriptorType::STORAGE_BUFFER),
            ReflectDescriptorType::CombinedImageSampler => Ok(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            ReflectDescriptorType::Sampler => Ok(vk::DescriptorType::SAMPLER),
            ReflectDescriptorType::SampledImage => Ok(vk::DescriptorType::SAMPLED_IMAGE),
            _ => anyhow::bail!("unsupported descriptor type: {ty:?}"),
        }
    }

    /// uniform block -> 具名 struct
    ///
    /// block 的类型名优先（`uniform Material_Properties { ... } u_material`
    /// 的类型名是 Material_Properties），没有类型名时用实例名。
    fn convert_block(binding: &spirv_reflect::types::ReflectDescriptorBinding) -> Option<ShaderStruct> {
        let block = &binding.block;

        let type_name = binding
            .type_description
            .as_ref()
            .map(|td| td.type_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| block.name.clone());
        if type_name.is_empty() {
            return None;
        }

        let members = block
            .members
            .iter()
            .map(|member| ShaderStructMember {
                name: member.name.clone(),
                data_type: Self::classify_member(member),
                offset: member.offset,
                size: member.size,
            })
            .collect();

        Some(ShaderStruct {
            name: type_name,
            members,
        })
    }

    fn classify_member(member: &ReflectBlockVariable) -> ShaderDataType {
        if !member.members.is_empty() {
            return ShaderDataType::Struct;
        }

        let matrix = &member.numeric.matrix;
        let vector = &member.numeric.vector;
        let scalar = &member.numeric.scalar;

        if matrix.column_count == 4 {
            ShaderDataType::Matrix4F
        } else if matrix.column_count == 3 {
            ShaderDataType::Matrix3F
        } else if vector.component_count == 4 {
            ShaderDataType::Vector4F
        } else if vector.component_count == 3 {
            ShaderDataType::Vector3F
        } else if vector.component_count == 2 {
            ShaderDataType::Vector2F
        } else if scalar.width == 64 {
            ShaderDataType::U64
        } else if scalar.signedness != 0 {
            ShaderDataType::S32
        } else if member.size == 4 {
            // u32 / f32 / bool 在 std140 中同尺寸，按位宽归类
            ShaderDataType::F32
        } else {
            ShaderDataType::U32
        }
    }

    fn convert_format(format: ReflectFormat) -> vk::Format {
        match format {
            ReflectFormat::R32_SFLOAT => vk::Format::R32_SFLOAT,
            ReflectFormat::R32G32_SFLOAT => vk::Format::R32G32_SFLOAT,
            ReflectFormat::R32G32B32_SFLOAT => vk::Format::R32G32B32_SFLOAT,
            ReflectFormat::R32G32B32A32_SFLOAT => vk::Format::R32G32B32A32_SFLOAT,
            ReflectFormat::R32_UINT => vk::Format::R32_UINT,
            ReflectFormat::R32G32_UINT => vk::Format::R32G32_UINT,
            ReflectFormat::R32G32B32_UINT => vk::Format::R32G32B32_UINT,
            ReflectFormat::R32G32B32A32_UINT => vk::Format::R32G32B32A32_UINT,
            ReflectFormat::R32_SINT => vk::Format::R32_SINT,
            ReflectFormat::R32G32_SINT => vk::Format::R32G32_SINT,
            ReflectFormat::R32G32B32_SINT => vk::Format::R32G32B32_SINT,
            ReflectFormat::R32G32B32A32_SINT => vk::Format::R32G32B32A32_SINT,
            _ => vk::Format::UNDEFINED,
        }
    }
}

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxShaderModule {
    handle: vk::ShaderModule,
}

impl GfxShaderModule {
    pub fn new(spv: &[u8], debug_name: &str) -> Self {
        let mut cursor = std::io::Cursor::new(spv);
        let shader_code = ash::util::read_spv(&mut cursor).expect("invalid spirv binary");

        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&shader_code);
        let handle = unsafe { Gfx::get().gfx_device().create_shader_module(&shader_module_info, None).unwrap() };
        Gfx::get().gfx_device().set_object_debug_name(handle, format!("ShaderModule::{debug_name}"));

        Self { handle }
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().destroy_shader_module(self.handle, None);
        }
    }
}
