use ash::vk;
use hanabi_asset::{AssetHandle, AssetManager};
use hanabi_gfx::commands::command_buffer::GfxCommandBuffer;
use hanabi_gfx::descriptors::bind_group::{GfxBindGroup, GfxBindingUpdate};
use hanabi_gfx::pipelines::shader::ShaderDataType;
use hanabi_gfx::resources::buffer::GfxBuffer;

use crate::handles::*;
use crate::resources::resource_manager::{RenderResourceManager, MATERIAL_SET_INDEX};
use crate::resources::*;
use crate::settings::{FrameLabel, MAX_FRAMES_IN_FLIGHT, MAX_MATERIAL_COUNT};

/// shader 中描述材质 uniform 布局的 struct 名
pub const MATERIAL_PROPERTIES_STRUCT: &str = "Material_Properties";

// material
impl RenderResourceManager {
    /// 根据 pipeline 的 shader 反射创建材质
    ///
    /// `Material_Properties` struct 决定 uniform 布局：
    /// data 大小取最后一个成员的 offset + size；
    /// `_texture` 结尾的成员是纹理引用，`_color` 结尾的按颜色处理。
    /// 每个 frame in flight 一份 uniform buffer 和 bind group（binding 0）。
    pub fn create_material(&self, name: &str, pipeline_state: PipelineStateHandle) -> MaterialHandle {
        let state = &mut *self.lock();
        assert!(state.materials.len() < MAX_MATERIAL_COUNT, "material pool exhausted");

        let pipeline = state.pipeline_states.get(pipeline_state).expect("stale pipeline handle");
        let group_handle = pipeline.shader_group;
        let group = state.shader_groups.get(group_handle).expect("stale shader group handle");

        let shader_struct = group
            .shaders
            .iter()
            .find_map(|&shader| {
                state.shaders.get(shader).expect("stale shader handle").reflection.find_struct(MATERIAL_PROPERTIES_STRUCT)
            })
            .cloned()
            .unwrap_or_else(|| panic!("shader group `{}` has no {MATERIAL_PROPERTIES_STRUCT} struct", group.name));

        let data_size = shader_struct.byte_size() as usize;
        let properties = shader_struct
            .members
            .iter()
            .map(|member| MaterialProperty {
                name: member.name.clone(),
                data_type: member.data_type,
                offset: member.offset,
                size: member.size,
                is_texture: is_texture_property(&member.name),
                is_color: is_color_property(&member.name),
                texture_asset: AssetHandle::INVALID,
            })
            .collect::<Vec<_>>();

        let material_layout_handle = group.bind_group_layouts[MATERIAL_SET_INDEX]
            .unwrap_or_else(|| panic!("shader group `{}` declares no material set", group.name));

        // 三缓冲开关可以在运行期切换，buffer 按上限创建
        let mut buffers = [BufferHandle::default(); MAX_FRAMES_IN_FLIGHT];
        let mut bind_groups = [BindGroupHandle::default(); MAX_FRAMES_IN_FLIGHT];
        for fif in 0..MAX_FRAMES_IN_FLIGHT {
            let buffer = GfxBuffer::new(
                data_size as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                true,
                &format!("{name}-uniform-{fif}"),
            );
            let buffer_vk = buffer.vk_buffer();
            let buffer_handle = state.buffers.insert(BufferResource {
                name: format!("{name}-uniform-{fif}"),
                usage: BufferUsage::Uniform,
                is_device_local: false,
                gfx: buffer,
            });
            buffers[fif] = buffer_handle;

            let layout = state.bind_group_layouts.get(material_layout_handle).expect("stale layout handle");
            let bind_group = GfxBindGroup::new(&layout.gfx, &format!("{name}-material-{fif}"));
            bind_group.update(&[GfxBindingUpdate::UniformBuffer {
                binding: 0,
                element_index: 0,
                buffers: vec![vk::DescriptorBufferInfo::default()
                    .buffer(buffer_vk)
                    .offset(0)
                    .range(data_size as u64)],
            }]);
            bind_groups[fif] = state.bind_groups.insert(BindGroupResource {
                gfx: bind_group,
                layout: material_layout_handle,
            });
        }

        state.materials.insert(MaterialResource {
            name: name.to_string(),
            pipeline_state,
            properties,
            data: vec![0; data_size],
            buffers,
            bind_groups,
            dirty_count: state.frames_in_flight as u32,
        })
    }

    pub fn destroy_material(&self, handle: MaterialHandle) {
        let state = &mut *self.lock();
        let material = state.materials.remove(handle).expect("stale material handle");
        for fif in 0..MAX_FRAMES_IN_FLIGHT {
            let buffer = state.buffers.remove(material.buffers[fif]).expect("stale material buffer");
            buffer.gfx.destroy();
            let group = state.bind_groups.remove(material.bind_groups[fif]).expect("stale material bind group");
            group.gfx.free();
        }
    }

    pub fn material_pipeline(&self, handle: MaterialHandle) -> PipelineStateHandle {
        self.lock().materials.get(handle).expect("stale material handle").pipeline_state
    }

    pub fn is_material_valid(&self, handle: MaterialHandle) -> bool {
        self.lock().materials.contains_key(handle)
    }

    pub fn material_dirty_count(&self, handle: MaterialHandle) -> u32 {
        self.lock().materials.get(handle).expect("stale material handle").dirty_count
    }

    /// 更新 CPU 侧影子数据
    ///
    /// 纹理引用记录 asset uuid 并立刻解析一次：目标未加载时写入
    /// white-pixel 的下标并在后台发起 acquire。任何属性变更都会把
    /// dirty_count 重置为 frames in flight，保证每份 per-frame buffer
    /// 都被重写一遍。
    pub fn set_material_property(
        &self,
        handle: MaterialHandle,
        name: &str,
        value: MaterialPropertyValue,
        assets: &AssetManager,
    ) -> bool {
        let state = &mut *self.lock();
        let frames_in_flight = state.frames_in_flight as u32;

        let white_index = state.white_pixel_texture.slot_index();
        let textures = &state.textures;
        let material = match state.materials.get_mut(handle) {
            Some(material) => material,
            None => panic!("stale material handle"),
        };

        let Some(property_index) = material.properties.iter().position(|p| p.name == name) else {
            log::error!("set_material_property -- material `{}` has no property `{name}`", material.name);
            return false;
        };

        let (offset, size) = {
            let property = &material.properties[property_index];
            (property.offset as usize, property.size as usize)
        };

        let write_bytes = |data: &mut Vec<u8>, bytes: &[u8]| {
            assert!(bytes.len() <= size, "property value too large");
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
        };

        match value {
            MaterialPropertyValue::F32(v) => write_bytes(&mut material.data, &v.to_le_bytes()),
            MaterialPropertyValue::U32(v) => write_bytes(&mut material.data, &v.to_le_bytes()),
            MaterialPropertyValue::Bool(v) => write_bytes(&mut material.data, &(v as u32).to_le_bytes()),
            MaterialPropertyValue::Vector2(v) => write_bytes(&mut material.data, bytemuck::cast_slice(&v)),
            MaterialPropertyValue::Vector3(v) => write_bytes(&mut material.data, bytemuck::cast_slice(&v)),
            MaterialPropertyValue::Vector4(v) => write_bytes(&mut material.data, bytemuck::cast_slice(&v)),
            MaterialPropertyValue::Texture(asset) => {
                let property = &mut material.properties[property_index];
                assert!(property.is_texture, "property `{name}` is not a texture reference");
                property.texture_asset = asset;

                let index = resolve_texture_index(textures, white_index, assets, asset);
                material.data[offset..offset + 4].copy_from_slice(&index.to_le_bytes());

                // 后台加载，加载完成后 use_material 会重新解析
                if asset.is_valid() && assets.is_valid(asset) && !assets.is_loaded(asset) {
                    assets.acquire(asset);
                }
            }
        }

        material.dirty_count = frames_in_flight;
        true
    }

    /// 绑定材质供绘制使用
    ///
    /// dirty 时重新解析纹理引用并把影子数据拷入当前帧的 buffer；
    /// 仍有 Pending 的纹理时保持 dirty。材质 bind group 绑定到 set 2，
    /// pipeline 与当前绑定不同才重新绑定。
    ///
    /// dirty_count 每次调用递减一次，每个 in-flight buffer 恰好要被写一遍；
    /// 调用方负责对排序后连续相同材质的 packet 去重，一个材质一帧只 use 一次。
    pub fn use_material(
        &self,
        cmd: &GfxCommandBuffer,
        handle: MaterialHandle,
        frame_label: FrameLabel,
        assets: &AssetManager,
        bound_pipeline: &mut Option<PipelineStateHandle>,
    ) {
        let state = &mut *self.lock();
        let fif = *frame_label;

        let white_index = state.white_pixel_texture.slot_index();
        let textures = &state.textures;
        let material = state.materials.get_mut(handle).expect("stale material handle");

        if material.dirty_count > 0 {
            let mut still_pending = false;
            for property in &mut material.properties {
                if !property.is_texture || !property.texture_asset.is_valid() {
                    continue;
                }
                let asset = property.texture_asset;
                let index = resolve_texture_index(textures, white_index, assets, asset);
                let offset = property.offset as usize;
                material.data[offset..offset + 4].copy_from_slice(&index.to_le_bytes());

                if assets.is_valid(asset) && assets.is_pending(asset) {
                    still_pending = true;
                }
            }

            let buffer = state.buffers.get(material.buffers[fif]).expect("stale material buffer");
            buffer.gfx.write_bytes(0, &material.data);

            if !still_pending {
                material.dirty_count -= 1;
            }
        }

        let pipeline = state.pipeline_states.get(material.pipeline_state).expect("stale pipeline handle");
        let bind_group = state.bind_groups.get(material.bind_groups[fif]).expect("stale material bind group");

        cmd.bind_descriptor_sets(
            pipeline.gfx.layout(),
            MATERIAL_SET_INDEX as u32,
            &[bind_group.gfx.handle()],
            &[],
        );

        if *bound_pipeline != Some(material.pipeline_state) {
            cmd.bind_graphics_pipeline(pipeline.gfx.pipeline());
            *bound_pipeline = Some(material.pipeline_state);
        }
    }

    /// 读取材质的一个标量/向量属性，编辑器用
    pub fn material_property_bytes(&self, handle: MaterialHandle, name: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        let material = state.materials.get(handle)?;
        let property = material.properties.iter().find(|p| p.name == name)?;
        let offset = property.offset as usize;
        Some(material.data[offset..offset + property.size as usize].to_vec())
    }
}

/// 把纹理 asset 解析为 bindless 下标
///
/// 未加载（或句柄已失效）时回落到 white-pixel。
fn resolve_texture_index(
    textures: &slotmap::SlotMap<TextureHandle, TextureResource>,
    white_index: u32,
    assets: &AssetManager,
    asset: AssetHandle,
) -> u32 {
    if !asset.is_valid() || !assets.is_valid(asset) || !assets.is_loaded(asset) {
        return white_index;
    }

    let result = assets.get(asset);
    let handle = TextureHandle::from_raw(result.as_raw());
    if textures.contains_key(handle) {
        handle.slot_index()
    } else {
        white_index
    }
}

/// 材质文件/编辑器使用的数据类型名
pub fn data_type_name(ty: ShaderDataType) -> &'static str {
    match ty {
        ShaderDataType::Bool => "bool",
        ShaderDataType::S32 => "s32",
        ShaderDataType::U32 => "u32",
        ShaderDataType::U64 => "u64",
        ShaderDataType::F32 => "f32",
        ShaderDataType::Vector2F => "vector2f",
        ShaderDataType::Vector3F => "vector3f",
        ShaderDataType::Vector4F => "vector4f",
        ShaderDataType::Matrix3F => "matrix3f",
        ShaderDataType::Matrix4F => "matrix4f",
        ShaderDataType::Struct => "struct",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_naming_conventions() {
        assert!(is_texture_property("albedo_texture"));
        assert!(is_texture_property("normal_texture"));
        assert!(!is_texture_property("albedo_color"));
        assert!(is_color_property("albedo_color"));
        assert!(!is_color_property("roughness"));
    }
}
