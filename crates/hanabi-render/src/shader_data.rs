use bytemuck::{Pod, Zeroable};

/// 每帧的全局 uniform 数据，布局与 shader 中的 Globals block 一致
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Globals {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],

    pub directional_light_direction: [f32; 3],
    pub _padding_0: f32,
    /// color * intensity
    pub directional_light_color: [f32; 3],
    pub gamma: f32,

    /// 场景的环境光颜色
    pub ambient_color: [f32; 3],
    pub _padding_1: f32,
}

const _: () = assert!(std::mem::size_of::<Globals>() == 176);
const _: () = assert!(std::mem::offset_of!(Globals, projection) == 64);
const _: () = assert!(std::mem::offset_of!(Globals, directional_light_direction) == 128);
const _: () = assert!(std::mem::offset_of!(Globals, directional_light_color) == 144);
const _: () = assert!(std::mem::offset_of!(Globals, ambient_color) == 160);

/// 每个绘制对象的数据，storage buffer 中按 transform_index 索引
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ObjectData {
    pub model: [[f32; 4]; 4],
}

const _: () = assert!(std::mem::size_of::<ObjectData>() == 64);

/// 静态网格的顶点流布局（分离的 stream，不交错）
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default)]
pub struct VertexPosition(pub [f32; 3]);

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default)]
pub struct VertexNormal(pub [f32; 3]);

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default)]
pub struct VertexUv(pub [f32; 2]);

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default)]
pub struct VertexTangent(pub [f32; 4]);
