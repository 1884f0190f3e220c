//! Scene math shared by the headset views and the spectator camera
//!
//! Everything here is pure: a view pose, a field of view and the elapsed
//! time go in, the constant-buffer contents come out. Matrices use glam's
//! column-vector convention with a right-handed, 0..1 depth projection.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

use stream_xr::{Extent2D, Fov, ImageRect, Pose, ProjectionView};

/// Near clip plane (meters)
pub const NEAR_PLANE: f32 = 0.05;
/// Far clip plane (meters)
pub const FAR_PLANE: f32 = 100.0;

/// Navy background
pub const CLEAR_COLOR: [f32; 4] = [0.098, 0.137, 0.294, 1.0];

pub const AMBIENT: f32 = 0.3;
pub const DIFFUSE: f32 = 0.7;
/// Unnormalized light direction (top-front-right)
pub const LIGHT_DIRECTION: [f32; 3] = [0.5, 0.8, 0.3];

const CUBE_COLOR: [f32; 3] = [0.95, 0.95, 0.95];
const CUBE_SCALE: f32 = 0.7;
const CUBE_POSITION: Vec3 = Vec3::new(0.0, -0.6, -2.0);
/// Spin about Y, radians per second
const CUBE_SPIN: f32 = 0.36;

/// Spectator camera position
pub const SPECTATOR_POSITION: Vec3 = Vec3::new(0.0, -0.6, 4.0);
/// Spectator vertical field of view (radians)
pub const SPECTATOR_VERTICAL_FOV: f32 = 0.4;

/// Cube vertex: position, color, normal
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub normal: [f32; 3],
}

/// Vertex shader constants (column-major)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TransformBuffer {
    pub world: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
}

/// Two triangles per face, counter-clockwise seen from outside
pub const CUBE_INDICES: [u16; 36] = [
    0, 1, 2, 0, 2, 3, // front
    5, 4, 7, 5, 7, 6, // back
    8, 9, 10, 8, 10, 11, // left
    12, 14, 13, 12, 15, 14, // right
    16, 17, 18, 16, 18, 19, // top
    20, 22, 21, 20, 23, 22, // bottom
];

/// Unit cube centered on the origin, four vertices per face
pub fn cube_vertices() -> [Vertex; 24] {
    const FACES: [([f32; 3], [[f32; 3]; 4]); 6] = [
        (
            [0.0, 0.0, 1.0],
            [[-0.5, -0.5, 0.5], [0.5, -0.5, 0.5], [0.5, 0.5, 0.5], [-0.5, 0.5, 0.5]],
        ),
        (
            [0.0, 0.0, -1.0],
            [[-0.5, -0.5, -0.5], [0.5, -0.5, -0.5], [0.5, 0.5, -0.5], [-0.5, 0.5, -0.5]],
        ),
        (
            [-1.0, 0.0, 0.0],
            [[-0.5, -0.5, -0.5], [-0.5, -0.5, 0.5], [-0.5, 0.5, 0.5], [-0.5, 0.5, -0.5]],
        ),
        (
            [1.0, 0.0, 0.0],
            [[0.5, -0.5, -0.5], [0.5, -0.5, 0.5], [0.5, 0.5, 0.5], [0.5, 0.5, -0.5]],
        ),
        (
            [0.0, 1.0, 0.0],
            [[-0.5, 0.5, -0.5], [-0.5, 0.5, 0.5], [0.5, 0.5, 0.5], [0.5, 0.5, -0.5]],
        ),
        (
            [0.0, -1.0, 0.0],
            [[-0.5, -0.5, -0.5], [-0.5, -0.5, 0.5], [0.5, -0.5, 0.5], [0.5, -0.5, -0.5]],
        ),
    ];

    let mut vertices = [Vertex::zeroed(); 24];
    for (face, (normal, corners)) in FACES.iter().enumerate() {
        for (corner, position) in corners.iter().enumerate() {
            vertices[face * 4 + corner] = Vertex {
                position: *position,
                color: CUBE_COLOR,
                normal: *normal,
            };
        }
    }
    vertices
}

/// Off-center right-handed perspective from the view's half-angles
pub fn projection(fov: &Fov, near: f32, far: f32) -> Mat4 {
    let left = near * fov.angle_left.tan();
    let right = near * fov.angle_right.tan();
    let down = near * fov.angle_down.tan();
    let up = near * fov.angle_up.tan();

    let width = right - left;
    let height = up - down;
    let range = near - far;

    Mat4::from_cols(
        glam::Vec4::new(2.0 * near / width, 0.0, 0.0, 0.0),
        glam::Vec4::new(0.0, 2.0 * near / height, 0.0, 0.0),
        glam::Vec4::new(
            (left + right) / width,
            (up + down) / height,
            far / range,
            -1.0,
        ),
        glam::Vec4::new(0.0, 0.0, near * far / range, 0.0),
    )
}

/// World-to-view: inverse of the view pose
pub fn view_matrix(pose: &Pose) -> Mat4 {
    pose.to_matrix().inverse()
}

/// Cube placement after `seconds` of animation
pub fn model_matrix(seconds: f32) -> Mat4 {
    Mat4::from_scale_rotation_translation(
        Vec3::splat(CUBE_SCALE),
        Quat::from_rotation_y(seconds * CUBE_SPIN),
        CUBE_POSITION,
    )
}

/// Constants for drawing the cube into `view`
pub fn transforms(view: &ProjectionView, seconds: f32) -> TransformBuffer {
    let view_proj = projection(&view.fov, NEAR_PLANE, FAR_PLANE) * view_matrix(&view.pose);
    TransformBuffer {
        world: model_matrix(seconds).to_cols_array_2d(),
        view_proj: view_proj.to_cols_array_2d(),
    }
}

/// Symmetric fixed camera for a window of `extent`
// TODO: draw the cube into the debug window through this camera
#[allow(dead_code)]
pub(crate) fn spectator_view(extent: Extent2D) -> ProjectionView {
    let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
    let vertical = SPECTATOR_VERTICAL_FOV;
    let horizontal = 2.0 * ((vertical / 2.0).tan() * aspect).atan();

    ProjectionView {
        pose: Pose::new(SPECTATOR_POSITION, Quat::IDENTITY),
        fov: Fov {
            angle_left: -horizontal / 2.0,
            angle_right: horizontal / 2.0,
            angle_up: vertical / 2.0,
            angle_down: -vertical / 2.0,
        },
        swapchain: 0,
        image_rect: ImageRect {
            offset: [0, 0],
            extent,
        },
    }
}

/// HLSL for the lit cube
pub fn shader_source() -> String {
    let [lx, ly, lz] = LIGHT_DIRECTION;
    format!(
        r#"
cbuffer TransformBuffer : register(b0) {{
    float4x4 world;
    float4x4 viewproj;
}};

struct vsIn {{
    float3 pos    : SV_POSITION;
    float3 color  : COLOR;
    float3 normal : NORMAL;
}};

struct psIn {{
    float4 pos   : SV_POSITION;
    float3 color : COLOR;
}};

psIn vs(vsIn input) {{
    psIn output;
    float4 world_pos = mul(world, float4(input.pos, 1));
    output.pos = mul(viewproj, world_pos);

    float3 light_dir = normalize(float3({lx:?}, {ly:?}, {lz:?}));
    float3 normal = normalize(mul((float3x3)world, input.normal));
    float diffuse = max(dot(normal, light_dir), 0.0);
    output.color = input.color * ({ambient:?} + diffuse * {diffuse:?});
    return output;
}}

float4 ps(psIn input) : SV_TARGET {{
    return float4(input.color, 1.0);
}}
"#,
        ambient = AMBIENT,
        diffuse = DIFFUSE,
    )
}
