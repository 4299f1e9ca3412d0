// Scene data for the hardcoded triangle
//
// All types are #[repr(C)] + Pod so they can be copied straight into mapped
// buffers and push constants. Layouts must match shaders/triangle.*.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use std::mem::{offset_of, size_of};

/// Vertex with a 2D clip-space position and an RGB color
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: Vec2, color: Vec3) -> Self {
        Self { position, color }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position at location 0
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            // Color at location 1
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new(Vec2::new(-1.0, 1.0), Vec3::new(0.1, 0.1, 1.0)),
    Vertex::new(Vec2::new(1.0, 1.0), Vec3::new(0.1, 1.0, 0.1)),
    Vertex::new(Vec2::new(0.0, -1.0), Vec3::new(1.0, 0.1, 0.1)),
];

/// Per-frame uniform data read by the fragment shader (set 0, binding 0).
///
/// std140 gives a vec3 a 16-byte slot, hence the padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraData {
    pub position: Vec3,
    pub _padding: f32,
}

impl CameraData {
    pub const SIZE: vk::DeviceSize = size_of::<Self>() as vk::DeviceSize;

    /// Camera position orbiting the unit square as frames go by
    pub fn for_frame(frame: u64) -> Self {
        let t = frame as f32 / 20.0;
        Self {
            position: Vec3::new(t.sin() / 2.0 + 0.5, t.cos() / 2.0 + 0.5, 0.0),
            _padding: 0.0,
        }
    }
}

/// Vertex-stage push constants
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub transform: Mat4,
}

impl PushConstants {
    pub const SIZE: u32 = size_of::<Self>() as u32;
}

impl Default for PushConstants {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 20);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 8);
        assert_eq!(Vertex::binding_description().stride, 20);
    }

    #[test]
    fn test_uniform_and_push_constant_sizes() {
        assert_eq!(CameraData::SIZE, 16);
        assert_eq!(PushConstants::SIZE, 64);
    }

    #[test]
    fn test_camera_starts_at_top_center() {
        let camera = CameraData::for_frame(0);
        assert_eq!(camera.position, Vec3::new(0.5, 1.0, 0.0));
    }

    #[test]
    fn test_camera_stays_in_unit_range() {
        for frame in (0..10_000).step_by(7) {
            let p = CameraData::for_frame(frame).position;
            assert!((0.0..=1.0).contains(&p.x));
            assert!((0.0..=1.0).contains(&p.y));
            assert_eq!(p.z, 0.0);
        }
    }
}
