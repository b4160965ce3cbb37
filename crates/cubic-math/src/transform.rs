// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

const SPIN_DEGREES_PER_SEC: f32 = 90.0;
const FOV_Y_DEGREES: f32 = 45.0;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 10.0;
const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);

/// Per-frame model/view/projection block read by the vertex shader.
///
/// Layout matches a std140 block of three `mat4` (column-major, 192 bytes):
///
/// ```glsl
/// layout(set = 0, binding = 0) uniform Transform {
///     mat4 model;
///     mat4 view;
///     mat4 projection;
/// };
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TransformBlock {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl TransformBlock {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Builds the block for `elapsed` seconds and a `width` x `height` viewport.
    ///
    /// Pure in its inputs: the same arguments always give the same bytes.
    /// The model is the only animated part and input does not affect it.
    pub fn at(elapsed: f32, width: u32, height: u32) -> Self {
        // A zero-sized viewport (minimized window) still yields a finite matrix.
        let aspect = width.max(1) as f32 / height.max(1) as f32;

        let model = Mat4::from_axis_angle(Vec3::Z, elapsed * SPIN_DEGREES_PER_SEC.to_radians());
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z);

        Self {
            model,
            view,
            projection: Self::projection(aspect),
        }
    }

    /// Perspective projection with Vulkan's downward clip-space Y.
    ///
    /// glam assumes Y up in clip space, so [1][1] is negated after the fact.
    pub fn projection(aspect: f32) -> Mat4 {
        let mut projection = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        projection.y_axis.y *= -1.0;
        projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_three_packed_mat4() {
        assert_eq!(TransformBlock::SIZE, 3 * 64);
        assert_eq!(std::mem::align_of::<TransformBlock>() % 4, 0);
        let block = TransformBlock::at(0.0, 800, 600);
        assert_eq!(bytemuck::bytes_of(&block).len(), TransformBlock::SIZE);
    }

    #[test]
    fn projection_flips_vertical_axis() {
        for &(fov_deg, aspect) in &[(45.0_f32, 4.0 / 3.0), (45.0, 16.0 / 9.0), (45.0, 0.5)] {
            let stock = Mat4::perspective_rh(fov_deg.to_radians(), aspect, Z_NEAR, Z_FAR);
            let ours = TransformBlock::projection(aspect);
            assert!(stock.y_axis.y > 0.0);
            assert_eq!(ours.y_axis.y, -stock.y_axis.y);
            // Only [1][1] is touched.
            assert_eq!(ours.x_axis, stock.x_axis);
            assert_eq!(ours.z_axis, stock.z_axis);
            assert_eq!(ours.w_axis, stock.w_axis);
        }
    }

    #[test]
    fn same_inputs_same_bytes() {
        let a = TransformBlock::at(1.25, 1024, 768);
        let b = TransformBlock::at(1.25, 1024, 768);
        assert_eq!(bytemuck::bytes_of(&a), bytemuck::bytes_of(&b));
    }

    #[test]
    fn model_spins_ninety_degrees_per_second() {
        let block = TransformBlock::at(1.0, 800, 600);
        let x = block.model.transform_vector3(Vec3::X);
        assert!((x - Vec3::Y).length() < 1e-5, "{x:?}");
        assert_eq!(TransformBlock::at(0.0, 800, 600).model, Mat4::IDENTITY);
    }

    #[test]
    fn view_is_fixed_over_time() {
        let early = TransformBlock::at(0.0, 800, 600);
        let late = TransformBlock::at(42.0, 800, 600);
        assert_eq!(early.view, late.view);
        let origin_in_view = early.view.transform_point3(Vec3::ZERO);
        assert!((origin_in_view.length() - EYE.length()).abs() < 1e-5);
        assert!(origin_in_view.z < 0.0, "origin must be in front of the camera");
    }

    #[test]
    fn aspect_follows_extent() {
        let wide = TransformBlock::at(0.0, 1600, 800);
        let square = TransformBlock::at(0.0, 800, 800);
        assert!((square.projection.x_axis.x / wide.projection.x_axis.x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn zero_extent_stays_finite() {
        let block = TransformBlock::at(0.5, 0, 0);
        assert!(block.projection.is_finite());
    }
}
