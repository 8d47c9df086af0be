use glam::{Mat4, Vec3};

/// Rotation about +Z, a quarter turn per second.
pub fn model_matrix(elapsed: f32) -> Mat4 {
    Mat4::from_rotation_z(elapsed * 90f32.to_radians())
}

/// Looks at the origin from (2, 2, 2) with +Z up.
pub fn view_matrix() -> Mat4 {
    Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z)
}

/// 45° vertical field of view, near 0.1, far 10.
pub fn projection_matrix(aspect: f32) -> Mat4 {
    Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_is_identity_at_start() {
        assert!(model_matrix(0.0).abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn one_second_is_a_quarter_turn() {
        let x = model_matrix(1.0).transform_vector3(Vec3::X);
        assert!(x.abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn origin_is_in_front_of_the_camera() {
        let p = projection_matrix(800.0 / 600.0) * view_matrix() * glam::Vec4::W;
        let ndc = p.truncate() / p.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
