use serde::{Deserialize, Serialize};
use ultraviolet::{Mat4, Rotor3, Vec3};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Rotor3,
    pub scale: Vec3,
}

impl Transform {
    pub fn from_arrays(position: [f32; 3], orientation: [f32; 4], scale: [f32; 3]) -> Self {
        Self {
            position: Vec3::from(position),
            orientation: Rotor3::from_quaternion_array(orientation),
            scale: Vec3::from(scale),
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn is_scaled(&self) -> bool {
        self.scale != Vec3::one()
    }

    pub fn rotation_matrix(&self) -> Mat4 {
        self.orientation.into_matrix().into_homogeneous()
    }

    /// Object to world, scaling around `pivot` (in object space) instead of the origin.
    /// `origin` is subtracted from the translation, which is how instances end up camera relative.
    pub fn matrix_around(&self, pivot: Vec3, origin: Vec3) -> Mat4 {
        let scale = if self.is_scaled() {
            Mat4::from_translation(pivot)
                * Mat4::from_nonuniform_scale(self.scale)
                * Mat4::from_translation(-pivot)
        } else {
            Mat4::identity()
        };
        Mat4::from_translation(self.position - origin) * self.rotation_matrix() * scale
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            scale: Vec3::one(),
        }
    }
}

impl From<Transform> for Mat4 {
    fn from(transform: Transform) -> Self {
        let isometry = ultraviolet::Isometry3::new(transform.position, transform.orientation);
        isometry.into_homogeneous_matrix() * Mat4::from_nonuniform_scale(transform.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ultraviolet::Vec4;

    #[test]
    fn scaling_keeps_pivot_in_place() {
        let transform = Transform {
            position: Vec3::new(10.0, 0.0, 0.0),
            orientation: Rotor3::identity(),
            scale: Vec3::broadcast(0.5),
        };
        let pivot = Vec3::new(1.0, 1.0, 1.0);
        let moved = transform.matrix_around(pivot, Vec3::zero()) * Vec4::new(1.0, 1.0, 1.0, 1.0);
        assert!((moved.xyz() - Vec3::new(11.0, 1.0, 1.0)).mag() < 1e-5);
    }

    #[test]
    fn unscaled_matches_plain_conversion() {
        let transform = Transform::from_arrays([1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 1.0], [1.0; 3]);
        let plain: Mat4 = transform.clone().into();
        assert_eq!(transform.matrix_around(Vec3::one(), Vec3::zero()), plain);
    }
}
