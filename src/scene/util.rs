use nalgebra as na;
use na::{vector, Point3, Vector3, Vector4};

/// Transformation of a point to homogenous coordinates.
pub fn embed_point(p: Point3<f32>) -> Vector4<f32> {
    return vector![p.x, p.y, p.z, 1.0];
}

/// Transformation of a direction to homogenous coordinates, translation is not applied to it.
pub fn embed_vector(v: Vector3<f32>) -> Vector4<f32> {
    return vector![v.x, v.y, v.z, 0.0];
}

/// First three components of a homogenous vector, w is dropped without division.
pub fn project_xyz(v: Vector4<f32>) -> Vector3<f32> {
    return vector![v.x, v.y, v.z];
}

/// Transformation of a point from homogenous coordinates.
pub fn from_homogeneous_point(v: Vector4<f32>) -> Point3<f32> {
    return Point3::new(v.x / v.w, v.y / v.w, v.z / v.w);
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::Matrix4;

    #[test]
    fn vectors_ignore_translation() {
        let translate = Matrix4::new_translation(&vector![5.0, -2.0, 1.0]);
        let moved = project_xyz(translate * embed_vector(vector![0.0, 1.0, 0.0]));
        assert_eq!(moved, vector![0.0, 1.0, 0.0]);

        let moved = project_xyz(translate * embed_point(Point3::new(0.0, 1.0, 0.0)));
        assert_eq!(moved, vector![5.0, -1.0, 1.0]);
    }

    #[test]
    fn point_divides_by_w() {
        let p = from_homogeneous_point(vector![2.0, 4.0, -6.0, 2.0]);
        assert_eq!(p, Point3::new(1.0, 2.0, -3.0));
    }
}
