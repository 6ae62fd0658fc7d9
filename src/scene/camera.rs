use nalgebra as na;
use na::{matrix, Matrix4, Vector3};

/// Camera placement in the world. Everything the pipeline needs from it are the view and
/// projection matrices, which are snapshotted into a draw context before rendering.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub eye: Vector3<f32>,
    pub center: Vector3<f32>,
    pub up: Vector3<f32>,
}

impl Camera {
    pub fn new(eye: Vector3<f32>, center: Vector3<f32>, up: Vector3<f32>) -> Self {
        return Self { eye, center, up };
    }

    /// Transform to the basis relative to the camera. In the new frame the camera sits in the
    /// origin and looks along +z.
    pub fn view_matrix(&self) -> Matrix4<f32> {
        let new_z = (self.center - self.eye).normalize();
        let new_x = self.up.cross(&new_z).normalize();
        let new_y = new_z.cross(&new_x).normalize();
        let basis_matrix = matrix![new_x.x, new_x.y, new_x.z, 0.0;
                                   new_y.x, new_y.y, new_y.z, 0.0;
                                   new_z.x, new_z.y, new_z.z, 0.0;
                                   0.0,     0.0,     0.0,     1.0];
        let translation_matrix = matrix![1.0, 0.0, 0.0, -self.eye.x;
                                         0.0, 1.0, 0.0, -self.eye.y;
                                         0.0, 0.0, 1.0, -self.eye.z;
                                         0.0, 0.0, 0.0, 1.0];
        return basis_matrix * translation_matrix;
    }

    /// Perspective projection with the focal distance equal to the distance to the target.
    /// Resulting w is -z / f, so the divide flips both axes. View x is already mirrored, the -1
    /// in the second row undoes the flip for y.
    pub fn projection_matrix(&self) -> Matrix4<f32> {
        let coef = -1.0 / (self.eye - self.center).norm();
        return matrix![1.0, 0.0,  0.0,  0.0;
                       0.0, -1.0, 0.0,  0.0;
                       0.0, 0.0,  1.0,  0.0;
                       0.0, 0.0,  coef, 0.0];
    }
}

/// Matrix, mapping [-1, 1] x [-1, 1] to the pixel rectangle starting at (x, y) of size w x h.
/// Depth is passed through untouched.
pub fn viewport(x: f32, y: f32, w: f32, h: f32) -> Matrix4<f32> {
    return matrix![w / 2.0, 0.0,     0.0, x + w / 2.0;
                   0.0,     h / 2.0, 0.0, y + h / 2.0;
                   0.0,     0.0,     1.0, 0.0;
                   0.0,     0.0,     0.0, 1.0];
}
