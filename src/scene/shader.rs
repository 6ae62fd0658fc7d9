use std::fmt;

use super::model::Model;
use super::util::{embed_point, embed_vector, project_xyz};

use nalgebra as na;
use na::{vector, Matrix2x3, Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// Ambient light added to every channel.
const AMBIENT: f32 = 10.0;
/// Base of the specular exponent, the specular map value is added to it.
const SPECULAR_BASE: f32 = 5.0;
/// Below this the tangent basis can't be recovered.
const DEGENERACY_EPSILON: f32 = 1e-12;

/// Failure of a shader to produce a color for a fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadeError {
    /// View space triangle has no area, the tangent basis system has no solution.
    DegenerateTriangle,
    /// Texture coordinates of the triangle don't span a plane.
    DegenerateUv,
    /// View matrix has no inverse, so normals can't be transformed.
    SingularView,
    /// View or projection matrix has infinite or NaN entries.
    NonFiniteMatrix,
    /// Light direction has no length or isn't finite, so it can't be normalized.
    DegenerateLight,
}

impl fmt::Display for ShadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShadeError::DegenerateTriangle => write!(f, "triangle is degenerate in view space"),
            ShadeError::DegenerateUv => write!(f, "triangle uv coordinates are degenerate"),
            ShadeError::SingularView => write!(f, "view matrix is not invertible"),
            ShadeError::NonFiniteMatrix => write!(f, "view or projection matrix has non-finite entries"),
            ShadeError::DegenerateLight => write!(f, "light direction is zero or not finite"),
        }
    }
}

impl std::error::Error for ShadeError {}

/// Output of a fragment shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    pub color: Vector3<u8>,
    /// If set, the fragment is dropped and neither color nor depth are written.
    pub discard: bool,
}

/// Contract between the rasterizer and a lighting model.
///
/// For every triangle the rasterizer calls `vertex` once for each of the three slots, then
/// `fragment` for each covered pixel. Per triangle state lives in `Varyings`, which is owned
/// by the caller, so the shader itself stays immutable during a draw.
pub trait Shader {
    type Varyings: Default;

    /// Processes vertex `slot` of triangle `face`, returns its clip space position.
    fn vertex(&self, varyings: &mut Self::Varyings, face: usize, slot: usize) -> Vector4<f32>;

    /// Computes color of a fragment with barycentric coordinates `bar` in the current triangle.
    fn fragment(&self, varyings: &Self::Varyings, bar: Vector3<f32>) -> Result<Fragment, ShadeError>;
}

/// Constants of a single draw call.
#[derive(Debug, Clone, Copy)]
pub struct DrawContext {
    pub view_matrix: Matrix4<f32>,
    pub it_view_matrix: Matrix4<f32>, // Applied to model normals.
    pub projection_matrix: Matrix4<f32>,
    pub light_direction: Vector3<f32>, // Unit light direction in view space.
}

impl DrawContext {
    pub fn new(
        view_matrix: Matrix4<f32>,
        projection_matrix: Matrix4<f32>,
        light_direction: Vector3<f32>,
    ) -> Result<Self, ShadeError> {
        let is_finite = |m: &Matrix4<f32>| m.iter().all(|x| x.is_finite());
        if !is_finite(&view_matrix) || !is_finite(&projection_matrix) {
            return Err(ShadeError::NonFiniteMatrix);
        }
        let it_view_matrix = view_matrix.transpose().try_inverse().ok_or(ShadeError::SingularView)?;

        let light = project_xyz(view_matrix * embed_vector(light_direction));
        if !light.iter().all(|x| x.is_finite()) || light.norm_squared() < DEGENERACY_EPSILON {
            return Err(ShadeError::DegenerateLight);
        }
        let light_direction = light.normalize();
        return Ok(Self { view_matrix, it_view_matrix, projection_matrix, light_direction });
    }
}

/// Values passed from the vertex to the fragment shader of the normal map pipeline.
/// Each column belongs to one vertex of the triangle.
#[derive(Debug, Default, Clone)]
pub struct Varyings {
    pub uvs: Matrix2x3<f32>,
    pub normals: Matrix3<f32>,   // View space normals, not normalized.
    pub view_tri: Matrix3<f32>,  // View space positions.
    written: u8,                 // Bit per slot, filled by the vertex shader.
}

impl Varyings {
    /// True once every slot has been written by the vertex shader.
    pub fn is_complete(&self) -> bool {
        return self.written == 0b111;
    }

    fn mark(&mut self, slot: usize) {
        self.written |= 1 << slot;
    }

    /// Texture coordinate at the fragment.
    pub fn interpolate_uv(&self, bar: Vector3<f32>) -> Vector2<f32> {
        return self.uvs * bar;
    }

    /// Normalized interpolated vertex normal at the fragment.
    pub fn interpolate_normal(&self, bar: Vector3<f32>) -> Vector3<f32> {
        return (self.normals * bar).normalize();
    }

    /// Matrix taking tangent space vectors to view space, its columns are the directions of the
    /// fastest u and v growth and the normal `bn`. Tangents are found from the triangle edges
    /// and their uv deltas instead of being stored per vertex.
    pub fn tangent_basis(&self, bn: Vector3<f32>) -> Result<Matrix3<f32>, ShadeError> {
        let edge_1 = self.view_tri.column(1) - self.view_tri.column(0);
        let edge_2 = self.view_tri.column(2) - self.view_tri.column(0);
        let mut a = Matrix3::<f32>::zeros();
        a.set_row(0, &edge_1.transpose());
        a.set_row(1, &edge_2.transpose());
        a.set_row(2, &bn.transpose());
        if a.determinant().abs() < DEGENERACY_EPSILON || !bn.iter().all(|x| x.is_finite()) {
            return Err(ShadeError::DegenerateTriangle);
        }
        let ai = a.try_inverse().ok_or(ShadeError::DegenerateTriangle)?;

        let i = ai * vector![self.uvs.m12 - self.uvs.m11, self.uvs.m13 - self.uvs.m11, 0.0];
        let j = ai * vector![self.uvs.m22 - self.uvs.m21, self.uvs.m23 - self.uvs.m21, 0.0];
        if i.norm_squared() < DEGENERACY_EPSILON || j.norm_squared() < DEGENERACY_EPSILON {
            return Err(ShadeError::DegenerateUv);
        }

        return Ok(Matrix3::from_columns(&[i.normalize(), j.normalize(), bn]));
    }
}

/// Lambertian coefficient.
pub fn diffuse_coef(n: Vector3<f32>, l: Vector3<f32>) -> f32 {
    return n.dot(&l).max(0.0);
}

/// Specular coefficient. The camera lies on the z axis of the view frame, so -r.z measures
/// how well reflected light lines up with the viewer.
pub fn specular_coef(n: Vector3<f32>, l: Vector3<f32>, exponent: f32) -> f32 {
    let r = (2.0 * n.dot(&l) * n - l).normalize();
    return (-r.z).max(0.0).powf(exponent);
}

/// Ambient plus modulated diffuse and specular light, clamped to the color range.
pub fn shade_color(color: Vector3<u8>, intensity: f32) -> Vector3<u8> {
    return color.map(|c| (AMBIENT + c as f32 * intensity).clamp(0.0, 255.0) as u8);
}

/// Per pixel lighting with normals read from a tangent space normal map, plus specular
/// highlights with the exponent read from the specular map.
pub struct NormalMapShader<'a> {
    pub model: &'a Model,
    pub context: &'a DrawContext,
}

impl<'a> NormalMapShader<'a> {
    pub fn new(model: &'a Model, context: &'a DrawContext) -> Self {
        return Self { model, context };
    }
}

impl<'a> Shader for NormalMapShader<'a> {
    type Varyings = Varyings;

    fn vertex(&self, varyings: &mut Varyings, face: usize, slot: usize) -> Vector4<f32> {
        debug_assert!(slot < 3, "vertex slot {} out of range", slot);
        varyings.uvs.set_column(slot, &self.model.uv(face, slot));
        varyings.normals.set_column(
            slot,
            &project_xyz(self.context.it_view_matrix * embed_vector(self.model.normal(face, slot))),
        );
        let view_position = self.context.view_matrix * embed_point(self.model.position(face, slot));
        varyings.view_tri.set_column(slot, &project_xyz(view_position));
        varyings.mark(slot);
        return self.context.projection_matrix * view_position;
    }

    fn fragment(&self, varyings: &Varyings, bar: Vector3<f32>) -> Result<Fragment, ShadeError> {
        debug_assert!(varyings.is_complete(), "fragment shaded before all vertices were processed");
        debug_assert!((bar.sum() - 1.0).abs() < 1e-3, "barycentric coordinates {:?} don't sum to 1", bar);

        let bn = varyings.interpolate_normal(bar);
        let uv = varyings.interpolate_uv(bar);
        let basis = varyings.tangent_basis(bn)?;
        let n = (basis * self.model.normal_at(uv)).normalize();

        let l = self.context.light_direction;
        let diff = diffuse_coef(n, l);
        let spec = specular_coef(n, l, SPECULAR_BASE + self.model.specular_at(uv));
        let color = shade_color(self.model.diffuse_at(uv), diff + spec);

        return Ok(Fragment { color, discard: false });
    }
}
