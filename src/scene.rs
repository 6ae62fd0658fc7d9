pub mod camera;
pub mod model;
pub mod shader;
pub mod util;

use image::{GrayImage, Luma, Rgb, RgbImage};

use nalgebra as na;
use na::{vector, Matrix4, Vector2, Vector3, Vector4};

use shader::Shader;
use util::from_homogeneous_point;

/// Color and depth of a rendered frame.
/// (0, 0) is the bottom left pixel, smaller depth is closer to the camera.
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    color: Vec<u8>, // rgb8 flat array.
    depth: Vec<f32>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let n_pixels = width as usize * height as usize;
        return Self {
            width,
            height,
            color: vec![0; 3 * n_pixels],
            depth: vec![f32::MAX; n_pixels],
        };
    }

    fn index(&self, x: u32, y: u32) -> usize {
        return (x + y * self.width) as usize;
    }

    pub fn depth(&self, x: u32, y: u32) -> f32 {
        return self.depth[self.index(x, y)];
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Vector3<u8> {
        let index = 3 * self.index(x, y);
        return vector![self.color[index], self.color[index + 1], self.color[index + 2]];
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Vector3<u8>) {
        let index = 3 * self.index(x, y);
        self.color[index..index + 3].copy_from_slice(color.as_slice());
    }

    /// Writes the fragment unless something closer is stored, equal depth goes to the later
    /// write. Returns true on write.
    pub fn test_and_set(&mut self, x: u32, y: u32, z: f32, color: Vector3<u8>) -> bool {
        let index = self.index(x, y);
        if z > self.depth[index] {
            return false;
        }
        self.depth[index] = z;
        self.set_pixel(x, y, color);
        return true;
    }

    /// Depth composition of another frame of the same size on top of this one.
    pub fn merge(&mut self, other: &FrameBuffer) {
        assert_eq!((self.width, self.height), (other.width, other.height), "frame sizes differ");
        for y in 0..self.height {
            for x in 0..self.width {
                let z = other.depth(x, y);
                if z < f32::MAX {
                    self.test_and_set(x, y, z, other.get_pixel(x, y));
                }
            }
        }
    }

    /// Color data as an image with the first row on top.
    pub fn to_image(&self) -> RgbImage {
        return RgbImage::from_fn(self.width, self.height, |x, y| {
            let c = self.get_pixel(x, self.height - 1 - y);
            Rgb([c.x, c.y, c.z])
        });
    }

    /// Image of depth values normalized to [0, 255], closer is brighter, empty pixels are black.
    pub fn as_depth_image(&self) -> GrayImage {
        let written = self.depth.iter().filter(|z| **z < f32::MAX);
        let z_min = written.clone().fold(f32::MAX, |acc, z| acc.min(*z));
        let z_max = written.fold(f32::MIN, |acc, z| acc.max(*z));
        let scale = (z_max - z_min).max(f32::EPSILON);
        return GrayImage::from_fn(self.width, self.height, |x, y| {
            let z = self.depth(x, self.height - 1 - y);
            if z == f32::MAX {
                return Luma([0]);
            }
            Luma([(255.0 * (1.0 - (z - z_min) / scale)).round() as u8])
        });
    }
}

/// Counters for a single draw.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RenderStats {
    pub triangles: usize,
    pub pixels: usize,           // Fragments that passed depth test and got written.
    pub failed_fragments: usize, // Fragments the shader could not shade.
    pub skipped_triangles: usize, // Zero area on screen or behind the camera.
}

impl RenderStats {
    pub fn add(&mut self, other: RenderStats) {
        self.triangles += other.triangles;
        self.pixels += other.pixels;
        self.failed_fragments += other.failed_fragments;
        self.skipped_triangles += other.skipped_triangles;
    }
}

/// Barycentric coordinates of `p` relative to triangle (a, b, c) in screen space.
/// Degenerate triangle gives something with negative coordinate.
fn to_barycentric_coord(a: Vector2<f32>, b: Vector2<f32>, c: Vector2<f32>, p: Vector2<f32>) -> Vector3<f32> {
    let raw_cross = vector![b.x - a.x, c.x - a.x, a.x - p.x].cross(&vector![b.y - a.y, c.y - a.y, a.y - p.y]);
    if raw_cross.z.abs() < 1e-6 {
        return vector![-1.0, 1.0, 1.0];
    }
    return vector![
        1.0 - (raw_cross.x + raw_cross.y) / raw_cross.z,
        raw_cross.x / raw_cross.z,
        raw_cross.y / raw_cross.z
    ];
}

/// Rasterizes one triangle given its clip space vertices. Varyings must already be filled by
/// the vertex shader for this triangle.
///
/// Points in front of the camera have negative clip w. A triangle with any other w lies behind
/// the eye or crosses its plane and is skipped as a whole.
pub fn triangle<S: Shader>(
    clip: [Vector4<f32>; 3],
    shader: &S,
    varyings: &S::Varyings,
    viewport: &Matrix4<f32>,
    frame: &mut FrameBuffer,
) -> RenderStats {
    let mut stats = RenderStats { triangles: 1, ..Default::default() };

    if !clip.iter().all(|v| v.w < 0.0 && v.w.is_finite()) {
        stats.skipped_triangles = 1;
        return stats;
    }

    // Screen coordinates before and after the perspective division.
    let screen = clip.map(|v| viewport * v);
    let points = screen.map(|v| from_homogeneous_point(v).xy().coords);
    let area = (points[1] - points[0]).perp(&(points[2] - points[0]));
    if area.abs() < 1e-6 {
        stats.skipped_triangles = 1;
        return stats;
    }

    // Bounding box clamped to the frame.
    let min_x = points.iter().fold(f32::MAX, |acc, p| acc.min(p.x)).max(0.0);
    let min_y = points.iter().fold(f32::MAX, |acc, p| acc.min(p.y)).max(0.0);
    let max_x = points.iter().fold(f32::MIN, |acc, p| acc.max(p.x)).min((frame.width - 1) as f32);
    let max_y = points.iter().fold(f32::MIN, |acc, p| acc.max(p.y)).min((frame.height - 1) as f32);
    if min_x > max_x || min_y > max_y {
        return stats;
    }

    for x in min_x as u32..=max_x as u32 {
        for y in min_y as u32..=max_y as u32 {
            let bc_screen = to_barycentric_coord(points[0], points[1], points[2], vector![x as f32, y as f32]);
            if bc_screen.x < 0.0 || bc_screen.y < 0.0 || bc_screen.z < 0.0 {
                continue;
            }
            // Screen space weights don't interpolate linearly in view space, correcting by w.
            let bc_clip = vector![bc_screen.x / screen[0].w, bc_screen.y / screen[1].w, bc_screen.z / screen[2].w];
            let bc_clip = bc_clip / bc_clip.sum();
            let z = vector![clip[0].z, clip[1].z, clip[2].z].dot(&bc_clip);
            if z > frame.depth(x, y) {
                continue;
            }
            match shader.fragment(varyings, bc_clip) {
                Ok(fragment) if fragment.discard => (),
                Ok(fragment) => {
                    if frame.test_and_set(x, y, z, fragment.color) {
                        stats.pixels += 1;
                    }
                }
                Err(error) => {
                    log::trace!("fragment ({}, {}) not shaded: {}", x, y, error);
                    stats.failed_fragments += 1;
                }
            }
        }
    }
    return stats;
}

/// Draws `n_faces` triangles of a model, calling the vertex shader three times per face.
/// Every face starts with fresh varyings.
pub fn draw_model<S: Shader>(shader: &S, n_faces: usize, viewport: &Matrix4<f32>, frame: &mut FrameBuffer) -> RenderStats {
    let mut stats = RenderStats::default();
    for face in 0..n_faces {
        let mut varyings = S::Varyings::default();
        let mut clip = [Vector4::<f32>::zeros(); 3];
        for slot in 0..3 {
            clip[slot] = shader.vertex(&mut varyings, face, slot);
        }
        stats.add(triangle(clip, shader, &varyings, viewport, frame));
    }
    return stats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera::Camera;
    use na::Point3;
    use shader::{Fragment, ShadeError};
    use util::embed_point;

    /// Shader with positions given directly in clip space and a constant color.
    struct FlatShader {
        triangles: Vec<[Vector4<f32>; 3]>,
        color: Vector3<u8>,
        discard: bool,
        fail: bool,
    }

    impl Shader for FlatShader {
        type Varyings = Vec<Vector3<f32>>;

        fn vertex(&self, varyings: &mut Self::Varyings, face: usize, slot: usize) -> Vector4<f32> {
            let v = self.triangles[face][slot];
            varyings.push(vector![v.x, v.y, v.z]);
            return v;
        }

        fn fragment(&self, varyings: &Self::Varyings, bar: Vector3<f32>) -> Result<Fragment, ShadeError> {
            assert_eq!(varyings.len(), 3);
            assert!((bar.sum() - 1.0).abs() < 1e-4);
            assert!(bar.iter().all(|b| (-1e-4..=1.0 + 1e-4).contains(b)), "{:?}", bar);
            if self.fail {
                return Err(ShadeError::DegenerateUv);
            }
            return Ok(Fragment { color: self.color, discard: self.discard });
        }
    }

    fn flat(triangles: Vec<[Vector4<f32>; 3]>, color: Vector3<u8>) -> FlatShader {
        return FlatShader { triangles, color, discard: false, fail: false };
    }

    /// Clip position of a point in front of the camera, (x, y) are its normalized device coordinates.
    fn in_front(x: f32, y: f32, z: f32, w: f32) -> Vector4<f32> {
        assert!(w < 0.0);
        return vector![x * w, y * w, z, w];
    }

    fn covering_triangle(z: f32) -> [Vector4<f32>; 3] {
        return [in_front(-1.0, -1.0, z, -1.0), in_front(3.0, -1.0, z, -1.0), in_front(-1.0, 3.0, z, -1.0)];
    }

    fn viewport_10() -> Matrix4<f32> {
        return camera::viewport(0.0, 0.0, 9.0, 9.0);
    }

    #[test]
    fn covering_triangle_fills_the_frame() {
        let mut frame = FrameBuffer::new(10, 10);
        let shader = flat(vec![covering_triangle(0.5)], vector![1, 2, 3]);
        let stats = draw_model(&shader, 1, &viewport_10(), &mut frame);
        assert_eq!(stats.pixels, 100);
        assert_eq!(frame.get_pixel(9, 0), vector![1, 2, 3]);
        assert!((frame.depth(4, 4) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn closer_triangle_wins_regardless_of_order() {
        let shader = flat(vec![covering_triangle(0.2), covering_triangle(0.7)], vector![0, 0, 0]);
        let mut frame = FrameBuffer::new(10, 10);
        let stats = draw_model(&shader, 2, &viewport_10(), &mut frame);
        assert_eq!(stats.pixels, 100);
        assert!((frame.depth(3, 3) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn half_triangle_covers_lower_left() {
        let shader = flat(
            vec![[in_front(-1.0, -1.0, 0.0, -1.0), in_front(1.0, -1.0, 0.0, -1.0), in_front(-1.0, 1.0, 0.0, -1.0)]],
            vector![255, 0, 0],
        );
        let mut frame = FrameBuffer::new(10, 10);
        draw_model(&shader, 1, &viewport_10(), &mut frame);
        assert_eq!(frame.get_pixel(0, 0), vector![255, 0, 0]);
        assert_eq!(frame.get_pixel(9, 9), vector![0, 0, 0]);
        assert_eq!(frame.depth(9, 9), f32::MAX);
    }

    #[test]
    fn discarded_and_failed_fragments_leave_frame_untouched() {
        let mut shader = flat(vec![covering_triangle(0.5)], vector![9, 9, 9]);
        shader.discard = true;
        let mut frame = FrameBuffer::new(10, 10);
        let stats = draw_model(&shader, 1, &viewport_10(), &mut frame);
        assert_eq!(stats.pixels, 0);
        assert_eq!(frame.depth(5, 5), f32::MAX);

        shader.discard = false;
        shader.fail = true;
        let stats = draw_model(&shader, 1, &viewport_10(), &mut frame);
        assert_eq!(stats.failed_fragments, 100);
        assert_eq!(frame.get_pixel(5, 5), vector![0, 0, 0]);
    }

    #[test]
    fn zero_area_triangle_is_skipped() {
        let v = in_front(0.0, 0.0, 0.0, -1.0);
        let shader = flat(vec![[v, v, v]], vector![1, 1, 1]);
        let mut frame = FrameBuffer::new(10, 10);
        let stats = draw_model(&shader, 1, &viewport_10(), &mut frame);
        assert_eq!(stats.pixels, 0);
        assert_eq!(stats.skipped_triangles, 1);
    }

    #[test]
    fn perspective_correct_weights_sum_to_one() {
        let shader = flat(
            vec![[in_front(-1.0, -1.0, 1.0, -2.0), in_front(1.0, -1.0, 0.5, -1.0), in_front(-1.0, 1.0, 1.5, -3.0)]],
            vector![5, 5, 5],
        );
        let mut frame = FrameBuffer::new(10, 10);
        let stats = draw_model(&shader, 1, &viewport_10(), &mut frame);
        assert!(stats.pixels > 0);
    }

    #[test]
    fn triangle_behind_camera_is_skipped() {
        let behind = covering_triangle(0.5).map(|v| -v);
        let shader = flat(vec![behind], vector![1, 1, 1]);
        let mut frame = FrameBuffer::new(10, 10);
        let stats = draw_model(&shader, 1, &viewport_10(), &mut frame);
        assert_eq!(stats.skipped_triangles, 1);
        assert_eq!(stats.pixels, 0);
        assert_eq!(frame.depth(5, 5), f32::MAX);
    }

    #[test]
    fn triangle_crossing_eye_plane_is_skipped() {
        let mut crossing = covering_triangle(0.5);
        crossing[1] = vector![1.0, 1.0, -0.5, 1.0];
        let shader = flat(vec![crossing], vector![1, 1, 1]);
        let mut frame = FrameBuffer::new(10, 10);
        let stats = draw_model(&shader, 1, &viewport_10(), &mut frame);
        assert_eq!(stats.skipped_triangles, 1);
        assert_eq!(stats.failed_fragments, 0);
        assert_eq!(stats.pixels, 0);
    }

    #[test]
    fn only_geometry_in_front_of_the_eye_is_drawn() {
        let camera = Camera::new(vector![0.0, 0.0, 3.0], vector![0.0, 0.0, 0.0], vector![0.0, 1.0, 0.0]);
        let transform = camera.projection_matrix() * camera.view_matrix();
        let to_clip = |z: [f32; 3]| {
            let corners = [(-1.0, -1.0), (1.0, -1.0), (0.0, 1.0)];
            let mut clip = [Vector4::zeros(); 3];
            for k in 0..3 {
                clip[k] = transform * embed_point(Point3::new(corners[k].0, corners[k].1, z[k]));
            }
            clip
        };
        let shader = flat(
            vec![to_clip([0.0, 0.0, 0.0]), to_clip([5.0, 5.0, 5.0]), to_clip([0.0, 5.0, 0.0])],
            vector![7, 7, 7],
        );
        let mut frame = FrameBuffer::new(100, 100);
        let stats = draw_model(&shader, 3, &camera::viewport(0.0, 0.0, 99.0, 99.0), &mut frame);
        assert_eq!(stats.triangles, 3);
        assert_eq!(stats.skipped_triangles, 2);
        assert!(stats.pixels > 0);
        // Triangle at z = 0 lies at view depth 3.
        assert!((frame.depth(50, 40) - 3.0).abs() < 1e-4);
    }

    #[test]
    fn equal_depth_goes_to_later_write() {
        let mut frame = FrameBuffer::new(1, 1);
        assert!(frame.test_and_set(0, 0, 0.5, vector![1, 1, 1]));
        assert!(frame.test_and_set(0, 0, 0.5, vector![2, 2, 2]));
        assert!(!frame.test_and_set(0, 0, 0.6, vector![3, 3, 3]));
        assert_eq!(frame.get_pixel(0, 0), vector![2, 2, 2]);

        let mut later = FrameBuffer::new(1, 1);
        later.test_and_set(0, 0, 0.5, vector![4, 4, 4]);
        frame.merge(&later);
        assert_eq!(frame.get_pixel(0, 0), vector![4, 4, 4]);
    }

    #[test]
    fn merge_keeps_closer_pixels() {
        let mut near = FrameBuffer::new(2, 1);
        near.test_and_set(0, 0, 0.1, vector![1, 1, 1]);
        let mut far = FrameBuffer::new(2, 1);
        far.test_and_set(0, 0, 0.9, vector![2, 2, 2]);
        far.test_and_set(1, 0, 0.9, vector![3, 3, 3]);

        near.merge(&far);
        assert_eq!(near.get_pixel(0, 0), vector![1, 1, 1]);
        assert_eq!(near.get_pixel(1, 0), vector![3, 3, 3]);
    }

    #[test]
    fn images_put_bottom_row_last() {
        let mut frame = FrameBuffer::new(1, 2);
        frame.test_and_set(0, 0, 1.0, vector![10, 20, 30]);
        frame.test_and_set(0, 1, 3.0, vector![40, 50, 60]);
        let image = frame.to_image();
        assert_eq!(image.get_pixel(0, 1), &Rgb([10, 20, 30]));
        assert_eq!(image.get_pixel(0, 0), &Rgb([40, 50, 60]));

        let depth = frame.as_depth_image();
        assert_eq!(depth.get_pixel(0, 1), &Luma([255]));
        assert_eq!(depth.get_pixel(0, 0), &Luma([0]));
    }
}
