use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use obj::raw::object::Polygon;
use obj::raw::{parse_obj, RawObj};

use nalgebra as na;
use na::{vector, Point3, Vector2, Vector3};

/// Texture with nearest texel lookup. uv (0, 0) is the bottom left corner of the image.
pub struct Texture {
    image: RgbImage,
}

impl Texture {
    pub fn new(image: RgbImage) -> Self {
        return Self { image };
    }

    /// Texture of a single texel, used in place of a missing map.
    pub fn solid(color: [u8; 3]) -> Self {
        return Self { image: RgbImage::from_pixel(1, 1, Rgb(color)) };
    }

    /// Looks up a texel at uv. Coordinates outside of [0, 1] are clamped to the edge.
    pub fn sample(&self, uv: Vector2<f32>) -> Rgb<u8> {
        let width = self.image.width();
        let height = self.image.height();
        // Image rows go top to bottom, while v grows upwards.
        let x = (uv.x * width as f32).max(0.0) as u32;
        let y = ((1.0 - uv.y) * height as f32).max(0.0) as u32;
        return *self.image.get_pixel(x.min(width - 1), y.min(height - 1));
    }
}

/// Indices into position, uv and normal lists of a single face vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceVertex {
    pub position: usize,
    pub uv: usize,
    pub normal: usize,
}

/// Triangulated mesh along with diffuse, tangent space normal and specular maps.
pub struct Model {
    positions: Vec<Point3<f32>>,
    uvs: Vec<Vector2<f32>>,
    normals: Vec<Vector3<f32>>,
    faces: Vec<[FaceVertex; 3]>,
    diffuse_map: Texture,
    normal_map: Texture,
    specular_map: Texture,
}

impl Model {
    /// Loads obj file and textures lying next to it, named <stem>_diffuse.tga,
    /// <stem>_nm_tangent.tga and <stem>_spec.tga.
    pub fn load(obj_path: &Path) -> Result<Self> {
        let file = File::open(obj_path).with_context(|| format!("failed to open {}", obj_path.display()))?;
        let (positions, uvs, normals, faces) = read_mesh(BufReader::new(file))
            .with_context(|| format!("failed to read mesh {}", obj_path.display()))?;
        log::info!(
            "{}: {} vertices, {} faces",
            obj_path.display(),
            positions.len(),
            faces.len()
        );

        let diffuse_map = load_texture(&texture_path(obj_path, "diffuse"), [255, 255, 255])?;
        let normal_map = load_texture(&texture_path(obj_path, "nm_tangent"), [128, 128, 255])?;
        let specular_map = load_texture(&texture_path(obj_path, "spec"), [0, 0, 0])?;

        return Ok(Self { positions, uvs, normals, faces, diffuse_map, normal_map, specular_map });
    }

    /// Assembles a model from already prepared data.
    #[cfg(test)]
    pub fn from_parts(
        positions: Vec<Point3<f32>>,
        uvs: Vec<Vector2<f32>>,
        normals: Vec<Vector3<f32>>,
        faces: Vec<[FaceVertex; 3]>,
        diffuse_map: Texture,
        normal_map: Texture,
        specular_map: Texture,
    ) -> Self {
        return Self { positions, uvs, normals, faces, diffuse_map, normal_map, specular_map };
    }

    pub fn n_faces(&self) -> usize {
        return self.faces.len();
    }

    pub fn position(&self, face: usize, slot: usize) -> Point3<f32> {
        return self.positions[self.faces[face][slot].position];
    }

    pub fn uv(&self, face: usize, slot: usize) -> Vector2<f32> {
        return self.uvs[self.faces[face][slot].uv];
    }

    pub fn normal(&self, face: usize, slot: usize) -> Vector3<f32> {
        return self.normals[self.faces[face][slot].normal];
    }

    /// Tangent space normal stored in the normal map, decoded from [0, 255] to [-1, 1].
    pub fn normal_at(&self, uv: Vector2<f32>) -> Vector3<f32> {
        let texel = self.normal_map.sample(uv);
        return vector![texel[0] as f32, texel[1] as f32, texel[2] as f32] * 2.0 / 255.0
            - vector![1.0, 1.0, 1.0];
    }

    pub fn diffuse_at(&self, uv: Vector2<f32>) -> Vector3<u8> {
        let texel = self.diffuse_map.sample(uv);
        return vector![texel[0], texel[1], texel[2]];
    }

    /// First channel of the specular map.
    pub fn specular_at(&self, uv: Vector2<f32>) -> f32 {
        return self.specular_map.sample(uv)[0] as f32;
    }
}

fn texture_path(obj_path: &Path, suffix: &str) -> PathBuf {
    let stem = obj_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    return obj_path.with_file_name(format!("{}_{}.tga", stem, suffix));
}

/// Missing texture is not an error, model is still drawable with a neutral one.
fn load_texture(path: &Path, fallback: [u8; 3]) -> Result<Texture> {
    if !path.exists() {
        log::warn!("texture {} not found, using {:?}", path.display(), fallback);
        return Ok(Texture::solid(fallback));
    }
    let image = image::open(path)
        .with_context(|| format!("failed to load texture {}", path.display()))?
        .into_rgb8();
    log::debug!("loaded {} ({}x{})", path.display(), image.width(), image.height());
    return Ok(Texture::new(image));
}

type Mesh = (Vec<Point3<f32>>, Vec<Vector2<f32>>, Vec<Vector3<f32>>, Vec<[FaceVertex; 3]>);

/// Parses obj data and fan-triangulates its polygons. Every face vertex needs position,
/// uv and normal indices.
fn read_mesh(input: impl BufRead) -> Result<Mesh> {
    let raw: RawObj = parse_obj(input)?;

    let positions: Vec<Point3<f32>> = raw.positions.iter().map(|p| Point3::new(p.0, p.1, p.2)).collect();
    let uvs: Vec<Vector2<f32>> = raw.tex_coords.iter().map(|t| vector![t.0, t.1]).collect();
    let normals: Vec<Vector3<f32>> = raw.normals.iter().map(|n| vector![n.0, n.1, n.2]).collect();

    let mut faces = Vec::<[FaceVertex; 3]>::with_capacity(raw.polygons.len());
    for (i, polygon) in raw.polygons.iter().enumerate() {
        let vertices: Vec<FaceVertex> = match polygon {
            Polygon::PTN(indices) => indices
                .iter()
                .map(|&(position, uv, normal)| FaceVertex { position, uv, normal })
                .collect(),
            _ => bail!("face {} has no uv or normal indices", i),
        };
        if vertices.len() < 3 {
            bail!("face {} has {} vertices", i, vertices.len());
        }
        let in_range = |v: &FaceVertex| v.position < positions.len() && v.uv < uvs.len() && v.normal < normals.len();
        if !vertices.iter().all(in_range) {
            bail!("face {} refers to a missing vertex attribute", i);
        }
        for k in 1..vertices.len() - 1 {
            faces.push([vertices[0], vertices[k], vertices[k + 1]]);
        }
    }

    return Ok((positions, uvs, normals, faces));
}
