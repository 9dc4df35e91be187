//! Model and texture asset types
//!
//! Models decode from Wavefront OBJ text; richer import formats come from an
//! external importer and land in the asset source as OBJ. Textures decode
//! through the `image` crate.

use glam::{Vec2, Vec3, Vec4};

use crate::assets::{AssetData, AssetError, AssetPath};
use crate::rhi::Vertex;
use crate::scene::Aabb;

/// CPU-side model data plus object-space bounds.
pub struct ModelAsset {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub bounds: Aabb,
}

impl AssetData for ModelAsset {
    fn decode(path: &AssetPath, bytes: &[u8]) -> Result<Self, AssetError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| AssetError::Decode(format!("{path}: not valid UTF-8")))?;
        decode_obj(path, text)
    }
}

fn decode_obj(path: &AssetPath, text: &str) -> Result<ModelAsset, AssetError> {
    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    let mut uvs: Vec<Vec2> = Vec::new();
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();

    let parse_f32 = |token: &str, line: usize| {
        token
            .parse::<f32>()
            .map_err(|_| AssetError::Decode(format!("{path}: bad number on line {line}")))
    };

    for (line_idx, line) in text.lines().enumerate() {
        let line_no = line_idx + 1;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let mut read = || -> Result<f32, AssetError> {
                    parse_f32(tokens.next().unwrap_or_default(), line_no)
                };
                positions.push(Vec3::new(read()?, read()?, read()?));
            }
            Some("vn") => {
                let mut read = || -> Result<f32, AssetError> {
                    parse_f32(tokens.next().unwrap_or_default(), line_no)
                };
                normals.push(Vec3::new(read()?, read()?, read()?));
            }
            Some("vt") => {
                let mut read = || -> Result<f32, AssetError> {
                    parse_f32(tokens.next().unwrap_or_default(), line_no)
                };
                uvs.push(Vec2::new(read()?, read()?));
            }
            Some("f") => {
                let corners: Vec<&str> = tokens.collect();
                if corners.len() < 3 {
                    return Err(AssetError::Decode(format!(
                        "{path}: face with fewer than 3 corners on line {line_no}"
                    )));
                }
                let base = vertices.len() as u32;
                for corner in &corners {
                    vertices.push(parse_corner(path, corner, &positions, &normals, &uvs, line_no)?);
                }
                // Triangle fan over the polygon.
                for i in 1..corners.len() as u32 - 1 {
                    indices.extend([base, base + i, base + i + 1]);
                }
            }
            _ => {}
        }
    }

    if vertices.is_empty() {
        return Err(AssetError::Decode(format!("{path}: no geometry")));
    }
    let bounds = Aabb::from_points(vertices.iter().map(|v| v.position))
        .ok_or_else(|| AssetError::Decode(format!("{path}: no geometry")))?;

    Ok(ModelAsset {
        vertices,
        indices,
        bounds,
    })
}

fn parse_corner(
    path: &AssetPath,
    corner: &str,
    positions: &[Vec3],
    normals: &[Vec3],
    uvs: &[Vec2],
    line: usize,
) -> Result<Vertex, AssetError> {
    let bad = || AssetError::Decode(format!("{path}: bad face corner '{corner}' on line {line}"));
    let mut parts = corner.split('/');

    // OBJ indices are one-based; negative indices count from the end.
    let resolve = |token: Option<&str>, len: usize| -> Result<Option<usize>, AssetError> {
        match token {
            None | Some("") => Ok(None),
            Some(t) => {
                let idx: i64 = t.parse().map_err(|_| bad())?;
                let resolved = if idx < 0 {
                    len as i64 + idx
                } else {
                    idx - 1
                };
                if resolved < 0 || resolved >= len as i64 {
                    return Err(bad());
                }
                Ok(Some(resolved as usize))
            }
        }
    };

    let position = positions[resolve(parts.next(), positions.len())?.ok_or_else(bad)?];
    let uv = resolve(parts.next(), uvs.len())?.map(|i| uvs[i]).unwrap_or(Vec2::ZERO);
    let normal = resolve(parts.next(), normals.len())?
        .map(|i| normals[i])
        .unwrap_or(Vec3::Y);

    Ok(Vertex {
        position,
        normal,
        uv,
        tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
    })
}

/// Decoded RGBA8 texture data.
pub struct TextureAsset {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl AssetData for TextureAsset {
    fn decode(path: &AssetPath, bytes: &[u8]) -> Result<Self, AssetError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| AssetError::Decode(format!("{path}: {err}")))?
            .to_rgba8();
        Ok(TextureAsset {
            width: decoded.width(),
            height: decoded.height(),
            pixels: decoded.into_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT_QUAD: &str = "\
v -1.0 0.0 -1.0
v 1.0 0.0 -1.0
v 1.0 0.0 1.0
v -1.0 0.0 1.0
vn 0.0 1.0 0.0
f 1//1 2//1 3//1 4//1
";

    fn test_path() -> AssetPath {
        AssetPath::parse("res://models/quad.obj").unwrap()
    }

    #[test]
    fn quad_triangulates_to_two_triangles() {
        let model = ModelAsset::decode(&test_path(), UNIT_QUAD.as_bytes()).unwrap();
        assert_eq!(model.vertices.len(), 4);
        assert_eq!(model.indices.len(), 6);
    }

    #[test]
    fn bounds_cover_positions() {
        let model = ModelAsset::decode(&test_path(), UNIT_QUAD.as_bytes()).unwrap();
        assert_eq!(model.bounds.min, Vec3::new(-1.0, 0.0, -1.0));
        assert_eq!(model.bounds.max, Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn empty_obj_is_a_decode_error() {
        assert!(matches!(
            ModelAsset::decode(&test_path(), b"# nothing"),
            Err(AssetError::Decode(_))
        ));
    }

    #[test]
    fn negative_indices_resolve_from_end() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let model = ModelAsset::decode(&test_path(), text.as_bytes()).unwrap();
        assert_eq!(model.indices, vec![0, 1, 2]);
    }
}
