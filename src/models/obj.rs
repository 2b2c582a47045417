//! Wavefront OBJ import and export.
//!
//! Reading goes through `tobj` with triangulation and a single index buffer,
//! so every distinct (position, texture, normal) corner becomes one vertex.
//! All objects in the file are merged into one mesh. Materials are ignored.

use std::fmt::Write;

use thiserror::Error;
use tracing::debug;

use crate::models::mef::{MeshSource, Model};

#[derive(Debug, Error)]
pub enum ObjError {
    #[error("invalid OBJ: {0}")]
    Load(#[from] tobj::LoadError),
    #[error("no faces found")]
    NoGeometry,
    #[error("{count} vertices cannot be indexed with 32 bits")]
    TooManyVertices { count: usize },
}

/// Parse OBJ text into a single mesh source.
///
/// Normals and texture coordinates are kept when any object has them; objects
/// without them get zeroes.
pub fn parse_obj(text: &str) -> Result<MeshSource, ObjError> {
    let (models, _materials) = tobj::load_obj_buf(
        &mut text.as_bytes(),
        &tobj::GPU_LOAD_OPTIONS,
        |_| Err(tobj::LoadError::OpenFileFailed),
    )?;

    let uses_normals = models.iter().any(|m| !m.mesh.normals.is_empty());
    let uses_uvs = models.iter().any(|m| !m.mesh.texcoords.is_empty());

    let mut vertices: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<[f32; 3]> = Vec::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();
    let mut faces: Vec<[u32; 3]> = Vec::new();

    for model in &models {
        let mesh = &model.mesh;
        let base = u32::try_from(vertices.len()).map_err(|_| ObjError::TooManyVertices {
            count: vertices.len(),
        })?;
        let count = mesh.positions.len() / 3;

        vertices.extend(mesh.positions.chunks_exact(3).map(|p| [p[0], p[1], p[2]]));
        if uses_normals {
            let mut own = mesh.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]);
            normals.extend((0..count).map(|_| own.next().unwrap_or_default()));
        }
        if uses_uvs {
            let mut own = mesh.texcoords.chunks_exact(2).map(|t| [t[0], t[1]]);
            uvs.extend((0..count).map(|_| own.next().unwrap_or_default()));
        }
        faces.extend(
            mesh.indices
                .chunks_exact(3)
                .map(|t| [base + t[0], base + t[1], base + t[2]]),
        );

        debug!(
            object = %model.name,
            vertices = count,
            triangles = mesh.indices.len() / 3,
            "OBJ object"
        );
    }

    if vertices.is_empty() || faces.is_empty() {
        return Err(ObjError::NoGeometry);
    }
    if u32::try_from(vertices.len()).is_err() {
        return Err(ObjError::TooManyVertices {
            count: vertices.len(),
        });
    }

    debug!(
        vertices = vertices.len(),
        faces = faces.len(),
        normals = uses_normals,
        uvs = uses_uvs,
        "parsed OBJ"
    );
    Ok(MeshSource {
        vertices,
        normals: uses_normals.then_some(normals),
        uvs: uses_uvs.then_some(uvs),
        faces,
    })
}

/// Render every mesh of `model` as an OBJ object.
pub fn write_obj(model: &Model) -> String {
    let mut out = String::new();
    let mut base = 1usize;

    // Writing to a String cannot fail.
    for mesh in &model.meshes {
        let _ = writeln!(out, "o {}", mesh.name);
        for p in mesh.vertices.chunks_exact(3) {
            let _ = writeln!(out, "v {} {} {}", p[0], p[1], p[2]);
        }
        if let Some(uvs) = &mesh.uvs {
            for t in uvs.chunks_exact(2) {
                let _ = writeln!(out, "vt {} {}", t[0], t[1]);
            }
        }
        if let Some(normals) = &mesh.normals {
            for n in normals.chunks_exact(3) {
                let _ = writeln!(out, "vn {} {} {}", n[0], n[1], n[2]);
            }
        }

        let corner = |i: u32| {
            let i = base + i as usize;
            match (mesh.uvs.is_some(), mesh.normals.is_some()) {
                (false, false) => format!("{i}"),
                (true, false) => format!("{i}/{i}"),
                (false, true) => format!("{i}//{i}"),
                (true, true) => format!("{i}/{i}/{i}"),
            }
        };
        for [a, b, c] in mesh.triangles() {
            let _ = writeln!(out, "f {} {} {}", corner(a), corner(b), corner(c));
        }

        base += mesh.vertex_count;
    }

    out
}
