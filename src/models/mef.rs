//! MEF model files: an ILFF container whose chunks carry mesh geometry.
//!
//! Geometry is split into render, collision and shadow categories, each with a
//! vertex chunk followed by a face chunk. Two further chunks carry the model
//! type and declared totals. [`parse`] turns a buffer into a [`Model`];
//! [`encode_minimal`] writes a single render mesh back out.

use std::fmt;

use bon::Builder;
use rootcause::Report;
use thiserror::Error;
use tracing::debug;

use crate::data::ilff::{self, Chunk, ContainerError, HeaderLayout, OutChunk};
use crate::data::parser_utils::{ByteWriter, Tag};
use crate::diagnostics::{DiagnosticCode, DiagnosticLog};
use crate::models::mesh::{self, Mesh, MeshAssembler, MeshCategory, ModelInfo, StrideHint};
use crate::models::obj::{self, ObjError};
use crate::models::vertex_format::VertexFormat;
use crate::recognized::Recognized;

pub const RENDER_VERTICES: Tag = Tag(*b"XTVM");
pub const RENDER_FACES: Tag = Tag(*b"DNER");
pub const COLLISION_VERTICES: Tag = Tag(*b"XTVC");
pub const COLLISION_FACES: Tag = Tag(*b"ECFC");
pub const SHADOW_VERTICES: Tag = Tag(*b"XTVS");
pub const SHADOW_FACES: Tag = Tag(*b"ECFS");
/// Model type code (`i32` at payload offset 0).
pub const MODEL_INFO: Tag = Tag(*b"HSEM");
/// Declared vertex and face totals (`u32`, `u32`).
pub const MODEL_SUMMARY: Tag = Tag(*b"OFNI");

/// Every chunk tag this module interprets.
pub const CHUNK_TAGS: [Tag; 8] = [
    RENDER_VERTICES,
    RENDER_FACES,
    COLLISION_VERTICES,
    COLLISION_FACES,
    SHADOW_VERTICES,
    SHADOW_FACES,
    MODEL_INFO,
    MODEL_SUMMARY,
];

/// Bytes per triangle written by [`encode_minimal`].
const FACE_RECORD_SIZE: usize = 6;

#[derive(Debug, Error)]
pub enum MefError {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error("no valid meshes in {chunks} chunks ({} diagnostics)", .diagnostics.len())]
    NoValidMeshes {
        chunks: usize,
        diagnostics: DiagnosticLog,
    },
    #[error("cannot encode a mesh with {vertices} vertices and {faces} faces")]
    EmptyMesh { vertices: usize, faces: usize },
    #[error("{attribute} count {found} does not match vertex count {expected}")]
    AttributeMismatch {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{vertices} vertices cannot be addressed with 16-bit indices")]
    IndexOverflow { vertices: usize },
    #[error("face {face} references vertex {index} but only {vertices} exist")]
    FaceOutOfRange {
        face: usize,
        index: u32,
        vertices: usize,
    },
    #[error("invalid OBJ input: {0}")]
    Obj(#[from] ObjError),
}

/// What a recognized chunk tag carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ChunkKind {
    Vertices(MeshCategory),
    Faces(MeshCategory),
    ModelInfo,
    ModelSummary,
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKind::Vertices(category) => write!(f, "{category} vertices"),
            ChunkKind::Faces(category) => write!(f, "{category} faces"),
            ChunkKind::ModelInfo => f.write_str("model info"),
            ChunkKind::ModelSummary => f.write_str("model summary"),
        }
    }
}

/// Map a chunk tag to its meaning by exact byte comparison.
pub fn classify(tag: Tag) -> Recognized<ChunkKind, Tag> {
    let kind = match tag {
        RENDER_VERTICES => ChunkKind::Vertices(MeshCategory::Render),
        RENDER_FACES => ChunkKind::Faces(MeshCategory::Render),
        COLLISION_VERTICES => ChunkKind::Vertices(MeshCategory::Collision),
        COLLISION_FACES => ChunkKind::Faces(MeshCategory::Collision),
        SHADOW_VERTICES => ChunkKind::Vertices(MeshCategory::Shadow),
        SHADOW_FACES => ChunkKind::Faces(MeshCategory::Shadow),
        MODEL_INFO => ChunkKind::ModelInfo,
        MODEL_SUMMARY => ChunkKind::ModelSummary,
        other => return Recognized::Unknown(other),
    };
    Recognized::Known(kind)
}

impl Chunk {
    pub fn kind(&self) -> Recognized<ChunkKind, Tag> {
        classify(self.tag)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub stride_hint: StrideHint,
}

/// A fully parsed MEF file.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Model {
    /// Meshes in the order their face chunks were encountered.
    pub meshes: Vec<Mesh>,
    pub total_vertices: usize,
    pub total_triangles: usize,
    /// Size claimed by the container header.
    pub file_size: i32,
    pub layout: HeaderLayout,
    pub chunks: Vec<Chunk>,
    pub model_info: ModelInfo,
    /// Everything that was skipped or repaired while parsing.
    pub diagnostics: DiagnosticLog,
}

impl Model {
    pub fn meshes_in(&self, category: MeshCategory) -> impl Iterator<Item = &Mesh> {
        self.meshes.iter().filter(move |m| m.category == category)
    }
}

/// Parse a MEF buffer with default options.
pub fn parse(data: &[u8]) -> Result<Model, Report<MefError>> {
    parse_with_options(data, &ParseOptions::default())
}

pub fn parse_with_options(data: &[u8], options: &ParseOptions) -> Result<Model, Report<MefError>> {
    let mut log = DiagnosticLog::new();
    let container = ilff::decode_container(data, &CHUNK_TAGS, &mut log).map_err(MefError::from)?;

    let model_info = mesh::read_model_info(data, &container.chunks, &mut log);
    let meshes = MeshAssembler::new(data, options.stride_hint)
        .assemble(&container.chunks, &mut log);

    if meshes.is_empty() {
        return Err(Report::new(MefError::NoValidMeshes {
            chunks: container.chunks.len(),
            diagnostics: log,
        }));
    }

    let total_vertices = meshes.iter().map(|m| m.vertex_count).sum();
    let total_triangles = meshes.iter().map(|m| m.triangle_count).sum();

    if let Some(declared) = model_info.declared_vertices
        && declared as usize != total_vertices
    {
        log.warn(
            DiagnosticCode::DeclaredCountMismatch,
            format!("header declares {declared} vertices, assembled {total_vertices}"),
        );
    }
    if let Some(declared) = model_info.declared_faces
        && declared as usize != total_triangles
    {
        log.warn(
            DiagnosticCode::DeclaredCountMismatch,
            format!("header declares {declared} faces, assembled {total_triangles}"),
        );
    }

    debug!(
        meshes = meshes.len(),
        total_vertices,
        total_triangles,
        diagnostics = log.len(),
        "parsed MEF model"
    );

    Ok(Model {
        meshes,
        total_vertices,
        total_triangles,
        file_size: container.declared_size,
        layout: container.layout,
        chunks: container.chunks,
        model_info,
        diagnostics: log,
    })
}

/// Source geometry for [`encode_minimal`].
#[derive(Builder, Debug, Clone, Default, PartialEq)]
pub struct MeshSource {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub faces: Vec<[u32; 3]>,
}

impl MeshSource {
    fn validate(&self) -> Result<(), MefError> {
        let vertices = self.vertices.len();
        if vertices == 0 || self.faces.is_empty() {
            return Err(MefError::EmptyMesh {
                vertices,
                faces: self.faces.len(),
            });
        }
        if vertices > usize::from(u16::MAX) + 1 {
            return Err(MefError::IndexOverflow { vertices });
        }
        if let Some(normals) = &self.normals
            && normals.len() != vertices
        {
            return Err(MefError::AttributeMismatch {
                attribute: "normal",
                expected: vertices,
                found: normals.len(),
            });
        }
        if let Some(uvs) = &self.uvs
            && uvs.len() != vertices
        {
            return Err(MefError::AttributeMismatch {
                attribute: "uv",
                expected: vertices,
                found: uvs.len(),
            });
        }
        for (face, tri) in self.faces.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertices) {
                return Err(MefError::FaceOutOfRange {
                    face,
                    index,
                    vertices,
                });
            }
        }
        Ok(())
    }
}

/// Write `source` as a compact container holding one render vertex chunk and
/// one render face chunk.
///
/// The vertex stride is 12 bytes plus 12 for normals and 8 for uvs when
/// present. The vertex count is stored in the vertex chunk's `param` so that
/// [`parse`] does not have to guess the stride from size alone.
pub fn encode_minimal(source: &MeshSource) -> Result<Vec<u8>, Report<MefError>> {
    source.validate()?;

    let format = VertexFormat::for_attributes(source.normals.is_some(), source.uvs.is_some());
    let mut vertices = ByteWriter::with_capacity(source.vertices.len() * format.stride());
    for (i, &position) in source.vertices.iter().enumerate() {
        let normal = source.normals.as_ref().map(|n| n[i]);
        let uv = source.uvs.as_ref().map(|u| u[i]);
        format.encode_vertex(&mut vertices, position, normal, uv);
    }

    let mut faces = ByteWriter::with_capacity(source.faces.len() * FACE_RECORD_SIZE);
    for tri in &source.faces {
        for &index in tri {
            // Bounded by the vertex count check in `validate`.
            faces.write_u16_le(index as u16);
        }
    }

    let vertices = vertices.into_inner();
    let faces = faces.into_inner();
    let data = ilff::write_container(&[
        OutChunk {
            tag: RENDER_VERTICES,
            param: source.vertices.len() as i32,
            payload: &vertices,
        },
        OutChunk {
            tag: RENDER_FACES,
            param: 0,
            payload: &faces,
        },
    ])
    .map_err(MefError::from)?;

    debug!(
        vertices = source.vertices.len(),
        faces = source.faces.len(),
        stride = format.stride(),
        bytes = data.len(),
        "encoded MEF model"
    );
    Ok(data)
}

/// Convert Wavefront OBJ text straight to MEF bytes.
pub fn convert_obj(text: &str) -> Result<Vec<u8>, Report<MefError>> {
    let source = obj::parse_obj(text).map_err(MefError::from)?;
    encode_minimal(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ilff::encode_chunk_header;

    fn unit_cube() -> MeshSource {
        let vertices = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ];
        let faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 7, 6],
            [3, 6, 2],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        MeshSource::builder().vertices(vertices).faces(faces).build()
    }

    #[test]
    fn minimal_cube() {
        let cube = unit_cube();
        let data = encode_minimal(&cube).unwrap();
        assert_eq!(data.len(), 8 + 16 + 8 * 12 + 16 + 12 * 6);

        let model = parse(&data).unwrap();
        assert_eq!(model.layout, HeaderLayout::Compact);
        assert_eq!(model.file_size as usize, data.len());
        assert_eq!(model.meshes.len(), 1);

        let mesh = &model.meshes[0];
        assert_eq!(mesh.name, "render_mesh_0");
        assert_eq!(mesh.vertex_count, 8);
        assert_eq!(mesh.triangle_count, 12);
        assert_eq!(mesh.format, VertexFormat::PositionOnly);
        assert_eq!(mesh.vertices, cube.vertices.concat());
        assert_eq!(mesh.indices, cube.faces.concat());
        assert_eq!(model.total_vertices, 8);
        assert_eq!(model.total_triangles, 12);
    }

    #[test]
    fn round_trip_with_attributes() {
        let mut cube = unit_cube();
        cube.normals = Some(vec![[0.0, 0.0, 1.0]; 8]);
        cube.uvs = Some((0..8).map(|i| [i as f32 / 8.0, 1.0]).collect());

        let data = encode_minimal(&cube).unwrap();
        let model = parse(&data).unwrap();
        let mesh = &model.meshes[0];
        assert_eq!(mesh.format, VertexFormat::Rigid);
        assert_eq!(mesh.vertices, cube.vertices.concat());
        assert_eq!(mesh.normals.as_deref(), Some(&[0.0, 0.0, 1.0].repeat(8)[..]));
        assert_eq!(mesh.uvs, cube.uvs.as_ref().map(|uvs| uvs.concat()));
        assert_eq!(mesh.triangle_count, cube.faces.len());
    }

    #[test]
    fn encode_rejects_bad_input() {
        let empty = MeshSource::default();
        let err = encode_minimal(&empty).unwrap_err();
        assert!(matches!(
            err.current_context(),
            MefError::EmptyMesh { vertices: 0, faces: 0 }
        ));

        let mut cube = unit_cube();
        cube.faces.push([0, 1, 8]);
        let err = encode_minimal(&cube).unwrap_err();
        assert!(matches!(
            err.current_context(),
            MefError::FaceOutOfRange { face: 12, index: 8, .. }
        ));

        let mut cube = unit_cube();
        cube.uvs = Some(vec![[0.0, 0.0]; 3]);
        let err = encode_minimal(&cube).unwrap_err();
        assert!(matches!(
            err.current_context(),
            MefError::AttributeMismatch { attribute: "uv", expected: 8, found: 3 }
        ));
    }

    #[test]
    fn parse_reports_container_errors() {
        let err = parse(b"ILF").unwrap_err();
        assert!(matches!(
            err.current_context(),
            MefError::Container(ContainerError::TooSmall { len: 3 })
        ));

        let err = parse(b"MEF!\0\0\0\0\0\0\0\0").unwrap_err();
        assert!(matches!(
            err.current_context(),
            MefError::Container(ContainerError::BadMagic { .. })
        ));
    }

    #[test]
    fn no_meshes_carries_diagnostics() {
        let mut w = ByteWriter::new();
        w.write_tag(ilff::ILFF_MAGIC);
        w.write_i32_le(8 + 16 + 13);
        encode_chunk_header(&mut w, RENDER_VERTICES, 13, 0, 0);
        w.write_bytes(&[0; 13]);
        let data = w.into_inner();

        let err = parse(&data).unwrap_err();
        match err.current_context() {
            MefError::NoValidMeshes {
                chunks,
                diagnostics,
            } => {
                assert_eq!(*chunks, 1);
                assert!(diagnostics.contains(DiagnosticCode::FormatUndetected));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// A game-style file: full header, metadata chunks, an unknown chunk and
    /// geometry for two categories.
    fn game_style_file(declared_vertices: u32) -> Vec<u8> {
        let mut render = ByteWriter::new();
        for i in 0..3 {
            VertexFormat::PositionOnly.encode_vertex(&mut render, [i as f32, 1.0, 2.0], None, None);
        }
        let mut shadow = ByteWriter::new();
        // 84 bytes: only the 12-byte stride divides it.
        for i in 0..7 {
            VertexFormat::PositionOnly.encode_vertex(&mut shadow, [0.0, i as f32, 0.0], None, None);
        }
        let mut render_faces = ByteWriter::new();
        for i in [0u16, 1, 2] {
            render_faces.write_u16_le(i);
        }
        let mut shadow_faces = ByteWriter::new();
        for i in [0u16, 1, 2, 1, 2, 3] {
            shadow_faces.write_u16_le(i);
        }
        let mut summary = ByteWriter::new();
        summary.write_u32_le(declared_vertices);
        summary.write_u32_le(3);

        let chunks: Vec<(Tag, Vec<u8>)> = vec![
            (MODEL_INFO, 1i32.to_le_bytes().to_vec()),
            (MODEL_SUMMARY, summary.into_inner()),
            (Tag(*b"ATTA"), vec![0; 8]),
            (RENDER_VERTICES, render.into_inner()),
            (RENDER_FACES, render_faces.into_inner()),
            (SHADOW_VERTICES, shadow.into_inner()),
            (SHADOW_FACES, shadow_faces.into_inner()),
        ];

        let mut w = ByteWriter::new();
        w.write_tag(ilff::ILFF_MAGIC);
        w.write_i32_le(0);
        w.write_u32_le(4);
        w.write_u32_le(0);
        w.write_tag(Tag(*b"OCEM"));
        for (i, (tag, payload)) in chunks.iter().enumerate() {
            let next = if i + 1 == chunks.len() {
                0
            } else {
                (16 + payload.len()) as i32
            };
            // Game files store 0 in `param`; the stride comes from size alone.
            encode_chunk_header(&mut w, *tag, payload.len() as u32, 0, next);
            w.write_bytes(payload);
        }
        let len = w.len() as u32;
        w.patch_u32_le(4, len).unwrap();
        w.into_inner()
    }

    #[test]
    fn parses_game_style_file() {
        let data = game_style_file(10);
        let model = parse(&data).unwrap();

        assert!(matches!(model.layout, HeaderLayout::Full { .. }));
        assert_eq!(model.chunks.len(), 7);
        assert_eq!(model.model_info.model_type, Some(1));
        assert_eq!(model.model_info.declared_vertices, Some(10));

        let names: Vec<_> = model.meshes.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["render_mesh_0", "shadow_mesh_1"]);
        assert_eq!(model.total_vertices, 10);
        assert_eq!(model.total_triangles, 3);
        assert_eq!(model.meshes_in(MeshCategory::Shadow).count(), 1);
        assert!(model.diagnostics.contains(DiagnosticCode::UnknownChunk));
        assert!(!model.diagnostics.contains(DiagnosticCode::DeclaredCountMismatch));
        assert!(matches!(model.chunks[2].kind(), Recognized::Unknown(_)));
    }

    #[test]
    fn declared_count_mismatch_is_reported() {
        let data = game_style_file(99);
        let model = parse(&data).unwrap();
        assert_eq!(
            model.diagnostics.count(DiagnosticCode::DeclaredCountMismatch),
            1
        );
    }

    #[test]
    fn truncated_file_keeps_complete_meshes() {
        let mut data = game_style_file(10);
        // Drop the shadow face chunk entirely and part of its header.
        let shadow_faces_start = data.len() - (16 + 12);
        data.truncate(shadow_faces_start + 10);

        let model = parse(&data).unwrap();
        assert_eq!(model.meshes.len(), 1);
        assert_eq!(model.meshes[0].category, MeshCategory::Render);
        assert!(model.diagnostics.contains(DiagnosticCode::TruncatedHeader));
    }

    #[test]
    fn classify_is_exact() {
        assert_eq!(
            classify(Tag(*b"XTVM")),
            Recognized::Known(ChunkKind::Vertices(MeshCategory::Render))
        );
        assert!(matches!(classify(Tag(*b"xtvm")), Recognized::Unknown(_)));
        assert!(matches!(classify(Tag(*b"XTV ")), Recognized::Unknown(_)));
    }

    #[test]
    fn converts_obj_text() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nf 1 2 4 3\n";
        let data = convert_obj(text).unwrap();
        let model = parse(&data).unwrap();
        assert_eq!(model.meshes[0].vertex_count, 4);
        // Vertices are renumbered in first-use order: 1, 2, 4, 3.
        assert_eq!(model.meshes[0].indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(model.meshes[0].position(2), Some([1.0, 1.0, 0.0]));
    }
}
