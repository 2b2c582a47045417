//! Assembly of drawable meshes from a decoded MEF chunk table.
//!
//! Geometry comes in vertex/face chunk pairs per mesh category. A vertex chunk
//! leaves a pending vertex buffer for its category; the next face chunk of the
//! same category consumes it and, if any triangle survives validation, emits a
//! mesh. Anything unexpected is logged and skipped.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::data::ilff::Chunk;
use crate::data::parser_utils::{ByteCursor, CursorError};
use crate::diagnostics::{DiagnosticCode, DiagnosticLog};
use crate::models::mef::{ChunkKind, classify};
use crate::models::vertex_format::{self, VertexBuffer, VertexFormat};
use crate::recognized::Recognized;

/// Which of the three independent geometry sets a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MeshCategory {
    Render,
    Collision,
    Shadow,
}

impl MeshCategory {
    pub const ALL: [MeshCategory; 3] = [
        MeshCategory::Render,
        MeshCategory::Collision,
        MeshCategory::Shadow,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            MeshCategory::Render => "render",
            MeshCategory::Collision => "collision",
            MeshCategory::Shadow => "shadow",
        }
    }

    /// Bytes per triangle record in this category's face chunks.
    /// Collision faces carry two trailing padding bytes.
    pub const fn face_record_size(self) -> usize {
        match self {
            MeshCategory::Render | MeshCategory::Shadow => 6,
            MeshCategory::Collision => 8,
        }
    }
}

impl fmt::Display for MeshCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether the assembler may use a vertex chunk's `param` as a declared vertex
/// count when choosing a stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrideHint {
    /// Prefer the stride implied by `param` when it is a candidate stride.
    #[default]
    ChunkParam,
    /// Use the size-only heuristic unconditionally.
    SizeOnly,
}

/// A finished drawable unit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Mesh {
    /// `{category}_mesh_{ordinal}`
    pub name: String,
    pub category: MeshCategory,
    pub format: VertexFormat,
    /// Flat positions, `vertex_count * 3` floats.
    pub vertices: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    pub uvs: Option<Vec<f32>>,
    /// Flat triangle list, `triangle_count * 3` indices, all `< vertex_count`.
    pub indices: Vec<u32>,
    pub vertex_count: usize,
    pub triangle_count: usize,
    /// Triangles discarded for referencing missing vertices.
    pub dropped_triangles: usize,
}

impl Mesh {
    pub fn position(&self, index: usize) -> Option<[f32; 3]> {
        let p = self.vertices.get(index * 3..index * 3 + 3)?;
        Some([p[0], p[1], p[2]])
    }

    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }
}

/// Best-effort metadata collected before geometry is assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ModelInfo {
    pub model_type: Option<i32>,
    pub declared_vertices: Option<u32>,
    pub declared_faces: Option<u32>,
}

impl ModelInfo {
    pub fn is_empty(&self) -> bool {
        self.model_type.is_none()
            && self.declared_vertices.is_none()
            && self.declared_faces.is_none()
    }
}

fn read_model_type(payload: &[u8]) -> Result<i32, CursorError> {
    ByteCursor::new(payload).read_i32_le()
}

fn read_summary(payload: &[u8]) -> Result<(u32, u32), CursorError> {
    let mut cursor = ByteCursor::new(payload);
    let vertices = cursor.read_u32_le()?;
    let faces = cursor.read_u32_le()?;
    Ok((vertices, faces))
}

/// First pass: pick up the model type and declared counts from metadata chunks.
pub fn read_model_info(data: &[u8], chunks: &[Chunk], log: &mut DiagnosticLog) -> ModelInfo {
    let mut info = ModelInfo::default();

    for chunk in chunks {
        let Some(kind) = classify(chunk.tag).into_known() else {
            continue;
        };
        let result = match kind {
            ChunkKind::ModelInfo => chunk
                .payload(data)
                .ok_or_else(|| "payload exceeds buffer".to_string())
                .and_then(|payload| read_model_type(payload).map_err(|e| e.to_string()))
                .map(|model_type| info.model_type = Some(model_type)),
            ChunkKind::ModelSummary => chunk
                .payload(data)
                .ok_or_else(|| "payload exceeds buffer".to_string())
                .and_then(|payload| read_summary(payload).map_err(|e| e.to_string()))
                .map(|(vertices, faces)| {
                    info.declared_vertices = Some(vertices);
                    info.declared_faces = Some(faces);
                }),
            _ => Ok(()),
        };
        if let Err(e) = result {
            log.warn(
                DiagnosticCode::MetadataParseFailed,
                format!("{} chunk at 0x{:X}: {e}", chunk.tag, chunk.byte_offset),
            );
        }
    }

    info
}

/// Decode a face payload, keeping only triangles whose indices are all
/// `< vertex_count`. Returns the surviving indices and the number dropped.
fn read_faces(
    payload: &[u8],
    category: MeshCategory,
    vertex_count: usize,
    chunk: &Chunk,
    log: &mut DiagnosticLog,
) -> (Vec<u32>, usize) {
    let record_size = category.face_record_size();
    let triangle_count = payload.len() / record_size;
    let mut indices = Vec::with_capacity(triangle_count * 3);
    let mut dropped = 0;

    for (i, record) in payload.chunks_exact(record_size).enumerate() {
        let tri = [0, 2, 4].map(|o| u32::from(u16::from_le_bytes([record[o], record[o + 1]])));

        if tri.iter().all(|&idx| (idx as usize) < vertex_count) {
            indices.extend_from_slice(&tri);
        } else {
            dropped += 1;
            log.warn(
                DiagnosticCode::IndexOutOfRange,
                format!(
                    "{} triangle {i} in chunk at 0x{:X} references {tri:?}, \
                     only {vertex_count} vertices exist",
                    category, chunk.byte_offset
                ),
            );
        }
    }

    let trailing = payload.len() % record_size;
    if trailing != 0 {
        log.debug(
            DiagnosticCode::ChunkSkipped,
            format!(
                "ignoring {trailing} trailing bytes of {category} face chunk at 0x{:X}",
                chunk.byte_offset
            ),
        );
    }

    (indices, dropped)
}

/// Second pass state: one optional pending vertex buffer per category.
#[derive(Debug)]
pub struct MeshAssembler<'a> {
    data: &'a [u8],
    stride_hint: StrideHint,
    pending: HashMap<MeshCategory, VertexBuffer>,
    meshes: Vec<Mesh>,
}

impl<'a> MeshAssembler<'a> {
    pub fn new(data: &'a [u8], stride_hint: StrideHint) -> Self {
        MeshAssembler {
            data,
            stride_hint,
            pending: HashMap::new(),
            meshes: Vec::new(),
        }
    }

    /// Feed every chunk in table order and return the meshes emitted.
    pub fn assemble(mut self, chunks: &[Chunk], log: &mut DiagnosticLog) -> Vec<Mesh> {
        for chunk in chunks {
            self.push_chunk(chunk, log);
        }
        for category in MeshCategory::ALL
            .into_iter()
            .filter(|c| self.pending.contains_key(c))
        {
            log.debug(
                DiagnosticCode::ChunkSkipped,
                format!("{category} vertex buffer never followed by faces"),
            );
        }
        self.meshes
    }

    pub fn push_chunk(&mut self, chunk: &Chunk, log: &mut DiagnosticLog) {
        match classify(chunk.tag) {
            Recognized::Known(ChunkKind::Vertices(category)) => {
                self.on_vertices(category, chunk, log)
            }
            Recognized::Known(ChunkKind::Faces(category)) => self.on_faces(category, chunk, log),
            Recognized::Known(ChunkKind::ModelInfo | ChunkKind::ModelSummary) => {}
            Recognized::Unknown(tag) => log.debug(
                DiagnosticCode::UnknownChunk,
                format!("ignoring chunk {tag} at 0x{:X}", chunk.byte_offset),
            ),
        }
    }

    fn on_vertices(&mut self, category: MeshCategory, chunk: &Chunk, log: &mut DiagnosticLog) {
        // Any older pending buffer is replaced, or cleared if this one is unusable.
        self.pending.remove(&category);

        let Some(payload) = chunk.payload(self.data) else {
            log.warn(
                DiagnosticCode::VertexReadFailed,
                format!(
                    "{category} vertex chunk at 0x{:X} runs past end of buffer",
                    chunk.byte_offset
                ),
            );
            return;
        };

        let declared = match self.stride_hint {
            StrideHint::ChunkParam => u32::try_from(chunk.param).ok(),
            StrideHint::SizeOnly => None,
        };
        let Some(detection) = vertex_format::detect_with_hint(payload.len(), declared) else {
            log.warn(
                DiagnosticCode::FormatUndetected,
                format!(
                    "{category} vertex chunk at 0x{:X}: no stride fits {} bytes",
                    chunk.byte_offset,
                    payload.len()
                ),
            );
            return;
        };

        match detection.format.decode(payload, detection.vertex_count) {
            Ok(buffer) => {
                debug!(
                    %category,
                    vertices = buffer.vertex_count,
                    stride = detection.stride(),
                    format = detection.format.name(),
                    "vertex buffer pending"
                );
                self.pending.insert(category, buffer);
            }
            Err(e) => log.warn(
                DiagnosticCode::VertexReadFailed,
                format!("{category} vertex chunk at 0x{:X}: {e}", chunk.byte_offset),
            ),
        }
    }

    fn on_faces(&mut self, category: MeshCategory, chunk: &Chunk, log: &mut DiagnosticLog) {
        let Some(buffer) = self.pending.remove(&category) else {
            log.warn(
                DiagnosticCode::OrphanFaces,
                format!(
                    "{category} face chunk at 0x{:X} has no pending vertices",
                    chunk.byte_offset
                ),
            );
            return;
        };

        let Some(payload) = chunk.payload(self.data) else {
            log.warn(
                DiagnosticCode::ChunkSkipped,
                format!(
                    "{category} face chunk at 0x{:X} runs past end of buffer",
                    chunk.byte_offset
                ),
            );
            return;
        };

        let (indices, dropped) = read_faces(payload, category, buffer.vertex_count, chunk, log);
        if indices.is_empty() {
            log.warn(
                DiagnosticCode::ChunkSkipped,
                format!(
                    "{category} face chunk at 0x{:X} has no valid triangles",
                    chunk.byte_offset
                ),
            );
            return;
        }

        let mesh = Mesh {
            name: format!("{category}_mesh_{}", self.meshes.len()),
            category,
            format: buffer.format,
            vertex_count: buffer.vertex_count,
            triangle_count: indices.len() / 3,
            vertices: buffer.positions,
            normals: buffer.normals,
            uvs: buffer.uvs,
            indices,
            dropped_triangles: dropped,
        };
        self.meshes.push(mesh);
    }
}
