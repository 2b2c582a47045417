//! Vertex layout inference and attribute unpacking for MEF vertex chunks.
//!
//! Vertex chunks carry no schema. The layout is guessed from the payload size
//! alone by trying a fixed list of strides, largest first, and taking the first
//! one that divides the payload evenly. Different layouts can divide the same
//! size (3200 bytes is 100 x 32, 160 x 20 or 200 x 16), so this is a heuristic:
//! a payload is always assumed to use the widest stride that fits.

use crate::data::parser_utils::{ByteCursor, ByteWriter, CursorError};

/// Upper bound (exclusive) on the vertex count of a single chunk.
pub const MAX_VERTICES: usize = 2_000_000;

/// How texture coordinates are stored in a vertex record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UvEncoding {
    /// 2 x f32 = 8 bytes
    Float32x2,
    /// 2 x float16 = 4 bytes
    Float16x2,
}

/// One of the fixed vertex record layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum VertexFormat {
    /// position + normal + uv, 32 bytes
    Rigid,
    /// position + normal, 24 bytes
    PositionNormal,
    /// position + uv, 20 bytes
    Lightmap,
    /// position + half precision uv, 16 bytes
    Basic,
    /// position only, 12 bytes
    PositionOnly,
}

/// Candidate layouts in detection priority order.
pub const CANDIDATES: [VertexFormat; 5] = [
    VertexFormat::Rigid,
    VertexFormat::PositionNormal,
    VertexFormat::Lightmap,
    VertexFormat::Basic,
    VertexFormat::PositionOnly,
];

impl VertexFormat {
    pub const fn stride(self) -> usize {
        match self {
            VertexFormat::Rigid => 32,
            VertexFormat::PositionNormal => 24,
            VertexFormat::Lightmap => 20,
            VertexFormat::Basic => 16,
            VertexFormat::PositionOnly => 12,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            VertexFormat::Rigid => "rigid",
            VertexFormat::PositionNormal => "position+normal",
            VertexFormat::Lightmap => "lightmap",
            VertexFormat::Basic => "basic",
            VertexFormat::PositionOnly => "position",
        }
    }

    pub const fn has_normals(self) -> bool {
        matches!(self, VertexFormat::Rigid | VertexFormat::PositionNormal)
    }

    pub const fn uv_encoding(self) -> Option<UvEncoding> {
        match self {
            VertexFormat::Rigid | VertexFormat::Lightmap => Some(UvEncoding::Float32x2),
            VertexFormat::Basic => Some(UvEncoding::Float16x2),
            VertexFormat::PositionNormal | VertexFormat::PositionOnly => None,
        }
    }

    /// The layout the minimal writer uses for the given attribute set.
    pub const fn for_attributes(normals: bool, uvs: bool) -> VertexFormat {
        match (normals, uvs) {
            (true, true) => VertexFormat::Rigid,
            (true, false) => VertexFormat::PositionNormal,
            (false, true) => VertexFormat::Lightmap,
            (false, false) => VertexFormat::PositionOnly,
        }
    }

    pub fn from_stride(stride: usize) -> Option<VertexFormat> {
        CANDIDATES.into_iter().find(|f| f.stride() == stride)
    }

    /// Decode `count` records from the front of `payload`.
    pub fn decode(self, payload: &[u8], count: usize) -> Result<VertexBuffer, CursorError> {
        let mut cursor = ByteCursor::new(payload);
        let mut positions = Vec::with_capacity(count * 3);
        let mut normals = self.has_normals().then(|| Vec::with_capacity(count * 3));
        let mut uvs = self.uv_encoding().map(|_| Vec::with_capacity(count * 2));

        for _ in 0..count {
            let record_start = cursor.position();
            for _ in 0..3 {
                positions.push(cursor.read_f32_le()?);
            }
            if let Some(normals) = normals.as_mut() {
                for _ in 0..3 {
                    normals.push(cursor.read_f32_le()?);
                }
            }
            match (self.uv_encoding(), uvs.as_mut()) {
                (Some(UvEncoding::Float32x2), Some(uvs)) => {
                    uvs.push(cursor.read_f32_le()?);
                    uvs.push(cursor.read_f32_le()?);
                }
                (Some(UvEncoding::Float16x2), Some(uvs)) => {
                    uvs.extend_from_slice(&unpack_uv(cursor.read_u32_le()?));
                }
                _ => {}
            }
            cursor.seek((record_start + self.stride()) as i64, false)?;
        }

        Ok(VertexBuffer {
            format: self,
            vertex_count: count,
            positions,
            normals,
            uvs,
        })
    }

    /// Append one record in this layout. Missing attributes are written as zero.
    pub fn encode_vertex(
        self,
        w: &mut ByteWriter,
        position: [f32; 3],
        normal: Option<[f32; 3]>,
        uv: Option<[f32; 2]>,
    ) {
        for v in position {
            w.write_f32_le(v);
        }
        if self.has_normals() {
            for v in normal.unwrap_or_default() {
                w.write_f32_le(v);
            }
        }
        match self.uv_encoding() {
            Some(UvEncoding::Float32x2) => {
                for v in uv.unwrap_or_default() {
                    w.write_f32_le(v);
                }
            }
            Some(UvEncoding::Float16x2) => w.write_u32_le(pack_uv(uv.unwrap_or_default())),
            None => {}
        }
    }
}

/// Result of stride detection for one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub format: VertexFormat,
    pub vertex_count: usize,
}

impl Detection {
    pub fn stride(&self) -> usize {
        self.format.stride()
    }
}

fn candidate(format: VertexFormat, byte_len: usize) -> Option<Detection> {
    let stride = format.stride();
    if byte_len % stride != 0 {
        return None;
    }
    let vertex_count = byte_len / stride;
    (vertex_count > 0 && vertex_count < MAX_VERTICES).then_some(Detection {
        format,
        vertex_count,
    })
}

/// Infer the vertex layout of a payload from its size alone.
///
/// Returns the first candidate in [`CANDIDATES`] order whose stride divides
/// `byte_len` with a vertex count in `1..MAX_VERTICES`.
pub fn detect(byte_len: usize) -> Option<Detection> {
    CANDIDATES
        .into_iter()
        .find_map(|format| candidate(format, byte_len))
}

/// Like [`detect`], but trusts a declared vertex count when it implies one of
/// the candidate strides exactly.
pub fn detect_with_hint(byte_len: usize, declared_count: Option<u32>) -> Option<Detection> {
    let hinted = declared_count
        .filter(|&count| count > 0 && byte_len % count as usize == 0)
        .and_then(|count| VertexFormat::from_stride(byte_len / count as usize))
        .and_then(|format| candidate(format, byte_len));
    hinted.or_else(|| detect(byte_len))
}

/// Decoded vertex attributes for one vertex chunk, as flat arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexBuffer {
    pub format: VertexFormat,
    pub vertex_count: usize,
    /// `vertex_count * 3` floats.
    pub positions: Vec<f32>,
    /// `vertex_count * 3` floats, when the layout has normals.
    pub normals: Option<Vec<f32>>,
    /// `vertex_count * 2` floats, when the layout has texture coordinates.
    pub uvs: Option<Vec<f32>>,
}

/// Unpack a 4-byte packed UV into `[f32; 2]`.
///
/// The packed format is 2 x float16 (IEEE 754 half-precision), stored as
/// `[u_half, v_half]` in little-endian order.
pub fn unpack_uv(packed: u32) -> [f32; 2] {
    let bytes = packed.to_le_bytes();
    let u_bits = u16::from_le_bytes([bytes[0], bytes[1]]);
    let v_bits = u16::from_le_bytes([bytes[2], bytes[3]]);
    [
        half::f16::from_bits(u_bits).to_f32(),
        half::f16::from_bits(v_bits).to_f32(),
    ]
}

pub fn pack_uv(uv: [f32; 2]) -> u32 {
    let u = half::f16::from_f32(uv[0]).to_bits();
    let v = half::f16::from_f32(uv[1]).to_bits();
    u32::from(u) | (u32::from(v) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_largest_stride() {
        let d = detect(3200).unwrap();
        assert_eq!(d.stride(), 32);
        assert_eq!(d.vertex_count, 100);
        assert_eq!(d.format, VertexFormat::Rigid);

        assert_eq!(detect(72).unwrap().stride(), 24);
        assert_eq!(detect(60).unwrap().stride(), 20);
        assert_eq!(detect(48).unwrap().stride(), 24);
        assert_eq!(detect(36).unwrap().stride(), 12);
    }

    #[test]
    fn rejects_indivisible_and_out_of_range() {
        assert_eq!(detect(0), None);
        assert_eq!(detect(13), None);
        assert_eq!(detect(32 * MAX_VERTICES), None);
        // Only the 12-byte stride divides this, just under the vertex limit.
        assert!(detect(12 * (MAX_VERTICES - 1)).is_some());
    }

    #[test]
    fn detection_is_deterministic() {
        for len in [96usize, 3200, 120, 4_000, 999_996] {
            assert_eq!(detect(len), detect(len));
        }
    }

    #[test]
    fn hint_disambiguates() {
        // 8 position-only vertices: 96 bytes, which is also 3 rigid vertices.
        assert_eq!(detect(96).unwrap().stride(), 32);
        let d = detect_with_hint(96, Some(8)).unwrap();
        assert_eq!(d.format, VertexFormat::PositionOnly);
        assert_eq!(d.vertex_count, 8);

        // A hint that does not map to a candidate stride is ignored.
        assert_eq!(detect_with_hint(96, Some(7)), detect(96));
        assert_eq!(detect_with_hint(96, Some(0)), detect(96));
        assert_eq!(detect_with_hint(96, None), detect(96));
    }

    #[test]
    fn decode_rigid_records() {
        let mut w = ByteWriter::new();
        VertexFormat::Rigid.encode_vertex(
            &mut w,
            [1.0, 2.0, 3.0],
            Some([0.0, 1.0, 0.0]),
            Some([0.25, 0.75]),
        );
        VertexFormat::Rigid.encode_vertex(&mut w, [4.0, 5.0, 6.0], None, None);
        let data = w.into_inner();
        assert_eq!(data.len(), 64);

        let buf = VertexFormat::Rigid.decode(&data, 2).unwrap();
        assert_eq!(buf.positions, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buf.normals, Some(vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0]));
        assert_eq!(buf.uvs, Some(vec![0.25, 0.75, 0.0, 0.0]));
    }

    #[test]
    fn decode_basic_half_uvs() {
        let mut w = ByteWriter::new();
        VertexFormat::Basic.encode_vertex(&mut w, [1.0, 0.0, -1.0], None, Some([0.5, 1.0]));
        let data = w.into_inner();
        assert_eq!(data.len(), 16);

        let buf = VertexFormat::Basic.decode(&data, 1).unwrap();
        assert_eq!(buf.positions, vec![1.0, 0.0, -1.0]);
        assert_eq!(buf.normals, None);
        assert_eq!(buf.uvs, Some(vec![0.5, 1.0]));
    }

    #[test]
    fn decode_short_payload_fails() {
        let data = [0u8; 20];
        assert!(VertexFormat::PositionOnly.decode(&data, 2).is_err());
    }

    #[test]
    fn writer_layouts() {
        assert_eq!(VertexFormat::for_attributes(false, false).stride(), 12);
        assert_eq!(VertexFormat::for_attributes(true, false).stride(), 24);
        assert_eq!(VertexFormat::for_attributes(false, true).stride(), 20);
        assert_eq!(VertexFormat::for_attributes(true, true).stride(), 32);
    }
}
