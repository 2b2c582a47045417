//! Codec for the `ILFF` tagged-chunk container.
//!
//! Layout (little-endian):
//! - `ILFF` magic, `i32` total size
//! - full layout only: a 12-byte reserved block (alignment, reserved, form tag)
//! - a singly linked list of chunks, each a 16-byte header
//!   (`tag`, `size`, `param`, `next`) followed by `size` payload bytes
//!
//! After reading a header the decoder seeks `next - 16` bytes relative to the
//! end of that header, so `next` is effectively the distance from one header
//! start to the following one. A `next` of zero ends the chain.

use thiserror::Error;
use tracing::debug;

use crate::data::parser_utils::{ByteCursor, ByteWriter, CursorError, Tag};
use crate::diagnostics::{DiagnosticCode, DiagnosticLog};

/// Container signature.
pub const ILFF_MAGIC: Tag = Tag(*b"ILFF");
/// Size of every chunk header.
pub const CHUNK_HEADER_SIZE: usize = 16;
/// Bytes between the size field and the first chunk in the full layout.
pub const RESERVED_BLOCK_SIZE: usize = 12;
/// Magic plus total size.
pub const COMPACT_HEADER_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("buffer too small for an ILFF container: {len} bytes")]
    TooSmall { len: usize },
    #[error("bad magic: expected {}, got {found}", ILFF_MAGIC)]
    BadMagic { found: Tag },
    #[error("chunk {tag} payload of {len} bytes does not fit a 32-bit size field")]
    PayloadTooLarge { tag: Tag, len: usize },
}

/// Which of the two observed file headers a container uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum HeaderLayout {
    /// Game-authored files: magic, size, then alignment, reserved and form tag.
    Full {
        alignment: u32,
        reserved: u32,
        form: Tag,
    },
    /// Files written by [`write_container`]: magic and size only.
    Compact,
}

impl HeaderLayout {
    /// Offset of the first chunk header.
    pub fn first_chunk_offset(&self) -> usize {
        match self {
            HeaderLayout::Full { .. } => COMPACT_HEADER_SIZE + RESERVED_BLOCK_SIZE,
            HeaderLayout::Compact => COMPACT_HEADER_SIZE,
        }
    }
}

/// One decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Chunk {
    pub tag: Tag,
    /// Absolute offset of the chunk header.
    pub byte_offset: usize,
    pub payload_size: u32,
    pub param: i32,
    pub next_offset: i32,
}

impl Chunk {
    pub fn payload_offset(&self) -> usize {
        self.byte_offset + CHUNK_HEADER_SIZE
    }

    pub fn payload_end(&self) -> usize {
        self.payload_offset() + self.payload_size as usize
    }

    /// Whether the declared payload lies entirely within `buffer_len` bytes.
    pub fn fits(&self, buffer_len: usize) -> bool {
        self.payload_end() <= buffer_len
    }

    /// Payload bytes, or `None` if the chunk declares more than the buffer holds.
    pub fn payload<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        data.get(self.payload_offset()..self.payload_end())
    }
}

/// A decoded container: header facts plus the chunk table in chain order.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Container {
    /// Size claimed by the header. Only used to bound the chunk walk.
    pub declared_size: i32,
    pub layout: HeaderLayout,
    pub chunks: Vec<Chunk>,
}

fn read_chunk_header(cursor: &mut ByteCursor<'_>) -> Result<(Tag, u32, i32, i32), CursorError> {
    let tag = cursor.read_tag()?;
    let size = cursor.read_u32_le()?;
    let param = cursor.read_i32_le()?;
    let next = cursor.read_i32_le()?;
    Ok((tag, size, param, next))
}

fn read_layout(data: &[u8], chunk_tags: &[Tag]) -> Result<HeaderLayout, CursorError> {
    let compact = data
        .get(COMPACT_HEADER_SIZE..COMPACT_HEADER_SIZE + 4)
        .is_some_and(|bytes| chunk_tags.iter().any(|tag| tag.as_bytes()[..] == *bytes));
    if compact {
        return Ok(HeaderLayout::Compact);
    }

    let mut cursor = ByteCursor::new(data);
    cursor.seek(COMPACT_HEADER_SIZE as i64, false)?;
    let alignment = cursor.read_u32_le()?;
    let reserved = cursor.read_u32_le()?;
    let form = cursor.read_tag()?;
    Ok(HeaderLayout::Full {
        alignment,
        reserved,
        form,
    })
}

/// Walk the chunk chain of an ILFF buffer.
///
/// `chunk_tags` lists the tags the caller understands; it is only used to tell
/// a compact header from a full one. Damage past the header (truncated tail,
/// oversized payloads, broken links) is recorded in `log` and ends or skips
/// work without failing the call.
pub fn decode_container(
    data: &[u8],
    chunk_tags: &[Tag],
    log: &mut DiagnosticLog,
) -> Result<Container, ContainerError> {
    if data.len() < COMPACT_HEADER_SIZE {
        return Err(ContainerError::TooSmall { len: data.len() });
    }

    let mut cursor = ByteCursor::new(data);
    let too_small = |_| ContainerError::TooSmall { len: data.len() };
    let magic = cursor.read_tag().map_err(too_small)?;
    if magic != ILFF_MAGIC {
        return Err(ContainerError::BadMagic { found: magic });
    }
    let declared_size = cursor.read_i32_le().map_err(too_small)?;

    let layout = match read_layout(data, chunk_tags) {
        Ok(layout) => layout,
        Err(e) => {
            log.warn(
                DiagnosticCode::TruncatedHeader,
                format!("reserved header block is truncated: {e}"),
            );
            return Ok(Container {
                declared_size,
                layout: HeaderLayout::Compact,
                chunks: Vec::new(),
            });
        }
    };
    debug!(?layout, declared_size, len = data.len(), "decoding ILFF container");
    cursor
        .seek(layout.first_chunk_offset() as i64, false)
        .map_err(too_small)?;

    let limit = (declared_size.max(0) as usize).min(data.len());
    let mut chunks = Vec::new();

    while cursor.position() < limit {
        let byte_offset = cursor.position();
        if cursor.remaining() < CHUNK_HEADER_SIZE {
            log.warn(
                DiagnosticCode::TruncatedHeader,
                format!(
                    "only {} bytes left for a chunk header at 0x{byte_offset:X}",
                    cursor.remaining()
                ),
            );
            break;
        }

        let (tag, payload_size, param, next_offset) = match read_chunk_header(&mut cursor) {
            Ok(header) => header,
            Err(e) => {
                log.warn(DiagnosticCode::TruncatedHeader, e.to_string());
                break;
            }
        };
        let chunk = Chunk {
            tag,
            byte_offset,
            payload_size,
            param,
            next_offset,
        };
        debug!(%tag, byte_offset, payload_size, param, next_offset, "chunk");

        if !chunk.fits(data.len()) {
            log.warn(
                DiagnosticCode::PayloadExceedsBuffer,
                format!(
                    "chunk {tag} at 0x{byte_offset:X} declares {payload_size} bytes, \
                     buffer ends at 0x{:X}",
                    data.len()
                ),
            );
        }
        chunks.push(chunk);

        if next_offset == 0 {
            break;
        }
        if next_offset < CHUNK_HEADER_SIZE as i32 {
            log.warn(
                DiagnosticCode::NonAdvancingLink,
                format!("chunk {tag} at 0x{byte_offset:X} links to {next_offset}, stopping walk"),
            );
            break;
        }
        if let Err(e) = cursor.seek(i64::from(next_offset) - CHUNK_HEADER_SIZE as i64, true) {
            log.warn(
                DiagnosticCode::SeekFailed,
                format!("following link of chunk {tag} at 0x{byte_offset:X}: {e}"),
            );
            break;
        }
    }

    Ok(Container {
        declared_size,
        layout,
        chunks,
    })
}

/// Append one chunk header.
pub fn encode_chunk_header(w: &mut ByteWriter, tag: Tag, size: u32, param: i32, next: i32) {
    w.write_tag(tag);
    w.write_u32_le(size);
    w.write_i32_le(param);
    w.write_i32_le(next);
}

/// A chunk to be written by [`write_container`].
#[derive(Debug, Clone, Copy)]
pub struct OutChunk<'a> {
    pub tag: Tag,
    pub param: i32,
    pub payload: &'a [u8],
}

/// Write a compact-layout container holding `chunks` in order, linking each
/// chunk to its successor and terminating the last one.
pub fn write_container(chunks: &[OutChunk<'_>]) -> Result<Vec<u8>, ContainerError> {
    let total: usize = COMPACT_HEADER_SIZE
        + chunks
            .iter()
            .map(|c| CHUNK_HEADER_SIZE + c.payload.len())
            .sum::<usize>();

    let mut w = ByteWriter::with_capacity(total);
    w.write_tag(ILFF_MAGIC);
    let total_size = i32::try_from(total).map_err(|_| ContainerError::PayloadTooLarge {
        tag: ILFF_MAGIC,
        len: total,
    })?;
    w.write_i32_le(total_size);

    for (i, chunk) in chunks.iter().enumerate() {
        let too_large = || ContainerError::PayloadTooLarge {
            tag: chunk.tag,
            len: chunk.payload.len(),
        };
        let size = u32::try_from(chunk.payload.len()).map_err(|_| too_large())?;
        let next = if i + 1 == chunks.len() {
            0
        } else {
            i32::try_from(CHUNK_HEADER_SIZE + chunk.payload.len()).map_err(|_| too_large())?
        };
        encode_chunk_header(&mut w, chunk.tag, size, chunk.param, next);
        w.write_bytes(chunk.payload);
    }

    Ok(w.into_inner())
}
