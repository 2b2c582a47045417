//! Codec for `.res` resource archives.
//!
//! Layout (little-endian):
//! - `ILFF` signature, `u32` archive size, `u32` version, `u32` reserved
//! - `IRES` resource index signature
//! - per file a `NAME` record and a `BODY` record, each a 16-byte header
//!   (`tag`, `length`, `version`, `span`) followed by its bytes padded to 4
//!
//! The writer stores each record's padded size (header plus padded bytes) in
//! `span`. Readers step over `16 + align4(length)` regardless, since other
//! writers are known to put the padded payload size or zero there. For `NAME`
//! the length includes the NUL terminator.

use std::fs;
use std::path::{Component, Path, PathBuf};

use itertools::Itertools;
use rootcause::Report;
use thiserror::Error;
use tracing::debug;

use crate::data::parser_utils::{ByteCursor, ByteWriter, CursorError, Tag, align4};

pub const RES_MAGIC: Tag = Tag(*b"ILFF");
pub const RES_INDEX: Tag = Tag(*b"IRES");
pub const NAME_TAG: Tag = Tag(*b"NAME");
pub const BODY_TAG: Tag = Tag(*b"BODY");
pub const RES_VERSION: u32 = 4;
/// Outer header plus the index signature.
pub const ARCHIVE_HEADER_SIZE: usize = 20;
pub const RECORD_HEADER_SIZE: usize = 16;
/// Prefix every stored file name carries.
pub const LOCAL_PREFIX: &str = "LOCAL:";

#[derive(Debug, Error)]
pub enum ResError {
    #[error("buffer too small for a resource archive: {len} bytes")]
    TooSmall { len: usize },
    #[error("bad archive signature: expected {}, got {found}", RES_MAGIC)]
    BadSignature { found: Tag },
    #[error("bad resource index signature: expected {}, got {found}", RES_INDEX)]
    BadIndexSignature { found: Tag },
    #[error("corrupt record at 0x{offset:X}: {reason} ({} entries recovered)", .recovered.len())]
    CorruptArchive {
        offset: usize,
        reason: String,
        /// Entries decoded before the damage.
        recovered: Vec<ResFileEntry>,
    },
    #[error("entry {name:?} of {len} bytes does not fit a 32-bit archive")]
    EntryTooLarge { name: String, len: usize },
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Prepend [`LOCAL_PREFIX`] unless `name` already has it.
pub fn normalize_name(name: &str) -> String {
    if name.starts_with(LOCAL_PREFIX) {
        name.to_string()
    } else {
        format!("{LOCAL_PREFIX}{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ResFileEntry {
    /// Logical path, always carrying [`LOCAL_PREFIX`].
    pub name: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub data: Vec<u8>,
}

impl ResFileEntry {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        ResFileEntry {
            name: normalize_name(name),
            data,
        }
    }

    /// Name without the `LOCAL:` prefix.
    pub fn display_name(&self) -> &str {
        self.name.strip_prefix(LOCAL_PREFIX).unwrap_or(&self.name)
    }

    /// Relative path to extract this entry to. Drive, parent and root
    /// components are dropped so the result stays below the target directory.
    pub fn relative_path(&self) -> PathBuf {
        self.display_name()
            .split(['/', '\\'])
            .map(|part| part.replace(':', "_"))
            .filter(|part| {
                matches!(Path::new(part).components().next(), Some(Component::Normal(_)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ResArchive {
    pub files: Vec<ResFileEntry>,
    /// Size claimed by the header. Not validated.
    pub total_size: u32,
}

impl ResArchive {
    /// Look up an entry by name, with or without the `LOCAL:` prefix.
    /// Comparison ignores ASCII case.
    pub fn find(&self, name: &str) -> Option<&ResFileEntry> {
        let wanted = normalize_name(name);
        self.files.iter().find(|f| f.name.eq_ignore_ascii_case(&wanted))
    }

    /// Write every entry below `dir`, creating directories as needed.
    pub fn extract_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, Report<ResError>> {
        let mut written = Vec::with_capacity(self.files.len());
        for (i, entry) in self.files.iter().enumerate() {
            let mut relative = entry.relative_path();
            if relative.as_os_str().is_empty() {
                relative = PathBuf::from(format!("entry_{i}"));
            }
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| ResError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, &entry.data).map_err(|source| ResError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(name = %entry.name, path = %path.display(), "extracted");
            written.push(path);
        }
        Ok(written)
    }
}

struct RecordHeader {
    tag: Tag,
    length: u32,
    version: u32,
    span: u32,
}

fn read_record_header(cursor: &mut ByteCursor<'_>) -> Result<RecordHeader, CursorError> {
    Ok(RecordHeader {
        tag: cursor.read_tag()?,
        length: cursor.read_u32_le()?,
        version: cursor.read_u32_le()?,
        span: cursor.read_u32_le()?,
    })
}

/// Bytes up to the first NUL, one character per byte.
fn decode_name(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Single-byte encoding with a NUL terminator. Characters above U+00FF
/// become `?`.
fn encode_name(name: &str) -> Vec<u8> {
    name.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .chain(std::iter::once(0))
        .collect()
}

/// Position of the next record, given the start of the current one.
fn record_end(start: usize, header: &RecordHeader) -> usize {
    let padded = RECORD_HEADER_SIZE + align4(header.length as usize);
    if header.span as usize != padded {
        debug!(
            tag = %header.tag,
            span = header.span,
            expected = padded,
            "record span differs from padded length"
        );
    }
    start + padded
}

/// Read one NAME/BODY pair. `Ok(None)` means the next tag is not `NAME`.
fn read_entry(cursor: &mut ByteCursor<'_>) -> Result<Option<ResFileEntry>, String> {
    if cursor.clone().read_tag().ok() != Some(NAME_TAG) {
        return Ok(None);
    }

    let name_start = cursor.position();
    let header = read_record_header(cursor).map_err(|e| format!("NAME header: {e}"))?;
    let raw = cursor
        .read_bytes(header.length as usize)
        .map_err(|e| format!("file name: {e}"))?;
    let name = decode_name(raw);
    let body_start = record_end(name_start, &header);
    cursor
        .seek(body_start as i64, false)
        .map_err(|e| format!("skipping name padding of {name:?}: {e}"))?;
    if header.version != RES_VERSION {
        debug!(%name, version = header.version, "unexpected NAME record version");
    }

    let body = read_record_header(cursor).map_err(|e| format!("BODY header of {name:?}: {e}"))?;
    if body.tag != BODY_TAG {
        return Err(format!("expected {BODY_TAG} after {name:?}, found {}", body.tag));
    }
    let data = cursor
        .read_bytes(body.length as usize)
        .map_err(|e| format!("body of {name:?}: {e}"))?;
    // Trailing padding of the last body may be missing.
    let next = record_end(body_start, &body).min(cursor.len());
    cursor
        .seek(next as i64, false)
        .map_err(|e| format!("skipping body padding of {name:?}: {e}"))?;

    Ok(Some(ResFileEntry {
        name: normalize_name(&name),
        data: data.to_vec(),
    }))
}

/// Decode a resource archive.
///
/// Records are read until the buffer ends or a tag other than `NAME` shows
/// up. A `NAME` record that is not followed by a well formed `BODY` fails
/// with [`ResError::CorruptArchive`], which still carries the entries read
/// so far.
pub fn decode_archive(data: &[u8]) -> Result<ResArchive, Report<ResError>> {
    if data.len() < ARCHIVE_HEADER_SIZE {
        return Err(Report::new(ResError::TooSmall { len: data.len() }));
    }

    let mut cursor = ByteCursor::new(data);
    let too_small = |_| ResError::TooSmall { len: data.len() };
    let magic = cursor.read_tag().map_err(too_small)?;
    if magic != RES_MAGIC {
        return Err(Report::new(ResError::BadSignature { found: magic }));
    }
    let total_size = cursor.read_u32_le().map_err(too_small)?;
    let version = cursor.read_u32_le().map_err(too_small)?;
    let _reserved = cursor.read_u32_le().map_err(too_small)?;
    let index = cursor.read_tag().map_err(too_small)?;
    if index != RES_INDEX {
        return Err(Report::new(ResError::BadIndexSignature { found: index }));
    }
    debug!(total_size, version, len = data.len(), "decoding resource archive");

    let mut files = Vec::new();
    loop {
        let offset = cursor.position();
        match read_entry(&mut cursor) {
            Ok(Some(entry)) => {
                debug!(name = %entry.name, bytes = entry.data.len(), offset, "entry");
                files.push(entry);
            }
            Ok(None) => break,
            Err(reason) => {
                return Err(Report::new(ResError::CorruptArchive {
                    offset,
                    reason,
                    recovered: files,
                }));
            }
        }
    }

    Ok(ResArchive { files, total_size })
}

/// Encode `entries` in order. Names are normalized with [`normalize_name`].
pub fn encode_archive(entries: &[ResFileEntry]) -> Result<Vec<u8>, Report<ResError>> {
    let mut records = ByteWriter::new();

    for entry in entries {
        let too_large = || ResError::EntryTooLarge {
            name: entry.name.clone(),
            len: entry.data.len(),
        };
        let name = encode_name(&normalize_name(&entry.name));
        let name_len = u32::try_from(name.len()).map_err(|_| too_large())?;
        let name_span =
            u32::try_from(RECORD_HEADER_SIZE + align4(name.len())).map_err(|_| too_large())?;
        let data_len = u32::try_from(entry.data.len()).map_err(|_| too_large())?;
        let body_span =
            u32::try_from(RECORD_HEADER_SIZE + align4(entry.data.len())).map_err(|_| too_large())?;

        records.write_tag(NAME_TAG);
        records.write_u32_le(name_len);
        records.write_u32_le(RES_VERSION);
        records.write_u32_le(name_span);
        records.write_bytes(&name);
        records.pad_to(4);

        records.write_tag(BODY_TAG);
        records.write_u32_le(data_len);
        records.write_u32_le(RES_VERSION);
        records.write_u32_le(body_span);
        records.write_bytes(&entry.data);
        records.pad_to(4);
    }

    let total = ARCHIVE_HEADER_SIZE + records.len();
    let total_size = u32::try_from(total).map_err(|_| ResError::EntryTooLarge {
        name: String::from("<archive>"),
        len: total,
    })?;

    let mut w = ByteWriter::with_capacity(total);
    w.write_tag(RES_MAGIC);
    w.write_u32_le(total_size);
    w.write_u32_le(RES_VERSION);
    w.write_u32_le(0);
    w.write_tag(RES_INDEX);
    w.write_bytes(&records.into_inner());

    debug!(entries = entries.len(), bytes = total, "encoded resource archive");
    Ok(w.into_inner())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<ResFileEntry>) -> Result<(), ResError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ResError::Io { path, source }
    };

    let mut children = fs::read_dir(dir)
        .map_err(io(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io(dir))?;
    children.sort();

    for path in children {
        if path.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .join("/");
        let data = fs::read(&path).map_err(io(&path))?;
        out.push(ResFileEntry::new(&name, data));
    }
    Ok(())
}

/// Archive every file below `dir`, in sorted path order, named by their path
/// relative to `dir` with `/` separators.
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>, Report<ResError>> {
    let mut entries = Vec::new();
    collect_files(dir, dir, &mut entries)?;
    encode_archive(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ResFileEntry> {
        vec![
            ResFileEntry::new("models/a.mef", vec![1, 2, 3, 4, 5]),
            ResFileEntry::new("LOCAL:b.mef", vec![]),
            ResFileEntry::new("c.txt", b"hello".to_vec()),
        ]
    }

    #[test]
    fn single_entry_layout() {
        let data = encode_archive(&[ResFileEntry::new("a", vec![7, 8])]).unwrap();
        // "LOCAL:a\0" is 8 bytes, body 2 bytes padded to 4.
        assert_eq!(data.len(), 20 + 16 + 8 + 16 + 4);
        assert_eq!(&data[0..4], b"ILFF");
        assert_eq!(&data[4..8], &(data.len() as u32).to_le_bytes());
        assert_eq!(&data[8..12], &4u32.to_le_bytes());
        assert_eq!(&data[16..20], b"IRES");
        assert_eq!(&data[20..24], b"NAME");
        assert_eq!(&data[24..28], &8u32.to_le_bytes());
        assert_eq!(&data[32..36], &24u32.to_le_bytes());
        assert_eq!(&data[36..44], b"LOCAL:a\0");
        assert_eq!(&data[44..48], b"BODY");
        assert_eq!(&data[48..52], &2u32.to_le_bytes());
        assert_eq!(&data[56..60], &20u32.to_le_bytes());
        assert_eq!(&data[60..64], &[7, 8, 0, 0]);
    }

    #[test]
    fn round_trip_preserves_order() {
        let entries = sample();
        let data = encode_archive(&entries).unwrap();
        let archive = decode_archive(&data).unwrap();

        assert_eq!(archive.files, entries);
        assert_eq!(archive.total_size as usize, data.len());
        assert_eq!(archive.files[0].name, "LOCAL:models/a.mef");
        assert_eq!(archive.files[0].display_name(), "models/a.mef");
        assert!(archive.find("C.TXT").is_some());
        assert!(archive.find("LOCAL:b.mef").is_some());
        assert!(archive.find("missing").is_none());
    }

    #[test]
    fn empty_archive() {
        let data = encode_archive(&[]).unwrap();
        assert_eq!(data.len(), ARCHIVE_HEADER_SIZE);
        assert!(decode_archive(&data).unwrap().files.is_empty());
    }

    #[test]
    fn rejects_bad_headers() {
        let err = decode_archive(b"ILFF").unwrap_err();
        assert!(matches!(err.current_context(), ResError::TooSmall { len: 4 }));

        let mut data = encode_archive(&sample()).unwrap();
        data[0] = b'X';
        let err = decode_archive(&data).unwrap_err();
        assert!(matches!(err.current_context(), ResError::BadSignature { .. }));

        let mut data = encode_archive(&sample()).unwrap();
        data[16..20].copy_from_slice(b"SERI");
        let err = decode_archive(&data).unwrap_err();
        assert!(matches!(err.current_context(), ResError::BadIndexSignature { .. }));
    }

    #[test]
    fn corrupt_body_keeps_earlier_entries() {
        let mut data = encode_archive(&sample()).unwrap();
        // Second entry's BODY tag: after entry one (16 + 20 + 16 + 8) and the
        // second NAME record (16 + 12).
        let second_body = 20 + 60 + 28;
        assert_eq!(&data[second_body..second_body + 4], b"BODY");
        data[second_body..second_body + 4].copy_from_slice(b"JUNK");

        let err = decode_archive(&data).unwrap_err();
        match err.current_context() {
            ResError::CorruptArchive {
                offset, recovered, ..
            } => {
                assert_eq!(*offset, 80);
                assert_eq!(recovered.len(), 1);
                assert_eq!(recovered[0].data, vec![1, 2, 3, 4, 5]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn span_field_is_not_trusted() {
        let entries = sample();
        let data = encode_archive(&entries).unwrap();
        // First BODY header starts after the first NAME record (16 + 20).
        let first_body_span = 20 + 36 + 12;
        // Last BODY: its 5 payload bytes are padded to 8 at the very end.
        let last_body_span = data.len() - 8 - 4;

        let mut payload_only = data.clone();
        payload_only[first_body_span..first_body_span + 4].copy_from_slice(&8u32.to_le_bytes());
        assert_eq!(decode_archive(&payload_only).unwrap().files, entries);

        let mut zero_tail = data.clone();
        zero_tail[last_body_span..last_body_span + 4].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(decode_archive(&zero_tail).unwrap().files, entries);
    }

    #[test]
    fn stops_at_foreign_tag() {
        let mut data = encode_archive(&sample()[..1]).unwrap();
        data.extend_from_slice(b"TAILxxxxxxxx");
        let archive = decode_archive(&data).unwrap();
        assert_eq!(archive.files.len(), 1);
    }

    #[test]
    fn names_are_single_byte() {
        let data = encode_archive(&[ResFileEntry::new("caf\u{e9}", vec![0])]).unwrap();
        assert_eq!(&data[36..47], b"LOCAL:caf\xe9\0");
        let archive = decode_archive(&data).unwrap();
        assert_eq!(archive.files[0].name, "LOCAL:caf\u{e9}");
    }

    #[test]
    fn relative_path_stays_inside() {
        let entry = ResFileEntry::new("../../etc/passwd", vec![]);
        assert_eq!(entry.relative_path(), PathBuf::from("etc").join("passwd"));
        let entry = ResFileEntry::new("C:\\models\\x.mef", vec![]);
        assert_eq!(
            entry.relative_path(),
            PathBuf::from("C_").join("models").join("x.mef")
        );
    }

    #[test]
    fn pack_and_extract_directory() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("models")).unwrap();
        fs::write(src.path().join("models/tree.mef"), [1u8, 2, 3]).unwrap();
        fs::write(src.path().join("readme.txt"), b"hi").unwrap();

        let data = pack_dir(src.path()).unwrap();
        let archive = decode_archive(&data).unwrap();
        let names: Vec<_> = archive.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["LOCAL:models/tree.mef", "LOCAL:readme.txt"]);

        let dst = tempfile::tempdir().unwrap();
        let written = archive.extract_to_dir(dst.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read(dst.path().join("models/tree.mef")).unwrap(), [1, 2, 3]);
        assert_eq!(fs::read(dst.path().join("readme.txt")).unwrap(), b"hi");
    }
}
