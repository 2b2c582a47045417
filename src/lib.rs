/// Low level byte handling plus the container and archive codecs
pub mod data;
/// Structured, call-scoped log of recoverable decode problems
pub mod diagnostics;
/// 3D model formats (MEF, OBJ) and mesh assembly
pub mod models;
/// Generic wrapper for values that may or may not match a known variant.
pub mod recognized;

pub use data::res::{ResArchive, ResFileEntry, decode_archive, encode_archive};
pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticLog, Severity};
pub use models::mef::{MeshSource, Model, ParseOptions, convert_obj, encode_minimal, parse};
