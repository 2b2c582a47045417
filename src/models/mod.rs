/// Mesh assembly from decoded chunk tables
pub mod mesh;
/// MEF model files (`.mef`)
pub mod mef;
/// Wavefront OBJ import and export
pub mod obj;
/// Vertex record layouts and stride detection
pub mod vertex_format;
