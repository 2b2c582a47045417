/// Codec for the `ILFF` tagged-chunk container shared by model files
pub mod ilff;
/// Byte cursor, byte writer and four-character tags
pub mod parser_utils;
/// Codec for `.res` resource archives
pub mod res;
