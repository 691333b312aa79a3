//! Raw-zlib payload compression.
//!
//! Compression is optional per stream: the sender records the
//! pre-compression byte count in `DeviceMessage::original_size`, and 0 is the
//! "not compressed" sentinel. Both peers must therefore agree that a
//! compressed payload always has `original_size > 0`.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::framer::FramerError;

/// Compress `data` with zlib.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, FramerError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| FramerError::CannotSerialize(e.to_string()))
}

/// Decompress `data`, expecting exactly `original_size` bytes out.
pub fn decompress(data: &[u8], original_size: u32) -> Result<Vec<u8>, FramerError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut output = Vec::with_capacity(original_size as usize);
    decoder
        .read_to_end(&mut output)
        .map_err(|e| FramerError::CannotDecompress(e.to_string()))?;

    if output.len() != original_size as usize {
        return Err(FramerError::CannotDecompress(format!(
            "expected {} bytes, got {}",
            original_size,
            output.len()
        )));
    }
    Ok(output)
}
