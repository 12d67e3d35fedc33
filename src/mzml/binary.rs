//! Binary data decoding for mzML
//!
//! mzML stores numerical arrays (m/z, intensity, time) as Base64-encoded
//! binary data, optionally compressed with zlib. The pipeline is:
//!
//! 1. Strict Base64 decode of the element text
//! 2. zlib inflate when the array is marked compressed
//! 3. Little-endian reinterpretation as float32, float64, int32 or int64,
//!    widened to float64
//!
//! Step 3 reads through `byteorder`, so decoding is correct on any host
//! byte order.

use std::io::Write;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::error::ErrorKind;

/// Inflate scratch buffer size.
const INFLATE_CHUNK: usize = 16 * 1024;

/// Largest compressed payload accepted (4 GiB).
const MAX_COMPRESSED_LEN: usize = u32::MAX as usize;

/// Padding and trailing-bit checks are done up front, so the engine only
/// has to reject bytes outside the alphabet.
const STRICT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical)
        .with_decode_allow_trailing_bits(true),
);

/// Errors that can occur during binary decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BinaryDecodeError {
    /// Text violates strict RFC 4648 Base64
    #[error("base64: {0}")]
    Base64(String),

    /// zlib payload failed to inflate
    #[error("zlib: {0}")]
    Inflate(String),

    /// Byte count is not a whole number of elements
    #[error("binary: byte count {len} is not a multiple of {width}")]
    Length {
        /// Decoded byte count
        len: usize,
        /// Element width in bytes
        width: usize,
    },
}

impl BinaryDecodeError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BinaryDecodeError::Base64(_) => ErrorKind::MalformedInput,
            BinaryDecodeError::Inflate(_) => ErrorKind::Corrupt,
            BinaryDecodeError::Length { .. } => ErrorKind::SizeMismatch,
        }
    }
}

fn is_b64_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_b64_symbol(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

/// Strict Base64 decode.
///
/// Whitespace is removed only when a first scan finds some. The remaining
/// text must be a whole number of 4-character groups; `=` may appear only in
/// positions 2 and 3 of the final group and nothing may follow it.
pub fn base64_decode(text: &str) -> Result<Vec<u8>, BinaryDecodeError> {
    let raw = text.as_bytes();
    let cleaned;
    let data: &[u8] = if raw.iter().any(|&b| is_b64_space(b)) {
        cleaned = raw.iter().copied().filter(|&b| !is_b64_space(b)).collect::<Vec<u8>>();
        &cleaned
    } else {
        raw
    };
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() % 4 != 0 {
        return Err(BinaryDecodeError::Base64(
            "input length is not a multiple of 4".to_string(),
        ));
    }

    let last_group = data.len() / 4 - 1;
    let mut seen_padding = false;
    for (i, &b) in data.iter().enumerate() {
        if b == b'=' {
            if i / 4 != last_group || i % 4 < 2 {
                return Err(BinaryDecodeError::Base64(format!(
                    "padding '=' at invalid position {i}"
                )));
            }
            seen_padding = true;
        } else if !is_b64_symbol(b) {
            return Err(BinaryDecodeError::Base64(format!(
                "invalid character 0x{b:02x} at position {i}"
            )));
        } else if seen_padding {
            return Err(BinaryDecodeError::Base64("data after padding".to_string()));
        }
    }

    STRICT
        .decode(data)
        .map_err(|e| BinaryDecodeError::Base64(e.to_string()))
}

/// Base64 encode, used by tests and benchmarks to build fixtures.
pub fn base64_encode(bytes: &[u8]) -> String {
    STRICT.encode(bytes)
}

/// Inflate a zlib-wrapped deflate stream through a fixed-size buffer.
pub fn zlib_inflate(compressed: &[u8]) -> Result<Vec<u8>, BinaryDecodeError> {
    if compressed.is_empty() {
        return Ok(Vec::new());
    }
    if compressed.len() > MAX_COMPRESSED_LEN {
        return Err(BinaryDecodeError::Inflate(
            "input too large for zlib (> 4 GiB)".to_string(),
        ));
    }

    let mut stream = Decompress::new(true);
    let mut out = Vec::with_capacity(compressed.len() * 4);
    let mut chunk = [0u8; INFLATE_CHUNK];
    loop {
        let in_before = stream.total_in();
        let out_before = stream.total_out();
        let consumed = in_before as usize;
        let status = stream
            .decompress(&compressed[consumed..], &mut chunk, FlushDecompress::None)
            .map_err(|e| BinaryDecodeError::Inflate(format!("corrupt or invalid data: {e}")))?;
        let produced = (stream.total_out() - out_before) as usize;
        out.extend_from_slice(&chunk[..produced]);
        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                if produced == 0 && stream.total_in() == in_before {
                    return Err(BinaryDecodeError::Inflate(
                        "truncated compressed stream".to_string(),
                    ));
                }
            }
        }
    }
}

/// zlib-compress `data` at the default level.
pub fn zlib_deflate(data: &[u8]) -> Result<Vec<u8>, BinaryDecodeError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| BinaryDecodeError::Inflate(format!("deflate failed: {e}")))
}

/// Reinterpret little-endian bytes as float64 values.
pub fn bytes_to_f64(bytes: &[u8]) -> Result<Vec<f64>, BinaryDecodeError> {
    if bytes.len() % 8 != 0 {
        return Err(BinaryDecodeError::Length {
            len: bytes.len(),
            width: 8,
        });
    }
    let mut values = vec![0f64; bytes.len() / 8];
    LittleEndian::read_f64_into(bytes, &mut values);
    Ok(values)
}

/// Reinterpret little-endian bytes as float32 values, widened to float64.
pub fn bytes_to_f32_as_f64(bytes: &[u8]) -> Result<Vec<f64>, BinaryDecodeError> {
    if bytes.len() % 4 != 0 {
        return Err(BinaryDecodeError::Length {
            len: bytes.len(),
            width: 4,
        });
    }
    let mut narrow = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(bytes, &mut narrow);
    Ok(narrow.into_iter().map(f64::from).collect())
}

/// Reinterpret little-endian bytes as int32 values, widened to float64.
pub fn bytes_to_i32_as_f64(bytes: &[u8]) -> Result<Vec<f64>, BinaryDecodeError> {
    if bytes.len() % 4 != 0 {
        return Err(BinaryDecodeError::Length {
            len: bytes.len(),
            width: 4,
        });
    }
    let mut ints = vec![0i32; bytes.len() / 4];
    LittleEndian::read_i32_into(bytes, &mut ints);
    Ok(ints.into_iter().map(f64::from).collect())
}

/// Reinterpret little-endian bytes as int64 values, converted to float64.
///
/// Magnitudes above 2^53 lose precision.
pub fn bytes_to_i64_as_f64(bytes: &[u8]) -> Result<Vec<f64>, BinaryDecodeError> {
    if bytes.len() % 8 != 0 {
        return Err(BinaryDecodeError::Length {
            len: bytes.len(),
            width: 8,
        });
    }
    let mut ints = vec![0i64; bytes.len() / 8];
    LittleEndian::read_i64_into(bytes, &mut ints);
    Ok(ints.into_iter().map(|v| v as f64).collect())
}

/// Element type declared by a `<binaryDataArray>`'s cvParams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArrayEncoding {
    /// MS:1000523
    #[default]
    Float64,
    /// MS:1000521
    Float32,
    /// MS:1000519
    Int32,
    /// MS:1000522
    Int64,
}

/// Full pipeline for one `<binary>` element.
pub fn decode(
    text: &str,
    compressed: bool,
    encoding: ArrayEncoding,
) -> Result<Vec<f64>, BinaryDecodeError> {
    let mut bytes = base64_decode(text)?;
    if compressed {
        bytes = zlib_inflate(&bytes)?;
    }
    match encoding {
        ArrayEncoding::Float64 => bytes_to_f64(&bytes),
        ArrayEncoding::Float32 => bytes_to_f32_as_f64(&bytes),
        ArrayEncoding::Int32 => bytes_to_i32_as_f64(&bytes),
        ArrayEncoding::Int64 => bytes_to_i64_as_f64(&bytes),
    }
}

/// Encode doubles the way an mzML writer would; used to build fixtures.
pub fn encode_f64(values: &[f64], compress: bool) -> Result<String, BinaryDecodeError> {
    let mut bytes = vec![0u8; values.len() * 8];
    LittleEndian::write_f64_into(values, &mut bytes);
    if compress {
        bytes = zlib_deflate(&bytes)?;
    }
    Ok(base64_encode(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base64_known_vectors() {
        assert_eq!(base64_decode("").unwrap(), b"");
        assert_eq!(base64_decode("Zg==").unwrap(), b"f");
        assert_eq!(base64_decode("Zm8=").unwrap(), b"fo");
        assert_eq!(base64_decode("Zm9v").unwrap(), b"foo");
        assert_eq!(base64_decode("Zm9v\nYmFy\r\n").unwrap(), b"foobar");
    }

    #[test]
    fn test_base64_rejects_bad_input() {
        for bad in ["Zm9", "Z===", "=m9v", "Zm=v", "Zg==Zm9v", "Zm9$", "Zg=a"] {
            let err = base64_decode(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedInput, "{bad}");
        }
    }

    #[test]
    fn test_whitespace_only_is_empty() {
        assert!(base64_decode(" \n\t").unwrap().is_empty());
    }

    #[test]
    fn test_inflate_rejects_garbage() {
        let err = zlib_inflate(b"not zlib at all").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_inflate_rejects_truncated_stream() {
        let compressed = zlib_deflate(&[7u8; 4096]).unwrap();
        let err = zlib_inflate(&compressed[..compressed.len() / 2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_float_widths() {
        assert_eq!(bytes_to_f64(&1.5f64.to_le_bytes()).unwrap(), vec![1.5]);
        assert_eq!(bytes_to_f32_as_f64(&2.5f32.to_le_bytes()).unwrap(), vec![2.5]);
        assert_eq!(bytes_to_f64(&[0u8; 12]).unwrap_err().kind(), ErrorKind::SizeMismatch);
        assert_eq!(bytes_to_f32_as_f64(&[0u8; 6]).unwrap_err().kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_integer_widths() {
        let mut bytes = 100i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-7i32).to_le_bytes());
        assert_eq!(bytes_to_i32_as_f64(&bytes).unwrap(), vec![100.0, -7.0]);
        assert_eq!(bytes_to_i64_as_f64(&42i64.to_le_bytes()).unwrap(), vec![42.0]);
        assert_eq!(bytes_to_i64_as_f64(&[0u8; 4]).unwrap_err().kind(), ErrorKind::SizeMismatch);

        let text = base64_encode(&bytes);
        assert_eq!(
            decode(&text, false, ArrayEncoding::Int32).unwrap(),
            vec![100.0, -7.0]
        );
    }

    #[test]
    fn test_decode_pipeline() {
        let text = encode_f64(&[100.0, 200.0], true).unwrap();
        assert_eq!(
            decode(&text, true, ArrayEncoding::Float64).unwrap(),
            vec![100.0, 200.0]
        );
        let text = encode_f64(&[1.0], false).unwrap();
        assert_eq!(decode(&text, false, ArrayEncoding::Float64).unwrap(), vec![1.0]);
    }

    proptest! {
        #[test]
        fn prop_base64_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(base64_decode(&base64_encode(&bytes)).unwrap(), bytes);
        }

        #[test]
        fn prop_zlib_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let compressed = zlib_deflate(&bytes).unwrap();
            prop_assert_eq!(zlib_inflate(&compressed).unwrap(), bytes);
        }
    }
}
