//! Blob codec for task payloads.
//!
//! Payloads are stored as zlib-compressed bytes. Text goes
//! `&str -> UTF-8 bytes -> compressed bytes`; a [`SourceMap`] is first
//! serialized to a flat JSON object. Decoding is the exact inverse, so any
//! value survives a round trip unchanged.
//!
//! An empty blob is never produced by encoding (zlib always emits a header)
//! and is treated by readers as "no payload".

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::domain::SourceMap;
use crate::error::CodecError;

/// Compresses raw bytes.
///
/// # Examples
///
/// ```
/// use docqueue::codec::{compress, decompress};
///
/// let packed = compress(b"hello hello hello").unwrap();
/// assert_eq!(decompress(&packed).unwrap(), b"hello hello hello");
/// ```
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses bytes produced by [`compress`].
///
/// # Errors
///
/// Returns [`CodecError::Compression`] if `data` is not a valid zlib stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Encodes text for storage.
pub fn encode_text(text: &str) -> Result<Vec<u8>, CodecError> {
    compress(text.as_bytes())
}

/// Decodes text written by [`encode_text`].
pub fn decode_text(blob: &[u8]) -> Result<String, CodecError> {
    Ok(String::from_utf8(decompress(blob)?)?)
}

/// Encodes a source map as compressed JSON.
///
/// # Examples
///
/// ```
/// use docqueue::codec::{decode_sources, encode_sources};
/// use docqueue::SourceMap;
///
/// let mut sources = SourceMap::new();
/// sources.insert("main.py".to_string(), "print(1)".to_string());
///
/// let blob = encode_sources(&sources).unwrap();
/// assert_eq!(decode_sources(&blob).unwrap(), sources);
/// ```
pub fn encode_sources(sources: &SourceMap) -> Result<Vec<u8>, CodecError> {
    let text = serde_json::to_string(sources)?;
    encode_text(&text)
}

/// Decodes a source map written by [`encode_sources`].
pub fn decode_sources(blob: &[u8]) -> Result<SourceMap, CodecError> {
    let text = decode_text(blob)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        for text in ["", "a", "héllo wörld", "line1\nline2\n"] {
            let blob = encode_text(text).unwrap();
            assert_eq!(decode_text(&blob).unwrap(), text);
        }
    }

    #[test]
    fn encoded_blobs_are_never_empty() {
        assert!(!encode_text("").unwrap().is_empty());
        assert!(!encode_sources(&SourceMap::new()).unwrap().is_empty());
    }

    #[test]
    fn repetitive_input_compresses() {
        let text = "abcdefgh".repeat(512);
        let blob = encode_text(&text).unwrap();
        assert!(blob.len() < text.len());
    }

    #[test]
    fn empty_source_map_round_trips() {
        let blob = encode_sources(&SourceMap::new()).unwrap();
        assert!(decode_sources(&blob).unwrap().is_empty());
    }

    #[test]
    fn corrupt_blob_is_an_error() {
        let err = decode_text(b"definitely not zlib").unwrap_err();
        assert!(matches!(err, CodecError::Compression(_)));
    }

    #[test]
    fn non_utf8_payload_is_an_error() {
        let blob = compress(&[0xff, 0xfe, 0xfd]).unwrap();
        assert!(matches!(decode_text(&blob), Err(CodecError::Utf8(_))));
    }

    #[test]
    fn non_object_sources_are_an_error() {
        let blob = encode_text("[1, 2, 3]").unwrap();
        assert!(matches!(decode_sources(&blob), Err(CodecError::Json(_))));
    }
}
