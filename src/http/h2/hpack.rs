//! HPACK header compression (RFC 7541)
//!
//! Thin wrappers around the `hpack` crate. One encoder and one decoder live
//! per connection; both are stateful, so every header block received must
//! be decoded in order, including blocks of refused streams.

use super::error::{Error, Result};
use bytes::Bytes;

/// Per-entry overhead counted by SETTINGS_MAX_HEADER_LIST_SIZE
const ENTRY_OVERHEAD: usize = 32;

/// A decoded header field
pub type HeaderField = (Vec<u8>, Vec<u8>);

/// Size of a header list as RFC 7540 Section 6.5.2 defines it
pub fn header_list_size(fields: &[HeaderField]) -> usize {
    fields
        .iter()
        .map(|(name, value)| name.len() + value.len() + ENTRY_OVERHEAD)
        .sum()
}

/// Header block encoder
pub struct HpackEncoder {
    inner: hpack::Encoder<'static>,
}

impl HpackEncoder {
    pub fn new() -> Self {
        HpackEncoder {
            inner: hpack::Encoder::new(),
        }
    }

    /// Encode an ordered field list into one header block
    pub fn encode<'h, I>(&mut self, fields: I) -> Bytes
    where
        I: IntoIterator<Item = (&'h [u8], &'h [u8])>,
    {
        Bytes::from(self.inner.encode(fields))
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish_non_exhaustive()
    }
}

/// Header block decoder
pub struct HpackDecoder {
    inner: hpack::Decoder<'static>,
}

impl HpackDecoder {
    pub fn new() -> Self {
        HpackDecoder {
            inner: hpack::Decoder::new(),
        }
    }

    /// Decode a complete header block
    ///
    /// A block that fails to decode leaves the dynamic table in an unknown
    /// state, so the error is always connection-scoped.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        self.inner
            .decode(block)
            .map_err(|e| Error::Compression(format!("{:?}", e)))
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::error::ErrorCode;

    #[test]
    fn test_encode_decode() {
        let mut encoder = HpackEncoder::new();
        let mut decoder = HpackDecoder::new();

        let fields: Vec<(&[u8], &[u8])> = vec![
            (b":method", b"GET"),
            (b":path", b"/api/test"),
            (b"x-dup", b"1"),
            (b"x-dup", b"2"),
        ];
        let block = encoder.encode(fields.iter().copied());
        let decoded = decoder.decode(&block).unwrap();

        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[1], (b":path".to_vec(), b"/api/test".to_vec()));
        assert_eq!(decoded[3], (b"x-dup".to_vec(), b"2".to_vec()));
    }

    #[test]
    fn test_decoder_state_spans_blocks() {
        let mut encoder = HpackEncoder::new();
        let mut decoder = HpackDecoder::new();

        for _ in 0..3 {
            let block = encoder.encode([(&b"content-type"[..], &b"application/json"[..])]);
            let decoded = decoder.decode(&block).unwrap();
            assert_eq!(decoded[0].1, b"application/json");
        }
    }

    #[test]
    fn test_invalid_block() {
        let mut decoder = HpackDecoder::new();
        // indexed field with index 0 is never valid
        let err = decoder.decode(&[0x80]).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::CompressionError);
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_header_list_size() {
        let fields = vec![
            (b":path".to_vec(), b"/".to_vec()),
            (b"a".to_vec(), b"bc".to_vec()),
        ];
        assert_eq!(header_list_size(&fields), (5 + 1 + 32) + (1 + 2 + 32));
    }
}
