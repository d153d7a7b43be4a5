//! Chunked transfer encoding support
//!
//! The decoder is incremental: the HTTP/1.1 request parser feeds it whatever
//! bytes arrived and it reports how much it consumed.

use super::{Error, Result};

/// Longest chunk-size line accepted, extensions included
const MAX_SIZE_LINE: usize = 1024;

/// Incremental chunked decoder
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_remaining: usize,
    max_body: usize,
    decoded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Create a decoder that rejects bodies larger than `max_body`
    pub fn new(max_body: usize) -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_remaining: 0,
            max_body,
            decoded: 0,
        }
    }

    /// Decode as much of `input` as possible, appending body bytes to `output`
    ///
    /// Returns `(bytes_consumed, is_complete)`. Unconsumed bytes must be fed
    /// again once more data is available.
    pub fn decode(&mut self, input: &[u8], output: &mut Vec<u8>) -> Result<(usize, bool)> {
        let mut pos = 0;

        loop {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf) = find_crlf(&input[pos..]) else {
                        if input.len() - pos > MAX_SIZE_LINE {
                            return Err(Error::InvalidChunkSize("size line too long".into()));
                        }
                        break;
                    };
                    let line = std::str::from_utf8(&input[pos..pos + crlf])
                        .map_err(|_| Error::InvalidChunkSize("non-UTF-8 size line".into()))?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;

                    if self.decoded.saturating_add(size) > self.max_body {
                        return Err(Error::BodyTooLarge(self.max_body));
                    }

                    pos += crlf + 2;
                    self.chunk_remaining = size;
                    self.state = if size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let take = self.chunk_remaining.min(input.len() - pos);
                    if take == 0 {
                        break;
                    }
                    output.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.decoded += take;
                    self.chunk_remaining -= take;
                    if self.chunk_remaining == 0 {
                        self.state = DecoderState::ChunkEnd;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    // Trailer fields are skipped up to the terminating empty line
                    let Some(crlf) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    pos += crlf + 2;
                    if crlf == 0 {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok((pos, self.is_complete()))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }
}

/// Find CRLF in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
