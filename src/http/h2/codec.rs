//! HTTP/2 frame encoding and decoding
//!
//! Decoding is two-step: [`FrameCodec::next_frame`] cuts raw frames out of
//! the read buffer and enforces the negotiated maximum frame size, then
//! [`FrameCodec::decode`] validates the payload for its type and strips
//! padding and priority fields. Encoders are associated functions so test
//! clients can also write arbitrary (even malformed) frames.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::settings::{Settings, MAX_MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = FRAME_HEADER_LEN;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = MAX_MAX_FRAME_SIZE as usize;

/// Frame codec for encoding/decoding HTTP/2 frames
#[derive(Debug)]
pub struct FrameCodec {
    read_buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        FrameCodec {
            read_buffer: BytesMut::with_capacity(16 * 1024),
        }
    }

    /// Append bytes read from the socket
    pub fn feed(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
    }

    /// Number of buffered, not yet decoded bytes
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    /// Remove exactly `n` leading bytes, if that many are buffered
    ///
    /// Used for the connection preface, which is not a frame.
    pub fn take_bytes(&mut self, n: usize) -> Option<Bytes> {
        if self.read_buffer.len() < n {
            return None;
        }
        Some(self.read_buffer.split_to(n).freeze())
    }

    /// Cut the next complete frame out of the buffer
    ///
    /// Returns `Ok(None)` until a whole frame is buffered. A length above
    /// `max_frame_size` is a connection-level FRAME_SIZE_ERROR.
    pub fn next_frame(&mut self, max_frame_size: u32) -> Result<Option<Frame>> {
        if self.read_buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.read_buffer[..FRAME_HEADER_SIZE]);
        let (frame_type, flags, stream_id, length) = Self::decode_header(&header);

        if length > max_frame_size as usize {
            return Err(Error::FrameSize(format!(
                "frame of {} bytes exceeds maximum {}",
                length, max_frame_size
            )));
        }

        if self.read_buffer.len() < FRAME_HEADER_SIZE + length {
            return Ok(None);
        }

        self.read_buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.read_buffer.split_to(length).freeze();

        Ok(Some(Frame {
            frame_type,
            flags,
            stream_id,
            payload,
        }))
    }

    /// Encode a frame header
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        Self::raw_header(frame_type.as_u8(), flags, stream_id, length)
    }

    fn raw_header(frame_type: u8, flags: FrameFlags, stream_id: u32, length: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type;
        header[4] = flags.as_u8();

        // Stream ID (31 bits, reserved bit is 0)
        header[5..9].copy_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());

        header
    }

    /// Decode a frame header into (type, flags, stream id, payload length)
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, u32, usize) {
        let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let flags = FrameFlags::from_u8(bytes[4]);
        let stream_id = u32::from_be_bytes([bytes[5] & 0x7F, bytes[6], bytes[7], bytes[8]]);

        (bytes[3], flags, stream_id, length)
    }

    /// Validate a raw frame (RFC 7540 Section 6)
    pub fn decode(frame: Frame) -> Result<TypedFrame> {
        let Some(kind) = frame.kind() else {
            return Ok(TypedFrame::Unknown {
                frame_type: frame.frame_type,
                stream_id: frame.stream_id,
            });
        };

        let Frame {
            flags,
            stream_id,
            payload,
            ..
        } = frame;

        match kind {
            FrameType::Data => {
                require_stream(kind, stream_id)?;
                let flow_len = payload.len();
                let data = strip_padding(kind, flags, payload)?;
                Ok(TypedFrame::Data(DataFrame {
                    stream_id,
                    data,
                    end_stream: flags.is_end_stream(),
                    flow_len,
                }))
            }
            FrameType::Headers => {
                require_stream(kind, stream_id)?;
                let mut block = strip_padding(kind, flags, payload)?;
                let mut self_dependent = false;
                if flags.is_priority() {
                    if block.len() < 5 {
                        return Err(Error::FrameSize(
                            "HEADERS too short for priority fields".to_string(),
                        ));
                    }
                    let dependency = block.get_u32() & 0x7FFF_FFFF;
                    block.advance(1);
                    // reported once the block has gone through HPACK
                    self_dependent = dependency == stream_id;
                }
                Ok(TypedFrame::Headers(HeadersFrame {
                    stream_id,
                    header_block: block,
                    end_stream: flags.is_end_stream(),
                    end_headers: flags.is_end_headers(),
                    self_dependent,
                }))
            }
            FrameType::Priority => {
                require_stream(kind, stream_id)?;
                if payload.len() != 5 {
                    return Err(Error::stream(
                        stream_id,
                        ErrorCode::FrameSizeError,
                        "PRIORITY payload must be 5 bytes",
                    ));
                }
                Ok(TypedFrame::Priority { stream_id })
            }
            FrameType::RstStream => {
                require_stream(kind, stream_id)?;
                let mut payload = fixed_len(kind, payload, 4)?;
                Ok(TypedFrame::RstStream(RstStreamFrame {
                    stream_id,
                    error_code: ErrorCode::from_u32(payload.get_u32()),
                }))
            }
            FrameType::Settings => {
                require_connection(kind, stream_id)?;
                if flags.is_ack() {
                    if !payload.is_empty() {
                        return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
                    }
                    return Ok(TypedFrame::Settings(SettingsFrame::ack()));
                }
                if payload.len() % 6 != 0 {
                    return Err(Error::FrameSize(format!(
                        "SETTINGS payload of {} bytes is not a multiple of 6",
                        payload.len()
                    )));
                }
                let mut payload = payload;
                let mut settings = Settings::new();
                while payload.has_remaining() {
                    let id = payload.get_u16();
                    let value = payload.get_u32();
                    settings.set(id, value)?;
                }
                Ok(TypedFrame::Settings(SettingsFrame::new(settings)))
            }
            FrameType::PushPromise => Ok(TypedFrame::PushPromise { stream_id }),
            FrameType::Ping => {
                require_connection(kind, stream_id)?;
                let payload = fixed_len(kind, payload, 8)?;
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                Ok(TypedFrame::Ping(PingFrame {
                    ack: flags.is_ack(),
                    data,
                }))
            }
            FrameType::Goaway => {
                require_connection(kind, stream_id)?;
                if payload.len() < 8 {
                    return Err(Error::FrameSize("GOAWAY shorter than 8 bytes".to_string()));
                }
                let mut payload = payload;
                let last_stream_id = payload.get_u32() & 0x7FFF_FFFF;
                let error_code = ErrorCode::from_u32(payload.get_u32());
                Ok(TypedFrame::Goaway(GoawayFrame {
                    last_stream_id,
                    error_code,
                    debug_data: payload,
                }))
            }
            FrameType::WindowUpdate => {
                let mut payload = fixed_len(kind, payload, 4)?;
                let size_increment = payload.get_u32() & 0x7FFF_FFFF;
                if size_increment == 0 {
                    let reason = "WINDOW_UPDATE with zero increment";
                    return Err(if stream_id == 0 {
                        Error::protocol(reason)
                    } else {
                        Error::stream(stream_id, ErrorCode::ProtocolError, reason)
                    });
                }
                Ok(TypedFrame::WindowUpdate(WindowUpdateFrame {
                    stream_id,
                    size_increment,
                }))
            }
            FrameType::Continuation => {
                require_stream(kind, stream_id)?;
                Ok(TypedFrame::Continuation(ContinuationFrame {
                    stream_id,
                    header_block: payload,
                    end_headers: flags.is_end_headers(),
                }))
            }
        }
    }

    /// Encode an arbitrary raw frame
    pub fn encode_frame(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
        buf.put_slice(&Self::raw_header(
            frame.frame_type,
            frame.flags,
            frame.stream_id,
            frame.payload.len(),
        ));
        buf.put_slice(&frame.payload);
        buf.freeze()
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_STREAM, frame.end_stream);

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.data.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Data,
            flags,
            frame.stream_id,
            frame.data.len(),
        ));
        buf.put_slice(&frame.data);
        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_STREAM, frame.end_stream);
        flags.set_if(FrameFlags::END_HEADERS, frame.end_headers);

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Headers,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        ));
        buf.put_slice(&frame.header_block);
        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::END_HEADERS, frame.end_headers);

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Continuation,
            flags,
            frame.stream_id,
            frame.header_block.len(),
        ));
        buf.put_slice(&frame.header_block);
        buf.freeze()
    }

    /// Encode a header block as HEADERS plus as many CONTINUATIONs as needed
    pub fn encode_header_block(
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
        max_frame_size: usize,
    ) -> BytesMut {
        let max_frame_size = max_frame_size.max(1);
        let mut out = BytesMut::with_capacity(block.len() + FRAME_HEADER_SIZE);
        let mut rest = block;

        let first = rest.split_to(rest.len().min(max_frame_size));
        out.put(Self::encode_headers_frame(&HeadersFrame::new(
            stream_id,
            first,
            end_stream,
            rest.is_empty(),
        )));

        while !rest.is_empty() {
            let chunk = rest.split_to(rest.len().min(max_frame_size));
            out.put(Self::encode_continuation_frame(&ContinuationFrame {
                stream_id,
                header_block: chunk,
                end_headers: rest.is_empty(),
            }));
        }

        out
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::ACK, frame.ack);

        let mut settings_data = BytesMut::new();
        if !frame.ack {
            for (param, value) in frame.settings.parameters() {
                settings_data.put_u16(param.as_u16());
                settings_data.put_u32(value);
            }
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + settings_data.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Settings,
            flags,
            0,
            settings_data.len(),
        ));
        buf.put_slice(&settings_data);
        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        flags.set_if(FrameFlags::ACK, frame.ack);

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        buf.put_slice(&Self::encode_header(FrameType::Ping, flags, 0, 8));
        buf.put_slice(&frame.data);
        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = 8 + frame.debug_data.len();

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Goaway,
            FrameFlags::empty(),
            0,
            payload_len,
        ));
        buf.put_u32(frame.last_stream_id & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);
        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.size_increment & 0x7FFF_FFFF);
        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::RstStream,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.error_code.as_u32());
        buf.freeze()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn require_stream(kind: FrameType, stream_id: u32) -> Result<()> {
    if stream_id == 0 {
        return Err(Error::protocol(format!("{} frame on stream 0", kind.name())));
    }
    Ok(())
}

fn require_connection(kind: FrameType, stream_id: u32) -> Result<()> {
    if stream_id != 0 {
        return Err(Error::protocol(format!(
            "{} frame on stream {}",
            kind.name(),
            stream_id
        )));
    }
    Ok(())
}

fn fixed_len(kind: FrameType, payload: Bytes, len: usize) -> Result<Bytes> {
    if payload.len() != len {
        return Err(Error::FrameSize(format!(
            "{} payload must be {} bytes, got {}",
            kind.name(),
            len,
            payload.len()
        )));
    }
    Ok(payload)
}

fn strip_padding(kind: FrameType, flags: FrameFlags, mut payload: Bytes) -> Result<Bytes> {
    if !flags.is_padded() {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::FrameSize(format!(
            "padded {} without pad length",
            kind.name()
        )));
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        return Err(Error::protocol(format!(
            "{} padding exceeds payload",
            kind.name()
        )));
    }
    payload.truncate(payload.len() - pad_len);
    Ok(payload)
}
