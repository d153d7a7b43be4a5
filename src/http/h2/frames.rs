//! HTTP/2 frame types
//!
//! [`Frame`] is a raw frame as it comes off the wire: 9-byte header fields
//! plus an opaque payload. The codec validates it into a [`TypedFrame`]
//! (RFC 7540 Section 6), which is what the connection manager dispatches on.

use super::error::ErrorCode;
use super::settings::Settings;
use bytes::Bytes;
use std::fmt;

/// Size of the fixed frame header
pub const FRAME_HEADER_LEN: usize = 9;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Set a flag when `cond` holds
    pub fn set_if(&mut self, flag: u8, cond: bool) {
        if cond {
            self.set(flag);
        }
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Raw HTTP/2 frame
///
/// The type stays a plain byte so frames of unknown type survive decoding
/// and can be ignored as RFC 7540 Section 4.1 requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type byte
    pub frame_type: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID (reserved bit cleared)
    pub stream_id: u32,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Frame {
            frame_type: frame_type.as_u8(),
            flags,
            stream_id,
            payload,
        }
    }

    /// Known frame type, `None` for extension frames
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    /// Get payload size
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// DATA frame (RFC 7540 Section 6.1), padding already stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: u32,
    pub data: Bytes,
    pub end_stream: bool,
    /// Payload length on the wire, padding included; this is what flow
    /// control charges
    pub flow_len: usize,
}

impl DataFrame {
    /// Create an unpadded DATA frame
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        let flow_len = data.len();
        DataFrame {
            stream_id,
            data,
            end_stream,
            flow_len,
        }
    }
}

/// HEADERS frame (RFC 7540 Section 6.2), padding and priority stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub stream_id: u32,
    /// Header block fragment
    pub header_block: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
    /// The PRIORITY fields named the stream itself as its dependency
    pub self_dependent: bool,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            self_dependent: false,
        }
    }
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: u32,
    pub error_code: ErrorCode,
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Settings,
}

impl SettingsFrame {
    /// Create a new SETTINGS frame
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Create a SETTINGS ACK frame
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    pub ack: bool,
    /// Opaque data (8 bytes)
    pub data: [u8; 8],
}

impl PingFrame {
    /// Create a new PING frame
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Create a PING ACK frame
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a new GOAWAY frame
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: u32,
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}

/// CONTINUATION frame (RFC 7540 Section 6.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    pub stream_id: u32,
    pub header_block: Bytes,
    pub end_headers: bool,
}

/// A validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedFrame {
    Data(DataFrame),
    Headers(HeadersFrame),
    /// PRIORITY carries nothing this server acts on
    Priority { stream_id: u32 },
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    /// Clients never send PUSH_PROMISE; the manager rejects it
    PushPromise { stream_id: u32 },
    Ping(PingFrame),
    Goaway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    /// Extension frame type, to be ignored
    Unknown { frame_type: u8, stream_id: u32 },
}

impl TypedFrame {
    /// Stream the frame addresses (0 for connection-level frames)
    pub fn stream_id(&self) -> u32 {
        match self {
            TypedFrame::Data(f) => f.stream_id,
            TypedFrame::Headers(f) => f.stream_id,
            TypedFrame::Priority { stream_id } => *stream_id,
            TypedFrame::RstStream(f) => f.stream_id,
            TypedFrame::Settings(_) | TypedFrame::Ping(_) | TypedFrame::Goaway(_) => 0,
            TypedFrame::PushPromise { stream_id } => *stream_id,
            TypedFrame::WindowUpdate(f) => f.stream_id,
            TypedFrame::Continuation(f) => f.stream_id,
            TypedFrame::Unknown { stream_id, .. } => *stream_id,
        }
    }

    /// Frame type name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TypedFrame::Data(_) => "DATA",
            TypedFrame::Headers(_) => "HEADERS",
            TypedFrame::Priority { .. } => "PRIORITY",
            TypedFrame::RstStream(_) => "RST_STREAM",
            TypedFrame::Settings(_) => "SETTINGS",
            TypedFrame::PushPromise { .. } => "PUSH_PROMISE",
            TypedFrame::Ping(_) => "PING",
            TypedFrame::Goaway(_) => "GOAWAY",
            TypedFrame::WindowUpdate(_) => "WINDOW_UPDATE",
            TypedFrame::Continuation(_) => "CONTINUATION",
            TypedFrame::Unknown { .. } => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::Data.as_u8(), 0x0);
        assert_eq!(FrameType::Continuation.as_u8(), 0x9);

        assert_eq!(FrameType::from_u8(0x4), Some(FrameType::Settings));
        assert_eq!(FrameType::from_u8(0xff), None);
        assert_eq!(FrameType::Goaway.to_string(), "GOAWAY (0x7)");
    }

    #[test]
    fn test_frame_flags() {
        let mut flags = FrameFlags::empty();
        assert!(!flags.is_end_stream());

        flags.set(FrameFlags::END_STREAM);
        flags.set_if(FrameFlags::PADDED, false);
        assert!(flags.is_end_stream());
        assert!(!flags.is_padded());

        flags.set_if(FrameFlags::END_HEADERS, true);
        assert!(flags.is_end_headers());
        assert_eq!(flags.as_u8(), 0x5);
    }

    #[test]
    fn test_raw_frame_kind() {
        let frame = Frame::new(FrameType::Ping, FrameFlags::empty(), 0, Bytes::new());
        assert_eq!(frame.kind(), Some(FrameType::Ping));

        let ext = Frame {
            frame_type: 0xbe,
            flags: FrameFlags::empty(),
            stream_id: 0,
            payload: Bytes::from_static(b"x"),
        };
        assert_eq!(ext.kind(), None);
        assert_eq!(ext.payload_len(), 1);
    }

    #[test]
    fn test_typed_frame_stream_id() {
        let data = TypedFrame::Data(DataFrame::new(5, Bytes::from("hi"), true));
        assert_eq!(data.stream_id(), 5);
        assert_eq!(data.name(), "DATA");

        let ping = TypedFrame::Ping(PingFrame::new([0; 8]));
        assert_eq!(ping.stream_id(), 0);
    }

    #[test]
    fn test_data_frame_flow_len() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), false);
        assert_eq!(frame.flow_len, 5);
    }
}
