//! HTTP/2 error types
//!
//! Every error knows its RFC 7540 Section 7 code and whether it is scoped to
//! one stream (answered with RST_STREAM) or to the whole connection
//! (answered with GOAWAY).

use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the session layer
    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    /// Connection-scoped violation, answered with GOAWAY
    #[error("Connection error {code}: {reason}")]
    Connection { code: ErrorCode, reason: String },

    /// Error confined to one stream, answered with RST_STREAM
    #[error("Stream {stream_id} error {code}: {reason}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        reason: String,
    },

    /// Flow-control window violated (always connection-scoped)
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Header block could not be decoded
    #[error("Compression error: {0}")]
    Compression(String),

    /// Frame length wrong for its type or above the negotiated maximum
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Peer sent GOAWAY
    #[error("GOAWAY received: last stream {last_stream_id}, {code}")]
    GoAway {
        last_stream_id: u32,
        code: ErrorCode,
        debug: Vec<u8>,
    },

    /// Timeout waiting for the peer
    #[error("Timeout")]
    Timeout,

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Client did not start with the connection preface
    #[error("Missing connection preface")]
    MissingPreface,
}

impl Error {
    /// Connection-level PROTOCOL_ERROR
    pub fn protocol(reason: impl Into<String>) -> Self {
        Error::Connection {
            code: ErrorCode::ProtocolError,
            reason: reason.into(),
        }
    }

    /// Stream-level error
    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Error::Stream {
            stream_id,
            code,
            reason: reason.into(),
        }
    }

    /// RFC 7540 error code carried in RST_STREAM or GOAWAY
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Connection { code, .. } | Error::Stream { code, .. } => *code,
            Error::GoAway { code, .. } => *code,
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::InvalidSettings(_) | Error::MissingPreface => ErrorCode::ProtocolError,
            Error::Timeout | Error::ConnectionClosed => ErrorCode::NoError,
            Error::Io(_) | Error::Http(_) => ErrorCode::InternalError,
        }
    }

    /// Stream the error is confined to
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Error::Stream { stream_id, .. } => Some(*stream_id),
            _ => None,
        }
    }

    /// Whether the whole connection must be torn down
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Error::Stream { .. })
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    ///
    /// Unknown codes must be treated as INTERNAL_ERROR (RFC 7540 Section 7).
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            _ => ErrorCode::InternalError,
        }
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
