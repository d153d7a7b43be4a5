//! HTTP/2 stream management
//!
//! Stream state machine as defined in RFC 7540 Section 5.1, minus the
//! reserved states (server push is never enabled). A stream owns its
//! flow-control windows, the request it is assembling, the response data
//! still waiting for window credit, and the cancellation token handed to
//! the handler working on it.

use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use super::frames::DataFrame;
use super::hpack::HeaderField;
use crate::server::dispatch::CancelToken;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    flow_control: FlowControl,
    /// Decoded header fields of the request or response head
    fields: Vec<HeaderField>,
    body: Vec<u8>,
    /// Outbound body bytes waiting for window credit
    pending: BytesMut,
    /// Send END_STREAM once `pending` drains
    pending_end_stream: bool,
    /// A handler job was submitted for this stream
    dispatched: bool,
    /// Response HEADERS went out
    responded: bool,
    /// The request was HEAD; the response carries no DATA
    head_request: bool,
    cancel: CancelToken,
}

impl H2Stream {
    /// Create a stream with the given initial window sizes
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow_control: FlowControl::new(send_window, recv_window),
            fields: Vec::new(),
            body: Vec::new(),
            pending: BytesMut::new(),
            pending_end_stream: false,
            dispatched: false,
            responded: false,
            head_request: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn flow_control(&self) -> &FlowControl {
        &self.flow_control
    }

    pub fn flow_control_mut(&mut self) -> &mut FlowControl {
        &mut self.flow_control
    }

    /// Token observed by the handler serving this stream
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    pub fn mark_dispatched(&mut self) {
        self.dispatched = true;
    }

    pub fn set_head_request(&mut self, head: bool) {
        self.head_request = head;
    }

    pub fn is_head_request(&self) -> bool {
        self.head_request
    }

    /// A handler is working on this stream and has not answered yet
    pub fn awaiting_response(&self) -> bool {
        self.dispatched && !self.responded
    }

    /// Peer sent HEADERS (`end_stream` is its END_STREAM flag)
    pub fn receive_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            // Response head on the client, or trailers
            StreamState::Open | StreamState::HalfClosedLocal => {
                if end_stream {
                    self.close_remote();
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    format!("HEADERS in state {:?}", self.state),
                ));
            }
        }
        Ok(())
    }

    /// Record decoded header fields
    pub fn add_fields(&mut self, fields: Vec<HeaderField>) {
        self.fields.extend(fields);
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn take_fields(&mut self) -> Vec<HeaderField> {
        std::mem::take(&mut self.fields)
    }

    /// Peer sent DATA
    ///
    /// Charges the stream receive window with the on-wire length and
    /// appends the payload to the body.
    pub fn receive_data(&mut self, frame: &DataFrame) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::stream(
                self.id,
                ErrorCode::StreamClosed,
                format!("DATA in state {:?}", self.state),
            ));
        }

        self.flow_control.consume_recv_window(frame.flow_len)?;
        self.body.extend_from_slice(&frame.data);

        if frame.end_stream {
            self.close_remote();
        }
        Ok(())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take body (consumes the body data)
    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Whether the peer finished its side of the stream
    pub fn remote_done(&self) -> bool {
        matches!(
            self.state,
            StreamState::HalfClosedRemote | StreamState::Closed
        )
    }

    /// We are sending HEADERS
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = StreamState::Open;
            }
            StreamState::Open | StreamState::HalfClosedRemote => {}
            _ => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    format!("Cannot send HEADERS in state {:?}", self.state),
                ));
            }
        }
        self.responded = true;
        if end_stream {
            self.close_local();
        }
        Ok(())
    }

    /// Queue outbound body bytes; they leave as window credit allows
    pub fn queue_data(&mut self, data: &[u8], end_stream: bool) {
        self.pending.extend_from_slice(data);
        self.pending_end_stream |= end_stream;
    }

    /// Whether queued output remains (data, or a bare END_STREAM)
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.pending_end_stream
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Cut the next DATA payload
    ///
    /// `limit` is the smaller of the connection window and the peer's max
    /// frame size. Returns the payload and its END_STREAM flag, or `None`
    /// when nothing may be sent yet. A bare END_STREAM is not flow
    /// controlled and always goes out.
    pub fn next_data(&mut self, limit: usize) -> Option<(Bytes, bool)> {
        if !self.state.can_send() || !self.has_pending() {
            return None;
        }

        let len = self
            .pending
            .len()
            .min(limit)
            .min(self.flow_control.send_window().available());
        if len == 0 && !self.pending.is_empty() {
            return None;
        }

        let granted = self.flow_control.consume_send_window(len);
        let chunk = self.pending.split_to(granted).freeze();
        let end_stream = self.pending.is_empty() && self.pending_end_stream;
        if end_stream {
            self.pending_end_stream = false;
            self.close_local();
        }
        Some((chunk, end_stream))
    }

    /// Terminate abruptly (RST_STREAM either way, or teardown)
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.fields.clear();
        self.body.clear();
        self.pending.clear();
        self.pending_end_stream = false;
        self.cancel.cancel();
    }

    fn close_remote(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    fn close_local(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }
}

/// Largest header block reassembled before the connection is dropped
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// A header block being reassembled from HEADERS and CONTINUATION frames
///
/// While one is open no other frame may arrive on the connection.
#[derive(Debug)]
pub struct HeaderBlock {
    pub stream_id: StreamId,
    /// END_STREAM was set on the HEADERS frame
    pub end_stream: bool,
    /// Decode for HPACK state only, then drop (refused stream)
    pub discard: bool,
    /// The stream was already open: these are trailers
    pub trailers: bool,
    /// Reset the stream once the block is decoded
    pub reset: Option<(ErrorCode, &'static str)>,
    fragments: BytesMut,
}

impl HeaderBlock {
    pub fn new(stream_id: StreamId, end_stream: bool, first: &[u8]) -> Self {
        HeaderBlock {
            stream_id,
            end_stream,
            discard: false,
            trailers: false,
            reset: None,
            fragments: BytesMut::from(first),
        }
    }

    /// Append a CONTINUATION fragment
    pub fn extend(&mut self, fragment: &[u8]) -> Result<()> {
        if self.fragments.len() + fragment.len() > MAX_HEADER_BLOCK_SIZE {
            return Err(Error::Connection {
                code: ErrorCode::EnhanceYourCalm,
                reason: "header block too large".to_string(),
            });
        }
        self.fragments.extend_from_slice(fragment);
        Ok(())
    }

    pub fn into_bytes(self) -> Bytes {
        self.fragments.freeze()
    }
}

/// Stream manager
///
/// Owns every live stream of one connection and enforces stream id rules
/// and the concurrency limit.
#[derive(Debug)]
pub struct StreamManager {
    streams: BTreeMap<StreamId, H2Stream>,
    /// Next locally initiated stream ID (client: odd, server: even)
    next_stream_id: StreamId,
    /// Highest stream ID the peer has opened, refused ones included
    last_peer_stream_id: StreamId,
    is_client: bool,
    max_concurrent_streams: Option<u32>,
}

impl StreamManager {
    /// Create a new stream manager
    pub fn new(is_client: bool) -> Self {
        StreamManager {
            streams: BTreeMap::new(),
            next_stream_id: if is_client { 1 } else { 2 },
            last_peer_stream_id: 0,
            is_client,
            max_concurrent_streams: None,
        }
    }

    /// Set the limit applied to newly opened streams
    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn last_peer_stream_id(&self) -> StreamId {
        self.last_peer_stream_id
    }

    /// Get next stream ID (without incrementing)
    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    fn at_limit(&self) -> bool {
        match self.max_concurrent_streams {
            Some(max) => self.active_stream_count() >= max as usize,
            None => false,
        }
    }

    fn is_peer_initiated(&self, stream_id: StreamId) -> bool {
        // clients open odd streams
        (stream_id % 2 == 1) != self.is_client
    }

    /// Whether `stream_id` is a peer stream that was never opened
    pub fn is_idle(&self, stream_id: StreamId) -> bool {
        if self.is_peer_initiated(stream_id) {
            stream_id > self.last_peer_stream_id
        } else {
            stream_id >= self.next_stream_id
        }
    }

    /// Open a stream for a peer HEADERS frame
    ///
    /// The id must be peer-initiated and above every id seen so far; anything
    /// else is a connection PROTOCOL_ERROR. Once validated the id counts as
    /// used even if the stream is then refused with REFUSED_STREAM.
    pub fn accept_peer_stream(
        &mut self,
        stream_id: StreamId,
        send_window: u32,
        recv_window: u32,
    ) -> Result<&mut H2Stream> {
        if !self.is_peer_initiated(stream_id) {
            return Err(Error::protocol(format!(
                "peer opened stream {} with wrong parity",
                stream_id
            )));
        }
        if stream_id <= self.last_peer_stream_id {
            return Err(Error::protocol(format!(
                "stream {} is not above last stream {}",
                stream_id, self.last_peer_stream_id
            )));
        }
        self.last_peer_stream_id = stream_id;

        if self.at_limit() {
            return Err(Error::stream(
                stream_id,
                ErrorCode::RefusedStream,
                "concurrent stream limit reached",
            ));
        }

        Ok(self
            .streams
            .entry(stream_id)
            .or_insert_with(|| H2Stream::new(stream_id, send_window, recv_window)))
    }

    /// Open a locally initiated stream
    ///
    /// With `respect_limit`, refuses when the peer's advertised limit is
    /// reached; the id is not consumed in that case.
    pub fn create_stream(
        &mut self,
        send_window: u32,
        recv_window: u32,
        respect_limit: bool,
    ) -> Result<StreamId> {
        let stream_id = self.next_stream_id;
        if respect_limit && self.at_limit() {
            return Err(Error::stream(
                stream_id,
                ErrorCode::RefusedStream,
                "peer concurrent stream limit reached",
            ));
        }

        self.next_stream_id += 2;
        self.streams
            .insert(stream_id, H2Stream::new(stream_id, send_window, recv_window));
        Ok(stream_id)
    }

    pub fn get(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    pub fn remove(&mut self, stream_id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&stream_id)
    }

    /// Get number of streams that are not closed
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Live stream ids in ascending order
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut H2Stream> {
        self.streams.values_mut()
    }

    /// Drop closed streams, releasing their buffers
    pub fn remove_closed(&mut self) -> usize {
        let before = self.streams.len();
        self.streams.retain(|_, stream| !stream.state().is_closed());
        before - self.streams.len()
    }

    /// Apply a peer SETTINGS_INITIAL_WINDOW_SIZE change to every stream
    pub fn update_initial_window_size(&mut self, size: u32) -> Result<()> {
        for stream in self.streams.values_mut() {
            stream
                .flow_control_mut()
                .send_window_mut()
                .update_initial_size(size)?;
        }
        Ok(())
    }

    /// Reset every stream and cancel its handler
    pub fn cancel_all(&mut self) {
        for stream in self.streams.values_mut() {
            stream.reset();
        }
        self.streams.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u32 = 65_535;

    #[test]
    fn test_request_response_lifecycle() {
        let mut stream = H2Stream::new(1, WINDOW, WINDOW);
        assert_eq!(stream.state(), StreamState::Idle);

        stream.receive_headers(false).unwrap();
        assert_eq!(stream.state(), StreamState::Open);

        stream
            .receive_data(&DataFrame::new(1, Bytes::from("body"), true))
            .unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
        assert!(stream.remote_done());
        assert_eq!(stream.body(), b"body");

        stream.send_headers(false).unwrap();
        stream.queue_data(b"response", true);
        let (chunk, end) = stream.next_data(16_384).unwrap();
        assert_eq!(&chunk[..], b"response");
        assert!(end);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_headers_only_request() {
        let mut stream = H2Stream::new(1, WINDOW, WINDOW);
        stream.receive_headers(true).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);

        stream.send_headers(true).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_data_after_end_stream() {
        let mut stream = H2Stream::new(1, WINDOW, WINDOW);
        stream.receive_headers(true).unwrap();

        let err = stream
            .receive_data(&DataFrame::new(1, Bytes::from("late"), false))
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::StreamClosed);
        assert_eq!(err.stream_id(), Some(1));
    }

    #[test]
    fn test_pending_data_respects_window() {
        let mut stream = H2Stream::new(1, 10, WINDOW);
        stream.receive_headers(true).unwrap();
        stream.send_headers(false).unwrap();
        stream.queue_data(&[b'x'; 25], true);

        let (chunk, end) = stream.next_data(16_384).unwrap();
        assert_eq!(chunk.len(), 10);
        assert!(!end);
        assert!(stream.next_data(16_384).is_none());
        assert_eq!(stream.pending_len(), 15);

        stream.flow_control_mut().increase_send_window(100).unwrap();
        let (chunk, end) = stream.next_data(8).unwrap();
        assert_eq!(chunk.len(), 8);
        assert!(!end);

        let (chunk, end) = stream.next_data(16_384).unwrap();
        assert_eq!(chunk.len(), 7);
        assert!(end);
        assert!(!stream.has_pending());
        assert!(stream.state().is_closed());
    }

    #[test]
    fn test_bare_end_stream_ignores_window() {
        let mut stream = H2Stream::new(1, 0, WINDOW);
        stream.receive_headers(true).unwrap();
        stream.send_headers(false).unwrap();
        stream.queue_data(&[], true);

        let (chunk, end) = stream.next_data(0).unwrap();
        assert!(chunk.is_empty());
        assert!(end);
    }

    #[test]
    fn test_reset_cancels() {
        let mut stream = H2Stream::new(3, WINDOW, WINDOW);
        stream.receive_headers(false).unwrap();
        let token = stream.cancel_token().clone();
        assert!(!token.is_cancelled());

        stream.reset();
        assert!(token.is_cancelled());
        assert!(stream.state().is_closed());
        assert!(!stream.has_pending());
    }

    #[test]
    fn test_header_block_reassembly() {
        let mut block = HeaderBlock::new(1, true, b"abc");
        block.extend(b"def").unwrap();
        assert!(block.end_stream);
        assert_eq!(&block.into_bytes()[..], b"abcdef");

        let mut block = HeaderBlock::new(3, false, &[]);
        let err = block.extend(&vec![0; MAX_HEADER_BLOCK_SIZE + 1]).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::EnhanceYourCalm);
    }

    #[test]
    fn test_awaiting_response() {
        let mut stream = H2Stream::new(1, WINDOW, WINDOW);
        stream.receive_headers(true).unwrap();
        assert!(!stream.awaiting_response());
        stream.mark_dispatched();
        assert!(stream.awaiting_response());
        stream.send_headers(true).unwrap();
        assert!(!stream.awaiting_response());
    }

    #[test]
    fn test_accept_peer_streams() {
        let mut manager = StreamManager::new(false);
        manager.accept_peer_stream(1, WINDOW, WINDOW).unwrap();
        manager.accept_peer_stream(5, WINDOW, WINDOW).unwrap();
        assert_eq!(manager.last_peer_stream_id(), 5);

        // skipped ids are implicitly closed
        let err = manager.accept_peer_stream(3, WINDOW, WINDOW).unwrap_err();
        assert!(err.is_connection_error());

        let err = manager.accept_peer_stream(5, WINDOW, WINDOW).unwrap_err();
        assert!(err.is_connection_error());

        let err = manager.accept_peer_stream(6, WINDOW, WINDOW).unwrap_err();
        assert!(err.is_connection_error());

        assert!(manager.is_idle(7));
        assert!(!manager.is_idle(3));
    }

    #[test]
    fn test_concurrency_limit_refuses() {
        let mut manager = StreamManager::new(false);
        manager.set_max_concurrent_streams(Some(2));

        manager.accept_peer_stream(1, WINDOW, WINDOW).unwrap();
        manager.accept_peer_stream(3, WINDOW, WINDOW).unwrap();

        let err = manager.accept_peer_stream(5, WINDOW, WINDOW).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::RefusedStream);
        assert_eq!(err.stream_id(), Some(5));
        assert_eq!(manager.last_peer_stream_id(), 5);

        // closing one frees a slot
        manager.get_mut(1).unwrap().reset();
        assert_eq!(manager.remove_closed(), 1);
        manager.accept_peer_stream(7, WINDOW, WINDOW).unwrap();
        assert_eq!(manager.stream_ids(), vec![3, 7]);
    }

    #[test]
    fn test_client_stream_ids() {
        let mut manager = StreamManager::new(true);
        assert_eq!(manager.peek_next_stream_id(), 1);
        assert_eq!(manager.create_stream(WINDOW, WINDOW, true).unwrap(), 1);
        assert_eq!(manager.create_stream(WINDOW, WINDOW, true).unwrap(), 3);

        manager.set_max_concurrent_streams(Some(2));
        let err = manager.create_stream(WINDOW, WINDOW, true).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::RefusedStream);
        assert_eq!(manager.peek_next_stream_id(), 5);

        assert_eq!(manager.create_stream(WINDOW, WINDOW, false).unwrap(), 5);
    }

    #[test]
    fn test_initial_window_update() {
        let mut manager = StreamManager::new(false);
        manager.accept_peer_stream(1, 100, WINDOW).unwrap();
        manager.update_initial_window_size(300).unwrap();
        assert_eq!(
            manager.get(1).unwrap().flow_control().send_window().size(),
            300
        );
    }

    #[test]
    fn test_cancel_all() {
        let mut manager = StreamManager::new(false);
        manager.accept_peer_stream(1, WINDOW, WINDOW).unwrap();
        manager.accept_peer_stream(3, WINDOW, WINDOW).unwrap();
        let tokens: Vec<CancelToken> = [1, 3]
            .iter()
            .map(|id| manager.get(*id).unwrap().cancel_token().clone())
            .collect();

        manager.cancel_all();
        assert!(manager.is_empty());
        assert!(tokens.iter().all(CancelToken::is_cancelled));
    }
}
