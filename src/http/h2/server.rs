//! HTTP/2 server connection
//!
//! [`H2Server`] drives one HTTP/2 connection from the preface to teardown.
//! It runs on the connection's I/O thread, which is the only writer to the
//! socket; handlers run on the worker pool and hand their responses back
//! through a completion channel whose descriptor is polled next to the
//! socket.
//!
//! Each loop iteration does a bounded amount of work: write finished
//! responses, push DATA within the flow-control windows, wait for readiness,
//! then read and process whatever frames arrived.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::fields;
use super::flow_control::FlowControl;
use super::frames::{
    ContinuationFrame, DataFrame, GoawayFrame, HeadersFrame, PingFrame, RstStreamFrame,
    SettingsFrame, TypedFrame, WindowUpdateFrame,
};
use super::hpack::{HpackDecoder, HpackEncoder};
use super::settings::Settings;
use super::stream::{HeaderBlock, StreamId, StreamManager};
use super::PREFACE;
use crate::http::session::{poll_fds, PollEvents, SessionOps};
use crate::http::Method;
use crate::server::dispatch::{
    completion_channel, Completion, CompletionReceiver, CompletionSender, Dispatcher,
};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::{Duration, Instant};

/// Read chunk size
const READ_BUF_SIZE: usize = 16 * 1024;

/// Output queued per iteration before the loop goes back to reading
const WRITE_HIGH_WATER: usize = 256 * 1024;

/// HTTP/2 server connection builder
#[derive(Debug, Clone)]
pub struct H2ServerBuilder {
    settings: Settings,
    idle_timeout: Duration,
    max_request_body: usize,
}

impl H2ServerBuilder {
    pub fn new() -> Self {
        H2ServerBuilder {
            settings: Settings::server_defaults(),
            idle_timeout: Duration::from_secs(30),
            max_request_body: 1024 * 1024,
        }
    }

    /// Settings advertised in our first SETTINGS frame
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// How long a connection with no streams may stay quiet
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Request bodies above this are reset with CANCEL
    pub fn max_request_body(mut self, max: usize) -> Self {
        self.max_request_body = max;
        self
    }

    /// Wrap an established session
    pub fn build<S: SessionOps>(self, session: S, dispatcher: Dispatcher) -> Result<H2Server<S>> {
        self.settings.validate()?;
        let (completion_tx, completions) = completion_channel()?;

        let mut streams = StreamManager::new(false);
        streams.set_max_concurrent_streams(self.settings.get_max_concurrent_streams());

        Ok(H2Server {
            session,
            codec: FrameCodec::new(),
            streams,
            flow: FlowControl::default(),
            encoder: HpackEncoder::new(),
            decoder: HpackDecoder::new(),
            local: self.settings,
            remote: Settings::default(),
            header_block: None,
            write_buf: BytesMut::new(),
            dispatcher,
            completion_tx,
            completions,
            idle_timeout: self.idle_timeout,
            max_request_body: self.max_request_body,
            settings_received: false,
            draining: false,
        })
    }
}

impl Default for H2ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One server-side HTTP/2 connection
pub struct H2Server<S: SessionOps> {
    session: S,
    codec: FrameCodec,
    streams: StreamManager,
    /// Connection-level windows
    flow: FlowControl,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    local: Settings,
    remote: Settings,
    /// Open HEADERS/CONTINUATION sequence
    header_block: Option<HeaderBlock>,
    write_buf: BytesMut,
    dispatcher: Dispatcher,
    completion_tx: CompletionSender,
    completions: CompletionReceiver,
    idle_timeout: Duration,
    max_request_body: usize,
    settings_received: bool,
    /// Peer sent GOAWAY(NO_ERROR): finish what is in flight, then close
    draining: bool,
}

impl<S: SessionOps> H2Server<S> {
    /// Run the connection to completion
    ///
    /// Connection errors detected here are answered with GOAWAY before the
    /// session closes. Every stream still open at teardown has its handler
    /// cancelled.
    pub fn serve(mut self) -> Result<()> {
        let result = self.run();

        if let Err(e) = &result {
            if sends_goaway(e) {
                tracing::warn!(error = %e, "closing connection");
                self.queue_goaway(e.error_code(), e.to_string().as_bytes());
            } else {
                tracing::debug!(error = %e, "connection ended");
            }
        }

        self.streams.cancel_all();
        if let Err(e) = self.flush_writes() {
            tracing::debug!(error = %e, "failed to flush on close");
        }
        let _ = self.session.close();

        match result {
            // the peer just went away
            Err(Error::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    fn run(&mut self) -> Result<()> {
        let settings = SettingsFrame::new(self.local.clone());
        self.write_buf
            .put(FrameCodec::encode_settings_frame(&settings));
        self.flush_writes()?;

        self.read_preface()?;
        // the preface read may have pulled in the first frames as well
        self.process_frames()?;

        let mut last_activity = Instant::now();
        loop {
            for completion in self.completions.drain() {
                self.on_completion(completion)?;
            }
            let more = self.schedule_data();
            self.flush_writes()?;

            if self.draining && self.streams.is_empty() {
                tracing::debug!("peer GOAWAY honoured, closing");
                return Ok(());
            }

            let readable = if self.session.pending() > 0 {
                true
            } else {
                let timeout = if more {
                    Some(Duration::ZERO)
                } else if self.handlers_running() {
                    // a completion or the peer will wake us
                    None
                } else {
                    Some(self.idle_timeout.saturating_sub(last_activity.elapsed()))
                };
                let ready = poll_fds(
                    &[
                        (self.session.raw_fd(), PollEvents::Read),
                        (self.completions.raw_fd(), PollEvents::Read),
                    ],
                    timeout,
                )?;
                if !ready[0]
                    && !ready[1]
                    && !more
                    && last_activity.elapsed() >= self.idle_timeout
                    && !self.handlers_running()
                {
                    tracing::debug!("idle timeout");
                    self.queue_goaway(ErrorCode::NoError, b"idle timeout");
                    return Ok(());
                }
                ready[0]
            };
            if !readable {
                continue;
            }

            if !self.fill()? {
                tracing::debug!("peer closed connection");
                return Ok(());
            }
            last_activity = Instant::now();
            self.process_frames()?;
        }
    }

    /// Handle every complete frame buffered in the codec
    ///
    /// Stream errors reset their stream; anything else ends the connection.
    fn process_frames(&mut self) -> Result<()> {
        let max_frame_size = self.local.get_max_frame_size();
        while let Some(frame) = self.codec.next_frame(max_frame_size)? {
            match self.handle_frame(frame) {
                Ok(()) => {}
                Err(Error::Stream {
                    stream_id,
                    code,
                    reason,
                }) => {
                    tracing::debug!(stream_id, %code, reason = %reason, "resetting stream");
                    self.reset_stream(stream_id, code);
                }
                Err(e) => return Err(e),
            }
        }
        self.streams.remove_closed();
        Ok(())
    }

    fn handlers_running(&mut self) -> bool {
        self.streams.iter_mut().any(|s| s.awaiting_response())
    }

    fn read_preface(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.idle_timeout;
        loop {
            if let Some(preface) = self.codec.take_bytes(PREFACE.len()) {
                if preface[..] != *PREFACE {
                    return Err(Error::MissingPreface);
                }
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.session.pending() == 0
                && !self.session.poll(PollEvents::Read, Some(remaining))?
            {
                return Err(Error::Timeout);
            }
            if !self.fill()? {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Read once from the session into the codec; false on EOF
    fn fill(&mut self) -> Result<bool> {
        let mut buf = [0u8; READ_BUF_SIZE];
        let n = self.session.read(&mut buf)?;
        if n == 0 {
            return Ok(false);
        }
        self.codec.feed(&buf[..n]);
        Ok(true)
    }

    fn flush_writes(&mut self) -> Result<()> {
        if !self.write_buf.is_empty() {
            self.session.write_all(&self.write_buf)?;
            self.session.flush()?;
            self.write_buf.clear();
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: super::frames::Frame) -> Result<()> {
        let frame = FrameCodec::decode(frame)?;
        tracing::trace!(frame = frame.name(), stream_id = frame.stream_id(), "received frame");

        if !self.settings_received && !matches!(frame, TypedFrame::Settings(ref s) if !s.ack) {
            return Err(Error::protocol("first frame after preface must be SETTINGS"));
        }

        if let Some(block) = &self.header_block {
            match &frame {
                TypedFrame::Continuation(c) if c.stream_id == block.stream_id => {}
                other => {
                    return Err(Error::protocol(format!(
                        "{} while header block of stream {} is open",
                        other.name(),
                        block.stream_id
                    )))
                }
            }
        }

        match frame {
            TypedFrame::Data(f) => self.on_data(f),
            TypedFrame::Headers(f) => self.on_headers(f),
            TypedFrame::Priority { .. } => Ok(()),
            TypedFrame::RstStream(f) => self.on_rst_stream(f),
            TypedFrame::Settings(f) => self.on_settings(f),
            TypedFrame::PushPromise { .. } => Err(Error::protocol("client sent PUSH_PROMISE")),
            TypedFrame::Ping(f) => {
                if !f.ack {
                    self.write_buf
                        .put(FrameCodec::encode_ping_frame(&PingFrame::ack(f.data)));
                }
                Ok(())
            }
            TypedFrame::Goaway(f) => self.on_goaway(f),
            TypedFrame::WindowUpdate(f) => self.on_window_update(f),
            TypedFrame::Continuation(f) => self.on_continuation(f),
            TypedFrame::Unknown { frame_type, .. } => {
                tracing::trace!(frame_type, "ignoring unknown frame type");
                Ok(())
            }
        }
    }

    fn on_settings(&mut self, frame: SettingsFrame) -> Result<()> {
        if frame.ack {
            tracing::trace!("SETTINGS acknowledged");
            return Ok(());
        }
        self.settings_received = true;

        if let Some(size) = frame.settings.initial_window_size {
            self.streams.update_initial_window_size(size)?;
        }
        self.remote.merge(&frame.settings);
        self.write_buf
            .put(FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        Ok(())
    }

    fn on_headers(&mut self, frame: HeadersFrame) -> Result<()> {
        let id = frame.stream_id;
        let mut block = HeaderBlock::new(id, frame.end_stream, &frame.header_block);

        if let Some(stream) = self.streams.get_mut(id) {
            stream.receive_headers(frame.end_stream)?;
            block.trailers = true;
        } else if self.draining {
            // no new streams after the peer's GOAWAY; keep HPACK in sync
            block.discard = true;
        } else {
            let send_window = self.remote.get_initial_window_size();
            let recv_window = self.local.get_initial_window_size();
            match self.streams.accept_peer_stream(id, send_window, recv_window) {
                Ok(stream) => stream.receive_headers(frame.end_stream)?,
                Err(Error::Stream { code, reason, .. }) => {
                    tracing::debug!(stream_id = id, reason = %reason, "refusing stream");
                    self.queue_rst(id, code);
                    block.discard = true;
                }
                Err(e) => return Err(e),
            }
        }

        if frame.self_dependent && !block.discard {
            block.reset = Some((ErrorCode::ProtocolError, "stream depends on itself"));
        }

        if frame.end_headers {
            self.end_header_block(block)
        } else {
            self.header_block = Some(block);
            Ok(())
        }
    }

    fn on_continuation(&mut self, frame: ContinuationFrame) -> Result<()> {
        let mut block = self
            .header_block
            .take()
            .ok_or_else(|| Error::protocol("CONTINUATION without HEADERS"))?;
        block.extend(&frame.header_block)?;

        if frame.end_headers {
            self.end_header_block(block)
        } else {
            self.header_block = Some(block);
            Ok(())
        }
    }

    fn end_header_block(&mut self, block: HeaderBlock) -> Result<()> {
        let id = block.stream_id;
        let (discard, trailers, reset) = (block.discard, block.trailers, block.reset);
        // always decode: the dynamic table is shared by every stream
        let fields = self.decoder.decode(&block.into_bytes())?;
        if discard {
            return Ok(());
        }
        if let Some((code, reason)) = reset {
            return Err(Error::stream(id, code, reason));
        }

        let Some(stream) = self.streams.get_mut(id) else {
            return Ok(());
        };
        if !trailers {
            stream.add_fields(fields);
        }
        if stream.remote_done() {
            self.dispatch_stream(id)?;
        }
        Ok(())
    }

    fn on_data(&mut self, frame: DataFrame) -> Result<()> {
        let id = frame.stream_id;
        // the connection window is charged even for streams we dropped
        self.flow.consume_recv_window(frame.flow_len)?;
        if let Some(increment) = self.flow.should_send_window_update() {
            self.flow.send_window_update(increment)?;
            self.queue_window_update(0, increment);
        }

        if self.streams.is_idle(id) {
            return Err(Error::protocol(format!("DATA on idle stream {}", id)));
        }
        let Some(stream) = self.streams.get_mut(id) else {
            // reset or refused earlier
            return Ok(());
        };

        stream.receive_data(&frame)?;

        if stream.body().len() > self.max_request_body {
            tracing::warn!(stream_id = id, limit = self.max_request_body, "request body too large");
            self.reset_stream(id, ErrorCode::Cancel);
            return Ok(());
        }

        if stream.remote_done() {
            return self.dispatch_stream(id);
        }

        if let Some(increment) = stream.flow_control().should_send_window_update() {
            stream.flow_control_mut().send_window_update(increment)?;
            self.queue_window_update(id, increment);
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: RstStreamFrame) -> Result<()> {
        let id = frame.stream_id;
        if self.streams.is_idle(id) {
            return Err(Error::protocol(format!("RST_STREAM on idle stream {}", id)));
        }
        if let Some(mut stream) = self.streams.remove(id) {
            tracing::debug!(stream_id = id, code = %frame.error_code, "stream reset by peer");
            stream.reset();
        }
        Ok(())
    }

    fn on_window_update(&mut self, frame: WindowUpdateFrame) -> Result<()> {
        let id = frame.stream_id;
        if id == 0 {
            self.flow.increase_send_window(frame.size_increment)?;
            return Ok(());
        }

        let idle = self.streams.is_idle(id);
        match self.streams.get_mut(id) {
            Some(stream) => {
                if let Err(e) = stream
                    .flow_control_mut()
                    .increase_send_window(frame.size_increment)
                {
                    // overflowing a stream window only kills the stream
                    return Err(Error::stream(id, ErrorCode::FlowControlError, e.to_string()));
                }
                Ok(())
            }
            None if idle => Err(Error::protocol(format!(
                "WINDOW_UPDATE on idle stream {}",
                id
            ))),
            None => Ok(()),
        }
    }

    fn on_goaway(&mut self, frame: GoawayFrame) -> Result<()> {
        tracing::debug!(
            last_stream_id = frame.last_stream_id,
            code = %frame.error_code,
            "GOAWAY received"
        );
        if frame.error_code == ErrorCode::NoError {
            self.draining = true;
            return Ok(());
        }
        Err(Error::GoAway {
            last_stream_id: frame.last_stream_id,
            code: frame.error_code,
            debug: frame.debug_data.to_vec(),
        })
    }

    /// Build the request of a finished stream and hand it to a worker
    fn dispatch_stream(&mut self, id: StreamId) -> Result<()> {
        let max_list_size = self.local.get_max_header_list_size();
        let Some(stream) = self.streams.get_mut(id) else {
            return Ok(());
        };
        if stream.is_dispatched() {
            return Ok(());
        }

        let fields = stream.take_fields();
        let body = stream.take_body();
        let mut request = fields::request_from_fields(id, fields, max_list_size)?;
        fields::attach_body(id, &mut request, body)?;

        stream.mark_dispatched();
        stream.set_head_request(request.method() == Method::Head);
        tracing::debug!(
            stream_id = id,
            method = %request.method(),
            path = request.path(),
            "dispatching request"
        );
        let cancel = stream.cancel_token().clone();
        self.dispatcher
            .dispatch(id, request, cancel, self.completion_tx.clone())
            .map_err(|e| Error::Connection {
                code: ErrorCode::InternalError,
                reason: e.to_string(),
            })
    }

    /// Write a handler's response head and queue its body
    fn on_completion(&mut self, completion: Completion) -> Result<()> {
        let id = completion.stream_id;
        let Some(stream) = self.streams.get_mut(id) else {
            tracing::debug!(stream_id = id, "dropping response for closed stream");
            return Ok(());
        };
        if stream.cancel_token().is_cancelled() {
            return Ok(());
        }

        let response = completion.response;
        // a HEAD response keeps its headers but never sends DATA
        let end_stream = response.body().is_empty() || stream.is_head_request();
        if let Err(e) = stream.send_headers(end_stream) {
            tracing::debug!(stream_id = id, error = %e, "cannot respond on stream");
            return Ok(());
        }
        if !end_stream {
            stream.queue_data(response.body(), true);
        }

        let fields = fields::response_fields(&response);
        let block = self
            .encoder
            .encode(fields.iter().map(|(n, v)| (n.as_slice(), v.as_slice())));
        self.write_buf.put(FrameCodec::encode_header_block(
            id,
            block,
            end_stream,
            self.remote.get_max_frame_size() as usize,
        ));
        tracing::debug!(stream_id = id, status = response.status().code(), "response headers queued");
        Ok(())
    }

    /// Cut DATA frames within the windows, one per stream per round
    ///
    /// Returns true when sendable data remains because the write buffer
    /// filled up.
    fn schedule_data(&mut self) -> bool {
        let max_frame_size = self.remote.get_max_frame_size() as usize;
        loop {
            let mut progressed = false;
            for stream in self.streams.iter_mut() {
                if self.write_buf.len() >= WRITE_HIGH_WATER {
                    return true;
                }
                let limit = max_frame_size.min(self.flow.send_window().available());
                if let Some((chunk, end_stream)) = stream.next_data(limit) {
                    self.flow.consume_send_window(chunk.len());
                    let frame = DataFrame::new(stream.id(), chunk, end_stream);
                    self.write_buf.put(FrameCodec::encode_data_frame(&frame));
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        self.streams.remove_closed();
        false
    }

    fn reset_stream(&mut self, id: StreamId, code: ErrorCode) {
        self.queue_rst(id, code);
        if let Some(mut stream) = self.streams.remove(id) {
            stream.reset();
        }
    }

    fn queue_rst(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        let frame = RstStreamFrame {
            stream_id,
            error_code,
        };
        self.write_buf
            .put(FrameCodec::encode_rst_stream_frame(&frame));
    }

    fn queue_window_update(&mut self, stream_id: StreamId, increment: u32) {
        let frame = WindowUpdateFrame::new(stream_id, increment);
        self.write_buf
            .put(FrameCodec::encode_window_update_frame(&frame));
    }

    fn queue_goaway(&mut self, code: ErrorCode, debug: &[u8]) {
        let frame = GoawayFrame::new(
            self.streams.last_peer_stream_id(),
            code,
            Bytes::copy_from_slice(debug),
        );
        self.write_buf
            .put(FrameCodec::encode_goaway_frame(&frame));
    }
}

impl<S: SessionOps> std::fmt::Debug for H2Server<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Server")
            .field("streams", &self.streams)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("draining", &self.draining)
            .finish_non_exhaustive()
    }
}

/// Whether the error is ours to report with GOAWAY
fn sends_goaway(error: &Error) -> bool {
    matches!(
        error,
        Error::Connection { .. }
            | Error::FlowControl(_)
            | Error::Compression(_)
            | Error::FrameSize(_)
            | Error::InvalidSettings(_)
            | Error::MissingPreface
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::settings::DEFAULT_INITIAL_WINDOW_SIZE;
    use crate::http::h2::{FrameFlags, FrameType};
    use crate::http::session::FdSessionOps;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::server::dispatch::{CancelToken, WorkerPool};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;

    fn dispatcher() -> Dispatcher {
        let handler = |req: &HttpRequest, _: &CancelToken| {
            HttpResponse::builder()
                .header("content-type", "text/plain")
                .body(format!("path={}", req.path()).into_bytes())
                .build()
        };
        Dispatcher::new(Arc::new(handler), Arc::new(WorkerPool::new(2).unwrap()))
    }

    /// Start a server connection on a loopback socket and return the
    /// client side
    fn start(builder: H2ServerBuilder) -> (TcpStream, thread::JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let server = builder
                .build(FdSessionOps::new(stream), dispatcher())
                .unwrap();
            server.serve()
        });
        let client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (client, handle)
    }

    /// Read frames until one matches
    fn read_until(
        client: &mut TcpStream,
        codec: &mut FrameCodec,
        pred: impl Fn(&TypedFrame) -> bool,
    ) -> TypedFrame {
        let mut buf = [0u8; 4096];
        loop {
            while let Some(frame) = codec.next_frame(16_384).unwrap() {
                let frame = FrameCodec::decode(frame).unwrap();
                if pred(&frame) {
                    return frame;
                }
            }
            let n = client.read(&mut buf).unwrap();
            assert!(n > 0, "server closed before expected frame");
            codec.feed(&buf[..n]);
        }
    }

    fn handshake(client: &mut TcpStream) {
        client.write_all(PREFACE).unwrap();
        let settings = SettingsFrame::new(Settings::default());
        client
            .write_all(&FrameCodec::encode_settings_frame(&settings))
            .unwrap();
    }

    fn request_block(encoder: &mut HpackEncoder, path: &str) -> Bytes {
        method_block(encoder, "GET", path)
    }

    fn method_block(encoder: &mut HpackEncoder, method: &str, path: &str) -> Bytes {
        let fields: Vec<(&[u8], &[u8])> = vec![
            (b":method", method.as_bytes()),
            (b":scheme", b"https"),
            (b":path", path.as_bytes()),
            (b":authority", b"localhost"),
        ];
        encoder.encode(fields)
    }

    #[test]
    fn test_get_request() {
        let (mut client, handle) = start(H2ServerBuilder::new());
        handshake(&mut client);

        let mut encoder = HpackEncoder::new();
        let block = request_block(&mut encoder, "/hello");
        client
            .write_all(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
                1, block, true, true,
            )))
            .unwrap();

        let mut codec = FrameCodec::new();
        let mut decoder = HpackDecoder::new();
        let headers = read_until(&mut client, &mut codec, |f| {
            matches!(f, TypedFrame::Headers(_))
        });
        let TypedFrame::Headers(headers) = headers else {
            unreachable!()
        };
        assert_eq!(headers.stream_id, 1);
        let fields = decoder.decode(&headers.header_block).unwrap();
        let response = fields::response_from_fields(1, fields).unwrap();
        assert_eq!(response.status().code(), 200);
        assert_eq!(response.headers().get("content-length"), Some("11"));

        let data = read_until(&mut client, &mut codec, |f| matches!(f, TypedFrame::Data(_)));
        let TypedFrame::Data(data) = data else {
            unreachable!()
        };
        assert_eq!(&data.data[..], b"path=/hello");
        assert!(data.end_stream);

        drop(client);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_preface_settings_and_request_in_one_write() {
        let (mut client, _handle) = start(H2ServerBuilder::new());

        let mut encoder = HpackEncoder::new();
        let mut opening = PREFACE.to_vec();
        opening.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(
            Settings::default(),
        )));
        opening.extend_from_slice(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
            1,
            request_block(&mut encoder, "/first"),
            true,
            true,
        )));
        client.write_all(&opening).unwrap();

        let mut codec = FrameCodec::new();
        read_until(&mut client, &mut codec, |f| {
            matches!(f, TypedFrame::Settings(s) if s.ack)
        });
        let data = read_until(&mut client, &mut codec, |f| matches!(f, TypedFrame::Data(_)));
        let TypedFrame::Data(data) = data else {
            unreachable!()
        };
        assert_eq!(data.stream_id, 1);
        assert_eq!(&data.data[..], b"path=/first");
    }

    #[test]
    fn test_head_response_has_no_data() {
        let (mut client, _handle) = start(H2ServerBuilder::new());
        handshake(&mut client);

        let mut encoder = HpackEncoder::new();
        let block = method_block(&mut encoder, "HEAD", "/hello");
        client
            .write_all(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
                1, block, true, true,
            )))
            .unwrap();

        let mut codec = FrameCodec::new();
        let mut decoder = HpackDecoder::new();
        let headers = read_until(&mut client, &mut codec, |f| {
            matches!(f, TypedFrame::Headers(_))
        });
        let TypedFrame::Headers(headers) = headers else {
            unreachable!()
        };
        assert!(headers.end_stream);
        let fields = decoder.decode(&headers.header_block).unwrap();
        let response = fields::response_from_fields(1, fields).unwrap();
        assert_eq!(response.headers().get("content-length"), Some("11"));

        // nothing but the PING ACK may follow
        client
            .write_all(&FrameCodec::encode_ping_frame(&PingFrame::new(*b"headdone")))
            .unwrap();
        read_until(&mut client, &mut codec, |f| {
            assert!(!matches!(f, TypedFrame::Data(_)), "DATA sent for HEAD");
            matches!(f, TypedFrame::Ping(p) if p.ack)
        });
    }

    #[test]
    fn test_self_dependent_stream_keeps_hpack_in_sync() {
        let (mut client, _handle) = start(H2ServerBuilder::new());
        handshake(&mut client);

        // GET https, :path "/again" added to the dynamic table as index 62
        let mut first = vec![0x82, 0x87, 0x44, 0x06];
        first.extend_from_slice(b"/again");
        let mut payload = vec![0, 0, 0, 1, 15];
        payload.extend_from_slice(&first);
        let flags = FrameFlags::from_u8(
            FrameFlags::PRIORITY | FrameFlags::END_HEADERS | FrameFlags::END_STREAM,
        );
        client
            .write_all(&FrameCodec::encode_header(
                FrameType::Headers,
                flags,
                1,
                payload.len(),
            ))
            .unwrap();
        client.write_all(&payload).unwrap();

        let mut codec = FrameCodec::new();
        let rst = read_until(&mut client, &mut codec, |f| {
            matches!(f, TypedFrame::RstStream(_))
        });
        let TypedFrame::RstStream(rst) = rst else {
            unreachable!()
        };
        assert_eq!(rst.stream_id, 1);
        assert_eq!(rst.error_code, ErrorCode::ProtocolError);

        // stream 3 refers to the entry stream 1 inserted
        let second = Bytes::from_static(&[0x82, 0x87, 0xBE]);
        client
            .write_all(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
                3, second, true, true,
            )))
            .unwrap();
        let data = read_until(&mut client, &mut codec, |f| matches!(f, TypedFrame::Data(_)));
        let TypedFrame::Data(data) = data else {
            unreachable!()
        };
        assert_eq!(data.stream_id, 3);
        assert_eq!(&data.data[..], b"path=/again");
    }

    #[test]
    fn test_bad_preface() {
        let (mut client, handle) = start(H2ServerBuilder::new());
        client.write_all(&[b'x'; 24]).unwrap();

        let mut codec = FrameCodec::new();
        let goaway = read_until(&mut client, &mut codec, |f| {
            matches!(f, TypedFrame::Goaway(_))
        });
        let TypedFrame::Goaway(goaway) = goaway else {
            unreachable!()
        };
        assert_eq!(goaway.error_code, ErrorCode::ProtocolError);
        assert!(matches!(handle.join().unwrap(), Err(Error::MissingPreface)));
    }

    #[test]
    fn test_ping_is_acknowledged() {
        let (mut client, _handle) = start(H2ServerBuilder::new());
        handshake(&mut client);
        client
            .write_all(&FrameCodec::encode_ping_frame(&PingFrame::new(*b"12345678")))
            .unwrap();

        let mut codec = FrameCodec::new();
        let ack = read_until(&mut client, &mut codec, |f| {
            matches!(f, TypedFrame::Ping(p) if p.ack)
        });
        let TypedFrame::Ping(ack) = ack else {
            unreachable!()
        };
        assert_eq!(&ack.data, b"12345678");
    }

    #[test]
    fn test_interleaved_header_block() {
        let (mut client, handle) = start(H2ServerBuilder::new());
        handshake(&mut client);

        let mut encoder = HpackEncoder::new();
        let block = request_block(&mut encoder, "/");
        // HEADERS without END_HEADERS, then a PING
        client
            .write_all(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
                1, block, true, false,
            )))
            .unwrap();
        client
            .write_all(&FrameCodec::encode_ping_frame(&PingFrame::new([0; 8])))
            .unwrap();

        let mut codec = FrameCodec::new();
        let goaway = read_until(&mut client, &mut codec, |f| {
            matches!(f, TypedFrame::Goaway(_))
        });
        let TypedFrame::Goaway(goaway) = goaway else {
            unreachable!()
        };
        assert_eq!(goaway.error_code, ErrorCode::ProtocolError);
        assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn test_idle_timeout_sends_goaway() {
        let (mut client, handle) =
            start(H2ServerBuilder::new().idle_timeout(Duration::from_millis(200)));
        handshake(&mut client);

        let mut codec = FrameCodec::new();
        let goaway = read_until(&mut client, &mut codec, |f| {
            matches!(f, TypedFrame::Goaway(_))
        });
        let TypedFrame::Goaway(goaway) = goaway else {
            unreachable!()
        };
        assert_eq!(goaway.error_code, ErrorCode::NoError);
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_default_window() {
        let builder = H2ServerBuilder::new();
        assert_eq!(
            builder.settings.get_initial_window_size(),
            DEFAULT_INITIAL_WINDOW_SIZE
        );
    }
}
