//! HTTP/2 client
//!
//! A synchronous client that multiplexes requests over one connection.
//! Requests are sent with [`H2Client::send_request`] without waiting, and
//! responses are collected per stream, so many streams can be in flight at
//! once. Lower-level methods write arbitrary frames for protocol tests.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::fields;
use super::flow_control::FlowControl;
use super::frames::{
    DataFrame, Frame, GoawayFrame, PingFrame, RstStreamFrame, SettingsFrame, TypedFrame,
    WindowUpdateFrame,
};
use super::hpack::{HpackDecoder, HpackEncoder};
use super::settings::Settings;
use super::stream::{HeaderBlock, StreamId, StreamManager};
use super::PREFACE;
use crate::http::session::{HttpSession, SessionOps};
use crate::http::{HttpRequest, HttpResponse, Method};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::time::Duration;

const READ_BUF_SIZE: usize = 16 * 1024;

/// HTTP/2 client builder
#[derive(Debug, Clone)]
pub struct H2ClientBuilder {
    settings: Settings,
    respect_peer_stream_limit: bool,
    timeout: Option<Duration>,
    authority: String,
}

impl H2ClientBuilder {
    pub fn new() -> Self {
        H2ClientBuilder {
            settings: Settings {
                enable_push: Some(false),
                ..Settings::default()
            },
            respect_peer_stream_limit: true,
            timeout: Some(Duration::from_secs(10)),
            authority: "localhost".to_string(),
        }
    }

    /// Settings sent in the client's first SETTINGS frame
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Whether [`H2Client::send_request`] holds back at the server's
    /// SETTINGS_MAX_CONCURRENT_STREAMS
    ///
    /// Turning this off lets tests provoke REFUSED_STREAM.
    pub fn respect_peer_stream_limit(mut self, respect: bool) -> Self {
        self.respect_peer_stream_limit = respect;
        self
    }

    /// Read timeout for every wait on the server
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `:authority` used by [`H2Client::get`]
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn build<S: SessionOps>(self, session: S) -> Result<H2Client<S>> {
        self.settings.validate()?;
        let mut session = HttpSession::new(session);
        session.set_timeout(self.timeout);

        Ok(H2Client {
            session,
            codec: FrameCodec::new(),
            streams: StreamManager::new(true),
            flow: FlowControl::default(),
            encoder: HpackEncoder::new(),
            decoder: HpackDecoder::new(),
            local: self.settings,
            remote: Settings::default(),
            respect_peer_stream_limit: self.respect_peer_stream_limit,
            authority: self.authority,
            connected: false,
            header_block: None,
            responses: HashMap::new(),
            goaway: None,
        })
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP/2 client connection
pub struct H2Client<S: SessionOps> {
    session: HttpSession<S>,
    codec: FrameCodec,
    streams: StreamManager,
    flow: FlowControl,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    local: Settings,
    remote: Settings,
    respect_peer_stream_limit: bool,
    authority: String,
    connected: bool,
    header_block: Option<HeaderBlock>,
    /// Finished streams waiting to be collected
    responses: HashMap<StreamId, Result<HttpResponse>>,
    /// GOAWAY received from the server
    goaway: Option<GoawayFrame>,
}

impl<S: SessionOps> H2Client<S> {
    /// Create a client with default options
    pub fn new(session: S) -> Result<Self> {
        H2ClientBuilder::new().build(session)
    }

    /// Send the preface and SETTINGS, then wait for the server's SETTINGS
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        let mut out = BytesMut::from(PREFACE);
        out.put(FrameCodec::encode_settings_frame(&SettingsFrame::new(
            self.local.clone(),
        )));
        self.write(&out)?;

        loop {
            match self.read_frame()? {
                TypedFrame::Settings(f) if !f.ack => {
                    self.process_frame(TypedFrame::Settings(f))?;
                    break;
                }
                other => {
                    return Err(Error::protocol(format!(
                        "expected SETTINGS, got {}",
                        other.name()
                    )))
                }
            }
        }

        self.connected = true;
        Ok(())
    }

    /// Settings the server advertised
    pub fn remote_settings(&self) -> &Settings {
        &self.remote
    }

    /// Open a stream and send the request without waiting for the response
    ///
    /// The body is sent as far as the windows allow; the rest goes out while
    /// responses are being read.
    pub fn send_request(&mut self, request: &HttpRequest) -> Result<StreamId> {
        self.connect()?;
        if let Some(goaway) = &self.goaway {
            return Err(Error::GoAway {
                last_stream_id: goaway.last_stream_id,
                code: goaway.error_code,
                debug: goaway.debug_data.to_vec(),
            });
        }

        let id = self.streams.create_stream(
            self.remote.get_initial_window_size(),
            self.local.get_initial_window_size(),
            self.respect_peer_stream_limit,
        )?;

        let end_stream = request.body().is_empty();
        let fields = fields::request_fields(request, "https");
        let block = self
            .encoder
            .encode(fields.iter().map(|(n, v)| (n.as_slice(), v.as_slice())));

        if let Some(stream) = self.streams.get_mut(id) {
            stream.send_headers(end_stream)?;
            if !end_stream {
                stream.queue_data(request.body(), true);
            }
        }

        let mut out = FrameCodec::encode_header_block(
            id,
            block,
            end_stream,
            self.remote.get_max_frame_size() as usize,
        );
        self.schedule_data(&mut out);
        self.write(&out)?;

        tracing::trace!(stream_id = id, path = request.path(), "request sent");
        Ok(id)
    }

    /// Wait for the response on `stream_id`
    ///
    /// A stream the server reset comes back as [`Error::Stream`] carrying the
    /// reset code; a stream above the server's GOAWAY as [`Error::GoAway`].
    pub fn recv_response(&mut self, stream_id: StreamId) -> Result<HttpResponse> {
        loop {
            if let Some(result) = self.responses.remove(&stream_id) {
                return result;
            }
            if self.streams.get(stream_id).is_none() {
                if let Some(goaway) = &self.goaway {
                    return Err(Error::GoAway {
                        last_stream_id: goaway.last_stream_id,
                        code: goaway.error_code,
                        debug: goaway.debug_data.to_vec(),
                    });
                }
                return Err(Error::stream(
                    stream_id,
                    ErrorCode::StreamClosed,
                    "unknown stream",
                ));
            }

            let frame = self.read_frame()?;
            self.process_frame(frame)?;
        }
    }

    /// Collect responses for several streams, in the order given
    pub fn recv_responses(&mut self, stream_ids: &[StreamId]) -> Vec<Result<HttpResponse>> {
        stream_ids
            .iter()
            .map(|&id| self.recv_response(id))
            .collect()
    }

    /// Send a request and wait for its response
    pub fn request(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        let id = self.send_request(request)?;
        self.recv_response(id)
    }

    /// GET `path`
    pub fn get(&mut self, path: &str) -> Result<HttpResponse> {
        let request = HttpRequest::builder()
            .method(Method::Get)
            .uri(path)
            .header("host", self.authority.clone())
            .build();
        self.request(&request)
    }

    /// Write a raw frame as-is, valid or not
    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write(&FrameCodec::encode_frame(frame))
    }

    /// Write bytes as-is
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write(bytes)
    }

    pub fn send_ping(&mut self, data: [u8; 8]) -> Result<()> {
        self.write(&FrameCodec::encode_ping_frame(&PingFrame::new(data)))
    }

    pub fn send_rst_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) -> Result<()> {
        if let Some(mut stream) = self.streams.remove(stream_id) {
            stream.reset();
        }
        let frame = RstStreamFrame {
            stream_id,
            error_code,
        };
        self.write(&FrameCodec::encode_rst_stream_frame(&frame))
    }

    pub fn send_goaway(&mut self, error_code: ErrorCode, debug: &str) -> Result<()> {
        let frame = GoawayFrame::new(0, error_code, Bytes::copy_from_slice(debug.as_bytes()));
        self.write(&FrameCodec::encode_goaway_frame(&frame))
    }

    /// Read the next frame off the wire without processing it
    pub fn read_frame(&mut self) -> Result<TypedFrame> {
        loop {
            if let Some(frame) = self.codec.next_frame(self.local.get_max_frame_size())? {
                return FrameCodec::decode(frame);
            }

            let mut buf = [0u8; READ_BUF_SIZE];
            let n = match self.session.read(&mut buf) {
                Ok(n) => n,
                Err(crate::http::Error::Timeout) => return Err(Error::Timeout),
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.codec.feed(&buf[..n]);
        }
    }

    /// GOAWAY received so far, if any
    pub fn goaway(&self) -> Option<&GoawayFrame> {
        self.goaway.as_ref()
    }

    /// Close the underlying session
    pub fn close(&mut self) -> Result<()> {
        self.session.close()?;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.session.write_all(bytes)?;
        Ok(())
    }

    /// Apply a frame read from the server
    fn process_frame(&mut self, frame: TypedFrame) -> Result<()> {
        if let Some(block) = &self.header_block {
            if !matches!(&frame, TypedFrame::Continuation(c) if c.stream_id == block.stream_id) {
                return Err(Error::protocol("frame interleaved with header block"));
            }
        }

        let mut out = BytesMut::new();
        match frame {
            TypedFrame::Settings(f) if !f.ack => {
                if let Some(size) = f.settings.initial_window_size {
                    self.streams.update_initial_window_size(size)?;
                }
                if f.settings.max_concurrent_streams.is_some() {
                    self.streams
                        .set_max_concurrent_streams(f.settings.max_concurrent_streams);
                }
                self.remote.merge(&f.settings);
                out.put(FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
            }
            TypedFrame::Ping(f) if !f.ack => {
                out.put(FrameCodec::encode_ping_frame(&PingFrame::ack(f.data)));
            }
            TypedFrame::Headers(f) => {
                let id = f.stream_id;
                let mut block = HeaderBlock::new(id, f.end_stream, &f.header_block);
                match self.streams.get_mut(id) {
                    Some(stream) => stream.receive_headers(f.end_stream)?,
                    None => block.discard = true,
                }
                if f.end_headers {
                    self.end_header_block(block)?;
                } else {
                    self.header_block = Some(block);
                }
            }
            TypedFrame::Continuation(f) => {
                let mut block = self
                    .header_block
                    .take()
                    .ok_or_else(|| Error::protocol("CONTINUATION without HEADERS"))?;
                block.extend(&f.header_block)?;
                if f.end_headers {
                    self.end_header_block(block)?;
                } else {
                    self.header_block = Some(block);
                }
            }
            TypedFrame::Data(f) => {
                let id = f.stream_id;
                self.flow.consume_recv_window(f.flow_len)?;
                if let Some(increment) = self.flow.should_send_window_update() {
                    self.flow.send_window_update(increment)?;
                    out.put(FrameCodec::encode_window_update_frame(
                        &WindowUpdateFrame::new(0, increment),
                    ));
                }

                if let Some(stream) = self.streams.get_mut(id) {
                    stream.receive_data(&f)?;
                    if stream.remote_done() {
                        self.complete(id);
                    } else if let Some(increment) = stream.flow_control().should_send_window_update()
                    {
                        stream.flow_control_mut().send_window_update(increment)?;
                        out.put(FrameCodec::encode_window_update_frame(
                            &WindowUpdateFrame::new(id, increment),
                        ));
                    }
                }
            }
            TypedFrame::RstStream(f) => {
                if let Some(mut stream) = self.streams.remove(f.stream_id) {
                    stream.reset();
                    tracing::debug!(stream_id = f.stream_id, code = %f.error_code, "stream reset by server");
                    self.responses.insert(
                        f.stream_id,
                        Err(Error::stream(f.stream_id, f.error_code, "reset by server")),
                    );
                }
            }
            TypedFrame::WindowUpdate(f) => {
                if f.stream_id == 0 {
                    self.flow.increase_send_window(f.size_increment)?;
                } else if let Some(stream) = self.streams.get_mut(f.stream_id) {
                    stream
                        .flow_control_mut()
                        .increase_send_window(f.size_increment)?;
                }
            }
            TypedFrame::Goaway(f) => {
                tracing::debug!(last_stream_id = f.last_stream_id, code = %f.error_code, "GOAWAY from server");
                for id in self.streams.stream_ids() {
                    if id > f.last_stream_id {
                        if let Some(mut stream) = self.streams.remove(id) {
                            stream.reset();
                        }
                    }
                }
                self.goaway = Some(f);
            }
            _ => {}
        }

        self.schedule_data(&mut out);
        if !out.is_empty() {
            self.write(&out)?;
        }
        Ok(())
    }

    fn end_header_block(&mut self, block: HeaderBlock) -> Result<()> {
        let id = block.stream_id;
        let discard = block.discard;
        let fields = self.decoder.decode(&block.into_bytes())?;
        if discard {
            return Ok(());
        }

        if let Some(stream) = self.streams.get_mut(id) {
            // the first block is the response head; later ones are trailers
            if stream.fields().is_empty() {
                stream.add_fields(fields);
            }
            if stream.remote_done() {
                self.complete(id);
            }
        }
        Ok(())
    }

    /// Turn a finished stream into a response
    fn complete(&mut self, id: StreamId) {
        let Some(stream) = self.streams.get_mut(id) else {
            return;
        };
        let fields = stream.take_fields();
        let body = stream.take_body();
        let result = fields::response_from_fields(id, fields).map(|mut response| {
            response.set_body(body);
            response
        });
        self.responses.insert(id, result);
        self.streams.remove_closed();
    }

    /// Append whatever request DATA the windows allow
    fn schedule_data(&mut self, out: &mut BytesMut) {
        let max_frame_size = self.remote.get_max_frame_size() as usize;
        for stream in self.streams.iter_mut() {
            loop {
                let limit = max_frame_size.min(self.flow.send_window().available());
                let Some((chunk, end_stream)) = stream.next_data(limit) else {
                    break;
                };
                self.flow.consume_send_window(chunk.len());
                out.put(FrameCodec::encode_data_frame(&DataFrame::new(
                    stream.id(),
                    chunk,
                    end_stream,
                )));
                if end_stream {
                    break;
                }
            }
        }
    }
}

impl<S: SessionOps> std::fmt::Debug for H2Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Client")
            .field("connected", &self.connected)
            .field("streams", &self.streams)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}
