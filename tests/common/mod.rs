//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use tlsmux::http::h2::{H2Client, H2ClientBuilder};
use tlsmux::http::tls::{HandshakeError, TlsConfig, TlsSessionOps};
use tlsmux::http::{HttpRequest, HttpResponse, Status};
use tlsmux::server::{CancelToken, Handler, ServerConfigBuilder};
use tlsmux::{Server, ServerConfig, ServerHandle};

pub const API_BODY: &[u8] = br#"{"status":"ok","service":"tlsmux"}"#;

pub const LARGE_BODY_LEN: usize = 200_000;

/// Routes used across the tests
pub fn api_handler(req: &HttpRequest, _cancel: &CancelToken) -> HttpResponse {
    match req.path() {
        "/api/test" => HttpResponse::builder()
            .header("content-type", "application/json")
            .body(API_BODY.to_vec())
            .build(),
        "/large" => HttpResponse::builder()
            .header("content-type", "application/octet-stream")
            .body(large_body())
            .build(),
        "/echo" => HttpResponse::builder()
            .header("content-type", "application/octet-stream")
            .body(req.body().to_vec())
            .build(),
        "/slow" => {
            thread::sleep(Duration::from_millis(300));
            HttpResponse::builder()
                .header("content-type", "text/plain")
                .body(b"slow".to_vec())
                .build()
        }
        "/panic" => panic!("handler failure"),
        _ => HttpResponse::new(Status::NOT_FOUND),
    }
}

pub fn large_body() -> Vec<u8> {
    (0..LARGE_BODY_LEN).map(|i| (i % 251) as u8).collect()
}

pub fn server_tls(alpn: &[&str]) -> TlsConfig {
    TlsConfig::server()
        .self_signed(&["localhost"])
        .alpn(alpn)
        .build()
        .unwrap()
}

/// Config builder with a self-signed certificate and the default ALPN list
pub fn config() -> ServerConfigBuilder {
    ServerConfig::builder().tls(server_tls(&["h2", "http/1.1"]))
}

/// Bind on an ephemeral loopback port and serve on a background thread
pub fn start(config: ServerConfigBuilder, handler: impl Handler) -> ServerHandle {
    tlsmux::logging::try_init_for_tests();
    let config = config.bind("127.0.0.1:0").build().unwrap();
    Server::bind(config, handler).unwrap().spawn().unwrap()
}

pub fn try_tls_connect(
    addr: SocketAddr,
    client: &TlsConfig,
) -> Result<TlsSessionOps, HandshakeError> {
    let tcp = TcpStream::connect(addr).unwrap();
    TlsSessionOps::connect(tcp, client, Some(Duration::from_secs(5)))
}

pub fn tls_connect(addr: SocketAddr, alpn: &[&str]) -> TlsSessionOps {
    let client = TlsConfig::client()
        .alpn(alpn)
        .servername("localhost")
        .build()
        .unwrap();
    try_tls_connect(addr, &client).unwrap()
}

pub fn h2_builder_client(addr: SocketAddr, builder: H2ClientBuilder) -> H2Client<TlsSessionOps> {
    let session = tls_connect(addr, &["h2", "http/1.1"]);
    assert_eq!(session.alpn_protocol(), Some(&b"h2"[..]));
    let mut client = builder.build(session).unwrap();
    client.connect().unwrap();
    client
}

pub fn h2_client(addr: SocketAddr) -> H2Client<TlsSessionOps> {
    h2_builder_client(addr, H2ClientBuilder::new())
}

pub fn api_request() -> HttpRequest {
    HttpRequest::builder()
        .uri("/api/test")
        .header("host", "localhost")
        .build()
}
