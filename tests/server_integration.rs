//! Server lifecycle: certificates, connection limit, shutdown

mod common;

use common::*;
use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};
use tlsmux::http::tls::{SelfSigned, TlsConfig};
use tlsmux::http::Status;
use tlsmux::ServerConfig;

#[test]
fn test_certificate_from_pem_files() {
    let generated = SelfSigned::generate(&["localhost", "127.0.0.1"]).unwrap();
    let mut cert = tempfile::NamedTempFile::new().unwrap();
    cert.write_all(&generated.cert_pem().unwrap()).unwrap();
    cert.flush().unwrap();
    let mut key = tempfile::NamedTempFile::new().unwrap();
    key.write_all(&generated.key_pem().unwrap()).unwrap();
    key.flush().unwrap();

    let tls = TlsConfig::server()
        .cert_and_key_files(cert.path(), key.path())
        .build()
        .unwrap();
    let server = start(ServerConfig::builder().tls(tls), api_handler);

    // verify the served chain against the generated certificate
    let client = TlsConfig::client()
        .alpn(&["h2"])
        .servername("localhost")
        .verify_peer(true)
        .ca_pem(generated.cert_pem().unwrap())
        .build()
        .unwrap();
    let session = try_tls_connect(server.local_addr(), &client).unwrap();
    let mut h2 = tlsmux::http::h2::H2Client::new(session).unwrap();
    assert_eq!(h2.get("/api/test").unwrap().body(), API_BODY);
}

#[test]
fn test_untrusted_certificate_is_rejected() {
    let server = start(config(), api_handler);
    let other = SelfSigned::generate(&["localhost"]).unwrap();
    let client = TlsConfig::client()
        .servername("localhost")
        .verify_peer(true)
        .ca_pem(other.cert_pem().unwrap())
        .build()
        .unwrap();
    assert!(try_tls_connect(server.local_addr(), &client).is_err());
}

#[test]
fn test_connection_limit() {
    let server = start(config().max_connections(1), api_handler);
    let addr = server.local_addr();

    let mut first = h2_client(addr);
    assert_eq!(first.get("/api/test").unwrap().status(), Status::OK);

    // closed before the handshake
    let client = TlsConfig::client().alpn(&["h2"]).build().unwrap();
    assert!(try_tls_connect(addr, &client).is_err());

    // the slot frees once the first connection is gone
    first.close().unwrap();
    drop(first);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(session) = try_tls_connect(addr, &client) {
            let mut second = tlsmux::http::h2::H2Client::new(session).unwrap();
            if let Ok(response) = second.get("/api/test") {
                assert_eq!(response.body(), API_BODY);
                break;
            }
        }
        assert!(Instant::now() < deadline, "slot was never released");
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_shutdown_stops_accepting() {
    let server = start(config(), api_handler);
    let addr = server.local_addr();
    assert_eq!(h2_client(addr).get("/api/test").unwrap().status(), Status::OK);

    server.shutdown().unwrap();
    assert!(TcpStream::connect_timeout(&addr, Duration::from_secs(1)).is_err());
}

#[test]
fn test_open_connection_survives_shutdown() {
    let server = start(config(), api_handler);
    let mut client = h2_client(server.local_addr());

    server.shutdown().unwrap();
    assert_eq!(client.get("/api/test").unwrap().body(), API_BODY);
}
