//! tlsmux demo server
//!
//! Serves `GET /api/test` with a fixed JSON document over HTTP/2 or
//! HTTP/1.1 on one TLS port. Without `--cert` a self-signed certificate
//! for `localhost` is generated at startup.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tlsmux::http::tls::TlsConfig;
use tlsmux::http::{HttpRequest, HttpResponse, Method, Status};
use tlsmux::server::{CancelToken, Protocol};
use tlsmux::{Server, ServerConfig};

const API_BODY: &[u8] = br#"{"status":"ok","service":"tlsmux"}"#;

#[derive(Debug, Parser)]
#[command(name = "tlsmux", version, about = "HTTP/1.1 and HTTP/2 on one TLS port")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8443")]
    bind: String,

    /// PEM file holding the certificate chain and private key
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Handler threads
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Idle timeout in seconds
    #[arg(long, default_value_t = 30)]
    idle_timeout: u64,

    /// Serve HTTP/2 to clients that send no ALPN
    #[arg(long)]
    h2_fallback: bool,
}

fn handle(req: &HttpRequest, _cancel: &CancelToken) -> HttpResponse {
    match (req.method(), req.path()) {
        (Method::Get, "/api/test") => HttpResponse::builder()
            .header("content-type", "application/json")
            .body(API_BODY.to_vec())
            .build(),
        (_, "/api/test") => HttpResponse::new(Status::METHOD_NOT_ALLOWED),
        _ => HttpResponse::new(Status::NOT_FOUND),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tlsmux::logging::init("tlsmux=info")?;
    let args = Args::parse();

    let tls = match &args.cert {
        Some(path) => TlsConfig::server().cert_file(path),
        None => {
            tracing::warn!("no certificate given, generating a self-signed one");
            TlsConfig::server().self_signed(&["localhost", "127.0.0.1"])
        }
    }
    .alpn(&["h2", "http/1.1"])
    .build()?;

    let fallback = if args.h2_fallback {
        Protocol::H2
    } else {
        Protocol::Http11
    };
    let config = ServerConfig::builder()
        .bind(args.bind)
        .tls(tls)
        .workers(args.workers)
        .idle_timeout(Duration::from_secs(args.idle_timeout))
        .fallback_protocol(fallback)
        .build()?;

    let server = Server::bind(config, handle)?;
    tracing::info!(address = %server.local_addr(), "tlsmux starting");
    server.run()?;
    Ok(())
}
