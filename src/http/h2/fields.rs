//! Header lists to messages and back
//!
//! Requests are validated per RFC 7540 Section 8.1.2. Any violation makes
//! the request malformed, which is a stream error of type PROTOCOL_ERROR:
//! the stream is reset, the connection carries on.

use super::error::{Error, ErrorCode, Result};
use super::hpack::{header_list_size, HeaderField};
use super::stream::StreamId;
use crate::http::headers::CONNECTION_SPECIFIC;
use crate::http::{HttpRequest, HttpResponse, Method, Status, Version};

fn malformed(stream_id: StreamId, reason: impl Into<String>) -> Error {
    Error::stream(stream_id, ErrorCode::ProtocolError, reason)
}

fn utf8(stream_id: StreamId, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| malformed(stream_id, "header field is not valid UTF-8"))
}

/// Validate a regular (non-pseudo) request or response field
fn check_regular(stream_id: StreamId, name: &str, value: &str) -> Result<()> {
    if name.is_empty() || name.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(malformed(stream_id, format!("invalid field name {:?}", name)));
    }
    if CONNECTION_SPECIFIC.contains(&name) {
        return Err(malformed(
            stream_id,
            format!("connection-specific field {:?}", name),
        ));
    }
    if name == "te" && value != "trailers" {
        return Err(malformed(stream_id, "te other than trailers"));
    }
    Ok(())
}

/// Build a request from a decoded header list
///
/// `max_list_size` is our advertised SETTINGS_MAX_HEADER_LIST_SIZE. The
/// body is attached later with [`attach_body`].
pub fn request_from_fields(
    stream_id: StreamId,
    fields: Vec<HeaderField>,
    max_list_size: Option<u32>,
) -> Result<HttpRequest> {
    if let Some(max) = max_list_size {
        let size = header_list_size(&fields);
        if size > max as usize {
            return Err(malformed(
                stream_id,
                format!("header list of {} bytes exceeds {}", size, max),
            ));
        }
    }

    let mut method = None;
    let mut scheme = None;
    let mut path = None;
    let mut authority = None;
    let mut regular = Vec::new();

    for (name, value) in fields {
        let name = utf8(stream_id, name)?;
        let value = utf8(stream_id, value)?;

        if let Some(pseudo) = name.strip_prefix(':') {
            if !regular.is_empty() {
                return Err(malformed(stream_id, "pseudo-header after regular field"));
            }
            let slot = match pseudo {
                "method" => &mut method,
                "scheme" => &mut scheme,
                "path" => &mut path,
                "authority" => &mut authority,
                _ => {
                    return Err(malformed(
                        stream_id,
                        format!("invalid request pseudo-header {:?}", name),
                    ))
                }
            };
            if slot.replace(value).is_some() {
                return Err(malformed(stream_id, format!("duplicate {}", name)));
            }
        } else {
            check_regular(stream_id, &name, &value)?;
            regular.push((name, value));
        }
    }

    let method: Method = method
        .ok_or_else(|| malformed(stream_id, "missing :method"))?
        .parse()
        .map_err(|_| malformed(stream_id, "unknown :method"))?;

    let uri = if method == Method::Connect {
        if authority.is_none() || scheme.is_some() || path.is_some() {
            return Err(malformed(stream_id, "CONNECT needs :authority only"));
        }
        authority.clone().unwrap_or_default()
    } else {
        if scheme.is_none() {
            return Err(malformed(stream_id, "missing :scheme"));
        }
        match path {
            Some(p) if !p.is_empty() => p,
            _ => return Err(malformed(stream_id, "missing or empty :path")),
        }
    };

    let mut request = HttpRequest::builder()
        .method(method)
        .uri(uri)
        .version(Version::H2)
        .build();

    let headers = request.headers_mut();
    if let Some(authority) = authority {
        if !regular.iter().any(|(n, _)| n == "host") {
            headers.insert("host", authority);
        }
    }
    for (name, value) in regular {
        headers.insert(name, value);
    }

    Ok(request)
}

/// Attach the reassembled body, checking it against `content-length`
pub fn attach_body(stream_id: StreamId, request: &mut HttpRequest, body: Vec<u8>) -> Result<()> {
    if let Some(declared) = request.headers().get("content-length") {
        let declared: usize = declared
            .trim()
            .parse()
            .map_err(|_| malformed(stream_id, "invalid content-length"))?;
        if declared != body.len() {
            return Err(malformed(
                stream_id,
                format!(
                    "content-length {} but body has {} bytes",
                    declared,
                    body.len()
                ),
            ));
        }
    }
    request.set_body(body);
    Ok(())
}

/// Header list for a response: `:status` first, names lowercased,
/// connection-specific fields dropped
pub fn response_fields(response: &HttpResponse) -> Vec<HeaderField> {
    let mut fields = Vec::with_capacity(response.headers().len() + 1);
    fields.push((
        b":status".to_vec(),
        response.status().code().to_string().into_bytes(),
    ));

    for (name, value) in response.headers().iter() {
        let name = name.to_ascii_lowercase();
        if CONNECTION_SPECIFIC.contains(&name.as_str()) {
            continue;
        }
        fields.push((name.into_bytes(), value.as_bytes().to_vec()));
    }
    fields
}

/// Header list for a request sent by the client
///
/// `:authority` comes from the `Host` header, which is then dropped.
pub fn request_fields(request: &HttpRequest, scheme: &str) -> Vec<HeaderField> {
    let mut fields = vec![
        (b":method".to_vec(), request.method().as_str().as_bytes().to_vec()),
        (b":scheme".to_vec(), scheme.as_bytes().to_vec()),
        (b":path".to_vec(), request.uri().as_bytes().to_vec()),
    ];
    if let Some(host) = request.headers().get("host") {
        fields.push((b":authority".to_vec(), host.as_bytes().to_vec()));
    }

    for (name, value) in request.headers().iter() {
        let name = name.to_ascii_lowercase();
        if name == "host" || CONNECTION_SPECIFIC.contains(&name.as_str()) {
            continue;
        }
        fields.push((name.into_bytes(), value.as_bytes().to_vec()));
    }
    fields
}

/// Build a response from a decoded header list (client side)
pub fn response_from_fields(stream_id: StreamId, fields: Vec<HeaderField>) -> Result<HttpResponse> {
    let mut status = None;
    let mut headers = Vec::new();

    for (name, value) in fields {
        let name = utf8(stream_id, name)?;
        let value = utf8(stream_id, value)?;
        if name == ":status" {
            let code = value
                .parse::<u16>()
                .ok()
                .and_then(|code| Status::new(code).ok())
                .ok_or_else(|| malformed(stream_id, format!("invalid :status {:?}", value)))?;
            status = Some(code);
        } else if name.starts_with(':') {
            return Err(malformed(
                stream_id,
                format!("invalid response pseudo-header {:?}", name),
            ));
        } else {
            headers.push((name, value));
        }
    }

    let status = status.ok_or_else(|| malformed(stream_id, "missing :status"))?;
    let mut response = HttpResponse::new(status);
    response.set_version(Version::H2);
    for (name, value) in headers {
        response.headers_mut().insert(name, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, value: &str) -> HeaderField {
        (name.as_bytes().to_vec(), value.as_bytes().to_vec())
    }

    fn get_fields() -> Vec<HeaderField> {
        vec![
            field(":method", "GET"),
            field(":scheme", "https"),
            field(":path", "/api/test?q=1"),
            field(":authority", "localhost:8443"),
            field("accept", "application/json"),
            field("cookie", "a=1"),
            field("cookie", "b=2"),
        ]
    }

    fn assert_malformed(fields: Vec<HeaderField>) {
        let err = request_from_fields(1, fields, None).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ProtocolError);
        assert_eq!(err.stream_id(), Some(1));
    }

    #[test]
    fn test_request_from_fields() {
        let request = request_from_fields(1, get_fields(), Some(16_384)).unwrap();
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.uri(), "/api/test?q=1");
        assert_eq!(request.path(), "/api/test");
        assert_eq!(request.version(), Version::H2);
        assert_eq!(request.headers().get("host"), Some("localhost:8443"));
        assert_eq!(request.headers().get_all("cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_missing_pseudo_headers() {
        let mut fields = get_fields();
        fields.remove(0);
        assert_malformed(fields);

        let mut fields = get_fields();
        fields.remove(1);
        assert_malformed(fields);

        let mut fields = get_fields();
        fields[2] = field(":path", "");
        assert_malformed(fields);
    }

    #[test]
    fn test_invalid_pseudo_headers() {
        let mut fields = get_fields();
        fields.push(field(":method", "POST"));
        assert_malformed(fields);

        let mut fields = get_fields();
        fields.insert(0, field(":status", "200"));
        assert_malformed(fields);

        // pseudo-header after a regular field
        let mut fields = get_fields();
        fields.push(field(":authority", "other"));
        assert_malformed(fields);
    }

    #[test]
    fn test_invalid_regular_fields() {
        let mut fields = get_fields();
        fields.push(field("Accept-Encoding", "gzip"));
        assert_malformed(fields);

        let mut fields = get_fields();
        fields.push(field("connection", "keep-alive"));
        assert_malformed(fields);

        let mut fields = get_fields();
        fields.push(field("te", "gzip"));
        assert_malformed(fields);

        let mut fields = get_fields();
        fields.push(field("te", "trailers"));
        assert!(request_from_fields(1, fields, None).is_ok());
    }

    #[test]
    fn test_header_list_too_large() {
        let mut fields = get_fields();
        fields.push(field("x-big", &"v".repeat(200)));
        let err = request_from_fields(1, fields, Some(128)).unwrap_err();
        assert_eq!(err.stream_id(), Some(1));
    }

    #[test]
    fn test_attach_body() {
        let mut request = request_from_fields(1, get_fields(), None).unwrap();
        request.headers_mut().insert("content-length", "4");
        assert!(attach_body(1, &mut request, b"abc".to_vec()).is_err());
        attach_body(1, &mut request, b"abcd".to_vec()).unwrap();
        assert_eq!(request.body(), b"abcd");
    }

    #[test]
    fn test_response_fields() {
        let response = HttpResponse::builder()
            .header("Content-Type", "application/json")
            .header("Connection", "keep-alive")
            .header("Transfer-Encoding", "chunked")
            .header("X-Trace", "abc")
            .build();
        let fields = response_fields(&response);
        assert_eq!(
            fields,
            vec![
                field(":status", "200"),
                field("content-type", "application/json"),
                field("x-trace", "abc"),
            ]
        );
    }

    #[test]
    fn test_request_fields_round_trip() {
        let request = HttpRequest::builder()
            .method(Method::Post)
            .uri("/submit")
            .header("Host", "example.test")
            .header("Content-Type", "text/plain")
            .header("Connection", "close")
            .build();
        let fields = request_fields(&request, "https");
        assert_eq!(fields[3], field(":authority", "example.test"));
        assert_eq!(fields.len(), 5);

        let parsed = request_from_fields(1, fields, None).unwrap();
        assert_eq!(parsed.method(), Method::Post);
        assert_eq!(parsed.headers().get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_response_from_fields() {
        let response =
            response_from_fields(1, vec![field(":status", "404"), field("x-a", "1")]).unwrap();
        assert_eq!(response.status(), Status::NOT_FOUND);
        assert_eq!(response.version(), Version::H2);
        assert_eq!(response.headers().get("x-a"), Some("1"));

        assert!(response_from_fields(1, vec![field("x-a", "1")]).is_err());
        assert!(response_from_fields(1, vec![field(":status", "abc")]).is_err());
    }
}
