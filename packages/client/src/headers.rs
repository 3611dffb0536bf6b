//! Request-head serializer and response-head parser
//!
//! The wire format is HTTP/1.x: a start line, `\r\n`-separated header lines,
//! and a blank line. The serializer emits a default header block suitable for
//! downloads; caller-supplied headers override defaults on a case-insensitive
//! name match and keep their original casing on the wire.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{StatusCode, Version};

use crate::error::{Error, Kind};
use crate::request::Request;
use crate::response::Response;

const USER_AGENT: &str = concat!("shoal/", env!("CARGO_PKG_VERSION"));

fn version_tag(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "1.0"
    } else {
        "1.1"
    }
}

/// Serialize the request line and header block, including the terminating
/// blank line. No body framing headers are synthesized; a caller uploading a
/// body supplies its own `Content-Length` or `Transfer-Encoding`.
pub(crate) fn serialize_request_head(req: &Request) -> Vec<u8> {
    let url = req.url();

    let mut target = url.path().to_owned();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    // `Url` strips default ports, so an explicit port here is a non-default one.
    let mut host = url.host_str().unwrap_or_default().to_owned();
    if let Some(port) = url.port() {
        host.push(':');
        host.push_str(&port.to_string());
    }

    let mut headers: Vec<(String, String)> = vec![
        ("Host".to_owned(), host),
        ("User-Agent".to_owned(), USER_AGENT.to_owned()),
        ("Accept".to_owned(), "*/*".to_owned()),
        ("Accept-Encoding".to_owned(), "gzip".to_owned()),
        ("Accept-Language".to_owned(), "en-US,en;q=0.5".to_owned()),
        ("Connection".to_owned(), "close".to_owned()),
    ];
    for (name, value) in req.headers() {
        match headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(slot) => *slot = (name.clone(), value.clone()),
            None => headers.push((name.clone(), value.clone())),
        }
    }

    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(
        format!(
            "{} {} HTTP/{}\r\n",
            req.method(),
            target,
            version_tag(req.version())
        )
        .as_bytes(),
    );
    for (name, value) in &headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Parse a complete response head (terminated by `\r\n\r\n`).
///
/// The status line must carry an `HTTP/` protocol token and a numeric code.
/// Header lines lacking the `": "` separator are skipped silently, as are
/// names and values the header map rejects.
pub(crate) fn parse_response_head(raw: &[u8]) -> Result<Response, Error> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut tokens = status_line.splitn(3, ' ');
    let protocol = tokens.next().unwrap_or_default();
    let code = tokens.next().unwrap_or_default();
    let reason = tokens.next().unwrap_or_default();

    let version = match protocol {
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/1.1" => Version::HTTP_11,
        other if other.starts_with("HTTP/") => Version::HTTP_11,
        _ => {
            return Err(Error::new(Kind::Protocol).with(format!(
                "malformed status line: {status_line:?}"
            )));
        }
    };
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| {
            Error::new(Kind::Protocol).with(format!("invalid status code in {status_line:?}"))
        })?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(": ") else {
            continue;
        };
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        headers.append(name, value);
    }

    Ok(Response::new(version, status, reason.to_owned(), headers))
}
