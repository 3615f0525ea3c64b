//! Writing responses onto a hijacked connection.
//!
//! # Responsibilities
//! - Serialise status lines and header blocks by hand (no server framework owns the socket)
//! - Stream upstream response bodies, re-framing them when the length is unknown
//! - Best-effort error responses (header-only 400 / 502)
//!
//! # Design Decisions
//! - Header names and values are written as the upstream client layer handed them over
//! - The upstream's reason phrase is kept when hyper exposes one
//! - Relayed responses always say `connection: close`: one request per connection
//! - Every helper flushes before returning; callers never hold unflushed bytes

use std::io;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Body;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Append `HTTP/1.1 <code> <reason>\r\n`.
pub fn encode_status_line(out: &mut Vec<u8>, status: StatusCode, reason: Option<&[u8]>) {
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.as_str().as_bytes());
    out.push(b' ');
    match reason {
        Some(reason) => out.extend_from_slice(reason),
        None => out.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes()),
    }
    out.extend_from_slice(b"\r\n");
}

/// Append every header/value pair, one line each, without the terminating blank line.
pub fn encode_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Write a bare status line and blank line, e.g. `HTTP/1.1 400 Bad Request\r\n\r\n`.
pub async fn write_status_only<W>(writer: &mut W, status: StatusCode) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(64);
    encode_status_line(&mut out, status, None);
    out.extend_from_slice(b"\r\n");
    writer.write_all(&out).await?;
    writer.flush().await
}

/// Write a header-only error response that tells the client no body follows.
pub async fn write_empty_response<W>(writer: &mut W, status: StatusCode) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(96);
    encode_status_line(&mut out, status, None);
    out.extend_from_slice(b"content-length: 0\r\nconnection: close\r\n\r\n");
    writer.write_all(&out).await?;
    writer.flush().await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Bodyless,
    Length,
    Chunked,
}

fn framing(method: &Method, status: StatusCode, headers: &HeaderMap) -> Framing {
    if method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        Framing::Bodyless
    } else if headers.contains_key(CONTENT_LENGTH) {
        Framing::Length
    } else {
        Framing::Chunked
    }
}

/// Write a full upstream response (status line, headers, body) and flush.
///
/// Returns the number of body bytes relayed.
pub async fn write_response<W, B>(writer: &mut W, method: &Method, response: Response<B>) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let (mut parts, mut body) = response.into_parts();
    let reason = parts
        .extensions
        .get::<hyper::ext::ReasonPhrase>()
        .map(|r| r.as_bytes().to_vec());

    let framing = framing(method, parts.status, &parts.headers);
    if framing == Framing::Chunked {
        parts.headers.remove(TRANSFER_ENCODING);
        parts
            .headers
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    }

    parts.headers.remove("keep-alive");
    parts.headers.insert(CONNECTION, HeaderValue::from_static("close"));

    let mut head = Vec::with_capacity(512);
    encode_status_line(&mut head, parts.status, reason.as_deref());
    encode_headers(&mut head, &parts.headers);
    head.extend_from_slice(b"\r\n");
    writer.write_all(&head).await?;

    let mut relayed = 0u64;
    if framing != Framing::Bodyless {
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(io::Error::other)?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            if data.is_empty() {
                continue;
            }
            relayed += data.len() as u64;
            if framing == Framing::Chunked {
                writer
                    .write_all(format!("{:x}\r\n", data.len()).as_bytes())
                    .await?;
                writer.write_all(&data).await?;
                writer.write_all(b"\r\n").await?;
            } else {
                writer.write_all(&data).await?;
            }
        }
        if framing == Framing::Chunked {
            writer.write_all(b"0\r\n\r\n").await?;
        }
    }

    writer.flush().await?;
    Ok(relayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{Empty, Full};

    #[tokio::test]
    async fn status_only_is_exact() {
        let mut out = Vec::new();
        write_status_only(&mut out, StatusCode::BAD_REQUEST).await.unwrap();
        assert_eq!(out, b"HTTP/1.1 400 Bad Request\r\n\r\n");
    }

    #[tokio::test]
    async fn relays_sized_body_verbatim() {
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .header("content-length", "2")
            .header("x-upstream", "a")
            .header("x-upstream", "b")
            .body(Full::new(Bytes::from_static(b"ok")))
            .unwrap();

        let mut out = Vec::new();
        let relayed = write_response(&mut out, &Method::POST, response).await.unwrap();
        assert_eq!(relayed, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 201 Created\r\ncontent-length: 2\r\nx-upstream: a\r\nx-upstream: b\r\nconnection: close\r\n\r\nok"
        );
    }

    #[tokio::test]
    async fn unknown_length_is_rechunked() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header("transfer-encoding", "chunked")
            .body(Full::new(Bytes::from_static(b"hello")))
            .unwrap();

        let mut out = Vec::new();
        write_response(&mut out, &Method::GET, response).await.unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n5\r\nhello\r\n0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn head_and_no_content_have_no_body() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header("content-length", "42")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let mut out = Vec::new();
        write_response(&mut out, &Method::HEAD, response).await.unwrap();
        assert_eq!(out, b"HTTP/1.1 200 OK\r\ncontent-length: 42\r\nconnection: close\r\n\r\n");

        let response = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Empty::<Bytes>::new())
            .unwrap();
        let mut out = Vec::new();
        write_response(&mut out, &Method::DELETE, response).await.unwrap();
        assert_eq!(out, b"HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n");
    }

    #[tokio::test]
    async fn upstream_keep_alive_is_overridden() {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header("content-length", "0")
            .header("connection", "keep-alive")
            .header("keep-alive", "timeout=5")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let mut out = Vec::new();
        write_response(&mut out, &Method::GET, response).await.unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("\r\nconnection: close\r\n"), "{}", out);
        assert!(!out.contains("keep-alive"), "{}", out);
    }

    #[tokio::test]
    async fn empty_error_response() {
        let mut out = Vec::new();
        write_empty_response(&mut out, StatusCode::BAD_GATEWAY).await.unwrap();
        assert_eq!(
            out,
            b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
        );
    }
}
