//! Reading a request off a hijacked connection.
//!
//! # Responsibilities
//! - Own the raw client stream from the first byte (no server framework in between)
//! - Parse the request head, bounded by `max_head_bytes`
//! - Read `Content-Length` or chunked bodies, bounded by `max_body_bytes`
//!
//! # Design Decisions
//! - One request per connection; the connection is closed when its owner drops it
//! - Bytes read past the head stay in the buffer so an upgraded tunnel sees them first

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Version};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use crate::error::GatewayError;

const MAX_HEADERS: usize = 100;

/// A client connection taken over from the listener.
///
/// The buffered stream is the only handle to the socket, so dropping it is
/// the single close on every exit path.
#[derive(Debug)]
pub struct HijackedConnection<S> {
    stream: BufStream<S>,
}

impl<S> HijackedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
        }
    }

    /// Buffered reader/writer over the raw stream.
    pub fn stream_mut(&mut self) -> &mut BufStream<S> {
        &mut self.stream
    }

    /// Give up the buffered stream, keeping any bytes already read past the head.
    pub fn into_stream(self) -> BufStream<S> {
        self.stream
    }

    /// Flush and half-close the connection. Safe to call on a dead peer.
    pub async fn close(&mut self) {
        let _ = self.stream.flush().await;
        let _ = self.stream.shutdown().await;
    }
}

/// The client request as received: method, target and headers, plus any body.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Request target exactly as sent (path and query, or absolute form).
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Size limits applied while reading.
#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
}

/// Read one request from the connection.
///
/// Returns `Ok(None)` when the client closed before sending anything.
pub async fn read_request<S>(
    conn: &mut HijackedConnection<S>,
    limits: ReadLimits,
) -> Result<Option<InboundRequest>, GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = match read_head(conn.stream_mut(), limits.max_head_bytes).await? {
        Some(head) => head,
        None => return Ok(None),
    };
    let mut request = parse_head(&head)?;

    let chunked = request
        .headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"));

    request.body = if chunked {
        read_chunked_body(conn.stream_mut(), limits.max_body_bytes).await?
    } else if let Some(length) = content_length(&request.headers)? {
        if length > limits.max_body_bytes {
            return Err(GatewayError::BodyTooLarge(limits.max_body_bytes));
        }
        let mut body = vec![0u8; length];
        conn.stream_mut().read_exact(&mut body).await?;
        Bytes::from(body)
    } else {
        Bytes::new()
    };

    Ok(Some(request))
}

/// Read raw head bytes up to and including the blank line.
async fn read_head<R>(reader: &mut R, max_head_bytes: usize) -> Result<Option<Vec<u8>>, GatewayError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    loop {
        let line_start = head.len();
        let read = reader.read_until(b'\n', &mut head).await?;
        if read == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(GatewayError::MalformedRequest("connection closed mid-head".into()));
        }
        if head.len() > max_head_bytes {
            return Err(GatewayError::HeadTooLarge(max_head_bytes));
        }

        let line = &head[line_start..];
        // Leading blank lines before the request line are tolerated.
        if line == b"\r\n" || line == b"\n" {
            if line_start == 0 {
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
    }
}

fn parse_head(head: &[u8]) -> Result<InboundRequest, GatewayError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(GatewayError::MalformedRequest("incomplete request head".into()))
        }
        Err(e) => return Err(GatewayError::MalformedRequest(e.to_string())),
    }

    let method = req
        .method
        .ok_or_else(|| GatewayError::MalformedRequest("missing method".into()))
        .and_then(|m| {
            Method::from_bytes(m.as_bytes())
                .map_err(|e| GatewayError::MalformedRequest(e.to_string()))
        })?;
    let target = req
        .path
        .ok_or_else(|| GatewayError::MalformedRequest("missing request target".into()))?
        .to_string();
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut map = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| GatewayError::MalformedRequest(format!("header name: {}", e)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| GatewayError::MalformedRequest(format!("header {}: {}", name, e)))?;
        map.append(name, value);
    }

    Ok(InboundRequest {
        method,
        target,
        version,
        headers: map,
        body: Bytes::new(),
    })
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, GatewayError> {
    let mut values = headers.get_all(CONTENT_LENGTH).iter();
    let Some(first) = values.next() else {
        return Ok(None);
    };
    let parse = |v: &HeaderValue| {
        v.to_str()
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| GatewayError::MalformedRequest("invalid content-length".into()))
    };
    let length = parse(first)?;
    for other in values {
        if parse(other)? != length {
            return Err(GatewayError::MalformedRequest("conflicting content-length".into()));
        }
    }
    Ok(Some(length))
}

async fn read_chunked_body<R>(reader: &mut R, max_body_bytes: usize) -> Result<Bytes, GatewayError>
where
    R: AsyncBufReadExt + AsyncReadExt + Unpin,
{
    let mut body = BytesMut::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Err(GatewayError::MalformedRequest("connection closed mid-body".into()));
        }
        let size_field = std::str::from_utf8(&line)
            .map_err(|_| GatewayError::MalformedRequest("invalid chunk size".into()))?
            .trim();
        // Chunk extensions follow a ';' and are ignored.
        let size_hex = size_field.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| GatewayError::MalformedRequest(format!("invalid chunk size {:?}", size_hex)))?;

        if size == 0 {
            // Trailers are read and dropped up to the final blank line.
            loop {
                line.clear();
                let read = reader.read_until(b'\n', &mut line).await?;
                if read == 0 || line == b"\r\n" || line == b"\n" {
                    return Ok(body.freeze());
                }
            }
        }

        if body.len() + size > max_body_bytes {
            return Err(GatewayError::BodyTooLarge(max_body_bytes));
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(GatewayError::MalformedRequest("missing chunk terminator".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    const LIMITS: ReadLimits = ReadLimits {
        max_head_bytes: 4096,
        max_body_bytes: 1024,
    };

    async fn read_from(raw: &[u8], limits: ReadLimits) -> Result<Option<InboundRequest>, GatewayError> {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(raw).await.unwrap();
        drop(client);
        let mut conn = HijackedConnection::new(server);
        read_request(&mut conn, limits).await
    }

    #[tokio::test]
    async fn parses_upgrade_head() {
        let request = read_from(
            b"GET /chat?room=1 HTTP/1.1\r\nHost: gw\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
            LIMITS,
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.target, "/chat?room=1");
        assert_eq!(request.headers["upgrade"], "websocket");
        assert!(request.body.is_empty());
    }

    #[tokio::test]
    async fn reads_content_length_body() {
        let request = read_from(
            b"POST /items HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
            LIMITS,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(&request.body[..], b"hello");
    }

    #[tokio::test]
    async fn reads_chunked_body() {
        let request = read_from(
            b"POST /items HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n",
            LIMITS,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(&request.body[..], b"hello world");
    }

    #[tokio::test]
    async fn eof_before_head_is_not_an_error() {
        assert!(read_from(b"", LIMITS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enforces_limits() {
        let small = ReadLimits {
            max_head_bytes: 32,
            max_body_bytes: 4,
        };
        let err = read_from(b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n", small)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::HeadTooLarge(32)));

        let err = read_from(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789", small)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BodyTooLarge(4)));
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let err = read_from(b"\x01\x02 nonsense\r\n\r\n", LIMITS).await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedRequest(_)));

        let err = read_from(b"GET / HTTP/1.1\r\nHost: gw\r\n", LIMITS).await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn bytes_after_head_stay_buffered() {
        let (mut client, server) = duplex(1024);
        client
            .write_all(b"GET /ws HTTP/1.1\r\nUpgrade: x\r\nConnection: upgrade\r\n\r\nearly")
            .await
            .unwrap();
        drop(client);

        let mut conn = HijackedConnection::new(server);
        read_request(&mut conn, LIMITS).await.unwrap().unwrap();

        let mut rest = Vec::new();
        conn.into_stream().read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"early");
    }
}
