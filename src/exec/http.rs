//! Minimal HTTP/1.1 framing for the engine API.
//!
//! Only what the exec endpoints need: one request per connection, a response
//! head, and a body framed by `Content-Length`, chunked encoding or EOF.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ExecError;

const READ_CHUNK: usize = 8 * 1024;
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Status line and headers of an engine response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    fn has_no_body(&self) -> bool {
        matches!(self.status, 100..=199 | 204 | 304)
    }
}

/// Write a request with an optional JSON body.
pub async fn write_request<W>(
    stream: &mut W,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&[u8]>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut head = format!("{} {} HTTP/1.1\r\nHost: docker\r\n", method, path);
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    match body {
        Some(body) => {
            head.push_str("Content-Type: application/json\r\n");
            head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(body).await?;
        }
        None => {
            head.push_str("Content-Length: 0\r\n\r\n");
            stream.write_all(head.as_bytes()).await?;
        }
    }
    stream.flush().await
}

/// A reader that keeps whatever it has pulled off the connection but not
/// yet consumed.
///
/// After the response head of a hijacked request, the unconsumed bytes are
/// already stream payload; [`ReadAhead::into_parts`] hands them out together
/// with the raw connection.
pub struct ReadAhead<S> {
    inner: S,
    buf: Vec<u8>,
}

impl<S: AsyncRead + Unpin> ReadAhead<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Pull more bytes into the buffer. Returns 0 at EOF.
    async fn fill(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.inner.read(&mut chunk).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn find(&self, needle: &[u8]) -> Option<usize> {
        self.buf.windows(needle.len()).position(|w| w == needle)
    }

    /// Read and parse the status line and headers.
    pub async fn read_head(&mut self) -> Result<ResponseHead, ExecError> {
        let end = loop {
            if let Some(pos) = self.find(b"\r\n\r\n") {
                break pos;
            }
            if self.buf.len() > MAX_HEAD_BYTES {
                return Err(ExecError::MalformedResponse(
                    "response head too large".to_string(),
                ));
            }
            if self.fill().await? == 0 {
                return Err(ExecError::MalformedResponse(
                    "connection closed before response head".to_string(),
                ));
            }
        };

        let raw: Vec<u8> = self.buf.drain(..end + 4).collect();
        parse_head(&raw[..end])
    }

    async fn read_line(&mut self) -> Result<String, ExecError> {
        loop {
            if let Some(pos) = self.find(b"\r\n") {
                let line: Vec<u8> = self.buf.drain(..pos + 2).collect();
                return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            if self.fill().await? == 0 {
                return Err(ExecError::MalformedResponse(
                    "connection closed inside chunked body".to_string(),
                ));
            }
        }
    }

    async fn read_exact_bytes(&mut self, n: usize) -> Result<Vec<u8>, ExecError> {
        while self.buf.len() < n {
            if self.fill().await? == 0 {
                return Err(ExecError::MalformedResponse(format!(
                    "body ended after {} of {} bytes",
                    self.buf.len(),
                    n
                )));
            }
        }
        Ok(self.buf.drain(..n).collect())
    }

    async fn read_to_eof(&mut self) -> Result<Vec<u8>, ExecError> {
        while self.fill().await? > 0 {}
        Ok(std::mem::take(&mut self.buf))
    }

    async fn read_chunked(&mut self) -> Result<Vec<u8>, ExecError> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line().await?;
            let size_field = line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_field, 16).map_err(|_| {
                ExecError::MalformedResponse(format!("bad chunk size '{}'", size_field))
            })?;
            if size == 0 {
                // Trailer section ends with an empty line
                while !self.read_line().await?.is_empty() {}
                return Ok(body);
            }
            body.extend(self.read_exact_bytes(size).await?);
            if !self.read_line().await?.is_empty() {
                return Err(ExecError::MalformedResponse(
                    "missing CRLF after chunk".to_string(),
                ));
            }
        }
    }

    /// Read the body that follows `head`.
    pub async fn read_body(&mut self, head: &ResponseHead) -> Result<Vec<u8>, ExecError> {
        if head.has_no_body() {
            return Ok(Vec::new());
        }
        if head.is_chunked() {
            return self.read_chunked().await;
        }
        match head.header("content-length") {
            Some(len) => {
                let len: usize = len.trim().parse().map_err(|_| {
                    ExecError::MalformedResponse(format!("bad Content-Length '{}'", len))
                })?;
                self.read_exact_bytes(len).await
            }
            None => self.read_to_eof().await,
        }
    }

    /// The raw connection and the bytes read past the last parsed element.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        (self.inner, self.buf)
    }
}

fn parse_head(raw: &[u8]) -> Result<ResponseHead, ExecError> {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or("");
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(ExecError::MalformedResponse(format!(
            "unexpected status line '{}'",
            status_line
        )));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| {
            ExecError::MalformedResponse(format!("unexpected status line '{}'", status_line))
        })?;

    let headers = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| {
            l.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    Ok(ResponseHead { status, headers })
}
