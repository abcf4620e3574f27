use std::fmt::{Display, Formatter};
use std::io::{self, BufRead, Read, Write};

use chrono::{DateTime, Utc};

use crate::error::Error;

/// Longest request line or header line we are willing to buffer.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Most header lines a single request may carry.
pub const MAX_HEADERS: usize = 100;

/// An HTTP/1.x `Message`, either a request read off the wire or a response about to be written.
///
/// **Design Decision**: `headers` is a `Vec` of pairs rather than a map, so that the order in
/// which headers arrived and any duplicate names survive all the way to the log sink.
///
/// **Design Decision**: `body` is raw bytes. Decoding to text is the business of whoever logs it.
#[derive(PartialEq, Debug, Clone)]
pub struct Message {
    pub start_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// How the body of a request is delimited on the wire.
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum Framing {
    Chunked,
    Length(usize),
    Empty,
}

impl Message {
    fn new<S: Into<String>>(start_line: S) -> Message {
        Message {
            start_line: start_line.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Reads the request line and headers of the next request on a connection.
    ///
    /// Returns `Ok(None)` if the peer closed the connection before sending anything, which is
    /// how a persistent connection normally ends. The body is left on the `reader`; see
    /// [`read_body`](Self::read_body).
    pub fn read_head(reader: &mut impl BufRead) -> Result<Option<Message>, Error> {
        // leading blank lines before a request line are tolerated (RFC 9112 section 2.2)
        let request_line = loop {
            match read_line(reader)? {
                None => return Ok(None),
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
            }
        };

        let mut pieces = request_line.split_whitespace();
        match (pieces.next(), pieces.next(), pieces.next(), pieces.next()) {
            (Some(method), Some(_), Some(version), None)
                if is_token(method) && (version == "HTTP/1.0" || version == "HTTP/1.1") => {}
            _ => {
                return Err(Error::malformed(format!(
                    "'{}' is not an HTTP/1.x request line",
                    request_line
                )))
            }
        }

        let mut message = Message::new(request_line);

        loop {
            let line = read_line(reader)?.ok_or_else(|| {
                Error::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading headers",
                ))
            })?;

            // a blank line separates HTTP headers and body
            if line.is_empty() {
                break;
            }

            if message.headers.len() == MAX_HEADERS {
                return Err(Error::malformed(format!("more than {} headers", MAX_HEADERS)));
            }

            // HTTP headers are always formatted as "key: value"
            match line.split_once(':') {
                Some((name, value)) if is_token(name) => message
                    .headers
                    .push((name.to_string(), value.trim().to_string())),
                _ => return Err(Error::malformed(format!("cannot parse header line '{}'", line))),
            }
        }

        Ok(Some(message))
    }

    /// How this request's body is delimited, according to its headers.
    ///
    /// `Transfer-Encoding: chunked` takes precedence over `Content-Length`. A request with
    /// neither has no body.
    pub fn framing(&self) -> Result<Framing, Error> {
        if self.header("Transfer-Encoding").is_some() {
            let codings = self.header_tokens("Transfer-Encoding");
            if codings.last().map(String::as_str) != Some("chunked") {
                return Err(Error::malformed("unsupported Transfer-Encoding"));
            }
            return Ok(Framing::Chunked);
        }

        Ok(match self.content_length()? {
            Some(length) => Framing::Length(length),
            None => Framing::Empty,
        })
    }

    /// Reads this request's body off the `reader`, as framed by its headers.
    pub fn read_body(&mut self, reader: &mut impl BufRead) -> Result<(), Error> {
        self.body = match self.framing()? {
            Framing::Chunked => read_chunked(reader)?,
            Framing::Length(length) => read_exactly(reader, length)?,
            Framing::Empty => Vec::new(),
        };

        Ok(())
    }

    /// Reads a complete request, head and body.
    pub fn read(reader: &mut impl BufRead) -> Result<Option<Message>, Error> {
        match Self::read_head(reader)? {
            None => Ok(None),
            Some(mut message) => {
                message.read_body(reader)?;
                Ok(Some(message))
            }
        }
    }

    /// The request method, e.g. `GET`.
    pub fn method(&self) -> &str {
        self.start_line.split_whitespace().next().unwrap_or("")
    }

    /// The protocol version, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        self.start_line.split_whitespace().nth(2).unwrap_or("")
    }

    /// The value of the first header called `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every comma-separated, lowercased token across all headers called `name`.
    pub fn header_tokens(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, value)| value.split(','))
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .collect()
    }

    fn content_length(&self) -> Result<Option<usize>, Error> {
        let mut length = None;

        for (_, value) in self
            .headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
        {
            // digits only; `parse` alone would also take a leading '+'
            let parsed = Some(value.as_str())
                .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or_else(|| Error::malformed(format!("invalid Content-Length '{}'", value)))?;

            match length {
                Some(previous) if previous != parsed => {
                    return Err(Error::malformed("conflicting Content-Length headers"))
                }
                _ => length = Some(parsed),
            }
        }

        Ok(length)
    }

    /// Whether the connection should stay open after this request has been answered.
    pub fn keep_alive(&self) -> bool {
        let tokens = self.header_tokens("Connection");

        if self.version() == "HTTP/1.0" {
            tokens.iter().any(|t| t == "keep-alive")
        } else {
            !tokens.iter().any(|t| t == "close")
        }
    }

    /// Whether the client is waiting for a `100 Continue` before sending its body.
    pub fn expects_continue(&self) -> bool {
        self.version() != "HTTP/1.0"
            && self
                .header_tokens("Expect")
                .iter()
                .any(|t| t == "100-continue")
    }

    pub fn respond<S: AsRef<str>>(status: S) -> Message {
        Message::new(format!("HTTP/1.1 {}", status.as_ref()))
    }

    pub fn respond_ok() -> Message {
        Self::respond("200 OK")
    }

    pub fn respond_continue() -> Message {
        Self::respond("100 Continue")
    }

    pub fn respond_bad_request() -> Message {
        Self::respond("400 Bad Request")
    }

    pub fn with_header<S: Into<String>>(mut self, name: &str, value: S) -> Message {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Sets the body, replacing any `content-length` header with one that matches it.
    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> Message {
        let body = body.into();
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case("Content-Length"));
        self.headers
            .push(("content-length".into(), body.len().to_string()));
        self.body = body;
        self
    }

    /// Drops the body but keeps the headers describing it, as a response to `HEAD` must.
    pub fn without_body(mut self) -> Message {
        self.body.clear();
        self
    }

    fn head(&self) -> String {
        let mut head = format!("{}\r\n", self.start_line.trim());
        for (key, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", key, value));
        }
        head.push_str("\r\n");
        head
    }

    /// Writes this `Message` to the `writer` exactly as it goes on the wire.
    pub fn write(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(self.head().as_bytes())?;
        writer.write_all(&self.body)?;
        writer.flush()
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.head(), String::from_utf8_lossy(&self.body))
    }
}

/// Formats `time` as an HTTP `Date` header value (IMF-fixdate, RFC 9110 section 5.6.7).
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Tokens (method names, header names) are non-empty and free of whitespace, control
/// characters, and delimiters.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_graphic() && !b"\"(),/:;<=>?@[\\]{}".contains(&b)
        })
}

fn line_too_long() -> Error {
    Error::malformed(format!("line longer than {} bytes", MAX_LINE_LENGTH))
}

/// Reads one line, without its trailing CRLF (or bare LF).
///
/// Returns `Ok(None)` on a clean EOF, i.e. when no bytes at all could be read.
fn read_line(reader: &mut impl BufRead) -> Result<Option<String>, Error> {
    let mut buffer = Vec::new();
    // room for the longest allowed line plus a CRLF terminator
    let size = reader
        .by_ref()
        .take(MAX_LINE_LENGTH as u64 + 2)
        .read_until(b'\n', &mut buffer)?;

    if size == 0 {
        return Ok(None);
    }

    if buffer.last() != Some(&b'\n') {
        return if buffer.len() == MAX_LINE_LENGTH + 2 {
            Err(line_too_long())
        } else {
            Err(Error::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-line",
            )))
        };
    }

    buffer.pop();
    if buffer.last() == Some(&b'\r') {
        buffer.pop();
    }

    if buffer.len() > MAX_LINE_LENGTH {
        return Err(line_too_long());
    }

    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

/// Reads exactly `length` bytes, failing with a transport error if the connection ends early.
///
/// The buffer grows with what actually arrives, so a huge `Content-Length` costs nothing up front.
fn read_exactly(reader: &mut impl BufRead, length: usize) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    reader.by_ref().take(length as u64).read_to_end(&mut buffer)?;

    if buffer.len() < length {
        return Err(Error::Transport(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "connection closed after {} of {} body bytes",
                buffer.len(),
                length
            ),
        )));
    }

    Ok(buffer)
}

fn unexpected_eof(context: &str) -> Error {
    Error::Transport(io::Error::new(io::ErrorKind::UnexpectedEof, context.to_string()))
}

/// Decodes a `Transfer-Encoding: chunked` body. Chunk extensions and trailers are discarded.
fn read_chunked(reader: &mut impl BufRead) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();

    loop {
        let line = read_line(reader)?
            .ok_or_else(|| unexpected_eof("connection closed before chunk size"))?;
        let size = line.split(';').next().unwrap_or("").trim();
        let size = Some(size)
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|s| usize::from_str_radix(s, 16).ok())
            .ok_or_else(|| Error::malformed(format!("invalid chunk size '{}'", line)))?;

        if size == 0 {
            break;
        }

        body.extend(read_exactly(reader, size)?);

        match read_line(reader)? {
            Some(line) if line.is_empty() => {}
            Some(_) => return Err(Error::malformed("chunk data longer than its declared size")),
            None => return Err(unexpected_eof("connection closed after chunk data")),
        }
    }

    // trailer section, terminated by a blank line
    loop {
        match read_line(reader)? {
            Some(line) if line.is_empty() => break,
            Some(_) => continue,
            None => return Err(unexpected_eof("connection closed in chunked trailer")),
        }
    }

    Ok(body)
}
