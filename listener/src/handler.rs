use std::io::{self, BufRead, Write};
use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::error::Error;
use crate::message::{http_date, Message};
use crate::record::Record;
use crate::sink::Sink;

/// The body of every successful response.
pub const RESPONSE_BODY: &str = "Logged";

/// The `content-type` of every successful response.
pub const CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

/// A `Handler` logs every request on a connection to its `Sink` and answers each one with
/// `200 Logged`.
pub struct Handler {
    sink: Arc<dyn Sink>,
}

impl Handler {
    pub fn new(sink: Arc<dyn Sink>) -> Handler {
        Handler { sink }
    }

    /// Serves requests read from `reader` until the connection closes, or until a request asks
    /// for it to be closed. Returns how many requests were answered.
    ///
    /// **Design Decision**: `reader` and `writer` are generic rather than a `TcpStream` so that
    /// a whole connection can be played through a `Handler` in memory, in tests.
    ///
    /// A request which cannot be parsed gets a `400 Bad Request` and ends the connection. A
    /// transport failure ends the connection without a response. Either way, nothing about the
    /// failed request reaches the `Sink`.
    pub fn handle(
        &self,
        reader: &mut impl BufRead,
        writer: &mut impl Write,
    ) -> Result<usize, Error> {
        let mut served = 0;

        loop {
            match self.handle_one(reader, writer) {
                Ok(None) => return Ok(served),
                Ok(Some(keep_alive)) => {
                    served += 1;
                    if !keep_alive {
                        return Ok(served);
                    }
                }
                Err(err @ Error::Malformed(_)) => {
                    if let Err(write_err) = Self::reject(writer) {
                        debug!("[Handler] could not send 400 response: {}", write_err)
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Reads, logs, and answers one request. Returns whether the connection should stay open,
    /// or `None` if the peer closed it first.
    fn handle_one(
        &self,
        reader: &mut impl BufRead,
        writer: &mut impl Write,
    ) -> Result<Option<bool>, Error> {
        let mut request = match Message::read_head(reader)? {
            None => return Ok(None),
            Some(request) => request,
        };

        // bad framing is answered with a 400 before the client is invited to send its body
        request.framing()?;

        if request.expects_continue() {
            Message::respond_continue().write(writer)?;
        }

        request.read_body(reader)?;

        let keep_alive = request.keep_alive();
        let head_only = request.method() == "HEAD";

        debug!(
            "[Handler] received '{}' with {} header(s) and a {}-byte body",
            request.start_line,
            request.headers.len(),
            request.body.len()
        );

        let record = Record::from(request);
        self.sink.emit_all(&record.lines());

        Self::respond(writer, head_only, keep_alive)?;
        Ok(Some(keep_alive))
    }

    fn respond(writer: &mut impl Write, head_only: bool, keep_alive: bool) -> io::Result<()> {
        let mut response = Message::respond_ok()
            .with_header("content-type", CONTENT_TYPE)
            .with_header("date", http_date(Utc::now()))
            .with_body(RESPONSE_BODY);

        if !keep_alive {
            response = response.with_header("connection", "close");
        }

        if head_only {
            response = response.without_body();
        }

        response.write(writer)
    }

    fn reject(writer: &mut impl Write) -> io::Result<()> {
        Message::respond_bad_request()
            .with_header("connection", "close")
            .with_body("")
            .write(writer)
    }
}
