// Rentable request object: one message id, one fixed buffer, one waiter.
//
// A request is owned by a single caller from rent through return. The buffer
// carries the outbound wire image while building and sending, then doubles
// as the scratch region for decoded response header text, so header values
// in the response view are zero-copy slices into the request's own memory.

use crate::buffer::FixedBuffer;
use crate::client::error::{FbmError, FbmResult};
use crate::client::waiter::ResponseWaiter;
use crate::codec::{self, HeaderCommand, HeaderEntry, MIN_MESSAGE_LEN, ParseStatus};
use crate::memory::MemoryManager;
use bytes::Bytes;
use encoding_rs::Encoding;
use rand::Rng;
use std::fmt;
use std::io::{self, Cursor, Write};
use std::ops::Range;
use std::sync::Arc;

/// A reusable FBM request with its owned wire buffer.
pub struct Request {
    id: i32,
    buffer: FixedBuffer,
    waiter: Arc<ResponseWaiter>,
    encoding: &'static Encoding,
    body_started: bool,
    response: Option<ResponseMessage>,
}

struct ResponseMessage {
    data: Bytes,
    parsed: Option<Parsed>,
}

struct Parsed {
    headers: Vec<HeaderEntry>,
    status: ParseStatus,
    body: Range<usize>,
}

impl Request {
    /// Creates a request with a random positive message id and a freshly
    /// leased buffer of `capacity` bytes.
    pub fn new(
        memory: Arc<dyn MemoryManager>,
        capacity: usize,
        encoding: &'static Encoding,
    ) -> FbmResult<Self> {
        let id = rand::rng().random_range(1..=i32::MAX);
        Self::with_message_id(memory, capacity, encoding, id)
    }

    /// Creates a request with a caller-chosen id.
    ///
    /// The id is fixed for the object's lifetime; colliding with another
    /// in-flight id surfaces as `DuplicateMessageId` at send time, and
    /// retrying with a different request is the caller's responsibility.
    pub fn with_message_id(
        memory: Arc<dyn MemoryManager>,
        capacity: usize,
        encoding: &'static Encoding,
        id: i32,
    ) -> FbmResult<Self> {
        let mut request = Request {
            id,
            buffer: FixedBuffer::new(memory, capacity),
            waiter: Arc::new(ResponseWaiter::new()),
            encoding,
            body_started: false,
            response: None,
        };
        request.reset()?;
        Ok(request)
    }

    pub fn message_id(&self) -> i32 {
        self.id
    }

    /// Current length of the accumulated wire image.
    pub fn len(&self) -> usize {
        self.buffer.written()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.written() == 0
    }

    /// Read-only view of the accumulated wire image.
    pub fn request_data(&self) -> &[u8] {
        self.buffer.accumulated()
    }

    /// Rewinds the buffer and rewrites the message-id record at offset zero.
    /// Any bound response is discarded.
    pub fn reset(&mut self) -> FbmResult<()> {
        self.response = None;
        self.body_started = false;
        self.buffer.reset();
        codec::write_message_id(&mut self.buffer, self.id)?;
        Ok(())
    }

    /// Appends one header record with a reserved command tag.
    pub fn write_header(&mut self, command: HeaderCommand, text: &str) -> FbmResult<()> {
        self.write_header_raw(command as u8, text)
    }

    /// Appends one header record with an arbitrary command tag.
    pub fn write_header_raw(&mut self, command: u8, text: &str) -> FbmResult<()> {
        codec::write_header(&mut self.buffer, command, text, self.encoding)?;
        Ok(())
    }

    /// Closes the header section. Idempotent; implied by the body writers.
    pub fn close_headers(&mut self) -> FbmResult<()> {
        if !self.body_started {
            codec::write_termination(&mut self.buffer)?;
            self.body_started = true;
        }
        Ok(())
    }

    /// Writes a `ContentType` header, closes the header section and appends
    /// the body bytes verbatim.
    pub fn write_body(&mut self, content_type: &str, bytes: &[u8]) -> FbmResult<()> {
        self.write_header(HeaderCommand::ContentType, content_type)?;
        codec::write_body(&mut self.buffer, bytes)?;
        self.body_started = true;
        Ok(())
    }

    /// Incremental body sink. The header section is closed on creation.
    pub fn body_writer(&mut self) -> FbmResult<BodyWriter<'_>> {
        self.close_headers()?;
        Ok(BodyWriter { request: self })
    }

    /// Checks the invariants required before a send: a non-zero id and at
    /// least the id record present.
    pub fn validate(&self) -> FbmResult<()> {
        if self.id == 0 || self.len() < MIN_MESSAGE_LEN {
            return Err(FbmError::InvalidRequest);
        }
        Ok(())
    }

    pub(crate) fn waiter(&self) -> &Arc<ResponseWaiter> {
        &self.waiter
    }

    /// Binds a received message to this request. Called by the client once
    /// the waiter resolves with a payload.
    pub(crate) fn bind_response(&mut self, data: Bytes) {
        self.response = Some(ResponseMessage { data, parsed: None });
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Parses the bound response (once) and returns the read-only view.
    ///
    /// Header text is decoded into this request's own buffer; the view
    /// borrows the request, so returning or resetting the request
    /// invalidates it by construction. Fails with `UnsetResponse` when no
    /// response has been delivered.
    pub fn response(&mut self) -> FbmResult<ResponseView<'_>> {
        let Some(message) = &mut self.response else {
            return Err(FbmError::UnsetResponse);
        };

        if message.parsed.is_none() {
            // Response phase: the request bytes have left the wire, so the
            // buffer becomes the header text scratch region.
            self.buffer.reset();
            self.body_started = false;

            let mut cursor = Cursor::new(message.data.as_ref());
            let _id_line = codec::read_line(&mut cursor);
            let mut headers = Vec::new();
            let status =
                codec::parse_headers(&mut cursor, &mut self.buffer, &mut headers, self.encoding);
            let body = cursor.position() as usize..message.data.len();
            message.parsed = Some(Parsed {
                headers,
                status,
                body,
            });
        }

        let message = self.response.as_ref().and_then(|m| {
            m.parsed
                .as_ref()
                .map(|parsed| (m.data.clone(), parsed))
        });
        match message {
            Some((data, parsed)) => Ok(ResponseView {
                data,
                scratch: self.buffer.accumulated(),
                headers: &parsed.headers,
                status: parsed.status,
                body: parsed.body.clone(),
            }),
            None => Err(FbmError::UnsetResponse),
        }
    }

    /// Return-to-pool hook: discards the response, clears the parsed header
    /// list and frees the buffer back to the memory manager.
    pub(crate) fn release(&mut self) {
        self.response = None;
        self.body_started = false;
        self.waiter.disarm();
        self.buffer.release();
    }

    /// Rent-from-pool hook: re-leases the buffer and restores the fresh
    /// state with the id record written.
    pub(crate) fn prepare(&mut self) -> FbmResult<()> {
        self.buffer.prepare();
        self.reset()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("message_id", &self.id)
            .field("written", &self.buffer.written())
            .field("has_response", &self.response.is_some())
            .finish()
    }
}

/// `std::io::Write` adapter over a request's remaining body capacity.
pub struct BodyWriter<'a> {
    request: &'a mut Request,
}

impl Write for BodyWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.request
            .buffer
            .put(buf)
            .map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read-only view over a completed request's response.
///
/// Header values reference memory inside the request's own buffer and the
/// body references the received message bytes; the view is valid until the
/// request is reset or returned to its pool.
pub struct ResponseView<'a> {
    data: Bytes,
    scratch: &'a [u8],
    headers: &'a [HeaderEntry],
    status: ParseStatus,
    body: Range<usize>,
}

impl<'a> ResponseView<'a> {
    /// Accumulated parse-status flags; empty means a clean parse.
    pub fn status(&self) -> ParseStatus {
        self.status
    }

    /// Fails when any parse-status flag is set.
    pub fn ensure_ok(&self) -> FbmResult<()> {
        if self.status.is_empty() {
            Ok(())
        } else {
            Err(FbmError::HeaderParse(self.status))
        }
    }

    /// The raw message bytes, id record included.
    pub fn raw(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// The opaque body span following the header section.
    pub fn body(&self) -> &[u8] {
        &self.data.as_ref()[self.body.clone()]
    }

    /// All parsed headers as `(command, value)` pairs.
    pub fn headers(&self) -> impl Iterator<Item = (u8, &'a str)> + '_ {
        let scratch = self.scratch;
        self.headers
            .iter()
            .map(move |entry| (entry.command, Self::text(scratch, entry)))
    }

    /// First header value carrying the given reserved command tag.
    pub fn header(&self, command: HeaderCommand) -> Option<&'a str> {
        self.header_raw(command as u8)
    }

    /// First header value carrying the given raw command tag.
    pub fn header_raw(&self, command: u8) -> Option<&'a str> {
        let scratch = self.scratch;
        self.headers
            .iter()
            .find(|entry| entry.command == command)
            .map(|entry| Self::text(scratch, entry))
    }

    fn text(scratch: &'a [u8], entry: &HeaderEntry) -> &'a str {
        std::str::from_utf8(&scratch[entry.value.clone()]).unwrap_or("")
    }
}
