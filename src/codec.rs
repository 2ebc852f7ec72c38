// FBM wire format - header records, terminators, and the message-id prefix
//
// A logical message is a run of header records followed by a lone terminator
// and an opaque body:
//
//   <header-record>*  terminator  <body-bytes>*
//   header-record := <cmd-byte> <value-bytes> terminator
//
// The first record of every well-formed message is the message-id record:
// one `MessageId` tag byte, four little-endian bytes of the signed id, and
// the terminator. Header values are text in the configured encoding and must
// not contain the terminator sequence.

use crate::buffer::{BufferFull, FixedBuffer};
use bitflags::bitflags;
use bytes::Buf;
use encoding_rs::Encoding;
use num_enum::TryFromPrimitive;
use std::io::Cursor;
use std::ops::Range;

/// Two-byte sequence separating header records. A lone terminator ends the
/// header section.
pub const TERMINATOR: [u8; 2] = [0xFF, 0xF1];

/// Reserved message id for out-of-band control frames.
pub const CONTROL_ID: i32 = -500;

/// Size of the message-id record: tag byte + 4 id bytes + terminator.
pub const MESSAGE_ID_RECORD_LEN: usize = 7;

/// Shortest prefix from which a message id can still be recovered (tag byte
/// plus the four id bytes, terminator not yet required).
pub const MIN_MESSAGE_LEN: usize = 5;

/// Sentinel returned by [`get_message_id`] when the line is too short.
pub const ID_TOO_SHORT: i32 = -1;

/// Sentinel returned by [`get_message_id`] when the first record does not
/// carry the `MessageId` tag.
pub const ID_WRONG_COMMAND: i32 = -2;

/// Header record command tags.
///
/// Only the tag byte is interpreted by the core; user-defined tags above the
/// reserved set travel as raw `u8` values and are handed through untouched.
#[derive(TryFromPrimitive)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaderCommand {
    /// Placeholder tag, never emitted by the core
    NotUsed = 0,
    /// First record of every message, value is the 4-byte little-endian id
    MessageId = 1,
    /// Resource location
    Location = 2,
    /// Body content type
    ContentType = 3,
    /// Requested action
    Action = 4,
    /// Response status
    Status = 5,
}

bitflags! {
    /// Outcome flags accumulated while parsing a response header section.
    ///
    /// An empty set means the section parsed cleanly. `INVALID_HEADER_READ`
    /// marks a record with a tag byte but zero value bytes; parsing skips the
    /// record and continues. `HEADER_OUT_OF_MEM` means the scratch region
    /// could not hold a decoded value; parsing halts at that record.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ParseStatus: u8 {
        const INVALID_HEADER_READ = 1 << 0;
        const HEADER_OUT_OF_MEM = 1 << 1;
    }
}

/// One parsed response header: the raw command tag and the byte range of the
/// decoded value inside the request's scratch region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderEntry {
    pub command: u8,
    pub value: Range<usize>,
}

impl HeaderEntry {
    /// The command as a known tag, if it falls inside the reserved set.
    pub fn known(&self) -> Option<HeaderCommand> {
        HeaderCommand::try_from(self.command).ok()
    }
}

/// Appends the message-id record `{MessageId, id_le, terminator}`.
///
/// Must be the first write after a buffer reset so the id prefix invariant
/// holds for every message built in the buffer.
pub fn write_message_id(buf: &mut FixedBuffer, id: i32) -> Result<(), BufferFull> {
    let mut record = [0u8; MESSAGE_ID_RECORD_LEN];
    record[0] = HeaderCommand::MessageId as u8;
    record[1..5].copy_from_slice(&id.to_le_bytes());
    record[5..7].copy_from_slice(&TERMINATOR);
    buf.put(&record)
}

/// Appends one header record `{cmd, encode(text), terminator}`.
///
/// The value text is encoded with `encoding` before sizing, and the record is
/// written whole or not at all: on insufficient capacity the buffer is left
/// untouched and `BufferFull` is returned.
pub fn write_header(
    buf: &mut FixedBuffer,
    command: u8,
    text: &str,
    encoding: &'static Encoding,
) -> Result<(), BufferFull> {
    let (value, _, _) = encoding.encode(text);
    let needed = 1 + value.len() + TERMINATOR.len();
    if needed > buf.remaining() {
        return Err(BufferFull {
            requested: needed,
            remaining: buf.remaining(),
        });
    }
    buf.put(&[command])?;
    buf.put(&value)?;
    buf.put(&TERMINATOR)
}

/// Appends the lone terminator that closes the header section.
pub fn write_termination(buf: &mut FixedBuffer) -> Result<(), BufferFull> {
    buf.put(&TERMINATOR)
}

/// Closes the header section and appends `bytes` verbatim as the body.
pub fn write_body(buf: &mut FixedBuffer, bytes: &[u8]) -> Result<(), BufferFull> {
    let needed = TERMINATOR.len() + bytes.len();
    if needed > buf.remaining() {
        return Err(BufferFull {
            requested: needed,
            remaining: buf.remaining(),
        });
    }
    write_termination(buf)?;
    buf.put(bytes)
}

/// Advances `stream` to the next terminator and returns the slice before it.
///
/// The stream is left positioned just past the terminator. When no terminator
/// remains the returned slice is empty and the stream is exhausted.
pub fn read_line<'a>(stream: &mut Cursor<&'a [u8]>) -> &'a [u8] {
    let data = *stream.get_ref();
    let start = (stream.position() as usize).min(data.len());
    let rest = &data[start..];

    let mut offset = 0;
    while offset + TERMINATOR.len() <= rest.len() {
        if rest[offset] == TERMINATOR[0] && rest[offset + 1] == TERMINATOR[1] {
            stream.set_position((start + offset + TERMINATOR.len()) as u64);
            return &rest[..offset];
        }
        offset += 1;
    }

    stream.set_position(data.len() as u64);
    &[]
}

/// Extracts the message id from the first line of a message.
///
/// Requires at least [`MIN_MESSAGE_LEN`] bytes and a leading `MessageId` tag.
/// Returns [`ID_TOO_SHORT`] or [`ID_WRONG_COMMAND`] on malformed input; both
/// sentinels are negative and therefore outside the valid user-id space.
pub fn get_message_id(line: &[u8]) -> i32 {
    if line.len() < MIN_MESSAGE_LEN {
        return ID_TOO_SHORT;
    }
    if line[0] != HeaderCommand::MessageId as u8 {
        return ID_WRONG_COMMAND;
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&line[1..5]);
    i32::from_le_bytes(raw)
}

/// Reads header records from `stream` until the empty line ending the header
/// section, decoding each value into `scratch` and emitting the entries into
/// `headers_out`.
///
/// Decoded text is appended to the scratch region as a sliding window, so the
/// emitted ranges stay valid for as long as the scratch buffer is not reset.
/// Reparsing the same stream into a fresh scratch yields an identical list.
pub fn parse_headers(
    stream: &mut Cursor<&[u8]>,
    scratch: &mut FixedBuffer,
    headers_out: &mut Vec<HeaderEntry>,
    encoding: &'static Encoding,
) -> ParseStatus {
    let mut status = ParseStatus::empty();

    loop {
        if !stream.has_remaining() {
            break;
        }
        let line = read_line(stream);
        if line.is_empty() {
            // Lone terminator: end of headers.
            break;
        }
        if line.len() < 2 {
            status |= ParseStatus::INVALID_HEADER_READ;
            continue;
        }

        let (decoded, _) = encoding.decode_without_bom_handling(&line[1..]);
        match scratch.scratch_put(decoded.as_bytes()) {
            Ok(value) => headers_out.push(HeaderEntry {
                command: line[0],
                value,
            }),
            Err(_) => {
                status |= ParseStatus::HEADER_OUT_OF_MEM;
                break;
            }
        }
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapMemory;
    use encoding_rs::UTF_8;
    use std::sync::Arc;

    fn buffer(capacity: usize) -> FixedBuffer {
        FixedBuffer::new(Arc::new(HeapMemory), capacity)
    }

    #[test]
    fn message_id_record_layout() {
        let mut buf = buffer(64);
        write_message_id(&mut buf, 0x0403_0201).unwrap();

        assert_eq!(buf.accumulated(), &[1, 0x01, 0x02, 0x03, 0x04, 0xFF, 0xF1]);
    }

    #[test]
    fn negative_message_id_roundtrip() {
        let mut buf = buffer(16);
        write_message_id(&mut buf, CONTROL_ID).unwrap();

        let data = buf.accumulated().to_vec();
        let mut cursor = Cursor::new(data.as_slice());
        let line = read_line(&mut cursor);
        assert_eq!(get_message_id(line), CONTROL_ID);
    }

    #[test]
    fn get_message_id_rejects_short_line() {
        assert_eq!(get_message_id(&[1, 2, 3]), ID_TOO_SHORT);
        assert_eq!(get_message_id(&[]), ID_TOO_SHORT);
    }

    #[test]
    fn get_message_id_rejects_wrong_command() {
        let line = [HeaderCommand::Action as u8, 0x2A, 0, 0, 0];
        assert_eq!(get_message_id(&line), ID_WRONG_COMMAND);
    }

    #[test]
    fn read_line_positions_past_terminator() {
        let data = [b'a', b'b', 0xFF, 0xF1, b'c', 0xFF, 0xF1];
        let mut cursor = Cursor::new(&data[..]);

        assert_eq!(read_line(&mut cursor), b"ab");
        assert_eq!(cursor.position(), 4);
        assert_eq!(read_line(&mut cursor), b"c");
        assert_eq!(cursor.position(), 7);
        assert_eq!(read_line(&mut cursor), b"");
    }

    #[test]
    fn read_line_without_terminator_is_empty() {
        let data = [b'x', b'y', b'z'];
        let mut cursor = Cursor::new(&data[..]);

        assert_eq!(read_line(&mut cursor), b"");
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn header_roundtrip() {
        let mut buf = buffer(256);
        write_header(&mut buf, HeaderCommand::Action as u8, "ping", UTF_8).unwrap();
        write_header(&mut buf, HeaderCommand::Location as u8, "store/42", UTF_8).unwrap();
        write_termination(&mut buf).unwrap();

        let wire = buf.accumulated().to_vec();
        let mut cursor = Cursor::new(wire.as_slice());
        let mut scratch = buffer(256);
        let mut headers = Vec::new();

        let status = parse_headers(&mut cursor, &mut scratch, &mut headers, UTF_8);
        assert_eq!(status, ParseStatus::empty());
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].known(), Some(HeaderCommand::Action));
        assert_eq!(&scratch.accumulated()[headers[0].value.clone()], b"ping");
        assert_eq!(headers[1].known(), Some(HeaderCommand::Location));
        assert_eq!(&scratch.accumulated()[headers[1].value.clone()], b"store/42");
    }

    #[test]
    fn user_defined_command_tags_pass_through() {
        let mut buf = buffer(64);
        write_header(&mut buf, 0x40, "custom", UTF_8).unwrap();
        write_termination(&mut buf).unwrap();

        let wire = buf.accumulated().to_vec();
        let mut cursor = Cursor::new(wire.as_slice());
        let mut scratch = buffer(64);
        let mut headers = Vec::new();

        parse_headers(&mut cursor, &mut scratch, &mut headers, UTF_8);
        assert_eq!(headers[0].command, 0x40);
        assert_eq!(headers[0].known(), None);
    }

    #[test]
    fn write_header_never_writes_partial_record() {
        let mut buf = buffer(8);
        let err =
            write_header(&mut buf, HeaderCommand::Action as u8, "overlong", UTF_8).unwrap_err();

        assert_eq!(err.remaining, 8);
        assert_eq!(buf.written(), 0);
    }

    #[test]
    fn parse_flags_zero_value_line() {
        // One record with a tag byte and no value bytes, then a real one.
        let mut wire = vec![HeaderCommand::Status as u8];
        wire.extend_from_slice(&TERMINATOR);
        wire.push(HeaderCommand::Action as u8);
        wire.extend_from_slice(b"ok");
        wire.extend_from_slice(&TERMINATOR);
        wire.extend_from_slice(&TERMINATOR);

        let mut cursor = Cursor::new(wire.as_slice());
        let mut scratch = buffer(64);
        let mut headers = Vec::new();

        let status = parse_headers(&mut cursor, &mut scratch, &mut headers, UTF_8);
        assert!(status.contains(ParseStatus::INVALID_HEADER_READ));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].known(), Some(HeaderCommand::Action));
    }

    #[test]
    fn parse_halts_on_scratch_exhaustion() {
        let mut buf = buffer(256);
        write_header(&mut buf, HeaderCommand::Location as u8, "a-rather-long-value", UTF_8)
            .unwrap();
        write_header(&mut buf, HeaderCommand::Action as u8, "never-reached", UTF_8).unwrap();
        write_termination(&mut buf).unwrap();

        let wire = buf.accumulated().to_vec();
        let mut cursor = Cursor::new(wire.as_slice());
        let mut scratch = buffer(4);
        let mut headers = Vec::new();

        let status = parse_headers(&mut cursor, &mut scratch, &mut headers, UTF_8);
        assert!(status.contains(ParseStatus::HEADER_OUT_OF_MEM));
        assert!(headers.is_empty());
    }

    #[test]
    fn parse_is_idempotent() {
        let mut buf = buffer(256);
        write_header(&mut buf, HeaderCommand::ContentType as u8, "text/plain", UTF_8).unwrap();
        write_header(&mut buf, HeaderCommand::Status as u8, "200", UTF_8).unwrap();
        write_termination(&mut buf).unwrap();
        let wire = buf.accumulated().to_vec();

        let mut first = Vec::new();
        let mut scratch_a = buffer(128);
        let mut cursor = Cursor::new(wire.as_slice());
        parse_headers(&mut cursor, &mut scratch_a, &mut first, UTF_8);

        let mut second = Vec::new();
        let mut scratch_b = buffer(128);
        let mut cursor = Cursor::new(wire.as_slice());
        parse_headers(&mut cursor, &mut scratch_b, &mut second, UTF_8);

        assert_eq!(first, second);
        assert_eq!(scratch_a.accumulated(), scratch_b.accumulated());
    }

    #[test]
    fn body_follows_empty_line() {
        let mut buf = buffer(64);
        write_message_id(&mut buf, 9).unwrap();
        write_body(&mut buf, &[0xDE, 0xAD]).unwrap();

        let wire = buf.accumulated().to_vec();
        let mut cursor = Cursor::new(wire.as_slice());
        assert_eq!(get_message_id(read_line(&mut cursor)), 9);
        assert_eq!(read_line(&mut cursor), b"");
        let body_start = cursor.position() as usize;
        assert_eq!(&wire[body_start..], &[0xDE, 0xAD]);
    }
}
