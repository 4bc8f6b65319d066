//! Newline framing and record decoding.
//!
//! [`LineCodec`] frames the byte stream: inbound records terminate at `\n`
//! (an immediately preceding `\r` is stripped), outbound frames are written
//! as `<body>\r\n`. [`decode_record`] turns one framed record into a
//! [`Record`], running UTF-8 validation, JSON parsing, and schema validation
//! in that order so each failure maps to its fixed reason string.

use super::{Command, Reject};
use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

/// The literal record that terminates a session, byte-exact with no
/// surrounding whitespace.
const QUIT_RECORD: &[u8] = b"quit";

/// The outcome of decoding one framed record.
#[derive(Debug, Clone)]
pub enum Record {
    /// A zero-length record; ignored with no reply.
    Empty,
    /// The `quit` record; the session closes with no reply.
    Quit,
    /// A validated command.
    Command(Command),
}

/// Decode one framed record (already stripped of its line terminator).
pub fn decode_record(record: &[u8]) -> Result<Record, Reject> {
    if record.is_empty() {
        return Ok(Record::Empty);
    }
    if record == QUIT_RECORD {
        return Ok(Record::Quit);
    }

    let text = std::str::from_utf8(record).map_err(|_| Reject::InvalidUtf8)?;
    let value: Value = serde_json::from_str(text).map_err(|_| Reject::InvalidJson)?;
    if !value.is_object() {
        return Err(Reject::MalformedCommand);
    }

    let name = match value.get("command").and_then(Value::as_str) {
        Some(name) => name.to_owned(),
        None => return Err(Reject::MalformedCommand),
    };

    let command = match name.as_str() {
        "subscribe" => Command::Subscribe(
            serde_json::from_value(value).map_err(|_| Reject::MalformedCommand)?,
        ),
        "unsubscribe" => Command::Unsubscribe(
            serde_json::from_value(value).map_err(|_| Reject::MalformedCommand)?,
        ),
        "send" => {
            Command::Send(serde_json::from_value(value).map_err(|_| Reject::MalformedCommand)?)
        }
        _ => return Err(Reject::MalformedCommand),
    };

    Ok(Record::Command(command))
}

/// Frames a byte stream into newline-terminated records and writes outbound
/// frames with a `\r\n` terminator.
#[derive(Debug, Default)]
pub struct LineCodec {
    // Offset into the read buffer already scanned for a newline, so a long
    // partial line is not rescanned on every poll.
    scan_offset: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        match buf[self.scan_offset..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = self.scan_offset + offset;
                self.scan_offset = 0;
                let mut record = buf.split_to(newline + 1);
                record.truncate(record.len() - 1);
                if record.last() == Some(&b'\r') {
                    record.truncate(record.len() - 1);
                }
                Ok(Some(record.freeze()))
            }
            None => {
                self.scan_offset = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        // An unterminated trailing fragment is not a record; discard it.
        match self.decode(buf)? {
            Some(record) => Ok(Some(record)),
            None => {
                buf.clear();
                self.scan_offset = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Bytes, buf: &mut BytesMut) -> Result<(), Self::Error> {
        buf.reserve(frame.len() + 2);
        buf.extend_from_slice(&frame);
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}
