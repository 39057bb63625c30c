//! `Content-Length` framing shared by the client stream and the backend socket.
//!
//! A frame is one or more header lines, a blank line, then exactly `N` bytes
//! of payload where `N` comes from the `Content-Length` header. Nothing
//! follows the payload.

use std::io::{self, BufRead, Read, Write};

pub const CONTENT_LENGTH_HEADER: &str = "Content-Length: ";

/// Reads the next complete message from `reader`.
///
/// Returns `Ok(None)` when the stream ends where a header was expected. A
/// stream that closes before the declared payload length has been delivered
/// is an error, a truncated payload is never returned.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    loop {
        let mut content_length: Option<usize> = None;

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return match content_length {
                    Some(len) => Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream closed before the payload of {len} bytes"),
                    )),
                    None => Ok(None),
                };
            }

            let line = line.trim();
            if line.is_empty() {
                break;
            }

            if let Some(value) = line.strip_prefix(CONTENT_LENGTH_HEADER.trim_end()) {
                let len = value.trim().parse::<usize>().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid Content-Length `{}`: {e}", value.trim()),
                    )
                })?;
                content_length = Some(len);
            }
        }

        // A header block without a length carries no message.
        let Some(len) = content_length else {
            continue;
        };

        // The buffer grows with the bytes actually delivered, never with the
        // declared length alone.
        let mut payload = Vec::new();
        let read = reader.by_ref().take(len as u64).read_to_end(&mut payload)?;
        if read < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream closed after {read} of {len} payload bytes"),
            ));
        }

        return String::from_utf8(payload)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
    }
}

/// Frames `message` as header, blank line and raw payload.
pub fn encode(message: &str) -> Vec<u8> {
    let header = format!("{CONTENT_LENGTH_HEADER}{}\r\n\r\n", message.len());
    let mut frame = Vec::with_capacity(header.len() + message.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(message.as_bytes());
    frame
}

/// Writes one framed message with a single `write_all`, so header and
/// payload are never split by another writer on the same stream.
pub fn write_message<W: Write>(writer: &mut W, message: &str) -> io::Result<()> {
    writer.write_all(&encode(message))?;
    writer.flush()
}

/// Lazy sequence of messages decoded from a stream.
///
/// Iteration ends at end of stream or after the first error.
pub struct MessageReader<R> {
    reader: R,
    failed: bool,
}

impl<R: BufRead> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for MessageReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match read_message(&mut self.reader) {
            Ok(message) => message.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
