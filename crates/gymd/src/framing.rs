//! Request and response framing for client connections.
//!
//! Requests arrive as text records. In [`FrameMode::Blank`] a record is every
//! line up to the next empty line, so `{...}\r\n\r\n` is one record. In
//! [`FrameMode::Line`] each line is a record. A lone terminator yields the
//! empty record, which clients use to ask for teardown.
//!
//! Responses are written as one payload followed by `\r\n\r\n`. When the
//! session negotiated a compression level above zero the payload is zlib
//! compressed first.

use std::io::{self, BufRead, BufReader, Read, Write};

use flate2::Compression;
use flate2::write::ZlibEncoder;
use gym_config::FrameMode;
use thiserror::Error;

/// Terminator appended to every response payload.
pub const RECORD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Highest zlib compression level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Errors raised while reading or writing records.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The record grew beyond the configured limit.
    #[error("request too large: {size} bytes exceeds {max_size} byte limit")]
    TooLarge { size: usize, max_size: usize },

    /// The record is not valid UTF-8.
    #[error("request is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// No data arrived within the idle timeout.
    #[error("connection idle for too long")]
    IdleTimeout,

    /// Reading or writing the stream failed.
    #[error("IO error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for FrameError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::IdleTimeout,
            _ => Self::Io(error),
        }
    }
}

/// Splits an inbound byte stream into request records.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    mode: FrameMode,
    max_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    /// Creates a reader enforcing `max_bytes` per record.
    pub fn new(reader: R, mode: FrameMode, max_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            mode,
            max_bytes,
        }
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream and nothing is
    /// left to deliver.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] when the record exceeds the limit,
    /// [`FrameError::Encoding`] for non UTF-8 input,
    /// [`FrameError::IdleTimeout`] when the read deadline elapses, and
    /// [`FrameError::Io`] for other stream failures.
    pub fn read_record(&mut self) -> Result<Option<String>, FrameError> {
        let mut record: Vec<u8> = Vec::new();
        loop {
            let mut line = Vec::new();
            let budget = self.max_bytes.saturating_sub(record.len());
            let complete = self.read_line(&mut line, budget)?;
            let content = strip_line_ending(&line);

            if !complete {
                // EOF: deliver whatever has been gathered.
                record.extend_from_slice(content);
                if record.is_empty() {
                    return Ok(None);
                }
                return String::from_utf8(record).map(Some).map_err(Into::into);
            }

            if self.mode == FrameMode::Line || content.is_empty() {
                record.extend_from_slice(content);
                return String::from_utf8(record).map(Some).map_err(Into::into);
            }

            if !record.is_empty() {
                record.push(b'\n');
            }
            record.extend_from_slice(content);
        }
    }

    /// Reads one line including its terminator. Returns `false` on EOF.
    fn read_line(&mut self, line: &mut Vec<u8>, budget: usize) -> Result<bool, FrameError> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            };
            if available.is_empty() {
                return Ok(false);
            }
            let (taken, found) = match available.iter().position(|byte| *byte == b'\n') {
                Some(index) => (index + 1, true),
                None => (available.len(), false),
            };
            line.extend_from_slice(&available[..taken]);
            self.reader.consume(taken);

            let size = strip_line_ending(line).len();
            if size > budget {
                return Err(FrameError::TooLarge {
                    size: self.max_bytes - budget + size,
                    max_size: self.max_bytes,
                });
            }
            if found {
                return Ok(true);
            }
        }
    }

    /// Borrows the underlying stream.
    pub fn get_ref(&self) -> &R {
        self.reader.get_ref()
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Writes response records.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps an outbound stream.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes `payload` as one record, compressing it when `level > 0`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] when compression or the write fails.
    pub fn write_record(&mut self, payload: &[u8], level: u32) -> Result<(), FrameError> {
        if level > 0 {
            let level = level.min(MAX_COMPRESSION_LEVEL);
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(payload).map_err(FrameError::Io)?;
            let compressed = encoder.finish().map_err(FrameError::Io)?;
            self.writer.write_all(&compressed).map_err(FrameError::Io)?;
        } else {
            self.writer.write_all(payload).map_err(FrameError::Io)?;
        }
        self.writer
            .write_all(RECORD_TERMINATOR)
            .map_err(FrameError::Io)?;
        self.writer.flush().map_err(FrameError::Io)
    }

    /// Borrows the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use flate2::read::ZlibDecoder;
    use rstest::rstest;

    use super::*;

    fn reader(input: &[u8], mode: FrameMode) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(input.to_vec()), mode, 64)
    }

    fn records(input: &[u8], mode: FrameMode) -> Vec<String> {
        let mut reader = reader(input, mode);
        let mut out = Vec::new();
        while let Some(record) = reader.read_record().expect("record") {
            out.push(record);
        }
        out
    }

    #[rstest]
    #[case(b"{\"a\":1}\r\n\r\n{\"b\":2}\r\n\r\n".as_slice(), vec!["{\"a\":1}", "{\"b\":2}"])]
    #[case(b"{\"a\":\n1}\n\n".as_slice(), vec!["{\"a\":\n1}"])]
    #[case(b"\r\n".as_slice(), vec![""])]
    #[case(b"{\"tail\":0}".as_slice(), vec!["{\"tail\":0}"])]
    fn blank_mode_splits_on_empty_lines(#[case] input: &[u8], #[case] expected: Vec<&str>) {
        assert_eq!(records(input, FrameMode::Blank), expected);
    }

    #[test]
    fn line_mode_yields_every_line() {
        assert_eq!(
            records(b"{\"a\":1}\n\n{\"b\":2}\r\n", FrameMode::Line),
            vec!["{\"a\":1}", "", "{\"b\":2}"]
        );
    }

    #[test]
    fn closed_stream_yields_nothing() {
        let mut reader = reader(b"", FrameMode::Blank);
        assert!(reader.read_record().expect("eof").is_none());
    }

    #[test]
    fn oversized_records_are_rejected() {
        let mut input = vec![b'x'; 100];
        input.extend_from_slice(b"\n\n");
        let mut reader = reader(&input, FrameMode::Blank);
        assert!(matches!(
            reader.read_record(),
            Err(FrameError::TooLarge { max_size: 64, .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_an_encoding_error() {
        let mut reader = reader(b"\xff\xfe\n\n", FrameMode::Blank);
        assert!(matches!(reader.read_record(), Err(FrameError::Encoding(_))));
    }

    #[rstest]
    #[case(io::ErrorKind::WouldBlock)]
    #[case(io::ErrorKind::TimedOut)]
    fn read_deadlines_map_to_idle_timeout(#[case] kind: io::ErrorKind) {
        assert!(matches!(
            FrameError::from(io::Error::from(kind)),
            FrameError::IdleTimeout
        ));
    }

    #[test]
    fn uncompressed_records_carry_the_terminator() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_record(b"{}", 0).expect("write");
        assert_eq!(writer.get_ref().as_slice(), b"{}\r\n\r\n");
    }

    #[test]
    fn compressed_records_inflate_to_the_payload() {
        let mut writer = FrameWriter::new(Vec::new());
        writer
            .write_record(b"{\"observation\":[0.0,0.0]}", 6)
            .expect("write");
        let bytes = writer.get_ref();
        let body = bytes
            .strip_suffix(RECORD_TERMINATOR)
            .expect("terminated record");

        let mut decoded = String::new();
        ZlibDecoder::new(body)
            .read_to_string(&mut decoded)
            .expect("inflate");
        assert_eq!(decoded, "{\"observation\":[0.0,0.0]}");
    }
}
