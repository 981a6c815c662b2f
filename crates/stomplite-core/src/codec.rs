//! STOMP frame codec.
//!
//! Wire grammar (one line-feed per line, NUL terminates the body):
//!
//! ```text
//! COMMAND\n
//! name:value\n        (zero or more)
//! \n
//! body\0
//! ```
//!
//! Decoding is resumable: `decode` returns every complete frame in the buffer
//! together with the unconsumed tail, which the caller keeps and prepends to
//! the next delivery.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::frame::{header, Command, Frame, Headers};

/// Frame terminator.
pub const NUL: u8 = 0;

/// Whether `encode` adds a `content-length` header for non-empty bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentLength {
    /// Add `content-length` unless the caller already supplied one.
    #[default]
    Auto,
    /// Never add it.
    Omit,
}

/// Encode a frame from its parts, appending to `buf`.
///
/// The automatic `content-length` is the body's length in bytes, so a body
/// holding multi-byte UTF-8 characters counts each one by its encoded size.
pub fn encode(
    command: Command,
    headers: &Headers,
    body: &[u8],
    content_length: ContentLength,
    buf: &mut Vec<u8>,
) {
    buf.extend_from_slice(command.as_str().as_bytes());
    buf.push(b'\n');

    for (name, value) in headers.iter() {
        buf.extend_from_slice(name.as_bytes());
        buf.push(b':');
        buf.extend_from_slice(value.as_bytes());
        buf.push(b'\n');
    }

    if !body.is_empty()
        && content_length == ContentLength::Auto
        && !headers.contains(header::CONTENT_LENGTH)
    {
        buf.extend_from_slice(header::CONTENT_LENGTH.as_bytes());
        buf.push(b':');
        buf.extend_from_slice(body.len().to_string().as_bytes());
        buf.push(b'\n');
    }

    buf.push(b'\n');
    buf.extend_from_slice(body);
    buf.push(NUL);
}

/// Encode a `Frame`, appending to `buf`.
pub fn encode_frame(frame: &Frame, buf: &mut Vec<u8>) {
    encode(
        frame.command(),
        frame.headers(),
        frame.body(),
        frame.content_length(),
        buf,
    );
}

/// Result of decoding a buffer.
#[derive(Debug)]
pub struct Decoded<'a> {
    /// Complete frames in arrival order.
    pub frames: Vec<Frame>,
    /// Errors for malformed frames that were skipped.
    pub malformed: Vec<ProtocolError>,
    /// Bytes not consumed yet (a partial frame, or nothing).
    pub remaining: &'a [u8],
}

impl Decoded<'_> {
    /// Number of bytes consumed from the input.
    pub fn consumed(&self, input: &[u8]) -> usize {
        input.len() - self.remaining.len()
    }
}

/// Decode every complete frame in `buf`.
///
/// Blank lines between frames are skipped. A malformed frame is dropped up to
/// and including its NUL terminator and decoding carries on with the rest; if
/// the terminator has not arrived yet the bytes stay in `remaining`.
pub fn decode(buf: &[u8]) -> Decoded<'_> {
    let mut frames = Vec::new();
    let mut malformed = Vec::new();
    let mut pos = 0;

    loop {
        pos += skip_eols(&buf[pos..]);
        if pos >= buf.len() {
            break;
        }

        match decode_frame(&buf[pos..]) {
            Ok(Some((frame, consumed))) => {
                frames.push(frame);
                pos += consumed;
            }
            Ok(None) => break,
            Err(e) => match find_byte(&buf[pos..], NUL) {
                Some(nul) => {
                    malformed.push(e);
                    pos += nul + 1;
                }
                None => break,
            },
        }
    }

    Decoded {
        frames,
        malformed,
        remaining: &buf[pos..],
    }
}

/// Try to decode one frame starting at `buf[0]`.
///
/// Returns `Ok(Some((frame, bytes_consumed)))` if successful, `Ok(None)` if
/// more data is needed, or `Err` if the frame is malformed.
///
/// When a valid `content-length` header is present the body is exactly that
/// many bytes (and may contain NUL); otherwise it runs up to the first NUL.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    let first_nul = find_byte(buf, NUL);

    let Some((header_end, body_start)) = find_header_end(buf) else {
        return match first_nul {
            Some(_) => Err(ProtocolError::MissingDivider),
            None => Ok(None),
        };
    };

    if matches!(first_nul, Some(nul) if nul < header_end) {
        return Err(ProtocolError::MissingDivider);
    }

    let (command, headers) = parse_header_block(&buf[..header_end])?;

    let (body_end, consumed) = match headers.get(header::CONTENT_LENGTH) {
        Some(raw) => {
            let len: usize = raw
                .parse()
                .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string()))?;
            let body_end = body_start
                .checked_add(len)
                .ok_or_else(|| ProtocolError::InvalidContentLength(raw.to_string()))?;
            if buf.len() <= body_end {
                return Ok(None);
            }
            if buf[body_end] != NUL {
                return Err(ProtocolError::MissingTerminator(len));
            }
            (body_end, body_end + 1)
        }
        None => match find_byte(&buf[body_start..], NUL) {
            Some(offset) => (body_start + offset, body_start + offset + 1),
            None => return Ok(None),
        },
    };

    let body = Bytes::copy_from_slice(&buf[body_start..body_end]);
    Ok(Some((Frame::with_parts(command, headers, body), consumed)))
}

fn parse_header_block(block: &[u8]) -> Result<(Command, Headers)> {
    let text = std::str::from_utf8(block).map_err(|_| ProtocolError::InvalidUtf8)?;
    let mut lines = text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

    let command: Command = lines.next().unwrap_or_default().trim().parse()?;

    let mut headers = Headers::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProtocolError::MalformedHeader(line.to_string()));
        };
        let name = name.trim();
        // Repeated headers: only the first occurrence counts.
        if !headers.contains(name) {
            headers.append(name, value.trim());
        }
    }

    Ok((command, headers))
}

/// Locate the blank line ending the header block.
/// Returns (end of header block, start of body). Accepts LF and CRLF.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while let Some(offset) = find_byte(&buf[i..], b'\n') {
        let lf = i + offset;
        let end = if lf > 0 && buf[lf - 1] == b'\r' { lf - 1 } else { lf };
        match &buf[lf + 1..] {
            [b'\n', ..] => return Some((end, lf + 2)),
            [b'\r', b'\n', ..] => return Some((end, lf + 3)),
            _ => i = lf + 1,
        }
    }
    None
}

/// Count leading EOLs (`\n` or `\r\n`) sent between frames.
fn skip_eols(buf: &[u8]) -> usize {
    let mut pos = 0;
    loop {
        match &buf[pos..] {
            [b'\n', ..] => pos += 1,
            [b'\r', b'\n', ..] => pos += 2,
            _ => return pos,
        }
    }
}

fn find_byte(buf: &[u8], byte: u8) -> Option<usize> {
    buf.iter().position(|&b| b == byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_to_vec(frame: &Frame) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_frame(frame, &mut buf);
        buf
    }

    fn decode_one(data: &[u8]) -> Frame {
        let decoded = decode(data);
        assert!(decoded.malformed.is_empty(), "{:?}", decoded.malformed);
        assert_eq!(decoded.frames.len(), 1);
        decoded.frames.into_iter().next().unwrap()
    }

    #[test]
    fn test_encode_connect() {
        let frame = Frame::new(Command::Connect)
            .header("login", "jmesnil")
            .header("passcode", "wombats");
        assert_eq!(
            encode_to_vec(&frame),
            b"CONNECT\nlogin:jmesnil\npasscode:wombats\n\n\0"
        );
    }

    #[test]
    fn test_encode_send_adds_content_length() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/queue/test")
            .with_body("hello, world!");
        assert_eq!(
            encode_to_vec(&frame),
            b"SEND\ndestination:/queue/test\ncontent-length:13\n\nhello, world!\0"
        );
    }

    #[test]
    fn test_encode_send_without_content_length() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/queue/test")
            .with_body("hello, world!")
            .without_content_length();
        assert_eq!(
            encode_to_vec(&frame),
            b"SEND\ndestination:/queue/test\n\nhello, world!\0"
        );
    }

    #[test]
    fn test_encode_keeps_explicit_content_length() {
        let frame = Frame::new(Command::Send)
            .header("content-length", "5")
            .with_body("hello");
        assert_eq!(encode_to_vec(&frame), b"SEND\ncontent-length:5\n\nhello\0");
    }

    #[test]
    fn test_content_length_counts_utf8_bytes() {
        let cases = [("a", 1), ("ф", 2), ("№", 3), ("1 a ф № @ ®", 15)];
        for (body, expected) in cases {
            let mut buf = Vec::new();
            encode(Command::Send, &Headers::new(), body.as_bytes(), ContentLength::Auto, &mut buf);
            let frame = decode_one(&buf);
            assert_eq!(frame.get("content-length"), Some(expected.to_string().as_str()));
            assert_eq!(frame.body_str(), Some(body));
        }
    }

    #[test]
    fn test_empty_body_has_no_content_length() {
        let mut buf = Vec::new();
        encode(Command::Disconnect, &Headers::new(), b"", ContentLength::Auto, &mut buf);
        assert_eq!(buf, b"DISCONNECT\n\n\0");
    }

    #[test]
    fn test_round_trip() {
        let frame = Frame::new(Command::Message)
            .header("destination", "/topic/chat")
            .header("message-id", "m-7")
            .header("subscription", "sub-0")
            .with_body("multi\nline body");
        let decoded = decode_one(&encode_to_vec(&frame));
        assert_eq!(decoded.command(), Command::Message);
        assert_eq!(decoded.get("destination"), Some("/topic/chat"));
        assert_eq!(decoded.get("message-id"), Some("m-7"));
        assert_eq!(decoded.get("subscription"), Some("sub-0"));
        assert_eq!(decoded.body_str(), Some("multi\nline body"));
    }

    #[test]
    fn test_decode_connected_trims_values() {
        let frame = decode_one(b"CONNECTED\nsession-id: 1234\n\n\0");
        assert_eq!(frame.command(), Command::Connected);
        assert_eq!(frame.get("session-id"), Some("1234"));
        assert!(frame.body().is_empty());
    }

    #[test]
    fn test_decode_body_excludes_nul() {
        let head = b"MESSAGE\ndestination: /queue/test\nmessage-id: 123\n\n";
        for body in ["Just the text please.", "And the newline\n"] {
            let mut data = head.to_vec();
            data.extend_from_slice(body.as_bytes());
            data.push(NUL);
            assert_eq!(decode_one(&data).body_str(), Some(body));
        }
    }

    #[test]
    fn test_decode_colons_in_header_value() {
        let frame = decode_one(b"MESSAGE\ndestination: foo:bar:baz\nmessage-id: 456\n\n\0");
        assert_eq!(frame.get("destination"), Some("foo:bar:baz"));
    }

    #[test]
    fn test_decode_duplicate_headers_first_wins() {
        let frame = decode_one(b"MESSAGE\ndestination: /queue/test\nfoo:World\nfoo:Hello\n\n\0");
        assert_eq!(frame.get("foo"), Some("World"));
        assert_eq!(frame.headers().len(), 2);
    }

    #[test]
    fn test_decode_partial_is_resumable() {
        let full = Frame::new(Command::Message)
            .header("destination", "/queue/a")
            .header("subscription", "sub-1")
            .with_body("payload");
        let bytes = encode_to_vec(&full);
        let cut = 12; // mid-header

        let first = decode(&bytes[..cut]);
        assert!(first.frames.is_empty());
        assert_eq!(first.remaining, &bytes[..cut]);

        let mut carried = first.remaining.to_vec();
        carried.extend_from_slice(&bytes[cut..]);
        let second = decode(&carried);
        assert_eq!(second.frames.len(), 1);
        assert!(second.remaining.is_empty());
        assert_eq!(second.frames[0], decode_one(&bytes));
    }

    #[test]
    fn test_decode_partial_body_waits_for_content_length() {
        let bytes = encode_to_vec(&Frame::new(Command::Send).with_body("0123456789"));
        let partial = decode(&bytes[..bytes.len() - 3]);
        assert!(partial.frames.is_empty());
        assert_eq!(partial.remaining.len(), bytes.len() - 3);
    }

    #[test]
    fn test_decode_multiple_frames_in_order() {
        let mut data = Vec::new();
        encode_frame(&Frame::new(Command::Receipt).header("receipt-id", "r-1"), &mut data);
        encode_frame(&Frame::new(Command::Receipt).header("receipt-id", "r-2"), &mut data);
        let decoded = decode(&data);
        assert_eq!(decoded.frames.len(), 2);
        assert_eq!(decoded.frames[0].get("receipt-id"), Some("r-1"));
        assert_eq!(decoded.frames[1].get("receipt-id"), Some("r-2"));
        assert!(decoded.remaining.is_empty());
    }

    #[test]
    fn test_decode_complete_then_partial() {
        let mut data = b"RECEIPT\nreceipt-id:1\n\n\0".to_vec();
        data.extend_from_slice(b"MESSAGE\nsubscr");
        let decoded = decode(&data);
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.remaining, b"MESSAGE\nsubscr");
        assert_eq!(decoded.consumed(&data), data.len() - 14);
    }

    #[test]
    fn test_decode_skips_heartbeat_eols() {
        let decoded = decode(b"\n\r\nRECEIPT\nreceipt-id:1\n\n\0\n\n");
        assert_eq!(decoded.frames.len(), 1);
        assert!(decoded.remaining.is_empty());
    }

    #[test]
    fn test_decode_crlf_headers() {
        let frame = decode_one(b"MESSAGE\r\ndestination:/queue/a\r\n\r\nbody\0");
        assert_eq!(frame.get("destination"), Some("/queue/a"));
        assert_eq!(frame.body_str(), Some("body"));
    }

    #[test]
    fn test_decode_content_length_allows_nul_in_body() {
        let frame = Frame::new(Command::Message).with_body(&b"a\0b"[..]);
        let decoded = decode_one(&encode_to_vec(&frame));
        assert_eq!(decoded.body().as_ref(), b"a\0b");
    }

    #[test]
    fn test_decode_missing_terminator_after_content_length() {
        let decoded = decode(b"MESSAGE\ncontent-length:2\n\nabc\0RECEIPT\nreceipt-id:9\n\n\0");
        assert_eq!(decoded.malformed, vec![ProtocolError::MissingTerminator(2)]);
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.frames[0].get("receipt-id"), Some("9"));
    }

    #[test]
    fn test_decode_malformed_header_is_dropped() {
        let decoded = decode(b"MESSAGE\nno-colon-here\n\nbody\0RECEIPT\nreceipt-id:2\n\n\0");
        assert_eq!(
            decoded.malformed,
            vec![ProtocolError::MalformedHeader("no-colon-here".into())]
        );
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.frames[0].command(), Command::Receipt);
    }

    #[test]
    fn test_decode_missing_divider_is_dropped() {
        let decoded = decode(b"MESSAGE\nfoo:bar\0RECEIPT\nreceipt-id:3\n\n\0");
        assert_eq!(decoded.malformed, vec![ProtocolError::MissingDivider]);
        assert_eq!(decoded.frames.len(), 1);
    }

    #[test]
    fn test_decode_unknown_command_is_dropped() {
        let decoded = decode(b"RECEIVE\nfoo: abc\n\nhello\0");
        assert_eq!(
            decoded.malformed,
            vec![ProtocolError::UnknownCommand("RECEIVE".into())]
        );
        assert!(decoded.frames.is_empty());
        assert!(decoded.remaining.is_empty());
    }

    #[test]
    fn test_decode_malformed_without_terminator_waits() {
        let decoded = decode(b"MESSAGE\nbroken\n\npartial body");
        assert!(decoded.frames.is_empty());
        assert!(decoded.malformed.is_empty());
        assert_eq!(decoded.remaining.len(), 28);
    }

    #[test]
    fn test_decode_invalid_content_length() {
        let decoded = decode(b"MESSAGE\ncontent-length:abc\n\nbody\0");
        assert_eq!(
            decoded.malformed,
            vec![ProtocolError::InvalidContentLength("abc".into())]
        );
    }

    #[test]
    fn test_decode_overflowing_content_length_is_dropped() {
        let decoded = decode(
            b"MESSAGE\ncontent-length:18446744073709551615\n\nx\0RECEIPT\nreceipt-id:r-1\n\n\0",
        );
        assert_eq!(
            decoded.malformed,
            vec![ProtocolError::InvalidContentLength(
                "18446744073709551615".into()
            )]
        );
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.frames[0].get("receipt-id"), Some("r-1"));
        assert!(decoded.remaining.is_empty());
    }
}
