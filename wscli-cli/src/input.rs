//! Line buffering for the command stream.

use bytes::{Bytes, BytesMut};

/// Splits an arbitrarily chunked byte stream into newline-terminated lines.
///
/// A partial line is carried over until the rest of it arrives, so the
/// lines produced do not depend on how the input was chunked. `\r\n` line
/// endings are normalized to `\n`.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    scanned: usize,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of input.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete line, including its trailing `\n`.
    pub fn next_line(&mut self) -> Option<Bytes> {
        let offset = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
        let Some(offset) = offset else {
            self.scanned = self.buf.len();
            return None;
        };
        let end = self.scanned + offset;
        self.scanned = 0;

        let mut line = self.buf.split_to(end + 1);
        if end > 0 && line[end - 1] == b'\r' {
            line.truncate(end - 1);
            line.extend_from_slice(b"\n");
        }
        Some(line.freeze())
    }

    /// Flush whatever is left at end of input as a final line.
    ///
    /// Returns `None` when nothing is pending.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            return None;
        }
        self.scanned = 0;
        let mut line = self.buf.split();
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        line.extend_from_slice(b"\n");
        Some(line.freeze())
    }

    /// Number of buffered bytes not yet returned.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut LineBuffer) -> Vec<Bytes> {
        std::iter::from_fn(|| buffer.next_line()).collect()
    }

    #[test]
    fn test_yields_complete_lines() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"\\hup\nX-Key: 1\n");

        assert_eq!(drain(&mut buffer), vec![
            Bytes::from_static(b"\\hup\n"),
            Bytes::from_static(b"X-Key: 1\n"),
        ]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_partial_line_is_carried_over() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"\\di");
        assert!(buffer.next_line().is_none());
        buffer.push(b"al ws://localhost");
        assert!(buffer.next_line().is_none());
        buffer.push(b":8080\nnext");

        assert_eq!(
            buffer.next_line(),
            Some(Bytes::from_static(b"\\dial ws://localhost:8080\n"))
        );
        assert!(buffer.next_line().is_none());
        assert_eq!(buffer.pending(), 4);
    }

    #[test]
    fn test_chunking_does_not_change_lines() {
        let input: &[u8] = b"\\msg END\nline one\n\nline three\nEND\n";

        let mut whole = LineBuffer::new();
        whole.push(input);
        let expected = drain(&mut whole);

        let mut bytewise = LineBuffer::new();
        let mut lines = Vec::new();
        for byte in input {
            bytewise.push(std::slice::from_ref(byte));
            lines.extend(drain(&mut bytewise));
        }

        assert_eq!(lines, expected);
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_crlf_is_normalized() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"a\r");
        assert!(buffer.next_line().is_none());
        buffer.push(b"\nb\r\n\r\n");

        assert_eq!(drain(&mut buffer), vec![
            Bytes::from_static(b"a\n"),
            Bytes::from_static(b"b\n"),
            Bytes::from_static(b"\n"),
        ]);
    }

    #[test]
    fn test_finish_flushes_partial_tail() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"END");

        assert_eq!(buffer.finish(), Some(Bytes::from_static(b"END\n")));
        assert_eq!(buffer.finish(), None);
    }
}
