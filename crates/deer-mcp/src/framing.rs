//! Newline-delimited message framing.
//!
//! Reads from a pipe or socket arrive in arbitrary chunks, so bytes are
//! buffered until a complete line is available. Bytes are kept raw until
//! a newline is seen so multi-byte UTF-8 sequences split across chunks
//! decode correctly.

/// Accumulates bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    keep_blank: bool,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that also yields blank lines, as empty strings.
    ///
    /// Event streams use a blank line to end an event.
    pub fn with_blank_lines() -> Self {
        Self {
            buffer: Vec::new(),
            keep_blank: true,
        }
    }

    /// Feed a chunk and return every line it completed.
    ///
    /// Trailing `\r` is stripped. Blank lines are skipped unless the buffer
    /// was built with [`with_blank_lines`](Self::with_blank_lines).
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if let Some(line) = decode_line(&self.buffer[start..end], self.keep_blank) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        lines
    }

    /// Return whatever partial line is left when the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() {
            return None;
        }
        decode_line(&rest, self.keep_blank)
    }

    /// Number of buffered bytes not yet forming a complete line.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8], keep_blank: bool) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if line.trim().is_empty() {
        return keep_blank.then(String::new);
    }
    Some(line.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk() {
        let mut buf = LineBuffer::new();
        let lines = buf.feed(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buf.pending_bytes(), 0);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.feed(b"{\"jsonrpc\":").is_empty());
        assert!(buf.feed(b"\"2.0\"").is_empty());
        let lines = buf.feed(b",\"id\":1}\n{\"x\"");
        assert_eq!(lines, vec!["{\"jsonrpc\":\"2.0\",\"id\":1}"]);
        assert_eq!(buf.pending_bytes(), 4);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.feed(b"one\r\n\r\n\n  \ntwo\r\n");
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_multibyte_split() {
        let mut buf = LineBuffer::new();
        let text = "héllo\n".as_bytes();
        // split inside the two-byte 'é'
        assert!(buf.feed(&text[..2]).is_empty());
        assert_eq!(buf.feed(&text[2..]), vec!["héllo"]);
    }

    #[test]
    fn test_finish_flushes_partial_line() {
        let mut buf = LineBuffer::new();
        buf.feed(b"done\npartial");
        assert_eq!(buf.finish().as_deref(), Some("partial"));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_blank_lines_kept_on_request() {
        let mut buf = LineBuffer::with_blank_lines();
        let lines = buf.feed(b"data: a\r\n\r\ndata: b\n\n");
        assert_eq!(lines, vec!["data: a", "", "data: b", ""]);
        assert_eq!(buf.finish(), None);
    }
}
