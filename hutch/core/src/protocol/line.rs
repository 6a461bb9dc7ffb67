//! Newline-delimited framing
//!
//! One JSON object per line. Output lines are CRLF-terminated; input is
//! tolerant of bare LF. [`LineDecoder`] buffers partial reads across network
//! deliveries and hands back complete lines with the terminator stripped, so
//! a request split over many TCP segments decodes exactly once.

use serde::Serialize;

/// Consumed bytes are compacted away once they outnumber the live remainder
/// and exceed this many bytes.
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Encode one message as a CRLF-terminated JSON line.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(message)?;
    line.extend_from_slice(b"\r\n");
    Ok(line)
}

/// Incremental line extractor for a session's inbound byte stream.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl LineDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes to the internal buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line with the terminator stripped, or `None` until more
    /// bytes arrive. Whitespace-only lines are swallowed silently.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let start = self.read_pos;
            let newline = self.buffer[start..].iter().position(|&b| b == b'\n')?;
            let mut end = start + newline;
            self.read_pos = end + 1;
            if end > start && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }
            let line = &self.buffer[start..end];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(line.to_vec());
        }
    }

    /// Bytes buffered but not yet consumed as complete lines.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn encode_terminates_with_crlf() {
        let line = encode(&json!({"type": "state", "state": "idle"})).unwrap();
        assert!(line.ends_with(b"\r\n"));
        let body: serde_json::Value = serde_json::from_slice(&line[..line.len() - 2]).unwrap();
        assert_eq!(body["state"], "idle");
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut decoder = LineDecoder::new();
        decoder.push(br#"{"type":"sle"#);
        assert_eq!(decoder.next_line(), None);
        decoder.push(b"ep\"}\r\n");
        assert_eq!(decoder.next_line().unwrap(), br#"{"type":"sleep"}"#.to_vec());
        assert_eq!(decoder.next_line(), None);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn bare_lf_is_accepted() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"{\"a\":1}\n");
        assert_eq!(decoder.next_line().unwrap(), br#"{"a":1}"#.to_vec());
    }

    #[test]
    fn multiple_lines_in_one_delivery() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"{\"a\":1}\r\n{\"b\":2}\r\n{\"c\"");
        assert_eq!(decoder.next_line().unwrap(), br#"{"a":1}"#.to_vec());
        assert_eq!(decoder.next_line().unwrap(), br#"{"b":2}"#.to_vec());
        assert_eq!(decoder.next_line(), None);
        decoder.push(b":3}\r\n");
        assert_eq!(decoder.next_line().unwrap(), br#"{"c":3}"#.to_vec());
    }

    #[test]
    fn blank_and_whitespace_lines_are_swallowed() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"\r\n   \r\n{\"a\":1}\r\n\r\n");
        assert_eq!(decoder.next_line().unwrap(), br#"{"a":1}"#.to_vec());
        assert_eq!(decoder.next_line(), None);
    }

    #[test]
    fn consumed_bytes_are_compacted_eventually() {
        let mut decoder = LineDecoder::new();
        let line = format!("{{\"pad\":\"{}\"}}\r\n", "x".repeat(2048));
        for _ in 0..4 {
            decoder.push(line.as_bytes());
            assert!(decoder.next_line().is_some());
        }
        // Torn line across the compaction boundary still reassembles.
        let half = line.len() / 2;
        decoder.push(&line.as_bytes()[..half]);
        decoder.push(&line.as_bytes()[half..]);
        assert_eq!(decoder.next_line().unwrap().len(), line.len() - 2);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn clear_discards_partial_input() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"{\"unfinished\":");
        decoder.clear();
        decoder.push(b"{\"a\":1}\r\n");
        assert_eq!(decoder.next_line().unwrap(), br#"{"a":1}"#.to_vec());
    }
}
