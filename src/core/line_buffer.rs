//! Newline framing for subprocess stdout.
//!
//! Reads arrive at arbitrary byte boundaries; a JSON object, or even a UTF-8
//! code point, may be split across two reads. The buffer keeps the trailing
//! partial line until its newline arrives.

/// Accumulates bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them, without the
    /// terminator. Blank lines are skipped; `\r\n` is accepted.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }

    /// Bytes held back waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_back_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(br#"{"type":"turn.sta"#).is_empty());
        assert_eq!(buf.pending_len(), 17);
        let lines = buf.push(b"rted\"}\n{\"a\":1}\n{\"b\"");
        assert_eq!(lines, vec![r#"{"type":"turn.started"}"#, r#"{"a":1}"#]);
        assert_eq!(buf.finish().as_deref(), Some(r#"{"b""#));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn split_multibyte_char_survives() {
        let text = "{\"t\":\"h\u{e9}llo\"}\n";
        let bytes = text.as_bytes();
        let cut = text.find('\u{e9}').unwrap() + 1;
        let mut buf = LineBuffer::new();
        assert!(buf.push(&bytes[..cut]).is_empty());
        assert_eq!(buf.push(&bytes[cut..]), vec!["{\"t\":\"h\u{e9}llo\"}"]);
    }

    #[test]
    fn skips_blank_and_crlf_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"one\r\n\r\n\ntwo\n");
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(buf.pending_len(), 0);
    }
}
