#[cfg(test)]
#[path = "frame_buffer_test.rs"]
mod tests;

/// Splits raw chunks read off the transport into complete protocol lines,
/// holding back a trailing partial line until more data arrives.
///
/// Buffering happens on bytes so a multi-byte character split across two
/// reads is never decoded in halves. Lines end on `\n`; a trailing `\r` is
/// dropped so CRLF and LF streams read the same.
#[derive(Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn feed<T: AsRef<[u8]>>(&mut self, chunk: T) -> Vec<String> {
        self.pending.extend_from_slice(chunk.as_ref());

        let mut lines: Vec<String> = vec![];
        let mut start = 0;
        for (idx, byte) in self.pending.iter().enumerate() {
            if *byte == b'\n' {
                lines.push(decode_line(&self.pending[start..idx]));
                start = idx + 1;
            }
        }

        self.pending.drain(..start);
        return lines;
    }

    /// Emits whatever remains once the stream has ended.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        let line = decode_line(&self.pending);
        self.pending.clear();
        return Some(line);
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    return String::from_utf8_lossy(raw).to_string();
}
