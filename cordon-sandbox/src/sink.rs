//! Output capture that never grows past a fixed cap

/// A byte buffer that keeps at most `cap` bytes and silently discards the
/// rest, while still counting everything it was offered.
#[derive(Debug, Clone)]
pub struct BoundedSink {
    buf: Vec<u8>,
    cap: usize,
    seen: u64,
}

impl BoundedSink {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap.min(64 * 1024)),
            cap,
            seen: 0,
        }
    }

    /// Append as much of `chunk` as fits; returns the number of bytes kept.
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        self.seen += chunk.len() as u64;
        let room = self.cap - self.buf.len();
        let kept = room.min(chunk.len());
        self.buf.extend_from_slice(&chunk[..kept]);
        kept
    }

    pub fn is_truncated(&self) -> bool {
        self.seen > self.buf.len() as u64
    }

    /// Total bytes offered, including discarded ones
    pub fn bytes_seen(&self) -> u64 {
        self.seen
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Decode as UTF-8 (lossy) without ever exceeding the cap.
    ///
    /// A multi-byte character cut at the boundary is dropped rather than
    /// replaced, and replacement characters that would push the text past
    /// the cap are trimmed at a character boundary.
    pub fn into_string(self) -> String {
        let mut bytes = self.buf;
        if let Err(err) = std::str::from_utf8(&bytes) {
            if err.error_len().is_none() {
                bytes.truncate(err.valid_up_to());
            }
        }

        let mut text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        };

        if text.len() > self.cap {
            let mut end = self.cap;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        text
    }
}

impl std::io::Write for BoundedSink {
    /// Accepts every byte so upstream copies never stall on a full sink.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
