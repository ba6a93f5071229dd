/// Splits a streamed response body into newline-delimited frames.
///
/// Bytes are buffered until a newline arrives, so a frame (or a multi-byte
/// character) split across network reads comes out whole. Create one decoder
/// per response.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one read and returns every line it completed, oldest first.
    /// Blank lines are returned too; callers skip them.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(fragment);

        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        complete[..last_newline]
            .split(|byte| *byte == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect()
    }

    /// Ends the stream. An unterminated trailing frame is dropped; the number
    /// of discarded bytes is returned.
    pub fn finish(self) -> usize {
        let dropped = self.pending.len();
        if dropped > 0 {
            log::debug!("dropping {} bytes of unterminated trailing frame", dropped);
        }
        dropped
    }
}
