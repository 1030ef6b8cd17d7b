/// Incremental UTF-8 decoder for PTY output.
///
/// PTY reads split multi-byte characters at arbitrary points; the tail of an
/// incomplete sequence is carried over to the next chunk instead of being
/// replaced, so the concatenated output equals a one-shot decode.
#[derive(Debug, Default)]
pub(crate) struct Utf8StreamDecoder {
    buf: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return everything that is complete so far.
    /// Genuinely invalid bytes become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.buf.extend_from_slice(chunk);
        let mut result = String::new();

        loop {
            match std::str::from_utf8(&self.buf) {
                Ok(s) => {
                    result.push_str(s);
                    self.buf.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    result.push_str(&String::from_utf8_lossy(&self.buf[..valid_up_to]));

                    match e.error_len() {
                        None => {
                            // Incomplete sequence at end
                            self.buf.drain(..valid_up_to);
                            break;
                        }
                        Some(len) => {
                            result.push('\u{FFFD}');
                            self.buf.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }

        result
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        rest
    }
}
