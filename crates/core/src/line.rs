//! Line assembly for decoded telnet input
//!
//! Accepts any mix of LF, CR, CR LF and LF CR as a single terminator and
//! enforces a hard per-line cap. An over-length line is discarded up to its
//! terminator and reported, after which decoding carries on normally.

use thiserror::Error;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Rejected input line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("Command too long: {length} bytes (max: {max})")]
    TooLong { length: usize, max: usize },
}

/// Incremental line decoder
#[derive(Debug)]
pub struct LineDecoder {
    line: Vec<u8>,
    max_len: usize,
    /// Bytes thrown away from the current over-length line
    discarding: Option<usize>,
    /// Terminator that ended the previous line, if nothing followed it yet
    last_terminator: Option<u8>,
}

impl LineDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            line: Vec::with_capacity(max_len),
            max_len,
            discarding: None,
            last_terminator: None,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Feed decoded bytes, returning every line they complete
    pub fn feed(&mut self, data: &[u8]) -> Vec<Result<String, LineError>> {
        let mut lines = Vec::new();

        for &byte in data {
            match byte {
                CR | LF => {
                    // Second half of CR LF / LF CR
                    if self.line.is_empty()
                        && self.discarding.is_none()
                        && matches!(self.last_terminator, Some(prev) if prev != byte)
                    {
                        self.last_terminator = None;
                        continue;
                    }

                    self.last_terminator = Some(byte);
                    if let Some(length) = self.discarding.take() {
                        tracing::warn!("Discarded over-length input line ({} bytes)", length);
                        lines.push(Err(LineError::TooLong {
                            length,
                            max: self.max_len,
                        }));
                    } else {
                        lines.push(Ok(String::from_utf8_lossy(&self.line).into_owned()));
                        self.line.clear();
                    }
                }
                0 => {}
                _ => {
                    self.last_terminator = None;
                    if let Some(length) = self.discarding.as_mut() {
                        *length += 1;
                    } else if self.line.len() == self.max_len {
                        self.discarding = Some(self.line.len() + 1);
                        self.line.clear();
                    } else {
                        self.line.push(byte);
                    }
                }
            }
        }

        lines
    }

    /// Bytes of the current, unterminated line
    pub fn partial(&self) -> &[u8] {
        &self.line
    }
}
