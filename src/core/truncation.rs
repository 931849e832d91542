use crate::domain::errors::TruncateError;
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Result of streaming one file through a [`LineAccumulator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub original_lines: usize,
    pub kept_lines: usize,
    pub kept_bytes: usize,
    pub truncated: bool,
    /// Kept lines with `\n` line endings, plus the marker when `truncated`.
    pub content: String,
}

pub fn truncation_marker(original_lines: usize, kept_lines: usize) -> String {
    format!("… [TRUNCATED: original_lines={original_lines} kept_lines={kept_lines}]\n")
}

/// Incremental UTF-8 check. Holds at most one incomplete scalar between bytes.
#[derive(Debug, Default)]
struct Utf8Check {
    pending: [u8; 4],
    len: usize,
}

impl Utf8Check {
    fn feed(&mut self, byte: u8) -> Result<(), TruncateError> {
        if self.len == self.pending.len() {
            return Err(TruncateError::InvalidEncoding);
        }
        self.pending[self.len] = byte;
        self.len += 1;

        match std::str::from_utf8(&self.pending[..self.len]) {
            Ok(_) => {
                self.len = 0;
                Ok(())
            }
            Err(e) if e.error_len().is_none() => Ok(()),
            Err(_) => Err(TruncateError::InvalidEncoding),
        }
    }

    fn finish(&self) -> Result<(), TruncateError> {
        if self.len == 0 {
            Ok(())
        } else {
            Err(TruncateError::InvalidEncoding)
        }
    }
}

/// Line-budget state machine fed one byte at a time.
///
/// While buffering, complete lines are kept as long as both the line and byte
/// limits allow. The first line that does not fit flips the accumulator into
/// count-only mode: every later line end is still counted but no bytes are stored.
/// `\n`, `\r\n` and a lone `\r` each end a line and are stored as `\n`.
#[derive(Debug)]
pub struct LineAccumulator {
    max_lines: usize,
    max_bytes: usize,
    utf8: Utf8Check,
    line: Vec<u8>,
    kept: Vec<u8>,
    original_lines: usize,
    kept_lines: usize,
    truncated: bool,
    count_only: bool,
    seen_any: bool,
    last_was_newline: bool,
    after_cr: bool,
}

impl LineAccumulator {
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            max_lines,
            max_bytes,
            utf8: Utf8Check::default(),
            line: Vec::new(),
            kept: Vec::new(),
            original_lines: 0,
            kept_lines: 0,
            truncated: false,
            count_only: false,
            seen_any: false,
            last_was_newline: false,
            after_cr: false,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Result<(), TruncateError> {
        self.utf8.feed(byte)?;
        self.seen_any = true;

        // CR ends a line on its own; the LF of a CRLF pair is then dropped.
        if std::mem::replace(&mut self.after_cr, byte == b'\r') && byte == b'\n' {
            return Ok(());
        }
        let byte = if byte == b'\r' { b'\n' } else { byte };
        self.last_was_newline = byte == b'\n';

        if self.count_only {
            if byte == b'\n' {
                self.original_lines += 1;
            }
            return Ok(());
        }

        self.line.push(byte);

        // A line that cannot fit now never will; stop buffering before it grows.
        if !self.fits(self.line.len()) {
            self.enter_count_only();
            if byte == b'\n' {
                self.original_lines += 1;
            }
            return Ok(());
        }

        if byte == b'\n' {
            self.keep_line();
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<Truncated, TruncateError> {
        self.utf8.finish()?;

        if self.seen_any && !self.last_was_newline {
            if self.count_only {
                self.original_lines += 1;
            } else {
                self.keep_line();
            }
        }

        let kept_bytes = self.kept.len();
        let kept = String::from_utf8(self.kept).map_err(|_| TruncateError::InvalidEncoding)?;
        let mut content = kept;
        if self.truncated {
            content.push_str(&truncation_marker(self.original_lines, self.kept_lines));
        }

        Ok(Truncated {
            original_lines: self.original_lines,
            kept_lines: self.kept_lines,
            kept_bytes,
            truncated: self.truncated,
            content,
        })
    }

    fn fits(&self, line_len: usize) -> bool {
        self.kept_lines < self.max_lines && self.kept.len() + line_len <= self.max_bytes
    }

    fn keep_line(&mut self) {
        self.original_lines += 1;
        self.kept.extend_from_slice(&self.line);
        self.kept_lines += 1;
        self.line.clear();
    }

    fn enter_count_only(&mut self) {
        self.truncated = true;
        self.count_only = true;
        self.line = Vec::new();
    }
}

pub fn truncate_bytes(
    bytes: &[u8],
    max_lines: usize,
    max_bytes: usize,
) -> Result<Truncated, TruncateError> {
    let mut acc = LineAccumulator::new(max_lines, max_bytes);
    for &byte in bytes {
        acc.feed(byte)?;
    }
    acc.finish()
}

pub fn truncate_reader<R: Read>(
    reader: R,
    max_lines: usize,
    max_bytes: usize,
) -> Result<Truncated, TruncateError> {
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, reader);
    let mut acc = LineAccumulator::new(max_lines, max_bytes);

    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        for &byte in chunk {
            acc.feed(byte)?;
        }
        let consumed = chunk.len();
        reader.consume(consumed);
    }
    acc.finish()
}

/// Opens, streams, and closes one file. Returns the on-disk size alongside the result.
pub fn truncate_file(
    path: &Path,
    max_lines: usize,
    max_bytes: usize,
) -> Result<(u64, Truncated), TruncateError> {
    let size = std::fs::metadata(path)?.len();
    let file = File::open(path)?;
    let result = truncate_reader(file, max_lines, max_bytes)?;
    debug!(
        "Truncated {}: lines {}/{} bytes {}/{} truncated={}",
        path.display(),
        result.kept_lines,
        result.original_lines,
        result.kept_bytes,
        size,
        result.truncated
    );
    Ok((size, result))
}
