use std::{
    borrow::Cow,
    io::{self, BufRead},
};

use log::warn;

/// Reads lines into a reusable buffer.
///
/// Unlike `BufRead::lines()`, a line with invalid UTF-8 doesn't fail;
/// it's converted lossily and reported by `warn!`.
#[derive(Debug, Default)]
pub struct LineReadBuffer {
    buffer: Vec<u8>,
    line_count: usize,
}

impl LineReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of lines read so far.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Read the next line without the line terminator.
    /// Returns `None` at the end of the stream.
    pub fn read_line_from(&mut self, reader: &mut impl BufRead) -> io::Result<Option<Cow<'_, str>>> {
        self.buffer.clear();
        if reader.read_until(b'\n', &mut self.buffer)? == 0 {
            return Ok(None);
        }
        self.line_count += 1;

        let mut line = self.buffer.as_slice();
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest.strip_suffix(b"\r").unwrap_or(rest);
        }
        let line = String::from_utf8_lossy(line);
        if let Cow::Owned(_) = line {
            warn!("Invalid UTF-8 at line {}: \"{line}\"", self.line_count);
        }
        Ok(Some(line))
    }
}
