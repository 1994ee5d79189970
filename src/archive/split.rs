//! Split archive streams
//!
//! A backup stores one logical tar stream as several part files. Reading
//! concatenates the parts in order so part boundaries are invisible to the
//! decompressor; writing rotates to a new part once the size limit is hit.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// Reads a list of part files as one continuous stream
pub struct SplitReader {
    pending: VecDeque<PathBuf>,
    current: Option<File>,
}

impl SplitReader {
    pub fn new(parts: &[PathBuf]) -> Self {
        Self {
            pending: parts.iter().cloned().collect(),
            current: None,
        }
    }
}

impl Read for SplitReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.current.is_none() {
                match self.pending.pop_front() {
                    Some(path) => self.current = Some(File::open(path)?),
                    None => return Ok(0),
                }
            }
            if let Some(file) = self.current.as_mut() {
                let n = file.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
            }
            // Part exhausted
            self.current = None;
        }
    }
}

/// Writes a stream into `<prefix><n><suffix>` files of at most `split_size` bytes
pub struct SplitWriter {
    prefix: String,
    suffix: String,
    split_size: u64,
    written: u64,
    current: Option<File>,
    parts: Vec<PathBuf>,
}

impl SplitWriter {
    /// A `split_size` of zero disables splitting
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>, split_size: u64) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            split_size: if split_size == 0 { u64::MAX } else { split_size },
            written: 0,
            current: None,
            parts: Vec::new(),
        }
    }

    /// Flush and return the part files written, in order
    pub fn finish(mut self) -> io::Result<Vec<PathBuf>> {
        if self.parts.is_empty() {
            // An empty stream still produces one (empty) part
            self.rotate()?;
        }
        if let Some(file) = self.current.as_mut() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(self.parts)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.current.take() {
            file.flush()?;
        }
        let path = PathBuf::from(format!("{}{}{}", self.prefix, self.parts.len(), self.suffix));
        self.current = Some(File::create(&path)?);
        self.parts.push(path);
        self.written = 0;
        Ok(())
    }
}

impl Write for SplitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.current.is_none() || self.written >= self.split_size {
            self.rotate()?;
        }
        let room = (self.split_size - self.written).min(buf.len() as u64) as usize;
        let file = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no open part"))?;
        let n = file.write(&buf[..room])?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
