//! # FileView: positional file IO
//!
//! A lightweight `(file, offset)` handle that translates `Read`/`Write` into
//! `pread`/`pwrite` (`read_at`/`write_at`). Because positional IO never
//! touches the descriptor's kernel offset, any number of views (cursors,
//! recovery scans, appenders) can coexist over a single open file without
//! disturbing each other.
//!
//! `Seek` is deliberately restricted to [`SeekFrom::Start`] and
//! [`SeekFrom::Current`]; seeking from the end is a usage error because the
//! storage formats built on top of this track their own committed size and
//! must never trust the physical file length.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;

/// A positional view over a borrowed [`File`].
///
/// Reads and writes advance the view's own offset only. Cloning the view (or
/// creating another one at a different offset) yields fully independent
/// cursors over the same descriptor.
#[derive(Debug, Clone)]
pub struct FileView<'a> {
    file: &'a File,
    offset: u64,
}

impl<'a> FileView<'a> {
    /// A view positioned at the start of the file.
    pub fn new(file: &'a File) -> Self {
        Self { file, offset: 0 }
    }

    /// A view positioned at `offset`.
    pub fn at(file: &'a File, offset: u64) -> Self {
        Self { file, offset }
    }

    /// The view's current offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Read for FileView<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read_at(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl Write for FileView<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write_at(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Positional writes are unbuffered; durability is the caller's call
        // (`File::sync_all`).
        Ok(())
    }
}

impl Seek for FileView<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(offset) => self.offset = offset,
            SeekFrom::Current(delta) => {
                self.offset = self.offset.checked_add_signed(delta).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
                })?;
            }
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "seeking from the end is unsupported",
                ));
            }
        }
        Ok(self.offset)
    }
}
