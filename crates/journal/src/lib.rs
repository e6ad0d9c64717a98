//! # Journal: crash-safe append-only log
//!
//! An append-only log file whose entries are chained together by a running
//! SHA-256 signature. Every mutation of the storage engine is appended here
//! **before** the corresponding in-memory update, so that no acknowledged
//! write can be lost to a crash.
//!
//! ## Binary layout
//!
//! ```text
//! [uuid: 16][start_entry_number: u64]                      file header, 24 bytes
//! [content_size: u64][content ...][signature: 32]          entry, repeated
//! ```
//!
//! All integers are big-endian. The signature of the k-th entry is the
//! SHA-256 of the header bytes followed by the `(size, content)` pairs of
//! entries `0..=k`. The signature bytes themselves are never fed back into
//! the chain, which is what makes recovery work: a torn append leaves the
//! running hash untouched, and the next open truncates the torn record away.
//!
//! ## Durability protocol
//!
//! An append computes the provisional hash on a clone, writes
//! `[size][content][signature]` at the tracked file size, and fsyncs. Only
//! then does the journal commit the clone and advance its bookkeeping. If the
//! write or the fsync fails, a full checksum-recovery pass truncates the file
//! back to its last valid entry; if that recovery itself fails the journal
//! turns bad and refuses further appends.
//!
//! The header is written once at creation and never modified again. Unlike
//! a size-tracking header there is nothing to re-sync per append, so a
//! single fsync commits an entry.

mod cursor;
mod entry;
mod header;

pub use cursor::Cursor;
pub use entry::JournalEntry;
pub use header::JournalHeader;

use fileview::FileView;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An entry's stored signature does not match the running hash.
    #[error("signature does not match")]
    SignatureMismatch,

    /// An entry's content size points past the end of the file.
    #[error("content size is invalid")]
    InvalidContentSize,

    /// Recovery truncated the file and a second pass still found corruption.
    #[error("invalid checksum after correction")]
    CorruptionPersists,

    /// A previous append failed and could not be rolled back.
    #[error("journal is in invalid state")]
    InvalidState,
}

/// An open journal file.
///
/// Tracks its own committed size rather than trusting the physical file
/// length; bytes past the tracked size are invisible and get truncated on
/// the next recovery pass.
#[derive(Debug)]
pub struct Journal {
    pub(crate) path: PathBuf,
    pub(crate) header: JournalHeader,
    pub(crate) file: File,

    /// Committed size: header plus every durable entry.
    pub(crate) size: u64,
    /// Running hash over the header and all committed `(size, content)` pairs.
    pub(crate) hash: Sha256,
    pub(crate) num_entries: u64,
    /// Set when a failed append could not be rolled back. Absorbing: only
    /// dropping the journal is legal afterwards.
    pub(crate) is_bad: bool,
}

impl Journal {
    /// Creates a new journal file at `path` (mode 0644, exclusive; the file
    /// must not exist) with a fresh v4 UUID and the given starting entry
    /// number, then runs checksum recovery, which for a fresh file is a
    /// no-op that seeds the running hash from the header.
    pub fn create(path: impl AsRef<Path>, start_entry_number: u64) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&path)?;

        let mut journal = Self {
            path,
            header: JournalHeader::new(start_entry_number),
            file,
            size: 0,
            hash: Sha256::new(),
            num_entries: 0,
            is_bad: false,
        };

        if let Err(err) = journal.init_created() {
            let _ = fs::remove_file(&journal.path);
            return Err(err);
        }
        Ok(journal)
    }

    fn init_created(&mut self) -> Result<(), JournalError> {
        let mut view = FileView::at(&self.file, 0);
        view.write_all(&self.header.encode())?;
        self.recover()
    }

    /// Opens an existing journal read-write and runs checksum recovery,
    /// truncating any torn or tampered tail.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut journal = Self {
            path,
            header: JournalHeader::placeholder(),
            file,
            size: 0,
            hash: Sha256::new(),
            num_entries: 0,
            is_bad: false,
        };

        journal.recover()?;
        Ok(journal)
    }

    /// Appends `content` as a new signed entry and fsyncs it.
    ///
    /// On an I/O failure the journal re-runs checksum recovery so that the
    /// half-written record disappears; if that recovery fails too, the
    /// journal turns bad. The original error is returned either way.
    pub fn append_entry(&mut self, content: &[u8]) -> Result<JournalEntry, JournalError> {
        if self.is_bad {
            return Err(JournalError::InvalidState);
        }

        let content_size = content.len() as u64;
        let mut next_hash = self.hash.clone();
        next_hash.update(content_size.to_be_bytes());
        next_hash.update(content);
        let signature: [u8; 32] = next_hash.clone().finalize().into();

        if let Err(err) = self.write_record(content, &signature) {
            log::warn!(
                "journal {}: append failed ({err}); rolling back",
                self.path.display()
            );
            if let Err(recovery_err) = self.recover() {
                log::error!(
                    "journal {}: rollback failed ({recovery_err}); marking journal bad",
                    self.path.display()
                );
            }
            return Err(err);
        }

        let entry = JournalEntry {
            entry_number: self.header.start_entry_number + self.num_entries,
            offset: self.size,
            content: content.to_vec(),
            signature,
        };

        self.hash = next_hash;
        self.num_entries += 1;
        self.size += entry.size_of();

        Ok(entry)
    }

    fn write_record(&mut self, content: &[u8], signature: &[u8; 32]) -> Result<(), JournalError> {
        let mut view = FileView::at(&self.file, self.size);
        view.write_all(&(content.len() as u64).to_be_bytes())?;
        view.write_all(content)?;
        view.write_all(signature)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Renames the underlying file. The open descriptor is unaffected.
    pub fn rename(&mut self, new_path: impl AsRef<Path>) -> Result<(), JournalError> {
        let new_path = new_path.as_ref().to_path_buf();
        fs::rename(&self.path, &new_path)?;
        self.path = new_path;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed size in bytes, header included.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    pub fn header(&self) -> &JournalHeader {
        &self.header
    }

    /// Checksum recovery: rebuild the running hash from the file and truncate
    /// everything past the last valid entry. Runs at most two scan passes:
    /// the first truncates, the second must come back clean.
    fn recover(&mut self) -> Result<(), JournalError> {
        let result = self.recover_inner();
        self.is_bad = result.is_err();
        result
    }

    fn recover_inner(&mut self) -> Result<(), JournalError> {
        if self.recover_once()? {
            return Ok(());
        }
        if self.recover_once()? {
            Ok(())
        } else {
            Err(JournalError::CorruptionPersists)
        }
    }

    /// One recovery pass. Returns whether the whole file verified without
    /// truncation being necessary.
    fn recover_once(&mut self) -> Result<bool, JournalError> {
        let mut header_view = FileView::at(&self.file, 0);
        self.header = JournalHeader::read_from(&mut header_view)?;

        let file_len = self.file.metadata()?.len();

        let mut hash = Sha256::new();
        hash.update(self.header.encode());

        let mut offset = JournalHeader::SIZE;
        let mut num_entries = 0u64;
        let mut reader = BufReader::new(FileView::at(&self.file, offset));
        let mut intact = false;

        loop {
            if offset == file_len {
                intact = true;
                break;
            }
            let (content, signature) = match entry::read_frame(&mut reader, offset, file_len) {
                Ok(frame) => frame,
                Err(err) if is_corruption(&err) => break,
                Err(err) => return Err(err),
            };

            let mut entry_hash = hash.clone();
            entry_hash.update((content.len() as u64).to_be_bytes());
            entry_hash.update(&content);
            if entry_hash.clone().finalize().as_slice() != signature.as_slice() {
                break;
            }

            hash = entry_hash;
            offset += 8 + content.len() as u64 + 32;
            num_entries += 1;
        }

        if !intact {
            log::warn!(
                "journal {}: invalid tail, truncating to {offset} bytes",
                self.path.display()
            );
        }

        self.file.set_len(offset)?;
        self.file.sync_all()?;
        self.size = offset;
        self.hash = hash;
        self.num_entries = num_entries;

        Ok(intact)
    }
}

/// Errors recovery treats as a corrupt tail (truncate and move on) rather
/// than as failures of the recovery pass itself.
fn is_corruption(err: &JournalError) -> bool {
    match err {
        JournalError::SignatureMismatch | JournalError::InvalidContentSize => true,
        JournalError::Io(err) => err.kind() == io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}
