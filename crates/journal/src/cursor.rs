use fileview::FileView;
use sha2::{Digest, Sha256};
use std::io::BufReader;

use crate::{entry, Journal, JournalEntry, JournalError, JournalHeader};

/// Forward-only cursor over a journal's entries.
///
/// Reads through its own positional [`FileView`], so any number of cursors
/// can run concurrently with each other and with the journal's writer
/// without disturbing the file descriptor's offset.
pub struct Cursor<'a> {
    journal: &'a Journal,
    entry_number: u64,
    offset: u64,
    reader: BufReader<FileView<'a>>,
    /// Present when verifying: the running hash rebuilt entry by entry.
    hash: Option<Sha256>,
    current: Option<JournalEntry>,
}

impl Journal {
    /// A cursor positioned before the first entry. With `verify` set, every
    /// entry's stored signature is checked against a recomputed running hash
    /// and a mismatch surfaces as [`JournalError::SignatureMismatch`].
    pub fn cursor(&self, verify: bool) -> Cursor<'_> {
        let offset = JournalHeader::SIZE;
        let hash = verify.then(|| {
            let mut hash = Sha256::new();
            hash.update(self.header.encode());
            hash
        });

        Cursor {
            journal: self,
            entry_number: self.header.start_entry_number,
            offset,
            reader: BufReader::new(FileView::at(&self.file, offset)),
            hash,
            current: None,
        }
    }
}

impl Cursor<'_> {
    /// Returns the next entry, or `None` once the cursor has reached the
    /// journal's committed size.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, JournalError> {
        if self.offset == self.journal.size {
            return Ok(None);
        }

        let (content, signature) =
            entry::read_frame(&mut self.reader, self.offset, self.journal.size)?;

        if let Some(hash) = &mut self.hash {
            hash.update((content.len() as u64).to_be_bytes());
            hash.update(&content);
            if hash.clone().finalize().as_slice() != signature.as_slice() {
                return Err(JournalError::SignatureMismatch);
            }
        }

        let entry = JournalEntry {
            entry_number: self.entry_number,
            offset: self.offset,
            content,
            signature,
        };

        self.entry_number += 1;
        self.offset = entry.end_offset();
        self.current = Some(entry.clone());

        Ok(Some(entry))
    }

    /// The most recently returned entry, if any.
    pub fn entry(&self) -> Option<&JournalEntry> {
        self.current.as_ref()
    }
}
