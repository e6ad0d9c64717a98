use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

use crate::JournalError;

/// A fully parsed journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Absolute entry number: the header's start number plus the entry's
    /// position in this file.
    pub entry_number: u64,
    /// Byte offset of the entry within the file.
    pub offset: u64,
    pub content: Vec<u8>,
    /// SHA-256 over the header and every `(size, content)` pair up to and
    /// including this entry.
    pub signature: [u8; 32],
}

impl JournalEntry {
    pub fn content_size(&self) -> u64 {
        self.content.len() as u64
    }

    /// On-disk footprint: size word, content, signature.
    pub fn size_of(&self) -> u64 {
        8 + self.content.len() as u64 + 32
    }

    pub fn end_offset(&self) -> u64 {
        self.offset + self.size_of()
    }
}

/// Reads one `[content_size][content][signature]` frame for the entry that
/// starts at `offset`. `end` bounds the readable region; a content size that
/// would run past it is rejected before anything is allocated.
pub(crate) fn read_frame<R: Read>(
    reader: &mut R,
    offset: u64,
    end: u64,
) -> Result<(Vec<u8>, [u8; 32]), JournalError> {
    let content_size = reader.read_u64::<BigEndian>()?;

    match offset.checked_add(content_size) {
        Some(content_end) if content_end <= end => {}
        _ => return Err(JournalError::InvalidContentSize),
    }

    let mut content = vec![0u8; content_size as usize];
    reader.read_exact(&mut content)?;

    let mut signature = [0u8; 32];
    reader.read_exact(&mut signature)?;

    Ok((content, signature))
}
