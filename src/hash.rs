// Sources:
// - https://github.com/libyal/libmsiecf/blob/main/documentation/MSIE%20Cache%20File%20(index.dat)%20format.asciidoc

//! Hash table walk: the chain of HASH blocks and the slots inside them.
//!
//! HASH block layout (little-endian):
//!   0x00  magic "HASH"
//!   0x04  size in 0x80-byte blocks
//!   0x08  offset of the next HASH block (0 = end of chain)
//!   0x0C  sequence number
//!   0x10  slots, 8 bytes each: flags (u32), record offset (u32)

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;

use crate::allocator::Allocator;
use crate::format::{
    BLOCK_SIZE, HASH_BLOCK_HEADER_SIZE, HASH_RECORD_SIZE, HASH_SIGNATURE,
    UNALLOCATED_MEMORY_SIGNATURE, UNUSED_SLOT_FLAGS,
};
use crate::index_file::IndexFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct HashBlock {
    pub offset: u64,
    pub block_size: u64,
}

impl HashBlock {
    pub fn new(offset: u64) -> Self {
        Self {
            offset,
            block_size: BLOCK_SIZE,
        }
    }

    pub fn signature<F: IndexFile + ?Sized>(&self, file: &mut F) -> io::Result<[u8; 4]> {
        let raw = file.read_bytes_at(self.offset, 4)?;
        Ok([raw[0], raw[1], raw[2], raw[3]])
    }

    /// Size of the block in bytes. Read from the file on every call.
    pub fn size<F: IndexFile + ?Sized>(&self, file: &mut F) -> io::Result<u64> {
        let units = file.read_u32_at(self.offset + 4)?;
        Ok(units as u64 * self.block_size)
    }

    pub fn next_block_offset<F: IndexFile + ?Sized>(&self, file: &mut F) -> io::Result<u64> {
        Ok(file.read_u32_at(self.offset + 8)? as u64)
    }

    /// Iterator over the slots in `[offset + 16, offset + size)`.
    pub fn records<F: IndexFile + ?Sized>(
        &self,
        file: &mut F,
        allocator: Allocator,
    ) -> io::Result<HashRecordIterator> {
        let end = self.offset + self.size(file)?;
        Ok(HashRecordIterator {
            cursor: self.offset + HASH_BLOCK_HEADER_SIZE,
            end,
            allocator,
        })
    }
}

/// Follows the next-block pointers starting at the hash table offset.
#[derive(Debug, Clone)]
pub struct HashBlockIterator {
    next: Option<u64>,
    block_size: u64,
    visited: HashSet<u64>,
}

impl HashBlockIterator {
    pub fn new(first_block_offset: u64) -> Self {
        Self::with_block_size(first_block_offset, BLOCK_SIZE)
    }

    pub fn with_block_size(first_block_offset: u64, block_size: u64) -> Self {
        Self {
            next: (first_block_offset != 0).then_some(first_block_offset),
            block_size,
            visited: HashSet::new(),
        }
    }

    pub fn next_block<F: IndexFile + ?Sized>(
        &mut self,
        file: &mut F,
    ) -> io::Result<Option<HashBlock>> {
        let Some(offset) = self.next.take() else {
            return Ok(None);
        };
        let block = HashBlock {
            offset,
            block_size: self.block_size,
        };

        let signature = block.signature(file)?;
        if signature != HASH_SIGNATURE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "expected HASH block at 0x{:X}, found {:?}",
                    offset,
                    String::from_utf8_lossy(&signature)
                ),
            ));
        }
        self.visited.insert(offset);

        let next = block.next_block_offset(file)?;
        if next != 0 {
            if self.visited.contains(&next) {
                warn!(
                    "HASH block at 0x{:X} links back to 0x{:X}, stopping the chain.",
                    offset, next
                );
            } else {
                self.next = Some(next);
            }
        }
        debug!("HASH block at 0x{:X}, next 0x{:X}", offset, next);
        Ok(Some(block))
    }
}

/// One hash slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HashRecord {
    pub flags: u32,
    pub record_offset: u32,
    #[serde(skip_serializing)]
    pub allocator: Allocator,
}

impl HashRecord {
    pub fn is_valid(&self) -> bool {
        (self.flags & 0xFF) != UNUSED_SLOT_FLAGS && self.record_offset != 0
    }

    pub fn contains_unallocated_memory_signature(&self) -> bool {
        self.record_offset == UNALLOCATED_MEMORY_SIGNATURE
    }

    pub fn is_allocated<F: IndexFile + ?Sized>(&self, file: &mut F) -> io::Result<bool> {
        self.allocator
            .is_record_allocated(file, self.record_offset as u64)
    }
}

/// Cursor over the 8-byte slots of one HASH block.
#[derive(Debug, Clone)]
pub struct HashRecordIterator {
    cursor: u64,
    end: u64,
    allocator: Allocator,
}

impl HashRecordIterator {
    pub fn has_next(&self) -> bool {
        self.cursor < self.end
    }

    pub fn next_record<F: IndexFile + ?Sized>(
        &mut self,
        file: &mut F,
    ) -> io::Result<Option<HashRecord>> {
        if !self.has_next() {
            return Ok(None);
        }
        file.seek_to(self.cursor)?;
        let flags = file.read_u32_le()?;
        let record_offset = file.read_u32_le()?;
        self.cursor += HASH_RECORD_SIZE;
        Ok(Some(HashRecord {
            flags,
            record_offset,
            allocator: self.allocator,
        }))
    }
}
