//! Allocation bitmap lookups.
//!
//! The bitmap at `0x250` holds one bit per 0x80-byte block counted from the
//! start of the hash table. Bits are packed into little-endian 32-bit words,
//! bit 0 being the least significant bit of the first word.

use log::trace;
use serde::{Deserialize, Serialize};
use std::io;

use crate::format::{ALLOCATION_BITMAP_OFFSET, BLOCK_SIZE, Layout};
use crate::index_file::IndexFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Allocator {
    pub bitmap_offset: u64,
    pub hash_table_offset: u64,
    pub block_size: u64,
}

impl Allocator {
    pub fn new(hash_table_offset: u64) -> Self {
        Self {
            bitmap_offset: ALLOCATION_BITMAP_OFFSET,
            hash_table_offset,
            block_size: BLOCK_SIZE,
        }
    }

    pub fn with_layout(hash_table_offset: u64, layout: &Layout) -> Self {
        Self {
            bitmap_offset: layout.allocation_bitmap_offset,
            hash_table_offset,
            block_size: layout.block_size,
        }
    }

    /// Position of the bit describing `record_offset`: (dword index, bit).
    /// `None` when the offset lies before the hash table.
    pub fn bit_position(&self, record_offset: u64) -> Option<(u64, u32)> {
        let relative = record_offset.checked_sub(self.hash_table_offset)?;
        let bit_index = relative / self.block_size;
        Some((bit_index / 32, (bit_index % 32) as u32))
    }

    pub fn is_record_allocated<F: IndexFile + ?Sized>(
        &self,
        file: &mut F,
        record_offset: u64,
    ) -> io::Result<bool> {
        let Some((dword_index, bit)) = self.bit_position(record_offset) else {
            return Ok(false);
        };
        let word = file.read_u32_at(self.bitmap_offset + dword_index * 4)?;
        let allocated = word & (1u32 << bit) != 0;
        trace!(
            "Record 0x{:X}: bitmap dword {} bit {} -> {}",
            record_offset, dword_index, bit, allocated
        );
        Ok(allocated)
    }
}
