// Sources:
// - https://github.com/libyal/libmsiecf/blob/main/documentation/MSIE%20Cache%20File%20(index.dat)%20format.asciidoc
// - pasco2 (isi.pasco2) index.dat parser

//! On-disk constants of the MSIE index.dat format (version 4 and later).

use serde::{Deserialize, Serialize};

/// Allocation unit. Hash block and record sizes are counted in it.
pub const BLOCK_SIZE: u64 = 0x80;

/// Absolute offset of the 4-byte hash table offset in the file header.
pub const HASH_TABLE_OFFSET_LOCATION: u64 = 0x20;

/// Absolute offset of the allocation bitmap (one bit per block).
pub const ALLOCATION_BITMAP_OFFSET: u64 = 0x250;

/// magic (4) + size (4) + next block (4) + sequence (4)
pub const HASH_BLOCK_HEADER_SIZE: u64 = 16;

/// flags (4) + record offset (4)
pub const HASH_RECORD_SIZE: u64 = 8;

/// Record offset written into slots that were never initialised.
pub const UNALLOCATED_MEMORY_SIGNATURE: u32 = 0x0BAD_F00D;

/// Low byte of the slot flags when the slot is unused.
pub const UNUSED_SLOT_FLAGS: u32 = 0x03;

pub const SIGNATURE_PREFIX: &[u8] = b"Client UrlCache MMF Ver ";
pub const SIGNATURE_SIZE: usize = 28;
pub const HASH_SIGNATURE: [u8; 4] = *b"HASH";

pub const URL_SIGNATURE: [u8; 4] = *b"URL ";
pub const REDIRECT_SIGNATURE: [u8; 4] = *b"REDR";
pub const LEAK_SIGNATURE: [u8; 4] = *b"LEAK";

/// Upper bound on a single record, in blocks.
pub const MAX_RECORD_BLOCKS: u32 = 0x4000;

/// The tunable offsets of an index.dat variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Layout {
    pub block_size: u64,
    pub hash_table_offset_location: u64,
    pub allocation_bitmap_offset: u64,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            hash_table_offset_location: HASH_TABLE_OFFSET_LOCATION,
            allocation_bitmap_offset: ALLOCATION_BITMAP_OFFSET,
        }
    }
}

impl Layout {
    pub fn with_bitmap_offset(mut self, offset: u64) -> Self {
        self.allocation_bitmap_offset = offset;
        self
    }
}
