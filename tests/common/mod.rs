//! Synthetic index.dat images for the integration tests.

#![allow(dead_code)]

use exhume_indexdat::format::{
    ALLOCATION_BITMAP_OFFSET, BLOCK_SIZE, HASH_SIGNATURE, SIGNATURE_PREFIX,
    UNALLOCATED_MEMORY_SIGNATURE, URL_SIGNATURE,
};
use std::io::Cursor;

pub const HASH_TABLE: u32 = 0x5000;

/// Unused slot as written by WinINet.
pub const EMPTY_SLOT: (u32, u32) = (0x03, UNALLOCATED_MEMORY_SIGNATURE);

pub struct ImageBuilder {
    data: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(len: usize) -> Self {
        let mut builder = Self {
            data: vec![0u8; len],
        };
        builder.data[..SIGNATURE_PREFIX.len()].copy_from_slice(SIGNATURE_PREFIX);
        builder.data[SIGNATURE_PREFIX.len()..SIGNATURE_PREFIX.len() + 3].copy_from_slice(b"5.2");
        builder.put_u32(0x1C, len as u32);
        builder.put_u32(0x20, HASH_TABLE);
        builder
    }

    pub fn put_u32(&mut self, at: u32, value: u32) -> &mut Self {
        let at = at as usize;
        self.data[at..at + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn hash_table_offset(&mut self, offset: u32) -> &mut Self {
        self.put_u32(0x20, offset)
    }

    pub fn cache_directory(&mut self, index: u32, name: &[u8; 8]) -> &mut Self {
        self.put_u32(0x50, index + 1);
        let at = (0x54 + index * 12) as usize;
        self.data[at + 4..at + 12].copy_from_slice(name);
        self
    }

    /// HASH block of `units` * 0x80 bytes; slots beyond `slots` are unused.
    pub fn hash_block(&mut self, at: u32, units: u32, next: u32, slots: &[(u32, u32)]) -> &mut Self {
        let start = at as usize;
        self.data[start..start + 4].copy_from_slice(&HASH_SIGNATURE);
        self.put_u32(at + 4, units);
        self.put_u32(at + 8, next);
        let count = (units as u64 * BLOCK_SIZE).saturating_sub(16) / 8;
        for i in 0..count as u32 {
            let (flags, offset) = slots.get(i as usize).copied().unwrap_or(EMPTY_SLOT);
            self.put_u32(at + 16 + i * 8, flags);
            self.put_u32(at + 20 + i * 8, offset);
        }
        self
    }

    pub fn allocate(&mut self, record_offset: u32) -> &mut Self {
        let bit = (record_offset - HASH_TABLE) as u64 / BLOCK_SIZE;
        let at = (ALLOCATION_BITMAP_OFFSET + (bit / 32) * 4) as usize;
        let word = u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()) | (1 << (bit % 32));
        self.data[at..at + 4].copy_from_slice(&word.to_le_bytes());
        self
    }

    /// One-block URL record with a location and an optional cached file.
    pub fn url_record(&mut self, at: u32, location: &str, filename: Option<&str>) -> &mut Self {
        let start = at as usize;
        self.data[start..start + 4].copy_from_slice(&URL_SIGNATURE);
        self.put_u32(at + 4, 2);
        self.put_u32(at + 0x34, 0x60);
        self.data[start + 0x38] = 0;
        self.data[start + 0x60..start + 0x60 + location.len()].copy_from_slice(location.as_bytes());
        if let Some(name) = filename {
            self.put_u32(at + 0x3C, 0xE0);
            self.data[start + 0xE0..start + 0xE0 + name.len()].copy_from_slice(name.as_bytes());
        } else {
            self.data[start + 0x38] = 0xFF;
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn cursor(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.build())
    }
}
