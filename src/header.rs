// Sources:
// - https://github.com/libyal/libmsiecf/blob/main/documentation/MSIE%20Cache%20File%20(index.dat)%20format.asciidoc

//! Parse the index.dat file header with std::io::Cursor

use byteorder::{LittleEndian, ReadBytesExt};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, Cursor, Read};

use crate::format::{ALLOCATION_BITMAP_OFFSET, SIGNATURE_PREFIX, SIGNATURE_SIZE};

pub const HEADER_SIZE: usize = ALLOCATION_BITMAP_OFFSET as usize;
pub const MAX_CACHE_DIRECTORIES: u32 = 32;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheDirectory {
    pub file_count: u32,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileHeader {
    pub signature: Vec<u8>,                // 0x00 "Client UrlCache MMF Ver 5.2\0"
    pub file_size: u32,                    // 0x1C
    pub hash_table_offset: u32,            // 0x20
    pub number_of_blocks: u32,             // 0x24
    pub allocated_blocks: u32,             // 0x28
    pub unknown1: u32,                     // 0x2C
    pub cache_size_limit: u64,             // 0x30
    pub unknown2: u64,                     // 0x38
    pub cache_size: u64,                   // 0x40
    pub non_releasable_cache_size: u64,    // 0x48
    pub cache_directories: Vec<CacheDirectory>, // 0x50 count, 0x54 entries
}

impl FileHeader {
    /// Parse the first 0x250 bytes of the file.
    pub fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "index.dat header must be at least 0x250 bytes",
            ));
        }
        let mut c = Cursor::new(buf);

        let mut signature = vec![0u8; SIGNATURE_SIZE];
        c.read_exact(&mut signature)?;

        macro_rules! read_u32 {
            () => {
                c.read_u32::<LittleEndian>()?
            };
        }
        macro_rules! read_u64 {
            () => {
                c.read_u64::<LittleEndian>()?
            };
        }

        let file_size = read_u32!();
        let hash_table_offset = read_u32!();
        let number_of_blocks = read_u32!();
        let allocated_blocks = read_u32!();
        let unknown1 = read_u32!();
        let cache_size_limit = read_u64!();
        let unknown2 = read_u64!();
        let cache_size = read_u64!();
        let non_releasable_cache_size = read_u64!();

        let directory_count = read_u32!().min(MAX_CACHE_DIRECTORIES);
        let mut cache_directories = Vec::with_capacity(directory_count as usize);
        for _ in 0..directory_count {
            let file_count = read_u32!();
            let mut name = [0u8; 8];
            c.read_exact(&mut name)?;
            cache_directories.push(CacheDirectory {
                file_count,
                name: String::from_utf8_lossy(&name)
                    .trim_end_matches('\0')
                    .to_string(),
            });
        }

        Ok(Self {
            signature,
            file_size,
            hash_table_offset,
            number_of_blocks,
            allocated_blocks,
            unknown1,
            cache_size_limit,
            unknown2,
            cache_size,
            non_releasable_cache_size,
            cache_directories,
        })
    }

    pub fn signature_is_valid(&self) -> bool {
        self.signature.starts_with(SIGNATURE_PREFIX)
    }

    /// Format version written after the signature prefix, e.g. "5.2".
    pub fn version(&self) -> String {
        let tail = self.signature.get(SIGNATURE_PREFIX.len()..).unwrap_or_default();
        let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).to_string()
    }

    pub fn major_version(&self) -> Option<u32> {
        self.version().split('.').next()?.trim().parse().ok()
    }

    pub fn has_hash_table(&self) -> bool {
        self.hash_table_offset != 0
    }

    /// Name of the cache directory at `index`, if the header lists one.
    pub fn directory_name(&self, index: u8) -> Option<&str> {
        self.cache_directories
            .get(index as usize)
            .map(|d| d.name.as_str())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "version": self.version(),
            "file_size": self.file_size,
            "hash_table_offset": self.hash_table_offset,
            "number_of_blocks": self.number_of_blocks,
            "allocated_blocks": self.allocated_blocks,
            "cache_size_limit": self.cache_size_limit,
            "cache_size": self.cache_size,
            "non_releasable_cache_size": self.non_releasable_cache_size,
            "cache_directories": self.cache_directories,
        })
    }

    pub fn to_string(&self) -> String {
        let mut t = Table::new();
        t.add_row(row![b -> "Version", self.version()]);
        t.add_row(row![b -> "File Size", self.file_size]);
        t.add_row(row![b -> "Hash Table Offset", format!("0x{:X}", self.hash_table_offset)]);
        t.add_row(row![b -> "Blocks", self.number_of_blocks]);
        t.add_row(row![b -> "Allocated Blocks", self.allocated_blocks]);
        t.add_row(row![b -> "Cache Size Limit", self.cache_size_limit]);
        t.add_row(row![b -> "Cache Size", self.cache_size]);
        if !self.cache_directories.is_empty() {
            let dirs = self
                .cache_directories
                .iter()
                .map(|d| format!("{} ({} files)", d.name, d.file_count))
                .collect::<Vec<_>>()
                .join("\n");
            t.add_row(row![b -> "Cache Directories", dirs]);
        }
        t.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(version: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[..SIGNATURE_PREFIX.len()].copy_from_slice(SIGNATURE_PREFIX);
        buf[SIGNATURE_PREFIX.len()..SIGNATURE_PREFIX.len() + version.len()].copy_from_slice(version);
        buf[0x1C..0x20].copy_from_slice(&0x8000u32.to_le_bytes());
        buf[0x20..0x24].copy_from_slice(&0x5000u32.to_le_bytes());
        buf[0x50..0x54].copy_from_slice(&2u32.to_le_bytes());
        buf[0x54..0x58].copy_from_slice(&7u32.to_le_bytes());
        buf[0x58..0x60].copy_from_slice(b"ABCD1234");
        buf[0x60..0x64].copy_from_slice(&1u32.to_le_bytes());
        buf[0x64..0x6C].copy_from_slice(b"EFGH5678");
        buf
    }

    #[test]
    fn parses_standard_header() {
        let header = FileHeader::from_bytes(&header_bytes(b"5.2")).unwrap();
        assert!(header.signature_is_valid());
        assert_eq!(header.version(), "5.2");
        assert_eq!(header.major_version(), Some(5));
        assert_eq!(header.file_size, 0x8000);
        assert_eq!(header.hash_table_offset, 0x5000);
        assert!(header.has_hash_table());
        assert_eq!(header.directory_name(0), Some("ABCD1234"));
        assert_eq!(header.directory_name(1), Some("EFGH5678"));
        assert_eq!(header.directory_name(2), None);
        assert_eq!(header.cache_directories[0].file_count, 7);
    }

    #[test]
    fn rejects_foreign_signature() {
        let mut buf = header_bytes(b"5.2");
        buf[0] = b'X';
        assert!(!FileHeader::from_bytes(&buf).unwrap().signature_is_valid());
    }

    #[test]
    fn short_buffer_is_an_error() {
        let err = FileHeader::from_bytes(&[0u8; 0x40]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn directory_count_is_capped() {
        let mut buf = header_bytes(b"4.7");
        buf[0x50..0x54].copy_from_slice(&0xFFFFu32.to_le_bytes());
        let header = FileHeader::from_bytes(&buf).unwrap();
        assert_eq!(header.cache_directories.len(), MAX_CACHE_DIRECTORIES as usize);
        assert_eq!(header.major_version(), Some(4));
    }
}
