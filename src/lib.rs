// Sources:
// - https://github.com/libyal/libmsiecf/blob/main/documentation/MSIE%20Cache%20File%20(index.dat)%20format.asciidoc
// - https://en.wikipedia.org/wiki/Index.dat

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::io::{Read, Seek};

use log::{debug, error, info, warn};

pub mod allocator;
pub mod cache_record;
pub mod format;
pub mod hash;
pub mod header;
pub mod index_file;
pub mod records;

use allocator::Allocator;
use cache_record::CacheRecord;
use format::Layout;
use hash::HashBlockIterator;
use header::{FileHeader, HEADER_SIZE};
use index_file::IndexFile;
use records::{UnclassifiedRecords, ValidRecords};

/// Oldest format version with a hash table and allocation bitmap.
const MIN_MAJOR_VERSION: u32 = 4;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexDat<T: Read + Seek> {
    pub header: FileHeader,
    pub layout: Layout,
    pub body: T,
}

impl<T: Read + Seek> IndexDat<T> {
    /// Create a new IndexDat Object
    pub fn new(body: T) -> Result<Self, String> {
        Self::with_layout(body, Layout::default())
    }

    pub fn with_layout(mut body: T, layout: Layout) -> Result<Self, String> {
        let raw = body
            .read_bytes_at(0, HEADER_SIZE)
            .map_err(|e| e.to_string())?;
        let header = FileHeader::from_bytes(&raw).map_err(|e| e.to_string())?;

        if !header.signature_is_valid() {
            error!("The index.dat signature is not valid.");
            return Err("The index.dat signature is not valid.".into());
        }
        match header.major_version() {
            Some(major) if major >= MIN_MAJOR_VERSION => {
                if header.version() != "5.2" {
                    warn!("Untested index.dat version {}, parsing anyway.", header.version());
                }
            }
            _ => {
                error!("Unsupported index.dat version '{}'.", header.version());
                return Err(format!("Unsupported index.dat version '{}'.", header.version()));
            }
        }

        let stored = body
            .read_u32_at(layout.hash_table_offset_location)
            .map_err(|e| e.to_string())?;
        if stored != header.hash_table_offset {
            warn!(
                "Hash table offset at 0x{:X} (0x{:X}) differs from the standard header field (0x{:X}).",
                layout.hash_table_offset_location, stored, header.hash_table_offset
            );
        }
        info!(
            "index.dat version {}, hash table at 0x{:X}",
            header.version(),
            stored
        );

        let mut index = Self {
            header,
            layout,
            body,
        };
        index.header.hash_table_offset = stored;
        Ok(index)
    }

    pub fn hash_table_offset(&self) -> u64 {
        self.header.hash_table_offset as u64
    }

    pub fn allocator(&self) -> Allocator {
        Allocator::with_layout(self.hash_table_offset(), &self.layout)
    }

    /// Start a scan over the live record offsets.
    /// The scan holds the body exclusively until it is dropped.
    pub fn valid_records(&mut self) -> ValidRecords<'_, T> {
        let allocator = self.allocator();
        let hash_table_offset = self.hash_table_offset();
        let blocks = self.header.has_hash_table().then(|| {
            HashBlockIterator::with_block_size(hash_table_offset, self.layout.block_size)
        });
        if blocks.is_none() {
            debug!("No hash table, nothing to scan.");
        }
        let unclassified = UnclassifiedRecords::new(blocks, allocator);
        ValidRecords::new(&mut self.body, hash_table_offset, unclassified)
    }

    pub fn valid_offsets(&mut self) -> Result<Vec<u32>, Box<dyn Error>> {
        let mut scan = self.valid_records();
        let mut offsets = Vec::new();
        for record in scan.by_ref() {
            offsets.push(record?.record_offset);
        }
        debug!("{} live records in the hash table.", scan.yielded());
        Ok(offsets)
    }

    pub fn read_record(&mut self, offset: u64) -> Result<CacheRecord, Box<dyn Error>> {
        let record = CacheRecord::read(&mut self.body, offset)?;
        debug!("{} record read from 0x{:X}", record.kind.as_str(), offset);
        Ok(record)
    }

    /// Scan the hash table and decode every live record.
    pub fn records(&mut self) -> Result<Vec<CacheRecord>, Box<dyn Error>> {
        let offsets = self.valid_offsets()?;
        let mut out = Vec::with_capacity(offsets.len());
        for offset in offsets {
            out.push(self.read_record(offset as u64)?);
        }
        Ok(out)
    }
}
