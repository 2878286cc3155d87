//! Flattening of the HASH block chain into live record offsets.

use log::{debug, trace};
use std::collections::HashSet;
use std::io;

use crate::allocator::Allocator;
use crate::hash::{HashBlockIterator, HashRecord, HashRecordIterator};
use crate::index_file::IndexFile;

enum Traversal {
    NeedBlock,
    InBlock(HashRecordIterator),
    Done,
}

/// Every slot of every HASH block, in chain order, unfiltered.
pub struct UnclassifiedRecords {
    blocks: Option<HashBlockIterator>,
    allocator: Allocator,
    state: Traversal,
}

impl UnclassifiedRecords {
    /// `blocks` is `None` when the file has no hash table.
    pub fn new(blocks: Option<HashBlockIterator>, allocator: Allocator) -> Self {
        Self {
            blocks,
            allocator,
            state: Traversal::NeedBlock,
        }
    }

    pub fn next_record<F: IndexFile + ?Sized>(
        &mut self,
        file: &mut F,
    ) -> io::Result<Option<HashRecord>> {
        loop {
            match &mut self.state {
                Traversal::Done => return Ok(None),
                Traversal::InBlock(slots) => match slots.next_record(file)? {
                    Some(record) => return Ok(Some(record)),
                    None => self.state = Traversal::NeedBlock,
                },
                Traversal::NeedBlock => {
                    let block = match self.blocks.as_mut() {
                        Some(blocks) => blocks.next_block(file)?,
                        None => None,
                    };
                    self.state = match block {
                        Some(block) => Traversal::InBlock(block.records(file, self.allocator)?),
                        None => Traversal::Done,
                    };
                }
            }
        }
    }
}

/// Hash slots that point at live records, each offset at most once.
///
/// A candidate survives when its flags and offset are sane, it is not the
/// 0x0BADF00D filler, it points past the hash table, it has not been
/// yielded before, and its block is marked allocated in the bitmap.
/// Any I/O error aborts the scan.
pub struct ValidRecords<'a, F: IndexFile + ?Sized> {
    file: &'a mut F,
    hash_table_offset: u64,
    unclassified: UnclassifiedRecords,
    seen: HashSet<u32>,
    lookahead: Option<HashRecord>,
    failed: Option<io::ErrorKind>,
}

impl<'a, F: IndexFile + ?Sized> ValidRecords<'a, F> {
    pub fn new(file: &'a mut F, hash_table_offset: u64, unclassified: UnclassifiedRecords) -> Self {
        Self {
            file,
            hash_table_offset,
            unclassified,
            seen: HashSet::new(),
            lookahead: None,
            failed: None,
        }
    }

    /// Advance to the next live record and keep it as lookahead.
    /// Once a read has failed every further call fails too.
    pub fn has_next(&mut self) -> io::Result<bool> {
        if let Some(kind) = self.failed {
            return Err(io::Error::new(kind, "scan aborted by an earlier read error"));
        }
        if self.lookahead.is_some() {
            return Ok(true);
        }
        self.advance().inspect_err(|e| self.failed = Some(e.kind()))
    }

    fn advance(&mut self) -> io::Result<bool> {
        while let Some(record) = self.unclassified.next_record(&mut *self.file)? {
            let offset = record.record_offset;
            if !record.is_valid()
                || record.contains_unallocated_memory_signature()
                || offset as u64 <= self.hash_table_offset
                || self.seen.contains(&offset)
            {
                trace!("Skipping slot (flags 0x{:08X}, offset 0x{:X})", record.flags, offset);
                continue;
            }
            if !record.is_allocated(&mut *self.file)? {
                trace!("Skipping unallocated record at 0x{:X}", offset);
                continue;
            }
            self.seen.insert(offset);
            self.lookahead = Some(record);
            return Ok(true);
        }
        debug!("Hash table exhausted after {} records.", self.seen.len());
        Ok(false)
    }

    /// Number of distinct offsets found so far.
    pub fn yielded(&self) -> usize {
        self.seen.len()
    }
}

impl<F: IndexFile + ?Sized> Iterator for ValidRecords<'_, F> {
    type Item = io::Result<HashRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed.is_some() {
            return None;
        }
        match self.has_next() {
            Ok(true) => self.lookahead.take().map(Ok),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
