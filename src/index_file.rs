//! Random access over the raw index.dat bytes.
//!
//! Every reader in this crate borrows the file mutably for the duration of
//! a call. The seek position is shared state, so one file must only be
//! scanned by one iterator at a time.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read, Seek, SeekFrom};

pub trait IndexFile {
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;

    fn read_u32_le(&mut self) -> io::Result<u32>;

    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>>;

    fn read_u32_at(&mut self, offset: u64) -> io::Result<u32> {
        self.seek_to(offset)?;
        self.read_u32_le()
    }

    fn read_bytes_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self.seek_to(offset)?;
        self.read_bytes(len)
    }
}

impl<T: Read + Seek + ?Sized> IndexFile for T {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn read_u32_le(&mut self) -> io::Result<u32> {
        self.read_u32::<LittleEndian>()
    }

    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}
