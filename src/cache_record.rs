// Sources:
// - https://github.com/libyal/libmsiecf/blob/main/documentation/MSIE%20Cache%20File%20(index.dat)%20format.asciidoc
// - pasco2 result files as consumed by Autopsy's RecentActivity module
//
// URL / LEAK / REDR record decoding (format version 5.2)

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, Cursor};

use crate::format::{
    BLOCK_SIZE, LEAK_SIGNATURE, MAX_RECORD_BLOCKS, REDIRECT_SIGNATURE, URL_SIGNATURE,
};
use crate::header::FileHeader;
use crate::index_file::IndexFile;

/// Cache directory index meaning "no cached file".
const NO_DIRECTORY: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum RecordKind {
    Url,
    Leak,
    Redirect,
    Unknown(String),
}

impl RecordKind {
    fn from_signature(sig: [u8; 4]) -> Self {
        match sig {
            URL_SIGNATURE => RecordKind::Url,
            LEAK_SIGNATURE => RecordKind::Leak,
            REDIRECT_SIGNATURE => RecordKind::Redirect,
            other => RecordKind::Unknown(String::from_utf8_lossy(&other).trim_end().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordKind::Url => "URL",
            RecordKind::Leak => "LEAK",
            RecordKind::Redirect => "REDR",
            RecordKind::Unknown(s) => s.as_str(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheRecord {
    pub offset: u64,
    pub kind: RecordKind,
    pub number_of_blocks: u32,
    pub last_modified: u64, // FILETIME
    pub last_accessed: u64, // FILETIME
    pub expires: u32,       // FAT date/time
    pub last_checked: u32,  // FAT date/time
    pub cached_file_size: u32,
    pub cache_directory_index: Option<u8>,
    pub cache_entry_flags: u32,
    pub hits: u32,
    pub location: Option<String>,
    pub filename: Option<String>,
    pub http_headers: Option<String>,
}

impl CacheRecord {
    /// Decode the record that starts at `offset`.
    pub fn read<F: IndexFile + ?Sized>(file: &mut F, offset: u64) -> io::Result<Self> {
        let head = file.read_bytes_at(offset, 8)?;
        let blocks = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        if blocks == 0 || blocks > MAX_RECORD_BLOCKS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record at 0x{:X} claims {} blocks", offset, blocks),
            ));
        }
        let len = blocks as u64 * BLOCK_SIZE;
        let raw = file.read_bytes_at(offset, len as usize).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("record at 0x{:X} ({} bytes) runs past the end of the file", offset, len),
                )
            } else {
                e
            }
        })?;
        Self::from_bytes(&raw, offset)
    }

    pub fn from_bytes(raw: &[u8], offset: u64) -> io::Result<Self> {
        if raw.len() < 8 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "record shorter than its header",
            ));
        }
        let kind = RecordKind::from_signature([raw[0], raw[1], raw[2], raw[3]]);
        let mut c = Cursor::new(raw);
        c.set_position(4);
        let number_of_blocks = c.read_u32::<LittleEndian>()?;

        let mut record = Self {
            offset,
            kind,
            number_of_blocks,
            last_modified: 0,
            last_accessed: 0,
            expires: 0,
            last_checked: 0,
            cached_file_size: 0,
            cache_directory_index: None,
            cache_entry_flags: 0,
            hits: 0,
            location: None,
            filename: None,
            http_headers: None,
        };

        match record.kind {
            RecordKind::Url | RecordKind::Leak => {
                if raw.len() < 0x58 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} record at 0x{:X} is truncated", record.kind.as_str(), offset),
                    ));
                }
                record.last_modified = c.read_u64::<LittleEndian>()?; // 0x08
                record.last_accessed = c.read_u64::<LittleEndian>()?; // 0x10
                record.expires = c.read_u32::<LittleEndian>()?; // 0x18
                c.set_position(0x20);
                record.cached_file_size = c.read_u32::<LittleEndian>()?;
                c.set_position(0x34);
                let location_offset = c.read_u32::<LittleEndian>()? as usize;
                let directory = c.read_u8()?; // 0x38
                c.set_position(0x3C);
                let filename_offset = c.read_u32::<LittleEndian>()? as usize;
                record.cache_entry_flags = c.read_u32::<LittleEndian>()?; // 0x40
                let data_offset = c.read_u32::<LittleEndian>()? as usize; // 0x44
                let data_size = c.read_u32::<LittleEndian>()? as usize; // 0x48
                c.set_position(0x50);
                record.last_checked = c.read_u32::<LittleEndian>()?;
                record.hits = c.read_u32::<LittleEndian>()?; // 0x54

                record.cache_directory_index = (directory != NO_DIRECTORY).then_some(directory);
                record.location = read_cstring(raw, location_offset);
                record.filename = read_cstring(raw, filename_offset);
                record.http_headers = read_sized_string(raw, data_offset, data_size);
            }
            RecordKind::Redirect => {
                record.location = read_cstring(raw, 0x10);
            }
            RecordKind::Unknown(_) => {}
        }
        Ok(record)
    }

    /// User name embedded in a history location ("Visited: user@url").
    pub fn username(&self) -> Option<String> {
        let location = self.location.as_deref()?;
        let (user, _) = strip_history_prefix(location)?.split_once('@')?;
        let user = user.trim();
        (!user.is_empty()).then(|| user.to_string())
    }

    /// Location with any history prefix and user name removed.
    pub fn url(&self) -> Option<String> {
        let location = self.location.as_deref()?;
        match strip_history_prefix(location) {
            Some(rest) => Some(
                rest.split_once('@')
                    .map_or(rest, |(_, url)| url)
                    .trim()
                    .to_string(),
            ),
            None => Some(location.trim().to_string()),
        }
    }

    pub fn domain(&self) -> Option<String> {
        extract_domain(&self.url()?)
    }

    pub fn directory<'h>(&self, header: &'h FileHeader) -> Option<&'h str> {
        header.directory_name(self.cache_directory_index?)
    }

    pub fn last_modified_rfc3339(&self) -> String {
        filetime_to_rfc3339(self.last_modified)
    }

    pub fn last_accessed_rfc3339(&self) -> String {
        filetime_to_rfc3339(self.last_accessed)
    }

    /// Tab-separated line in the column order of a pasco2 results file:
    /// type, URL, modified, accessed, filename, directory, HTTP headers.
    /// Times use the pasco2 form `2009-02-13T23:31:30.000Z`.
    pub fn to_pasco_line(&self, header: &FileHeader) -> String {
        let headers = self
            .http_headers
            .as_deref()
            .unwrap_or_default()
            .replace("\r\n", " ")
            .replace(['\r', '\n', '\t'], " ");
        let modified = filetime_to_pasco(self.last_modified);
        let accessed = filetime_to_pasco(self.last_accessed);
        [
            self.kind.as_str(),
            self.location.as_deref().unwrap_or_default(),
            modified.as_str(),
            accessed.as_str(),
            self.filename.as_deref().unwrap_or_default(),
            self.directory(header).unwrap_or_default(),
            headers.trim(),
        ]
        .join("\t")
    }

    pub fn to_json(&self) -> Value {
        json!({
            "offset": self.offset,
            "type": self.kind.as_str(),
            "number_of_blocks": self.number_of_blocks,
            "location": self.location,
            "url": self.url(),
            "username": self.username(),
            "domain": self.domain(),
            "last_modified": self.last_modified_rfc3339(),
            "last_modified_raw": self.last_modified,
            "last_accessed": self.last_accessed_rfc3339(),
            "last_accessed_raw": self.last_accessed,
            "expires": fat_to_string(self.expires),
            "last_checked": fat_to_string(self.last_checked),
            "cached_file_size": self.cached_file_size,
            "cache_directory_index": self.cache_directory_index,
            "cache_entry_flags": self.cache_entry_flags,
            "hits": self.hits,
            "filename": self.filename,
            "http_headers": self.http_headers,
        })
    }

    pub fn to_string(&self) -> String {
        let mut t = Table::new();
        t.add_row(row![b -> "Type", self.kind.as_str()]);
        t.add_row(row![b -> "Offset", format!("0x{:X}", self.offset)]);
        if let Some(l) = &self.location {
            t.add_row(row![b -> "Location", l]);
        }
        if let Some(u) = self.username() {
            t.add_row(row![b -> "User", u]);
        }
        if let Some(d) = self.domain() {
            t.add_row(row![b -> "Domain", d]);
        }
        if self.last_modified != 0 {
            t.add_row(row![b -> "Last Modified", self.last_modified_rfc3339()]);
        }
        if self.last_accessed != 0 {
            t.add_row(row![b -> "Last Accessed", self.last_accessed_rfc3339()]);
        }
        if self.expires != 0 {
            t.add_row(row![b -> "Expires", fat_to_string(self.expires)]);
        }
        if let Some(f) = &self.filename {
            t.add_row(row![b -> "Filename", f]);
        }
        if self.hits != 0 {
            t.add_row(row![b -> "Hits", self.hits]);
        }
        if let Some(h) = &self.http_headers {
            t.add_row(row![b -> "HTTP Headers", h.trim_end()]);
        }
        t.to_string()
    }
}

/// Strip "Visited:" or a history range ":YYYYMMDDYYYYMMDD:" prefix.
fn strip_history_prefix(location: &str) -> Option<&str> {
    if let Some(rest) = location.strip_prefix("Visited:") {
        return Some(rest.trim_start());
    }
    if let Some(rest) = location.strip_prefix(':') {
        let (_, tail) = rest.split_once(':')?;
        return Some(tail.trim_start());
    }
    None
}

fn extract_domain(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host.split(':').next().unwrap_or_default();
    (!host.is_empty()).then(|| host.to_lowercase())
}

fn read_cstring(raw: &[u8], offset: usize) -> Option<String> {
    if offset == 0 || offset >= raw.len() {
        return None;
    }
    let tail = &raw[offset..];
    let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
    Some(String::from_utf8_lossy(&tail[..end]).to_string())
}

fn read_sized_string(raw: &[u8], offset: usize, size: usize) -> Option<String> {
    if offset == 0 || size == 0 || offset >= raw.len() {
        return None;
    }
    let end = offset.saturating_add(size).min(raw.len());
    let text = String::from_utf8_lossy(&raw[offset..end]);
    Some(text.trim_end_matches('\0').to_string())
}

fn filetime_to_datetime(ft: u64) -> Option<DateTime<Utc>> {
    if ft == 0 {
        return None;
    }
    let micros_since_1601 = ft / 10;
    const DELTA_MICROS: i64 = 116_444_736_000_000_00;
    let unix_micros = micros_since_1601 as i64 - DELTA_MICROS;
    let secs = unix_micros.div_euclid(1_000_000);
    let nanos = unix_micros.rem_euclid(1_000_000) * 1_000;
    Utc.timestamp_opt(secs, nanos as u32).single()
}

fn filetime_to_rfc3339(ft: u64) -> String {
    filetime_to_datetime(ft)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn filetime_to_pasco(ft: u64) -> String {
    filetime_to_datetime(ft)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_default()
}

/// FAT date (low word) and time (high word).
fn fat_to_string(value: u32) -> String {
    if value == 0 {
        return String::new();
    }
    let date = (value & 0xFFFF) as u16;
    let time = (value >> 16) as u16;
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HEADER_SIZE;

    // 2009-02-13T23:31:30Z
    const FILETIME: u64 = 128_790_414_900_000_000;

    fn url_record(location: &str, filename: &str, headers: &str) -> Vec<u8> {
        let mut raw = vec![0u8; 0x180];
        raw[0..4].copy_from_slice(&URL_SIGNATURE);
        raw[4..8].copy_from_slice(&3u32.to_le_bytes());
        raw[0x08..0x10].copy_from_slice(&FILETIME.to_le_bytes());
        raw[0x10..0x18].copy_from_slice(&FILETIME.to_le_bytes());
        // 2010-03-04 10:20:30
        let date: u32 = ((2010 - 1980) << 9) | (3 << 5) | 4;
        let time: u32 = (10 << 11) | (20 << 5) | 15;
        raw[0x18..0x1C].copy_from_slice(&(date | (time << 16)).to_le_bytes());
        raw[0x34..0x38].copy_from_slice(&0x68u32.to_le_bytes());
        raw[0x38] = 1;
        raw[0x3C..0x40].copy_from_slice(&0x100u32.to_le_bytes());
        raw[0x44..0x48].copy_from_slice(&0x120u32.to_le_bytes());
        raw[0x48..0x4C].copy_from_slice(&(headers.len() as u32).to_le_bytes());
        raw[0x54..0x58].copy_from_slice(&5u32.to_le_bytes());
        raw[0x68..0x68 + location.len()].copy_from_slice(location.as_bytes());
        raw[0x100..0x100 + filename.len()].copy_from_slice(filename.as_bytes());
        raw[0x120..0x120 + headers.len()].copy_from_slice(headers.as_bytes());
        raw
    }

    fn header_with_directories() -> FileHeader {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[..24].copy_from_slice(b"Client UrlCache MMF Ver ");
        buf[24..27].copy_from_slice(b"5.2");
        buf[0x50..0x54].copy_from_slice(&2u32.to_le_bytes());
        buf[0x58..0x60].copy_from_slice(b"AAAAAAAA");
        buf[0x64..0x6C].copy_from_slice(b"Q1W2E3R4");
        FileHeader::from_bytes(&buf).unwrap()
    }

    #[test]
    fn decodes_url_record() {
        let raw = url_record(
            "Visited: alice@http://www.Example.com:8080/index.html",
            "index[1].htm",
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n",
        );
        let rec = CacheRecord::from_bytes(&raw, 0x5080).unwrap();
        assert_eq!(rec.kind, RecordKind::Url);
        assert_eq!(rec.number_of_blocks, 3);
        assert_eq!(rec.hits, 5);
        assert_eq!(rec.username().as_deref(), Some("alice"));
        assert_eq!(rec.url().as_deref(), Some("http://www.Example.com:8080/index.html"));
        assert_eq!(rec.domain().as_deref(), Some("www.example.com"));
        assert_eq!(rec.filename.as_deref(), Some("index[1].htm"));
        assert_eq!(rec.last_accessed_rfc3339(), "2009-02-13T23:31:30+00:00");
        assert_eq!(fat_to_string(rec.expires), "2010-03-04T10:20:30");

        let header = header_with_directories();
        assert_eq!(rec.directory(&header), Some("Q1W2E3R4"));
        assert_eq!(
            rec.to_pasco_line(&header),
            "URL\tVisited: alice@http://www.Example.com:8080/index.html\t\
             2009-02-13T23:31:30.000Z\t2009-02-13T23:31:30.000Z\tindex[1].htm\t\
             Q1W2E3R4\tHTTP/1.1 200 OK Content-Type: text/html"
        );
    }

    #[test]
    fn history_range_prefix_is_stripped() {
        let raw = url_record(":2012010120120108: bob@https://example.org/a?b=c", "", "");
        let rec = CacheRecord::from_bytes(&raw, 0).unwrap();
        assert_eq!(rec.username().as_deref(), Some("bob"));
        assert_eq!(rec.url().as_deref(), Some("https://example.org/a?b=c"));
        assert_eq!(rec.domain().as_deref(), Some("example.org"));
    }

    #[test]
    fn plain_cache_location_has_no_user() {
        let raw = url_record("http://cdn.example.net/logo.png", "logo[1].png", "");
        let rec = CacheRecord::from_bytes(&raw, 0).unwrap();
        assert_eq!(rec.username(), None);
        assert_eq!(rec.url().as_deref(), Some("http://cdn.example.net/logo.png"));
        assert_eq!(rec.http_headers, None);
    }

    #[test]
    fn decodes_redirect_record() {
        let mut raw = vec![0u8; 0x80];
        raw[0..4].copy_from_slice(&REDIRECT_SIGNATURE);
        raw[4..8].copy_from_slice(&1u32.to_le_bytes());
        raw[0x10..0x10 + 18].copy_from_slice(b"http://example.com");
        let rec = CacheRecord::from_bytes(&raw, 0).unwrap();
        assert_eq!(rec.kind, RecordKind::Redirect);
        assert_eq!(rec.location.as_deref(), Some("http://example.com"));
    }

    #[test]
    fn unknown_signature_is_kept() {
        let mut raw = vec![0u8; 0x80];
        raw[0..4].copy_from_slice(b"ENT ");
        raw[4..8].copy_from_slice(&1u32.to_le_bytes());
        let rec = CacheRecord::from_bytes(&raw, 0).unwrap();
        assert_eq!(rec.kind, RecordKind::Unknown("ENT".to_string()));
    }

    #[test]
    fn oversized_record_is_invalid() {
        let mut raw = vec![0u8; 0x80];
        raw[0..4].copy_from_slice(&URL_SIGNATURE);
        raw[4..8].copy_from_slice(&(MAX_RECORD_BLOCKS + 1).to_le_bytes());
        let err = CacheRecord::read(&mut Cursor::new(raw), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn record_running_past_the_file_is_invalid() {
        let mut raw = url_record("http://example.com/", "", "");
        raw.truncate(0x100);
        let err = CacheRecord::read(&mut Cursor::new(raw), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("0x0"));
    }

    #[test]
    fn pasco_times_keep_milliseconds() {
        assert_eq!(filetime_to_pasco(FILETIME + 1_234_567), "2009-02-13T23:31:30.123Z");
        assert_eq!(filetime_to_pasco(0), "");
    }

    #[test]
    fn zero_filetime_renders_empty() {
        assert_eq!(filetime_to_rfc3339(0), "");
        assert_eq!(fat_to_string(0), "");
    }
}
