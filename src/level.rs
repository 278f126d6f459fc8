// Copyright (c) 2024-present, levelkv contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Sorted levels: the bounded, ascending-by-key containers that make up a
//! [`crate::tree::Tree`]'s level array.
//!
//! Two backing stores exist, [`MainLevel`] (array) and [`DiskLevel`] (file),
//! exposed through the single [`Level`] capability trait so the migration
//! engine and the tree facade are written once against `dyn Level`, never
//! duplicated per kind.

use crate::error::Result;
use crate::filter::{IndexHook, MembershipHook, NoopFilter, NoopIndex};
use crate::record::{Int, Record, RECORD_WIDTH};
use log::warn;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Positioned read/write helpers (`pread`/`pwrite` on Unix, `seek_read`/
/// `seek_write` on Windows) so a [`DiskLevel`] read never needs `&mut File`
/// — that is what lets [`Level::read`] take `&self`, which in turn is what
/// lets [`crate::tree::Tree`] hand out a real concurrent read lock instead
/// of serializing every reader behind a cursor-mutating `seek`.
#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_read(buf, offset)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file",
            ));
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn write_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        let n = file.seek_write(buf, offset)?;
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}

/// Capability set shared by [`MainLevel`] and [`DiskLevel`].
///
/// `read`/`write`/`invalidate`/`is_valid` address slots by position
/// (precondition `pos < capacity()`, never checked twice by callers that
/// already hold a position from `search`). `search` is the only method with
/// a defined meaning for out-of-range results: it returns an insertion
/// point in `[0, used()]`.
pub trait Level: std::fmt::Debug + Send + Sync {
    fn capacity(&self) -> usize;
    fn used(&self) -> usize;
    fn set_used(&mut self, used: usize);

    /// Reads slot `pos`. Takes `&self`, not `&mut self`, on purpose: callers
    /// such as [`crate::tree::Tree::get`] hold only a read lock over the
    /// level array, and a `read` that required exclusive access would make
    /// that lock no more concurrent than a plain mutex.
    fn read(&self, pos: usize) -> Result<Record>;
    fn write(&mut self, pos: usize, record: Record) -> Result<()>;
    fn invalidate(&mut self, pos: usize) -> Result<()>;

    fn is_valid(&self, pos: usize) -> Result<bool> {
        Ok(self.read(pos)?.valid)
    }

    /// Binary search over `[0, used())`. Returns the index of a matching key,
    /// or the first position whose key is `>= key` (`used()` if all keys are
    /// smaller). Consults the index hook first; falls back to a direct
    /// binary search issuing one `read` per probe.
    fn search(&self, key: Int) -> Result<usize> {
        if let Some(pos) = self.index_hook().and_then(|idx| idx.lookup(key)) {
            return Ok(pos);
        }

        let mut left = 0usize;
        let mut right = self.used();

        while left < right {
            let mid = left + (right - left) / 2;
            let rec = self.read(mid)?;

            if rec.key < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        Ok(left)
    }

    /// Returns `true` if the membership hook is confident `key` is absent.
    fn maybe_present(&self, key: Int) -> bool {
        self.filter_hook()
            .map_or(true, |filter| filter.maybe_present(key))
    }

    fn filter_hook(&self) -> Option<&dyn MembershipHook> {
        None
    }

    fn index_hook(&self) -> Option<&dyn IndexHook> {
        None
    }

    /// Downcasts to the in-memory variant. Only level 0 ever needs this —
    /// the shift-based insert path is only defined for an array-backed
    /// level (spec.md §4.2's design note: deeper levels are write-only from
    /// the migration engine).
    fn as_main_mut(&mut self) -> Option<&mut MainLevel> {
        None
    }
}

/// In-memory, array-backed level. The shallowest level (level 0) must
/// always be a `MainLevel` — it is the only level `Tree::insert` ever
/// writes into directly.
#[derive(Debug)]
pub struct MainLevel {
    capacity: usize,
    used: usize,
    records: Vec<Record>,
    filter: Box<dyn MembershipHook>,
    index: Box<dyn IndexHook>,
}

impl MainLevel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            records: vec![Record::INVAL; capacity],
            filter: Box::new(NoopFilter),
            index: Box::new(NoopIndex),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Box<dyn MembershipHook>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: Box<dyn IndexHook>) -> Self {
        self.index = index;
        self
    }

    /// Direct slice access for the insert fast path and range scans, which
    /// operate on contiguous memory rather than going through `read`/`write`
    /// one slot at a time.
    pub fn records(&self) -> &[Record] {
        &self.records[..self.used]
    }

    /// Shifts `[pos, used)` right by one slot to make room at `pos`.
    /// Precondition: `used < capacity`.
    pub fn shift_right(&mut self, pos: usize) {
        debug_assert!(self.used < self.capacity);
        self.records.copy_within(pos..self.used, pos + 1);
    }

    /// Shifts `[pos + 1, used)` left by one slot, closing the gap at `pos`.
    pub fn shift_left(&mut self, pos: usize) {
        self.records.copy_within(pos + 1..self.used, pos);
    }
}

impl Level for MainLevel {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used(&self) -> usize {
        self.used
    }

    fn set_used(&mut self, used: usize) {
        self.used = used;
    }

    fn read(&self, pos: usize) -> Result<Record> {
        Ok(self.records[pos])
    }

    fn write(&mut self, pos: usize, mut record: Record) -> Result<()> {
        record.valid = true;
        self.filter.observe(record.key);
        self.index.observe(record.key, pos);
        self.records[pos] = record;
        Ok(())
    }

    fn invalidate(&mut self, pos: usize) -> Result<()> {
        let key = self.records[pos].key;
        self.index.forget(key);
        self.records[pos] = Record::INVAL;
        Ok(())
    }

    /// No I/O involved, so this searches the occupied prefix directly
    /// rather than going through the trait's one-probe-at-a-time default.
    fn search(&self, key: Int) -> Result<usize> {
        if let Some(pos) = self.index.lookup(key) {
            return Ok(pos);
        }

        Ok(crate::binary_search::partition_point(
            &self.records[..self.used],
            |r| r.key < key,
        ))
    }

    fn filter_hook(&self) -> Option<&dyn MembershipHook> {
        Some(self.filter.as_ref())
    }

    fn index_hook(&self) -> Option<&dyn IndexHook> {
        Some(self.index.as_ref())
    }

    fn as_main_mut(&mut self) -> Option<&mut MainLevel> {
        Some(self)
    }
}

/// File-backed level. Every operation is a single positioned (`pread`/
/// `pwrite`-style) fixed-width read or write at `pos * RECORD_WIDTH`, never
/// touching a shared file cursor; there is no page cache — that is
/// deliberately left to an external hook if one is installed.
#[derive(Debug)]
pub struct DiskLevel {
    capacity: usize,
    used: usize,
    file: File,
    path: PathBuf,
    filter: Box<dyn MembershipHook>,
    index: Box<dyn IndexHook>,
}

impl DiskLevel {
    /// Opens (creating if necessary) a level file at `path` and truncates it
    /// to exactly `capacity * RECORD_WIDTH` bytes. A freshly-extended file is
    /// zero-filled by the OS, and the all-zero byte pattern happens to be
    /// exactly the canonical `Record::INVAL` encoding, so no explicit
    /// slot-by-slot initialization is needed.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        file.set_len((capacity * RECORD_WIDTH) as u64)?;

        Ok(Self {
            capacity,
            used: 0,
            file,
            path,
            filter: Box::new(NoopFilter),
            index: Box::new(NoopIndex),
        })
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Box<dyn MembershipHook>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: Box<dyn IndexHook>) -> Self {
        self.index = index;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Level for DiskLevel {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used(&self) -> usize {
        self.used
    }

    fn set_used(&mut self, used: usize) {
        self.used = used;
    }

    fn read(&self, pos: usize) -> Result<Record> {
        let mut buf = [0u8; RECORD_WIDTH];
        read_at(&self.file, &mut buf, (pos * RECORD_WIDTH) as u64)?;
        Ok(Record::decode(&buf))
    }

    fn write(&mut self, pos: usize, mut record: Record) -> Result<()> {
        record.valid = true;
        self.filter.observe(record.key);
        self.index.observe(record.key, pos);
        write_at(&self.file, &record.encode(), (pos * RECORD_WIDTH) as u64)?;
        Ok(())
    }

    fn invalidate(&mut self, pos: usize) -> Result<()> {
        let key = self.read(pos)?.key;
        self.index.forget(key);
        write_at(&self.file, &Record::INVAL.encode(), (pos * RECORD_WIDTH) as u64)?;
        Ok(())
    }

    fn filter_hook(&self) -> Option<&dyn MembershipHook> {
        Some(self.filter.as_ref())
    }

    fn index_hook(&self) -> Option<&dyn IndexHook> {
        Some(self.index.as_ref())
    }
}

impl Drop for DiskLevel {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove level file {}: {e}", self.path.display());
            }
        }
    }
}
