// Copyright (c) 2024-present, levelkv contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The tree facade: the front door exposing `put`/`delete`/`get`/`range`/
//! `load`/`stat`. Dispatches writes to level 0 and walks levels
//! shallow-to-deep for reads.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::level::{DiskLevel, Level, MainLevel};
use crate::migration::migrate;
use crate::record::{Int, Op, Record};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Per-level occupancy snapshot produced by [`Tree::stat`].
#[derive(Debug, Clone)]
pub struct Stat {
    /// Total count of valid records across all levels.
    pub total: usize,
    /// `(level index, used count)` for every non-empty level.
    pub per_level: Vec<(usize, usize)>,
    /// Every valid record, tagged with the level index it lives on.
    pub dump: Vec<(usize, Record)>,
}

impl std::fmt::Display for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "total: {}", self.total)?;
        for (level, used) in &self.per_level {
            writeln!(f, "  level {level}: {used}")?;
        }
        for (level, record) in &self.dump {
            match record.op {
                Op::Add => writeln!(f, "    L{level} {}:{}", record.key, record.value)?,
                Op::Del => writeln!(f, "    L{level} {}:<tombstone>", record.key)?,
            }
        }
        Ok(())
    }
}

struct TreeInner {
    config: Config,
    levels: RwLock<Vec<Box<dyn Level>>>,
}

/// A log-structured merge tree over signed 64-bit keys and values.
///
/// Cheaply cloneable — clones share the same underlying levels through an
/// `Arc`. A single [`std::sync::RwLock`] guards the whole level array:
/// readers (`get`/`range`/`stat`) take a read lock and may run concurrently
/// with one another; writers (`put`/`delete`/`load`) take a write lock,
/// because migration may touch two or more adjacent levels at once and
/// must see a mutually consistent snapshot of them. Per-level locking was
/// considered and rejected for exactly that reason.
#[derive(Clone)]
pub struct Tree(Arc<TreeInner>);

impl Tree {
    pub(crate) fn open(config: Config) -> Result<Self> {
        let main_levels = config.main_level_count();
        let mut levels: Vec<Box<dyn Level>> = Vec::with_capacity(config.total_levels());

        for (i, &capacity) in config.capacities().iter().enumerate() {
            let level: Box<dyn Level> = if i < main_levels {
                Box::new(MainLevel::new(capacity))
            } else {
                Box::new(DiskLevel::open(config.level_file(i), capacity)?)
            };
            levels.push(level);
        }

        info!(
            "opened tree {:?} with {} levels ({} in-memory)",
            config.name(),
            config.total_levels(),
            main_levels
        );

        Ok(Self(Arc::new(TreeInner {
            config,
            levels: RwLock::new(levels),
        })))
    }

    pub fn name(&self) -> &str {
        self.0.config.name()
    }

    pub fn level_count(&self) -> usize {
        self.0.config.total_levels()
    }

    /// Releases the tree. Disk-level files are unlinked when the last
    /// handle to the tree is dropped (see [`crate::level::DiskLevel`]'s
    /// `Drop` impl) — this method exists to make that release an explicit,
    /// nameable step in caller code, matching spec.md §6's `destroy`.
    pub fn destroy(self) {
        drop(self);
    }

    /// Inserts or updates `key` with `value`.
    pub fn put(&self, key: Int, value: Int) -> Result<()> {
        self.write_record(Record::add(key, value))
    }

    /// Marks `key` as deleted. Idempotent: deleting an already-absent or
    /// already-deleted key is a no-op from the caller's perspective (P5).
    pub fn delete(&self, key: Int) -> Result<()> {
        self.write_record(Record::tombstone(key))
    }

    fn write_record(&self, record: Record) -> Result<()> {
        let mut levels = self.0.levels.write().expect("lock poisoned");

        if levels[0].used() == levels[0].capacity() {
            if levels.len() == 1 {
                warn!("single-level tree is full, no level to migrate into");
                return Err(Error::TreeFull);
            }

            debug!("level 0 full, triggering migration before insert");
            migrate(&mut levels[..]).map_err(|e| {
                warn!("migration failed: store full");
                e
            })?;
        }

        let level0 = levels[0]
            .as_main_mut()
            .expect("level 0 must always be a MainLevel");

        insert_into_main(level0, record)
    }

    /// Looks up `key`, walking levels shallow to deep and stopping at the
    /// first valid hit — including a tombstone, which shadows whatever
    /// lives deeper (P4).
    pub fn get(&self, key: Int) -> Result<Option<Int>> {
        let levels = self.0.levels.read().expect("lock poisoned");

        for level in levels.iter() {
            if !level.maybe_present(key) {
                continue;
            }

            let pos = level.search(key)?;
            if pos >= level.used() {
                continue;
            }

            let record = level.read(pos)?;
            if record.valid && record.key == key {
                return Ok(match record.op {
                    Op::Add => Some(record.value),
                    Op::Del => None,
                });
            }
        }

        Ok(None)
    }

    /// Collects every present key strictly between `lo` and `hi` (both
    /// bounds exclusive). Levels are visited shallow-to-deep so the first
    /// occurrence of a key wins; a second pass then drops tombstones.
    /// Complexity is O(total records), not O(range size) — see spec.md §4.5.
    pub fn range(&self, lo: Int, hi: Int) -> Result<Vec<(Int, Int)>> {
        let levels = self.0.levels.read().expect("lock poisoned");
        let mut seen: HashMap<Int, Record> = HashMap::new();

        for level in levels.iter() {
            for pos in 0..level.used() {
                let record = level.read(pos)?;
                if record.valid && record.key > lo && record.key < hi {
                    seen.entry(record.key).or_insert(record);
                }
            }
        }

        Ok(seen
            .into_values()
            .filter(|r| r.op == Op::Add)
            .map(|r| (r.key, r.value))
            .collect())
    }

    /// Bulk-loads fixed-width `(key, value)` pairs from `path`, performing a
    /// `put` for each. Stops cleanly at EOF.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<usize> {
        const PAIR_WIDTH: usize = 16;

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut buf = [0u8; PAIR_WIDTH];
        let mut count = 0;

        loop {
            match reader.read_exact(&mut buf) {
                Ok(()) => {
                    let key = i64::from_le_bytes(buf[0..8].try_into().expect("8 bytes"));
                    let value = i64::from_le_bytes(buf[8..16].try_into().expect("8 bytes"));
                    self.put(key, value)?;
                    count += 1;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        info!("loaded {count} records from disk");
        Ok(count)
    }

    /// Reports total valid-record count, per-level counts, and a full dump.
    /// Purely informational — performs no mutation.
    pub fn stat(&self) -> Result<Stat> {
        let levels = self.0.levels.read().expect("lock poisoned");
        let mut per_level = Vec::new();
        let mut dump = Vec::new();
        let mut total = 0;

        for (i, level) in levels.iter().enumerate() {
            let used = level.used();
            if used > 0 {
                per_level.push((i, used));
            }
            for pos in 0..used {
                let record = level.read(pos)?;
                if record.valid {
                    total += 1;
                    dump.push((i, record));
                }
            }
        }

        Ok(Stat {
            total,
            per_level,
            dump,
        })
    }
}

/// Level-0 insert decision table (spec.md §4.2). `level` must be the
/// shallowest level; deeper levels are written only by the migration
/// engine. The right-shift path requires `used < capacity` — callers are
/// responsible for migrating first.
fn insert_into_main(level: &mut MainLevel, record: Record) -> Result<()> {
    let pos = level.search(record.key)?;
    let current = level.read(pos)?;

    if !(current.valid && current.key == record.key) {
        debug_assert!(level.used() < level.capacity(), "insert into full level");
        level.shift_right(pos);
        level.write(pos, record)?;
        level.set_used(level.used() + 1);
    } else if record.op == Op::Add {
        level.write(pos, record)?;
    } else {
        level.shift_left(pos);
        level.invalidate(level.used() - 1)?;
        level.set_used(level.used() - 1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashSet;
    use test_log::test;

    fn open_tree(dir: &Path) -> Tree {
        Config::new("t", dir)
            .levels(vec![4, 7, 13, 10])
            .main_levels(4)
            .open()
            .unwrap()
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open_tree(dir.path());

        tree.put(1, 2).unwrap();
        assert_eq!(tree.get(1).unwrap(), Some(2));
    }

    #[test]
    fn last_write_wins_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open_tree(dir.path());

        tree.put(12, 15).unwrap();
        tree.put(12, 2).unwrap();
        assert_eq!(tree.get(12).unwrap(), Some(2));
    }

    #[test]
    fn delete_shadows_get() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open_tree(dir.path());

        tree.put(1, 2).unwrap();
        tree.delete(1).unwrap();
        assert_eq!(tree.get(1).unwrap(), None);
    }

    #[test]
    fn idempotent_delete() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open_tree(dir.path());

        tree.delete(9).unwrap();
        tree.delete(9).unwrap();
        assert_eq!(tree.get(9).unwrap(), None);
    }

    #[test]
    fn level_0_migrates_on_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open_tree(dir.path());

        tree.put(1, 2).unwrap();
        tree.put(10, 3).unwrap();
        tree.put(3, 1003).unwrap();
        tree.put(6, 255).unwrap();
        // Level 0 (capacity 4) was full after the previous put; this one
        // triggers a migration that drains {1, 3, 6, 10} into level 1.
        tree.put(4, 142).unwrap();

        assert_eq!(tree.get(4).unwrap(), Some(142));
        assert_eq!(tree.get(10).unwrap(), Some(3));
        assert_eq!(tree.get(6).unwrap(), Some(255));
    }

    #[test]
    fn scenario_from_spec_section_8() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open_tree(dir.path());

        for (k, v) in [
            (1, 2),
            (10, 3),
            (3, 1003),
            (6, 255),
            (4, 142),
            (11, 25),
            (17, 14),
            (12, 15),
            (13, 1),
            (12, 2),
        ] {
            tree.put(k, v).unwrap();
        }
        assert_eq!(tree.get(12).unwrap(), Some(2));

        for (k, v) in [
            (15, 3),
            (12, 24),
            (18, 4),
            (17, 25),
            (5, 255),
            (2, 255),
        ] {
            tree.put(k, v).unwrap();
        }
        tree.delete(2).unwrap();
        tree.delete(13).unwrap();
        tree.put(21, 24).unwrap();
        tree.put(22, 21).unwrap();

        assert_eq!(tree.get(22).unwrap(), Some(21));
        assert_eq!(tree.get(2).unwrap(), None);
        assert_eq!(tree.get(13).unwrap(), None);
        assert_eq!(tree.get(12).unwrap(), Some(24));
        assert_eq!(tree.get(10).unwrap(), Some(3));

        let expected: HashSet<(i64, i64)> = [
            (3, 1003),
            (4, 142),
            (5, 255),
            (6, 255),
            (10, 3),
            (11, 25),
            (12, 24),
            (15, 3),
            (17, 25),
            (18, 4),
            (21, 24),
            (22, 21),
        ]
        .into_iter()
        .collect();

        let got: HashSet<(i64, i64)> = tree.range(1, 27).unwrap().into_iter().collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn terminal_level_overflow_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Config::new("t", dir.path())
            .levels(vec![1, 1])
            .main_levels(2)
            .open()
            .unwrap();

        tree.put(1, 1).unwrap();
        tree.put(2, 2).unwrap(); // fills level 0, migrates into level 1
        let err = tree.put(3, 3).unwrap_err();
        assert!(matches!(err, Error::TreeFull));
    }

    #[test]
    fn single_level_tree_overflow_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Config::new("t", dir.path())
            .levels(vec![1])
            .main_levels(1)
            .open()
            .unwrap();

        tree.put(1, 1).unwrap();
        let err = tree.put(2, 2).unwrap_err();
        assert!(matches!(err, Error::TreeFull));
    }

    #[test]
    fn load_ingests_fixed_width_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open_tree(dir.path());

        let data_path = dir.path().join("data.bin");
        let mut bytes = Vec::new();
        for (k, v) in [(1i64, 10i64), (2, 20), (3, 30)] {
            bytes.extend_from_slice(&k.to_le_bytes());
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(&data_path, bytes).unwrap();

        let count = tree.load(&data_path).unwrap();
        assert_eq!(count, 3);
        assert_eq!(tree.get(2).unwrap(), Some(20));
    }

    #[test]
    fn stat_reports_total_and_dump() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open_tree(dir.path());

        tree.put(1, 1).unwrap();
        tree.put(2, 2).unwrap();

        let stat = tree.stat().unwrap();
        assert_eq!(stat.total, 2);
        assert_eq!(stat.per_level, vec![(0, 2)]);
    }

    #[test]
    fn disk_backed_levels_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Config::new("t", dir.path())
            .levels(vec![2, 4])
            .main_levels(1)
            .open()
            .unwrap();

        tree.put(1, 1).unwrap();
        tree.put(2, 2).unwrap();
        tree.put(3, 3).unwrap(); // overflows level 0 into the disk level

        assert_eq!(tree.get(1).unwrap(), Some(1));
        assert_eq!(tree.get(2).unwrap(), Some(2));
        assert_eq!(tree.get(3).unwrap(), Some(3));
    }
}
