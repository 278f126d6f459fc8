// Copyright (c) 2024-present, levelkv contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The migration (compaction) engine: the recursive, cascading two-level
//! merge that is the heart of the tree. See [`migrate`].

use crate::error::{Error, Result};
use crate::level::Level;
use crate::record::{Op, Record};
use log::{debug, trace};
use std::collections::VecDeque;

/// Merges `levels[0]` into `levels[1]`, cascading into `levels[2..]` if
/// `levels[1]` fills up mid-merge.
///
/// `levels` must always be a suffix that reaches the true end of the
/// tree's level array — that is what lets a recursive call know it has
/// reached the terminal level simply by checking `levels.len() == 2`.
///
/// Precondition: `levels.len() >= 2` (there is a level to migrate into).
/// Postcondition: `levels[0].used() == 0` and all its slots are invalid;
/// `levels[1]` holds the merged, sorted sequence in `[0, levels[1].used())`.
pub fn migrate(levels: &mut [Box<dyn Level>]) -> Result<()> {
    debug_assert!(levels.len() >= 2, "migrate needs a destination level");

    let cap_top = levels[0].capacity();
    let cap_bottom = levels[1].capacity();
    let is_terminal = levels.len() == 2;

    debug!(
        "migrating {} used records (capacity {cap_top}) into level of capacity {cap_bottom}",
        levels[0].used()
    );

    levels[1].set_used(0);

    let mut top_read = 0usize;
    let mut bottom_read = 0usize;
    let mut bottom_write = 0usize;
    let mut pending: VecDeque<Record> = VecDeque::new();

    loop {
        // 1. Cascade check: the destination is full, drain it first.
        if levels[1].used() == cap_bottom {
            if levels.len() < 3 {
                return Err(Error::TreeFull);
            }

            trace!("destination level full mid-merge, cascading");
            migrate(&mut levels[1..])?;
            bottom_read = 0;
            bottom_write = 0;
            continue;
        }

        // 2. Write if possible: drain the pending queue into an already
        //    vacated destination slot before reading anything else.
        if !pending.is_empty() && !levels[1].is_valid(bottom_write)? {
            let record = pending.pop_front().expect("queue checked non-empty above");
            levels[1].write(bottom_write, record)?;
            levels[1].set_used(levels[1].used() + 1);
            bottom_write += 1;
            bottom_read = bottom_read.max(bottom_write);
            continue;
        }

        // 3. Otherwise, read one candidate from each input and merge. An
        //    invalid slot here is never followed by a valid one (I1: the
        //    occupied prefix is contiguous), so hitting one fast-forwards
        //    the cursor straight to the end instead of re-reading it.
        let next_top = if top_read < cap_top {
            let record = levels[0].read(top_read)?;
            if record.valid {
                Some(record)
            } else {
                top_read = cap_top;
                None
            }
        } else {
            None
        };

        let next_bottom = if bottom_read < cap_bottom {
            let record = levels[1].read(bottom_read)?;
            if record.valid {
                Some(record)
            } else {
                bottom_read = cap_bottom;
                None
            }
        } else {
            None
        };

        match (next_top, next_bottom) {
            (None, None) => break,

            (Some(top), None) => {
                pending.push_back(top);
                levels[0].invalidate(top_read)?;
                top_read += 1;
            }

            (None, Some(bottom)) => {
                pending.push_back(bottom);
                levels[1].invalidate(bottom_read)?;
                bottom_read += 1;
            }

            (Some(top), Some(bottom)) if top.key < bottom.key => {
                pending.push_back(top);
                levels[0].invalidate(top_read)?;
                top_read += 1;
            }

            (Some(top), Some(bottom)) if top.key > bottom.key => {
                pending.push_back(bottom);
                levels[1].invalidate(bottom_read)?;
                bottom_read += 1;
            }

            (Some(top), Some(_bottom)) => {
                // Equal keys: top shadows bottom (I3). At the terminal level
                // a tombstone meeting its matching ADD annihilates the pair
                // instead of being written out (I4).
                if !(is_terminal && top.op == Op::Del) {
                    pending.push_back(top);
                }

                levels[0].invalidate(top_read)?;
                levels[1].invalidate(bottom_read)?;
                top_read += 1;
                bottom_read += 1;
            }
        }
    }

    levels[0].set_used(0);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::MainLevel;
    use test_log::test;

    fn level_of(records: &[(i64, i64)], capacity: usize) -> Box<dyn Level> {
        let mut level = MainLevel::new(capacity);
        for (i, (k, v)) in records.iter().enumerate() {
            level.write(i, Record::add(*k, *v)).unwrap();
        }
        level.set_used(records.len());
        Box::new(level)
    }

    fn dump(level: &mut dyn Level) -> Vec<(i64, i64, Op)> {
        (0..level.used())
            .map(|pos| {
                let r = level.read(pos).unwrap();
                (r.key, r.value, r.op)
            })
            .collect()
    }

    #[test]
    fn merges_two_disjoint_sorted_levels() {
        let mut levels: Vec<Box<dyn Level>> = vec![
            level_of(&[(1, 2), (3, 1003), (6, 255), (10, 3)], 4),
            level_of(&[], 7),
        ];

        migrate(&mut levels).unwrap();

        assert_eq!(levels[0].used(), 0);
        assert_eq!(
            dump(levels[1].as_mut()),
            vec![
                (1, 2, Op::Add),
                (3, 1003, Op::Add),
                (6, 255, Op::Add),
                (10, 3, Op::Add)
            ]
        );
    }

    #[test]
    fn top_shadows_bottom_on_equal_keys() {
        let mut levels: Vec<Box<dyn Level>> = vec![
            level_of(&[(5, 999)], 2),
            level_of(&[(5, 1), (8, 2)], 4),
        ];

        migrate(&mut levels).unwrap();

        assert_eq!(dump(levels[1].as_mut()), vec![(5, 999, Op::Add), (8, 2, Op::Add)]);
    }

    #[test]
    fn tombstone_annihilates_matching_add_at_terminal_level() {
        let mut top = MainLevel::new(1);
        top.write(0, Record::tombstone(5)).unwrap();
        top.set_used(1);

        let mut levels: Vec<Box<dyn Level>> =
            vec![Box::new(top), level_of(&[(5, 1), (8, 2)], 4)];

        migrate(&mut levels).unwrap();

        assert_eq!(dump(levels[1].as_mut()), vec![(8, 2, Op::Add)]);
    }

    #[test]
    fn tombstone_survives_at_non_terminal_level() {
        let mut top = MainLevel::new(1);
        top.write(0, Record::tombstone(5)).unwrap();
        top.set_used(1);

        let mut levels: Vec<Box<dyn Level>> = vec![
            Box::new(top),
            level_of(&[(5, 1), (8, 2)], 4),
            level_of(&[], 4),
        ];

        migrate(&mut levels).unwrap();

        assert_eq!(
            dump(levels[1].as_mut()),
            vec![(5, 0, Op::Del), (8, 2, Op::Add)]
        );
    }

    #[test]
    fn cascades_into_third_level_when_bottom_is_full() {
        let mut levels: Vec<Box<dyn Level>> = vec![
            level_of(&[(9, 9)], 1),
            level_of(&[(1, 1), (2, 2)], 2),
            level_of(&[(20, 20)], 4),
        ];

        migrate(&mut levels).unwrap();

        // Level 1 starts full, so its {1, 2} drains into level 2 first; only
        // then does {9} from level 0 land in the now-empty level 1.
        assert_eq!(levels[0].used(), 0);
        assert_eq!(dump(levels[1].as_mut()), vec![(9, 9, Op::Add)]);
        assert_eq!(
            dump(levels[2].as_mut()),
            vec![(1, 1, Op::Add), (2, 2, Op::Add), (20, 20, Op::Add)]
        );
    }

    #[test]
    fn bottom_of_tree_overflow_is_fatal() {
        let mut levels: Vec<Box<dyn Level>> = vec![
            level_of(&[(1, 1)], 1),
            level_of(&[(2, 2), (3, 3)], 2),
        ];

        let err = migrate(&mut levels).unwrap_err();
        assert!(matches!(err, Error::TreeFull));
    }
}
