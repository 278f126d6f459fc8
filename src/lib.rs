// Copyright (c) 2024-present, levelkv contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embedded log-structured merge (LSM) tree over signed integer keys and
//! values.
//!
//! ##### About
//!
//! A tree is a [`Config::open`]-ed array of sorted [`level::Level`]s, index
//! 0 (shallowest, smallest, receives writes) to `N - 1` (deepest, largest,
//! terminal). Writes land in level 0; once it fills, the
//! [`migration`] engine merges it into level 1, cascading further down if
//! level 1 is also full. Reads walk the levels shallow-to-deep and return
//! the first hit, so a shallower record — including a tombstone — always
//! shadows a deeper one with the same key.
//!
//! This crate does not provide a write-ahead log: writes are not crash-
//! durable, and there is no support for multi-process access or
//! transactions spanning more than one operation.
//!
//! # Example
//!
//! ```
//! use levelkv::Config;
//! # let dir = tempfile::tempdir()?;
//!
//! let tree = Config::new("demo", dir.path())
//!     .levels(vec![4, 7, 13, 10])
//!     .main_levels(4)
//!     .open()?;
//!
//! tree.put(1, 100)?;
//! tree.put(2, 200)?;
//! tree.delete(1)?;
//!
//! assert_eq!(tree.get(1)?, None);
//! assert_eq!(tree.get(2)?, Some(200));
//! # Ok::<(), levelkv::Error>(())
//! ```

pub mod binary_search;
pub mod config;
pub mod error;
pub mod filter;
pub mod level;
pub mod migration;
pub mod record;
pub mod tree;

pub use config::Config;
pub use error::{Error, Result};
pub use record::{Int, Op, Record};
pub use tree::{Stat, Tree};
