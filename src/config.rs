// Copyright (c) 2024-present, levelkv contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tree configuration: level counts, capacities, and where disk levels live
//! on the filesystem.

use crate::error::{Error, Result};
use crate::tree::Tree;
use std::path::{Path, PathBuf};

/// Configuration for opening a [`Tree`].
///
/// Chainable setters in the style of a typical builder; validation is
/// deferred to [`Config::open`] instead of failing eagerly per-setter, so
/// setters can be called in any order.
#[derive(Clone, Debug)]
pub struct Config {
    name: String,
    total_levels: usize,
    main_levels: usize,
    capacities: Vec<usize>,
    data_dir: PathBuf,
}

impl Config {
    /// Starts building a config for a tree named `name`, persisting any
    /// disk levels under `data_dir`.
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            total_levels: 0,
            main_levels: 0,
            capacities: Vec::new(),
            data_dir: data_dir.into(),
        }
    }

    /// Sets the total level count `N` and the per-level capacities. The
    /// capacities slice's length becomes `N`.
    #[must_use]
    pub fn levels(mut self, capacities: impl Into<Vec<usize>>) -> Self {
        let capacities = capacities.into();
        self.total_levels = capacities.len();
        self.capacities = capacities;
        self
    }

    /// Sets `M`, the count of in-memory levels at the shallow end; the
    /// remaining `N - M` levels are disk-backed.
    #[must_use]
    pub fn main_levels(mut self, main_levels: usize) -> Self {
        self.main_levels = main_levels;
        self
    }

    /// Validates the configuration and opens (or creates) the tree.
    ///
    /// Configuration errors (bad capacities, `M > N`, `M < 1`) fail here and
    /// return no handle, matching spec.md §7's error taxonomy.
    pub fn open(self) -> Result<Tree> {
        let n = self.total_levels;
        let m = self.main_levels;

        if n == 0 {
            return Err(Error::Config("total_levels must be at least 1".into()));
        }

        if self.capacities.len() != n {
            return Err(Error::Config(format!(
                "expected {n} capacities, got {}",
                self.capacities.len()
            )));
        }

        if m < 1 || m > n {
            return Err(Error::Config(format!(
                "main_levels (M={m}) must satisfy 0 < M <= N ({n})"
            )));
        }

        if self.capacities.iter().any(|&c| c == 0) {
            return Err(Error::Config("level capacities must be positive".into()));
        }

        if self.capacities.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::Config(
                "level capacities must be monotone non-decreasing with depth".into(),
            ));
        }

        std::fs::create_dir_all(&self.data_dir)?;

        Tree::open(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_levels(&self) -> usize {
        self.total_levels
    }

    pub fn main_level_count(&self) -> usize {
        self.main_levels
    }

    pub fn capacities(&self) -> &[usize] {
        &self.capacities
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the on-disk file backing disk level `i`: `<name>.level<i>.bin`.
    pub fn level_file(&self, i: usize) -> PathBuf {
        self.data_dir.join(format!("{}.level{i}.bin", self.name))
    }
}
