// Copyright (c) 2024-present, levelkv contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur in the LSM-tree
#[derive(Debug)]
pub enum Error {
    /// The tree configuration is invalid (bad level/capacity setup)
    Config(String),

    /// Migration reached the terminal level and it was still full after
    /// the merge; the tree cannot accept further writes
    TreeFull,

    /// I/O error on a disk-backed level
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid tree configuration: {msg}"),
            Self::TreeFull => write!(f, "store full: terminal level overflowed during migration"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Tree result
pub type Result<T> = std::result::Result<T, Error>;
