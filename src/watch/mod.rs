//! Filesystem watching
//!
//! Turns raw `notify` events for a watched directory into add/change/unlink
//! events carrying absolute paths.

pub mod ignore;
pub mod notifier;
pub mod scan;

pub use ignore::IgnoreMatcher;
pub use notifier::FsNotifier;
pub use scan::initial_scan;

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Add,
    Change,
    Unlink,
}

impl fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsEventKind::Add => "add",
            FsEventKind::Change => "change",
            FsEventKind::Unlink => "unlink",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    pub fn add(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Add,
            path: path.into(),
        }
    }

    pub fn change(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Change,
            path: path.into(),
        }
    }

    pub fn unlink(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Unlink,
            path: path.into(),
        }
    }
}
