// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Resource synchronization.
//!
//! The server bundles the client's build output as static resources. Before
//! the server resource bundle is finalized, the client build output must be
//! mirrored into `<resources>/static`. Hoist performs a one-way sync: files
//! missing or different in the target are copied over, identical files are
//! left alone, and anything in the target that the source no longer has is
//! deleted. Running a sync twice over an unchanged source is therefore a
//! no-op the second time around.
//!
//! Source files matching any exclusion pattern are treated as if they did not
//! exist. Exclusion patterns use gitignore syntax.
//!
//! Symbolic links in the source are followed, so a linked directory arrives
//! in the target as a regular directory holding copies of its files. Links in
//! the target are never followed.

use crate::config::SyncSettings;

use ignore::{
    gitignore::{Gitignore, GitignoreBuilder},
    WalkBuilder,
};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// One-way mirror of a source tree into a target directory.
#[derive(Debug)]
pub struct ResourceSync {
    source: PathBuf,
    target: PathBuf,
    exclude: Gitignore,
}

impl ResourceSync {
    /// Construct new resource sync.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Walk`] if an exclusion pattern is invalid.
    pub fn new(
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        exclude: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let source = source.into();
        let mut builder = GitignoreBuilder::new(&source);
        for pattern in exclude {
            builder.add_line(None, pattern.as_ref())?;
        }

        Ok(Self {
            exclude: builder.build()?,
            target: target.into(),
            source,
        })
    }

    /// Construct resource sync from configuration settings.
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        Self::new(
            &settings.source,
            settings.target(),
            settings.exclude.iter().flatten(),
        )
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Make target tree equal to source tree.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::MissingSource`] if source is not a directory.
    /// - Return [`SyncError::Walk`] if either tree cannot be traversed.
    /// - Return I/O variants of [`SyncError`] if copying or deletion fails.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self) -> Result<SyncReport> {
        info!(
            "sync {:?} into {:?}",
            self.source.display(),
            self.target.display()
        );
        let report = mirror(&self.source, &self.target, &self.exclude)?;
        info!(
            "{} copied, {} unchanged, {} removed",
            report.copied.len(),
            report.unchanged,
            report.removed.len()
        );

        Ok(report)
    }
}

/// Outcome of a sync run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Files written into target, relative to target.
    pub copied: Vec<PathBuf>,

    /// Number of files that already matched.
    pub unchanged: usize,

    /// Entries deleted from target, relative to target.
    pub removed: Vec<PathBuf>,
}

impl SyncReport {
    /// Sync did not change anything in target.
    pub fn is_noop(&self) -> bool {
        self.copied.is_empty() && self.removed.is_empty()
    }
}

/// Mirror source tree into target without exclusions.
pub fn mirror_tree(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<SyncReport> {
    mirror(source.as_ref(), target.as_ref(), &Gitignore::empty())
}

fn mirror(source: &Path, target: &Path, exclude: &Gitignore) -> Result<SyncReport> {
    if !source.is_dir() {
        return Err(SyncError::MissingSource {
            path: source.to_path_buf(),
        });
    }

    fs::create_dir_all(target).map_err(|source| SyncError::CreateDir {
        source,
        path: target.to_path_buf(),
    })?;

    let mut report = SyncReport::default();
    let mut wanted_dirs = HashSet::new();
    let mut wanted_files = HashSet::new();

    for (relative, is_dir) in walk(source, true)? {
        if exclude
            .matched_path_or_any_parents(&relative, is_dir)
            .is_ignore()
        {
            debug!("exclude {:?}", relative.display());
            continue;
        }

        let to = target.join(&relative);
        if is_dir {
            // INVARIANT: Source wins type conflicts.
            if to.is_file() {
                remove_entry(&to)?;
                report.removed.push(relative.clone());
            }
            fs::create_dir_all(&to).map_err(|source| SyncError::CreateDir { source, path: to })?;
            wanted_dirs.insert(relative);
            continue;
        }

        let from = source.join(&relative);
        if to.is_dir() {
            remove_entry(&to)?;
            report.removed.push(relative.clone());
        }

        if same_contents(&from, &to) {
            report.unchanged += 1;
        } else {
            debug!("copy {:?}", relative.display());
            fs::copy(&from, &to).map_err(|source| SyncError::Copy {
                source,
                from: from.clone(),
                to: to.clone(),
            })?;
            report.copied.push(relative.clone());
        }
        wanted_files.insert(relative);
    }

    // INVARIANT: Delete deepest entries first so directories are emptied
    // before they are removed.
    let mut existing = walk(target, false)?;
    existing.sort_by_key(|(relative, _)| std::cmp::Reverse(relative.components().count()));
    for (relative, is_dir) in existing {
        let keep = if is_dir {
            wanted_dirs.contains(&relative)
        } else {
            wanted_files.contains(&relative)
        };

        if keep {
            continue;
        }

        let path = target.join(&relative);
        if !path.exists() && !path.is_symlink() {
            continue;
        }

        debug!("remove stale {:?}", relative.display());
        remove_entry(&path)?;
        report.removed.push(relative);
    }

    Ok(report)
}

/// List every entry below root as `(relative path, is directory)`.
fn walk(root: &Path, follow_links: bool) -> Result<Vec<(PathBuf, bool)>> {
    let mut entries = Vec::new();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(follow_links)
        .build();

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
        let relative = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| entry.path().to_path_buf());
        entries.push((relative, is_dir));
    }

    Ok(entries)
}

fn same_contents(from: &Path, to: &Path) -> bool {
    let (Ok(from_meta), Ok(to_meta)) = (fs::metadata(from), fs::metadata(to)) else {
        return false;
    };

    if !to_meta.is_file() || from_meta.len() != to_meta.len() {
        return false;
    }

    match (fs::read(from), fs::read(to)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn remove_entry(path: &Path) -> Result<()> {
    let result = if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|source| SyncError::Remove {
        source,
        path: path.to_path_buf(),
    })
}

/// Resource sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Source tree does not exist.
    #[error("sync source {:?} is not a directory", path.display())]
    MissingSource { path: PathBuf },

    /// Exclusion pattern is invalid, or tree cannot be traversed.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Target directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be copied into target.
    #[error("failed to copy {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Stale entry cannot be removed from target.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
