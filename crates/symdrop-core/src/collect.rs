//! Input path expansion.
//!
//! Expands the paths given on the command line into a flat, deduplicated list
//! of candidate debug files. Regular files are taken as-is; directories are
//! walked recursively and filtered by a glob over the path relative to the
//! directory.

use crate::error::{classify_io, Error, ErrorKind, Result, WrappedError};
use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Default filter: the DWARF payloads inside `.dSYM` bundles
pub const DEFAULT_PATTERN: &str = "**/DWARF/*";

const GATHER_ERROR: &str = "An error occurred while gathering debug files";

/// A candidate file to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Canonical absolute path, unique within one collection
    pub path: PathBuf,
    /// Name shown to users and recorded in the upload metadata
    pub name: String,
}

/// Expands root paths into [`FileDescriptor`]s
#[derive(Debug, Clone)]
pub struct FileCollector {
    pattern: String,
    matcher: GlobMatcher,
}

impl Default for FileCollector {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN).expect("default pattern compiles")
    }
}

impl FileCollector {
    /// Creates a collector filtering directory contents by `pattern`
    pub fn new(pattern: &str) -> Result<Self> {
        let matcher = compile(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    /// Returns the glob this collector filters by
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Collects files under `roots`, resolving relative roots against the current directory
    pub fn collect<P: AsRef<Path>>(&self, roots: &[P]) -> Result<Vec<FileDescriptor>> {
        let base = std::env::current_dir().map_err(|e| classify_io(GATHER_ERROR, e))?;
        self.collect_from(&base, roots)
    }

    /// Collects files under `roots`, resolving relative roots against `base`.
    ///
    /// Output follows root order, then walk order (sorted by file name), and
    /// contains each canonical path once.
    pub fn collect_from<P: AsRef<Path>>(
        &self,
        base: &Path,
        roots: &[P],
    ) -> Result<Vec<FileDescriptor>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for root in roots {
            let root = base.join(root.as_ref());
            let metadata = fs::metadata(&root).map_err(|e| classify_io(GATHER_ERROR, e))?;

            if metadata.is_file() {
                let name = root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| root.display().to_string());
                push_unique(&mut seen, &mut files, &root, name)?;
                continue;
            }

            debug!("Walking {}", root.display());
            for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
                let entry = entry.map_err(classify_walk)?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                if is_hidden(relative) || !self.matcher.is_match(relative) {
                    trace!("Skipping {}", entry.path().display());
                    continue;
                }

                let name = relative.to_string_lossy().into_owned();
                push_unique(&mut seen, &mut files, entry.path(), name)?;
            }
        }

        debug!("Collected {} file(s)", files.len());
        Ok(files)
    }
}

fn compile(pattern: &str) -> std::result::Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

fn push_unique(
    seen: &mut HashSet<PathBuf>,
    files: &mut Vec<FileDescriptor>,
    path: &Path,
    name: String,
) -> Result<()> {
    let path = fs::canonicalize(path).map_err(|e| classify_io(GATHER_ERROR, e))?;
    if seen.insert(path.clone()) {
        files.push(FileDescriptor { path, name });
    } else {
        trace!("Skipping duplicate {}", path.display());
    }
    Ok(())
}

fn is_hidden(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

fn classify_walk(err: walkdir::Error) -> Error {
    let trace = format!("{err:?}");
    match err.into_io_error() {
        Some(io) => classify_io(GATHER_ERROR, io).into(),
        None => WrappedError::new(ErrorKind::ReadFile, GATHER_ERROR, &trace).into(),
    }
}
