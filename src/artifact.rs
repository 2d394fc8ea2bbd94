use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::Serialize;

use crate::error::TransferError;
use crate::fs_util;

/// How an expected artifact came to be at its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// The tool wrote it where it was asked to.
    InPlace { path: PathBuf },
    /// The tool wrote it somewhere else and it was moved into place.
    Relocated { path: PathBuf, from: PathBuf },
}

impl Resolution {
    pub fn path(&self) -> &Path {
        match self {
            Resolution::InPlace { path } | Resolution::Relocated { path, .. } => path,
        }
    }
}

fn file_pattern(pattern: &str) -> Result<Pattern, TransferError> {
    Pattern::new(pattern)
        .map_err(|err| TransferError::Filesystem(format!("invalid search pattern `{pattern}`: {err}")))
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Makes sure `expected` exists. If the tool left its output elsewhere under
/// `search_root`, the largest file whose name matches `pattern` is moved to
/// `expected` (first in traversal order wins a tie).
pub fn resolve(
    search_root: &Path,
    expected: &Path,
    pattern: &str,
) -> Result<Resolution, TransferError> {
    if expected.is_file() {
        return Ok(Resolution::InPlace {
            path: expected.to_path_buf(),
        });
    }

    let matcher = file_pattern(pattern)?;
    let best = find_largest(search_root, &matcher)?.ok_or_else(|| {
        TransferError::ArtifactNotProduced {
            root: search_root.to_path_buf(),
            pattern: pattern.to_string(),
        }
    })?;

    tracing::info!(
        found = %best.display(),
        expected = %expected.display(),
        "artifact not at expected path, moving best match into place"
    );
    move_file(&best, expected)?;
    Ok(Resolution::Relocated {
        path: expected.to_path_buf(),
        from: best,
    })
}

/// Files under `root` whose name matches `pattern`, in traversal order.
pub fn find_matching(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, TransferError> {
    let matcher = file_pattern(pattern)?;
    Ok(fs_util::walk_files(root)?
        .into_iter()
        .filter(|path| name_matches(path, &matcher))
        .collect())
}

fn name_matches(path: &Path, matcher: &Pattern) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| matcher.matches_with(name, MATCH_OPTIONS))
        .unwrap_or(false)
}

fn find_largest(root: &Path, matcher: &Pattern) -> Result<Option<PathBuf>, TransferError> {
    let mut best: Option<(PathBuf, u64)> = None;
    for path in fs_util::walk_files(root)? {
        if !name_matches(&path, matcher) {
            continue;
        }
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot stat candidate artifact");
                continue;
            }
        };
        let better = match &best {
            Some((_, best_size)) => size > *best_size,
            None => true,
        };
        if better {
            best = Some((path, size));
        }
    }
    Ok(best.map(|(path, _)| path))
}

fn move_file(from: &Path, to: &Path) -> Result<(), TransferError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| TransferError::Filesystem(format!("create {}: {err}", parent.display())))?;
    }
    if to.exists() {
        fs::remove_file(to)
            .map_err(|err| TransferError::Filesystem(format!("remove {}: {err}", to.display())))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Different volume: copy, then drop the original.
    fs::copy(from, to).map_err(|err| {
        TransferError::Filesystem(format!("copy {} to {}: {err}", from.display(), to.display()))
    })?;
    fs::remove_file(from)
        .map_err(|err| TransferError::Filesystem(format!("remove {}: {err}", from.display())))
}
