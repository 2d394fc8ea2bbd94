//! Fused progress estimation for an opaque child process.
//!
//! Two signals feed one [`ProgressState`]: lines of tool output (which may
//! carry a percentage or an "X MB of Y GB" total) and periodic scans of the
//! directory the tool writes into. The scan gives the byte count, the text
//! gives the target, and together they give a percentage. Files are reported
//! as completed once their size holds still for two consecutive scans, since
//! the tool writes incrementally and a mid-write size looks just like a
//! finished one.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use regex::Regex;
use serde::Serialize;

use crate::fs_util;

/// Consecutive unchanged observations before a file counts as written.
pub const STABLE_SCANS: u8 = 2;
const STABLE_CAP: u8 = 10;
/// Ceiling while the child is still running.
pub const RUNNING_CEILING: u8 = 99;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = MIB * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Percent {
    Indeterminate,
    Known(u8),
}

impl Percent {
    pub const COMPLETE: Percent = Percent::Known(100);

    pub fn value(self) -> Option<u8> {
        match self {
            Percent::Indeterminate => None,
            Percent::Known(value) => Some(value),
        }
    }

    /// `floor(observed * 100 / expected)` clamped to `0..=99`.
    pub fn estimate(observed: u64, expected: Option<u64>) -> Percent {
        match expected {
            Some(expected) if expected > 0 => {
                let raw = u128::from(observed) * 100 / u128::from(expected);
                Percent::Known(raw.min(u128::from(RUNNING_CEILING)) as u8)
            }
            _ => Percent::Indeterminate,
        }
    }
}

/// What a single output line told us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineHint {
    pub percent: Option<u8>,
    pub expected_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default)]
struct Stability {
    last_size: u64,
    unchanged: u8,
}

#[derive(Debug, Default)]
pub struct ProgressState {
    observed_bytes: u64,
    expected_total_bytes: Option<u64>,
    completed: HashSet<PathBuf>,
    stability: HashMap<PathBuf, Stability>,
}

impl ProgressState {
    pub fn observed_bytes(&self) -> u64 {
        self.observed_bytes
    }

    pub fn expected_total_bytes(&self) -> Option<u64> {
        self.expected_total_bytes
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn percent(&self) -> Percent {
        Percent::estimate(self.observed_bytes, self.expected_total_bytes)
    }

    pub fn observe_line(&mut self, line: &str) -> LineHint {
        let hint = parse_line(line);
        if let Some(total) = hint.expected_total {
            if self.expected_total_bytes != Some(total) {
                tracing::debug!(total, "expected transfer size updated from tool output");
                self.expected_total_bytes = Some(total);
            }
        }
        hint
    }

    /// Applies one directory snapshot and returns the files that became
    /// complete with it.
    pub fn apply_scan(&mut self, snapshot: &[(PathBuf, u64)]) -> Vec<CompletedFile> {
        let mut newly_completed = Vec::new();
        let mut total = 0u64;
        for (path, size) in snapshot {
            let size = *size;
            total = total.saturating_add(size);
            let info = self.stability.entry(path.clone()).or_insert_with(|| Stability {
                last_size: size,
                unchanged: 0,
            });
            if info.last_size != size {
                info.last_size = size;
                info.unchanged = 0;
                continue;
            }
            info.unchanged = (info.unchanged + 1).min(STABLE_CAP);
            if info.unchanged >= STABLE_SCANS && self.completed.insert(path.clone()) {
                newly_completed.push(CompletedFile {
                    path: path.clone(),
                    size,
                });
            }
        }
        self.observed_bytes = total;
        newly_completed
    }
}

/// Thread-safe wrapper around one [`ProgressState`]. Every update holds the
/// lock for the whole state transition; filesystem reads happen outside it.
#[derive(Debug)]
pub struct ProgressEstimator {
    root: PathBuf,
    state: Mutex<ProgressState>,
}

impl ProgressEstimator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        // A panicking callback must not take the estimate down with it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn observe_line(&self, line: &str) -> LineHint {
        self.lock().observe_line(line)
    }

    /// Scans the target tree. `on_completed` runs once per file, the first
    /// time it is seen stable, after the lock is released.
    pub fn scan(&self, mut on_completed: impl FnMut(&CompletedFile)) -> usize {
        let snapshot = snapshot(&self.root);
        let completed = self.lock().apply_scan(&snapshot);
        for file in &completed {
            on_completed(file);
        }
        completed.len()
    }

    pub fn percent(&self) -> Percent {
        self.lock().percent()
    }

    pub fn observed_bytes(&self) -> u64 {
        self.lock().observed_bytes()
    }

    pub fn expected_total_bytes(&self) -> Option<u64> {
        self.lock().expected_total_bytes()
    }

    pub fn completed_count(&self) -> usize {
        self.lock().completed_count()
    }
}

/// File sizes under `root`; entries that cannot be read are left out.
fn snapshot(root: &Path) -> Vec<(PathBuf, u64)> {
    fs_util::walk_files_lenient(root)
        .into_iter()
        .filter_map(|path| match fs::metadata(&path) {
            Ok(meta) => Some((path, meta.len())),
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "skipping file during scan");
                None
            }
        })
        .collect()
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^\d])(\d{1,3})\s*%").expect("valid percent regex"))
}

fn size_of_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d[\d.,]*)\s*(MB|GB)\s+of\s+(\d[\d.,]*)\s*(MB|GB)")
            .expect("valid size regex")
    })
}

pub fn parse_line(line: &str) -> LineHint {
    let percent = percent_re()
        .captures(line)
        .and_then(|caps| caps[1].parse::<u16>().ok())
        .filter(|value| *value <= 100)
        .map(|value| value as u8);

    let expected_total = size_of_re()
        .captures(line)
        .and_then(|caps| to_bytes(&caps[3], &caps[4]));

    LineHint {
        percent,
        expected_total,
    }
}

fn to_bytes(value: &str, unit: &str) -> Option<u64> {
    let number = parse_decimal(value)?;
    let factor = if unit.eq_ignore_ascii_case("GB") { GIB } else { MIB };
    let bytes = number * factor;
    if !bytes.is_finite() || bytes < 0.0 {
        return None;
    }
    Some(bytes as u64)
}

/// Accepts `1.5`, `1,5`, `2,048` and `1,024.5`. A comma followed by groups
/// of exactly three digits is a thousands separator, otherwise a decimal one.
fn parse_decimal(value: &str) -> Option<f64> {
    let grouped = value
        .split(',')
        .skip(1)
        .all(|group| group.len() == 3 && group.chars().all(|ch| ch.is_ascii_digit()));
    let normalized = if value.contains('.') || grouped {
        value.replace(',', "")
    } else {
        value.replace(',', ".")
    };
    normalized.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percent_token() {
        assert_eq!(parse_line("Downloading... 42%").percent, Some(42));
        assert_eq!(parse_line("progress 100 %").percent, Some(100));
        assert_eq!(parse_line("weird 250%").percent, None);
        assert_eq!(parse_line("load 1000%").percent, None);
        assert_eq!(parse_line("42% done").percent, Some(42));
        assert_eq!(parse_line("no numbers here").percent, None);
    }

    #[test]
    fn parses_size_of_total() {
        let hint = parse_line("Downloaded 120 MB of 1.5 GB");
        assert_eq!(hint.expected_total, Some((1.5 * GIB) as u64));

        let hint = parse_line("12,5 mb of 300 mb");
        assert_eq!(hint.expected_total, Some(300 * 1024 * 1024));

        let hint = parse_line("1,024.5 MB of 2,048 MB");
        assert_eq!(hint.expected_total, Some(2048 * 1024 * 1024));
    }

    #[test]
    fn decimal_forms() {
        assert_eq!(parse_decimal("1.5"), Some(1.5));
        assert_eq!(parse_decimal("1,5"), Some(1.5));
        assert_eq!(parse_decimal("1,024.5"), Some(1024.5));
        assert_eq!(parse_decimal("2,048"), Some(2048.0));
        assert_eq!(parse_decimal("700"), Some(700.0));
        assert_eq!(parse_decimal("abc"), None);
    }
}
