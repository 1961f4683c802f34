//! Content fingerprinting of task inputs
//!
//! A fingerprint is a blake3 digest over the declared input patterns and,
//! for every matched file in sorted path order, the file's path and
//! contents. Unchanged digest means unchanged inputs; a task with no
//! declared inputs has no fingerprint and is always considered stale.

use crate::error::Result;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Content-derived digest of a task's declared inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_hex(hex: String) -> Self {
        Self(hex)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The collapsed form of a recursive pattern, so `src/**/*.ts` also covers
/// `src/a.ts` (glob treats `**` as one-or-more components in places).
pub(crate) fn zero_depth_variant(pattern: &str) -> Option<String> {
    pattern.contains("**/").then(|| pattern.replace("**/", ""))
}

/// Expand glob patterns beneath `root` into a sorted file list.
///
/// Used for input fingerprinting, action contexts, and declared-output
/// matching. Invalid patterns and unreadable directories are logged and
/// skipped so a typo in one pattern never takes down the run.
pub fn resolve_patterns(root: &Path, patterns: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for pattern in patterns {
        let mut forms = vec![pattern.clone()];
        if let Some(collapsed) = zero_depth_variant(pattern) {
            forms.push(collapsed);
        }

        for form in forms {
            let full = root.join(&form);
            let pattern_str = full.to_string_lossy();

            match glob::glob(&pattern_str) {
                Ok(paths) => {
                    for entry in paths {
                        match entry {
                            Ok(path) if path.is_file() => files.push(path),
                            Ok(_) => {} // directories match globs but carry no content
                            Err(e) => warn!("Unreadable path under pattern '{}': {}", pattern, e),
                        }
                    }
                }
                Err(e) => warn!("Invalid glob pattern '{}': {}", pattern, e),
            }
        }
    }

    files.sort();
    files.dedup();
    files
}

/// Compute the fingerprint of a task's inputs, or `None` when the task
/// declares none.
pub fn fingerprint_inputs(root: &Path, patterns: &[String]) -> Result<Option<Fingerprint>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut hasher = blake3::Hasher::new();
    for pattern in patterns {
        hasher.update(pattern.as_bytes());
        hasher.update(b"\0");
    }

    for path in resolve_patterns(root, patterns) {
        let relative = path.strip_prefix(root).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");

        match fs::read(&path) {
            Ok(contents) => {
                hasher.update(&contents);
            }
            Err(e) => {
                // A file that vanished mid-walk hashes as unreadable, which
                // keeps the task stale until the tree settles.
                warn!("Could not read input '{}': {}", path.display(), e);
                hasher.update(b"!unreadable");
            }
        }
        hasher.update(b"\0");
    }

    Ok(Some(Fingerprint(hasher.finalize().to_hex().to_string())))
}
