//! Guards for files the binaries write.
//!
//! A typo in `--stats` or `--output` must never clobber the record database
//! or the analysis input.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Extensions of files that are only ever read by these tools.
const PROTECTED_EXTENSIONS: &[&str] = &["sqlite", "sqlite3", "db"];

fn resolved(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Validate that `output` is safe to create or overwrite.
///
/// The output must be a `.json` file and must not resolve to any of the
/// `source_paths`.
pub fn validate_output_path(output: &Path, source_paths: &[&Path]) -> Result<()> {
    let ext = output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if PROTECTED_EXTENSIONS.contains(&ext.as_str()) {
        bail!(
            "Safety check failed: refusing to write over database file '{}'",
            output.display()
        );
    }
    if ext != "json" {
        bail!(
            "Safety check failed: output '{}' must have a .json extension",
            output.display()
        );
    }

    let target = resolved(output);
    for source in source_paths {
        if output == *source || target == resolved(source) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_json_output() {
        let output = PathBuf::from("/tmp/reconcile-stats.json");
        let db = PathBuf::from("/data/records.sqlite3");
        assert!(validate_output_path(&output, &[&db]).is_ok());
    }

    #[test]
    fn test_database_extension_blocked() {
        let output = PathBuf::from("/tmp/records.sqlite3");
        let err = validate_output_path(&output, &[]).unwrap_err();
        assert!(err.to_string().contains("database file"));
    }

    #[test]
    fn test_non_json_blocked() {
        let err = validate_output_path(Path::new("/tmp/out.txt"), &[]).unwrap_err();
        assert!(err.to_string().contains(".json"));
    }

    #[test]
    fn test_output_equals_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sets.json");
        std::fs::write(&input, "[]").unwrap();
        // Same file through a different spelling
        let aliased = dir.path().join(".").join("sets.json");
        let err = validate_output_path(&aliased, &[&input]).unwrap_err();
        assert!(err.to_string().contains("cannot be the same as source"));
    }
}
