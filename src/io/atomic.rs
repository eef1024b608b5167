//! Whole-file replacement via temp file + rename.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::AppError;

/// Write `path` through `fill`, replacing any previous file in one rename.
///
/// If `fill` fails the temp file is discarded and `path` is left as it was.
pub fn replace_file<F>(path: &Path, fill: F) -> Result<(), AppError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), AppError>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .map_err(|e| AppError::config(format!("Failed to create directory '{}': {e}", dir.display())))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| AppError::config(format!("Failed to create temp file in '{}': {e}", dir.display())))?;

    fill(&mut tmp)?;

    tmp.flush()
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| AppError::config(format!("Failed to flush '{}': {e}", path.display())))?;
    tmp.persist(path)
        .map_err(|e| AppError::config(format!("Failed to replace '{}': {}", path.display(), e.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_fill_keeps_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "old").unwrap();

        let err = replace_file(&path, |w| {
            w.write_all(b"partial").unwrap();
            Err(AppError::config("nope"))
        });
        assert!(err.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        // Only the original file remains in the directory.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/f.txt");
        replace_file(&path, |w| {
            w.write_all(b"new").map_err(|e| AppError::config(e.to_string()))
        })
        .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }
}
