//! Disk I/O for fetched bodies: atomic publish under the data root.
//!
//! Writes the full body to `<final>.part`, syncs, then renames into place.
//! A crash mid-write leaves only the `.part` file, so the evidence check
//! never mistakes a truncated write for a completed fetch.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Writes `bytes` for `rel_path` under `data_dir`, creating intermediate
/// directories as needed. The body lands at a `.part` path first and is
/// renamed to the final path only after a successful sync, so the final path
/// either holds a complete body or nothing. Returns the final path.
pub fn publish(data_dir: &Path, rel_path: &str, bytes: &[u8]) -> Result<PathBuf> {
    let final_path = data_dir.join(rel_path);
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let tmp = temp_path(&final_path);
    let mut file = File::create(&tmp)
        .with_context(|| format!("failed to create temp file: {}", tmp.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write temp file: {}", tmp.display()))?;
    file.sync_all().context("temp file sync failed")?;
    drop(file);

    fs::rename(&tmp, &final_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            tmp.display(),
            final_path.display()
        )
    })?;
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_part() {
        let p = temp_path(Path::new("docs/report.pdf"));
        assert_eq!(p.to_string_lossy(), "docs/report.pdf.part");
    }

    #[test]
    fn publish_creates_dirs_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = publish(dir.path(), "a/b/c.bin", b"hello world").unwrap();

        assert_eq!(final_path, dir.path().join("a/b/c.bin"));
        assert_eq!(fs::read(&final_path).unwrap(), b"hello world");
        assert!(!temp_path(&final_path).exists());
    }

    #[test]
    fn publish_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "f.txt", b"old").unwrap();
        publish(dir.path(), "f.txt", b"newer content").unwrap();
        assert_eq!(fs::read(dir.path().join("f.txt")).unwrap(), b"newer content");
    }

    #[test]
    fn publish_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let p = publish(dir.path(), "empty.bin", b"").unwrap();
        assert_eq!(fs::metadata(&p).unwrap().len(), 0);
    }
}
