//! Local evidence check: is a work item already materialized on disk?
//!
//! Because `storage::publish` renames a temp file into place, presence of a
//! regular file at the final path is proof of a prior completed fetch. A
//! restarted worker uses this to skip re-downloading content that survived a
//! crash between "write file" and "record outcome".

use std::fs;
use std::path::Path;

/// Returns the on-disk size of `rel_path` under `data_dir` if a regular file
/// is present, `None` otherwise. In-progress `.part` files live at a
/// different path and never count as evidence.
pub fn local_size(data_dir: &Path, rel_path: &str) -> Option<u64> {
    let path = data_dir.join(rel_path);
    match fs::metadata(&path) {
        Ok(md) if md.is_file() => Some(md.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(local_size(dir.path(), "a/b/c.txt"), None);
    }

    #[test]
    fn present_file_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs/2019")).unwrap();
        fs::write(dir.path().join("docs/2019/report.pdf"), vec![0u8; 4096]).unwrap();
        assert_eq!(local_size(dir.path(), "docs/2019/report.pdf"), Some(4096));
    }

    #[test]
    fn directory_is_not_evidence() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        assert_eq!(local_size(dir.path(), "docs"), None);
    }

    #[test]
    fn part_file_is_not_evidence_for_final_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.bin.part"), b"partial").unwrap();
        assert_eq!(local_size(dir.path(), "x.bin"), None);
    }
}
