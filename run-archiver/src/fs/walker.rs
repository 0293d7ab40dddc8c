//! Directory traversal for checksumming and space accounting.
//!
//! Walks are depth-first and sorted by file name within each directory so
//! that listings come out in the same order on every run. Symbolic links are
//! never followed and never reported.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    /// Returns None for anything that is not a regular file.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let file_type = entry.file_type();
        if file_type.is_symlink() || !file_type.is_file() {
            return Ok(None);
        }

        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
        }))
    }
}

/// Walk a directory tree and collect all regular files
///
/// # Example
/// ```no_run
/// use run_archiver::fs::walker::walk_directory;
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("/results/analysis")).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory(root: &Path) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_directory_with_callback(root, |file| files.push(file.clone()))?;
    Ok(files)
}

/// Walk a directory tree with a callback for each regular file
pub fn walk_directory_with_callback<F>(root: &Path, mut callback: F) -> std::io::Result<()>
where
    F: FnMut(&FileInfo),
{
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            callback(&file_info);
        }
    }

    Ok(())
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    let mut total_size = 0u64;

    walk_directory_with_callback(root, |file| {
        total_size += file.size;
    })?;

    Ok(total_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_is_sorted_depth_first() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("b_dir"))?;
        fs::write(temp_dir.path().join("c.txt"), b"c")?;
        fs::write(temp_dir.path().join("a.txt"), b"a")?;
        fs::write(temp_dir.path().join("b_dir/z.txt"), b"z")?;
        fs::write(temp_dir.path().join("b_dir/y.txt"), b"y")?;

        let files = walk_directory(temp_dir.path())?;
        let names: Vec<String> = files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b_dir/y.txt", "b_dir/z.txt", "c.txt"]);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_skipped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("real.txt"), b"real")?;
        std::os::unix::fs::symlink("real.txt", temp_dir.path().join("link.txt"))?;
        std::os::unix::fs::symlink("missing.txt", temp_dir.path().join("dangling.txt"))?;
        fs::create_dir(temp_dir.path().join("sub"))?;
        std::os::unix::fs::symlink(temp_dir.path().join("sub"), temp_dir.path().join("sub_link"))?;

        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, PathBuf::from("real.txt"));
        Ok(())
    }

    #[test]
    fn test_calculate_total_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file1.txt"), b"12345")?;
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested/file2.txt"), b"1234567")?;

        let total = calculate_total_size(temp_dir.path())?;
        assert_eq!(total, 12);

        Ok(())
    }
}
