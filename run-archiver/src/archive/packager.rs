//! Bundle creation and extraction.
//!
//! Members reach the packager through an intermediate list file, one JSON
//! object per line, so a manifest of any size is streamed rather than held
//! in an argument list.

use crate::manifest::ManifestEntry;
use crate::utils::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

/// Bundle compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[serde(rename = "none")]
    Uncompressed,
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub const fn extension(&self) -> &'static str {
        match self {
            Compression::Uncompressed => ".tar",
            Compression::Gzip => ".tar.gz",
            Compression::Zstd => ".tar.zst",
        }
    }

    /// Infer compression from a bundle file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();
        let name = name.strip_suffix(".partial").unwrap_or(&name);
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Compression::Gzip)
        } else if name.ends_with(".tar.zst") {
            Some(Compression::Zstd)
        } else if name.ends_with(".tar") {
            Some(Compression::Uncompressed)
        } else {
            None
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "tar" => Ok(Compression::Uncompressed),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(format!("unknown compression '{other}'")),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::Uncompressed => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        })
    }
}

/// One line of the member list file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMember {
    pub archive_path: PathBuf,
    pub source_path: PathBuf,
}

impl From<&ManifestEntry> for BundleMember {
    fn from(entry: &ManifestEntry) -> Self {
        Self {
            archive_path: entry.archive_path.clone(),
            source_path: entry.source_path.clone(),
        }
    }
}

/// Write the member list consumed by [`Packager::create`].
pub fn write_member_list<'a, I>(path: &Path, entries: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a ManifestEntry>,
{
    let file = File::create(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;

    for entry in entries {
        let line = serde_json::to_string(&BundleMember::from(entry))
            .map_err(|e| ArchiveError::Packaging(format!("member list: {}", e)))?;
        writeln!(writer, "{}", line).map_err(|e| ArchiveError::io(path, e))?;
        count += 1;
    }

    writer.flush().map_err(|e| ArchiveError::io(path, e))?;
    Ok(count)
}

/// Stream members back out of a list file.
pub fn read_member_list(path: &Path) -> Result<impl Iterator<Item = Result<BundleMember>>> {
    let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let path = path.to_path_buf();

    Ok(BufReader::new(file)
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(move |line| {
            let line = line.map_err(|e| ArchiveError::io(&path, e))?;
            serde_json::from_str(&line)
                .map_err(|e| ArchiveError::Packaging(format!("bad member list line: {}", e)))
        }))
}

/// Creates and unpacks bundles.
pub trait Packager: Send + Sync {
    /// File name suffix of bundles this packager writes
    fn extension(&self) -> &str;

    /// Write every member named in `list_file` into `bundle`. Returns the
    /// number of filesystem objects stored.
    fn create(&self, list_file: &Path, bundle: &Path, cancel: &CancellationToken)
        -> Result<usize>;

    /// Unpack `bundle` into `dest`.
    fn extract(&self, bundle: &Path, dest: &Path) -> Result<()>;
}

/// Tar packager with optional gzip or zstd compression.
#[derive(Debug, Clone)]
pub struct TarPackager {
    compression: Compression,
    level: i32,
}

impl TarPackager {
    pub fn new(compression: Compression, level: i32) -> Self {
        Self { compression, level }
    }

    fn append_members<W: Write>(
        &self,
        builder: &mut tar::Builder<W>,
        list_file: &Path,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut stored = 0usize;

        for member in read_member_list(list_file)? {
            let member = member?;
            let metadata = std::fs::symlink_metadata(&member.source_path)
                .map_err(|e| packaging_error(&member.source_path, e))?;

            if metadata.is_dir() {
                for entry in WalkDir::new(&member.source_path)
                    .follow_links(false)
                    .sort_by_file_name()
                {
                    if cancel.is_cancelled() {
                        return Err(ArchiveError::Cancelled);
                    }
                    let entry = entry.map_err(|e| {
                        ArchiveError::Packaging(format!("{}: {}", member.source_path.display(), e))
                    })?;
                    let relative = entry
                        .path()
                        .strip_prefix(&member.source_path)
                        .unwrap_or(entry.path());
                    let name = if relative.as_os_str().is_empty() {
                        member.archive_path.clone()
                    } else {
                        member.archive_path.join(relative)
                    };
                    builder
                        .append_path_with_name(entry.path(), &name)
                        .map_err(|e| packaging_error(entry.path(), e))?;
                    stored += 1;
                }
            } else {
                if cancel.is_cancelled() {
                    return Err(ArchiveError::Cancelled);
                }
                builder
                    .append_path_with_name(&member.source_path, &member.archive_path)
                    .map_err(|e| packaging_error(&member.source_path, e))?;
                stored += 1;
            }

            debug!(member = %member.archive_path.display(), "Packaged");
        }

        Ok(stored)
    }
}

fn packaging_error(path: &Path, e: impl fmt::Display) -> ArchiveError {
    ArchiveError::Packaging(format!("{}: {}", path.display(), e))
}

impl Packager for TarPackager {
    fn extension(&self) -> &str {
        self.compression.extension()
    }

    fn create(
        &self,
        list_file: &Path,
        bundle: &Path,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let file = File::create(bundle).map_err(|e| packaging_error(bundle, e))?;
        let writer = BufWriter::new(file);

        let (stored, writer) = match self.compression {
            Compression::Uncompressed => {
                let mut builder = tar::Builder::new(writer);
                builder.follow_symlinks(false);
                let stored = self.append_members(&mut builder, list_file, cancel)?;
                let writer = builder.into_inner().map_err(|e| packaging_error(bundle, e))?;
                (stored, writer)
            }
            Compression::Gzip => {
                let level = self.level.clamp(0, 9) as u32;
                let encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::new(level));
                let mut builder = tar::Builder::new(encoder);
                builder.follow_symlinks(false);
                let stored = self.append_members(&mut builder, list_file, cancel)?;
                let encoder = builder.into_inner().map_err(|e| packaging_error(bundle, e))?;
                (stored, encoder.finish().map_err(|e| packaging_error(bundle, e))?)
            }
            Compression::Zstd => {
                let encoder = zstd::Encoder::new(writer, self.level.clamp(1, 22))
                    .map_err(|e| packaging_error(bundle, e))?;
                let mut builder = tar::Builder::new(encoder);
                builder.follow_symlinks(false);
                let stored = self.append_members(&mut builder, list_file, cancel)?;
                let encoder = builder.into_inner().map_err(|e| packaging_error(bundle, e))?;
                (stored, encoder.finish().map_err(|e| packaging_error(bundle, e))?)
            }
        };

        let file = writer
            .into_inner()
            .map_err(|e| packaging_error(bundle, e.error()))?;
        file.sync_all().map_err(|e| packaging_error(bundle, e))?;

        Ok(stored)
    }

    fn extract(&self, bundle: &Path, dest: &Path) -> Result<()> {
        let corrupt = |e: std::io::Error| ArchiveError::Integrity {
            path: bundle.display().to_string(),
            expected: "readable bundle".to_string(),
            actual: e.to_string(),
            mismatches: 1,
        };

        let file = BufReader::new(File::open(bundle).map_err(|e| ArchiveError::io(bundle, e))?);
        let reader: Box<dyn Read> = match self.compression {
            Compression::Uncompressed => Box::new(file),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
            Compression::Zstd => Box::new(zstd::Decoder::with_buffer(file).map_err(corrupt)?),
        };

        tar::Archive::new(reader).unpack(dest).map_err(corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use std::fs;
    use tempfile::TempDir;

    fn source_tree() -> std::io::Result<TempDir> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("top.txt"), b"top")?;
        fs::create_dir_all(temp_dir.path().join("dir/nested"))?;
        fs::write(temp_dir.path().join("dir/nested/deep.txt"), b"deep")?;
        Ok(temp_dir)
    }

    #[test]
    fn test_compression_names() {
        assert_eq!(Compression::from_path(Path::new("R1.tar.gz")), Some(Compression::Gzip));
        assert_eq!(
            Compression::from_path(Path::new("R1.tar.zst.partial")),
            Some(Compression::Zstd)
        );
        assert_eq!(Compression::from_path(Path::new("R1.tar")), Some(Compression::Uncompressed));
        assert_eq!(Compression::from_path(Path::new("R1.zip")), None);
        assert_eq!("none".parse::<Compression>(), Ok(Compression::Uncompressed));
    }

    #[test]
    fn test_member_list_round_trip() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut manifest = Manifest::new("/runs/R1");
        manifest.push("a.txt");
        manifest.attach("checksum-listing", "/work/R1.checksum-listing");

        let list = temp_dir.path().join("members");
        assert_eq!(write_member_list(&list, manifest.entries()).unwrap(), 2);

        let members: Vec<BundleMember> = read_member_list(&list)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(members[0].source_path, PathBuf::from("/runs/R1/a.txt"));
        assert_eq!(members[1].archive_path, PathBuf::from("checksum-listing"));
        Ok(())
    }

    #[test]
    fn test_create_and_extract_each_compression() -> std::io::Result<()> {
        let source = source_tree()?;
        let work = TempDir::new()?;
        let manifest = Manifest::from_paths(source.path(), ["top.txt", "dir"]);
        let list = work.path().join("members");
        write_member_list(&list, manifest.entries()).unwrap();

        for compression in [Compression::Uncompressed, Compression::Gzip, Compression::Zstd] {
            let packager = TarPackager::new(compression, 3);
            let bundle = work.path().join(format!("bundle{}", packager.extension()));
            let stored = packager
                .create(&list, &bundle, &CancellationToken::new())
                .unwrap();
            // top.txt, dir, dir/nested, dir/nested/deep.txt
            assert_eq!(stored, 4);

            let out = work.path().join(format!("out-{compression}"));
            fs::create_dir(&out)?;
            packager.extract(&bundle, &out).unwrap();
            assert_eq!(fs::read(out.join("top.txt"))?, b"top");
            assert_eq!(fs::read(out.join("dir/nested/deep.txt"))?, b"deep");
        }
        Ok(())
    }

    #[test]
    fn test_extract_corrupt_bundle_is_integrity_failure() -> std::io::Result<()> {
        let work = TempDir::new()?;
        let bundle = work.path().join("bad.tar.gz");
        fs::write(&bundle, b"definitely not gzip")?;

        let err = TarPackager::new(Compression::Gzip, 6)
            .extract(&bundle, work.path())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Integrity { .. }));
        Ok(())
    }

    #[test]
    fn test_cancelled_create() -> std::io::Result<()> {
        let source = source_tree()?;
        let work = TempDir::new()?;
        let manifest = Manifest::from_paths(source.path(), ["top.txt"]);
        let list = work.path().join("members");
        write_member_list(&list, manifest.entries()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = TarPackager::new(Compression::Uncompressed, 0)
            .create(&list, &work.path().join("b.tar"), &cancel)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
        Ok(())
    }
}
