//! Delivered-package unpacking.

use crate::error::{ClientError, ClientResult};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;
use zip::ZipArchive;

/// Unpacks the service's package archives into individual XML files.
///
/// Entries are isolated: a failed entry never leaves a partial file behind
/// and never aborts the rest of the archive. Non-XML entries (the service
/// sometimes includes metadata files) are skipped.
#[derive(Default)]
pub struct PackageUnpacker;

impl PackageUnpacker {
    pub fn new() -> Self {
        Self
    }

    /// Extract every XML entry of `archive_bytes` into `dest`, returning
    /// the written paths. Duplicate names overwrite rather than duplicate.
    pub async fn unpack(&self, archive_bytes: &[u8], dest: &Path) -> ClientResult<Vec<PathBuf>> {
        fs::create_dir_all(dest).await?;

        let mut archive = ZipArchive::new(Cursor::new(archive_bytes))
            .map_err(|e| ClientError::Package(format!("unreadable archive: {e}")))?;

        let mut written = Vec::new();
        for index in 0..archive.len() {
            let (name, contents) = {
                let mut entry = match archive.by_index(index) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(index, error = %e, "skipping unreadable archive entry");
                        continue;
                    }
                };
                if entry.is_dir() {
                    continue;
                }
                let Some(name) = entry
                    .enclosed_name()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                else {
                    warn!(index, "skipping entry with unsafe name");
                    continue;
                };
                if !name.to_ascii_lowercase().ends_with(".xml") {
                    debug!(name, "skipping non-XML entry");
                    continue;
                }
                let mut contents = Vec::with_capacity(entry.size() as usize);
                if let Err(e) = entry.read_to_end(&mut contents) {
                    warn!(name, error = %e, "skipping truncated archive entry");
                    continue;
                }
                (name, contents)
            };

            let path = dest.join(&name);
            match write_atomic(&path, &contents).await {
                Ok(()) => written.push(path),
                Err(e) => warn!(name, error = %e, "failed to write extracted entry"),
            }
        }
        Ok(written)
    }
}

/// Tempfile-then-rename so a failed write never leaves a partial file.
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_file_name(format!(".tmp.{}", Uuid::new_v4()));
    {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    fs::rename(&temp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            for (name, contents) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn extracts_only_xml_entries() {
        let temp = tempdir().unwrap();
        let archive = build_archive(&[
            ("A1.xml", b"<cfdi/>"),
            ("manifest.txt", b"metadata"),
            ("B2.XML", b"<cfdi/>"),
        ]);

        let unpacker = PackageUnpacker::new();
        let files = unpacker.unpack(&archive, temp.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["A1.xml", "B2.XML"]);
        assert!(!temp.path().join("manifest.txt").exists());
    }

    #[tokio::test]
    async fn repeated_unpack_overwrites_without_duplicates() {
        let temp = tempdir().unwrap();
        let archive = build_archive(&[("A1.xml", b"<cfdi/>")]);

        let unpacker = PackageUnpacker::new();
        unpacker.unpack(&archive, temp.path()).await.unwrap();
        unpacker.unpack(&archive, temp.path()).await.unwrap();

        let count = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn garbage_bytes_are_a_package_error() {
        let temp = tempdir().unwrap();
        let unpacker = PackageUnpacker::new();
        let err = unpacker.unpack(b"not a zip", temp.path()).await.unwrap_err();
        assert!(matches!(err, ClientError::Package(_)));
    }
}
