//! Local filesystem vault backend.

use crate::error::{VaultError, VaultResult};
use crate::traits::DocumentVault;
use async_trait::async_trait;
use bytes::Bytes;
use cofre_core::{FiscalUuid, Rfc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Filesystem vault storing `<root>/<RFC>/<UUID>.xml`.
pub struct FilesystemVault {
    root: PathBuf,
}

impl FilesystemVault {
    /// Create a new filesystem vault, creating the root if needed.
    pub async fn new(root: impl AsRef<Path>) -> VaultResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve the payload path for a key pair.
    ///
    /// Both components are validated newtypes (uppercase alphanumerics with
    /// fixed shapes), so the joined path cannot traverse outside the root;
    /// the debug assertion documents the invariant.
    fn payload_path(&self, owner: &Rfc, uuid: &FiscalUuid) -> PathBuf {
        let path = self
            .root
            .join(owner.as_str())
            .join(format!("{}.xml", uuid.as_str()));
        debug_assert!(path.starts_with(&self.root));
        path
    }
}

#[async_trait]
impl DocumentVault for FilesystemVault {
    #[instrument(skip(self, data), fields(owner = %owner, size = data.len()))]
    async fn put(&self, owner: &Rfc, uuid: &FiscalUuid, data: Bytes) -> VaultResult<String> {
        let path = self.payload_path(owner, uuid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a uniquely named temp file, fsync, then rename so a
        // failed write never leaves a partial payload behind.
        let temp_path = path.with_file_name(format!(".tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &path).await?;

        Ok(format!("{}/{}.xml", owner.as_str(), uuid.as_str()))
    }

    #[instrument(skip(self), fields(owner = %owner))]
    async fn get(&self, owner: &Rfc, uuid: &FiscalUuid) -> VaultResult<Bytes> {
        let path = self.payload_path(owner, uuid);
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::NotFound(uuid.to_string())
            } else {
                VaultError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(owner = %owner))]
    async fn exists(&self, owner: &Rfc, uuid: &FiscalUuid) -> VaultResult<bool> {
        let path = self.payload_path(owner, uuid);
        fs::try_exists(&path).await.map_err(VaultError::Io)
    }

    #[instrument(skip(self), fields(owner = %owner))]
    async fn delete(&self, owner: &Rfc, uuid: &FiscalUuid) -> VaultResult<()> {
        let path = self.payload_path(owner, uuid);
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::NotFound(uuid.to_string())
            } else {
                VaultError::Io(e)
            }
        })
    }

    #[instrument(skip(self), fields(owner = %owner))]
    async fn list(&self, owner: &Rfc) -> VaultResult<Vec<FiscalUuid>> {
        let dir = self.root.join(owner.as_str());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::Io(e)),
        };

        let mut uuids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".xml")
                && let Ok(uuid) = FiscalUuid::parse(stem)
            {
                uuids.push(uuid);
            }
        }
        uuids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(uuids)
    }
}
