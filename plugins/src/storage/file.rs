//! Directory-backed storage: one JSON document per key, lease in a sidecar file.
//!
//! ```text
//! <root>/plan/<plan_id>.json
//! <root>/plan/<plan_id>.owner
//! <root>/checkpoint/<plan_id>/<checkpoint_id>.json
//! <root>/conversation/<conversation_id>.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conductor_core::api::{Storage, StorageError};
use tokio::sync::Mutex;

const VALUE_EXT: &str = "json";
const OWNER_EXT: &str = "owner";

pub struct FileStorage {
    root: PathBuf,
    /// Serialises lease checks with their writes inside this process. Across
    /// processes the sidecar is only ever created by [`FileStorage::claim_lease`].
    lease_lock: Mutex<()>,
}

impl FileStorage {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "file storage opened");
        Ok(Self {
            root,
            lease_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str, ext: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        let segments: Vec<&str> = key.split('/').collect();
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty()
                || *segment == "."
                || *segment == ".."
                || segment.contains(['\\', ':'])
            {
                return Err(StorageError::Backend(format!("invalid storage key '{key}'")));
            }
            if i + 1 == segments.len() {
                path.push(format!("{segment}.{ext}"));
            } else {
                path.push(segment);
            }
        }
        Ok(path)
    }

    async fn read_opt(path: &Path) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_opt(path: &Path) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temp file and rename, so readers never see a torn document.
    async fn write_atomic(path: &Path, contents: &str) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Publish `owner` as the lease holder unless a sidecar already exists.
    ///
    /// The owner id is written to a private file first and hard-linked into
    /// place. Linking fails when the target exists, so of several processes
    /// racing for a free lease exactly one wins, and readers never see a
    /// half-written sidecar. Returns whether this call took the lease.
    async fn claim_lease(owner_path: &Path, owner: &str) -> Result<bool, StorageError> {
        if let Some(parent) = owner_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staged = owner_path.with_extension(format!("claim-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staged, owner).await?;
        let linked = tokio::fs::hard_link(&staged, owner_path).await;
        let _ = tokio::fs::remove_file(&staged).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        if rel.extension()?.to_str()? != VALUE_EXT {
            return None;
        }
        let rel = rel.with_extension("");
        let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
        Some(parts?.join("/"))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Self::read_opt(&self.path_for(key, VALUE_EXT)?).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        Self::write_atomic(&self.path_for(key, VALUE_EXT)?, &value).await
    }

    async fn set_if_owner(
        &self,
        key: &str,
        value: String,
        owner: &str,
    ) -> Result<(), StorageError> {
        let value_path = self.path_for(key, VALUE_EXT)?;
        let owner_path = self.path_for(key, OWNER_EXT)?;

        let _guard = self.lease_lock.lock().await;
        loop {
            match Self::read_opt(&owner_path).await? {
                Some(holder) if holder.trim() == owner => break,
                Some(holder) => {
                    return Err(StorageError::OwnerMismatch {
                        key: key.to_string(),
                        holder: holder.trim().to_string(),
                    });
                }
                // Lost the race: re-read to learn who won.
                None => {
                    if Self::claim_lease(&owner_path, owner).await? {
                        break;
                    }
                }
            }
        }
        Self::write_atomic(&value_path, &value).await
    }

    async fn owner(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(Self::read_opt(&self.path_for(key, OWNER_EXT)?)
            .await?
            .map(|s| s.trim().to_string()))
    }

    async fn release_owner(&self, key: &str, owner: Option<&str>) -> Result<bool, StorageError> {
        let owner_path = self.path_for(key, OWNER_EXT)?;
        let _guard = self.lease_lock.lock().await;
        match (Self::read_opt(&owner_path).await?, owner) {
            (None, _) => Ok(false),
            (Some(holder), Some(owner)) if holder.trim() != owner => {
                Err(StorageError::OwnerMismatch {
                    key: key.to_string(),
                    holder: holder.trim().to_string(),
                })
            }
            _ => Self::remove_opt(&owner_path).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let _guard = self.lease_lock.lock().await;
        Self::remove_opt(&self.path_for(key, OWNER_EXT)?).await?;
        Self::remove_opt(&self.path_for(key, VALUE_EXT)?).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_of(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
