// # File Registry Store
//
// File-based implementation of RegistryStore with crash recovery.
//
// ## Purpose
//
// Persists the device registry across daemon restarts and crashes, and is
// shared with one-shot operator invocations running as separate processes.
//
// ## Crash Recovery
//
// - Atomic writes: temp file, fsync, then rename over the registry
// - Backup: every successful write is mirrored to `<name>.backup`, so the
//   backup always equals the last good save
// - Recovery: a registry that fails to parse is restored from the backup
// - No silent reset: if the backup is unusable or empty, loading fails
//   instead of returning an empty registry (which would re-trigger the
//   bootstrap trust policy)
//
// ## Exclusion
//
// `lease()` takes an advisory exclusive lock on `<name>.lock`, serializing
// load-modify-save cycles between the daemon and operator commands.
//
// ## File Format
//
// ```json
// {
//   "aa:bb:cc:dd:ee:01": {
//     "ip": "10.0.0.5",
//     "name": "laptop",
//     "status": "approved",
//     "timestamp": "2025-01-09T12:00:00.000000"
//   }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::model::Registry;
use crate::traits::registry_store::{RegistryStore, StoreLease};

/// Archive file timestamp layout (`whitelist_20250109_120000.json`)
const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File-based registry store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use guardian_core::store::FileRegistryStore;
/// use guardian_core::traits::RegistryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileRegistryStore::new("/var/lib/guardian/whitelist.json").await?;
///
///     let registry = store.load().await?;
///     store.save(&registry).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileRegistryStore {
    path: PathBuf,
    archive_dir: PathBuf,
}

impl FileRegistryStore {
    /// Open a file registry store
    ///
    /// Creates the parent directory if needed. Archives go to a `backups`
    /// directory next to the registry unless overridden with
    /// [`FileRegistryStore::with_archive_dir`].
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create registry directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let archive_dir = path
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"));

        Ok(Self { path, archive_dir })
    }

    /// Use a different directory for reset-all archives
    pub fn with_archive_dir(mut self, archive_dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = archive_dir.into();
        self
    }

    /// Path of the registry file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry, recovering from the backup if the file is corrupt
    async fn load_with_recovery(&self) -> Result<Registry, Error> {
        match Self::load_file(&self.path).await {
            Ok(registry) => {
                tracing::debug!("Loaded registry: {} devices", registry.len());
                Ok(registry)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Registry file {} appears corrupted: {}. Attempting recovery from backup.",
                    self.path.display(),
                    e
                );

                let backup_path = Self::backup_path(&self.path);
                if !backup_path.exists() {
                    return Err(Error::persistence(format!(
                        "Registry file {} is corrupted and no backup exists: {}",
                        self.path.display(),
                        e
                    )));
                }

                let registry = Self::load_file(&backup_path).await.map_err(|backup_err| {
                    Error::persistence(format!(
                        "Registry file {} is corrupted ({}) and backup is unusable ({})",
                        self.path.display(),
                        e,
                        backup_err
                    ))
                })?;

                if registry.is_empty() {
                    return Err(Error::persistence(format!(
                        "Registry file {} is corrupted ({}) and its backup is empty",
                        self.path.display(),
                        e
                    )));
                }

                tracing::info!("Recovered registry from backup: {} devices", registry.len());
                if let Err(restore_err) = fs::copy(&backup_path, &self.path).await {
                    tracing::error!("Failed to restore registry file from backup: {}", restore_err);
                }
                Ok(registry)
            }
            Err(e) => Err(e),
        }
    }

    /// Read and parse one registry file; a missing file is an empty registry
    async fn load_file(path: &Path) -> Result<Registry, Error> {
        if !path.exists() {
            tracing::debug!("Registry file does not exist: {}", path.display());
            return Ok(Registry::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::persistence(format!("Failed to read registry file {}: {}", path.display(), e))
        })?;

        if content.trim().is_empty() {
            return Ok(Registry::new());
        }

        Registry::from_json(&content)
    }

    /// Write content to the registry path atomically, then mirror it to the backup
    async fn write_atomic(&self, content: &str) -> Result<(), Error> {
        write_replacing(&self.path, &self.temp_path(), content).await?;
        tracing::trace!("Registry written to file: {}", self.path.display());

        let backup_path = Self::backup_path(&self.path);
        let mut backup_temp = self.path.clone();
        backup_temp.set_extension("backup.tmp");
        if let Err(e) = write_replacing(&backup_path, &backup_temp, content).await {
            tracing::warn!("Failed to refresh registry backup: {}", e);
            // A stale backup would resurrect an older snapshot on recovery
            if let Err(rm_err) = fs::remove_file(&backup_path).await
                && rm_err.kind() != std::io::ErrorKind::NotFound
            {
                tracing::error!(
                    "Failed to remove stale backup {}: {}",
                    backup_path.display(),
                    rm_err
                );
            }
        }

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn lock_path(&self) -> PathBuf {
        let mut lock = self.path.clone();
        lock.set_extension("lock");
        lock
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    fn archive_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "registry".to_string());
        let stamp = chrono::Local::now().format(ARCHIVE_TIMESTAMP_FORMAT);
        self.archive_dir.join(format!("{}_{}.json", stem, stamp))
    }
}

/// Write `content` to `temp_path`, fsync, and rename it over `target`
async fn write_replacing(target: &Path, temp_path: &Path, content: &str) -> Result<(), Error> {
    {
        let mut file = fs::File::create(temp_path).await.map_err(|e| {
            Error::persistence(format!("Failed to create temp file {}: {}", temp_path.display(), e))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            Error::persistence(format!("Failed to write to temp file {}: {}", temp_path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            Error::persistence(format!("Failed to sync temp file {}: {}", temp_path.display(), e))
        })?;
    }

    fs::rename(temp_path, target).await.map_err(|e| {
        Error::persistence(format!(
            "Failed to rename {} to {}: {}",
            temp_path.display(),
            target.display(),
            e
        ))
    })
}

#[async_trait]
impl RegistryStore for FileRegistryStore {
    async fn load(&self) -> Result<Registry, Error> {
        self.load_with_recovery().await.map_err(|e| match e {
            Error::Json(parse_err) => Error::persistence(format!(
                "Failed to parse registry file {}: {}",
                self.path.display(),
                parse_err
            )),
            other => other,
        })
    }

    async fn save(&self, registry: &Registry) -> Result<(), Error> {
        let json = registry
            .to_json_pretty()
            .map_err(|e| Error::persistence(format!("Failed to serialize registry: {}", e)))?;
        self.write_atomic(&json).await
    }

    async fn archive(&self) -> Result<Option<PathBuf>, Error> {
        let archived = if self.path.exists() {
            fs::create_dir_all(&self.archive_dir).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create archive directory {}: {}",
                    self.archive_dir.display(),
                    e
                ))
            })?;

            let archive_path = self.archive_path();
            fs::copy(&self.path, &archive_path).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to archive registry to {}: {}",
                    archive_path.display(),
                    e
                ))
            })?;
            tracing::info!("Archived registry to {}", archive_path.display());
            Some(archive_path)
        } else {
            None
        };

        self.save(&Registry::new()).await?;
        Ok(archived)
    }

    #[cfg(unix)]
    async fn lease(&self) -> Result<StoreLease, Error> {
        use nix::fcntl::{Flock, FlockArg};

        let lock_path = self.lock_path();
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .await
            .map_err(|e| {
                Error::persistence(format!("Failed to open lock file {}: {}", lock_path.display(), e))
            })?
            .into_std()
            .await;

        let lock = tokio::task::spawn_blocking(move || Flock::lock(file, FlockArg::LockExclusive))
            .await
            .map_err(|e| Error::persistence(format!("Registry lock task failed: {}", e)))?
            .map_err(|(_, errno)| {
                Error::persistence(format!("Failed to lock {}: {}", lock_path.display(), errno))
            })?;

        Ok(Box::new(lock))
    }
}
