//! Compose file persistence
//!
//! Every write first copies the current file to a timestamped `.bak` sibling,
//! then replaces the file through a temp file in the same directory.

use super::document::ComposeDocument;
use super::parser::ComposeParser;
use crate::error::{FleetError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Timestamp format used in backup file names
const BACKUP_STAMP: &str = "%Y%m%d%H%M%S%3f";

/// Keeps a compose file and its in-memory model in step
#[derive(Debug, Clone)]
pub struct ComposeSync {
    path: PathBuf,
}

impl ComposeSync {
    /// Synchronizer for the compose file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Compose file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative paths in the file resolve against
    pub fn project_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Whether the file exists yet
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Load and validate the document
    pub async fn load(&self) -> Result<ComposeDocument> {
        let content = self.read_raw().await?;
        let document = ComposeParser::parse_str(&content)?;
        tracing::debug!(
            "Loaded {} with {} service(s)",
            self.path.display(),
            document.list_services().len()
        );
        Ok(document)
    }

    /// Raw file content
    pub async fn read_raw(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Serialize and persist `document`, returning the backup path if a
    /// previous file existed
    pub async fn save(&self, document: &ComposeDocument) -> Result<Option<PathBuf>> {
        let content = ComposeParser::to_yaml(document)?;
        let backup = self.backup().await?;
        self.write_atomic(content.as_bytes()).await?;
        tracing::info!("Saved {}", self.path.display());
        Ok(backup)
    }

    /// Validate `content` and persist it verbatim
    ///
    /// Nothing is written when validation fails.
    pub async fn save_raw(&self, content: &str) -> Result<(ComposeDocument, Option<PathBuf>)> {
        let document = ComposeParser::parse_str(content)?;
        let backup = self.backup().await?;
        self.write_atomic(content.as_bytes()).await?;
        tracing::info!("Saved raw edit to {}", self.path.display());
        Ok((document, backup))
    }

    /// Copy the current file to a new `<file>.<stamp>.bak` sibling
    ///
    /// Backups are created with create-new semantics and never overwritten.
    pub async fn backup(&self) -> Result<Option<PathBuf>> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(FleetError::Persistence {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let stamp = chrono::Local::now().format(BACKUP_STAMP).to_string();
        let base = format!("{}.{}", self.file_name(), stamp);
        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                format!("{}.bak", base)
            } else {
                format!("{}-{}.bak", base, suffix)
            };
            let path = self.project_dir().join(name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let written = async {
                        file.write_all(&content).await?;
                        file.sync_all().await
                    }
                    .await;
                    written.map_err(|source| FleetError::Persistence {
                        path: path.clone(),
                        source,
                    })?;
                    tracing::debug!("Backed up {} to {}", self.path.display(), path.display());
                    return Ok(Some(path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(source) => return Err(FleetError::Persistence { path, source }),
            }
        }
    }

    /// Backups of this file, oldest first
    pub async fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}.", self.file_name());
        let mut backups = Vec::new();
        let mut entries = fs::read_dir(self.project_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".bak") {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "docker-compose.yml".to_string())
    }

    /// Write through a temp file, fsync, then rename over the target
    async fn write_atomic(&self, content: &[u8]) -> Result<()> {
        let tmp = self.project_dir().join(format!(
            ".{}.{}.tmp",
            self.file_name(),
            uuid::Uuid::new_v4().simple()
        ));

        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(content).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(source) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(FleetError::Persistence {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }
}
