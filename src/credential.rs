use crate::error::Result;
use crate::settings::data_dir;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const CREDENTIAL_FILE: &str = "gemini_api_key.txt";

/// Durable home of the API key.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `None` when nothing usable is stored.
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, value: &str) -> Result<()>;
}

/// Single plain-text file, overwritten whole on save.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl Default for FileCredentialStore {
    fn default() -> Self {
        Self::new(data_dir().join(CREDENTIAL_FILE))
    }
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let key = contents.lines().next().unwrap_or_default().trim();
                if key.is_empty() {
                    Ok(None)
                } else {
                    log::info!("Loaded API key from {}", self.path.display());
                    Ok(Some(key.to_string()))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, value.trim()).await?;
        Ok(())
    }
}
