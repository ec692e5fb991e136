//! Repository selection from configuration

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use super::{FileRuntimeRepository, RuntimeRepository, SqliteRuntimeRepository};
use crate::{Error, Result};

/// Environment variable naming the store, e.g. `file:./data` or `sqlite:runtrace.db`
pub const STORE_ENV: &str = "RUNTRACE_STORE";

const DEFAULT_FILE_ROOT: &str = ".runtrace-data";

/// Which backend to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryConfig {
    /// Directory-per-execution JSON documents
    File { root: PathBuf },
    /// SQLite database, given as an sqlx connection URL
    Sqlite { url: String },
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::File {
            root: PathBuf::from(DEFAULT_FILE_ROOT),
        }
    }
}

impl RepositoryConfig {
    /// Read [`STORE_ENV`], falling back to the default file store
    pub fn from_env() -> Result<Self> {
        match std::env::var(STORE_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Self::parse(raw.trim()),
            _ => Ok(Self::default()),
        }
    }

    /// Parse `file:<dir>` or `sqlite:<path>` (`sqlite::memory:` included)
    pub fn parse(value: &str) -> Result<Self> {
        if let Some(root) = value.strip_prefix("file:") {
            if root.is_empty() {
                return Err(Error::InvalidInput("file store needs a directory".into()));
            }
            return Ok(Self::File {
                root: PathBuf::from(root),
            });
        }
        if value.starts_with("sqlite:") {
            return Ok(Self::Sqlite {
                url: value.to_string(),
            });
        }
        Err(Error::InvalidInput(format!(
            "Unknown store {:?}, expected file:<dir> or sqlite:<path>",
            value
        )))
    }

    /// Open the configured backend
    pub async fn open(&self) -> Result<Arc<dyn RuntimeRepository>> {
        match self {
            Self::File { root } => {
                info!("Using file repository at {}", root.display());
                Ok(Arc::new(FileRuntimeRepository::new(root.clone()).await?))
            }
            Self::Sqlite { url } => {
                info!("Using SQLite repository at {}", url);
                Ok(Arc::new(SqliteRuntimeRepository::new(url).await?))
            }
        }
    }
}
