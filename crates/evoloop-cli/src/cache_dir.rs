use crate::error::{CliError, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CACHE_FILE_NAME: &str = "embeddings.sqlite";

/// Where the representation cache lives when `--cache` is not given.
#[derive(Debug, Clone)]
pub struct CacheLocation {
    path: PathBuf,
}

impl CacheLocation {
    /// Resolves an explicit path, or the per-user cache directory.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        debug!("Representation cache location: {:?}", &path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn default_path() -> Result<PathBuf> {
        ProjectDirs::from("org", "evoloop", "evoloop")
            .map(|dirs| dirs.cache_dir().join(CACHE_FILE_NAME))
            .ok_or_else(|| {
                CliError::Config("Could not determine the default cache directory.".to_string())
            })
    }
}
