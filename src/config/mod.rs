mod file_config;

pub use file_config::{FileConfig, MaintainerConfig, SearchConfig};

use crate::error::{LibraryError, LibraryResult};
use crate::normalize::{Normalizer, DEFAULT_LEADING_ARTICLES};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_READ_POOL_SIZE: usize = 4;
pub const DEFAULT_IDENTITY_CACHE_SIZE: usize = 64;
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.45;
pub const DEFAULT_ARTIST_FAN_OUT: usize = 3;
pub const DEFAULT_REFINE_TOP_K: usize = 64;
pub const DEFAULT_MAINTAINER_BATCH_SIZE: usize = 512;
pub const DEFAULT_MAINTAINER_COALESCE_MS: u64 = 50;

/// CLI arguments that can be used for config resolution.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub read_pool_size: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub db_path: PathBuf,
    pub read_pool_size: usize,
    /// Capacity of each per-kind most-recently-resolved cache.
    pub identity_cache_size: usize,
    pub leading_articles: Vec<String>,
    pub acceptance_threshold: f32,
    pub artist_fan_out: usize,
    pub refine_top_k: usize,
    pub maintainer_batch_size: usize,
    pub maintainer_coalesce_ms: u64,
}

impl LibraryConfig {
    /// Defaults for everything but the database location.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            identity_cache_size: DEFAULT_IDENTITY_CACHE_SIZE,
            leading_articles: DEFAULT_LEADING_ARTICLES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            artist_fan_out: DEFAULT_ARTIST_FAN_OUT,
            refine_top_k: DEFAULT_REFINE_TOP_K,
            maintainer_batch_size: DEFAULT_MAINTAINER_BATCH_SIZE,
            maintainer_coalesce_ms: DEFAULT_MAINTAINER_COALESCE_MS,
        }
    }

    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> LibraryResult<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                LibraryError::Config(
                    "db_path must be specified on the command line or in config file".to_string(),
                )
            })?;

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(LibraryError::Config(format!(
                    "Database directory does not exist: {:?}",
                    parent
                )));
            }
        }

        let mut config = LibraryConfig::new(db_path);
        config.read_pool_size = file.read_pool_size.unwrap_or(cli.read_pool_size);
        if let Some(size) = file.identity_cache_size {
            config.identity_cache_size = size;
        }
        if let Some(articles) = file.leading_articles {
            config.leading_articles = articles;
        }

        let search = file.search.unwrap_or_default();
        if let Some(threshold) = search.acceptance_threshold {
            config.acceptance_threshold = threshold;
        }
        if let Some(fan_out) = search.artist_fan_out {
            config.artist_fan_out = fan_out;
        }
        if let Some(top_k) = search.refine_top_k {
            config.refine_top_k = top_k;
        }

        let maintainer = file.maintainer.unwrap_or_default();
        if let Some(batch_size) = maintainer.batch_size {
            config.maintainer_batch_size = batch_size;
        }
        if let Some(coalesce_ms) = maintainer.coalesce_ms {
            config.maintainer_coalesce_ms = coalesce_ms;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LibraryResult<()> {
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(LibraryError::Config(format!(
                "acceptance_threshold must be within [0, 1], got {}",
                self.acceptance_threshold
            )));
        }
        if self.artist_fan_out == 0 {
            return Err(LibraryError::Config(
                "artist_fan_out must be at least 1".to_string(),
            ));
        }
        if self.read_pool_size == 0 {
            return Err(LibraryError::Config(
                "read_pool_size must be at least 1".to_string(),
            ));
        }
        if self.refine_top_k == 0 {
            return Err(LibraryError::Config(
                "refine_top_k must be at least 1".to_string(),
            ));
        }
        if self.maintainer_batch_size == 0 {
            return Err(LibraryError::Config(
                "maintainer batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(&self.leading_articles)
    }

    pub fn maintainer_coalesce_window(&self) -> Duration {
        Duration::from_millis(self.maintainer_coalesce_ms)
    }
}
