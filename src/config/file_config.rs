use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub read_pool_size: Option<usize>,
    pub identity_cache_size: Option<usize>,
    pub leading_articles: Option<Vec<String>>,

    // Feature configs
    pub search: Option<SearchConfig>,
    pub maintainer: Option<MaintainerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum combined score for the resolver to accept a fuzzy match.
    pub acceptance_threshold: Option<f32>,
    /// How many artist candidates the resolver searches tracks under.
    pub artist_fan_out: Option<usize>,
    /// Trigram candidates re-scored with edit distance per query.
    pub refine_top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MaintainerConfig {
    pub batch_size: Option<usize>,
    pub coalesce_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
