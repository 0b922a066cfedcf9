use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the node value cache lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `nodes.json`.
    #[serde(default = "d_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: d_cache_dir(),
        }
    }
}

fn d_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}
