//! Configuration types for sourcemod-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage layout configuration (content root and the directories under it)
///
/// Groups settings for where release trees, runtime snapshots, and the
/// database live. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Content root all managed files live under (default: "./downloads")
    #[serde(default = "default_content_root")]
    pub content_root: PathBuf,

    /// SQLite database path (default: "./sourcemod-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_root: default_content_root(),
            database_path: default_database_path(),
        }
    }
}

/// Fetch behavior configuration (timeouts, concurrency)
///
/// The fetcher itself never retries; at-least-once dispatch from the layer
/// above is safe because all write paths are idempotent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Bounded per-request timeout (default: 30 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Maximum concurrent artifact downloads per release (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            max_concurrent_downloads: default_max_concurrent(),
            user_agent: default_user_agent(),
        }
    }
}

/// One runtime build source (SourceMod, MetaMod, ...)
///
/// A plain configuration record instead of a downloader subclass per runtime:
/// the same [`RuntimeDownloader`](crate::runtime::RuntimeDownloader) handles
/// every entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeSource {
    /// Runtime name, used as the directory segment (e.g. "sourcemod")
    pub name: String,

    /// Version string of the build advertised upstream
    pub version: String,

    /// Download URL for the Windows build (zip)
    pub windows_url: String,

    /// Download URL for the Linux build (tar.gz)
    pub linux_url: String,
}

/// Main configuration for [`PluginDownloader`](crate::pipeline::PluginDownloader)
///
/// Sub-config fields are flattened for serialization, so the JSON/TOML format
/// stays flat (no nesting).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage layout settings
    #[serde(flatten)]
    pub storage: StorageConfig,

    /// Fetch behavior settings
    #[serde(flatten)]
    pub fetch: FetchConfig,

    /// Runtime build sources to mirror (may be empty)
    #[serde(default)]
    pub runtimes: Vec<RuntimeSource>,
}

// Convenience accessors — delegate to the sub-config structs.
impl Config {
    /// Content root directory
    pub fn content_root(&self) -> &PathBuf {
        &self.storage.content_root
    }

    /// Database path
    pub fn database_path(&self) -> &PathBuf {
        &self.storage.database_path
    }
}

fn default_content_root() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./sourcemod-dl.db")
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrent() -> usize {
    4
}

fn default_user_agent() -> String {
    format!("sourcemod-dl/{}", env!("CARGO_PKG_VERSION"))
}

/// Serde helper for Duration as seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
