use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Serialisable options for a [`TableChain`](crate::data::chain::TableChain)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainOptions {
    /// Only these columns are activated (glob patterns allowed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,

    /// Columns deactivated after `allow` is applied
    pub deny: Vec<String>,

    /// Stop after this many accepted rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_events: Option<u64>,

    /// Read columns on first access instead of reading whole rows
    pub read_on_demand: bool,

    /// Columns read on every row even in on-demand mode
    pub always_read: Vec<String>,

    /// Skip columns of unsupported types instead of failing
    pub ignore_unsupported: bool,

    /// Seconds between throughput reports
    pub progress_interval_secs: u64,

    pub cache: CacheOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub enabled: bool,

    /// Read-ahead cache size in bytes
    pub size_bytes: u64,

    /// Rows used to learn which columns to cache
    pub learn_entries: u64,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            allow: None,
            deny: Vec::new(),
            max_events: None,
            read_on_demand: true,
            always_read: Vec::new(),
            ignore_unsupported: false,
            progress_interval_secs: 60,
            cache: CacheOptions::default(),
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            size_bytes: 30_000_000,
            learn_entries: 10,
        }
    }
}

impl ChainOptions {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid chain configuration")
    }

    /// Load options from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist
    pub fn load_default() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load(config_path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        Ok(())
    }

    /// Get the default config file path
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("tree-chain").join("config.toml"))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn with_allow<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.allow = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_deny<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.deny = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = Some(max_events);
        self
    }

    pub fn with_read_on_demand(mut self, read_on_demand: bool) -> Self {
        self.read_on_demand = read_on_demand;
        self
    }

    pub fn with_always_read<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.always_read = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ignore_unsupported(mut self, ignore: bool) -> Self {
        self.ignore_unsupported = ignore;
        self
    }

    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    /// Create a default config file with comments
    pub fn create_default_with_comments() -> String {
        r#"# tree-chain configuration
# Location: ~/.config/tree-chain/config.toml (Linux)

# Only activate these columns (glob patterns such as "jet_*" are allowed)
# allow = ["run", "jet_*"]

# Deactivate these columns after `allow` is applied
deny = []

# Stop after this many accepted rows
# max_events = 1000

# Read a column only when it is first accessed in a row
read_on_demand = true

# Columns read on every row even when reading on demand
always_read = []

# Skip columns of unsupported types instead of failing
ignore_unsupported = false

# Seconds between throughput reports
progress_interval_secs = 60

[cache]
enabled = false
size_bytes = 30000000
learn_entries = 10
"#
        .to_string()
    }
}
