//! Configuration for the feed engine, loaded from a TOML file.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde but logged as warnings. A loaded
//! `Config` is inert until [`Config::validate`] turns it into an
//! [`EngineConfig`]; the engine only ever sees validated configuration.
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Settings are individually well-formed but contradict each other.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Columns every entry row already has; prefix columns may not shadow them.
const RESERVED_COLUMNS: [&str; 5] = ["id", "feed", "entry_id", "entry_body", "created_at"];

// ============================================================================
// Storage Layout
// ============================================================================

/// Checks that the delimiter and the prefix-to-column map agree.
///
/// A delimiter is required if and only if prefixed columns are configured:
/// a prefix map cannot be applied without a separator to split categories
/// on, and a delimiter with no columns has nothing to split for.
pub fn validate_layout(
    delimiter: &str,
    prefix_column_map: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    if !prefix_column_map.is_empty() && delimiter.is_empty() {
        return Err(ConfigError::Invalid(
            "prefix_column_map is set but delimiter is empty".to_string(),
        ));
    }
    if !delimiter.is_empty() && prefix_column_map.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "delimiter '{delimiter}' is set but prefix_column_map is empty"
        )));
    }

    for (prefix, column) in prefix_column_map {
        if prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "prefix_column_map contains an empty prefix".to_string(),
            ));
        }
        if prefix.contains(delimiter) {
            return Err(ConfigError::Invalid(format!(
                "prefix '{prefix}' contains the delimiter '{delimiter}'"
            )));
        }
        if !is_sql_identifier(column) {
            return Err(ConfigError::Invalid(format!(
                "column '{column}' for prefix '{prefix}' is not a plain identifier"
            )));
        }
        if RESERVED_COLUMNS
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(column))
        {
            return Err(ConfigError::Invalid(format!(
                "column '{column}' for prefix '{prefix}' shadows a built-in entry column"
            )));
        }
    }

    Ok(())
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// How prefixed categories map onto dedicated storage columns.
///
/// With delimiter `:` and `{"tid": "tenant_id"}`, the category `tid:1234`
/// is stored and filtered through the `tenant_id` column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageLayout {
    delimiter: String,
    prefix_columns: BTreeMap<String, String>,
}

impl StorageLayout {
    pub fn new(
        delimiter: impl Into<String>,
        prefix_columns: BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let delimiter = delimiter.into();
        validate_layout(&delimiter, &prefix_columns)?;
        Ok(Self {
            delimiter,
            prefix_columns,
        })
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Configured storage columns in a stable order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefix_columns
            .iter()
            .map(|(prefix, column)| (prefix.as_str(), column.as_str()))
    }

    /// Split a category term into its mapped column and value, if its
    /// prefix is configured.
    pub fn split<'a>(&self, term: &'a str) -> Option<(&str, &'a str)> {
        if self.delimiter.is_empty() {
            return None;
        }
        let (prefix, value) = term.split_once(self.delimiter.as_str())?;
        let column = self
            .prefix_columns
            .iter()
            .find(|(configured, _)| configured.eq_ignore_ascii_case(prefix))
            .map(|(_, column)| column.as_str())?;
        Some((column, value))
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Per-feed settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// Where the archived continuation of this feed lives.
    pub archive_url: Option<String>,
}

/// Top-level configuration as read from disk.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file backing the entry store.
    pub database_path: String,

    /// Separator between a category prefix and its value.
    pub delimiter: String,

    /// Category prefix → storage column.
    pub prefix_column_map: BTreeMap<String, String>,

    /// Page size used when a request does not carry one.
    pub default_page_size: usize,

    /// Largest page size a request may ask for.
    pub max_page_size: usize,

    /// Upper bound on a single storage query, in milliseconds.
    pub query_timeout_ms: u64,

    /// Absolute URL feeds are served under; links are built from it.
    pub base_url: String,

    /// Settings keyed by feed name (`"namespace/feed"`).
    pub feeds: HashMap<String, FeedSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedpager.db".to_string(),
            delimiter: String::new(),
            prefix_column_map: BTreeMap::new(),
            default_page_size: 25,
            max_page_size: 1000,
            query_timeout_ms: 5000,
            base_url: "http://localhost:8080/".to_string(),
            feeds: HashMap::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// Loading does not validate; call [`Config::validate`] before use.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "delimiter",
                "prefix_column_map",
                "default_page_size",
                "max_page_size",
                "query_timeout_ms",
                "base_url",
                "feeds",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            database = %config.database_path,
            prefix_columns = config.prefix_column_map.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Validate every cross-field invariant and freeze the result.
    ///
    /// This is the startup gate: an engine cannot be built from a config
    /// that fails here.
    pub fn validate(&self) -> Result<EngineConfig, ConfigError> {
        let layout = StorageLayout::new(self.delimiter.clone(), self.prefix_column_map.clone())?;

        if self.default_page_size == 0 {
            return Err(ConfigError::Invalid(
                "default_page_size must be greater than zero".to_string(),
            ));
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "default_page_size ({}) exceeds max_page_size ({})",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "query_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let base_url = parse_base_url(&self.base_url)?;

        let mut archives = HashMap::new();
        for (feed, settings) in &self.feeds {
            if let Some(raw) = &settings.archive_url {
                let url = Url::parse(raw).map_err(|e| {
                    ConfigError::Invalid(format!("archive_url for feed '{feed}': {e}"))
                })?;
                archives.insert(feed.clone(), url);
            }
        }

        Ok(EngineConfig {
            layout,
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            base_url,
            archives,
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    // Url::join replaces the last path segment unless the base ends in '/'
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&normalized)
        .map_err(|e| ConfigError::Invalid(format!("base_url '{raw}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::Invalid(format!(
            "base_url '{raw}' cannot be used as a base for feed links"
        )));
    }
    Ok(url)
}

/// Validated, immutable engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    layout: StorageLayout,
    default_page_size: usize,
    max_page_size: usize,
    query_timeout: Duration,
    base_url: Url,
    archives: HashMap<String, Url>,
}

impl EngineConfig {
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn default_page_size(&self) -> usize {
        self.default_page_size
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn archive_url(&self, feed: &str) -> Option<&Url> {
        self.archives.get(feed)
    }
}

// ============================================================================
// Tests
// ============================================================================
