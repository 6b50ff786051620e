//! Recognized options and startup validation.

/// Updates accumulated before a read triggers compaction.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 200;
/// Table holding all documents unless overridden.
pub const DEFAULT_TABLE_NAME: &str = "ylog_updates";

/// Invalid option values, rejected before any storage work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `flush_threshold` must be at least 1.
    InvalidFlushThreshold(usize),
    /// `table_name` must be non-empty `[A-Za-z0-9_]+` since it is
    /// interpolated into SQL statements.
    InvalidTableName(String),
}

/// Persistence options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stored updates per document tolerated before a materializing read
    /// compacts them into one full-state record. Default 200.
    pub flush_threshold: usize,
    /// Name of the table where all documents are stored.
    pub table_name: String,
    /// Whether to create a secondary index on the document name at
    /// bootstrap. Trades write latency for read latency.
    pub use_index: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            use_index: false,
        }
    }
}

impl Config {
    /// Checks option values, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_threshold == 0 {
            return Err(ConfigError::InvalidFlushThreshold(self.flush_threshold));
        }
        if self.table_name.is_empty()
            || !self
                .table_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(ConfigError::InvalidTableName(self.table_name.clone()));
        }
        Ok(())
    }
}
