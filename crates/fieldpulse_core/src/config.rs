//! Configuration for the position journal.

/// Configuration for [`crate::JournalQueue`].
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Whether to flush and sync after every record.
    pub sync_on_write: bool,
    /// Number of dead records (deleted inserts plus their delete records)
    /// after which the journal is rewritten.
    pub compact_threshold: usize,
}

impl JournalConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            sync_on_write: true,
            compact_threshold: 256,
        }
    }

    /// Sets whether every record is synced to disk.
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the compaction threshold.
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_config_builder() {
        let config = JournalConfig::default()
            .with_sync_on_write(false)
            .with_compact_threshold(8);

        assert!(!config.sync_on_write);
        assert_eq!(config.compact_threshold, 8);
        assert!(JournalConfig::new().sync_on_write);
    }
}
