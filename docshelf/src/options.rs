use crate::codec::Compression;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Strategy for ids generated by [`crate::Store::insert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

/// Per-store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Compressor for binary payloads. `None` means "none" when the store is
    /// created and "whatever was persisted" when it is reopened.
    pub compression: Option<Compression>,
    pub id_strategy: IdStrategy,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging for file databases.
    pub wal: bool,
    /// Rows fetched per round trip by lazy search cursors.
    pub cursor_batch_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            compression: None,
            id_strategy: IdStrategy::default(),
            busy_timeout_ms: 5_000,
            wal: true,
            cursor_batch_size: 256,
        }
    }
}

impl StoreOptions {
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn with_cursor_batch_size(mut self, size: usize) -> Self {
        self.cursor_batch_size = size.max(1);
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let options: StoreOptions = serde_yaml::from_str(content)?;
        Ok(options.normalized())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    fn normalized(mut self) -> Self {
        self.cursor_batch_size = self.cursor_batch_size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = StoreOptions::default();
        assert_eq!(options.compression, None);
        assert_eq!(options.id_strategy, IdStrategy::Ulid);
        assert!(options.wal);
    }

    #[test]
    fn test_from_yaml() {
        let options = StoreOptions::from_yaml_str(
            "compression: zstd\nid_strategy: nanoid\ncursor_batch_size: 0\n",
        )
        .unwrap();
        assert_eq!(options.compression, Some(Compression::Zstd));
        assert_eq!(options.id_strategy, IdStrategy::Nanoid);
        assert_eq!(options.cursor_batch_size, 1);
        assert_eq!(options.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_unknown_compression_rejected() {
        assert!(StoreOptions::from_yaml_str("compression: brotli").is_err());
    }

    #[test]
    fn test_generated_ids() {
        let ulid = IdStrategy::Ulid.generate();
        assert_eq!(ulid.len(), 26);
        assert_eq!(ulid, ulid.to_lowercase());
        assert_eq!(IdStrategy::Uuid.generate().len(), 36);
        assert_ne!(IdStrategy::Nanoid.generate(), IdStrategy::Nanoid.generate());
    }
}
