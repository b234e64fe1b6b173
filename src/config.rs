/// Chunking limits the persistence layer honors when writing a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Rows per multi-row INSERT statement.
    pub insert_chunk_size: usize,
    /// UPDATE statements in flight at once.
    pub update_concurrency: usize,
}

pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_UPDATE_CONCURRENCY: usize = 100;

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
            update_concurrency: DEFAULT_UPDATE_CONCURRENCY,
        }
    }
}

impl BatchConfig {
    pub fn new(insert_chunk_size: usize, update_concurrency: usize) -> Self {
        Self {
            insert_chunk_size,
            update_concurrency,
        }
        .normalized()
    }

    /// Zero-sized chunks are bumped to one.
    pub fn normalized(self) -> Self {
        Self {
            insert_chunk_size: self.insert_chunk_size.max(1),
            update_concurrency: self.update_concurrency.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_limits() {
        let config = BatchConfig::default();
        assert_eq!(config.insert_chunk_size, 500);
        assert_eq!(config.update_concurrency, 100);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let config = BatchConfig::new(0, 0);
        assert_eq!(config, BatchConfig::new(1, 1));
    }
}
