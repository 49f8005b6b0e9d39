/// Default value size limit (1 MiB, as in memcached)
pub const DEFAULT_MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Largest value the store accepts, in bytes (default: 1 MiB)
    pub max_value_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

impl StorageConfig {
    /// Set the value size limit
    pub fn with_max_value_size(mut self, bytes: usize) -> Self {
        self.max_value_size = bytes;
        self
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(size) = std::env::var("BOLT_MAX_VALUE_SIZE") {
            match size.parse() {
                Ok(n) => config.max_value_size = n,
                Err(e) => log::warn!("Invalid BOLT_MAX_VALUE_SIZE '{}': {}", size, e),
            }
        }

        config
    }
}
