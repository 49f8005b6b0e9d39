/// Sequencer configuration
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Capacity of the backfill queue (default: 1024)
    pub backfill_queue_capacity: usize,
    /// Capacity of the realtime queue (default: 8192)
    pub realtime_queue_capacity: usize,
    /// Operations applied concurrently (default: 1). Backfill and realtime
    /// operations never overlap, but with more than one worker operations
    /// of the same origin may, so the store must order writes per key.
    pub workers: usize,
    /// Realtime backlog during a backfill that triggers a warning
    /// (default: 1000, 0 disables)
    pub realtime_backlog_warning: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig {
            backfill_queue_capacity: 1024,
            realtime_queue_capacity: 8192,
            workers: 1,
            realtime_backlog_warning: 1000,
        }
    }
}

impl SequencerConfig {
    pub fn with_backfill_queue_capacity(mut self, capacity: usize) -> Self {
        self.backfill_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_realtime_queue_capacity(mut self, capacity: usize) -> Self {
        self.realtime_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_realtime_backlog_warning(mut self, threshold: usize) -> Self {
        self.realtime_backlog_warning = threshold;
        self
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        SequencerConfig {
            backfill_queue_capacity: env_usize("BOLT_BACKFILL_QUEUE_CAPACITY", defaults.backfill_queue_capacity).max(1),
            realtime_queue_capacity: env_usize("BOLT_REALTIME_QUEUE_CAPACITY", defaults.realtime_queue_capacity).max(1),
            workers: env_usize("BOLT_REPLICATION_WORKERS", defaults.workers).max(1),
            realtime_backlog_warning: env_usize("BOLT_REALTIME_BACKLOG_WARNING", defaults.realtime_backlog_warning),
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(value) => match value.parse() {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Invalid {} '{}': {}, using {}", name, value, e, default);
                default
            }
        },
        Err(_) => default,
    }
}
