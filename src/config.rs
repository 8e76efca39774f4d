use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the state store
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the store
    pub dir: PathBuf,

    /// Target size at which the active data file is rolled (default: 64MB)
    pub max_file_size: u64,

    /// Maximum size of a single serialized item (default: 1MB)
    pub max_item_size: usize,

    /// Writer buffer size for data files (default: 64KB)
    pub write_buffer_size: usize,

    /// How often to look for sealed generations to flush (default: 3s)
    pub flush_interval: Duration,

    /// How often to check for compaction opportunities (default: 10s)
    pub compaction_interval: Duration,

    /// Compaction configuration
    pub compaction: CompactionConfig,

    /// Reconnect configuration
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Files whose live fraction falls below this are compaction candidates
    /// (default: 0.5)
    pub max_live_ratio: f64,

    /// Minimum number of candidate files before a compaction runs (default: 2)
    pub min_files: usize,

    /// Skip files smaller than this when measuring live ratio (default: 64KB)
    pub min_file_size: u64,
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Bounded queue capacity between receive and apply (default: 1024)
    pub queue_capacity: usize,

    /// Maximum wait on a full or empty queue before the session is
    /// considered dead (default: 30s)
    pub queue_timeout: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_live_ratio: 0.5,
            min_files: 2,
            min_file_size: 64 * 1024,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            queue_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./canopy"),
            max_file_size: 64 * 1024 * 1024, // 64MB
            max_item_size: 1024 * 1024,      // 1MB
            write_buffer_size: 64 * 1024,    // 64KB
            flush_interval: Duration::from_secs(3),
            compaction_interval: Duration::from_secs(10),
            compaction: CompactionConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the data file roll size
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set the maximum serialized item size
    pub fn max_item_size(mut self, size: usize) -> Self {
        self.max_item_size = size;
        self
    }

    /// Set the data file writer buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set the flush check interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the compaction check interval
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Configure compaction settings
    pub fn compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction = config;
        self
    }

    /// Configure reconnect settings
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }
}

impl CompactionConfig {
    /// Set the live-ratio threshold below which a file is compacted
    pub fn max_live_ratio(mut self, ratio: f64) -> Self {
        self.max_live_ratio = ratio;
        self
    }

    /// Set the minimum candidate file count
    pub fn min_files(mut self, count: usize) -> Self {
        self.min_files = count;
        self
    }

    /// Set the minimum file size considered for compaction
    pub fn min_file_size(mut self, size: u64) -> Self {
        self.min_file_size = size;
        self
    }
}

impl ReconnectConfig {
    /// Set the reconnect queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the reconnect queue timeout
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }
}
