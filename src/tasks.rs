//! Background flush and compaction tasks.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CompactionConfig;
use crate::error::Result;
use crate::map::VirtualMap;
use crate::scheduler::{BackgroundTask, Context};

/// Periodically flushes sealed generations to data files.
pub struct FlushTask {
    map: Arc<VirtualMap>,
    interval: Duration,
}

impl FlushTask {
    pub fn new(map: Arc<VirtualMap>, interval: Duration) -> Self {
        Self { map, interval }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for FlushTask {
    fn name(&self) -> &'static str {
        "flush"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, ctx: Context) -> Result<()> {
        if !self.map.needs_flush()? {
            return Ok(());
        }
        let records = self.map.flush_pending()?;
        tracing::debug!(run_id = ctx.run_id, records, "Flush task completed");
        Ok(())
    }
}

/// Periodically rewrites data files dominated by superseded records.
pub struct CompactionTask {
    map: Arc<VirtualMap>,
    config: CompactionConfig,
    interval: Duration,
}

impl CompactionTask {
    pub fn new(map: Arc<VirtualMap>, config: CompactionConfig, interval: Duration) -> Self {
        Self {
            map,
            config,
            interval,
        }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for CompactionTask {
    fn name(&self) -> &'static str {
        "compaction"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, ctx: Context) -> Result<()> {
        if !self.map.needs_compaction(&self.config)? {
            return Ok(());
        }
        let compacted = self.map.compact(&self.config)?;
        tracing::debug!(run_id = ctx.run_id, compacted, "Compaction task completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scheduler::Scheduler;
    use crate::store::FileStore;
    use crate::tmpfs::TempDir;

    fn fresh_map(dir: &TempDir) -> Arc<VirtualMap> {
        let config = Config::new(dir.path());
        let store = Arc::new(FileStore::open(&config).unwrap());
        Arc::new(VirtualMap::new(store, config.max_file_size))
    }

    #[tokio::test]
    async fn test_flush_task_drains_pending_generations() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let map = fresh_map(&dir);

        map.put(b"a", b"1".to_vec())?;
        map.fast_copy()?.release();
        assert!(map.needs_flush()?);

        let scheduler = Scheduler::new();
        scheduler.register(Arc::new(FlushTask::new(
            Arc::clone(&map),
            Duration::from_millis(10),
        )))?;

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown().await?;

        assert!(!map.needs_flush()?);
        assert_eq!(map.get(b"a")?, Some(b"1".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn test_compaction_task_reclaims_superseded_files() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let map = fresh_map(&dir);

        for i in 0..8u8 {
            map.put(&[i], vec![i])?;
        }
        map.fast_copy()?.release();
        map.flush_pending()?;
        for i in 0..8u8 {
            map.put(&[i], vec![i + 1])?;
        }
        map.fast_copy()?.release();
        map.flush_pending()?;

        let config = CompactionConfig::default()
            .min_files(1)
            .min_file_size(0)
            .max_live_ratio(0.9);
        assert!(map.needs_compaction(&config)?);

        let scheduler = Scheduler::new();
        scheduler.register(Arc::new(CompactionTask::new(
            Arc::clone(&map),
            config.clone(),
            Duration::from_millis(10),
        )))?;

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown().await?;

        assert!(!map.needs_compaction(&config)?);
        for i in 0..8u8 {
            assert_eq!(map.get(&[i])?, Some(vec![i + 1]));
        }
        Ok(())
    }
}
