use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::error::Result;
use crate::pipeline::IngestionPipeline;

/// Background recovery for the ingestion pipeline.
///
/// A single logical runner: each tick first reclaims records stuck in
/// `processing`/`indexing` past the stale cutoff, then dispatches due
/// retries one at a time, which bounds concurrency and guarantees a file is
/// dispatched at most once per tick.
pub struct IngestionReaper {
    pipeline: Arc<IngestionPipeline>,
    interval: Duration,
    stale_minutes: i64,
}

impl IngestionReaper {
    pub fn new(pipeline: Arc<IngestionPipeline>, interval_seconds: u64, stale_minutes: i64) -> Self {
        Self {
            pipeline,
            interval: Duration::from_secs(interval_seconds),
            stale_minutes,
        }
    }

    /// Main loop. Ticks until `shutdown` broadcasts `true`. Tick errors are
    /// logged and never fault the task.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            stale_minutes = self.stale_minutes,
            "ingestion reaper started"
        );

        let mut interval = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so a restart doesn't
        // race uploads that are mid-dispatch.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_tick().await {
                        Ok((reclaimed, dispatched)) if reclaimed + dispatched > 0 => {
                            info!(reclaimed, dispatched, "reaper tick complete");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "reaper tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ingestion reaper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One recovery pass. Returns (stale records reclaimed, retries
    /// dispatched).
    pub async fn run_tick(&self) -> Result<(usize, usize)> {
        let files = self.pipeline.files();

        let cutoff =
            (chrono::Utc::now() - chrono::Duration::minutes(self.stale_minutes)).to_rfc3339();
        let stale = files.stale_records(&cutoff)?;
        let reclaimed = stale.len();
        for file in &stale {
            files.reclaim(&file.id)?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let due = files.due_retries(&now)?;
        let dispatched = due.len();
        for file in &due {
            // Serialized within the tick; per-attempt failures are absorbed
            // into row state by the pipeline.
            if let Err(e) = self.pipeline.process_file(&file.id).await {
                error!(file_id = %file.id, error = %e, "reaper dispatch failed");
            }
        }

        Ok((reclaimed, dispatched))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rusqlite::Connection;

    use atrium_rag::{Embedder, VectorStore};

    use super::*;
    use crate::files::FileStore;
    use crate::types::FileStatus;

    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> atrium_rag::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn pipeline(dir: &Path) -> Arc<IngestionPipeline> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        atrium_rag::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        Arc::new(IngestionPipeline::new(
            FileStore::new(db.clone()),
            VectorStore::new(db),
            Box::new(HashEmbedder),
            dir,
            1024 * 1024,
        ))
    }

    #[tokio::test]
    async fn tick_reclaims_stale_then_later_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let file = pipeline
            .upload("a-1", None, "doc.txt", b"stale processing simulation")
            .unwrap();
        // Simulate a crashed worker: attempt registered, no completion.
        pipeline.files().register_attempt(&file.id).unwrap();

        // stale_minutes = -1 puts the cutoff in the future, so the record
        // counts as stale right away.
        let reaper = IngestionReaper::new(pipeline.clone(), 300, -1);
        let (reclaimed, dispatched) = reaper.run_tick().await.unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(dispatched, 0); // retry deadline is minutes away

        let file = pipeline.files().get(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert!(file.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn tick_dispatches_due_retries_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let file = pipeline
            .upload("a-1", None, "doc.txt", b"useful knowledge file body")
            .unwrap();
        pipeline.process_file(&file.id).await.unwrap();

        // Reprocess queues an immediately-due retry; the next tick restores
        // the file to ready.
        pipeline.reprocess(&file.id).unwrap();
        let reaper = IngestionReaper::new(pipeline.clone(), 300, 15);
        let (_, dispatched) = reaper.run_tick().await.unwrap();
        assert_eq!(dispatched, 1);

        let file = pipeline.files().get(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Ready);
        assert!(file.chunk_count > 0);
        assert_eq!(
            pipeline.vectors().count("a-1").unwrap() as u32,
            file.chunk_count
        );
    }

    #[tokio::test]
    async fn exhausted_stale_file_is_not_redispatched() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let file = pipeline
            .upload("a-1", None, "doc.txt", b"will exhaust its attempts")
            .unwrap();

        // Burn all three attempts as stale reclaims.
        let reaper = IngestionReaper::new(pipeline.clone(), 300, -1);
        for _ in 0..3 {
            pipeline.files().register_attempt(&file.id).unwrap();
        }
        reaper.run_tick().await.unwrap();

        let file = pipeline.files().get(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Failed);
        assert!(file.next_retry_at.is_none());
        assert!(file.error_message.is_some());

        // A further tick leaves it untouched.
        let (reclaimed, dispatched) = reaper.run_tick().await.unwrap();
        assert_eq!((reclaimed, dispatched), (0, 0));
    }
}
