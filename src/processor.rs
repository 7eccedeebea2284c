use anyhow::{Context, Result};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::vec;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::IndexError;
use crate::indexer::Indexer;
use crate::settings::LinkageMode;
use crate::source::BlockSource;
use crate::store::Store;

/// What one batch did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub staged: usize,
    pub links: usize,
    pub transformed: usize,
    pub queries: u64,
    pub addresses: usize,
    pub pointers_updated: usize,
    pub skipped: Vec<u32>,
}

/// Drives one batch through staging, linking, transforming, stats and
/// linkage repair
pub struct BatchProcessor<S> {
    indexer: Arc<Indexer<S>>,
    workers: usize,
    linkage_mode: LinkageMode,
}

impl<S: Store + 'static> BatchProcessor<S> {
    /// Creates a new batch processor
    pub fn new(indexer: Arc<Indexer<S>>, workers: usize, linkage_mode: LinkageMode) -> Self {
        Self {
            indexer,
            workers: workers.max(1),
            linkage_mode,
        }
    }

    pub fn indexer(&self) -> &Arc<Indexer<S>> {
        &self.indexer
    }

    /// Stages every block in a JSON-lines file and returns the height range
    /// covered, or None for an empty file.
    pub async fn stage_file(&self, path: PathBuf) -> Result<Option<RangeInclusive<u32>>> {
        let indexer = Arc::clone(&self.indexer);
        let mode = self.linkage_mode;

        tokio::task::spawn_blocking(move || -> Result<Option<RangeInclusive<u32>>> {
            let mut range: Option<RangeInclusive<u32>> = None;
            for block in BlockSource::open(&path)? {
                let block = block?;
                let height = block.header.height;
                match mode {
                    LinkageMode::Bulk => indexer.stage_block(&block),
                    LinkageMode::Incremental => indexer.insert_block(&block),
                }
                .with_context(|| format!("Failed to stage block {}", height))?;

                range = Some(match range {
                    Some(r) => (*r.start()).min(height)..=(*r.end()).max(height),
                    None => height..=height,
                });
            }
            Ok(range)
        })
        .await
        .context("Staging task panicked")?
    }

    /// Transforms `heights` on the worker pool and returns once every worker
    /// has finished. The first failure stops workers from taking new heights
    /// and is returned after the rest have drained.
    pub async fn transform_heights(&self, heights: Vec<u32>) -> Result<(usize, u64)> {
        if heights.is_empty() {
            return Ok((0, 0));
        }
        let total = heights.len();
        let queue: Arc<Mutex<vec::IntoIter<u32>>> = Arc::new(Mutex::new(heights.into_iter()));
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let workers = self.workers.min(total);
        info!("Transforming {} blocks with {} workers", total, workers);

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let indexer = Arc::clone(&self.indexer);
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            let done = done_tx.clone();

            handles.push(tokio::task::spawn_blocking(move || loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .next();
                let Some(height) = next else {
                    break;
                };
                let result = indexer.transform(height);
                if result.is_err() {
                    stop.store(true, Ordering::Relaxed);
                }
                debug!("Worker {} finished block {}", worker, height);
                if done.send((height, result)).is_err() {
                    break;
                }
            }));
        }
        // the channel closes once the last worker drops its sender
        drop(done_tx);

        let mut transformed = 0;
        let mut queries = 0;
        let mut failure: Option<(u32, IndexError)> = None;
        while let Some((height, result)) = done_rx.recv().await {
            match result {
                Ok(count) => {
                    transformed += 1;
                    queries += count;
                    if transformed % 1000 == 0 {
                        info!("Transformed {}/{} blocks", transformed, total);
                    }
                }
                Err(e) => {
                    if e.is_integrity_violation() {
                        error!("Integrity violation in block {}: {}", height, e);
                    } else {
                        error!("Failed to transform block {}: {}", height, e);
                    }
                    failure.get_or_insert((height, e));
                }
            }
        }
        for handle in handles {
            handle.await.context("Transform worker panicked")?;
        }

        if let Some((height, e)) = failure {
            return Err(e).with_context(|| format!("Transform of block {} failed", height));
        }
        info!(
            "Transformed {} blocks ({} store queries)",
            transformed, queries
        );
        Ok((transformed, queries))
    }

    /// Runs a whole batch from a JSON-lines file.
    pub async fn run_batch(&self, path: PathBuf) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        // 1. Stage
        let Some(range) = self.stage_file(path.clone()).await? else {
            warn!("No blocks in {}", path.display());
            return Ok(report);
        };
        let (start, end) = (*range.start(), *range.end());
        let heights: Vec<u32> = self
            .blocking(move |ix| ix.heights_from(start))
            .await?
            .into_iter()
            .take_while(|h| *h <= end)
            .collect();
        report.staged = heights.len();
        info!("Staged blocks {}..={}", start, end);

        // 2. Link over everything staged so far
        report.links = self.blocking(|ix| ix.link()).await?;
        info!("Linked {} inputs and outputs", report.links);

        // 3. Transform, waiting for every worker
        let (transformed, queries) = self.transform_heights(heights).await?;
        report.transformed = transformed;
        report.queries = queries;

        // 4. Stats, only once nothing is in flight
        report.addresses = self.blocking(|ix| ix.refresh_address_stats()).await?;

        // gaps count from the lowest stored height, not from genesis
        report.skipped = self
            .blocking(move |ix| {
                let lowest = ix.heights_from(0)?.first().copied().unwrap_or(start);
                Ok(ix.skipped_heights(lowest)?.collect())
            })
            .await?;
        if !report.skipped.is_empty() {
            warn!(
                "{} heights are still missing, first {}",
                report.skipped.len(),
                report.skipped[0]
            );
        }

        // 5. Linkage from the previous batch's last block. Any gap above makes
        // this fail with more than one tip.
        if self.linkage_mode == LinkageMode::Bulk {
            let from = start.saturating_sub(1);
            report.pointers_updated = self
                .blocking(move |ix| ix.repair_linkage(from..=end))
                .await?;
        }

        info!("Batch {}..={} complete: {:?}", start, end, report);
        Ok(report)
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Indexer<S>) -> crate::error::Result<T> + Send + 'static,
    {
        let indexer = Arc::clone(&self.indexer);
        let result = tokio::task::spawn_blocking(move || work(&indexer))
            .await
            .context("Indexer task panicked")?;
        Ok(result?)
    }
}
