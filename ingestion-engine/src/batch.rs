//! Chunked drive of normalization and reconcile over a row stream. Chunking bounds
//! memory: raw rows are dropped before the store writes begin, and the
//! normalized chunk is consumed by the writes themselves. Processing is
//! strictly sequential; per-row fan-out is rejected by design.

use crate::errors::Result;
use crate::normalize::normalize_row;
use crate::reconcile::ReconcileEngine;
use crate::stats::BatchStats;
use async_trait::async_trait;
use core_types::types::{NormalizedSecurity, SyncSource};
use log::info;
use workbook_source::Workbook;

/// Seam through which the orchestrator observes fractional progress.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8);
}

/// Reporter for callers that do not observe progress.
pub struct NullReporter;

#[async_trait]
impl ProgressReporter for NullReporter {
    async fn report(&self, _progress: u8) {}
}

pub struct BatchScheduler {
    engine: ReconcileEngine,
    chunk_size: usize,
}

impl BatchScheduler {
    pub fn new(engine: ReconcileEngine, chunk_size: usize) -> Self {
        Self {
            engine,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Full file run: count rows for the progress denominator, then stream
    /// chunk by chunk. A mid-stream extractor failure escalates as a fatal
    /// run error, not a per-row skip.
    pub async fn run_workbook(
        &self,
        workbook: &Workbook,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchStats> {
        let total = workbook.count_rows()?;
        let mut stats = BatchStats::default();
        if total == 0 {
            reporter.report(100).await;
            return Ok(stats);
        }

        let mut rows = workbook.rows()?;
        let mut rows_done = 0u64;
        loop {
            let mut chunk = Vec::with_capacity(self.chunk_size);
            for row in rows.by_ref().take(self.chunk_size) {
                chunk.push(row?);
            }
            if chunk.is_empty() {
                break;
            }
            let chunk_rows = chunk.len() as u64;
            let normalized: Vec<NormalizedSecurity> = chunk
                .iter()
                .filter_map(|row| normalize_row(row, SyncSource::Xls))
                .collect();
            // reclaim the raw rows before any store I/O for this chunk
            drop(chunk);

            self.reconcile_chunk(normalized, &mut stats).await?;
            rows_done += chunk_rows;
            reporter.report((rows_done * 100 / total) as u8).await;
        }
        info!(
            "workbook run finished: created={} updated={} skipped={} errors={}",
            stats.created,
            stats.updated,
            stats.skipped,
            stats.errors.len()
        );
        Ok(stats)
    }

    /// Feed path: records are already normalized upstream; only the chunked
    /// reconcile-and-report loop applies.
    pub async fn run_records(
        &self,
        records: Vec<NormalizedSecurity>,
        reporter: &dyn ProgressReporter,
    ) -> Result<BatchStats> {
        let total = records.len() as u64;
        let mut stats = BatchStats::default();
        if total == 0 {
            reporter.report(100).await;
            return Ok(stats);
        }

        let mut iter = records.into_iter();
        let mut rows_done = 0u64;
        loop {
            let chunk: Vec<NormalizedSecurity> = iter.by_ref().take(self.chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let chunk_rows = chunk.len() as u64;
            self.reconcile_chunk(chunk, &mut stats).await?;
            rows_done += chunk_rows;
            reporter.report((rows_done * 100 / total) as u8).await;
        }
        Ok(stats)
    }

    async fn reconcile_chunk(
        &self,
        chunk: Vec<NormalizedSecurity>,
        stats: &mut BatchStats,
    ) -> Result<()> {
        for rec in chunk {
            let row = rec.row_index;
            let outcome = self.engine.reconcile(rec).await?;
            stats.record(row, outcome);
        }
        Ok(())
    }
}
