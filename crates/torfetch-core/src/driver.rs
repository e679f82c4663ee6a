//! Queue driver: claim → check local evidence → fetch → classify → persist.
//!
//! One row is processed fully before the next is claimed; parallelism comes
//! from running more workers, each bound to its own route. A pass drains the
//! currently eligible rows; the outer loop idles and re-runs passes forever,
//! so the worker behaves as a long-running poller rather than a one-shot
//! batch job.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use url::Url;

use crate::evidence;
use crate::fetch::{FetchOutcome, Fetcher, HTTP_OK};
use crate::storage;
use crate::work_db::{ClaimFilter, WorkDb};

/// How one pass over the eligible rows ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// No more eligible rows under the current filter.
    Drained { processed: usize },
    /// A transport failure abandoned the pass; the row in flight was left
    /// unmarked and stays eligible.
    Aborted { reason: String },
}

/// Single-worker driver over the shared work table.
pub struct QueueDriver<F> {
    db: WorkDb,
    fetcher: F,
    data_dir: PathBuf,
    base_url: String,
    filter: ClaimFilter,
    fetch_timeout: Duration,
    idle_delay: Duration,
}

impl<F: Fetcher> QueueDriver<F> {
    pub fn new(
        db: WorkDb,
        fetcher: F,
        data_dir: PathBuf,
        base_url: String,
        filter: ClaimFilter,
        fetch_timeout: Duration,
        idle_delay: Duration,
    ) -> Self {
        Self {
            db,
            fetcher,
            data_dir,
            base_url,
            filter,
            fetch_timeout,
            idle_delay,
        }
    }

    /// Drains the currently eligible rows once.
    ///
    /// Per row: a local-evidence hit is recorded as success without touching
    /// the network; otherwise the fetch result is classified. A status equal
    /// to the filter's retry code leaves the row unmarked for a later pass
    /// (deferred for the rest of this one); any other non-ok status is
    /// recorded as terminal; a transport failure abandons the whole pass.
    pub async fn run_pass(&self) -> Result<PassOutcome> {
        let mut filter = self.filter.clone();
        let mut processed = 0usize;

        loop {
            let Some(row) = self.db.claim_next(&filter).await? else {
                return Ok(PassOutcome::Drained { processed });
            };

            if let Some(size) = evidence::local_size(&self.data_dir, &row.rel_path) {
                self.db.record_outcome(row.id, HTTP_OK, size as i64, 0).await?;
                tracing::info!(
                    id = row.id,
                    path = %row.rel_path,
                    bytes = size,
                    "already on disk, recorded without fetch"
                );
                processed += 1;
                continue;
            }

            let url = remote_url(&self.base_url, &row.rel_path)?;
            let started = Instant::now();

            match self.fetcher.fetch(&url, self.fetch_timeout).await {
                FetchOutcome::Transport { reason } => {
                    tracing::warn!(
                        id = row.id,
                        path = %row.rel_path,
                        %reason,
                        "transport failure, abandoning pass"
                    );
                    return Ok(PassOutcome::Aborted { reason });
                }
                FetchOutcome::HttpError { code } if Some(code) == filter.retry_code => {
                    tracing::info!(
                        id = row.id,
                        path = %row.rel_path,
                        code,
                        "retryable status, row left unmarked"
                    );
                    filter.exclude_ids.push(row.id);
                }
                FetchOutcome::HttpError { code } => {
                    self.db.record_outcome(row.id, code, 0, 0).await?;
                    tracing::warn!(
                        id = row.id,
                        path = %row.rel_path,
                        code,
                        "non-ok status recorded as terminal"
                    );
                    processed += 1;
                }
                FetchOutcome::Ok { code, body } => {
                    storage::publish(&self.data_dir, &row.rel_path, &body)
                        .with_context(|| format!("failed to publish {}", row.rel_path))?;
                    let take_ms = started.elapsed().as_millis() as i64;
                    self.db
                        .record_outcome(row.id, code, body.len() as i64, take_ms)
                        .await?;
                    tracing::info!(
                        id = row.id,
                        path = %row.rel_path,
                        code,
                        bytes = body.len(),
                        ms = take_ms,
                        "fetched"
                    );
                    processed += 1;
                }
            }
        }
    }

    /// Outer retry-forever loop: run a pass, idle, repeat. An aborted pass is
    /// retried the same way as a drained one, after the same delay.
    /// `max_passes` bounds the loop (used by tests); `None` runs until the
    /// process is externally stopped. Store failures propagate and end the
    /// worker.
    pub async fn run(&self, max_passes: Option<u64>) -> Result<()> {
        let mut pass = 0u64;
        loop {
            pass += 1;
            match self.run_pass().await? {
                PassOutcome::Drained { processed } => {
                    tracing::info!(pass, processed, "pass drained");
                }
                PassOutcome::Aborted { reason } => {
                    tracing::warn!(pass, %reason, "pass aborted, retrying after idle delay");
                }
            }
            if let Some(max) = max_passes {
                if pass >= max {
                    return Ok(());
                }
            }
            tokio::time::sleep(self.idle_delay).await;
        }
    }
}

/// Joins the fixed base location and a row's relative path into a fetch URL,
/// percent-encoding path segments as needed.
fn remote_url(base: &str, rel_path: &str) -> Result<String> {
    let mut url = Url::parse(base).context("invalid base URL")?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("base URL cannot carry a path"))?;
        segments.pop_if_empty();
        for part in rel_path.split('/').filter(|p| !p.is_empty()) {
            segments.push(part);
        }
    }
    Ok(url.to_string())
}
