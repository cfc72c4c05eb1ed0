//! Batch execution driver.
//!
//! Sequences fetch, classification, extraction, and reconciliation for each
//! input envelope. HTTP batches run on a bounded worker pool; browser
//! batches hold the Chrome session as an exclusive resource and therefore
//! run one item at a time. A blocked-upstream signal from any item pauses
//! the whole batch through a shared gate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use recrawl_fetch::{BrowserSession, FetchOutcome, FetchStrategy};
use recrawl_shared::{BrowserConfig, PipelineConfig, RecrawlError, Result, Status};
use recrawl_store::{PageCache, RecordStore};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::envelope::{HarvestInput, HarvestOutput};
use crate::harvester::{ExtractError, Harvester, Verdict};
use crate::reconcile::Reconciler;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one processed item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub record_id: String,
    pub url: Option<String>,
    pub status: Status,
    pub from_cache: bool,
    /// Infrastructure failure that kept this item's status from being
    /// committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemReport {
    fn failed(record_id: String, error: &RecrawlError) -> Self {
        Self {
            record_id,
            url: None,
            status: Status::NotStarted,
            from_cache: false,
            error: Some(error.to_string()),
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub items: Vec<ItemReport>,
    /// Items never processed because the batch aborted early.
    pub skipped: usize,
}

impl BatchReport {
    /// Processed items grouped by final status.
    pub fn status_counts(&self) -> BTreeMap<&'static str, u64> {
        let mut counts = BTreeMap::new();
        for item in self.items.iter().filter(|i| i.error.is_none()) {
            *counts.entry(item.status.name()).or_insert(0) += 1;
        }
        counts
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|i| i.error.is_some()).count()
    }

    fn stats_json(&self) -> String {
        serde_json::json!({
            "total": self.items.len(),
            "skipped": self.skipped,
            "errors": self.error_count(),
            "statuses": self.status_counts(),
        })
        .to_string()
    }
}

struct BatchOutcome {
    items: Vec<ItemReport>,
    skipped: usize,
    abort: Option<RecrawlError>,
}

// ---------------------------------------------------------------------------
// Backpressure gate
// ---------------------------------------------------------------------------

/// Batch-wide pause control.
///
/// Engaged when the upstream signals blocking; every worker waits the pause
/// out before starting another item. Deadlines only ever extend.
struct BackpressureGate {
    paused_until: Mutex<Option<tokio::time::Instant>>,
}

impl BackpressureGate {
    fn new() -> Self {
        Self {
            paused_until: Mutex::new(None),
        }
    }

    /// Wait until any active pause has elapsed.
    async fn wait_ready(&self) {
        let until = *self.paused_until.lock().await;
        if let Some(until) = until {
            tokio::time::sleep_until(until).await;
        }
    }

    /// Extend the pause to at least `now + pause`, returning the deadline.
    async fn engage(&self, pause: Duration) -> tokio::time::Instant {
        let mut guard = self.paused_until.lock().await;
        let candidate = tokio::time::Instant::now() + pause;
        let until = match *guard {
            Some(existing) => existing.max(candidate),
            None => candidate,
        };
        *guard = Some(until);
        until
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One configured harvesting pipeline: a fetch backend, a harvester, and a
/// reconciliation shape over a record store.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    browser: BrowserConfig,
    store: Arc<RecordStore>,
    cache: Arc<PageCache>,
    strategy: Arc<FetchStrategy>,
    harvester: Arc<dyn Harvester>,
    reconciler: Reconciler,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        browser: BrowserConfig,
        store: Arc<RecordStore>,
        cache: Arc<PageCache>,
        strategy: FetchStrategy,
        harvester: Arc<dyn Harvester>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            config,
            browser,
            store,
            cache,
            strategy: Arc::new(strategy),
            harvester,
            reconciler,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Select records due for a refresh and wrap them in input envelopes.
    ///
    /// A record is due when `status < dedup_threshold` and its last write
    /// is older than the refresh interval. Oldest first.
    pub async fn due_tasks(&self, limit: Option<u32>) -> Result<Vec<HarvestInput>> {
        let cutoff = Utc::now() - self.config.refresh_interval;
        let records = self
            .store
            .due_records(self.config.dedup_threshold, cutoff, limit)
            .await?;
        debug!(due = records.len(), "selected due records");
        Ok(records
            .into_iter()
            .map(|record| HarvestInput::new(record, &self.config))
            .collect())
    }

    /// Process a batch of input envelopes and commit every outcome.
    ///
    /// With `ignore_error` set, item-level infrastructure failures are
    /// reported and the batch continues; otherwise the first one aborts the
    /// remaining items and is returned after the run is bookkept.
    #[instrument(skip_all, fields(items = items.len(), use_browser = self.config.use_browser))]
    pub async fn run_batch(&self, items: Vec<HarvestInput>) -> Result<BatchReport> {
        let run_id = self.store.insert_batch_run().await?;
        info!(run_id = %run_id, items = items.len(), "batch started");

        let gate = Arc::new(BackpressureGate::new());
        let outcome = if self.config.use_browser {
            self.run_sequential(&gate, items).await
        } else {
            self.run_pooled(&gate, items).await
        };

        let report = BatchReport {
            run_id,
            items: outcome.items,
            skipped: outcome.skipped,
        };
        let _ = self
            .store
            .finish_batch_run(&report.run_id, &report.stats_json())
            .await;

        if let Some(e) = outcome.abort {
            warn!(run_id = %report.run_id, error = %e, skipped = report.skipped, "batch aborted");
            return Err(e);
        }

        info!(
            run_id = %report.run_id,
            processed = report.items.len(),
            errors = report.error_count(),
            "batch finished"
        );
        Ok(report)
    }

    /// Run a single envelope outside of a batch, for embedders that schedule
    /// items themselves. Browser pipelines get a session scoped to the call.
    pub async fn process_one(&self, input: HarvestInput) -> Result<ItemReport> {
        let gate = BackpressureGate::new();
        if self.config.use_browser {
            let session = BrowserSession::launch(&self.browser).await?;
            let report = self.process_item(Some(&session), &gate, input).await;
            session.shutdown().await;
            report
        } else {
            self.process_item(None, &gate, input).await
        }
    }

    /// Browser batches: one exclusive Chrome session, one item at a time.
    async fn run_sequential(
        &self,
        gate: &BackpressureGate,
        items: Vec<HarvestInput>,
    ) -> BatchOutcome {
        let session = match BrowserSession::launch(&self.browser).await {
            Ok(session) => session,
            Err(e) => {
                return BatchOutcome {
                    items: Vec::new(),
                    skipped: items.len(),
                    abort: Some(e),
                };
            }
        };
        if self.config.worker_count > 1 {
            debug!(
                configured = self.config.worker_count,
                "browser batch forced to a single worker"
            );
        }

        let mut reports = Vec::with_capacity(items.len());
        let mut abort = None;
        let mut remaining = items.into_iter();
        while let Some(input) = remaining.next() {
            let record_id = input.record.id.clone();
            match self.process_item(Some(&session), gate, input).await {
                Ok(report) => reports.push(report),
                Err(e) if self.config.ignore_error => {
                    warn!(id = %record_id, error = %e, "item failed, continuing");
                    reports.push(ItemReport::failed(record_id, &e));
                }
                Err(e) => {
                    abort = Some(e);
                    break;
                }
            }
        }
        let skipped = remaining.count();

        session.shutdown().await;
        BatchOutcome {
            items: reports,
            skipped,
            abort,
        }
    }

    /// HTTP batches: a bounded worker pool, no ordering between items.
    async fn run_pooled(&self, gate: &Arc<BackpressureGate>, items: Vec<HarvestInput>) -> BatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count.max(1) as usize));
        let mut handles = Vec::with_capacity(items.len());

        for input in items {
            let record_id = input.record.id.clone();
            let pipeline = self.clone();
            let gate = gate.clone();
            let sem = semaphore.clone();
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                pipeline.process_item(None, &gate, input).await
            });
            handles.push((record_id, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut abort: Option<RecrawlError> = None;
        let mut skipped = 0;
        for (record_id, handle) in handles {
            if abort.is_some() {
                handle.abort();
                skipped += 1;
                continue;
            }
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) if self.config.ignore_error => {
                    warn!(id = %record_id, error = %e, "item failed, continuing");
                    reports.push(ItemReport::failed(record_id, &e));
                }
                Ok(Err(e)) => abort = Some(e),
                Err(e) if self.config.ignore_error => {
                    let e = RecrawlError::task(e.to_string());
                    warn!(id = %record_id, error = %e, "item task failed, continuing");
                    reports.push(ItemReport::failed(record_id, &e));
                }
                Err(e) => abort = Some(RecrawlError::task(e.to_string())),
            }
        }

        BatchOutcome {
            items: reports,
            skipped,
            abort,
        }
    }

    /// Run the full pipeline for one envelope: derive URL, fetch, classify,
    /// extract, reconcile. Exactly one reconciliation write happens per
    /// call; `Err` means infrastructure failed before it could.
    #[instrument(skip_all, fields(id = %input.record.id))]
    async fn process_item(
        &self,
        browser: Option<&BrowserSession>,
        gate: &BackpressureGate,
        input: HarvestInput,
    ) -> Result<ItemReport> {
        let mut output = HarvestOutput::new();
        let mut pause_until = None;

        match self.harvester.build_url(&input.record) {
            Ok(url) => output.url = Some(url),
            Err(e) => {
                warn!(id = %input.record.id, error = %e, "failed to derive fetch URL");
                output.status = Status::TransportError;
            }
        }

        if let Some(url) = output.url.clone() {
            // Checked right at the fetch: no request may go out while a
            // pause is active.
            gate.wait_ready().await;
            let outcome = match browser {
                Some(session) => {
                    self.strategy
                        .fetch_browser(session, &url, input.ignore_cache, &input.render)
                        .await?
                }
                None => {
                    self.strategy
                        .fetch_http(&url, input.ignore_cache, &input.request)
                        .await?
                }
            };
            match outcome {
                FetchOutcome::Fetched { text, from_cache } => {
                    output.content = Some(text);
                    output.from_cache = from_cache;
                }
                FetchOutcome::Terminal(status) => output.status = status,
                FetchOutcome::Throttled { pause } => {
                    output.status = Status::RateLimited;
                    // Engage before reconciling so no sibling slips in
                    // between classification and the pause.
                    pause_until = Some(gate.engage(pause).await);
                }
            }
        }

        if output.status == Status::NotStarted {
            if let Some(text) = output.content.clone() {
                self.run_extraction(&text, &input, &mut output);
            }
        }

        self.reconciler
            .reconcile(
                &self.store,
                &self.cache,
                self.harvester.as_ref(),
                self.config.dedup_threshold,
                &input,
                &output,
            )
            .await?;

        if let Some(until) = pause_until {
            warn!(id = %input.record.id, "blocked upstream, pausing the batch");
            tokio::time::sleep_until(until).await;
        }

        debug!(
            id = %input.record.id,
            status = %output.status,
            from_cache = output.from_cache,
            "item reconciled"
        );
        Ok(ItemReport {
            record_id: input.record.id,
            url: output.url.map(|u| u.to_string()),
            status: output.status,
            from_cache: output.from_cache,
            error: None,
        })
    }

    fn run_extraction(&self, text: &str, input: &HarvestInput, output: &mut HarvestOutput) {
        match self.harvester.extract(text, &input.parse) {
            Ok(extraction) => {
                output.status = match extraction.verdict {
                    Some(Verdict::Unusable) => Status::UpstreamGone,
                    None => Status::Done,
                };
                output.extraction = Some(extraction);
            }
            Err(ExtractError::PageGone(message)) => {
                // The fetched content stays in the envelope; only the
                // payload is missing.
                debug!(id = %input.record.id, reason = %message, "extraction reports the page gone");
                output.status = Status::UpstreamGone;
            }
            Err(e) => {
                warn!(id = %input.record.id, error = %e, "extraction failed");
                output.status = Status::ExtractionError;
            }
        }
    }
}
