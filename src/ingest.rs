//! Ingestion orchestration.
//!
//! [`Ingestor::run_ingestion`] drives every selected channel through the
//! same loop:
//!
//! ```text
//! watermark ─▶ extract page ─▶ sort by position ─▶ identify ─▶ batch ─▶ insert_batch
//!                  ▲                                              │
//!                  └──────── cursor = highest row id ◀────────────┘
//! ```
//!
//! Pages are pulled until one comes back short or empty. Batches are
//! committed whenever they reach the flush threshold and once more at the
//! end of the channel. Channels are isolated: a failure in one is recorded
//! in its [`ChannelReport`] and the run moves on.
//!
//! At most one run is active per [`Ingestor`]. A call made while another is
//! in progress returns [`RunOutcome::Skipped`] without touching the source
//! or the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use relay_core::models::{Channel, MessageBatch};
use relay_core::store::MessageStore;

use crate::capability::CapabilityCache;
use crate::config::Config;
use crate::extract::{ExtractedPage, RecordExtractor};
use crate::source::MessageSource;
use crate::watermark::WatermarkTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    /// Maximum rows per source page.
    pub page_size: usize,
    /// Messages accumulated before a commit.
    pub flush_threshold: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            page_size: 500,
            flush_threshold: 500,
        }
    }
}

/// What one channel did during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel: Channel,
    pub rows_scanned: u64,
    pub records_extracted: u64,
    pub batches_committed: u64,
    pub messages_inserted: u64,
    pub parts_inserted: u64,
    pub addresses_inserted: u64,
    pub watermark_before: Option<i64>,
    pub watermark_after: Option<i64>,
    /// Set when the channel stopped early on a commit failure.
    pub error: Option<String>,
}

impl ChannelReport {
    fn new(channel: Channel, watermark_before: Option<i64>) -> Self {
        Self {
            channel,
            rows_scanned: 0,
            records_extracted: 0,
            batches_committed: 0,
            messages_inserted: 0,
            parts_inserted: 0,
            addresses_inserted: 0,
            watermark_before,
            watermark_after: watermark_before,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub channels: Vec<ChannelReport>,
}

impl IngestReport {
    pub fn channel(&self, channel: Channel) -> Option<&ChannelReport> {
        self.channels.iter().find(|c| c.channel == channel)
    }

    pub fn messages_inserted(&self) -> u64 {
        self.channels.iter().map(|c| c.messages_inserted).sum()
    }

    pub fn batches_committed(&self) -> u64 {
        self.channels.iter().map(|c| c.batches_committed).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.channels.iter().any(|c| c.error.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run was already active; nothing was done.
    Skipped,
    Completed(IngestReport),
}

impl RunOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped)
    }

    pub fn report(&self) -> Option<&IngestReport> {
        match self {
            RunOutcome::Skipped => None,
            RunOutcome::Completed(report) => Some(report),
        }
    }
}

/// Clears the running flag when a run ends, including by unwinding.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone, Copy)]
enum Pass {
    Primary,
    Secondary,
}

pub struct Ingestor {
    store: Arc<dyn MessageStore>,
    extractor: RecordExtractor,
    watermarks: WatermarkTracker,
    settings: IngestSettings,
    running: AtomicBool,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        extractor: RecordExtractor,
        settings: IngestSettings,
    ) -> Self {
        Self {
            watermarks: WatermarkTracker::new(store.clone()),
            store,
            extractor,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Wire an ingestor from configuration: heuristic markers, the secondary
    /// provider switch and paging settings.
    pub fn from_config(
        config: &Config,
        source: Arc<dyn MessageSource>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let mut extractor =
            RecordExtractor::new(source, store.clone(), config.heuristic.markers.clone());
        if config.heuristic.secondary {
            extractor =
                extractor.with_secondary(Arc::new(CapabilityCache::secondary(store.clone())));
        }
        let settings = IngestSettings {
            page_size: config.ingest.page_size,
            flush_threshold: config.ingest.flush_threshold,
        };
        Self::new(store, extractor, settings)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ingest new rows of `filter` (all channels when `None`).
    ///
    /// Never fails: per-channel problems are logged and reported in the
    /// returned [`IngestReport`].
    pub async fn run_ingestion(&self, filter: Option<Channel>) -> RunOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(channel = ?filter, "ingestion already running; request ignored");
            return RunOutcome::Skipped;
        }
        let _guard = RunGuard(&self.running);

        let channels: Vec<Channel> = match filter {
            Some(channel) => vec![channel],
            None => Channel::ALL.to_vec(),
        };

        let mut report = IngestReport::default();
        for channel in channels {
            report.channels.push(self.ingest_channel(channel).await);
        }

        info!(
            channels = report.channels.len(),
            inserted = report.messages_inserted(),
            batches = report.batches_committed(),
            "ingestion run complete"
        );
        RunOutcome::Completed(report)
    }

    async fn ingest_channel(&self, channel: Channel) -> ChannelReport {
        let before = self.watermarks.highest_position(channel).await;
        let mut report = ChannelReport::new(channel, before);
        debug!(channel = %channel, watermark = ?before, "channel ingestion start");

        if let Err(e) = self.drive(channel, &mut report).await {
            let msg = format!("{:#}", e);
            error!(channel = %channel, error = %msg, "channel ingestion failed");
            report.error = Some(msg);
        }

        report.watermark_after = self.watermarks.highest_position(channel).await;
        info!(
            channel = %channel,
            scanned = report.rows_scanned,
            extracted = report.records_extracted,
            inserted = report.messages_inserted,
            watermark = ?report.watermark_after,
            "channel ingestion done"
        );
        report
    }

    async fn drive(&self, channel: Channel, report: &mut ChannelReport) -> Result<()> {
        let mut batch = MessageBatch::new();

        self.drain(channel, Pass::Primary, report.watermark_before, &mut batch, report)
            .await?;

        if channel == Channel::Rcs && self.extractor.secondary_available().await {
            // The secondary table has its own id space; scan it from the start.
            self.drain(channel, Pass::Secondary, None, &mut batch, report)
                .await?;
        }

        self.flush(channel, &mut batch, report).await
    }

    async fn drain(
        &self,
        channel: Channel,
        pass: Pass,
        start: Option<i64>,
        batch: &mut MessageBatch,
        report: &mut ChannelReport,
    ) -> Result<()> {
        let page_size = self.settings.page_size;
        let mut cursor = start;

        loop {
            let page: ExtractedPage = match pass {
                Pass::Primary => self.extractor.extract(channel, cursor, page_size).await,
                Pass::Secondary => self.extractor.extract_secondary(cursor, page_size).await,
            };
            report.rows_scanned += page.rows_scanned as u64;
            if page.rows_scanned == 0 {
                break;
            }

            let mut records = page.records;
            records.sort_by_key(|r| r.message.source_position);
            for record in records {
                report.records_extracted += 1;
                batch.push(record.normalize());
                if batch.len() >= self.settings.flush_threshold {
                    self.flush(channel, batch, report).await?;
                }
            }

            if page.rows_scanned < page_size {
                break;
            }
            match page.last_position {
                Some(last) if cursor.map_or(true, |c| last > c) => cursor = Some(last),
                _ => break,
            }
        }
        Ok(())
    }

    async fn flush(
        &self,
        channel: Channel,
        batch: &mut MessageBatch,
        report: &mut ChannelReport,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let pending = batch.take();
        let outcome = self
            .store
            .insert_batch(&pending)
            .await
            .with_context(|| format!("committing {} {} messages", pending.len(), channel))?;

        report.batches_committed += 1;
        report.messages_inserted += outcome.messages;
        report.parts_inserted += outcome.parts;
        report.addresses_inserted += outcome.addresses;
        debug!(
            channel = %channel,
            size = pending.len(),
            inserted = outcome.messages,
            "batch committed"
        );
        Ok(())
    }
}
