//! Reconciler: brings the local store up to date for one date range
//!
//! A sync lists the remote ids in the range, subtracts what the store already
//! holds and fetches only the gap. Every fetched chunk is committed on arrival,
//! so an interrupted sync keeps everything it got so far.

use futures::stream::StreamExt;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::client::MailboxSession;
use crate::error::Result;
use crate::fetcher::{ChunkOutcome, FetchPolicy, RemoteFetcher};
use crate::models::SyncRange;
use crate::store::MetadataStore;

/// Receives sync progress; called synchronously after every chunk
pub trait ProgressReporter {
    fn report(&self, processed: usize, total: usize);
}

/// Reporter that ignores progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _processed: usize, _total: usize) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(usize, usize),
{
    fn report(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}

/// What one sync did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Distinct ids the server listed for the range
    pub remote: usize,
    /// Of those, ids already in the store
    pub cached: usize,
    /// Records returned by metadata fetches
    pub fetched: usize,
    /// Records newly written to the store
    pub inserted: usize,
    /// Missing ids left for the next sync
    pub deferred_ids: Vec<String>,
}

impl SyncReport {
    pub fn missing(&self) -> usize {
        self.remote - self.cached
    }

    pub fn is_complete(&self) -> bool {
        self.deferred_ids.is_empty()
    }
}

/// Drives the fetcher and writes into the store
pub struct Reconciler {
    fetcher: RemoteFetcher,
}

impl Reconciler {
    pub fn new(policy: FetchPolicy) -> Self {
        Self {
            fetcher: RemoteFetcher::new(policy),
        }
    }

    pub fn fetcher(&self) -> &RemoteFetcher {
        &self.fetcher
    }

    /// Fetch every message in `range` the store does not hold yet
    pub async fn sync(
        &self,
        session: &mut dyn MailboxSession,
        store: &mut MetadataStore,
        range: &SyncRange,
        reporter: &dyn ProgressReporter,
    ) -> Result<SyncReport> {
        let listed = self.fetcher.list_ids(session, range).await?;
        let remote_ids = dedup_in_order(listed);
        let local_ids = store.list_ids(range)?;

        let missing: Vec<String> = remote_ids
            .iter()
            .filter(|id| !local_ids.contains(*id))
            .cloned()
            .collect();

        let mut report = SyncReport {
            remote: remote_ids.len(),
            cached: remote_ids.len() - missing.len(),
            ..Default::default()
        };

        if missing.is_empty() {
            debug!("Cache is current: {} messages in range", report.remote);
            return Ok(report);
        }

        info!(
            "{} of {} messages need fetching ({} cached)",
            missing.len(),
            report.remote,
            report.cached
        );

        let total = missing.len();
        let mut processed = 0;
        let mut stored: HashSet<String> = HashSet::with_capacity(total);
        reporter.report(processed, total);

        {
            let mut chunks = self.fetcher.fetch_metadata(session, missing.clone());
            while let Some(chunk) = chunks.next().await {
                processed += chunk.len();
                if let ChunkOutcome::Fetched { records, .. } = chunk {
                    report.fetched += records.len();
                    report.inserted += store.put(&records)?;
                    stored.extend(records.into_iter().map(|r| r.message_id));
                }
                reporter.report(processed, total);
            }
        }

        report.deferred_ids = missing
            .into_iter()
            .filter(|id| !stored.contains(id))
            .collect();

        if report.is_complete() {
            info!("Sync complete: {} new messages cached", report.inserted);
        } else {
            warn!(
                "Sync incomplete: {} messages could not be fetched and will be retried next time",
                report.deferred_ids.len()
            );
        }

        Ok(report)
    }
}

/// Drop repeated ids, keeping the first occurrence
fn dedup_in_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
