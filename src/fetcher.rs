//! Remote fetcher: chunked, paced and retried metadata retrieval

use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::MailboxSession;
use crate::config::{Config, FetchConfig};
use crate::error::{Result, SearchError};
use crate::models::{MessageRecord, SyncRange};
use crate::rate_limiter::RequestPacer;

/// Upper bound for the exponential retry delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How the fetcher talks to the server
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Ids per remote request
    pub chunk_size: usize,
    /// Minimum spacing between remote requests
    pub chunk_delay: Duration,
    /// Total attempts per request, first try included
    pub max_attempts: u32,
    /// Delay before the first retry; doubles afterwards
    pub retry_delay: Duration,
    /// Deadline for a single remote request
    pub request_timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl FetchPolicy {
    pub fn from_config(config: &Config) -> Self {
        let FetchConfig {
            chunk_size,
            chunk_delay_ms,
            max_attempts,
            retry_delay_ms,
        } = config.fetch;
        Self {
            chunk_size: chunk_size.max(1),
            chunk_delay: Duration::from_millis(chunk_delay_ms),
            max_attempts: max_attempts.max(1),
            retry_delay: Duration::from_millis(retry_delay_ms),
            request_timeout: config.imap.timeout(),
        }
    }
}

/// Result of one chunk of a metadata fetch
#[derive(Debug)]
pub enum ChunkOutcome {
    /// The server answered; `records` may cover fewer ids than `requested`
    Fetched {
        requested: Vec<String>,
        records: Vec<MessageRecord>,
    },
    /// The chunk still failed after all retries
    Failed { ids: Vec<String>, error: SearchError },
}

impl ChunkOutcome {
    /// Number of ids this chunk covered
    pub fn len(&self) -> usize {
        match self {
            ChunkOutcome::Fetched { requested, .. } => requested.len(),
            ChunkOutcome::Failed { ids, .. } => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collected result of [`RemoteFetcher::fetch_all`]
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<MessageRecord>,
    /// Ids whose chunk failed after retries
    pub failed_ids: Vec<String>,
}

/// Retry bookkeeping for one remote request
struct Backoff {
    attempt: u32,
    max_attempts: u32,
    delay: Duration,
}

impl Backoff {
    /// Sleep and return true if `error` deserves another attempt
    async fn retry(&mut self, operation: &str, error: &SearchError) -> bool {
        if !error.is_transient() || self.attempt >= self.max_attempts {
            return false;
        }
        warn!(
            "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
            operation, self.attempt, self.max_attempts, error, self.delay
        );
        tokio::time::sleep(self.delay).await;
        self.delay = std::cmp::min(self.delay * 2, MAX_RETRY_DELAY);
        self.attempt += 1;
        true
    }
}

/// Fetches listings and metadata through a [`MailboxSession`]
pub struct RemoteFetcher {
    policy: FetchPolicy,
    pacer: RequestPacer,
}

impl RemoteFetcher {
    pub fn new(policy: FetchPolicy) -> Self {
        let pacer = RequestPacer::new(policy.chunk_delay);
        Self { policy, pacer }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    fn backoff(&self) -> Backoff {
        Backoff {
            attempt: 1,
            max_attempts: self.policy.max_attempts,
            delay: self.policy.retry_delay,
        }
    }

    /// Pace, then run `call` under the request timeout
    async fn timed<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        self.pacer.acquire().await;
        match tokio::time::timeout(self.policy.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout(self.policy.request_timeout)),
        }
    }

    /// List ids received in `range`, retrying transient failures
    ///
    /// A listing spans several server commands, so it gets no single
    /// deadline here; sessions bound each of those commands themselves.
    pub async fn list_ids(
        &self,
        session: &mut dyn MailboxSession,
        range: &SyncRange,
    ) -> Result<Vec<String>> {
        let mut backoff = self.backoff();
        loop {
            self.pacer.acquire().await;
            let error = match session.list_ids(range).await {
                Ok(ids) => {
                    debug!("Remote listing returned {} ids", ids.len());
                    return Ok(ids);
                }
                Err(e) => e,
            };
            if !backoff.retry("list_ids", &error).await {
                return Err(error);
            }
        }
    }

    async fn fetch_chunk_with_retry(
        &self,
        session: &mut dyn MailboxSession,
        chunk: &[String],
    ) -> Result<Vec<MessageRecord>> {
        let mut backoff = self.backoff();
        loop {
            let error = match self.timed(session.fetch_chunk(chunk)).await {
                Ok(records) => return Ok(records),
                Err(e) => e,
            };
            if !backoff.retry("fetch_chunk", &error).await {
                return Err(error);
            }
        }
    }

    /// Fetch metadata for `ids` chunk by chunk.
    ///
    /// Yields one [`ChunkOutcome`] per chunk as soon as it completes so the
    /// caller can persist progress incrementally. A failing chunk never ends
    /// the stream.
    pub fn fetch_metadata<'a>(
        &'a self,
        session: &'a mut dyn MailboxSession,
        ids: Vec<String>,
    ) -> Pin<Box<dyn Stream<Item = ChunkOutcome> + Send + 'a>> {
        Box::pin(stream! {
            let total = ids.len();
            let chunk_count = total.div_ceil(self.policy.chunk_size);
            info!(
                "Fetching metadata for {} messages in {} chunks of up to {}",
                total, chunk_count, self.policy.chunk_size
            );

            for (index, chunk) in ids.chunks(self.policy.chunk_size).enumerate() {
                debug!("Fetching chunk {}/{} ({} ids)", index + 1, chunk_count, chunk.len());
                match self.fetch_chunk_with_retry(&mut *session, chunk).await {
                    Ok(records) => {
                        if records.len() < chunk.len() {
                            debug!(
                                "Chunk {} returned {} of {} requested messages",
                                index + 1,
                                records.len(),
                                chunk.len()
                            );
                        }
                        yield ChunkOutcome::Fetched {
                            requested: chunk.to_vec(),
                            records,
                        };
                    }
                    Err(error) => {
                        warn!(
                            "Giving up on chunk {} ({} ids): {}",
                            index + 1,
                            chunk.len(),
                            error
                        );
                        yield ChunkOutcome::Failed {
                            ids: chunk.to_vec(),
                            error,
                        };
                    }
                }
            }

            let pacing = self.pacer.stats().await;
            debug!(
                "{} remote requests, {:.1}s spent pacing at {:?} intervals",
                pacing.total_requests,
                pacing.total_waited.as_secs_f64(),
                pacing.interval
            );
        })
    }

    /// Fetch everything and collect it; partial results allowed
    pub async fn fetch_all(
        &self,
        session: &mut dyn MailboxSession,
        ids: Vec<String>,
    ) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let mut chunks = self.fetch_metadata(session, ids);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                ChunkOutcome::Fetched { records, .. } => outcome.records.extend(records),
                ChunkOutcome::Failed { ids, .. } => outcome.failed_ids.extend(ids),
            }
        }
        outcome
    }
}
