//! Query engine: sync the range, then match cached metadata
//!
//! The engine never talks to the server itself. Remote work goes through the
//! [`Reconciler`]; matching always runs over the local store, so results are
//! the same whether the cache was filled now or weeks ago.

use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};

use crate::client::MailboxSession;
use crate::error::Result;
use crate::fetcher::FetchPolicy;
use crate::models::{MessageRecord, SyncRange};
use crate::store::MetadataStore;
use crate::sync::{ProgressReporter, Reconciler, SyncReport};

/// Compiled case-insensitive pattern over subject and sender
#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
}

impl Matcher {
    /// Compile `pattern`; invalid syntax is a `PatternError`
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { regex })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn matches(&self, record: &MessageRecord) -> bool {
        self.regex.is_match(&record.subject) || self.regex.is_match(&record.sender)
    }
}

/// Matches plus what the sync did to get them
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Most recent first
    pub records: Vec<MessageRecord>,
    /// `None` when the answer came from the cache alone
    pub sync: Option<SyncReport>,
}

impl SearchOutcome {
    /// True when the results may be missing messages from the server
    pub fn is_partial(&self) -> bool {
        self.sync.as_ref().map_or(true, |report| !report.is_complete())
    }
}

pub struct QueryEngine {
    store: MetadataStore,
    reconciler: Reconciler,
}

impl QueryEngine {
    pub fn new(store: MetadataStore, policy: FetchPolicy) -> Self {
        Self {
            store,
            reconciler: Reconciler::new(policy),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Sync `range` into the store, then answer from it
    ///
    /// A listing that stays unreachable after retries downgrades the search to
    /// a cache-only answer (`sync = None`). Any other failure is returned.
    pub async fn search(
        &mut self,
        session: &mut dyn MailboxSession,
        matcher: &Matcher,
        range: &SyncRange,
        reporter: &dyn ProgressReporter,
    ) -> Result<SearchOutcome> {
        let sync = match self
            .reconciler
            .sync(session, &mut self.store, range, reporter)
            .await
        {
            Ok(report) => Some(report),
            Err(e) if e.is_transient() => {
                warn!("Could not reach the server ({}), answering from cache", e);
                None
            }
            Err(e) => return Err(e),
        };

        let records = self.matching(matcher, range)?;
        info!("Found {} messages matching '{}'", records.len(), matcher.pattern());
        Ok(SearchOutcome { records, sync })
    }

    /// Answer from the store without contacting the server
    pub fn search_cached(&self, matcher: &Matcher, range: &SyncRange) -> Result<SearchOutcome> {
        let records = self.matching(matcher, range)?;
        debug!(
            "Offline search for '{}' matched {} cached messages",
            matcher.pattern(),
            records.len()
        );
        Ok(SearchOutcome {
            records,
            sync: None,
        })
    }

    fn matching(&self, matcher: &Matcher, range: &SyncRange) -> Result<Vec<MessageRecord>> {
        Ok(self
            .store
            .scan(Some(range))?
            .into_iter()
            .filter(|record| matcher.matches(record))
            .collect())
    }

    /// Give the store back, e.g. to close it explicitly
    pub fn into_store(self) -> MetadataStore {
        self.store
    }
}
