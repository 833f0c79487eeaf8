//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use gmail_search::client::MailboxSession;
use gmail_search::error::{Result, SearchError};
use gmail_search::fetcher::FetchPolicy;
use gmail_search::models::{MessageRecord, SyncRange};
use mockall::mock;
use std::collections::HashSet;
use std::time::Duration;

/// Fixed "now" so date ranges are reproducible
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// The last 30 days before [`now`]
pub fn last_month() -> SyncRange {
    SyncRange::last_days(30, now())
}

/// Create a test record received `hours_ago` before [`now`], in UTC-5
pub fn create_test_record(id: &str, sender: &str, subject: &str, hours_ago: i64) -> MessageRecord {
    let offset = FixedOffset::west_opt(5 * 3600).unwrap();
    let received_at = (now() - ChronoDuration::hours(hours_ago)).with_timezone(&offset);
    MessageRecord::new(id, subject, sender, received_at)
}

/// `count` distinct records, one hour apart, newest first
pub fn create_inbox(count: usize) -> Vec<MessageRecord> {
    (0..count)
        .map(|i| {
            create_test_record(
                &format!("18f{:013x}", i),
                &format!("sender{}@example.com", i),
                &format!("Message number {}", i),
                i as i64 + 1,
            )
        })
        .collect()
}

/// Policy with no pacing and near-instant retries
pub fn fast_policy(chunk_size: usize) -> FetchPolicy {
    FetchPolicy {
        chunk_size,
        chunk_delay: Duration::ZERO,
        max_attempts: 3,
        retry_delay: Duration::from_millis(1),
        request_timeout: Duration::from_secs(5),
    }
}

/// In-memory mailbox that records what was asked of it
#[derive(Default)]
pub struct FakeMailbox {
    /// Messages on the server, in server order
    pub messages: Vec<MessageRecord>,
    /// Chunks containing any of these ids fail with a transient error
    pub failing_ids: HashSet<String>,
    /// The listing fails with a transient error
    pub offline: bool,
    /// Fetch calls after this many never answer
    pub stall_after: Option<usize>,
    /// Every id passed to `fetch_chunk`, retries included
    pub fetched_ids: Vec<String>,
    pub list_calls: usize,
    pub fetch_calls: usize,
    pub logged_out: bool,
}

impl FakeMailbox {
    pub fn with_messages(messages: Vec<MessageRecord>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn fail_ids<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.failing_ids.extend(ids);
    }

    pub fn heal(&mut self) {
        self.failing_ids.clear();
        self.stall_after = None;
    }

    pub fn reset_counters(&mut self) {
        self.fetched_ids.clear();
        self.list_calls = 0;
        self.fetch_calls = 0;
    }
}

#[async_trait]
impl MailboxSession for FakeMailbox {
    async fn list_ids(&mut self, range: &SyncRange) -> Result<Vec<String>> {
        self.list_calls += 1;
        if self.offline {
            return Err(SearchError::FetchError("connection refused".to_string()));
        }
        Ok(self
            .messages
            .iter()
            .filter(|m| range.contains(&m.received_at))
            .map(|m| m.message_id.clone())
            .collect())
    }

    async fn fetch_chunk(&mut self, ids: &[String]) -> Result<Vec<MessageRecord>> {
        self.fetch_calls += 1;
        if self.stall_after.is_some_and(|answered| self.fetch_calls > answered) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.fetched_ids.extend(ids.iter().cloned());
        if ids.iter().any(|id| self.failing_ids.contains(id)) {
            return Err(SearchError::FetchError("server closed connection".to_string()));
        }
        Ok(self
            .messages
            .iter()
            .filter(|m| ids.contains(&m.message_id))
            .cloned()
            .collect())
    }

    async fn logout(&mut self) -> Result<()> {
        self.logged_out = true;
        Ok(())
    }
}

// Mock implementation of MailboxSession for testing
mock! {
    pub Mailbox {}

    #[async_trait::async_trait]
    impl MailboxSession for Mailbox {
        async fn list_ids(&mut self, range: &SyncRange) -> Result<Vec<String>>;
        async fn fetch_chunk(&mut self, ids: &[String]) -> Result<Vec<MessageRecord>>;
        async fn logout(&mut self) -> Result<()>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_record() {
        let record = create_test_record("abc", "a@example.com", "Hello", 2);
        assert_eq!(record.message_id, "abc");
        assert_eq!(record.received_at_utc(), now() - ChronoDuration::hours(2));
        assert!(last_month().contains(&record.received_at));
    }

    #[test]
    fn test_create_inbox_ids_are_unique() {
        let inbox = create_inbox(50);
        let ids: HashSet<_> = inbox.iter().map(|r| r.message_id.clone()).collect();
        assert_eq!(ids.len(), 50);
    }
}
