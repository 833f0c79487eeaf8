use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every web link; the percent-encoded message id follows it
pub const WEB_LINK_PREFIX: &str = "https://mail.google.com/mail/u/0/#all/";

/// Cached metadata for one message. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<FixedOffset>,
    pub web_link: String,
}

impl MessageRecord {
    /// Build a record, deriving the web link from the id
    pub fn new(
        message_id: impl Into<String>,
        subject: impl Into<String>,
        sender: impl Into<String>,
        received_at: DateTime<FixedOffset>,
    ) -> Self {
        let message_id = message_id.into();
        let web_link = web_link(&message_id);
        Self {
            message_id,
            subject: subject.into(),
            sender: sender.into(),
            received_at,
            web_link,
        }
    }

    pub fn received_at_utc(&self) -> DateTime<Utc> {
        self.received_at.with_timezone(&Utc)
    }
}

/// Half-open window `[since, until)` reconciled for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRange {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl SyncRange {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// The last `days` days ending at `now`
    ///
    /// A span reaching past the earliest representable instant starts there.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        let since = now
            .checked_sub_signed(Duration::days(i64::from(days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { since, until: now }
    }

    pub fn contains(&self, instant: &DateTime<FixedOffset>) -> bool {
        let instant = instant.with_timezone(&Utc);
        self.since <= instant && instant < self.until
    }

    pub fn is_empty(&self) -> bool {
        self.since >= self.until
    }
}

/// Gmail web link for a message id
pub fn web_link(message_id: &str) -> String {
    format!("{}{}", WEB_LINK_PREFIX, urlencoding::encode(message_id))
}

/// Reverse of [`web_link`]
pub fn message_id_from_link(link: &str) -> Option<String> {
    let encoded = link.strip_prefix(WEB_LINK_PREFIX)?;
    urlencoding::decode(encoded).ok().map(|id| id.into_owned())
}
