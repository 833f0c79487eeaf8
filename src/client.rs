//! IMAP mailbox session with header parsing

use async_imap::types::Fetch;
use async_imap::Session;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, FixedOffset, TimeZone, Utc};
use futures::io::{AsyncRead, AsyncWrite};
use futures::TryStreamExt;
use mailparse::MailHeaderMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::compat::Compat;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::models::{MessageRecord, SyncRange};
use crate::rate_limiter::RequestPacer;

/// UIDs per `UID FETCH` while listing; the response per UID is tiny
const LIST_FETCH_BATCH: usize = 500;

/// Trait defining remote mailbox operations for easier testing
///
/// One value of this trait is one authenticated session. `fetch_chunk` is a
/// single round trip; `list_ids` may take several, each bounded by the
/// session. Chunking, pacing and retries live in
/// [`crate::fetcher::RemoteFetcher`].
#[async_trait]
pub trait MailboxSession: Send {
    /// Ids of messages received inside `range`, in server order
    async fn list_ids(&mut self, range: &SyncRange) -> Result<Vec<String>>;

    /// Header metadata for `ids`. Unknown or vanished ids are left out.
    async fn fetch_chunk(&mut self, ids: &[String]) -> Result<Vec<MessageRecord>>;

    /// Close the session
    async fn logout(&mut self) -> Result<()>;
}

/// Byte stream an IMAP session can run over
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send {}

impl<T> ImapStream for T where T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send {}

/// TLS over tokio TCP, the transport used against Gmail
pub type TlsConnection = async_native_tls::TlsStream<Compat<TcpStream>>;

/// Per-command deadline and spacing for one connection
#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    pub timeout: Duration,
    /// Minimum gap between listing batches
    pub spacing: Duration,
}

impl CommandLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.imap.timeout(),
            spacing: Duration::from_millis(config.fetch.chunk_delay_ms),
        }
    }
}

/// Run one IMAP command under `timeout`
async fn timed<T, F>(timeout: Duration, command: F) -> Result<T>
where
    F: Future<Output = async_imap::error::Result<T>>,
{
    match tokio::time::timeout(timeout, command).await {
        Ok(result) => result.map_err(SearchError::from),
        Err(_) => Err(SearchError::Timeout(timeout)),
    }
}

/// `UID FETCH` and collect every response
async fn uid_fetch_all<S: ImapStream>(
    session: &mut Session<S>,
    timeout: Duration,
    uids: &str,
    items: &str,
) -> Result<Vec<Fetch>> {
    timed(timeout, async {
        let responses = session.uid_fetch(uids, items).await?;
        responses.try_collect::<Vec<_>>().await
    })
    .await
}

/// Gmail session over IMAP
///
/// Message ids are Gmail's `X-GM-MSGID` in hex. Listing remembers which UID
/// belongs to which id so later fetches can address messages by UID.
///
/// Every command runs under [`CommandLimits::timeout`]. A command that never
/// finished (timed out, or its future was dropped) leaves unread responses on
/// the wire, so the connection refuses further commands and `logout` just
/// drops it.
pub struct ImapSession<S: ImapStream = TlsConnection> {
    session: Session<S>,
    mailbox: String,
    uid_index: HashMap<String, u32>,
    limits: CommandLimits,
    pacer: RequestPacer,
    in_flight: bool,
}

impl<S: ImapStream> ImapSession<S> {
    pub(crate) fn new(session: Session<S>, mailbox: String, limits: CommandLimits) -> Self {
        Self {
            session,
            mailbox,
            uid_index: HashMap::new(),
            limits,
            pacer: RequestPacer::new(limits.spacing),
            in_flight: false,
        }
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Claim the connection for one command
    fn begin(&mut self) -> Result<()> {
        if self.in_flight {
            return Err(SearchError::FetchError(
                "IMAP connection out of sync after an unfinished command".to_string(),
            ));
        }
        self.in_flight = true;
        Ok(())
    }

    /// Release the connection unless the command timed out
    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Err(SearchError::Timeout(after)) => {
                warn!("IMAP command got no answer within {:?}", after);
            }
            _ => self.in_flight = false,
        }
        result
    }
}

#[async_trait]
impl<S: ImapStream> MailboxSession for ImapSession<S> {
    async fn list_ids(&mut self, range: &SyncRange) -> Result<Vec<String>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let query = search_query(range);
        let timeout = self.limits.timeout;
        debug!("UID SEARCH {} in {}", query, self.mailbox);

        self.begin()?;
        let searched = timed(timeout, self.session.uid_search(&query)).await;
        let mut uids: Vec<u32> = self.finish(searched)?.into_iter().collect();
        uids.sort_unstable();

        let mut ids = Vec::with_capacity(uids.len());
        for batch in uids.chunks(LIST_FETCH_BATCH) {
            self.pacer.acquire().await;
            self.begin()?;
            let fetched = uid_fetch_all(
                &mut self.session,
                timeout,
                &uid_set(batch),
                "(UID X-GM-MSGID INTERNALDATE)",
            )
            .await;

            for fetch in self.finish(fetched)? {
                let (Some(uid), Some(msg_id)) = (fetch.uid, fetch.gmail_msg_id()) else {
                    trace!("Skipping FETCH response without UID or X-GM-MSGID");
                    continue;
                };
                // SEARCH is day-granular; INTERNALDATE gives the exact cut
                match fetch.internal_date() {
                    Some(received) if range.contains(&received) => {
                        let id = format_message_id(msg_id);
                        self.uid_index.insert(id.clone(), uid);
                        ids.push(id);
                    }
                    _ => {}
                }
            }
        }

        debug!("Listed {} message ids in {}", ids.len(), self.mailbox);
        Ok(ids)
    }

    async fn fetch_chunk(&mut self, ids: &[String]) -> Result<Vec<MessageRecord>> {
        let uids: Vec<u32> = ids
            .iter()
            .filter_map(|id| {
                let uid = self.uid_index.get(id).copied();
                if uid.is_none() {
                    debug!("No UID known for message {}, skipping", id);
                }
                uid
            })
            .collect();

        if uids.is_empty() {
            return Ok(Vec::new());
        }

        self.begin()?;
        let fetched = uid_fetch_all(
            &mut self.session,
            self.limits.timeout,
            &uid_set(&uids),
            "(UID X-GM-MSGID INTERNALDATE BODY.PEEK[HEADER])",
        )
        .await;

        let mut records = Vec::with_capacity(uids.len());
        for fetch in self.finish(fetched)? {
            let Some(msg_id) = fetch.gmail_msg_id() else {
                continue;
            };
            let id = format_message_id(msg_id);
            let headers = fetch.header().unwrap_or(&[]);
            match parse_record(&id, headers, fetch.internal_date()) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Dropping unparseable message {}: {}", id, e),
            }
        }
        Ok(records)
    }

    async fn logout(&mut self) -> Result<()> {
        if self.in_flight {
            debug!("Dropping IMAP connection without LOGOUT");
            return Ok(());
        }
        self.begin()?;
        let result = timed(self.limits.timeout, self.session.logout()).await;
        self.finish(result)?;
        debug!("Logged out of IMAP session");
        Ok(())
    }
}

/// Gmail web ids are the X-GM-MSGID in lowercase hex
pub fn format_message_id(gmail_msg_id: impl fmt::LowerHex) -> String {
    format!("{:x}", gmail_msg_id)
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// `SINCE` / `BEFORE` criteria covering `range`, widened to whole days
///
/// Ranges opening before 1970 drop `SINCE`: nothing in a mailbox is older.
pub fn search_query(range: &SyncRange) -> String {
    // The server compares dates in its own timezone, so pad a day on each side
    let before = range
        .until
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or(range.until.date_naive());
    let before = format!("BEFORE {}", before.format("%-d-%b-%Y"));

    match range.since.date_naive().checked_sub_days(Days::new(1)) {
        Some(since) if since.year() >= 1970 => {
            format!("SINCE {} {}", since.format("%-d-%b-%Y"), before)
        }
        _ => before,
    }
}

/// Build a record from raw header bytes
pub fn parse_record(
    message_id: &str,
    raw_headers: &[u8],
    internal_date: Option<DateTime<FixedOffset>>,
) -> Result<MessageRecord> {
    let (headers, _) = mailparse::parse_headers(raw_headers)
        .map_err(|e| SearchError::InvalidMessageFormat(format!("Bad header block: {}", e)))?;

    let subject = headers.get_first_value("Subject").unwrap_or_default();
    let sender = headers
        .get_first_value("From")
        .map(|from| parse_sender(&from))
        .unwrap_or_default();

    let received_at = match internal_date {
        Some(date) => date,
        None => headers
            .get_first_value("Date")
            .as_deref()
            .and_then(parse_date)
            .ok_or_else(|| {
                SearchError::InvalidMessageFormat(format!(
                    "Message {} has neither INTERNALDATE nor a Date header",
                    message_id
                ))
            })?,
    };

    Ok(MessageRecord::new(
        message_id,
        subject.trim(),
        sender,
        received_at,
    ))
}

/// Extract the bare address of a From header, falling back to the raw value
pub fn parse_sender(from: &str) -> String {
    mailparse::addrparse(from)
        .ok()
        .and_then(|list| list.extract_single_info())
        .map(|info| info.addr)
        .unwrap_or_else(|| from.trim().to_string())
}

/// Parse an RFC 2822 date, keeping its offset
fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(date_str.trim()).ok().or_else(|| {
        // mailparse copes with the sloppier dates real mail carries
        let ts = mailparse::dateparse(date_str).ok()?;
        Utc.timestamp_opt(ts, 0)
            .single()
            .map(DateTime::<FixedOffset>::from)
    })
}
