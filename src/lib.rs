//! Gmail Metadata Search
//!
//! Local-first regex search over Gmail message metadata. Subjects, senders and
//! receive times are cached in SQLite; every search first reconciles the
//! requested date range with the server, fetching only what the cache lacks,
//! then matches against the cache.
//!
//! # Overview
//!
//! - **Authentication**: IMAP login with an app password
//! - **Fetching**: chunked, paced and retried metadata retrieval
//! - **Store**: append-only SQLite cache keyed by message id
//! - **Sync**: gap-only reconciliation of one date range
//! - **Query**: case-insensitive regex over subject and sender
//!
//! # Example Usage
//!
//! ```no_run
//! use chrono::Utc;
//! use gmail_search::{auth, Credentials, Config, FetchPolicy, Matcher, MetadataStore, NoProgress, QueryEngine, SyncRange};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(".gmail-search/config.toml".as_ref()).await?;
//!     let matcher = Matcher::compile("canadabooks")?;
//!
//!     let credentials = Credentials::new("me@gmail.com", "app password");
//!     let mut session = auth::authenticate(&config, &credentials).await?;
//!
//!     let store = MetadataStore::open(&config.cache.path)?;
//!     let mut engine = QueryEngine::new(store, FetchPolicy::from_config(&config));
//!     let range = SyncRange::last_days(365, Utc::now());
//!
//!     let outcome = engine.search(&mut session, &matcher, &range, &NoProgress).await?;
//!     for record in outcome.records {
//!         println!("{}  {}  {}", record.received_at, record.subject, record.web_link);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - IMAP login and credentials
//! - [`client`] - Mailbox session trait and the IMAP implementation
//! - [`cli`] - Command-line interface and command orchestration
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`fetcher`] - Chunked remote fetching with retries
//! - [`models`] - Message records, date ranges and web links
//! - [`query`] - Pattern matching and the query engine
//! - [`rate_limiter`] - Spacing between remote requests
//! - [`store`] - SQLite metadata cache
//! - [`sync`] - Reconciliation of the cache with the server

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod query;
pub mod rate_limiter;
pub mod store;
pub mod sync;

pub use auth::Credentials;
pub use client::{ImapSession, MailboxSession};
pub use config::Config;
pub use error::{Result, SearchError};
pub use fetcher::{ChunkOutcome, FetchOutcome, FetchPolicy, RemoteFetcher};
pub use models::{MessageRecord, SyncRange};
pub use query::{Matcher, QueryEngine, SearchOutcome};
pub use store::MetadataStore;
pub use sync::{NoProgress, ProgressReporter, Reconciler, SyncReport};
