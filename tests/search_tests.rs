//! End-to-end search behaviour: sync, match, degrade and rebuild

mod common;

use std::path::PathBuf;

use chrono::{FixedOffset, TimeZone, Utc};

use common::{create_inbox, create_test_record, fast_policy, last_month, FakeMailbox};
use gmail_search::cli::{self, Cli, Commands, ConsoleProgress, SearchRequest};
use gmail_search::config::Config;
use gmail_search::error::SearchError;
use gmail_search::models::{message_id_from_link, web_link, MessageRecord};
use gmail_search::query::{Matcher, QueryEngine};
use gmail_search::store::MetadataStore;
use gmail_search::sync::NoProgress;
use indicatif::{MultiProgress, ProgressDrawTarget};
use proptest::prelude::*;

fn bookshop_inbox() -> Vec<MessageRecord> {
    vec![
        create_test_record("a1", "canadabooks@ca", "Order from CanadaBooks", 5),
        create_test_record("a2", "x@y.com", "Book club", 30),
        create_test_record("a3", "news@paper.com", "Morning headlines", 50),
        create_test_record("a4", "billing@power.com", "Your order is ready", 70),
    ]
}

fn ids(records: &[MessageRecord]) -> Vec<&str> {
    records.iter().map(|r| r.message_id.as_str()).collect()
}

fn offline_cli() -> Cli {
    Cli {
        config: PathBuf::from("unused.toml"),
        address: None,
        app_password: None,
        verbose: false,
        command: Commands::Status,
    }
}

fn hidden_console() -> ConsoleProgress {
    ConsoleProgress::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
}

#[tokio::test]
async fn test_pattern_matches_subject_or_sender_case_insensitively() {
    let mut engine = QueryEngine::new(MetadataStore::open_in_memory().unwrap(), fast_policy(10));
    let mut mailbox = FakeMailbox::with_messages(bookshop_inbox());

    let book = engine
        .search(&mut mailbox, &Matcher::compile("book").unwrap(), &last_month(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(ids(&book.records), vec!["a1", "a2"]);

    let anchored = engine
        .search(&mut mailbox, &Matcher::compile("^Order").unwrap(), &last_month(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(ids(&anchored.records), vec!["a1"]);

    let by_sender = engine
        .search(&mut mailbox, &Matcher::compile(r"@power\.com$").unwrap(), &last_month(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(ids(&by_sender.records), vec!["a4"]);
}

#[tokio::test]
async fn test_repeat_search_is_served_from_cache() {
    let mut engine = QueryEngine::new(MetadataStore::open_in_memory().unwrap(), fast_policy(10));
    let mut mailbox = FakeMailbox::with_messages(bookshop_inbox());
    let matcher = Matcher::compile("order").unwrap();

    let first = engine
        .search(&mut mailbox, &matcher, &last_month(), &NoProgress)
        .await
        .unwrap();
    mailbox.reset_counters();
    let second = engine
        .search(&mut mailbox, &matcher, &last_month(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(first.records, second.records);
    assert_eq!(mailbox.fetch_calls, 0);
    assert_eq!(second.sync.map(|s| s.inserted), Some(0));
}

#[tokio::test]
async fn test_new_mail_shows_up_on_next_search() {
    let mut engine = QueryEngine::new(MetadataStore::open_in_memory().unwrap(), fast_policy(10));
    let mut mailbox = FakeMailbox::with_messages(bookshop_inbox());
    let matcher = Matcher::compile("canadabooks").unwrap();

    let before = engine
        .search(&mut mailbox, &matcher, &last_month(), &NoProgress)
        .await
        .unwrap();
    assert_eq!(before.records.len(), 1);

    mailbox.messages.push(create_test_record(
        "a5",
        "canadabooks@ca",
        "Your CanadaBooks order shipped",
        1,
    ));
    let after = engine
        .search(&mut mailbox, &matcher, &last_month(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(ids(&after.records), vec!["a5", "a1"]);
    assert_eq!(mailbox.fetched_ids.last().map(String::as_str), Some("a5"));
}

#[tokio::test]
async fn test_partial_failure_still_answers_from_what_was_stored() {
    let inbox = create_inbox(20);
    let mut mailbox = FakeMailbox::with_messages(inbox.clone());
    mailbox.fail_ids([0, 9, 19].iter().map(|&i| inbox[i].message_id.clone()));
    let mut engine = QueryEngine::new(MetadataStore::open_in_memory().unwrap(), fast_policy(1));

    let outcome = engine
        .search(&mut mailbox, &Matcher::compile("message number").unwrap(), &last_month(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 17);
    assert!(outcome.is_partial());
    assert_eq!(outcome.sync.map(|s| s.deferred_ids.len()), Some(3));
}

#[tokio::test]
async fn test_unreachable_server_degrades_to_cache() {
    let mut store = MetadataStore::open_in_memory().unwrap();
    store.put(&bookshop_inbox()[..2]).unwrap();
    let mut engine = QueryEngine::new(store, fast_policy(10));
    let mut mailbox = FakeMailbox::with_messages(bookshop_inbox());
    mailbox.offline = true;

    let outcome = engine
        .search(&mut mailbox, &Matcher::compile("book").unwrap(), &last_month(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(ids(&outcome.records), vec!["a1", "a2"]);
    assert!(outcome.sync.is_none());
    // first try plus retries
    assert_eq!(mailbox.list_calls, 3);
}

#[tokio::test]
async fn test_deleting_the_store_reproduces_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let mut mailbox = FakeMailbox::with_messages(bookshop_inbox());
    let matcher = Matcher::compile("book|order").unwrap();

    let mut engine = QueryEngine::new(MetadataStore::open(&path).unwrap(), fast_policy(2));
    let original = engine
        .search(&mut mailbox, &matcher, &last_month(), &NoProgress)
        .await
        .unwrap();
    engine.into_store().close().unwrap();

    assert!(MetadataStore::remove_files(&path).unwrap());
    assert!(!path.exists());

    let mut engine = QueryEngine::new(MetadataStore::open(&path).unwrap(), fast_policy(2));
    let rebuilt = engine
        .search(&mut mailbox, &matcher, &last_month(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(ids(&original.records), vec!["a1", "a2", "a4"]);
    assert_eq!(original.records, rebuilt.records);
}

#[tokio::test]
async fn test_invalid_pattern_fails_before_touching_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.cache.path = dir.path().join("cache.db");
    let request = SearchRequest {
        pattern: "order(".to_string(),
        days: None,
        offline: false,
    };

    let result = cli::run_search(&offline_cli(), &config, &request, &hidden_console()).await;

    assert!(matches!(result, Err(SearchError::PatternError(_))));
    assert!(!config.cache.path.exists());
}

#[tokio::test]
async fn test_online_search_without_credentials_is_auth_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.cache.path = dir.path().join("cache.db");
    let request = SearchRequest {
        pattern: "order".to_string(),
        days: Some(7),
        offline: false,
    };

    let result = cli::run_search(&offline_cli(), &config, &request, &hidden_console()).await;

    assert!(matches!(result, Err(SearchError::AuthError(_))));
}

#[tokio::test]
async fn test_offline_search_reads_existing_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.cache.path = dir.path().join("cache.db");

    let an_hour_ago = Utc
        .timestamp_opt(Utc::now().timestamp() - 3600, 0)
        .unwrap()
        .with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap());
    let fresh = MessageRecord::new("f1", "Order from CanadaBooks", "canadabooks@ca", an_hour_ago);
    let mut store = MetadataStore::open(&config.cache.path).unwrap();
    store.put(&[fresh.clone()]).unwrap();
    store.close().unwrap();

    let request = SearchRequest {
        pattern: "CANADA".to_string(),
        days: Some(3),
        offline: true,
    };
    let outcome = cli::run_search(&offline_cli(), &config, &request, &hidden_console())
        .await
        .unwrap();

    assert_eq!(outcome.records, vec![fresh]);
    assert!(outcome.sync.is_none());
}

#[tokio::test]
async fn test_huge_day_count_searches_whole_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.cache.path = dir.path().join("cache.db");

    let ancient = FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(1995, 5, 1, 9, 0, 0)
        .unwrap();
    let record = MessageRecord::new("old1", "Order from CanadaBooks", "canadabooks@ca", ancient);
    let mut store = MetadataStore::open(&config.cache.path).unwrap();
    store.put(&[record.clone()]).unwrap();
    store.close().unwrap();

    let request = SearchRequest {
        pattern: "canadabooks".to_string(),
        days: Some(u32::MAX),
        offline: true,
    };
    let outcome = cli::run_search(&offline_cli(), &config, &request, &hidden_console())
        .await
        .unwrap();

    assert_eq!(outcome.records, vec![record]);
}

proptest! {
    #[test]
    fn test_web_link_round_trips(id in "\\PC{0,40}") {
        let link = web_link(&id);
        prop_assert!(link.starts_with("https://mail.google.com/mail/u/0/#all/"));
        prop_assert_eq!(message_id_from_link(&link), Some(id));
    }

    #[test]
    fn test_hex_ids_are_not_escaped(n in any::<u64>()) {
        let id = format!("{:x}", n);
        let suffix = format!("#all/{}", id);
        prop_assert!(web_link(&id).ends_with(&suffix));
    }
}
