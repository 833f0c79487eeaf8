//! Command-line interface

use chrono::Utc;
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{self, Credentials};
use crate::client::MailboxSession;
use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::fetcher::FetchPolicy;
use crate::models::{MessageRecord, SyncRange};
use crate::query::{Matcher, QueryEngine, SearchOutcome};
use crate::store::{MetadataStore, StoreStats};
use crate::sync::{self, SyncReport};

#[derive(Parser, Debug)]
#[command(name = "gmail-search")]
#[command(version = "0.1.0")]
#[command(about = "Fast regex search over a local cache of Gmail message metadata", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = ".gmail-search/config.toml")]
    pub config: PathBuf,

    /// Gmail address to log in with
    #[arg(long, env = "GMAIL_ADDRESS")]
    pub address: Option<String>,

    /// Gmail app password
    #[arg(long, env = "GMAIL_APP_PASSWORD", hide_env_values = true)]
    pub app_password: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search subjects and senders with a regular expression
    Search {
        /// Case-insensitive regular expression
        pattern: String,

        /// How many days back to search (default from config)
        #[arg(short, long)]
        days: Option<u32>,

        /// Only search the local cache, don't contact the server
        #[arg(long)]
        offline: bool,

        /// Show at most this many results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the credentials can log in
    Auth,

    /// Show what the local cache holds
    Status,

    /// Delete the local cache
    ClearCache {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = ".gmail-search/config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Everything `search` needs besides config and credentials
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub pattern: String,
    pub days: Option<u32>,
    pub offline: bool,
}

impl Cli {
    /// Credentials from flags or environment
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.address, &self.app_password) {
            (Some(address), Some(password)) => Ok(Credentials::new(address, password)),
            _ => Err(SearchError::AuthError(
                "Missing credentials: pass --address and --app-password or set GMAIL_ADDRESS and GMAIL_APP_PASSWORD"
                    .to_string(),
            )),
        }
    }
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Spinners and bars sharing the terminal with log output
pub struct ConsoleProgress {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ConsoleProgress {
    pub fn new(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }

    /// Ask a yes/no question with the bars suspended
    pub fn confirm(&self, question: &str) -> Result<bool> {
        self.multi.suspend(|| {
            print!("{} [y/N]: ", question);
            let _ = std::io::Write::flush(&mut std::io::stdout());
        });
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        Ok(input.trim().eq_ignore_ascii_case("y"))
    }
}

/// Progress bar fed by the reconciler
pub struct FetchProgressBar {
    bar: ProgressBar,
}

impl FetchProgressBar {
    pub fn new(console: &ConsoleProgress) -> Self {
        Self {
            bar: console.add_progress_bar(0, "Fetching message metadata..."),
        }
    }

    /// Leave the bar on screen only if something was fetched
    pub fn finish(&self, report: Option<&SyncReport>) {
        match report {
            Some(report) if report.missing() > 0 => {
                self.bar
                    .finish_with_message(format!("Cached {} new messages", report.inserted));
            }
            _ => self.bar.finish_and_clear(),
        }
    }
}

impl sync::ProgressReporter for FetchProgressBar {
    fn report(&self, processed: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(processed as u64);
    }
}

fn open_store(config: &Config) -> Result<MetadataStore> {
    if config.cache.rebuild_on_corruption {
        MetadataStore::open_or_rebuild(&config.cache.path)
    } else {
        MetadataStore::open(&config.cache.path)
    }
}

/// Compile, sync and search; the pattern is checked before any I/O
pub async fn run_search(
    cli: &Cli,
    config: &Config,
    request: &SearchRequest,
    console: &ConsoleProgress,
) -> Result<SearchOutcome> {
    let matcher = Matcher::compile(&request.pattern)?;
    let days = request.days.unwrap_or(config.search.default_days);
    let range = SyncRange::last_days(days, Utc::now());
    tracing::debug!(
        "Searching '{}' from {} to {}",
        matcher.pattern(),
        range.since,
        range.until
    );

    let store = open_store(config)?;
    let mut engine = QueryEngine::new(store, FetchPolicy::from_config(config));

    let outcome = if request.offline {
        engine.search_cached(&matcher, &range)?
    } else {
        let credentials = cli.credentials()?;

        let auth_spinner = console.add_spinner(&format!("Connecting to {}...", config.imap.host));
        let mut session = match auth::authenticate(config, &credentials).await {
            Ok(session) => session,
            Err(e) => {
                auth_spinner.finish_and_clear();
                return Err(e);
            }
        };
        console.finish_spinner(&auth_spinner, &format!("Logged in as {}", credentials.address));

        let progress = FetchProgressBar::new(console);
        let result = engine.search(&mut session, &matcher, &range, &progress).await;
        progress.finish(result.as_ref().ok().and_then(|outcome| outcome.sync.as_ref()));

        if let Err(e) = session.logout().await {
            tracing::warn!("Logout failed: {}", e);
        }
        result?
    };

    engine.into_store().close()?;
    Ok(outcome)
}

/// Log in and out once
pub async fn run_auth(cli: &Cli, config: &Config, console: &ConsoleProgress) -> Result<()> {
    let credentials = cli.credentials()?;
    let spinner = console.add_spinner(&format!("Logging in to {}...", config.imap.host));
    let result = auth::verify_credentials(config, &credentials).await;
    match &result {
        Ok(()) => console.finish_spinner(&spinner, &format!("Logged in as {}", credentials.address)),
        Err(_) => spinner.finish_and_clear(),
    }
    result
}

/// Cache statistics, or `None` when no cache file exists yet
pub fn cache_status(config: &Config) -> Result<Option<StoreStats>> {
    if !config.cache.path.exists() {
        return Ok(None);
    }
    let store = MetadataStore::open(&config.cache.path)?;
    let stats = store.stats()?;
    store.close()?;
    Ok(Some(stats))
}

/// Delete the cache, asking first unless `force`; returns whether anything was removed
pub fn clear_cache(config: &Config, force: bool, console: &ConsoleProgress) -> Result<bool> {
    if !config.cache.path.exists() {
        return Ok(false);
    }
    if !force {
        let question = format!("Delete the cache at {:?}?", config.cache.path);
        if !console.confirm(&question)? {
            return Ok(false);
        }
    }
    MetadataStore::remove_files(&config.cache.path)
}

/// Plain-text result table
pub fn render_table(records: &[MessageRecord], limit: Option<usize>) -> String {
    let shown = limit.unwrap_or(records.len()).min(records.len());
    let mut out = String::new();

    out.push_str(&format!(
        "{:<16}  {:<30}  {:<50}  {}\n",
        "Date", "From", "Subject", "Link"
    ));
    out.push_str(&format!("{}\n", "-".repeat(130)));

    for record in &records[..shown] {
        out.push_str(&format!(
            "{:<16}  {:<30}  {:<50}  {}\n",
            record.received_at.format("%Y-%m-%d %H:%M"),
            truncate_string(&record.sender, 30),
            truncate_string(&record.subject, 50),
            record.web_link
        ));
    }

    if shown < records.len() {
        out.push_str(&format!("... and {} more\n", records.len() - shown));
    }
    out
}

/// Results as a pretty JSON array
pub fn render_json(records: &[MessageRecord], limit: Option<usize>) -> Result<String> {
    let shown = limit.unwrap_or(records.len()).min(records.len());
    Ok(serde_json::to_string_pretty(&records[..shown])?)
}

/// One-line summary of how the results were obtained
pub fn describe_outcome(outcome: &SearchOutcome) -> String {
    let matches = match outcome.records.len() {
        1 => "1 match".to_string(),
        n => format!("{} matches", n),
    };
    match &outcome.sync {
        Some(report) => format!(
            "{} ({} messages in range, {} already cached, {} fetched)",
            matches, report.remote, report.cached, report.inserted
        ),
        None => format!("{} (from cache only)", matches),
    }
}

/// Hint printed under a fatal error
pub fn error_hint(error: &SearchError) -> Option<&'static str> {
    match error {
        SearchError::AuthError(_) => Some(
            "Check the address and app password. IMAP must be enabled in Gmail settings.",
        ),
        SearchError::PatternError(_) => {
            Some("The pattern is a regular expression; escape special characters like ( [ + ?")
        }
        SearchError::StoreError(_) | SearchError::StoreCorrupt(_) => {
            Some("The cache can be rebuilt: run `gmail-search clear-cache` and search again.")
        }
        SearchError::ConfigError(_) => Some("Regenerate the file with `gmail-search init-config --force`."),
        _ => None,
    }
}
