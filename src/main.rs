use anyhow::Result;
use clap::Parser;
use gmail_search::cli::{self, Cli, Commands, ConsoleProgress, SearchRequest};
use gmail_search::config::Config;
use gmail_search::error::SearchError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn poisoned<T>(_: T) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned")
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().map_err(poisoned)?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().map_err(poisoned)?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        if let Some(hint) = e.downcast_ref::<SearchError>().and_then(cli::error_hint) {
            eprintln!("Hint: {}", hint);
        }
        eprintln!("\nFor help, run: gmail-search --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_search=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_search=warn"))
    };

    // Logs print above progress bars
    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let console = ConsoleProgress::new((*multi_progress).clone());

    match &cli.command {
        Commands::Search {
            pattern,
            days,
            offline,
            limit,
            json,
        } => {
            let config = Config::load(&cli.config).await?;
            let request = SearchRequest {
                pattern: pattern.clone(),
                days: *days,
                offline: *offline,
            };

            let outcome = tokio::select! {
                outcome = cli::run_search(&cli, &config, &request, &console) => outcome?,
                _ = tokio::signal::ctrl_c() => {
                    return Err(SearchError::OperationCancelled(
                        "Interrupted; everything fetched so far stays cached".to_string(),
                    )
                    .into());
                }
            };

            if *json {
                println!("{}", cli::render_json(&outcome.records, *limit)?);
            } else {
                if !outcome.records.is_empty() {
                    print!("{}", cli::render_table(&outcome.records, *limit));
                }
                println!("{}", cli::describe_outcome(&outcome));
            }

            if let Some(report) = outcome.sync.as_ref().filter(|r| !r.is_complete()) {
                eprintln!(
                    "Warning: {} messages could not be fetched; results may be incomplete. They will be retried on the next search.",
                    report.deferred_ids.len()
                );
            }
            Ok(())
        }

        Commands::Auth => {
            let config = Config::load(&cli.config).await?;
            cli::run_auth(&cli, &config, &console).await?;
            println!("Credentials are valid for {}", config.imap.host);
            Ok(())
        }

        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            println!("\n========================================");
            println!("Cache Status");
            println!("========================================");
            println!("Cache file: {:?}", config.cache.path);
            match cli::cache_status(&config)? {
                Some(stats) => {
                    println!("Messages cached: {}", stats.records);
                    if let Some(oldest) = stats.oldest {
                        println!("Oldest message: {}", oldest.format("%Y-%m-%d %H:%M"));
                    }
                    if let Some(newest) = stats.newest {
                        println!("Newest message: {}", newest.format("%Y-%m-%d %H:%M"));
                    }
                }
                None => println!("No cache yet. Run a search to create it."),
            }
            println!("========================================");
            Ok(())
        }

        Commands::ClearCache { force } => {
            let config = Config::load(&cli.config).await?;
            if cli::clear_cache(&config, *force, &console)? {
                println!("Removed cache at {:?}", config.cache.path);
            } else {
                println!("Nothing removed.");
            }
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(SearchError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;
            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - imap.mailbox: Mailbox to search ('[Gmail]/All Mail' covers archived mail)");
            println!("  - fetch.chunk_size: Messages per request");
            println!("  - search.default_days: Lookback when --days is not given");
            Ok(())
        }
    }
}
