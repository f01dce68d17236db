//! `tenderwatch` command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use tenderwatch::loader::read_record;
use tenderwatch::store::shutdown::{self, ShutdownTrigger};
use tenderwatch::store::open_engine;
use tenderwatch::sync::{run_loop, HttpTenderClient, SyncError, TenderApi};
use tenderwatch::{http, init_database, verify_database, Config, Service};

const DEFAULT_PORT: u16 = 8400;
const PUT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long exit waits for blocking feed requests still in flight.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "tenderwatch", version, about = "Signed feedback records for public tenders")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, default_value = "tenderwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve,
    /// Create the tables and store the root key.
    Init {
        /// Drop existing tables first.
        #[arg(long)]
        dropdb: bool,
        /// The root `admin/pubkey` record.
        root_key: PathBuf,
    },
    /// Mirror the tender feed into the `tenders` table.
    Sync,
    /// Re-validate every stored record.
    Verify {
        /// Count failures instead of stopping at the first one.
        #[arg(long)]
        ignore_errors: bool,
    },
    /// Send a signed record file to a running API.
    Put {
        file: PathBuf,
        /// API address; scheme, port and path are filled in when missing.
        #[arg(default_value = "127.0.0.1")]
        api_url: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = runtime()?;
    let result = runtime.block_on(run(cli));
    finish(runtime);
    result
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")
}

/// Stop the runtime without sitting out the read timeout of a feed request
/// that shutdown already abandoned.
fn finish(runtime: tokio::runtime::Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Put { file, api_url } = &cli.command {
        return put(file, api_url).await;
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Serve => {
            let (trigger, listener) = shutdown::channel();
            tokio::spawn(forward_signals(trigger));
            let service = Arc::new(Service::open(&config).await?);
            let served = http::serve(service.clone(), config.bind_addr, listener).await;
            service.close().await?;
            served?;
        }
        Command::Init { dropdb, root_key } => {
            let record = read_record(&root_key)?;
            let store = open_engine(&config.database).await?;
            init_database(store.as_ref(), &record, dropdb).await?;
            store.close().await?;
            println!("root key {} stored", record.id);
        }
        Command::Sync => {
            let Some(feed) = config.tenders.clone() else {
                bail!("[tenders] is required for sync");
            };
            let (trigger, listener) = shutdown::channel();
            tokio::spawn(forward_signals(trigger));
            let database = config.database.clone();
            let open = move || {
                let database = database.clone();
                let feed = feed.clone();
                async move {
                    let store = open_engine(&database).await?;
                    let api: Arc<dyn TenderApi> = Arc::new(HttpTenderClient::new(feed));
                    Ok::<_, SyncError>((api, store))
                }
            };
            let report = run_loop(config.sync.clone(), listener, open).await;
            println!(
                "fetched {} inserted {} skipped {} failed runs {}",
                report.fetched, report.inserted, report.skipped, report.failed_runs
            );
        }
        Command::Verify { ignore_errors } => {
            let store = open_engine(&config.database).await?;
            let report = verify_database(store.as_ref(), ignore_errors).await;
            store.close().await?;
            let report = report?;
            println!("success {} errors {}", report.success, report.errors);
            if report.errors > 0 {
                bail!("{} records failed verification", report.errors);
            }
        }
        Command::Put { .. } => {}
    }
    Ok(())
}

/// Fire `trigger` on Ctrl-C or SIGTERM.
async fn forward_signals(trigger: ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown requested");
    trigger.trigger();
}

async fn put(file: &Path, api_url: &str) -> anyhow::Result<()> {
    let record = read_record(file)?;
    let url = format!("{}/{}", data_url(api_url), record.id);
    let agent = format!("tenderwatch/{} by {}", env!("CARGO_PKG_VERSION"), record.owner());
    let body = record.to_value();

    let (status, reply) = tokio::task::spawn_blocking(move || send(&url, &agent, &body))
        .await
        .context("put task failed")??;
    println!("{status} {reply}");
    if status >= 400 {
        bail!("record refused with status {status}");
    }
    Ok(())
}

fn send(url: &str, user_agent: &str, body: &Value) -> anyhow::Result<(u16, String)> {
    let agent = ureq::AgentBuilder::new().timeout(PUT_TIMEOUT).build();
    match agent.put(url).set("User-Agent", user_agent).send_json(body) {
        Ok(resp) => {
            let status = resp.status();
            Ok((status, resp.into_string()?))
        }
        Err(ureq::Error::Status(status, resp)) => Ok((status, resp.into_string()?)),
        Err(e) => Err(e).with_context(|| format!("PUT {url}")),
    }
}

/// `host` → `http://host:8400/api/v1/data`; parts already given are kept.
fn data_url(raw: &str) -> String {
    let raw = raw.trim_end_matches('/');
    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", raw),
    };
    let (host, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let host = if host.contains(':') {
        host.to_owned()
    } else {
        format!("{host}:{DEFAULT_PORT}")
    };
    let path = if path.ends_with(http::DATA_PATH) {
        path.to_owned()
    } else {
        format!("{path}{}", http::DATA_PATH)
    };
    format!("{scheme}://{host}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url() {
        assert_eq!(data_url("127.0.0.1"), "http://127.0.0.1:8400/api/v1/data");
        assert_eq!(data_url("https://api.example.org:443/"), "https://api.example.org:443/api/v1/data");
        assert_eq!(
            data_url("http://localhost:9000/api/v1/data"),
            "http://localhost:9000/api/v1/data"
        );
        assert_eq!(data_url("example.org/prefix"), "http://example.org:8400/prefix/api/v1/data");
    }

    #[test]
    fn test_abandoned_blocking_request_does_not_delay_exit() {
        let runtime = runtime().unwrap();
        runtime.block_on(async {
            let stuck = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(30)));
            // Shutdown stops waiting on the request but cannot cancel it.
            assert!(tokio::time::timeout(Duration::from_millis(10), stuck).await.is_err());
        });
        let started = std::time::Instant::now();
        finish(runtime);
        assert!(started.elapsed() < SHUTDOWN_GRACE + Duration::from_secs(5));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["tenderwatch", "-c", "x.toml", "init", "--dropdb", "root.json"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(cli.command, Command::Init { dropdb: true, .. }));

        let cli = Cli::try_parse_from(["tenderwatch", "put", "rec.json"]).unwrap();
        assert!(matches!(cli.command, Command::Put { ref api_url, .. } if api_url == "127.0.0.1"));
    }
}
