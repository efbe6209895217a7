//! eventops - command-line access to the event-operations dashboard API.
//!
//! Every read goes through the coalescing cache, so `--repeat` with
//! `--concurrent` shows many reads of one path sharing a single request.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use eventops_core::services::camera::{status_counts, QueryParams};
use eventops_core::{
    CameraService, GetOptions, HttpTransport, Request, ResourceCache, Settings, Transport,
};

#[derive(Parser, Debug)]
#[command(name = "eventops")]
#[command(about = "Cached reads against the event-operations dashboard API")]
#[command(version)]
struct Cli {
    /// API base URL (overrides config and EVENTOPS_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a path through the cache and print the JSON result
    Get(GetArgs),
    /// Print camera counts by status
    Cameras(ReadArgs),
    /// Print the effective settings
    Config,
}

#[derive(Args, Debug)]
struct GetArgs {
    /// API path, e.g. /get_all_lost
    path: String,

    /// Number of reads to issue
    #[arg(long, default_value_t = 1, value_name = "N")]
    repeat: usize,

    /// Issue the repeated reads at the same time instead of one after another
    #[arg(long)]
    concurrent: bool,

    #[command(flatten)]
    read: ReadArgs,
}

#[derive(Args, Debug, Default)]
struct ReadArgs {
    /// Freshness window in milliseconds
    #[arg(long, value_name = "MS")]
    ttl_ms: Option<u64>,

    /// Always fetch, ignoring any fresh cached copy
    #[arg(long)]
    bypass: bool,

    /// Retry cap for rate-limited requests
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,
}

impl ReadArgs {
    fn options(&self) -> GetOptions {
        let mut options = GetOptions::new();
        if self.bypass {
            options = options.bypass_cache();
        }
        if let Some(ttl_ms) = self.ttl_ms {
            options = options.with_ttl_ms(ttl_ms);
        }
        if let Some(max_retries) = self.max_retries {
            options = options.with_max_retries(max_retries);
        }
        options
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level, e.g. RUST_LOG=eventops_core=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(url) = cli.api_url {
        settings.api_base_url = url;
    }
    info!(api = %settings.api_base_url, "eventops starting");

    match cli.command {
        Command::Get(args) => run_get(&settings, args).await,
        Command::Cameras(args) => run_cameras(&settings, args).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn transport(settings: &Settings) -> Result<Arc<HttpTransport>> {
    let transport = HttpTransport::new(settings.api_base_url.clone())
        .context("Failed to create HTTP transport")?;
    Ok(Arc::new(match &settings.token {
        Some(token) => transport.with_token(token.clone()),
        None => transport,
    }))
}

async fn run_get(settings: &Settings, args: GetArgs) -> Result<()> {
    let transport = transport(settings)?;
    let cache: ResourceCache<Value> = ResourceCache::new(settings.cache.clone());
    let requests = Arc::new(AtomicUsize::new(0));
    let options = args.read.options();
    let repeat = args.repeat.max(1);

    let read = |_| {
        let transport = Arc::clone(&transport);
        let requests = Arc::clone(&requests);
        let request = Request::get(args.path.clone());
        let cache = cache.clone();
        let path = args.path.clone();
        async move {
            let fetcher = move || {
                let transport = Arc::clone(&transport);
                let request = request.clone();
                requests.fetch_add(1, Ordering::Relaxed);
                async move { transport.issue(request).await.map(|response| response.body) }
            };
            cache.get(&path, fetcher, options).await
        }
    };

    let results = if args.concurrent {
        join_all((0..repeat).map(read)).await
    } else {
        let mut results = Vec::with_capacity(repeat);
        for i in 0..repeat {
            results.push(read(i).await);
        }
        results
    };

    let mut last = None;
    for result in results {
        last = Some(result.with_context(|| format!("GET {} failed", args.path))?);
    }
    if let Some(value) = last {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }

    let age = cache
        .entry_info(&args.path)
        .map(|info| info.age_display())
        .unwrap_or_else(|| "not cached".to_string());
    eprintln!(
        "{} read(s), {} request(s), cached {}",
        repeat,
        requests.load(Ordering::Relaxed),
        age
    );
    Ok(())
}

async fn run_cameras(settings: &Settings, args: ReadArgs) -> Result<()> {
    let cache = ResourceCache::new(settings.cache.clone());
    let cameras = CameraService::new(transport(settings)?, cache);
    let list = cameras
        .list_normalized(&QueryParams::new(), args.options())
        .await
        .context("Failed to list cameras")?;

    for (status, count) in status_counts(&list) {
        println!("{:<12} {}", status, count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_get_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "eventops", "get", "/stats", "--repeat", "5", "--concurrent", "--ttl-ms", "1000",
            "--bypass", "--max-retries", "1",
        ])
        .unwrap();
        let Command::Get(args) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(args.path, "/stats");
        assert_eq!(args.repeat, 5);
        assert!(args.concurrent);

        let options = args.read.options();
        assert!(options.bypass_cache);
        assert_eq!(options.ttl, Some(Duration::from_millis(1000)));
        assert_eq!(options.max_retries, Some(1));
        assert!(options.serve_stale);
    }

    #[test]
    fn test_default_read_args_use_cache_defaults() {
        assert_eq!(ReadArgs::default().options(), GetOptions::default());
    }

    #[test]
    fn test_get_requires_path() {
        assert!(Cli::try_parse_from(["eventops", "get"]).is_err());
    }

    #[test]
    fn test_global_api_url() {
        let cli = Cli::try_parse_from(["eventops", "config", "--api-url", "http://10.0.0.5:8000"])
            .unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("http://10.0.0.5:8000"));
        assert!(matches!(cli.command, Command::Config));
    }
}
