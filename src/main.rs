use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use clap::Parser;
use serde_json::json;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dnscache::config::{FileConfig, load_config};
use dnscache::{LookupContext, Resolver, ResolverConfig, spawn_refresher, watcher};

#[derive(Parser, Debug)]
#[command(author, version, about = "Cached DNS lookups with in-flight dedupe", long_about = None)]
struct Args {
    /// Config file path (JSON). Watched for changes in daemon mode.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Per-lookup provider timeout in milliseconds, 0 for none (overrides config)
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,
    /// Treat subjects as addresses and resolve their names
    #[arg(short = 'r', long = "reverse", default_value_t = false)]
    reverse: bool,
    /// Keep the configured warm_hosts cached until interrupted
    #[arg(long = "daemon", default_value_t = false)]
    daemon: bool,
    /// Enable debug logging
    #[arg(long = "debug", default_value_t = false)]
    debug: bool,
    /// Hosts (or addresses with --reverse) to resolve
    subjects: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let mut cfg = match &args.config {
        Some(path) => load_config(path).context("load initial config")?,
        None => FileConfig::default(),
    };
    if let Some(ms) = args.timeout_ms {
        cfg.timeout_ms = ms;
    }
    let resolver = Resolver::new(ResolverConfig::from(&cfg));

    if args.daemon {
        return run_daemon(args.config, cfg, resolver).await;
    }
    if args.subjects.is_empty() {
        anyhow::bail!("nothing to resolve: pass hosts, addresses with --reverse, or --daemon");
    }

    let ctx = LookupContext::background();
    for subject in &args.subjects {
        let res = if args.reverse {
            resolver.lookup_addr(&ctx, subject).await
        } else {
            resolver.lookup_host(&ctx, subject).await
        };
        let line = match res {
            Ok(records) => json!({ "subject": subject, "records": &*records }),
            Err(err) => json!({ "subject": subject, "error": err.to_string() }),
        };
        println!("{line}");
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(debug);

    let level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Resolves warm_hosts every stats interval so they stay marked as used, and
/// sweeps the cache on the refresh interval. Timeout and intervals are fixed
/// at startup; reloads only change the warm host list.
async fn run_daemon(
    config_path: Option<PathBuf>,
    cfg: FileConfig,
    resolver: Resolver,
) -> anyhow::Result<()> {
    let current = Arc::new(ArcSwap::from_pointee(cfg.clone()));
    if let Some(path) = config_path {
        watcher::spawn(path, current.clone());
    }

    let shutdown = CancellationToken::new();
    let refresher = cfg
        .refresh_interval()
        .map(|period| spawn_refresher(resolver.clone(), period, shutdown.clone()));

    info!(
        warm_hosts = cfg.warm_hosts.len(),
        timeout_ms = cfg.timeout_ms,
        refresh_interval_secs = cfg.refresh_interval_secs,
        "dnscache daemon started"
    );

    let mut ticker = interval(cfg.stats_interval());
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("listen for ctrl-c")?;
                break;
            }
            _ = ticker.tick() => {
                let hosts = current.load_full();
                warm(&resolver, &hosts.warm_hosts).await;
                info!(entries = resolver.len(), stats = %resolver.stats(), "cache stats");
            }
        }
    }

    shutdown.cancel();
    if let Some(handle) = refresher {
        let _ = handle.await;
    }
    info!("dnscache daemon stopped");
    Ok(())
}

async fn warm(resolver: &Resolver, hosts: &[String]) {
    let ctx = LookupContext::background();
    for host in hosts {
        if let Err(err) = resolver.lookup_host(&ctx, host).await {
            warn!(host = %host, error = %err, "warm lookup failed");
        }
    }
}
