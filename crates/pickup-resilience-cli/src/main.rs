//! Pickup Resilience CLI - replays a scripted flaky operation through the
//! resilience layer and reports what the user would have seen.

use anyhow::Result;
use clap::Parser;
use pickup_resilience::{
    AsyncMessages, AsyncOrchestrator, ErrorChannel, HttpProbe, ManualConnectivity, NetworkMonitor,
    Notifier, OrchestratorConfig, RecordingSurface, RequestError, RetryConfig, SessionCache,
    UserMessage,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pickup-resilience")]
#[command(about = "Run a scripted flaky operation through the pickup resilience layer")]
struct Args {
    /// Number of leading attempts that fail
    #[arg(short, long, default_value = "2")]
    failures: u32,

    /// HTTP status of the scripted failures (0 = network failure)
    #[arg(long, default_value = "0")]
    status: u16,

    /// Retries after the first attempt
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(long, default_value = "200")]
    initial_delay_ms: u64,

    /// Randomize backoff delays
    #[arg(long)]
    jitter: bool,

    /// Start offline
    #[arg(long)]
    offline: bool,

    /// Cache successful results under this key
    #[arg(long)]
    cache_key: Option<String>,

    /// Cache lifetime in seconds
    #[arg(long, default_value = "300")]
    cache_ttl: u64,

    /// Report exhausted failures to the global error channel
    #[arg(long)]
    global_errors: bool,

    /// How many times to run the action
    #[arg(long, default_value = "1")]
    runs: u32,

    /// Check reachability of this URL before running
    #[arg(long)]
    probe_url: Option<String>,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if args.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn scripted_failure(status: u16) -> RequestError {
    if status == 0 {
        RequestError::network("Network Error")
    } else {
        RequestError::status(status, json!({"detail": format!("scripted {} failure", status)}))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting pickup resilience run");

    let connectivity = Arc::new(ManualConnectivity::new(!args.offline));
    let mut monitor_builder = NetworkMonitor::builder()
        .on_offline(|| warn!("Went offline"))
        .on_online(|| info!("Back online"));
    if let Some(url) = &args.probe_url {
        monitor_builder = monitor_builder.probe(Arc::new(HttpProbe::new(url.as_str())?));
    }
    let monitor = Arc::new(monitor_builder.start(connectivity));

    if args.probe_url.is_some() {
        let reachable = monitor.check_connection().await;
        info!("Probe says {}", if reachable { "reachable" } else { "unreachable" });
    }

    let surface = Arc::new(RecordingSurface::new());
    let notifier = Notifier::new(surface.clone());
    let errors = ErrorChannel::new().with_notifier(notifier.clone());

    let retry = RetryConfig::new()
        .with_max_retries(args.max_retries)
        .with_initial_delay(Duration::from_millis(args.initial_delay_ms))
        .with_jitter(args.jitter);
    let mut config = OrchestratorConfig::new()
        .with_retry(retry)
        .with_global_errors(args.global_errors)
        .with_messages(
            AsyncMessages::new()
                .loading("Loading pickups")
                .success("Pickups loaded"),
        );
    if let Some(key) = &args.cache_key {
        config = config.with_cache(key.clone(), Duration::from_secs(args.cache_ttl));
    }

    let orchestrator = AsyncOrchestrator::<Value>::builder(Arc::clone(&monitor))
        .config(config)
        .cache(SessionCache::in_memory())
        .notifier(notifier)
        .error_channel(errors.clone())
        .on_offline(|| warn!("Action skipped while offline"))
        .build()?;

    let calls = Arc::new(AtomicU32::new(0));
    let failures = args.failures;
    let status = args.status;

    for run in 1..=args.runs {
        let counter = Arc::clone(&calls);
        let outcome = orchestrator
            .execute(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < failures {
                        Err(scripted_failure(status))
                    } else {
                        Ok(json!([
                            {"id": attempt, "day": "Tuesday", "material": "cardboard"}
                        ]))
                    }
                }
            })
            .await;

        match outcome {
            Ok(data) => info!("Run {} succeeded: {}", run, data),
            Err(err) => {
                let shown = err.classification();
                warn!("Run {} failed ({}): {}", run, shown.kind, shown.message);
            }
        }
    }

    let snapshot = orchestrator.snapshot();
    let notifications: Vec<Value> = surface
        .shown()
        .iter()
        .map(|n| json!({"variant": n.variant.to_string(), "message": n.message}))
        .collect();

    // Report on stdout so it can be piped.
    let report = json!({
        "calls": calls.load(Ordering::SeqCst),
        "snapshot": {
            "data": snapshot.data,
            "is_empty": snapshot.is_empty,
            "retry_count": snapshot.retry_count,
            "from_cache": snapshot.from_cache,
            "is_online": snapshot.is_online,
            "error": snapshot.error.as_ref().map(|e| e.to_string()),
        },
        "global_error": errors.current().map(|r| r.message),
        "notifications": notifications,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
