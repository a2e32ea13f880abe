use clap::Parser;
use std::sync::Arc;
use std::io::BufRead;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskgate::config::{RiskgateConfig, StoreBackend};
use riskgate::enforce::{AdmissionRequest, Enforcer};
use riskgate::ratelimit::{MemoryStore, RateLimiterStore, RedisStore};
use riskgate::risk::{event_queue, LoggingNotifier, RiskEngine};

/// Abuse-aware admission control.
///
/// Reads `actor METHOD /path [user-agent]` lines from stdin and prints one
/// JSON admission record per line.
#[derive(Parser, Debug)]
#[command(name = "riskgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (YAML); `RISKGATE__*` variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Starting Riskgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = RiskgateConfig::load(cli.config.as_deref())?;
    info!(
        backend = ?config.store.backend,
        threshold = config.risk.threshold,
        endpoints = config.policy.override_count(),
        "Configuration loaded"
    );

    let store: Arc<dyn RateLimiterStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store).await?),
    };

    let engine = Arc::new(
        RiskEngine::from_config(&config.risk).with_notifier(Arc::new(LoggingNotifier)),
    );
    let (sink, records) = event_queue(config.events.queue_capacity);
    let sink = Arc::new(sink);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let consumer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .consume_with_shutdown(records, async move {
                    let _ = stop_rx.await;
                })
                .await
        })
    };

    let enforcer = Enforcer::new(store, config.policy.clone())
        .with_risk(engine.clone())
        .with_sink(sink.clone());

    let interrupted = tokio::select! {
        _ = admit_lines(&enforcer, spawn_stdin_reader()) => {
            info!("Input closed");
            false
        }
        _ = shutdown_signal() => true,
    };

    // Dropping every sink handle closes the event stream
    drop(enforcer);
    let dropped = sink.dropped();
    drop(sink);
    if interrupted {
        let _ = stop_tx.send(());
    }

    let stats = consumer.await?;
    info!(
        processed = stats.processed,
        skipped = stats.skipped,
        dropped,
        tracked_actors = engine.tracked_actors(),
        "Riskgate stopped"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    // Logs go to stderr; stdout carries admission records
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}

/// Read stdin lines on a dedicated thread.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(256);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}

/// Admit one request per input line until input ends.
async fn admit_lines(enforcer: &Enforcer, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(request) = parse_request(line) else {
            warn!(line = %line, "Expected `actor METHOD /path [user-agent]`");
            continue;
        };

        let admission = enforcer.check(&request).await;
        let record = serde_json::json!({
            "actor": request.actor,
            "endpoint": format!("{} {}", request.method.to_ascii_uppercase(), request.path),
            "decision": admission.decision,
            "statusCode": admission.status_code,
        });
        println!("{}", record);
    }
}

fn parse_request(line: &str) -> Option<AdmissionRequest> {
    let (actor, rest) = next_field(line)?;
    let (method, rest) = next_field(rest)?;
    let (path, rest) = next_field(rest)?;
    let request = AdmissionRequest::new(actor, method, path);

    let user_agent = rest.trim();
    Some(if user_agent.is_empty() {
        request
    } else {
        request.with_user_agent(user_agent)
    })
}

/// Split off the first whitespace-delimited field.
fn next_field(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    let (field, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    if field.is_empty() {
        return None;
    }
    Some((field, rest))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
