use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use carbook::compactor::run_compactor;
use carbook::config::{Config, WindowPolicy};
use carbook::desk::BookingDesk;
use carbook::engine::Engine;
use carbook::notify::NotifyHub;
use carbook::retry::RetryPolicy;

/// How long shutdown waits for blocking work. A pending stdin read only
/// returns with the next line, so it is abandoned rather than awaited.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries responses.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    run_to_completion(run(), SHUTDOWN_GRACE)?
}

/// Drive `fut` on a fresh runtime, then give blocking tasks at most `grace`.
fn run_to_completion<F: Future>(fut: F, grace: Duration) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new()?;
    let output = runtime.block_on(fut);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    carbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify, config.engine.clone())?);
    info!("carbookd ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_timeout: {:?}", config.engine.lock_timeout);
    info!(
        "  windows: {}",
        match config.engine.window_policy {
            WindowPolicy::Ignore => "ignored",
            WindowPolicy::RequireCoverage => "required",
        }
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    let desk = BookingDesk::new(
        engine.clone(),
        RetryPolicy::builder().max_retries(config.retry_attempts).build(),
    );

    // Graceful shutdown: stop on SIGTERM/ctrl-c or when stdin closes
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };

    tokio::select! {
        result = carbook::console::serve(&desk, tokio::io::stdin(), tokio::io::stdout()) => {
            match result {
                Ok(()) => info!("input closed"),
                Err(e) => tracing::error!("console error: {e}"),
            }
        }
        _ = shutdown => info!("shutdown signal received"),
    }

    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("carbookd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn shutdown_does_not_wait_for_a_stuck_blocking_read() {
        let started = Instant::now();
        let answer = run_to_completion(
            async {
                // Stands in for stdin waiting on a line that never comes.
                tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(30)));
                42
            },
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(answer, 42);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
