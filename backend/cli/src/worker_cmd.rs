//! `worker` and `workers` subcommands.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use fastocr_config::ConfigStore;
use fastocr_ocr::{RetryPolicy, VisionClientFactory};
use fastocr_queue::{AmqpConsumer, AmqpSettings};
use fastocr_store::ResultStore;
use fastocr_supervisor::{PoolConfig, RestartPolicy, WorkerCommand, WorkerPool};
use fastocr_worker::{AckPolicy, TaskHandler};

use crate::config::RuntimeConfig;
use crate::{open_data, GlobalPaths};

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Prefetch window for one worker: `worker_concurrency`, clamped to the
/// AMQP field width.
fn prefetch_for(worker_concurrency: u32) -> u16 {
    u16::try_from(worker_concurrency.max(1)).unwrap_or(u16::MAX)
}

/// Run one worker process until the broker connection ends or a shutdown
/// signal arrives. Failing to connect is fatal.
pub async fn run_worker(runtime: &RuntimeConfig, paths: &GlobalPaths, attempts: u32) -> Result<()> {
    let pid = std::process::id();
    let config = ConfigStore::open(&paths.config_file).await;
    let settings = config.get();
    info!(
        pid,
        model = %settings.model_name,
        queue = %settings.rabbitmq_queue,
        attempts,
        "Starting OCR worker"
    );

    let (layout, ledger) = open_data(&paths.data_dir).await?;
    let factory = Arc::new(VisionClientFactory::new(
        settings.api_url.clone(),
        settings.model_name.clone(),
        runtime.vendor_timeout,
    ));
    let handler = TaskHandler::new(factory, ResultStore::new(layout.results_dir()))
        .with_ledger(ledger)
        .with_retry(RetryPolicy::with_attempts(attempts));

    let amqp = AmqpSettings::from_settings(&settings);
    let tag = format!("fastocr-worker-{pid}");
    let mut consumer = AmqpConsumer::connect(&amqp, prefetch_for(settings.worker_concurrency), &tag)
        .await
        .with_context(|| format!("Worker {pid} could not connect to RabbitMQ at {}:{}", amqp.host, amqp.port))?;

    tokio::select! {
        result = fastocr_worker::run(&mut consumer, &handler, AckPolicy::Always) => {
            match result {
                Ok(stats) => info!(pid, ?stats, "Worker finished"),
                Err(e) => {
                    error!(pid, error = %format!("{e:#}"), "Worker stopped");
                    return Err(e);
                }
            }
        }
        _ = shutdown_signal() => {
            info!(pid, "Shutdown signal received, worker exiting");
        }
    }
    Ok(())
}

/// Arguments each pooled worker is launched with.
fn worker_args(paths: &GlobalPaths, attempts: u32) -> Vec<String> {
    let mut args = vec![
        "worker".to_string(),
        "--attempts".to_string(),
        attempts.to_string(),
    ];
    args.extend(paths.forwarded_args());
    args
}

/// `-n 0` means "use the configured count", same as leaving it out.
fn requested_workers(num_workers: Option<usize>) -> Option<usize> {
    num_workers.filter(|n| *n > 0)
}

fn pool_config(workers: usize, restart: u32) -> PoolConfig {
    let mut config = PoolConfig::new(workers.max(1));
    if restart > 0 {
        config.restart = RestartPolicy::OnFailure {
            max_restarts: restart,
        };
    }
    config
}

/// Launch a pool of worker processes of this same binary and supervise it
/// until Ctrl-C or until every worker has exited.
pub async fn run_pool(
    paths: &GlobalPaths,
    num_workers: Option<usize>,
    restart: u32,
    attempts: u32,
) -> Result<()> {
    let workers = match requested_workers(num_workers) {
        Some(n) => n,
        None => {
            let config = ConfigStore::open(&paths.config_file).await;
            config.get().worker_concurrency as usize
        }
    };

    let command = WorkerCommand::current_exe(worker_args(paths, attempts))?;
    let mut pool = WorkerPool::new(command, pool_config(workers, restart));

    let started = pool.start().await;
    if started == 0 {
        anyhow::bail!("No workers could be started");
    }
    info!(started, "Worker pool running; press Ctrl-C to stop");

    let report = pool.run_until(shutdown_signal()).await;
    info!(?report, "Worker pool stopped");
    Ok(())
}
