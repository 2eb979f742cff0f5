mod batch_cmd;
mod config;
mod config_cmd;
mod terminal_output;
mod worker_cmd;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use fastocr_config::{config_dir, config_file_path, ConfigStore};
use fastocr_core::TaskQueue;
use fastocr_logging::{init_console_logger, init_logger};
use fastocr_queue::AmqpPublisher;
use fastocr_server::{build_router, AppState, Submitter};
use fastocr_store::{DataLayout, ResultStore, TaskLedger, UploadStore};

use config::RuntimeConfig;

#[derive(Parser)]
#[command(name = "fastocr")]
#[command(about = "FastOCR: queue-backed image OCR with a pool of vision-model workers")]
#[command(version)]
struct Cli {
    /// Settings file (default: $FASTOCR_CONFIG_DIR/app_config.json or config/app_config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Data directory for uploads, results and the task ledger
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Address to bind the HTTP server to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single OCR worker
    Worker {
        /// Total tries per image for transient vendor failures
        #[arg(long, default_value_t = 1)]
        attempts: u32,
    },
    /// Launch and supervise a pool of OCR workers
    Workers {
        /// Number of workers (default or 0: worker_concurrency from the settings)
        #[arg(short = 'n', long = "num-workers")]
        num_workers: Option<usize>,
        /// Respawn failed workers, up to this many times in total
        #[arg(long, default_value_t = 0)]
        restart: u32,
        /// Passed through to each worker
        #[arg(long, default_value_t = 1)]
        attempts: u32,
    },
    /// View or edit the persisted settings
    Config(config_cmd::ConfigArgs),
    /// Upload a batch of images and wait for every result
    Batch(batch_cmd::BatchArgs),
}

/// Paths shared by every subcommand.
pub struct GlobalPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    explicit_config: Option<PathBuf>,
    explicit_data_dir: Option<PathBuf>,
}

impl GlobalPaths {
    fn resolve(config: Option<PathBuf>, data_dir: Option<PathBuf>, runtime: &RuntimeConfig) -> Self {
        Self {
            config_file: config
                .clone()
                .unwrap_or_else(|| config_file_path(&config_dir())),
            data_dir: data_dir.clone().unwrap_or_else(|| runtime.data_dir.clone()),
            explicit_config: config,
            explicit_data_dir: data_dir,
        }
    }

    /// Global flags to forward to child processes.
    pub fn forwarded_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.explicit_config {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        if let Some(path) = &self.explicit_data_dir {
            args.push("--data-dir".to_string());
            args.push(path.display().to_string());
        }
        args
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let runtime = RuntimeConfig::from_env();
    let cli = Cli::parse();
    let paths = GlobalPaths::resolve(cli.config, cli.data_dir, &runtime);

    match cli.command {
        Commands::Serve { host, port } => {
            init_logger(&runtime.log_dir, &runtime.log_level, "fastocr-server");
            let runtime = RuntimeConfig {
                bind_address: host.unwrap_or(runtime.bind_address),
                port: port.unwrap_or(runtime.port),
                ..runtime
            };
            run_server(runtime, paths).await?;
        }
        Commands::Worker { attempts } => {
            let prefix = format!("fastocr-worker-{}", std::process::id());
            init_logger(&runtime.log_dir, &runtime.log_level, &prefix);
            worker_cmd::run_worker(&runtime, &paths, attempts).await?;
        }
        Commands::Workers {
            num_workers,
            restart,
            attempts,
        } => {
            init_logger(&runtime.log_dir, &runtime.log_level, "fastocr-pool");
            worker_cmd::run_pool(&paths, num_workers, restart, attempts).await?;
        }
        Commands::Config(args) => {
            init_console_logger("warn");
            report_and_exit(config_cmd::run(&paths.config_file, args).await);
        }
        Commands::Batch(args) => {
            init_console_logger("warn");
            report_and_exit(batch_cmd::run(args).await);
        }
    }

    Ok(())
}

/// Interactive commands print their error as a note instead of a backtrace.
fn report_and_exit(result: Result<()>) {
    if let Err(e) = result {
        terminal_output::note_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

/// Open the data directory and the task ledger inside it.
pub async fn open_data(data_dir: &Path) -> Result<(DataLayout, Arc<TaskLedger>)> {
    let layout = DataLayout::prepare(data_dir).await?;
    let ledger = TaskLedger::open(&layout.ledger_path()).context("Failed to open task ledger")?;
    Ok((layout, Arc::new(ledger)))
}

async fn run_server(runtime: RuntimeConfig, paths: GlobalPaths) -> Result<()> {
    info!(
        port = runtime.port,
        bind = %runtime.bind_address,
        config = %paths.config_file.display(),
        data_dir = %paths.data_dir.display(),
        "Starting FastOCR API"
    );

    let config = Arc::new(ConfigStore::open(&paths.config_file).await);
    let (layout, ledger) = open_data(&paths.data_dir).await?;
    let queue: Arc<dyn TaskQueue> = Arc::new(AmqpPublisher::live(Arc::clone(&config)));

    let submitter = Submitter::new(
        config,
        queue,
        UploadStore::new(layout.uploads_dir()),
        ResultStore::new(layout.results_dir()),
        ledger,
    );
    let app = build_router(Arc::new(AppState::new(submitter)), runtime.max_upload_bytes);

    let addr = format!("{}:{}", runtime.bind_address, runtime.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(worker_cmd::shutdown_signal())
        .await?;

    info!("HTTP API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fastocr", "workers", "-n", "4", "--restart", "2", "--config", "/etc/fastocr.json",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("/etc/fastocr.json")));
        match cli.command {
            Commands::Workers {
                num_workers,
                restart,
                attempts,
            } => {
                assert_eq!(num_workers, Some(4));
                assert_eq!(restart, 2);
                assert_eq!(attempts, 1);
            }
            _ => panic!("expected workers"),
        }
    }

    #[test]
    fn forwarded_args_only_carry_explicit_flags() {
        let runtime = RuntimeConfig::default();
        let paths = GlobalPaths::resolve(None, Some(PathBuf::from("/srv/data")), &runtime);
        assert_eq!(paths.forwarded_args(), vec!["--data-dir", "/srv/data"]);
        assert_eq!(paths.data_dir, PathBuf::from("/srv/data"));
    }

    #[test]
    fn config_set_takes_pairs() {
        let cli = Cli::try_parse_from([
            "fastocr", "config", "--set", "api_key", "sk-1", "--set", "rabbitmq_port", "5673",
        ])
        .unwrap();
        let Commands::Config(args) = cli.command else {
            panic!("expected config");
        };
        assert_eq!(args.set.len(), 2);
        assert_eq!(args.set[1], vec!["rabbitmq_port".to_string(), "5673".to_string()]);
    }
}
