//! upstream-failover - Reverse-proxy upstream failover daemon
//!
//! This is the composition root that wires together all the components.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use upstream_failover::adapters::outbound::{
    JsonFileArchive, NginxConfigSync, ShellProcessRunner, SqliteRecordStore,
};
use upstream_failover::application::{FailoverOrchestrator, SnapshotService};
use upstream_failover::config::{load_config, load_services, Config};
use upstream_failover::domain::ports::{
    ConfigSynchronizer, HealthProbe, RecordStore, SnapshotArchive,
};
use upstream_failover::infrastructure::{shutdown_signal, HealthChecker, ShutdownController};

#[derive(Parser)]
#[command(name = "upstream-failover", version, about = "Fail reverse-proxy upstreams over to a fallback target")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor services until interrupted (default)
    Run,
    /// Validate the services file and the proxy config syntax
    Check,
    /// Manage routing snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    /// List initial backups of a service, newest first
    Backups { service: String },
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// Capture every service's current record target
    Create {
        #[arg(default_value = "manual snapshot")]
        description: String,
    },
    List,
    Show { id: u64 },
    Delete { id: u64 },
    /// Point every service in a snapshot back at its captured target
    Restore { id: u64 },
}

/// Shared adapters built from config.
struct Components {
    store: Arc<dyn RecordStore>,
    sync: Arc<dyn ConfigSynchronizer>,
    archive: Arc<dyn SnapshotArchive>,
}

impl Components {
    fn build(cfg: &Config) -> anyhow::Result<Self> {
        let store = SqliteRecordStore::open(&cfg.db_path)
            .with_context(|| format!("opening record store {}", cfg.db_path))?;
        let sync = NginxConfigSync::new(
            &cfg.nginx_conf_dir,
            &cfg.conf_extension,
            cfg.config_backup_dir(),
            &cfg.reload_command,
            Arc::new(ShellProcessRunner::new()),
        );
        let archive = JsonFileArchive::new(&cfg.backup_dir, &cfg.snapshot_dir);
        Ok(Self {
            store: Arc::new(store),
            sync: Arc::new(sync),
            archive: Arc::new(archive),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    if cfg.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cfg).await,
        Command::Check => check(cfg).await,
        Command::Snapshot(cmd) => snapshot(cfg, cmd).await,
        Command::Backups { service } => backups(cfg, &service).await,
    }
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let services = load_services(&cfg.services_file)
        .with_context(|| format!("loading services from {}", cfg.services_file))?;

    tracing::info!(
        services = services.len(),
        db = %cfg.db_path,
        conf_dir = %cfg.nginx_conf_dir,
        "starting upstream-failover"
    );

    // ===== COMPOSITION ROOT =====
    let Components {
        store,
        sync,
        archive,
    } = Components::build(&cfg)?;

    // signals are caught from here on; startup work always runs to completion
    let shutdown = ShutdownController::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    if cfg.skip_syntax_check {
        tracing::warn!("proxy config syntax check skipped");
    } else {
        sync.test_syntax()
            .await
            .context("proxy config syntax check failed")?;
        tracing::info!("proxy config syntax ok");
    }

    let probe: Arc<dyn HealthProbe> = Arc::new(HealthChecker::new(cfg.health_check_config()));

    FailoverOrchestrator::new(services, store, sync, probe, archive)
        .run_until_shutdown(shutdown)
        .await;

    tracing::info!("upstream-failover stopped");
    Ok(())
}

async fn check(cfg: Config) -> anyhow::Result<()> {
    let services = load_services(&cfg.services_file)
        .with_context(|| format!("loading services from {}", cfg.services_file))?;
    for spec in &services {
        println!(
            "{}: {} -> check {} every {}s (error delay {}s), fallback {}:{}",
            spec.name,
            spec.domain,
            spec.check,
            spec.interval,
            spec.error_delay,
            spec.if_failed.host,
            spec.if_failed.port
        );
    }

    let components = Components::build(&cfg)?;
    components
        .sync
        .test_syntax()
        .await
        .context("proxy config syntax check failed")?;
    components.store.close().await;
    println!("{} services ok, proxy config syntax ok", services.len());
    Ok(())
}

async fn snapshot(cfg: Config, cmd: SnapshotCommand) -> anyhow::Result<()> {
    let components = Components::build(&cfg)?;
    let archive = components.archive.clone();
    let service = SnapshotService::new(
        components.store.clone(),
        components.sync.clone(),
        components.archive.clone(),
    );

    match cmd {
        SnapshotCommand::Create { description } => {
            let services = load_services(&cfg.services_file)
                .with_context(|| format!("loading services from {}", cfg.services_file))?;
            let id = service.capture(&services, &description).await?;
            println!("created snapshot {}", id);
        }
        SnapshotCommand::List => {
            for s in archive.list_snapshots().await? {
                println!(
                    "{}\t{}\t{} services\t{}",
                    s.id,
                    s.timestamp.to_rfc3339(),
                    s.services.len(),
                    s.description
                );
            }
        }
        SnapshotCommand::Show { id } => {
            let s = archive.load_snapshot(id).await?;
            println!("{}", serde_json::to_string_pretty(&s)?);
        }
        SnapshotCommand::Delete { id } => {
            if archive.delete_snapshot(id).await? {
                println!("deleted snapshot {}", id);
            } else {
                anyhow::bail!("snapshot {} not found", id);
            }
        }
        SnapshotCommand::Restore { id } => {
            let report = service.restore(id).await?;
            println!(
                "restored {}, unchanged {}, failed {}, reloaded {}",
                report.restored, report.unchanged, report.failed, report.reloaded
            );
            if report.failed > 0 {
                anyhow::bail!("{} services could not be restored", report.failed);
            }
        }
    }

    components.store.close().await;
    Ok(())
}

async fn backups(cfg: Config, service: &str) -> anyhow::Result<()> {
    let archive = JsonFileArchive::new(&cfg.backup_dir, &cfg.snapshot_dir);
    let backups = archive.list_backups(service).await?;
    if backups.is_empty() {
        println!("no backups for {}", service);
    }
    for b in backups {
        println!(
            "{}\t{}\t{}:{}",
            b.timestamp.to_rfc3339(),
            b.metadata.backup_type,
            b.proxy_host.forward_host,
            b.proxy_host.forward_port
        );
    }
    Ok(())
}
