use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use pickup_cache::config::Config;
use pickup_cache::outbox::ReconcileOutcome;
use pickup_cache::pressure::PressureLevel;
use pickup_cache::remote::HttpRemoteApi;
use pickup_cache::CacheEngine;

#[derive(Parser, Debug)]
#[command(name = "pickup-cache")]
#[command(about = "Inspect and maintain the offline cache and order outbox")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pickup-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show cache and outbox statistics
  Stats,
  /// Delete expired catalog pages
  Sweep,
  /// Delete catalog pages whose key starts with PREFIX
  Invalidate { prefix: String },
  /// Inspect or drain the order outbox
  #[command(subcommand)]
  Outbox(OutboxCommand),
  /// Apply a memory pressure level (ui-hidden, running-low, moderate,
  /// running-critical, complete, or a numeric trim level)
  Pressure { level: PressureLevel },
}

#[derive(Subcommand, Debug)]
enum OutboxCommand {
  /// List pending entries
  List {
    /// Only entries that hit the retry ceiling
    #[arg(long)]
    parked: bool,
  },
  /// Deliver due entries to the remote API
  Drain,
  /// Keep delivering on the configured interval until interrupted
  Watch,
  /// Reset a parked entry so it is retried
  Requeue { id: i64 },
  /// Delete retained delivered entries older than DAYS
  Purge {
    #[arg(long, default_value_t = 7)]
    older_than_days: i64,
  },
}

/// Log to a daily rolling file next to the database.
fn init_logging(log_dir: &Path) -> WorkerGuard {
  let appender = tracing_appender::rolling::daily(log_dir, "pickup-cache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let db_path = config.database_path()?;
  let log_dir = db_path
    .parent()
    .map(Path::to_path_buf)
    .unwrap_or_else(|| PathBuf::from("."));
  let _guard = init_logging(&log_dir);

  let engine = CacheEngine::open(config.clone())?;

  match args.command {
    Command::Stats => {
      let stats = engine.stats()?;
      for (class, s) in &stats.memory {
        println!(
          "{:<20} {:>8}/{:<8} bytes  hit rate {:.2}",
          class.name(),
          s.current_size,
          s.max_size,
          s.hit_rate()
        );
      }
      println!("catalog pages        {}", stats.pages);
      println!("outbox pending       {}", stats.outbox_pending);
      println!("outbox parked        {}", stats.outbox_parked);
    }
    Command::Sweep => {
      let removed = engine.pages().delete_expired()?;
      println!("removed {} expired pages", removed);
    }
    Command::Invalidate { prefix } => {
      let removed = engine.pages().delete_by_prefix(&prefix)?;
      println!("removed {} pages matching {}*", removed, prefix);
    }
    Command::Pressure { level } => {
      let report = engine.on_memory_pressure(level).await?;
      for outcome in &report.outcomes {
        match &outcome.result {
          Ok(removed) => println!("{:<18} {:?}: removed {}", outcome.tier, outcome.action, removed),
          Err(e) => println!("{:<18} {:?}: failed: {}", outcome.tier, outcome.action, e),
        }
      }
    }
    Command::Outbox(cmd) => run_outbox(&engine, &config, cmd).await?,
  }

  Ok(())
}

async fn run_outbox(engine: &CacheEngine, config: &Config, cmd: OutboxCommand) -> Result<()> {
  match cmd {
    OutboxCommand::List { parked } => {
      let entries = if parked {
        engine.outbox().list_parked(engine.retry_policy())?
      } else {
        engine.outbox().list_pending()?
      };
      for entry in entries {
        println!(
          "{:>6}  created {}  retries {:>3}  last attempt {}  {} bytes",
          entry.id,
          entry.created_at.to_rfc3339(),
          entry.retries,
          entry
            .last_attempt
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
          entry.payload.len()
        );
      }
    }
    OutboxCommand::Drain => {
      let remote = http_remote(config)?;
      match engine.reconciler(remote).run_once().await {
        ReconcileOutcome::Completed(report) => println!(
          "delivered {}, failed {}, deferred {}, parked {}",
          report.delivered, report.failed, report.deferred, report.parked
        ),
        ReconcileOutcome::AlreadyRunning => println!("reconciliation already running"),
      }
    }
    OutboxCommand::Watch => {
      let remote = http_remote(config)?;
      let reconciler = engine.reconciler(remote);
      let interval = std::time::Duration::from_secs(config.outbox.reconcile_interval_secs.max(1));
      let (connected_tx, connected_rx) = tokio::sync::watch::channel(true);

      println!("watching outbox every {}s, ctrl-c to stop", interval.as_secs());
      tokio::select! {
        _ = reconciler.run_while_connected(interval, connected_rx) => {}
        _ = tokio::signal::ctrl_c() => {
          drop(connected_tx);
        }
      }
      let pending = engine.outbox().count_pending()?;
      println!("stopped with {} pending", pending);
    }
    OutboxCommand::Requeue { id } => {
      if engine.outbox().requeue(id)? {
        println!("requeued {}", id);
      } else {
        return Err(eyre!("No pending outbox entry with id {}", id));
      }
    }
    OutboxCommand::Purge { older_than_days } => {
      let age = chrono::Duration::try_days(older_than_days)
        .ok_or_else(|| eyre!("--older-than-days out of range: {}", older_than_days))?;
      let removed = engine.outbox().purge_delivered_older_than(age)?;
      println!("purged {} delivered entries", removed);
    }
  }
  Ok(())
}

fn http_remote(config: &Config) -> Result<Arc<HttpRemoteApi>> {
  let remote_config = config
    .remote
    .as_ref()
    .ok_or_else(|| eyre!("No remote configured. Set remote.base_url in the config file."))?;
  Ok(Arc::new(HttpRemoteApi::new(remote_config)?))
}
