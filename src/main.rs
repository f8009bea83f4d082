use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use kennelsync::config::Config;
use kennelsync::remote::{RemoteClient, SyncBridge};
use kennelsync::store::{cleanup_expired_documents, DictionaryStore, EntityStore, SqliteStorage};

#[derive(Parser, Debug)]
#[command(name = "kennelsync")]
#[command(about = "Maintenance tool for the local registry cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kennelsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Evict expired documents from the local cache
  Cleanup,
  /// Push pending local changes to the remote registry
  Sync,
  /// Refresh dictionary tables from the remote registry
  Dict,
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("kennelsync")
    .join("logs");
  let appender = tracing_appender::rolling::daily(log_dir, "kennelsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let db_path = match &config.cache.db_path {
    Some(p) => p.clone(),
    None => Config::default_db_path()?,
  };
  let storage = Arc::new(SqliteStorage::open(&db_path)?);

  match args.command {
    Command::Cleanup => {
      let removed = cleanup_expired_documents(&storage, config.cache.ttl())?;
      println!("Removed {} expired documents", removed);
    }
    Command::Sync => {
      let bridge = Arc::new(SyncBridge::new());
      let api_key = Config::get_api_key()?;
      let client = Arc::new(RemoteClient::new(&config.remote, api_key, bridge.clone())?);
      let store = EntityStore::new(
        client,
        storage,
        bridge,
        &config.cache,
        config.remote.page_size,
      );

      let report = store.force_sync().await?;
      println!("Synced {} documents", report.synced);
      for err in &report.errors {
        eprintln!("sync error: {}", err);
      }
      if !report.errors.is_empty() {
        std::process::exit(1);
      }
    }
    Command::Dict => {
      let bridge = Arc::new(SyncBridge::new());
      let api_key = Config::get_api_key()?;
      let client = Arc::new(RemoteClient::new(&config.remote, api_key, bridge.clone())?);
      let dictionaries = DictionaryStore::new(client, storage);

      dictionaries.initialize().await?;
      if let Some(err) = dictionaries.signals().error.get() {
        eprintln!("dictionary refresh failed: {}", err);
        std::process::exit(1);
      }
      if bridge.is_offline() {
        eprintln!("Remote unreachable; dictionaries served from the local copy");
      } else {
        println!("Dictionaries refreshed");
      }
    }
  }

  Ok(())
}
