use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tracing::debug;

use relay_acl::cli::{execute, Command, CommandContext};
use relay_acl::config::Config;
use relay_acl::observability::{init_tracing, MetricsRegistry};
use relay_acl::policy::{PolicyLoader, PolicyWatcher};
use relay_acl::storage::{OpenMode, RuleStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    init_tracing(&config.log_level);

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting relay-acl");

    // Load policy and keep it current while the command runs
    let loader = PolicyLoader::new(&config.policy_path).with_db_file(config.db_file.clone());
    let metrics = Arc::new(MetricsRegistry::new());
    let watcher =
        PolicyWatcher::new(loader, config.policy_reload_interval()).with_metrics(metrics.clone());
    let (policy, watcher_task) = watcher.start();

    let db_file = policy.snapshot().db_file.clone();
    debug!(db_file = %db_file.display(), "Opening rule database");

    // Checks never create the database; an unreadable file takes the
    // store-failure path of the engine
    let store = match &config.command {
        Command::Check(_) => SqliteStore::open_lazy(&db_file),
        command if command.writes() || !db_file.exists() => {
            SqliteStore::open(&db_file, OpenMode::ReadWrite).await?
        }
        _ => SqliteStore::open(&db_file, OpenMode::ReadOnly).await?,
    };
    let store = Arc::new(store);
    let ctx = CommandContext {
        store: store.clone() as Arc<dyn RuleStore>,
        policy,
        store_timeout: config.store_timeout(),
        metrics,
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = execute(&config.command, &ctx, &mut out).await;
    out.flush()?;

    // Cleanup
    watcher_task.abort();
    store.close().await;

    Ok(result?)
}
