use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use graphjin_mongo::driver::{CancellationToken, Connector, DocumentStore, MemoryStore};
use graphjin_mongo::Config;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gj-mongo")]
#[command(about = "Run GraphJin document-database DSL queries", long_about = None)]
struct Args {
    /// Directory containing graphjin-mongo.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target database (overrides config)
    #[arg(long)]
    database: Option<String>,

    /// JSON seed file for the in-memory backend
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Document store URI (overrides config)
    #[cfg(feature = "mongodb")]
    #[arg(long)]
    uri: Option<String>,

    /// Positional argument as JSON, bound to $1, $2, ... in order
    #[arg(long = "arg")]
    args: Vec<String>,

    /// DSL query text (read from stdin when omitted)
    query: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(dir) => Config::load(dir)?,
        None => {
            let mut config = Config::new("default");
            config.apply_env_overrides();
            config
        }
    };
    if let Some(database) = &args.database {
        config.database = database.clone();
    }

    // Logs go to stderr so stdout carries only rows.
    let default_filter = config
        .log_filter
        .clone()
        .unwrap_or_else(|| "graphjin_mongo=info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let query = match &args.query {
        Some(q) => q.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let bound: Vec<Value> = args
        .args
        .iter()
        .map(|a| serde_json::from_str(a))
        .collect::<Result<_, _>>()?;

    let seed = args.seed.clone().or_else(|| {
        args.config
            .as_deref()
            .and_then(|dir| config.seed_path(dir))
    });
    let store = open_store(&args, &config, seed).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling query");
            ctrl_c.cancel();
        }
    });

    let connector =
        Connector::new(store, config.database.clone()).with_sample_size(config.sample_size);
    let conn = connector.connect(&cancel).await?;
    let mut rows = conn.query(&query, &bound, &cancel).await?;

    let columns: Vec<String> = rows.columns().iter().map(|c| c.to_string()).collect();
    tracing::debug!("Columns: {}", columns.join(", "));
    let mut count = 0usize;
    while let Some(row) = rows.next().await? {
        println!("{}", Value::Array(row));
        count += 1;
    }
    rows.close();
    tracing::info!("{} row(s)", count);

    Ok(())
}

#[cfg(feature = "mongodb")]
async fn open_store(
    args: &Args,
    config: &Config,
    seed: Option<PathBuf>,
) -> anyhow::Result<Arc<dyn DocumentStore>> {
    if seed.is_none() {
        let uri = args.uri.clone().unwrap_or_else(|| config.uri.clone());
        let store = graphjin_mongo::driver::MongoStore::connect(&uri).await?;
        return Ok(Arc::new(store));
    }
    memory_store(config, seed)
}

#[cfg(not(feature = "mongodb"))]
async fn open_store(
    _args: &Args,
    config: &Config,
    seed: Option<PathBuf>,
) -> anyhow::Result<Arc<dyn DocumentStore>> {
    memory_store(config, seed)
}

fn memory_store(config: &Config, seed: Option<PathBuf>) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store = MemoryStore::new();
    match seed {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let value: Value = serde_json::from_str(&content)?;
            store.load_seed(&config.database, &value)?;
            tracing::info!("Loaded seed {}", path.display());
        }
        None => tracing::warn!("No seed file given; the in-memory database is empty"),
    }
    Ok(Arc::new(store))
}
