//! loom - command line entry point.
//!
//! Connects to a data source, reports its dialect and server version, and
//! optionally runs a statement, describes the schema or exercises an
//! advisory lock. Output is JSON on stdout.

use clap::Parser;
use loom_orm::config::{Cli, DataSourceConfig};
use loom_orm::db::{DataSource, SchemaInspector};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting loom v{}", env!("CARGO_PKG_VERSION"));

    let config = DataSourceConfig::parse(&cli.database)?.into_connection_config()?;
    info!(
        id = %config.id,
        dialect = %config.dialect,
        url = %config.masked_connection_string(),
        "Connecting"
    );
    let source = DataSource::connect(config).await.inspect_err(|e| {
        error!(error = %e, code = e.code(), "Connection failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("{suggestion}");
        }
    })?;

    for replica in &cli.replicas {
        let replica = DataSourceConfig::parse(replica)?.into_connection_config()?;
        source.secondary_connect(replica).await?;
    }

    let result = run(&cli, &source).await;
    source.disconnect().await?;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "Command failed");
            Err(e.into())
        }
    }
}

async fn run(cli: &Cli, source: &DataSource) -> loom_orm::DbResult<serde_json::Value> {
    source.ping().await?;
    let mut output = json!({ "connection": source.info() });

    if let Some(key) = &cli.lock {
        let acquired = source.acquire_lock(key, Some(cli.lock_timeout_ms)).await?;
        let released = if acquired {
            source.release_lock(key).await?
        } else {
            false
        };
        output["lock"] = json!({ "key": key, "acquired": acquired, "released": released });
    }

    if cli.describe {
        let mut tables = Vec::new();
        for name in SchemaInspector::list_tables(source).await? {
            let info = SchemaInspector::get_table_info(source, &name).await?;
            let indexes = SchemaInspector::get_index_info(source, &name).await?;
            let foreign_keys = SchemaInspector::get_foreign_key_info(source, &name).await?;
            tables.push(json!({
                "table": info,
                "indexes": indexes,
                "foreign_keys": foreign_keys,
            }));
        }
        output["tables"] = json!(tables);
    }

    if let Some(sql) = &cli.execute {
        let rows = source.raw_query(sql, &[]).await?;
        output["rows"] = json!(rows);
    }

    Ok(output)
}
