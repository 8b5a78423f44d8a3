use clap::Parser;
use quarry::{Config, Database, telemetry};

/// Check every registered table against the database by running a zero-row select through it.
async fn check_models(db: &Database) -> anyhow::Result<()> {
    let mut failed = 0;
    for table in db.registry().tables() {
        let envelope = db.execute(db.table(table)?.select(["*"]).limit(0)).await?;
        match envelope.error {
            None => tracing::info!(table, "Model matches database"),
            Some(e) => {
                failed += 1;
                tracing::error!(table, "Model does not match database: {}", e);
            }
        }
    }
    anyhow::ensure!(failed == 0, "{failed} model(s) do not match the database");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = quarry::config::Args::parse();

    // Load configuration; this also validates model declarations
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid ({} models).", config.models.len());
        return Ok(());
    }

    // Initialize telemetry (tracing + optional OpenTelemetry)
    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!("{:?}", args);

    let db = Database::connect(&config).await?;
    tracing::info!(models = db.registry().len(), "Registry loaded");

    let result = check_models(&db).await;
    db.close().await;
    telemetry::shutdown_telemetry();
    result
}
