use anyhow::Context;
use etl_state::JsonFileWatermarkStore;
use movies_etl::{
    ElasticsearchIndex, EtlConfig, PipelineRunner, PostgresSource, SyncOrchestrator,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn load_schema(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading index schema {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing index schema {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EtlConfig::load().context("loading configuration")?;
    let schema = load_schema(&config.elasticsearch.schema_path)?;

    info!(
        "Syncing {}:{}/{} → {} index {} every {}s",
        config.postgres.host,
        config.postgres.port,
        config.postgres.dbname,
        config.elasticsearch.base_url(),
        config.elasticsearch.index,
        config.sync.interval_secs
    );

    let source = Arc::new(PostgresSource::new(&config.postgres));
    let index = Arc::new(
        ElasticsearchIndex::new(&config.elasticsearch, Duration::from_secs(config.backoff.max_time))
            .context("building index client")?,
    );
    let watermarks = Arc::new(JsonFileWatermarkStore::new(config.sync.state_path.clone()));

    let runner = Arc::new(PipelineRunner::from_config(&config, source, index, watermarks));
    let mut orchestrator = SyncOrchestrator::new(runner, schema, config.sync.interval());

    if let Err(e) = orchestrator.run_forever().await {
        error!("Fatal: {}", e);
        return Err(e.into());
    }
    Ok(())
}
