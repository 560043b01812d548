use std::sync::Arc;

use bazaar_agent::audit_sink::TracingAuditSink;
use bazaar_agent::classifier::{ClassifierError, IntentClassifier};
use bazaar_agent::llm::LlmError;
use bazaar_agent::providers::build_client;
use bazaar_agent::{AgentRuntime, RuntimeDeps, RuntimeSettings};
use bazaar_core::config::{AppConfig, ConfigError, LoadOptions};
use bazaar_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: AgentRuntime,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("language model client setup failed: {0}")]
    Llm(#[source] LlmError),
    #[error("intent rules failed to load: {0}")]
    IntentRules(#[source] ClassifierError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = build_client(&config.llm).map_err(BootstrapError::Llm)?;
    let classifier = IntentClassifier::from_path(config.support.intent_rules_path.as_deref())
        .map_err(BootstrapError::IntentRules)?;
    let runtime = AgentRuntime::new(
        RuntimeDeps::from_pool(db_pool.clone(), llm, Arc::new(TracingAuditSink)),
        RuntimeSettings::from_config(&config),
        classifier,
    );

    Ok(Application { config, db_pool, runtime })
}
