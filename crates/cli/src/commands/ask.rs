use std::sync::Arc;

use anyhow::Context;
use bazaar_agent::classifier::IntentClassifier;
use bazaar_agent::providers::build_client;
use bazaar_agent::session::NewSession;
use bazaar_agent::{AgentRuntime, RuntimeDeps, RuntimeSettings, TurnResult};
use bazaar_core::audit::NoopAuditSink;
use bazaar_core::config::{AppConfig, LoadOptions};
use bazaar_db::{connect_with_settings, migrations};

use crate::commands::{block_on_runtime, CommandResult};

#[derive(Clone, Debug)]
pub struct AskArgs {
    pub marketplace: String,
    pub customer: Option<String>,
    pub locale: Option<String>,
    pub text: String,
}

pub fn run(args: AskArgs) -> CommandResult {
    if args.marketplace.trim().is_empty() || args.text.trim().is_empty() {
        return CommandResult::failure("ask", "invalid_input", "marketplace and text are required", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "ask",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match block_on_runtime("ask") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    match runtime.block_on(ask(&config, args)) {
        Ok(result) => {
            let message = result.message.clone();
            CommandResult::success_with_data("ask", message, serde_json::to_value(&result).ok())
        }
        Err(error) => CommandResult::failure("ask", "turn_failed", format!("{error:#}"), 7),
    }
}

async fn ask(config: &AppConfig, args: AskArgs) -> anyhow::Result<TurnResult> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .context("failed to connect to database")?;
    migrations::run_pending(&pool).await.context("failed to apply migrations")?;

    let llm = build_client(&config.llm).context("failed to configure language model client")?;
    let classifier = IntentClassifier::from_path(config.support.intent_rules_path.as_deref())
        .context("failed to load intent rules")?;
    let agent = AgentRuntime::new(
        RuntimeDeps::from_pool(pool.clone(), llm, Arc::new(NoopAuditSink)),
        RuntimeSettings::from_config(config),
        classifier,
    );

    let session = agent
        .open_session(NewSession {
            marketplace: args.marketplace,
            customer_id: args.customer,
            locale: args.locale.clone(),
            ..NewSession::default()
        })
        .await
        .context("failed to open support session")?;
    let result = agent
        .process_message(session.id, args.text, args.locale, "cli-ask")
        .await
        .context("support turn failed")?;

    pool.close().await;
    Ok(result)
}
