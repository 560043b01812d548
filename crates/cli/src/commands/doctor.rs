use bazaar_agent::classifier::IntentClassifier;
use bazaar_agent::llm::LlmClient;
use bazaar_agent::providers::build_client;
use bazaar_core::config::{AppConfig, LoadOptions};
use bazaar_db::connect_with_settings;
use serde::Serialize;

use crate::commands::block_on_runtime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_client(&config));
            checks.push(check_intent_rules(&config));
            checks.push(check_support_schema(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["llm_client", "intent_rules", "support_schema"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match build_client(&config.llm) {
        Ok(client) => DoctorCheck {
            name: "llm_client",
            status: CheckStatus::Pass,
            details: format!("{} client configured for model `{}`", client.provider_name(), config.llm.model),
        },
        Err(error) => {
            DoctorCheck { name: "llm_client", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_intent_rules(config: &AppConfig) -> DoctorCheck {
    let source = config
        .support
        .intent_rules_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "built-in table".to_string());
    match IntentClassifier::from_path(config.support.intent_rules_path.as_deref()) {
        Ok(_) => DoctorCheck {
            name: "intent_rules",
            status: CheckStatus::Pass,
            details: format!("rules compiled from {source}"),
        },
        Err(error) => {
            DoctorCheck { name: "intent_rules", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_support_schema(config: &AppConfig) -> DoctorCheck {
    let runtime = match block_on_runtime("doctor") {
        Ok(runtime) => runtime,
        Err(_) => {
            return DoctorCheck {
                name: "support_schema",
                status: CheckStatus::Fail,
                details: "failed to initialize async runtime".to_string(),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let present: Result<(i64,), _> = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('support_session', 'support_message', 'support_config')",
        )
        .fetch_one(&pool)
        .await;
        pool.close().await;

        match present {
            Ok((3,)) => Ok(()),
            Ok(_) => Err("support tables missing; run `bazaar migrate`".to_string()),
            Err(error) => Err(format!("schema query failed: {error}")),
        }
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "support_schema",
            status: CheckStatus::Pass,
            details: format!("support tables present in `{}`", config.database.url),
        },
        Err(error) => DoctorCheck { name: "support_schema", status: CheckStatus::Fail, details: error },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
