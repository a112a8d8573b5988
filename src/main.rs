//! Klaxon Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - KLAXON_HOST: Bind address (default: 0.0.0.0)
//! - KLAXON_PORT: Port number (default: 8080)
//! - KLAXON_CORRELATION_COOLDOWN_MS: Suppression period for a fired correlation (default: 3600000)
//! - KLAXON_HISTORY_RETENTION_MS: Alert history window (default: 86400000)
//! - KLAXON_RETENTION_CHECK_INTERVAL_SECS: Retention worker period (default: 60)
//! - KLAXON_ARCHIVE_AFTER_MS: Archive resolved alerts older than this (default: 86400000)
//! - KLAXON_ARCHIVE_CAPACITY: Maximum archived alerts (default: unbounded)
//! - KLAXON_ESCALATE_RAW_ALERTS: Open escalation campaigns for raw alerts (default: true)
//! - KLAXON_TIMEOUT_{CRITICAL,HIGH,MEDIUM,LOW}_MS: Escalation timeout overrides
//! - KLAXON_{CHAT,EMAIL,PAGING}_WEBHOOK_URL: Channel webhooks (logged when unset)
//! - KLAXON_{CHAT,EMAIL,PAGING}_WEBHOOK_HEADERS: Extra webhook headers as `Name: value; ...`
//! - KLAXON_{CHAT,EMAIL,PAGING}_ENABLED: Channel switches (default: true)
//! - KLAXON_RULES_FILE: JSON array of declarative correlation rules
//! - RUST_LOG: Log level (default: info)

use klaxon::api::run_server;
use klaxon::config::ServerConfig;
use klaxon::escalation::EscalationPolicy;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "klaxon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::try_from_env()?;

    tracing::info!("Klaxon configuration:");
    tracing::info!("  Host: {}", config.addr());
    tracing::info!(
        "  Correlation cooldown: {} ms",
        config.engine.correlation_cooldown_ms
    );
    tracing::info!(
        "  History retention: {} ms",
        config.engine.history_retention_ms
    );
    tracing::info!(
        "  Retention check interval: {} seconds",
        config.retention_check_interval_secs
    );
    tracing::info!("  Escalate raw alerts: {}", config.engine.escalate_raw_alerts);

    for severity in klaxon::Severity::ALL {
        let policy: &EscalationPolicy = config.engine.policies.get(severity);
        tracing::info!(
            "  {}: timeout {:?}, channels {:?}, auto-escalate {}",
            severity,
            policy.timeout,
            policy.channels,
            policy.auto_escalate
        );
    }

    if let Some(path) = &config.engine.rules_file {
        tracing::info!("  Rules file: {}", path.display());
    }

    println!(
        r#"
  _  ___
 | |/ / | __ ___  _____  _ __
 | ' /| |/ _` \ \/ / _ \| '_ \
 | . \| | (_| |>  < (_) | | | |
 |_|\_\_|\__,_/_/\_\___/|_| |_|

 Alert Correlation & Escalation Engine
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
