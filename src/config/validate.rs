// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{BotConfig, RawBotConfig};
use crate::errors::{BotError, Result};
use crate::nonce::NoncePolicy;
use crate::types::{parse_duration, BrokerKind, NonceReconcileMode};

impl TryFrom<RawBotConfig> for BotConfig {
    type Error = BotError;

    fn try_from(raw: RawBotConfig) -> std::result::Result<Self, Self::Error> {
        validate_bot_section(&raw)?;
        validate_broker_section(&raw)?;

        if raw.metrics.history == 0 {
            return Err(BotError::ConfigError(
                "[metrics].history must be >= 1 (got 0)".to_string(),
            ));
        }

        let drain_timeout = duration_field("bot.drain_timeout", &raw.bot.drain_timeout)?;
        let startup_timeout = duration_field("bot.startup_timeout", &raw.bot.startup_timeout)?;
        let nonce = nonce_policy(&raw)?;

        Ok(BotConfig {
            name: raw.bot.name,
            max_exceptions: raw.bot.max_exceptions,
            failure_window: raw.bot.failure_window,
            drain_timeout,
            startup_timeout,
            broker: raw.broker,
            nonce,
            metric_history: raw.metrics.history,
            snapshot_path: raw.state.snapshot,
        })
    }
}

fn validate_bot_section(cfg: &RawBotConfig) -> Result<()> {
    if cfg.bot.name.trim().is_empty() {
        return Err(BotError::ConfigError(
            "[bot].name must not be empty".to_string(),
        ));
    }

    if cfg.bot.max_exceptions == 0 {
        return Err(BotError::ConfigError(
            "[bot].max_exceptions must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_broker_section(cfg: &RawBotConfig) -> Result<()> {
    if cfg.broker.kind == BrokerKind::Memory && cfg.broker.workers == 0 {
        return Err(BotError::ConfigError(
            "[broker].workers must be >= 1 with the memory broker (got 0)".to_string(),
        ));
    }

    if cfg.broker.queue.trim().is_empty() {
        return Err(BotError::ConfigError(
            "[broker].queue must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn nonce_policy(cfg: &RawBotConfig) -> Result<NoncePolicy> {
    Ok(match cfg.nonce.reconcile {
        NonceReconcileMode::Manual => NoncePolicy::Manual,
        NonceReconcileMode::PerCall => NoncePolicy::PerCall,
        NonceReconcileMode::Periodic => {
            let interval = duration_field("nonce.interval", &cfg.nonce.interval)?;
            if interval.is_zero() {
                return Err(BotError::ConfigError(
                    "[nonce].interval must be non-zero; use reconcile = \"per_call\" instead"
                        .to_string(),
                ));
            }
            NoncePolicy::Periodic(interval)
        }
    })
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| BotError::ConfigError(format!("invalid duration for {field}: {e}")))
}
