//! Logging bootstrap.
//!
//! - Текст или JSON, таймстемпы RFC3339 (UTC).
//! - EnvFilter: явная строка или RUST_LOG, по умолчанию `info`.
//! - Записи `log` перенаправляются в `tracing` при установке подписчика.

use std::env;

use anyhow::Context;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info,aethernova_staking=debug`. `None` reads RUST_LOG.
    pub env_filter: Option<String>,
    pub json: bool,
    /// Печатать target, файл и номер строки.
    pub with_targets_and_lines: bool,
    pub with_threads: bool,
    /// Text format only.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            json: true,
            with_targets_and_lines: true,
            with_threads: false,
            ansi: false,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match &cfg.env_filter {
        Some(s) => EnvFilter::try_new(s).with_context(|| format!("invalid log filter `{s}`"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let base = fmt::layer()
        .with_target(cfg.with_targets_and_lines)
        .with_file(cfg.with_targets_and_lines)
        .with_line_number(cfg.with_targets_and_lines)
        .with_thread_ids(cfg.with_threads)
        .with_thread_names(cfg.with_threads)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let fmt_layer = if cfg.json {
        base.json()
            .with_ansi(false)
            .with_current_span(true)
            .with_span_list(true)
            .flatten_event(true)
            .boxed()
    } else {
        base.with_ansi(cfg.ansi).boxed()
    };

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("global tracing subscriber already installed")?;
    Ok(())
}

/// Инициализация из окружения:
/// - LOG_JSON=true|false (default true)
/// - LOG_ANSI=true|false
/// - LOG_THREADS=true|false
/// - RUST_LOG=<filter>
pub fn init_from_env() -> anyhow::Result<()> {
    let flag = |name: &str, default: bool| env::var(name).map(|v| v == "true").unwrap_or(default);
    init(&LoggingConfig {
        env_filter: None,
        json: flag("LOG_JSON", true),
        with_targets_and_lines: true,
        with_threads: flag("LOG_THREADS", false),
        ansi: flag("LOG_ANSI", false),
    })
}
