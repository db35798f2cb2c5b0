//! ---
//! pw_section: "01-core-functionality"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Tracing subscriber setup for the pumpwatch binaries."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "PUMPWATCH_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `PUMPWATCH_LOG` overrides the filter (e.g. `info`, `pumpwatch_detect=debug`).
///   When unset `RUST_LOG` is honoured, finally falling back to `config.level`.
/// * Stdout receives pretty or JSON output; a daily rolling JSON file is written
///   under `config.directory` unless `file_enabled` is false.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(std::env::var(LOG_ENV).ok(), &config.level);

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.directory)?;
        let prefix = config
            .file_prefix
            .clone()
            .unwrap_or_else(|| service_name.to_owned());
        let file_appender = daily(&config.directory, format!("{prefix}.log"));
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(file_guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

fn build_filter(custom: Option<String>, fallback: &str) -> EnvFilter {
    match custom {
        Some(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); using '{fallback}'");
            EnvFilter::new(fallback)
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_directive_wins() {
        let filter = build_filter(Some("pumpwatch_sim=trace".to_owned()), "info");
        assert_eq!(filter.to_string(), "pumpwatch_sim=trace");
    }

    #[test]
    fn log_format_uses_kebab_case() {
        let format = parse_format("\"structured-json\"");
        assert_eq!(format, LogFormat::StructuredJson);
    }

    fn parse_format(raw: &str) -> LogFormat {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }
        let doc = format!("format = {raw}");
        toml::from_str::<Wrapper>(&doc).unwrap().format
    }
}
