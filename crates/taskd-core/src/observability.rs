//! Observability - tracing の初期化
//!
//! `RUST_LOG` があればそれを優先し、無ければ設定ファイルの `log.level` を使う。
//! `log.json = true` で JSON 出力。

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::config::LogConfig;

/// Filter used when neither `RUST_LOG` nor the configured level parses.
const FALLBACK_FILTER: &str = "info";

pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| config.level.parse::<EnvFilter>())
        .unwrap_or_else(|e| {
            eprintln!(
                "WARN: log.level='{}' is not a valid tracing filter ({e}); falling back to '{FALLBACK_FILTER}'",
                config.level
            );
            EnvFilter::new(FALLBACK_FILTER)
        })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), TryInitError> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    if config.json {
        subscriber.json().finish().try_init()
    } else {
        subscriber.finish().try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_an_error() {
        let config = LogConfig::default();
        // 他のテストが先に初期化している可能性があるので一回目の結果は問わない
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
