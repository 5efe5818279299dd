use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

const BOARD_TARGETS: [&str; 2] = ["board_client", "board_cli"];
const FALLBACK_DIRECTIVES: &str = "warn";

/// Голый уровень (`debug`) относится только к крейтам доски, HTTP-стек
/// остаётся на `warn`. Полные директивы `EnvFilter` передаются как есть.
fn filter_directives(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        return FALLBACK_DIRECTIVES.to_string();
    }
    if level.contains(['=', ',']) {
        return level.to_string();
    }

    BOARD_TARGETS
        .iter()
        .fold(FALLBACK_DIRECTIVES.to_string(), |acc, target| {
            format!("{acc},{target}={level}")
        })
}

/// Логи идут в stderr, чтобы не смешиваться с выводом команд.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter_directives(level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVES));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(())
}
