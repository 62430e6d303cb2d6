pub mod types;
pub mod config;
pub mod error;
pub mod normalize;
pub mod ranking;
pub mod tiers;
pub mod bracket;
pub mod catalog;
pub mod validator;
pub mod router;
pub mod persistence;
pub mod engine;
pub mod logging;

pub use bracket::{BracketConfig, BracketState, SeedingStrategy};
pub use catalog::{ItemCatalog, MemoryCatalog};
pub use config::EngineConfig;
pub use engine::RankingEngine;
pub use error::{BracketError, ErrorCode, PersistError, StoreError, TierError};
pub use router::{NotificationSink, OperationKind, OperationResult, SourceDescriptor, TargetDescriptor};
pub use types::*;

use std::path::Path;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// Process-level startup: `.env`, config, logging, then an engine resumed
/// from the configured snapshot. Keep the guard alive while logging.
pub fn bootstrap(catalog: impl ItemCatalog + 'static) -> Result<(RankingEngine, WorkerGuard), String> {
    config::load_env_file(Path::new(".env"));
    let config = config::load_config()?;
    let guard = logging::init_logging(&config.log_dir_buf())?;
    info!("rank-board starting");
    log_config_warnings(&config);
    let engine = RankingEngine::open(&config, catalog)?;
    Ok((engine, guard))
}

pub fn log_config_warnings(config: &EngineConfig) {
    let mut warnings = Vec::new();
    if !config.persist {
        warnings.push("persistence disabled; board state lives in memory only".to_string());
    }
    if config.max_ranking_size > 100 {
        warnings.push(format!("ranking of {} slots is unusually large", config.max_ranking_size));
    }
    if config.bracket_size > config.max_ranking_size {
        warnings.push(format!(
            "bracket size {} exceeds ranking size {}; applied results will be truncated",
            config.bracket_size, config.max_ranking_size
        ));
    }
    for msg in warnings {
        warn!("{}", msg);
    }
}
