//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and environment overrides
//! with the `config` crate. Environment keys use a double underscore for
//! nesting: `SYNC_ORCHESTRATOR__WORKFLOW__RESTART_DELAY_SECONDS=30`.

use config::{Config, Environment, File, FileFormat};
use std::path::Path;
use tracing::{debug, warn};

use super::OrchestratorConfig;
use crate::constants::CONFIG_ENV_PREFIX;
use crate::error::{OrchestratorError, OrchestratorResult};

pub(crate) fn load_config(path: Option<&str>) -> OrchestratorResult<OrchestratorConfig> {
    let defaults = Config::try_from(&OrchestratorConfig::default())?;
    let mut builder = Config::builder().add_source(defaults);

    if let Some(path) = path {
        if Path::new(path).exists() {
            debug!(path = %path, "Loading orchestrator configuration file");
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            warn!(path = %path, "Configuration file not found, using defaults and environment");
        }
    }

    builder = builder.add_source(
        Environment::with_prefix(CONFIG_ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config: OrchestratorConfig = builder.build()?.try_deserialize()?;
    config.validate()?;

    crate::logging::log_connection_operation(
        "load_config",
        None,
        None,
        None,
        "loaded",
        Some(&format!(
            "restart_delay_seconds={} activity_max_attempts={}",
            config.workflow.restart_delay_seconds, config.activity.max_attempts
        )),
    );

    Ok(config)
}

/// Parse a TOML document layered over the defaults, without environment overrides.
pub fn load_from_str(toml: &str) -> OrchestratorResult<OrchestratorConfig> {
    let defaults = Config::try_from(&OrchestratorConfig::default())?;
    let config: OrchestratorConfig = Config::builder()
        .add_source(defaults)
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .map_err(|e| OrchestratorError::Configuration(e.to_string()))?
        .try_deserialize()?;
    config.validate()?;
    Ok(config)
}
