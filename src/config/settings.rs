use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::paths;

pub const DEFAULT_EXTERNAL_PORT: i64 = 5000;
pub const DEFAULT_INTERNAL_PORT: i64 = 8887;

/// Proxy engine command. Arguments may use `{external}`, `{internal}` and
/// `{rewrite}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Milliseconds to wait after launch before checking the engine is alive
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_settle_ms() -> u64 {
    200
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: "socat".to_string(),
            args: vec![
                "TCP-LISTEN:{external},fork,reuseaddr".to_string(),
                "TCP:127.0.0.1:{internal}".to_string(),
            ],
            settle_ms: default_settle_ms(),
        }
    }
}

/// User-scoped settings (~/.config/lanproxy/config.json)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_port: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_port: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_host_headers: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineSettings>,
}

impl UserSettings {
    /// Load user settings from a file, None if it does not exist
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(settings))
    }
}

/// Values given on the command line, which win over the settings file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub external_port: Option<i64>,
    pub internal_port: Option<i64>,
    pub rewrite_host_headers: bool,
    pub engine_program: Option<String>,
    pub engine_args: Vec<String>,
}

/// Merged settings for runtime use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSettings {
    pub external_port: i64,
    pub internal_port: i64,
    pub rewrite_host_headers: bool,
    pub engine: EngineSettings,
}

impl MergedSettings {
    /// Load and merge settings from ~/.config/lanproxy/config.json
    pub fn load(overrides: Overrides) -> Result<Self> {
        Self::load_from(&paths::user_config_file()?, overrides)
    }

    /// Load and merge settings from a specific file
    /// Priority: command line > user settings > defaults
    pub fn load_from(path: &Path, overrides: Overrides) -> Result<Self> {
        let user_settings = UserSettings::load_from(path)?.unwrap_or_default();
        Ok(Self::merge(user_settings, overrides))
    }

    fn merge(user_settings: UserSettings, overrides: Overrides) -> Self {
        let mut engine = user_settings.engine.unwrap_or_default();
        if let Some(program) = overrides.engine_program {
            // A different program rarely understands the old arguments
            engine = EngineSettings {
                program,
                args: overrides.engine_args,
                settle_ms: engine.settle_ms,
            };
        } else if !overrides.engine_args.is_empty() {
            engine.args = overrides.engine_args;
        }

        Self {
            external_port: overrides
                .external_port
                .or(user_settings.external_port)
                .unwrap_or(DEFAULT_EXTERNAL_PORT),
            internal_port: overrides
                .internal_port
                .or(user_settings.internal_port)
                .unwrap_or(DEFAULT_INTERNAL_PORT),
            rewrite_host_headers: overrides.rewrite_host_headers
                || user_settings.rewrite_host_headers.unwrap_or(false),
            engine,
        }
    }
}
