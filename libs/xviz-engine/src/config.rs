use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use xviz_api::{MetadataProvider, ParserConfig, UiBuilder, UiNode};

use crate::error::EngineError;

/// Root configuration, parsed from TOML or any registered `ConfigParser`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Parsing rules shared by every worker.
    #[serde(default)]
    pub parser: ParserConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    /// Top-level UI panels published as metadata.
    #[serde(default)]
    pub ui: Vec<UiNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on workers alive at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_in_flight: default_max_in_flight() }
    }
}

fn default_max_in_flight() -> usize {
    4
}

/// A config file format. The engine only ships TOML; other formats live in
/// their own crates.
pub trait ConfigParser: Send + Sync {
    /// File extensions handled, without the dot.
    fn extensions(&self) -> &[&str];

    fn parse(&self, content: &str) -> Result<EngineConfig, EngineError>;
}

pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<EngineConfig, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        Self::load_with(path, &[&TomlParser])
    }

    /// Load configuration, picking the parser by file extension.
    pub fn load_with(path: &str, parsers: &[&dyn ConfigParser]) -> Result<Self, EngineError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let parser = parsers
            .iter()
            .find(|p| p.extensions().contains(&ext))
            .ok_or_else(|| EngineError::Config(format!("{path}: no parser for extension '{ext}'")))?;

        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        let config = parser.parse(&content).map_err(|e| e.with_context(path))?;
        config.validate().map_err(|e| e.with_context(path))?;
        tracing::debug!(path, parser = ext, "loaded configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config = TomlParser.parse(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.parser.validate().map_err(EngineError::Config)?;
        if self.pool.max_in_flight == 0 {
            return Err(EngineError::Config("pool.max_in_flight must be at least 1".into()));
        }
        for panel in &self.ui {
            if !matches!(panel, UiNode::Panel { .. }) {
                return Err(EngineError::Config("ui: top-level entries must be panels".into()));
            }
        }
        Ok(())
    }

    /// The parser configuration as the shared handle workers capture.
    pub fn parser_handle(&self) -> Arc<ParserConfig> {
        Arc::new(self.parser.clone())
    }
}

/// Metadata provider serving the panels declared in configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPanels {
    panels: Vec<UiNode>,
}

impl ConfiguredPanels {
    pub fn new(panels: Vec<UiNode>) -> Self {
        Self { panels }
    }
}

impl MetadataProvider for ConfiguredPanels {
    fn extend_ui(&self, ui: &mut UiBuilder) {
        for panel in &self.panels {
            ui.child(panel.clone());
        }
    }
}
