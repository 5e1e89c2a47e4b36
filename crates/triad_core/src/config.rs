//! # Engine Configuration
//!
//! One [`EngineConfig`] is built at startup (from defaults or a TOML file)
//! and passed to every factory that needs it. Nothing reads configuration
//! from process-wide state.
//!
//! ```toml
//! [buffers]
//! attribute_usage = "dynamic"
//! index_usage = "static"
//! max_index_buffer_bytes = 16777216
//!
//! [draw]
//! multi_draw = true
//! attribute_slots = 8
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gpu::BufferUsage;

/// Upper bound on vertex attribute slots per draw call.
pub const MAX_ATTRIBUTE_SLOTS: usize = 16;

/// Buffer creation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Usage hint for attribute store buffers.
    pub attribute_usage: BufferUsage,
    /// Usage hint for index buffers.
    pub index_usage: BufferUsage,
    /// Cap on any single attribute buffer, in bytes.
    pub max_attribute_buffer_bytes: Option<usize>,
    /// Cap on any single index buffer, in bytes.
    pub max_index_buffer_bytes: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            attribute_usage: BufferUsage::Dynamic,
            index_usage: BufferUsage::Static,
            max_attribute_buffer_bytes: None,
            max_index_buffer_bytes: None,
        }
    }
}

/// Draw submission settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawConfig {
    /// Merge consecutive compatible ranges into one multi-draw when the
    /// device supports it.
    pub multi_draw: bool,
    /// Vertex attribute slots per draw call descriptor.
    pub attribute_slots: usize,
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            multi_draw: true,
            attribute_slots: 8,
        }
    }
}

/// Shutdown cleanup settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Frame pairs after which a purge logs a warning.
    pub purge_warn_rounds: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { purge_warn_rounds: 8 }
    }
}

/// Top-level configuration context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Buffer creation settings.
    pub buffers: BufferConfig,
    /// Draw submission settings.
    pub draw: DrawConfig,
    /// Shutdown cleanup settings.
    pub cleanup: CleanupConfig,
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed input, [`ConfigError::Invalid`]
    /// for values that fail [`validate`](Self::validate).
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.draw.attribute_slots == 0 || self.draw.attribute_slots > MAX_ATTRIBUTE_SLOTS {
            return Err(ConfigError::Invalid(format!(
                "draw.attribute_slots must be in 1..={MAX_ATTRIBUTE_SLOTS}, got {}",
                self.draw.attribute_slots
            )));
        }
        if self.buffers.max_attribute_buffer_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "buffers.max_attribute_buffer_bytes must be non-zero".into(),
            ));
        }
        if self.buffers.max_index_buffer_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "buffers.max_index_buffer_bytes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [buffers]
            index_usage = "stream"
            max_index_buffer_bytes = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.buffers.index_usage, BufferUsage::Stream);
        assert_eq!(config.buffers.max_index_buffer_bytes, Some(4096));
        assert_eq!(config.buffers.attribute_usage, BufferUsage::Dynamic);
        assert!(config.draw.multi_draw);
    }

    #[test]
    fn test_invalid_slot_count_rejected() {
        let err = EngineConfig::from_toml_str("[draw]\nattribute_slots = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_document_rejected() {
        let err = EngineConfig::from_toml_str("[draw\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = EngineConfig::default();
        config.buffers.max_attribute_buffer_bytes = Some(1 << 20);
        config.draw.multi_draw = false;
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load("/nonexistent/triad.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
