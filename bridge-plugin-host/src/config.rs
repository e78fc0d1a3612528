//! Host configuration
//!
//! Read from a JSON file, every section optional:
//!
//! ```json
//! {
//!   "tracing": { "level": "debug", "format": "json" },
//!   "audit": { "sink": "file", "path": "/var/log/bridge/audit.jsonl" },
//!   "expose_event_commands": true
//! }
//! ```

use crate::audit::{AuditError, AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::tracing_support::TracingConfig;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Audit sink setup failed: {0}")]
    Audit(#[from] AuditError),

    #[error("Audit sink 'file' requires a path")]
    MissingAuditPath,
}

/// Top-level host configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub tracing: TracingConfig,
    pub audit: AuditConfig,
    /// Register `events.emit`, `events.off` and `events.triggerCommand`
    pub expose_event_commands: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::default(),
            audit: AuditConfig::default(),
            expose_event_commands: true,
        }
    }
}

impl HostConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default location: `<config dir>/<app>/host.json`
    pub fn default_path(app_name: &str) -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join(app_name).join("host.json")
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load_or_default(app_name: &str) -> Result<Self, ConfigError> {
        let path = Self::default_path(app_name);
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "No host config found, using defaults");
            Ok(Self::default())
        }
    }
}

/// Where audit events go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    #[default]
    Null,
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub sink: AuditSinkKind,
    /// Log file for the `file` sink
    pub path: Option<PathBuf>,
    /// Capacity of the `memory` sink
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Null,
            path: None,
            capacity: 1000,
        }
    }
}

impl AuditConfig {
    /// Build the configured sink
    pub fn build_sink(&self) -> Result<Arc<dyn AuditSink>, ConfigError> {
        Ok(match self.sink {
            AuditSinkKind::Null => Arc::new(NullAuditSink),
            AuditSinkKind::Memory => Arc::new(MemoryAuditSink::with_capacity(self.capacity)),
            AuditSinkKind::File => {
                let path = self.path.as_ref().ok_or(ConfigError::MissingAuditPath)?;
                Arc::new(FileAuditSink::new(path)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing_support::TracingFormat;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert!(config.expose_event_commands);
        assert_eq!(config.audit.sink, AuditSinkKind::Null);
        assert_eq!(config.tracing.format, TracingFormat::Pretty);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            r#"{{ "tracing": {{ "format": "json" }}, "audit": {{ "sink": "memory", "capacity": 5 }} }}"#
        )
        .unwrap();

        let config = HostConfig::from_file(&path).unwrap();
        assert_eq!(config.tracing.format, TracingFormat::Json);
        assert_eq!(config.audit.sink, AuditSinkKind::Memory);
        assert_eq!(config.audit.capacity, 5);
        assert!(config.expose_event_commands);
    }

    #[test]
    fn test_missing_file() {
        let err = HostConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = HostConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_file_sink_requires_path() {
        let audit = AuditConfig {
            sink: AuditSinkKind::File,
            ..Default::default()
        };
        assert!(matches!(
            audit.build_sink(),
            Err(ConfigError::MissingAuditPath)
        ));
    }

    #[test]
    fn test_file_sink_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditConfig {
            sink: AuditSinkKind::File,
            path: Some(dir.path().join("audit.jsonl")),
            ..Default::default()
        };
        assert!(audit.build_sink().is_ok());
        assert!(dir.path().join("audit.jsonl").exists());
    }
}
