//! Audit trail for dispatch failures and plugin lifecycle
//!
//! Handler and command failures never propagate to emitters; they end up
//! here instead. Hosts choose where the trail goes by picking a sink.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Audit event describing a failure or lifecycle change
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub event_type: AuditEventType,
    /// Plugin name, or `host` for the host itself
    pub source: String,
    pub details: AuditDetails,
}

impl AuditEvent {
    /// Create a new audit event stamped with the current time
    pub fn new(event_type: AuditEventType, source: impl Into<String>, details: AuditDetails) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            source: source.into(),
            details,
        }
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// An event handler returned an error or panicked
    HandlerFailed,
    /// A fire-and-forget command invocation failed
    CommandFailed,
    PluginLoaded,
    PluginUnloaded,
}

/// Details about the audit event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Handler {
        event: String,
        handler_id: String,
        message: String,
    },
    Command {
        command: String,
        message: String,
    },
    Lifecycle {
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    /// Record an audit event
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Flush any buffered events
    fn flush(&self) -> Result<(), AuditError>;
}

/// Record an event, logging instead of failing when the sink is broken
pub(crate) fn record_or_warn(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(event) {
        tracing::warn!(error = %e, "Failed to record audit event");
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// File-based audit sink (JSON Lines, one event per line)
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Open (or create) the log file for appending
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", json)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// In-memory audit sink, bounded, oldest events evicted first
pub struct MemoryAuditSink {
    events: RwLock<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Sink keeping the last 1000 events
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(max_events.min(1000))),
            max_events: max_events.max(1),
        }
    }

    /// Snapshot of the retained events, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Retained events of one type
    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        while events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Sink that drops every event
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Create an audit event for a failed event handler
pub fn handler_failed(event: &str, handler_id: &str, message: impl Into<String>) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::HandlerFailed,
        "host",
        AuditDetails::Handler {
            event: event.to_string(),
            handler_id: handler_id.to_string(),
            message: message.into(),
        },
    )
}

/// Create an audit event for a failed fire-and-forget command
pub fn command_failed(source: &str, command: &str, message: impl Into<String>) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CommandFailed,
        source,
        AuditDetails::Command {
            command: command.to_string(),
            message: message.into(),
        },
    )
}

pub fn plugin_loaded(plugin: &str, version: Option<String>) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::PluginLoaded,
        plugin,
        AuditDetails::Lifecycle { version },
    )
}

pub fn plugin_unloaded(plugin: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::PluginUnloaded,
        plugin,
        AuditDetails::Lifecycle { version: None },
    )
}
