//! Error types for purevision-core

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias using OrchestratorError
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// One device that failed to tear down cleanly during shutdown.
#[derive(Debug)]
pub struct DeviceFailure {
    /// Device that failed
    pub device_id: String,
    /// What went wrong
    pub error: OrchestratorError,
}

impl fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.device_id, self.error)
    }
}

/// Orchestrator error types
///
/// Every failure surfaced by the loader, the device lifecycle, the manager and
/// the pipeline. Subscriber failures on the event bus never surface here; they
/// are turned into `error_occurred` events instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Blueprint could not be discovered, parsed or loaded
    #[error("Failed to load module '{module}': {reason}")]
    ModuleLoad { module: String, reason: String },

    /// Blueprint does not expose a required or declared capability
    #[error("Failed to load module '{module}': missing capability '{capability}'")]
    MissingCapability { module: String, capability: String },

    /// Device id or stage name already in use
    #[error("Duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },

    /// Unknown device, stage or module reference
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation not valid for the device's current lifecycle state
    #[error("Cannot {operation} device '{device_id}' in state {state}")]
    InvalidState {
        device_id: String,
        state: String,
        operation: &'static str,
    },

    /// A pipeline stage failed; wraps the underlying cause
    #[error("Stage '{stage}' failed: {source}")]
    StageProcessing {
        stage: String,
        #[source]
        source: Box<OrchestratorError>,
    },

    /// Teardown failures collected across every device
    #[error("Shutdown failed for {} device(s): {}", .0.len(), join_failures(.0))]
    ShutdownAggregate(Vec<DeviceFailure>),

    /// Bounded wait expired
    #[error("Timed out after {after_ms}ms waiting for {operation} on '{device_id}'")]
    Timeout {
        device_id: String,
        operation: &'static str,
        after_ms: u64,
    },

    /// Unrecoverable fault reported by a device backend
    #[error("Device fault: {0}")]
    DeviceFault(String),

    /// Recoverable device error
    #[error("Device error: {0}")]
    Device(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn join_failures(failures: &[DeviceFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl OrchestratorError {
    /// Create a ModuleLoad error
    pub fn module_load(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleLoad {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Create a DeviceFault error
    pub fn fault(msg: impl Into<String>) -> Self {
        Self::DeviceFault(msg.into())
    }

    /// Create a Device error
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create a Config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a NotFound error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a DuplicateId error
    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        Self::DuplicateId {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error is an unrecoverable device fault
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::DeviceFault(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = OrchestratorError::fault("sensor unplugged");
        assert!(err.is_fault());
        assert!(!OrchestratorError::device("busy").is_fault());
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::MissingCapability {
            module: "camera".to_string(),
            capability: "process".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load module 'camera': missing capability 'process'"
        );

        let err = OrchestratorError::not_found("Device", "cam9");
        assert_eq!(err.to_string(), "Device not found: cam9");
    }

    #[test]
    fn test_stage_error_keeps_source() {
        let err = OrchestratorError::StageProcessing {
            stage: "blur".to_string(),
            source: Box::new(OrchestratorError::device("kernel too large")),
        };
        assert_eq!(
            err.to_string(),
            "Stage 'blur' failed: Device error: kernel too large"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_shutdown_aggregate_display() {
        let err = OrchestratorError::ShutdownAggregate(vec![
            DeviceFailure {
                device_id: "cam0".to_string(),
                error: OrchestratorError::device("stuck"),
            },
            DeviceFailure {
                device_id: "gpio0".to_string(),
                error: OrchestratorError::Timeout {
                    device_id: "gpio0".to_string(),
                    operation: "cleanup",
                    after_ms: 50,
                },
            },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("Shutdown failed for 2 device(s)"));
        assert!(text.contains("cam0: Device error: stuck"));
        assert!(text.contains("gpio0"));
    }
}
