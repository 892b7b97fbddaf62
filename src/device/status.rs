//! Device status state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a device
///
/// ```text
/// UNINITIALIZED ─initialize()─▶ INITIALIZING ─ok─▶ READY ─start()─▶ RUNNING ◀─resume()/stop()─▶ PAUSED
///                                     │
///                                     └─fail─▶ ERROR   (also reachable on a fault from any non-terminal state)
///
/// any state ─cleanup()─▶ DISCONNECTED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    Paused,
    Error,
    Disconnected,
}

impl DeviceStatus {
    /// Every state, in lifecycle order
    pub const ALL: [DeviceStatus; 7] = [
        DeviceStatus::Uninitialized,
        DeviceStatus::Initializing,
        DeviceStatus::Ready,
        DeviceStatus::Running,
        DeviceStatus::Paused,
        DeviceStatus::Error,
        DeviceStatus::Disconnected,
    ];

    /// Wire name used in events
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Uninitialized => "uninitialized",
            DeviceStatus::Initializing => "initializing",
            DeviceStatus::Ready => "ready",
            DeviceStatus::Running => "running",
            DeviceStatus::Paused => "paused",
            DeviceStatus::Error => "error",
            DeviceStatus::Disconnected => "disconnected",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceStatus::Disconnected)
    }

    /// Whether `self -> next` is a defined lifecycle edge
    pub fn can_transition_to(&self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;

        match (*self, next) {
            (Disconnected, _) => false,
            (_, Disconnected) => true,
            (Error, Error) => false,
            (_, Error) => true,
            (Uninitialized, Initializing)
            | (Initializing, Ready)
            | (Ready, Running)
            | (Running, Paused)
            | (Paused, Running) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}
