//! Devices
//!
//! A device is a running instance of a blueprint. Concrete hardware support
//! lives behind [`DeviceBackend`]; [`Device`] wraps a backend and owns its
//! lifecycle state, statistics and status callbacks.
//!
//! ## Components
//!
//! - [`DeviceBackend`] - Contract implemented by device modules
//! - [`DeviceStatus`] - Lifecycle state machine
//! - [`Device`] - Lifecycle-enforcing wrapper shared by the manager and pipelines

mod backend;
mod lifecycle;
mod status;

pub use backend::DeviceBackend;
pub use lifecycle::{CallbackId, Device, DeviceStats, StatusCallback, StatusChange};
pub use status::DeviceStatus;
