//! Device backend trait
//!
//! Defines the contract every concrete device module must implement to be
//! managed by the orchestrator.
//!
//! ## Backend Architecture
//!
//! Backends in `purevision-core` handle:
//! - Talking to the hardware (CSI/USB cameras, GPIO pins, displays, IMUs)
//! - Turning inputs into outputs in `process`
//! - Releasing their own resources
//!
//! The orchestrator handles:
//! - Lifecycle state and which operations are legal when
//! - Status callbacks and events
//! - Statistics and error attribution
//!
//! ## Example
//!
//! ```rust
//! use purevision_core::config::DeviceConfig;
//! use purevision_core::device::DeviceBackend;
//! use purevision_core::error::Result;
//! use purevision_core::payload::Payload;
//! use async_trait::async_trait;
//!
//! struct Led {
//!     pin: u8,
//!     on: bool,
//! }
//!
//! #[async_trait]
//! impl DeviceBackend for Led {
//!     async fn initialize(&mut self) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn start(&mut self) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn stop(&mut self) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn process(&mut self, input: Payload) -> Result<Payload> {
//!         self.on = !self.on;
//!         Ok(input)
//!     }
//!
//!     async fn cleanup(&mut self) -> Result<()> {
//!         self.on = false;
//!         Ok(())
//!     }
//!
//!     fn get_info(&self) -> DeviceConfig {
//!         let mut info = DeviceConfig::new();
//!         info.insert("pin".into(), self.pin.into());
//!         info.insert("on".into(), self.on.into());
//!         info
//!     }
//! }
//! ```

use crate::config::DeviceConfig;
use crate::error::Result;
use crate::payload::Payload;
use async_trait::async_trait;

/// Backend trait for device modules
///
/// A backend is produced by a blueprint's factory and is owned exclusively by
/// the [`Device`](crate::device::Device) wrapping it. The wrapper serialises
/// every call, so implementations never see two operations at once.
///
/// ## Lifecycle
///
/// 1. **Construction**: the blueprint factory builds the backend from a device id and config
/// 2. **Initialization**: `initialize()` opens and configures the hardware
/// 3. **Operation**: `start()`, then `process()` per unit of work; `stop()` pauses
/// 4. **Cleanup**: `cleanup()` releases everything; it may be called from any state
///
/// ## Errors
///
/// Returning [`OrchestratorError::DeviceFault`](crate::error::OrchestratorError::DeviceFault)
/// from any method moves the device to `ERROR`. Other errors from `process`
/// are counted and returned to the caller without changing state. Any error
/// from `initialize`, `start`, `stop` or `resume` moves the device to `ERROR`.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Open and configure the hardware
    async fn initialize(&mut self) -> Result<()>;

    /// Begin operating (acquisition, output, polling)
    async fn start(&mut self) -> Result<()>;

    /// Pause operation without releasing resources
    async fn stop(&mut self) -> Result<()>;

    /// Handle one unit of work
    ///
    /// Capture devices receive [`Payload::Empty`] and return the next frame.
    async fn process(&mut self, input: Payload) -> Result<Payload>;

    /// Release every held resource. Must tolerate being called in any state.
    async fn cleanup(&mut self) -> Result<()>;

    /// Device-specific status fields
    fn get_info(&self) -> DeviceConfig;

    /// Continue after `stop()`
    ///
    /// Default implementation calls `start()` again.
    async fn resume(&mut self) -> Result<()> {
        self.start().await
    }
}
