//! Built-in Blueprints
//!
//! Device modules that ship with the orchestrator itself.
//!
//! ## Passthrough
//!
//! Entry point `passthrough`. Echoes every input unchanged and counts what it
//! has seen. Useful for wiring pipelines together and for smoke tests on a
//! board with no peripherals attached.
//!
//! ## Example
//!
//! ```rust
//! use purevision_core::modules::builtin::PassthroughDevice;
//! use purevision_core::device::DeviceBackend;
//! use purevision_core::payload::Payload;
//!
//! # async fn example() {
//! let mut device = PassthroughDevice::new();
//! device.initialize().await.unwrap();
//! device.start().await.unwrap();
//! let out = device.process(Payload::Empty).await.unwrap();
//! assert_eq!(out, Payload::Empty);
//! # }
//! ```

use super::blueprint::FactoryRegistry;
use crate::config::DeviceConfig;
use crate::device::DeviceBackend;
use crate::error::Result;
use crate::payload::Payload;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

/// Entry point of the passthrough blueprint
pub const PASSTHROUGH: &str = "passthrough";

/// Device that returns its input unchanged
pub struct PassthroughDevice {
    label: Option<String>,
    processed: u64,
    running: bool,
}

impl PassthroughDevice {
    pub fn new() -> Self {
        Self {
            label: None,
            processed: 0,
            running: false,
        }
    }

    /// Build from device config; honours an optional `"label"` string
    pub fn from_config(config: &DeviceConfig) -> Self {
        let mut device = Self::new();
        device.label = config
            .get("label")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        device
    }

    /// Number of inputs echoed so far
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl Default for PassthroughDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceBackend for PassthroughDevice {
    async fn initialize(&mut self) -> Result<()> {
        info!("Passthrough device initialized");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    async fn process(&mut self, input: Payload) -> Result<Payload> {
        if !self.running {
            warn!("Passthrough device processing while not started");
        }
        self.processed += 1;
        debug!("Passthrough echoed {} payload", input.kind());
        Ok(input)
    }

    async fn cleanup(&mut self) -> Result<()> {
        info!("Passthrough device shutting down (processed: {})", self.processed);
        self.running = false;
        Ok(())
    }

    fn get_info(&self) -> DeviceConfig {
        let mut info = DeviceConfig::new();
        info.insert("kind".into(), json!(PASSTHROUGH));
        info.insert("processed".into(), json!(self.processed));
        info.insert("running".into(), json!(self.running));
        if let Some(label) = &self.label {
            info.insert("label".into(), json!(label));
        }
        info
    }
}

pub(crate) fn register_builtins(registry: &mut FactoryRegistry) {
    let result = registry.register_fn(PASSTHROUGH, |_id: &str, config: &DeviceConfig| {
        Ok(Box::new(PassthroughDevice::from_config(config)) as Box<dyn DeviceBackend>)
    });
    if let Err(e) = result {
        debug!("Built-in factory not registered: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Frame, PixelFormat};

    #[tokio::test]
    async fn test_passthrough_echoes() {
        let mut device = PassthroughDevice::new();
        device.initialize().await.unwrap();
        device.start().await.unwrap();

        let frame = Frame::new(4, 2, PixelFormat::Rgb24).with_timing(10, 3);
        let out = device.process(frame.clone().into()).await.unwrap();
        assert_eq!(out.into_frame().unwrap(), frame);
        assert_eq!(device.processed(), 1);
    }

    #[tokio::test]
    async fn test_label_from_config() {
        let mut config = DeviceConfig::new();
        config.insert("label".into(), json!("bench"));
        let device = PassthroughDevice::from_config(&config);

        let info = device.get_info();
        assert_eq!(info["label"], "bench");
        assert_eq!(info["processed"], 0);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut device = PassthroughDevice::new();
        device.initialize().await.unwrap();
        device.start().await.unwrap();
        device.stop().await.unwrap();
        device.cleanup().await.unwrap();
        assert_eq!(device.get_info()["running"], false);
    }
}
