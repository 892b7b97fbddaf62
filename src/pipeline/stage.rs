//! Stage processors

use crate::device::Device;
use crate::error::Result;
use crate::payload::Payload;
use async_trait::async_trait;
use std::sync::Arc;

/// The narrow contract a pipeline stage needs: payload in, payload out
#[async_trait]
pub trait StageProcessor: Send + Sync {
    async fn process(&self, input: Payload) -> Result<Payload>;

    /// Device this stage drives, used to attribute failure events
    fn device_id(&self) -> Option<&str> {
        None
    }
}

/// Stage backed by a plain function
pub struct FnStage<F> {
    f: F,
}

/// Wrap a function as a stage processor
pub fn fn_stage<F>(f: F) -> FnStage<F>
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync,
{
    FnStage { f }
}

#[async_trait]
impl<F> StageProcessor for FnStage<F>
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync,
{
    async fn process(&self, input: Payload) -> Result<Payload> {
        (self.f)(input)
    }
}

/// Stage backed by a device's `process` operation
///
/// The device must be `RUNNING` when the pipeline runs; otherwise the stage
/// fails with the device's `InvalidState` error.
pub struct DeviceStage {
    device: Arc<Device>,
}

impl DeviceStage {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

#[async_trait]
impl StageProcessor for DeviceStage {
    async fn process(&self, input: Payload) -> Result<Payload> {
        self.device.process(input).await
    }

    fn device_id(&self) -> Option<&str> {
        Some(self.device.device_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_stage() {
        let double = fn_stage(|input: Payload| {
            let n = input
                .as_value()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| OrchestratorError::device("expected a number"))?;
            Ok(Payload::Value(json!(n * 2)))
        });

        let out = double.process(Payload::Value(json!(21))).await.unwrap();
        assert_eq!(out, Payload::Value(json!(42)));
        assert!(double.process(Payload::Empty).await.is_err());
        assert!(double.device_id().is_none());
    }
}
