//! Pipeline execution engine

use super::stage::{fn_stage, DeviceStage, StageProcessor};
use super::stats::{PipelineStats, StatsCollector};
use crate::config::{OrchestratorConfig, DEFAULT_STATS_WINDOW};
use crate::device::Device;
use crate::error::{OrchestratorError, Result};
use crate::events::{Event, EventBus};
use crate::payload::Payload;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info};

struct Stage {
    name: String,
    processor: Arc<dyn StageProcessor>,
    enabled: bool,
}

/// Ordered chain of named processing stages
///
/// Assembly methods take `&mut self` and `process_frame` takes `&self`, so
/// the stage list cannot change while a frame is in flight.
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
    stats: Mutex<StatsCollector>,
    bus: Option<Arc<EventBus>>,
}

impl Pipeline {
    /// Empty pipeline with the default rolling window
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_window(name, DEFAULT_STATS_WINDOW)
    }

    /// Empty pipeline computing rolling FPS over `window` frames
    pub fn with_window(name: impl Into<String>, window: usize) -> Self {
        let name = name.into();
        debug!("Creating pipeline '{}' (window {})", name, window);
        Self {
            name,
            stages: Vec::new(),
            stats: Mutex::new(StatsCollector::new(window)),
            bus: None,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &OrchestratorConfig) -> Self {
        Self::with_window(name, config.stats_window)
    }

    /// Publish `processing_complete` / `error_occurred` for every frame
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a stage
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::DuplicateId`] if a stage named `name` exists.
    pub fn add_stage<P>(&mut self, name: impl Into<String>, processor: P) -> Result<()>
    where
        P: StageProcessor + 'static,
    {
        let name = name.into();
        if self.stages.iter().any(|s| s.name == name) {
            return Err(OrchestratorError::duplicate("stage", name));
        }

        info!("Pipeline '{}': added stage '{}'", self.name, name);
        self.lock_stats().add_stage(&name);
        self.stages.push(Stage {
            name,
            processor: Arc::new(processor),
            enabled: true,
        });
        Ok(())
    }

    /// Append a stage backed by a plain function
    pub fn add_fn_stage<F>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(Payload) -> Result<Payload> + Send + Sync + 'static,
    {
        self.add_stage(name, fn_stage(f))
    }

    /// Append a stage backed by a device's `process`
    pub fn add_device_stage(&mut self, name: impl Into<String>, device: Arc<Device>) -> Result<()> {
        self.add_stage(name, DeviceStage::new(device))
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_stage_enabled(&self, name: &str) -> Option<bool> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.enabled)
    }

    pub fn enable_stage(&mut self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    /// Bypass a stage until it is enabled again
    pub fn disable_stage(&mut self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    /// Drop every stage and its counters
    pub fn clear_stages(&mut self) {
        info!("Pipeline '{}': cleared {} stage(s)", self.name, self.stages.len());
        self.stages.clear();
        self.lock_stats().clear_stages();
    }

    /// Run `input` through every enabled stage in order
    ///
    /// Each stage's output is the next stage's input. The first failing stage
    /// ends the run; later stages are not invoked and no partial result is
    /// returned.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::StageProcessing`] naming the failing stage and
    /// wrapping its error.
    pub async fn process_frame(&self, input: Payload) -> Result<Payload> {
        let frame_start = Instant::now();
        let mut payload = input;

        for stage in self.stages.iter().filter(|s| s.enabled) {
            let stage_start = Instant::now();
            let result = stage.processor.process(payload).await;
            let ok = result.is_ok();
            self.lock_stats()
                .record_stage(&stage.name, stage_start.elapsed(), ok);

            payload = match result {
                Ok(output) => output,
                Err(e) => {
                    error!("Pipeline '{}': stage '{}' failed: {}", self.name, stage.name, e);
                    self.lock_stats().record_failure();

                    let err = OrchestratorError::StageProcessing {
                        stage: stage.name.clone(),
                        source: Box::new(e),
                    };
                    if let Some(bus) = &self.bus {
                        bus.publish_event(Event::error_occurred(
                            stage.processor.device_id(),
                            err.to_string(),
                        ));
                    }
                    return Err(err);
                }
            };
        }

        self.lock_stats().record_frame(frame_start.elapsed());

        if let Some(bus) = &self.bus {
            bus.publish_event(Event::processing_complete(&self.name, payload.summary()));
        }

        Ok(payload)
    }

    pub fn get_stats(&self) -> PipelineStats {
        let stats = self.lock_stats();
        stats.snapshot(&self.name, |stage| self.is_stage_enabled(stage).unwrap_or(false))
    }

    pub fn reset_stats(&self) {
        debug!("Pipeline '{}': stats reset", self.name);
        self.lock_stats().reset();
    }

    /// Rolling window size in frames
    pub fn stats_window(&self) -> usize {
        self.lock_stats().window()
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let stage = self
            .stages
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| OrchestratorError::not_found("Stage", name))?;

        stage.enabled = enabled;
        info!(
            "Pipeline '{}': stage '{}' {}",
            self.name,
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    fn lock_stats(&self) -> MutexGuard<'_, StatsCollector> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}
