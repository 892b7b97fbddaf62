//! Lifecycle-managed device
//!
//! [`Device`] wraps a backend and is the only place a device's status or
//! statistics change. Every transition runs the registered status callbacks
//! synchronously, in registration order, and then publishes
//! `device_status_changed` on the event bus.
//!
//! ## Concurrency
//!
//! Lifecycle operations and `process` are serialised on the backend lock.
//! `cleanup()` first raises a cooperative stop flag, so a `process` call that
//! is queued behind an in-flight one bails out instead of touching a backend
//! that is being torn down.

use super::backend::DeviceBackend;
use super::status::DeviceStatus;
use crate::config::DeviceConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::{Event, EventBus};
use crate::payload::Payload;
use serde::Serialize;
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A status transition, as seen by callbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub device_id: String,
    pub old_status: DeviceStatus,
    pub new_status: DeviceStatus,
}

/// Status-change callback
pub type StatusCallback = Arc<dyn Fn(&StatusChange) + Send + Sync>;

/// Identifies a registered status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Runtime statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceStats {
    /// Successful `process` calls
    pub frames_processed: u64,
    /// Failed operations of any kind
    pub errors: u64,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// Seconds since the device was created
    pub uptime_secs: f64,
}

#[derive(Default)]
struct StatsInner {
    frames_processed: u64,
    errors: u64,
    last_error: Option<String>,
}

/// A uniquely identified, running instance of a blueprint
pub struct Device {
    device_id: String,
    module_name: String,
    blueprint_version: u64,
    config: DeviceConfig,
    status: RwLock<DeviceStatus>,
    backend: tokio::sync::Mutex<Box<dyn DeviceBackend>>,
    callbacks: Mutex<Vec<(CallbackId, StatusCallback)>>,
    next_callback_id: AtomicU64,
    stats: Mutex<StatsInner>,
    stop_requested: AtomicBool,
    bus: Arc<EventBus>,
    created_at: Instant,
}

impl Device {
    /// Wrap a freshly built backend. The device starts `UNINITIALIZED`.
    pub fn new(
        device_id: impl Into<String>,
        module_name: impl Into<String>,
        blueprint_version: u64,
        config: DeviceConfig,
        backend: Box<dyn DeviceBackend>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            module_name: module_name.into(),
            blueprint_version,
            config,
            status: RwLock::new(DeviceStatus::Uninitialized),
            backend: tokio::sync::Mutex::new(backend),
            callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            stats: Mutex::new(StatsInner::default()),
            stop_requested: AtomicBool::new(false),
            bus,
            created_at: Instant::now(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Name of the blueprint this device was built from
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Blueprint version this device was built from; never re-bound
    pub fn blueprint_version(&self) -> u64 {
        self.blueprint_version
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn status(&self) -> DeviceStatus {
        *self.status.read().unwrap_or_else(|p| p.into_inner())
    }

    /// `READY` or `RUNNING`
    pub fn is_ready(&self) -> bool {
        matches!(self.status(), DeviceStatus::Ready | DeviceStatus::Running)
    }

    /// Cooperative stop flag; set once `cleanup()` begins
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DeviceStats {
        let inner = self.lock_stats();
        DeviceStats {
            frames_processed: inner.frames_processed,
            errors: inner.errors,
            last_error: inner.last_error.clone(),
            uptime_secs: self.created_at.elapsed().as_secs_f64(),
        }
    }

    /// Register a status-change callback
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.lock_callbacks().push((id, Arc::new(callback)));
        debug!("Device '{}': status callback {:?} registered", self.device_id, id);
        id
    }

    /// Remove a status-change callback
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.lock_callbacks();
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        callbacks.len() != before
    }

    /// `UNINITIALIZED → INITIALIZING → READY`, or `→ ERROR` on failure
    pub async fn initialize(&self) -> Result<()> {
        let mut backend = self.backend.lock().await;
        self.expect_status(&[DeviceStatus::Uninitialized], "initialize")?;

        info!("Initializing device '{}' ({})", self.device_id, self.module_name);
        self.transition(DeviceStatus::Initializing)?;

        match backend.initialize().await {
            Ok(()) => self.transition(DeviceStatus::Ready),
            Err(e) => {
                self.enter_error(&e);
                Err(e)
            }
        }
    }

    /// `READY → RUNNING`
    pub async fn start(&self) -> Result<()> {
        let mut backend = self.backend.lock().await;
        self.expect_status(&[DeviceStatus::Ready], "start")?;

        match backend.start().await {
            Ok(()) => self.transition(DeviceStatus::Running),
            Err(e) => {
                self.enter_error(&e);
                Err(e)
            }
        }
    }

    /// `RUNNING → PAUSED`
    pub async fn stop(&self) -> Result<()> {
        let mut backend = self.backend.lock().await;
        self.expect_status(&[DeviceStatus::Running], "stop")?;

        match backend.stop().await {
            Ok(()) => self.transition(DeviceStatus::Paused),
            Err(e) => {
                self.enter_error(&e);
                Err(e)
            }
        }
    }

    /// `PAUSED → RUNNING`
    pub async fn resume(&self) -> Result<()> {
        let mut backend = self.backend.lock().await;
        self.expect_status(&[DeviceStatus::Paused], "resume")?;

        match backend.resume().await {
            Ok(()) => self.transition(DeviceStatus::Running),
            Err(e) => {
                self.enter_error(&e);
                Err(e)
            }
        }
    }

    /// Run one unit of work. Only valid while `RUNNING`.
    ///
    /// Publishes `processing_complete` on success. When called with
    /// [`Payload::Empty`] and a frame comes back, `frame_captured` is
    /// published as well.
    pub async fn process(&self, input: Payload) -> Result<Payload> {
        self.expect_status(&[DeviceStatus::Running], "process")?;

        let mut backend = self.backend.lock().await;
        if self.stop_requested() {
            return Err(OrchestratorError::InvalidState {
                device_id: self.device_id.clone(),
                state: format!("{} (cleanup pending)", self.status()),
                operation: "process",
            });
        }
        self.expect_status(&[DeviceStatus::Running], "process")?;

        let is_capture = matches!(input, Payload::Empty);

        match backend.process(input).await {
            Ok(output) => {
                self.lock_stats().frames_processed += 1;

                if let (true, Some(frame)) = (is_capture, output.as_frame()) {
                    self.bus.publish_event(Event::frame_captured(
                        &self.device_id,
                        output.summary(),
                        frame.timestamp_us,
                    ));
                }
                self.bus.publish_event(Event::processing_complete(
                    &self.device_id,
                    output.summary(),
                ));

                Ok(output)
            }
            Err(e) => {
                if e.is_fault() {
                    self.enter_error(&e);
                } else {
                    self.record_error(&e);
                    warn!("Device '{}' failed to process: {}", self.device_id, e);
                }
                Err(e)
            }
        }
    }

    /// Release resources and move to `DISCONNECTED`. Safe from any state;
    /// calling it again is a no-op.
    ///
    /// The device ends up `DISCONNECTED` even if the backend reports an
    /// error, which is then returned.
    pub async fn cleanup(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::Release);

        let mut backend = self.backend.lock().await;
        if self.status() == DeviceStatus::Disconnected {
            debug!("Device '{}' already disconnected", self.device_id);
            return Ok(());
        }

        info!("Cleaning up device '{}'", self.device_id);
        let result = backend.cleanup().await;
        if let Err(e) = &result {
            self.record_error(e);
            error!("Device '{}' cleanup failed: {}", self.device_id, e);
        }

        self.transition(DeviceStatus::Disconnected)?;
        result
    }

    /// Move to `DISCONNECTED` without touching the backend.
    ///
    /// Used when a bounded teardown expired and the backend cannot be
    /// trusted to finish. Callbacks and `device_status_changed` still fire.
    pub(crate) fn force_disconnect(&self) {
        self.stop_requested.store(true, Ordering::Release);
        if self.status() == DeviceStatus::Disconnected {
            return;
        }

        warn!("Forcing device '{}' to disconnected", self.device_id);
        if let Err(e) = self.transition(DeviceStatus::Disconnected) {
            debug!("Device '{}' not forced: {}", self.device_id, e);
        }
    }

    /// Report an unrecoverable fault detected outside a lifecycle call
    /// (e.g. by a watchdog or the backend's own I/O thread).
    pub fn report_fault(&self, reason: impl Into<String>) -> Result<()> {
        let err = OrchestratorError::fault(reason);
        self.record_error(&err);
        self.transition(DeviceStatus::Error)?;
        self.bus
            .publish_event(Event::error_occurred(Some(&self.device_id), err.to_string()));
        Ok(())
    }

    /// Backend status fields merged with orchestrator-side state
    pub async fn info(&self) -> DeviceConfig {
        let mut info = self.backend.lock().await.get_info();
        let stats = self.stats();

        info.insert("device_id".into(), json!(self.device_id));
        info.insert("module_name".into(), json!(self.module_name));
        info.insert("blueprint_version".into(), json!(self.blueprint_version));
        info.insert("status".into(), json!(self.status()));
        info.insert("stats".into(), json!(stats));
        info
    }

    fn expect_status(&self, allowed: &[DeviceStatus], operation: &'static str) -> Result<()> {
        let current = self.status();
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidState {
                device_id: self.device_id.clone(),
                state: current.to_string(),
                operation,
            })
        }
    }

    fn transition(&self, next: DeviceStatus) -> Result<()> {
        let old = {
            let mut status = self.status.write().unwrap_or_else(|p| p.into_inner());
            if !status.can_transition_to(next) {
                return Err(OrchestratorError::InvalidState {
                    device_id: self.device_id.clone(),
                    state: status.to_string(),
                    operation: "transition",
                });
            }
            std::mem::replace(&mut *status, next)
        };

        info!("Device '{}' status: {} -> {}", self.device_id, old, next);

        let change = StatusChange {
            device_id: self.device_id.clone(),
            old_status: old,
            new_status: next,
        };

        let callbacks: Vec<StatusCallback> = self
            .lock_callbacks()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&change))).is_err() {
                error!("Device '{}': status callback panicked", self.device_id);
                self.bus.publish_event(Event::error_occurred(
                    Some(&self.device_id),
                    format!("status callback panicked on {} -> {}", old, next),
                ));
            }
        }

        self.bus.publish_event(Event::device_status_changed(
            &self.device_id,
            old.as_str(),
            next.as_str(),
        ));

        Ok(())
    }

    fn enter_error(&self, cause: &OrchestratorError) {
        self.record_error(cause);
        error!("Device '{}' fault: {}", self.device_id, cause);
        if let Err(e) = self.transition(DeviceStatus::Error) {
            debug!("Device '{}' not moved to ERROR: {}", self.device_id, e);
        }
        self.bus
            .publish_event(Event::error_occurred(Some(&self.device_id), cause.to_string()));
    }

    fn record_error(&self, err: &OrchestratorError) {
        let mut stats = self.lock_stats();
        stats.errors += 1;
        stats.last_error = Some(err.to_string());
    }

    fn lock_stats(&self) -> MutexGuard<'_, StatsInner> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_callbacks(&self) -> MutexGuard<'_, Vec<(CallbackId, StatusCallback)>> {
        self.callbacks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("device_id", &self.device_id)
            .field("module_name", &self.module_name)
            .field("blueprint_version", &self.blueprint_version)
            .field("status", &self.status())
            .finish()
    }
}
