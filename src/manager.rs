//! Device Manager
//!
//! Creates and destroys devices from loaded blueprints and holds the live
//! device registry.
//!
//! ## Responsibilities
//!
//! - Device creation (resolve blueprint, instantiate, initialize)
//! - Device removal (stop, cleanup, deregister)
//! - Bulk start/stop that continues past individual failures
//! - Ordered, time-bounded shutdown with aggregated failures
//!
//! Registry mutation (`remove_device`, `shutdown_all`) is serialised on the
//! registry write lock. `create_device` reserves its id up front and only
//! takes the write lock to register the initialized device. Lookups take the
//! read lock and run concurrently with each other.
//!
//! ## Example
//!
//! ```rust
//! use purevision_core::events::EventBus;
//! use purevision_core::manager::DeviceManager;
//! use purevision_core::modules::{FactoryRegistry, ModuleLoader};
//! use purevision_core::payload::Payload;
//! use std::sync::Arc;
//!
//! # async fn example() -> purevision_core::error::Result<()> {
//! let bus = EventBus::new();
//! let loader = Arc::new(ModuleLoader::new(vec![], FactoryRegistry::with_builtins()));
//! let manager = DeviceManager::new(loader, bus);
//!
//! let device = manager.create_device("passthrough", "echo0", Default::default()).await?;
//! manager.start_device("echo0").await?;
//! device.process(Payload::Empty).await?;
//!
//! manager.shutdown_all().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{DeviceConfig, OrchestratorConfig, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use crate::device::{Device, DeviceStatus};
use crate::error::{DeviceFailure, OrchestratorError, Result};
use crate::events::{Event, EventBus};
use crate::modules::{Blueprint, BlueprintDescriptor, FactoryRegistry, ModuleLoader};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct Registry {
    devices: HashMap<String, Arc<Device>>,
    /// Device ids in creation order
    order: Vec<String>,
}

impl Registry {
    fn remove(&mut self, device_id: &str) -> Option<Arc<Device>> {
        let device = self.devices.remove(device_id)?;
        self.order.retain(|id| id != device_id);
        Some(device)
    }
}

/// Id claimed by an in-flight `create_device`; released on drop, so a
/// cancelled creation does not leak the id
struct Reservation<'a> {
    pending: &'a Mutex<HashSet<String>>,
    device_id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.device_id);
    }
}

fn lock_pending(pending: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    pending.lock().unwrap_or_else(|p| p.into_inner())
}

/// Device Manager
///
/// Owns every live device. Devices are handed out as `Arc<Device>` so
/// pipelines and callers can drive them without holding the registry lock.
pub struct DeviceManager {
    loader: Arc<ModuleLoader>,
    bus: Arc<EventBus>,
    registry: RwLock<Registry>,
    /// Ids being created but not yet registered
    pending: Mutex<HashSet<String>>,
    shutdown_timeout: Duration,
}

impl DeviceManager {
    /// Create a manager over an existing loader and bus
    pub fn new(loader: Arc<ModuleLoader>, bus: Arc<EventBus>) -> Self {
        info!("Creating new DeviceManager");
        Self {
            loader,
            bus,
            registry: RwLock::new(Registry::default()),
            pending: Mutex::new(HashSet::new()),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }

    /// Build loader and manager from runtime settings
    pub fn from_config(
        config: &OrchestratorConfig,
        factories: FactoryRegistry,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        let loader = Arc::new(ModuleLoader::new(config.module_paths.clone(), factories));
        Ok(Self::new(loader, bus).with_shutdown_timeout(config.shutdown_timeout()))
    }

    /// Bounded wait per device during teardown
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Create and initialize a device
    ///
    /// Resolves `module_name` through the loader (loading it on demand),
    /// instantiates a backend and drives `initialize()`. Publishes
    /// `device_created` once the device is registered.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::DuplicateId`] - `device_id` is already live;
    ///   the existing device is not touched
    /// - [`OrchestratorError::ModuleLoad`] / [`OrchestratorError::MissingCapability`] -
    ///   the blueprint cannot be loaded
    /// - Any error from `initialize()`; the half-built device is cleaned up
    ///   and never registered
    pub async fn create_device(
        &self,
        module_name: &str,
        device_id: &str,
        config: DeviceConfig,
    ) -> Result<Arc<Device>> {
        let reservation = self.reserve(device_id).await?;

        let blueprint = self.loader.resolve(module_name)?;
        let backend = blueprint.instantiate(device_id, &config)?;
        let device = Arc::new(Device::new(
            device_id,
            blueprint.name(),
            blueprint.version(),
            config,
            backend,
            Arc::clone(&self.bus),
        ));

        if let Err(e) = device.initialize().await {
            error!("Failed to initialize device '{}': {}", device_id, e);
            if let Err(cleanup_err) = device.cleanup().await {
                warn!(
                    "Cleanup after failed initialization of '{}' also failed: {}",
                    device_id, cleanup_err
                );
            }
            return Err(e);
        }

        {
            let mut registry = self.registry.write().await;
            registry
                .devices
                .insert(device_id.to_string(), Arc::clone(&device));
            registry.order.push(device_id.to_string());
        }
        drop(reservation);

        info!(
            "Created device '{}' from module '{}' v{}",
            device_id,
            blueprint.name(),
            blueprint.version()
        );
        self.bus
            .publish_event(Event::device_created(device_id, blueprint.name()));

        Ok(device)
    }

    /// Claim `device_id` for a creation in progress
    ///
    /// The registry lock is only held for the check, so a slow `initialize`
    /// never blocks lookups or shutdown.
    async fn reserve(&self, device_id: &str) -> Result<Reservation<'_>> {
        let registry = self.registry.read().await;
        let mut pending = lock_pending(&self.pending);

        if registry.devices.contains_key(device_id) || pending.contains(device_id) {
            warn!("Device '{}' already exists", device_id);
            return Err(OrchestratorError::duplicate("device", device_id));
        }
        pending.insert(device_id.to_string());

        Ok(Reservation {
            pending: &self.pending,
            device_id: device_id.to_string(),
        })
    }

    /// Stop (if running), clean up and deregister a device
    ///
    /// The device leaves the registry and `device_removed` is published even
    /// when teardown reports an error; that error is then returned.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NotFound`] if `device_id` is unknown. The registry
    /// is left unchanged.
    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        let mut registry = self.registry.write().await;

        let device = registry
            .remove(device_id)
            .ok_or_else(|| OrchestratorError::not_found("Device", device_id))?;

        let errors = self.teardown(&device).await;

        info!("Removed device '{}'", device_id);
        self.bus.publish_event(Event::device_removed(device_id));

        match errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Look up a live device
    pub async fn get_device(&self, device_id: &str) -> Result<Arc<Device>> {
        self.registry
            .read()
            .await
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found("Device", device_id))
    }

    /// Every live device, in creation order
    pub async fn list_devices(&self) -> Vec<Arc<Device>> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.devices.get(id).cloned())
            .collect()
    }

    pub async fn has_device(&self, device_id: &str) -> bool {
        self.registry.read().await.devices.contains_key(device_id)
    }

    pub async fn device_count(&self) -> usize {
        self.registry.read().await.devices.len()
    }

    /// `info()` of every live device, in creation order
    pub async fn device_infos(&self) -> Vec<DeviceConfig> {
        let mut infos = Vec::new();
        for device in self.list_devices().await {
            infos.push(device.info().await);
        }
        infos
    }

    /// Start a device by id
    pub async fn start_device(&self, device_id: &str) -> Result<()> {
        self.get_device(device_id).await?.start().await
    }

    /// Stop (pause) a device by id
    pub async fn stop_device(&self, device_id: &str) -> Result<()> {
        self.get_device(device_id).await?.stop().await
    }

    /// Start every `READY` device, continuing past failures
    pub async fn start_all(&self) -> Vec<DeviceFailure> {
        let mut failures = Vec::new();
        for device in self.list_devices().await {
            if device.status() != DeviceStatus::Ready {
                continue;
            }
            if let Err(e) = device.start().await {
                error!("Failed to start device '{}': {}", device.device_id(), e);
                failures.push(DeviceFailure {
                    device_id: device.device_id().to_string(),
                    error: e,
                });
            }
        }
        failures
    }

    /// Stop every `RUNNING` device, continuing past failures
    pub async fn stop_all(&self) -> Vec<DeviceFailure> {
        let mut failures = Vec::new();
        for device in self.list_devices().await {
            if device.status() != DeviceStatus::Running {
                continue;
            }
            if let Err(e) = device.stop().await {
                error!("Failed to stop device '{}': {}", device.device_id(), e);
                failures.push(DeviceFailure {
                    device_id: device.device_id().to_string(),
                    error: e,
                });
            }
        }
        failures
    }

    /// Scan the loader's search paths for manifests
    pub fn discover_modules(&self) -> Vec<BlueprintDescriptor> {
        self.loader.discover_all()
    }

    /// Hot-reload a blueprint; only devices created afterwards use it
    pub fn reload_module(&self, module_name: &str) -> Result<Arc<Blueprint>> {
        self.loader.reload(module_name)
    }

    /// Stop and clean up every device, newest first
    ///
    /// Every device gets a teardown attempt bounded by the shutdown timeout,
    /// whatever happened to the others. The registry is empty afterwards.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::ShutdownAggregate`] listing every per-device
    /// failure, including timeouts.
    pub async fn shutdown_all(&self) -> Result<()> {
        let mut registry = self.registry.write().await;
        info!("Shutting down {} device(s)", registry.devices.len());

        let order: Vec<String> = registry.order.iter().rev().cloned().collect();
        let mut failures = Vec::new();

        for device_id in order {
            let Some(device) = registry.remove(&device_id) else {
                continue;
            };

            for error in self.teardown(&device).await {
                failures.push(DeviceFailure {
                    device_id: device_id.clone(),
                    error,
                });
            }
            self.bus.publish_event(Event::device_removed(&device_id));
        }

        if failures.is_empty() {
            info!("All devices shut down successfully");
            Ok(())
        } else {
            error!("Shutdown finished with {} failure(s)", failures.len());
            Err(OrchestratorError::ShutdownAggregate(failures))
        }
    }

    /// Stop if running, then cleanup, within the shutdown timeout
    async fn teardown(&self, device: &Device) -> Vec<OrchestratorError> {
        let device_id = device.device_id().to_string();

        let work = async {
            let mut errors = Vec::new();
            if device.status() == DeviceStatus::Running {
                if let Err(e) = device.stop().await {
                    warn!("Failed to stop device '{}': {}", device_id, e);
                    errors.push(e);
                }
            }
            if let Err(e) = device.cleanup().await {
                errors.push(e);
            }
            errors
        };

        let outcome = tokio::time::timeout(self.shutdown_timeout, work).await;
        match outcome {
            Ok(errors) => {
                debug!("Device '{}' torn down ({} error(s))", device_id, errors.len());
                errors
            }
            Err(_) => {
                error!(
                    "Device '{}' did not tear down within {:?}; forcing removal",
                    device_id, self.shutdown_timeout
                );
                device.force_disconnect();
                vec![OrchestratorError::Timeout {
                    device_id,
                    operation: "cleanup",
                    after_ms: self.shutdown_timeout.as_millis() as u64,
                }]
            }
        }
    }
}

#[cfg(test)]
impl DeviceManager {
    fn pending_contains(&self, device_id: &str) -> bool {
        lock_pending(&self.pending).contains(device_id)
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("loader", &self.loader)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceBackend;
    use crate::events::topics;
    use crate::payload::Payload;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default, Clone, Copy)]
    struct Script {
        fail_initialize: bool,
        fail_cleanup: bool,
        hang_cleanup: bool,
    }

    struct ScriptedBackend(Script);

    #[async_trait]
    impl DeviceBackend for ScriptedBackend {
        async fn initialize(&mut self) -> Result<()> {
            if self.0.fail_initialize {
                return Err(OrchestratorError::device("probe failed"));
            }
            Ok(())
        }

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        async fn process(&mut self, input: Payload) -> Result<Payload> {
            Ok(input)
        }

        async fn cleanup(&mut self) -> Result<()> {
            if self.0.hang_cleanup {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.0.fail_cleanup {
                return Err(OrchestratorError::device("release failed"));
            }
            Ok(())
        }

        fn get_info(&self) -> DeviceConfig {
            DeviceConfig::new()
        }
    }

    fn manager() -> DeviceManager {
        let loader = Arc::new(ModuleLoader::new(vec![], FactoryRegistry::with_builtins()));
        for (name, script) in [
            ("good", Script::default()),
            (
                "bad_init",
                Script {
                    fail_initialize: true,
                    ..Default::default()
                },
            ),
            (
                "bad_cleanup",
                Script {
                    fail_cleanup: true,
                    ..Default::default()
                },
            ),
            (
                "hang_cleanup",
                Script {
                    hang_cleanup: true,
                    ..Default::default()
                },
            ),
        ] {
            loader
                .register_factory_fn(name, move |_id: &str, _config: &DeviceConfig| {
                    Ok(Box::new(ScriptedBackend(script)) as Box<dyn DeviceBackend>)
                })
                .unwrap();
        }
        DeviceManager::new(loader, EventBus::new()).with_shutdown_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_create_device() {
        let manager = manager();
        let device = manager
            .create_device("good", "dev0", DeviceConfig::new())
            .await
            .unwrap();

        assert_eq!(device.status(), DeviceStatus::Ready);
        assert_eq!(device.module_name(), "good");
        assert!(manager.has_device("dev0").await);
        assert_eq!(manager.device_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_device_id() {
        let manager = manager();
        let first = manager
            .create_device("good", "dev0", DeviceConfig::new())
            .await
            .unwrap();
        manager.start_device("dev0").await.unwrap();

        let err = manager
            .create_device("passthrough", "dev0", DeviceConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateId { kind: "device", .. }));

        let current = manager.get_device("dev0").await.unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(current.status(), DeviceStatus::Running);
    }

    #[tokio::test]
    async fn test_failed_initialize_not_registered() {
        let manager = manager();
        let err = manager
            .create_device("bad_init", "dev0", DeviceConfig::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("probe failed"));
        assert!(!manager.has_device("dev0").await);
    }

    #[tokio::test]
    async fn test_unknown_module() {
        let manager = manager();
        let err = manager
            .create_device("lidar", "dev0", DeviceConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ModuleLoad { .. }));
        assert_eq!(manager.device_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_device() {
        let manager = manager();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed);
        manager.bus().subscribe(topics::DEVICE_REMOVED, move |event| {
            sink.lock().unwrap().push(event.device_id().unwrap_or_default().to_string());
            Ok(())
        });

        let device = manager
            .create_device("good", "dev0", DeviceConfig::new())
            .await
            .unwrap();
        manager.start_device("dev0").await.unwrap();
        manager.remove_device("dev0").await.unwrap();

        assert_eq!(device.status(), DeviceStatus::Disconnected);
        assert!(!manager.has_device("dev0").await);

        manager.bus().flush().await;
        assert_eq!(*removed.lock().unwrap(), vec!["dev0"]);
    }

    #[tokio::test]
    async fn test_remove_unknown_device() {
        let manager = manager();
        manager
            .create_device("good", "dev0", DeviceConfig::new())
            .await
            .unwrap();

        let err = manager.remove_device("ghost").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
        assert_eq!(manager.device_count().await, 1);
    }

    #[tokio::test]
    async fn test_list_in_creation_order() {
        let manager = manager();
        for id in ["c", "a", "b"] {
            manager
                .create_device("good", id, DeviceConfig::new())
                .await
                .unwrap();
        }
        let ids: Vec<String> = manager
            .list_devices()
            .await
            .iter()
            .map(|d| d.device_id().to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_start_and_stop_all() {
        let manager = manager();
        for id in ["a", "b"] {
            manager
                .create_device("good", id, DeviceConfig::new())
                .await
                .unwrap();
        }

        assert!(manager.start_all().await.is_empty());
        for device in manager.list_devices().await {
            assert_eq!(device.status(), DeviceStatus::Running);
        }
        assert!(manager.stop_all().await.is_empty());
        for device in manager.list_devices().await {
            assert_eq!(device.status(), DeviceStatus::Paused);
        }
    }

    #[tokio::test]
    async fn test_shutdown_aggregates_failures() {
        let manager = manager();
        let good = manager
            .create_device("good", "good0", DeviceConfig::new())
            .await
            .unwrap();
        manager
            .create_device("bad_cleanup", "bad0", DeviceConfig::new())
            .await
            .unwrap();
        let hung = manager
            .create_device("hang_cleanup", "hang0", DeviceConfig::new())
            .await
            .unwrap();
        let last = manager
            .create_device("good", "good1", DeviceConfig::new())
            .await
            .unwrap();
        manager.start_all().await;

        match manager.shutdown_all().await {
            Err(OrchestratorError::ShutdownAggregate(failures)) => {
                let ids: Vec<&str> = failures.iter().map(|f| f.device_id.as_str()).collect();
                assert_eq!(ids, vec!["hang0", "bad0"]);
                assert!(matches!(
                    failures[0].error,
                    OrchestratorError::Timeout { .. }
                ));
            }
            other => panic!("expected ShutdownAggregate, got {:?}", other),
        }

        assert_eq!(good.status(), DeviceStatus::Disconnected);
        assert_eq!(last.status(), DeviceStatus::Disconnected);
        assert_eq!(hung.status(), DeviceStatus::Disconnected);
        assert!(matches!(
            hung.resume().await,
            Err(OrchestratorError::InvalidState { .. })
        ));
        assert_eq!(manager.device_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_same_id() {
        let manager = Arc::new(manager());

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager
                        .create_device("good", "dev0", DeviceConfig::new())
                        .await
                })
            })
            .collect();

        let mut created = 0;
        let mut duplicates = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(OrchestratorError::DuplicateId { kind: "device", .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(manager.device_count().await, 1);
    }

    struct SlowInitBackend(Arc<tokio::sync::Notify>);

    #[async_trait]
    impl DeviceBackend for SlowInitBackend {
        async fn initialize(&mut self) -> Result<()> {
            self.0.notified().await;
            Ok(())
        }

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        async fn process(&mut self, input: Payload) -> Result<Payload> {
            Ok(input)
        }

        async fn cleanup(&mut self) -> Result<()> {
            Ok(())
        }

        fn get_info(&self) -> DeviceConfig {
            DeviceConfig::new()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_initialize_does_not_block_registry() {
        let manager = Arc::new(manager());
        let gate = Arc::new(tokio::sync::Notify::new());
        let factory_gate = Arc::clone(&gate);
        manager
            .loader()
            .register_factory_fn("slow", move |_id: &str, _config: &DeviceConfig| {
                Ok(Box::new(SlowInitBackend(Arc::clone(&factory_gate))) as Box<dyn DeviceBackend>)
            })
            .unwrap();
        manager
            .create_device("good", "ready0", DeviceConfig::new())
            .await
            .unwrap();

        let creating = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move {
                manager
                    .create_device("slow", "slow0", DeviceConfig::new())
                    .await
            }
        });
        while !manager.pending_contains("slow0") {
            tokio::task::yield_now().await;
        }

        let bound = Duration::from_secs(1);
        let lookup = tokio::time::timeout(bound, manager.get_device("ready0")).await;
        assert!(lookup.unwrap().is_ok());
        let listed = tokio::time::timeout(bound, manager.list_devices()).await;
        assert_eq!(listed.unwrap().len(), 1);
        assert!(!manager.has_device("slow0").await);

        let err = manager
            .create_device("good", "slow0", DeviceConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateId { .. }));

        gate.notify_one();
        let device = creating.await.unwrap().unwrap();
        assert_eq!(device.status(), DeviceStatus::Ready);
        assert_eq!(manager.device_count().await, 2);
        assert!(!manager.pending_contains("slow0"));
    }

    #[tokio::test]
    async fn test_failed_create_releases_id() {
        let manager = manager();
        assert!(manager
            .create_device("bad_init", "dev0", DeviceConfig::new())
            .await
            .is_err());

        manager
            .create_device("good", "dev0", DeviceConfig::new())
            .await
            .unwrap();
        assert!(manager.has_device("dev0").await);
    }

    #[tokio::test]
    async fn test_clean_shutdown() {
        let manager = manager();
        manager
            .create_device("good", "dev0", DeviceConfig::new())
            .await
            .unwrap();
        manager.shutdown_all().await.unwrap();
        assert_eq!(manager.device_count().await, 0);
    }
}
