//! Blueprints and native device factories

use super::capability::{Capability, CapabilitySet};
use super::descriptor::BlueprintDescriptor;
use crate::config::DeviceConfig;
use crate::device::DeviceBackend;
use crate::error::{OrchestratorError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Produces device backends for one entry point
///
/// Closures of the form `Fn(&str, &DeviceConfig) -> Result<Box<dyn DeviceBackend>>`
/// implement this trait and expose every capability.
pub trait DeviceFactory: Send + Sync {
    /// Capabilities the produced backends actually implement
    fn capabilities(&self) -> CapabilitySet {
        Capability::required()
    }

    /// Build a new backend for `device_id`
    fn create(&self, device_id: &str, config: &DeviceConfig) -> Result<Box<dyn DeviceBackend>>;
}

impl<F> DeviceFactory for F
where
    F: Fn(&str, &DeviceConfig) -> Result<Box<dyn DeviceBackend>> + Send + Sync,
{
    fn create(&self, device_id: &str, config: &DeviceConfig) -> Result<Box<dyn DeviceBackend>> {
        self(device_id, config)
    }
}

/// Native factories linked into the process, keyed by entry point
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, Arc<dyn DeviceFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in blueprints
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtins(&mut registry);
        registry
    }

    /// Register a factory under `entry_point`
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::DuplicateId`] if the entry point is taken.
    pub fn register<F>(&mut self, entry_point: impl Into<String>, factory: F) -> Result<()>
    where
        F: DeviceFactory + 'static,
    {
        let entry_point = entry_point.into();
        if self.factories.contains_key(&entry_point) {
            return Err(OrchestratorError::duplicate("entry point", entry_point));
        }
        debug!("Registered device factory '{}'", entry_point);
        self.factories.insert(entry_point, Arc::new(factory));
        Ok(())
    }

    /// Register a closure factory exposing every capability
    pub fn register_fn<F>(&mut self, entry_point: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&str, &DeviceConfig) -> Result<Box<dyn DeviceBackend>> + Send + Sync + 'static,
    {
        self.register(entry_point, factory)
    }

    pub fn get(&self, entry_point: &str) -> Option<Arc<dyn DeviceFactory>> {
        self.factories.get(entry_point).cloned()
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories.contains_key(entry_point)
    }

    pub fn entry_points(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("entry_points", &self.entry_points())
            .finish()
    }
}

/// An immutable, loaded blueprint
///
/// Devices hold the `Arc<Blueprint>` they were built from, so a reload never
/// re-binds a live device.
pub struct Blueprint {
    descriptor: BlueprintDescriptor,
    version: u64,
    factory: Arc<dyn DeviceFactory>,
}

impl Blueprint {
    pub(crate) fn new(
        descriptor: BlueprintDescriptor,
        version: u64,
        factory: Arc<dyn DeviceFactory>,
    ) -> Self {
        Self {
            descriptor,
            version,
            factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Registry version, starting at 1 and bumped on every reload
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn descriptor(&self) -> &BlueprintDescriptor {
        &self.descriptor
    }

    pub fn fingerprint(&self) -> &str {
        &self.descriptor.fingerprint
    }

    /// Capabilities the backing factory exposes
    pub fn capabilities(&self) -> CapabilitySet {
        self.factory.capabilities()
    }

    /// Build a new, uninitialized backend
    pub fn instantiate(
        &self,
        device_id: &str,
        config: &DeviceConfig,
    ) -> Result<Box<dyn DeviceBackend>> {
        debug!(
            "Instantiating '{}' v{} for device '{}'",
            self.name(),
            self.version,
            device_id
        );
        self.factory.create(device_id, config)
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("name", &self.descriptor.name)
            .field("version", &self.version)
            .field("fingerprint", &self.descriptor.fingerprint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::builtin::PassthroughDevice;

    fn passthrough(_id: &str, _config: &DeviceConfig) -> Result<Box<dyn DeviceBackend>> {
        Ok(Box::new(PassthroughDevice::new()))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = FactoryRegistry::new();
        registry.register("echo", passthrough).unwrap();

        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_entry_point() {
        let mut registry = FactoryRegistry::new();
        registry.register("echo", passthrough).unwrap();

        match registry.register("echo", passthrough) {
            Err(OrchestratorError::DuplicateId { kind, id }) => {
                assert_eq!(kind, "entry point");
                assert_eq!(id, "echo");
            }
            other => panic!("expected DuplicateId, got {:?}", other),
        }
    }

    #[test]
    fn test_builtins_present() {
        let registry = FactoryRegistry::with_builtins();
        assert!(registry.contains("passthrough"));
    }

    #[test]
    fn test_blueprint_instantiate() {
        let registry = FactoryRegistry::with_builtins();
        let factory = registry.get("passthrough").unwrap();
        let blueprint = Blueprint::new(
            BlueprintDescriptor::new("passthrough", "passthrough", Capability::required()),
            1,
            factory,
        );

        assert_eq!(blueprint.version(), 1);
        assert_eq!(blueprint.capabilities(), Capability::required());
        let backend = blueprint.instantiate("p0", &DeviceConfig::new()).unwrap();
        assert_eq!(backend.get_info()["kind"], "passthrough");
    }
}
