//! Module Loader
//!
//! Discovers blueprint manifests, validates them against the native factory
//! that backs them, and keeps a versioned cache of loaded blueprints.
//!
//! ## Responsibilities
//!
//! - Manifest discovery over the configured search paths
//! - Capability validation (nothing half-valid is ever registered)
//! - Cache keyed by blueprint name and manifest fingerprint
//! - Hot reload: a reload swaps the cache entry for a new version while
//!   live devices keep the `Arc<Blueprint>` they were built from
//!
//! All cache mutation happens under one write lock; lookups take the read lock.
//!
//! ## Example
//!
//! ```rust
//! use purevision_core::modules::{FactoryRegistry, ModuleLoader};
//!
//! # fn example() -> purevision_core::error::Result<()> {
//! let loader = ModuleLoader::new(vec!["/opt/purevision/modules".into()], FactoryRegistry::with_builtins());
//!
//! // Built-ins resolve without a manifest
//! let blueprint = loader.resolve("passthrough")?;
//! assert_eq!(blueprint.version(), 1);
//! # Ok(())
//! # }
//! ```

use super::blueprint::{Blueprint, DeviceFactory, FactoryRegistry};
use super::capability::{Capability, CapabilitySet};
use super::descriptor::{is_manifest, BlueprintDescriptor};
use crate::config::DeviceConfig;
use crate::device::DeviceBackend;
use crate::error::{OrchestratorError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

#[derive(Default)]
struct LoaderState {
    /// Latest discovered descriptor per name
    descriptors: HashMap<String, BlueprintDescriptor>,
    /// Current blueprint per name
    loaded: HashMap<String, Arc<Blueprint>>,
    /// Last version handed out per name; survives unload
    versions: HashMap<String, u64>,
}

/// Versioned blueprint registry
pub struct ModuleLoader {
    search_paths: Vec<PathBuf>,
    factories: RwLock<FactoryRegistry>,
    state: RwLock<LoaderState>,
}

impl ModuleLoader {
    /// Create a loader over `search_paths` backed by `factories`
    pub fn new(search_paths: Vec<PathBuf>, factories: FactoryRegistry) -> Self {
        info!(
            "Creating module loader ({} search paths, {} factories)",
            search_paths.len(),
            factories.entry_points().len()
        );
        Self {
            search_paths,
            factories: RwLock::new(factories),
            state: RwLock::new(LoaderState::default()),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Link another native factory into the loader
    pub fn register_factory<F>(&self, entry_point: impl Into<String>, factory: F) -> Result<()>
    where
        F: DeviceFactory + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .register(entry_point, factory)
    }

    /// Closure flavour of [`register_factory`](Self::register_factory)
    pub fn register_factory_fn<F>(&self, entry_point: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&str, &DeviceConfig) -> Result<Box<dyn DeviceBackend>> + Send + Sync + 'static,
    {
        self.register_factory(entry_point, factory)
    }

    /// Scan `paths` for manifests
    ///
    /// Each path may be a manifest file or a directory of them (not
    /// recursive). Missing paths and malformed manifests are logged and
    /// skipped. Discovered descriptors are remembered for later `resolve`.
    pub fn discover(&self, paths: &[PathBuf]) -> Vec<BlueprintDescriptor> {
        let mut found = Vec::new();

        for path in paths {
            for manifest in manifest_files(path) {
                match BlueprintDescriptor::from_manifest(&manifest) {
                    Ok(desc) => {
                        debug!("Discovered module '{}' at {}", desc.name, manifest.display());
                        found.push(desc);
                    }
                    Err(e) => warn!("Skipping manifest {}: {}", manifest.display(), e),
                }
            }
        }

        let mut state = self.write_state();
        for desc in &found {
            state.descriptors.insert(desc.name.clone(), desc.clone());
        }

        info!("Discovered {} module(s)", found.len());
        found
    }

    /// Scan the configured search paths
    pub fn discover_all(&self) -> Vec<BlueprintDescriptor> {
        self.discover(&self.search_paths)
    }

    /// Check a descriptor against the factory for its entry point, without
    /// caching anything
    pub fn validate(&self, descriptor: &BlueprintDescriptor) -> Result<()> {
        let factory = self.factory_for(descriptor)?;
        check_capabilities(
            &descriptor.name,
            &descriptor.declared_capabilities,
            &factory.capabilities(),
        )
    }

    /// Load a blueprint
    ///
    /// Returns the cached blueprint when one with the same fingerprint is
    /// already loaded; otherwise validates and registers a new version.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::ModuleLoad`] if no factory backs the entry point
    /// - [`OrchestratorError::MissingCapability`] if validation fails
    pub fn load(&self, descriptor: &BlueprintDescriptor) -> Result<Arc<Blueprint>> {
        self.load_inner(descriptor, false)
    }

    /// Loaded blueprint for `name`, loading it on demand
    ///
    /// Falls back to discovering the search paths, then to a factory whose
    /// entry point equals `name` (how built-ins resolve without a manifest).
    pub fn resolve(&self, name: &str) -> Result<Arc<Blueprint>> {
        if let Some(blueprint) = self.get(name) {
            return Ok(blueprint);
        }

        let descriptor = match self.known_descriptor(name) {
            Some(desc) => desc,
            None => {
                self.discover_all();
                self.known_descriptor(name)
                    .or_else(|| self.implicit_descriptor(name))
                    .ok_or_else(|| {
                        OrchestratorError::module_load(name, "no manifest or factory found")
                    })?
            }
        };

        self.load(&descriptor)
    }

    /// Re-discover and re-load `name`, replacing the cached entry
    ///
    /// Always produces a new version. Devices created from the previous
    /// version are unaffected. On failure the previous entry stays in place.
    pub fn reload(&self, name: &str) -> Result<Arc<Blueprint>> {
        let previous = self.known_descriptor(name);

        let paths: Vec<PathBuf> = match previous.as_ref().and_then(|d| d.source.clone()) {
            Some(source) => vec![source],
            None => self.search_paths.clone(),
        };

        let descriptor = self
            .discover(&paths)
            .into_iter()
            .find(|d| d.name == name)
            .or_else(|| {
                // Manifest moved or renamed: try a full scan before giving up
                self.discover_all().into_iter().find(|d| d.name == name)
            })
            .or_else(|| previous.filter(|d| d.source.is_none()))
            .or_else(|| self.implicit_descriptor(name))
            .ok_or_else(|| OrchestratorError::module_load(name, "no manifest found on reload"))?;

        let blueprint = self.load_inner(&descriptor, true)?;
        info!("Reloaded module '{}' as v{}", name, blueprint.version());
        Ok(blueprint)
    }

    /// Drop `name` from the cache. Live devices keep their blueprint.
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.write_state().loaded.remove(name).is_some();
        if removed {
            info!("Unloaded module '{}'", name);
        }
        removed
    }

    /// Currently cached blueprint for `name`
    pub fn get(&self, name: &str) -> Option<Arc<Blueprint>> {
        self.read_state().loaded.get(name).cloned()
    }

    /// Names of every cached blueprint, sorted
    pub fn loaded_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_state().loaded.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every descriptor discovered so far, sorted by name
    pub fn descriptors(&self) -> Vec<BlueprintDescriptor> {
        let mut descs: Vec<BlueprintDescriptor> =
            self.read_state().descriptors.values().cloned().collect();
        descs.sort_by(|a, b| a.name.cmp(&b.name));
        descs
    }

    fn load_inner(&self, descriptor: &BlueprintDescriptor, force: bool) -> Result<Arc<Blueprint>> {
        let factory = self.factory_for(descriptor)?;

        let mut state = self.write_state();

        if !force {
            if let Some(cached) = state.loaded.get(&descriptor.name) {
                if cached.fingerprint() == descriptor.fingerprint {
                    debug!("Module '{}' v{} served from cache", descriptor.name, cached.version());
                    return Ok(Arc::clone(cached));
                }
            }
        }

        if let Err(e) = check_capabilities(
            &descriptor.name,
            &descriptor.declared_capabilities,
            &factory.capabilities(),
        ) {
            warn!("Rejected module '{}': {}", descriptor.name, e);
            return Err(e);
        }

        let version = state
            .versions
            .get(&descriptor.name)
            .copied()
            .unwrap_or(0)
            + 1;
        let blueprint = Arc::new(Blueprint::new(descriptor.clone(), version, factory));

        state.versions.insert(descriptor.name.clone(), version);
        state
            .descriptors
            .insert(descriptor.name.clone(), descriptor.clone());
        state
            .loaded
            .insert(descriptor.name.clone(), Arc::clone(&blueprint));

        info!("Loaded module '{}' v{}", descriptor.name, version);
        Ok(blueprint)
    }

    fn factory_for(&self, descriptor: &BlueprintDescriptor) -> Result<Arc<dyn DeviceFactory>> {
        self.factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&descriptor.entry_point)
            .ok_or_else(|| {
                OrchestratorError::module_load(
                    &descriptor.name,
                    format!("no factory registered for entry point '{}'", descriptor.entry_point),
                )
            })
    }

    fn known_descriptor(&self, name: &str) -> Option<BlueprintDescriptor> {
        self.read_state().descriptors.get(name).cloned()
    }

    fn implicit_descriptor(&self, name: &str) -> Option<BlueprintDescriptor> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)?;
        Some(BlueprintDescriptor::new(name, name, factory.capabilities()))
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LoaderState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LoaderState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("search_paths", &self.search_paths)
            .field("loaded", &self.loaded_modules())
            .finish()
    }
}

/// Every required capability must be both exposed by the factory and declared
/// by the manifest
fn check_capabilities(
    module: &str,
    declared: &CapabilitySet,
    exposed: &CapabilitySet,
) -> Result<()> {
    for capability in Capability::REQUIRED {
        if !exposed.contains(&capability) || !declared.contains(&capability) {
            return Err(OrchestratorError::MissingCapability {
                module: module.to_string(),
                capability: capability.to_string(),
            });
        }
    }
    Ok(())
}

fn manifest_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return if is_manifest(path) {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan module path {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_manifest(p))
        .collect();
    files.sort();
    files
}
