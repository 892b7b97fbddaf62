//! Module system
//!
//! Device modules are described by manifests on disk and backed by native
//! factories linked into the process. The loader turns the two into
//! immutable, versioned [`Blueprint`]s.
//!
//! ## Components
//!
//! - [`Capability`] - Operations a device backend implements
//! - [`BlueprintDescriptor`] - Metadata read from a `*.module.json` manifest
//! - [`DeviceFactory`] / [`FactoryRegistry`] - Native backend constructors keyed by entry point
//! - [`Blueprint`] - A loaded, validated module at a specific version
//! - [`ModuleLoader`] - Discovery, validation, caching and hot reload
//!
//! ## Built-in Modules
//!
//! - [`builtin`] - `passthrough` echo device

pub mod builtin;

mod blueprint;
mod capability;
mod descriptor;
mod loader;

pub use blueprint::{Blueprint, DeviceFactory, FactoryRegistry};
pub use capability::{Capability, CapabilitySet};
pub use descriptor::{fingerprint, is_manifest, BlueprintDescriptor, MANIFEST_SUFFIX};
pub use loader::ModuleLoader;
