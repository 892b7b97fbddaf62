//! Blueprint descriptors and on-disk manifests
//!
//! A module on disk is a `<name>.module.json` manifest:
//!
//! ```json
//! {
//!     "name": "camera",
//!     "entry_point": "usb_camera",
//!     "capabilities": ["initialize", "start", "stop", "process", "cleanup", "get_info"],
//!     "version": "1.2.0",
//!     "description": "UVC camera"
//! }
//! ```
//!
//! Discovery only reads manifests. Nothing is instantiated until the loader
//! resolves `entry_point` against its factory registry.

use super::capability::CapabilitySet;
use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// File suffix identifying module manifests
pub const MANIFEST_SUFFIX: &str = ".module.json";

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    entry_point: String,
    capabilities: CapabilitySet,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Metadata describing a loadable blueprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlueprintDescriptor {
    /// Unique blueprint name
    pub name: String,

    /// Factory key in the loader's registry
    pub entry_point: String,

    /// Capabilities the module claims to implement
    pub declared_capabilities: CapabilitySet,

    /// Author-supplied version string
    pub module_version: Option<String>,

    pub description: Option<String>,

    /// Manifest the descriptor was read from, if any
    pub source: Option<PathBuf>,

    /// Content fingerprint used as the cache key together with `name`
    pub fingerprint: String,
}

impl BlueprintDescriptor {
    /// Describe an in-process blueprint that has no manifest
    ///
    /// The fingerprint covers name, entry point and capabilities, so two
    /// identical descriptors share a cache entry.
    pub fn new(
        name: impl Into<String>,
        entry_point: impl Into<String>,
        declared_capabilities: CapabilitySet,
    ) -> Self {
        let name = name.into();
        let entry_point = entry_point.into();
        let caps: Vec<&str> = declared_capabilities.iter().map(|c| c.as_str()).collect();
        let identity = format!("{}|{}|{}", name, entry_point, caps.join(","));
        let fingerprint = fingerprint(identity.as_bytes());

        Self {
            name,
            entry_point,
            declared_capabilities,
            module_version: None,
            description: None,
            source: None,
            fingerprint,
        }
    }

    /// Read a descriptor from a manifest file
    pub fn from_manifest(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| {
            OrchestratorError::module_load(
                path.display().to_string(),
                format!("malformed manifest: {}", e),
            )
        })?;

        if manifest.name.trim().is_empty() {
            return Err(OrchestratorError::module_load(
                path.display().to_string(),
                "manifest has an empty name",
            ));
        }

        Ok(Self {
            name: manifest.name,
            entry_point: manifest.entry_point,
            declared_capabilities: manifest.capabilities,
            module_version: manifest.version,
            description: manifest.description,
            source: Some(path.to_path_buf()),
            fingerprint: fingerprint(&bytes),
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.module_version = Some(version.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Whether `path` looks like a module manifest
pub fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(MANIFEST_SUFFIX))
        .unwrap_or(false)
}

/// Lowercase hex SHA-256 of `bytes`
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::Capability;
    use std::io::Write;

    #[test]
    fn test_from_manifest() {
        let mut file = tempfile::Builder::new()
            .suffix(MANIFEST_SUFFIX)
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"{{"name": "camera", "entry_point": "usb_camera",
                "capabilities": ["initialize", "start", "stop", "process", "cleanup", "get_info"],
                "version": "1.2.0"}}"#
        )
        .unwrap();

        let desc = BlueprintDescriptor::from_manifest(file.path()).unwrap();
        assert_eq!(desc.name, "camera");
        assert_eq!(desc.entry_point, "usb_camera");
        assert_eq!(desc.declared_capabilities, Capability::required());
        assert_eq!(desc.module_version.as_deref(), Some("1.2.0"));
        assert_eq!(desc.fingerprint.len(), 64);
        assert!(is_manifest(file.path()));
    }

    #[test]
    fn test_malformed_manifest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "camera"}}"#).unwrap();

        match BlueprintDescriptor::from_manifest(file.path()) {
            Err(OrchestratorError::ModuleLoad { reason, .. }) => {
                assert!(reason.contains("malformed"))
            }
            other => panic!("expected ModuleLoad, got {:?}", other),
        }
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = BlueprintDescriptor::new("gpio", "gpio", Capability::required());
        let b = BlueprintDescriptor::new("gpio", "gpio", Capability::required());
        let c = BlueprintDescriptor::new("gpio", "gpio_v2", Capability::required());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_is_manifest() {
        assert!(is_manifest(Path::new("/opt/modules/camera.module.json")));
        assert!(!is_manifest(Path::new("/opt/modules/camera.json")));
    }
}
