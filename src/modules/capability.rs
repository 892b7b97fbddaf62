//! Device capabilities

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::OrchestratorError;

/// Set of capabilities, ordered for stable reporting
pub type CapabilitySet = BTreeSet<Capability>;

/// One operation a device backend implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Initialize,
    Start,
    Stop,
    Process,
    Cleanup,
    GetInfo,
}

impl Capability {
    /// Every capability a blueprint must expose to back a device
    pub const REQUIRED: [Capability; 6] = [
        Capability::Initialize,
        Capability::Start,
        Capability::Stop,
        Capability::Process,
        Capability::Cleanup,
        Capability::GetInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Initialize => "initialize",
            Capability::Start => "start",
            Capability::Stop => "stop",
            Capability::Process => "process",
            Capability::Cleanup => "cleanup",
            Capability::GetInfo => "get_info",
        }
    }

    /// The full required set
    pub fn required() -> CapabilitySet {
        Self::REQUIRED.into_iter().collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::REQUIRED
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OrchestratorError::config(format!("Unknown capability: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capability() {
        assert_eq!("get_info".parse::<Capability>().unwrap(), Capability::GetInfo);
        assert_eq!("process".parse::<Capability>().unwrap(), Capability::Process);
        assert!("teleport".parse::<Capability>().is_err());
    }

    #[test]
    fn test_required_set() {
        let required = Capability::required();
        assert_eq!(required.len(), 6);
        assert!(required.contains(&Capability::Cleanup));
    }

    #[test]
    fn test_serde_names() {
        let caps: Vec<Capability> = serde_json::from_str(r#"["initialize", "get_info"]"#).unwrap();
        assert_eq!(caps, vec![Capability::Initialize, Capability::GetInfo]);
    }
}
