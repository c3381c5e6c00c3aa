//! The closed set of AI capabilities the gateway dispatches for.
//!
//! The routing table is fixed at startup: each capability maps to a backend
//! service name and the ordered list of actions the gateway will forward.
//! Requests for anything outside this table are client errors, rejected
//! before any registry or network work happens.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A logical AI function exposed through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Resume,
    Matching,
    Chat,
    Vector,
    Auth,
    Monitor,
    Config,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Resume,
        Capability::Matching,
        Capability::Chat,
        Capability::Vector,
        Capability::Auth,
        Capability::Monitor,
        Capability::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Resume => "resume",
            Capability::Matching => "matching",
            Capability::Chat => "chat",
            Capability::Vector => "vector",
            Capability::Auth => "auth",
            Capability::Monitor => "monitor",
            Capability::Config => "config",
        }
    }
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resume" => Ok(Capability::Resume),
            "matching" => Ok(Capability::Matching),
            "chat" => Ok(Capability::Chat),
            "vector" => Ok(Capability::Vector),
            "auth" => Ok(Capability::Auth),
            "monitor" => Ok(Capability::Monitor),
            "config" => Ok(Capability::Config),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static configuration for one capability.
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub capability: Capability,
    /// Name the backend service registers under
    pub service_name: &'static str,
    /// Actions the gateway will forward, in declaration order
    pub actions: &'static [&'static str],
}

/// The immutable routing table, built once at startup.
#[derive(Debug)]
pub struct CapabilityTable {
    entries: HashMap<Capability, CapabilityDescriptor>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        let descriptors = [
            CapabilityDescriptor {
                capability: Capability::Resume,
                service_name: "resume-service",
                actions: &["process", "parse", "vectorize", "analyze", "optimize"],
            },
            CapabilityDescriptor {
                capability: Capability::Matching,
                service_name: "matching-service",
                actions: &["match", "find_jobs", "calculate_score"],
            },
            CapabilityDescriptor {
                capability: Capability::Chat,
                service_name: "chat-service",
                actions: &["chat", "conversation", "context"],
            },
            CapabilityDescriptor {
                capability: Capability::Vector,
                service_name: "vector-service",
                actions: &["search", "similarity", "index"],
            },
            CapabilityDescriptor {
                capability: Capability::Auth,
                service_name: "auth-service",
                actions: &["verify", "token", "permissions"],
            },
            CapabilityDescriptor {
                capability: Capability::Monitor,
                service_name: "monitor-service",
                actions: &["metrics", "health", "alerts"],
            },
            CapabilityDescriptor {
                capability: Capability::Config,
                service_name: "config-service",
                actions: &["config", "parameters", "settings"],
            },
        ];

        Self {
            entries: descriptors
                .into_iter()
                .map(|d| (d.capability, d))
                .collect(),
        }
    }

    pub fn get(&self, capability: Capability) -> &CapabilityDescriptor {
        // Construction guarantees every variant has an entry
        &self.entries[&capability]
    }

    pub fn supports_action(&self, capability: Capability, action: &str) -> bool {
        self.get(capability).actions.contains(&action)
    }

    pub fn service_name(&self, capability: Capability) -> &'static str {
        self.get(capability).service_name
    }

    /// Resolves a capability from its id or its registered service name.
    pub fn resolve(&self, name: &str) -> Option<Capability> {
        if let Ok(capability) = name.parse::<Capability>() {
            return Some(capability);
        }
        Capability::ALL
            .into_iter()
            .find(|c| self.get(*c).service_name == name)
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::new()
    }
}
