//! Deletion engine configuration.

use serde::{Deserialize, Serialize};

/// Options controlling how the deleter talks to the persistence context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatorConfig {
    /// Keep deleted and updated objects in the session cache.
    #[serde(default)]
    pub no_decache: bool,

    /// Mutate other identities without taking their locks.
    #[serde(default)]
    pub no_locking: bool,

    /// Log every visited object at info level.
    #[serde(default)]
    pub trace: bool,

    /// Objects processed between full session decaches in bulk loops.
    #[serde(default = "default_decache_interval")]
    pub decache_interval: usize,

    /// Identity that inherits work items owned by a deleted identity.
    #[serde(default = "default_admin_identity")]
    pub admin_identity: String,
}

fn default_decache_interval() -> usize {
    20
}

fn default_admin_identity() -> String {
    "spadmin".to_string()
}

impl Default for TerminatorConfig {
    fn default() -> Self {
        Self {
            no_decache: false,
            no_locking: false,
            trace: false,
            decache_interval: default_decache_interval(),
            admin_identity: default_admin_identity(),
        }
    }
}
