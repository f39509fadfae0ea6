use serde::{Deserialize, Serialize};

/// One replica of the control plane as reported by a discoverer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterTarget {
    pub address: String,
    #[serde(default)]
    pub is_self: bool,
}

impl ClusterTarget {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            is_self: false,
        }
    }

    pub fn this(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            is_self: true,
        }
    }
}
