use serde::{Deserialize, Serialize};

/// Client characteristics a session is bound to: originating address + user agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientFingerprint {
    pub address: String,
    pub user_agent: String,
}

impl ClientFingerprint {
    pub fn new(address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user_agent: user_agent.into(),
        }
    }
}

impl core::fmt::Display for ClientFingerprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.address, self.user_agent)
    }
}
