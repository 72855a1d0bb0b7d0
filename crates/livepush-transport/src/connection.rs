//! Connection state management.

use serde::{Deserialize, Serialize};

/// Connection state of the RTMP sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,

    /// Connecting to server.
    Connecting,

    /// Connected and publishing.
    Publishing,

    /// The connection attempt or the publisher failed.
    Failed { reason: String },
}

impl ConnectionState {
    /// Check if publishing.
    pub fn is_publishing(&self) -> bool {
        matches!(self, Self::Publishing)
    }

    /// Check if failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Human-readable status.
    pub fn message(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".to_string(),
            Self::Connecting => "Connecting...".to_string(),
            Self::Publishing => "Publishing".to_string(),
            Self::Failed { reason } => format!("Failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(ConnectionState::Publishing.is_publishing());

        let failed = ConnectionState::Failed {
            reason: "refused".to_string(),
        };
        assert!(failed.is_failed());
        assert_eq!(failed.message(), "Failed: refused");
    }
}
