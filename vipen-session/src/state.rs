//! Session state machine

use serde::{Deserialize, Serialize};
use vipen_core::{ViPenError, ViPenResult};

/// Session state
///
/// # State Transitions
/// ```text
/// Idle -> Discovering -> Connecting -> ServiceResolving -> Ready <-> Streaming
/// any state -> Disconnected (disconnect() or link loss)
/// Disconnected -> Discovering (connect() or scheduled reconnect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No link has been requested yet
    Idle,
    /// Scanning for a matching peripheral
    Discovering,
    /// Opening the GATT link
    Connecting,
    /// Resolving the vendor service and characteristics
    ServiceResolving,
    /// Link up, characteristics resolved, reading notifications armed
    Ready,
    /// Measurement started on the device
    Streaming,
    /// Link closed or lost
    Disconnected,
}

impl SessionState {
    /// Check if commands may be sent to the device
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Streaming)
    }

    /// Check if a new connection may be started
    pub fn can_connect(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Disconnected)
    }

    /// Check if a link setup is in progress
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            SessionState::Discovering | SessionState::Connecting | SessionState::ServiceResolving
        )
    }

    /// Validate state transition
    ///
    /// # Valid Transitions
    /// - `Idle`/`Disconnected` -> `Discovering`
    /// - `Discovering` -> `Connecting` -> `ServiceResolving` -> `Ready`
    /// - `Ready` <-> `Streaming`
    /// - any state -> `Disconnected`
    pub fn validate_transition(&self, new_state: SessionState) -> ViPenResult<()> {
        use SessionState::*;

        let valid = match (*self, new_state) {
            (_, Disconnected) => true,
            (Idle, Discovering) | (Disconnected, Discovering) => true,
            (Discovering, Connecting) => true,
            (Connecting, ServiceResolving) => true,
            (ServiceResolving, Ready) => true,
            (Ready, Streaming) | (Streaming, Ready) => true,
            (Ready, Ready) | (Streaming, Streaming) => true,
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(ViPenError::InvalidState(format!(
                "Invalid state transition: {:?} -> {:?}",
                self, new_state
            )))
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Discovering => "Discovering",
            SessionState::Connecting => "Connecting",
            SessionState::ServiceResolving => "ServiceResolving",
            SessionState::Ready => "Ready",
            SessionState::Streaming => "Streaming",
            SessionState::Disconnected => "Disconnected",
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_path() {
        let path = [
            SessionState::Idle,
            SessionState::Discovering,
            SessionState::Connecting,
            SessionState::ServiceResolving,
            SessionState::Ready,
            SessionState::Streaming,
            SessionState::Ready,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].validate_transition(pair[1]).is_ok(), "{:?}", pair);
        }
    }

    #[test]
    fn test_any_state_can_disconnect() {
        for state in [
            SessionState::Idle,
            SessionState::Discovering,
            SessionState::Connecting,
            SessionState::ServiceResolving,
            SessionState::Ready,
            SessionState::Streaming,
            SessionState::Disconnected,
        ] {
            assert!(state.validate_transition(SessionState::Disconnected).is_ok());
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(SessionState::Idle.validate_transition(SessionState::Ready).is_err());
        assert!(SessionState::Disconnected.validate_transition(SessionState::Streaming).is_err());
        assert!(SessionState::Ready.validate_transition(SessionState::Discovering).is_err());
    }

    #[test]
    fn test_predicates() {
        assert!(SessionState::Streaming.is_ready());
        assert!(!SessionState::ServiceResolving.is_ready());
        assert!(SessionState::Disconnected.can_connect());
        assert!(!SessionState::Ready.can_connect());
        assert!(SessionState::Connecting.is_connecting());
    }
}
