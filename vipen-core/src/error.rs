use thiserror::Error;

/// Main error type for ViPen sensor operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViPenError {
    #[error("No device selected: discovery found no matching peripheral")]
    NoDeviceSelected,

    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Link not ready")]
    LinkNotReady,

    #[error("Operation '{operation}' failed after {attempts} attempts: {last_error}")]
    OperationExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<ViPenError>,
    },

    #[error("Malformed {structure} payload: expected at least {expected} bytes, got {actual}")]
    MalformedPayload {
        structure: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Truncated waveform block at offset {offset}: need {required} bytes, {available} available")]
    TruncatedBlock {
        offset: usize,
        required: usize,
        available: usize,
    },

    #[error("Reassembly timeout: collected {collected} of {expected} bytes")]
    ReassemblyTimeout { collected: usize, expected: usize },

    #[error("Link lost")]
    LinkLost,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("A waveform capture is already in progress")]
    CaptureInProgress,

    #[error("Session closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for ViPen operations
pub type ViPenResult<T> = Result<T, ViPenError>;

/// Error returned by `connect`
pub type ConnectError = ViPenError;
/// Error returned by `start_measurement` / `stop_measurement`
pub type CommandError = ViPenError;
/// Error returned by `download_waveform`
pub type CaptureError = ViPenError;
/// Error returned by `read_user_data`
pub type ReadError = ViPenError;
