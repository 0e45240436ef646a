use thiserror::Error;

/// Errors that can occur inside the tracker runtime
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Inbound payload was not valid JSON; rejected wholesale
    #[error("Failed to parse payload: {0}")]
    Parse(String),

    /// A single field was present but out of bounds or of the wrong type
    #[error("Invalid value for `{field}`: {reason}")]
    Validation {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Persisting the configuration record failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// A hardware subsystem could not be initialized or read
    #[error("Hardware unavailable ({subsystem}): {reason}")]
    HardwareUnavailable {
        /// Subsystem that failed (link, accelerometer, adc, ...)
        subsystem: &'static str,
        /// Reason reported by the collaborator
        reason: String,
    },

    /// The peripheral link rejected an operation
    #[error("Link error: {0}")]
    Link(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

impl TrackerError {
    /// Check if this error came from an inbound protocol write
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Validation { .. })
    }

    /// Check if the affected subsystem should be treated as gone for this power cycle
    #[must_use]
    pub const fn is_fatal_for_subsystem(&self) -> bool {
        matches!(self, Self::HardwareUnavailable { .. })
    }

    /// Check if the runtime can carry on with in-memory state after this error
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Validation { .. } | Self::Storage(_) | Self::Link(_)
        )
    }
}
