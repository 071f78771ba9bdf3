/// Errors crossing out of the native boundary.
///
/// Every native failure becomes one of these values; nothing at the
/// boundary panics. Use of a disposed or absent session has no variant:
/// device operations take a live `DeviceLink`, so that mistake does not
/// compile.
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// No device, or the native layer refused the connection.
    /// The message is the native one, verbatim.
    #[error("{0}")]
    Acquisition(String),

    /// A native payload could not be decoded (null pointer, bad UTF-8,
    /// malformed JSON, inconsistent result pair).
    #[error("malformed native payload: {0}")]
    Decode(String),

    /// Listing, info or transfer failure reported by the device.
    #[error("device I/O failed: {0}")]
    Io(String),
}

impl DeviceError {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Only acquisition failures are worth a user-driven retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Acquisition(_))
    }

    /// Text for the user-facing error dialog.
    pub fn user_message(&self) -> String {
        match self {
            Self::Acquisition(message) => message.clone(),
            Self::Decode(message) => {
                format!("The device sent data that could not be read: {message}")
            }
            Self::Io(message) => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_message_is_verbatim() {
        let err = DeviceError::Acquisition("no device".into());
        assert_eq!(err.to_string(), "no device");
        assert_eq!(err.user_message(), "no device");
        assert!(err.is_retryable());
    }

    #[test]
    fn decode_and_io_are_not_retryable() {
        assert!(!DeviceError::decode("null path").is_retryable());
        assert!(!DeviceError::Io("timeout".into()).is_retryable());
    }
}
