//! Error taxonomy shared by the SSM engine, the orchestrator and every driver.
//!
//! The variants map one-to-one onto the table in the design spec's error
//! handling section: the SSM layer never recovers from an error, it only
//! propagates the code upward, so the taxonomy has to be rich enough for a
//! driver's completion callback to decide whether an error is a per-scan
//! retry hint, a fatal session error, or a synchronous argument failure.

use std::fmt;

/// Soft, per-scan failure that does not end the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Too few stripes were captured before the finger left the sensor.
    TooShort,
    /// The finger was not centered over the sensor.
    OffCenter,
    /// The finger needs to be removed before scanning can continue.
    RemoveFinger,
    /// Unspecified soft failure; retry the scan.
    Generic,
}

impl fmt::Display for RetryHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetryHint::TooShort => "swipe too short",
            RetryHint::OffCenter => "finger off-center",
            RetryHint::RemoveFinger => "remove finger and retry",
            RetryHint::Generic => "retry scan",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("usb transport error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("operation timed out")]
    Timeout,

    /// A transfer was cancelled by `deactivate`. This is swallowed by the
    /// core and fed into the deactivate path; it should rarely escape to a
    /// caller, but is representable because a driver's completion handler
    /// must be able to name it explicitly to distinguish it from a real
    /// protocol error.
    #[error("operation cancelled")]
    Cancelled,

    #[error("allocation failed")]
    NoMemory,

    #[error("driver does not support this capability")]
    Unsupported,

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("scan retry: {0}")]
    RetryScan(RetryHint),

    #[error("stored print not found")]
    NotFound,
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }

    /// Numeric code carried across an SSM's `mark_failed`/completion
    /// callback boundary. `0` is reserved to mean "no error" by the SSM
    /// engine (§4.3), so every variant maps to a small positive value.
    pub fn code(&self) -> u32 {
        match self {
            Error::Io(_) => 1,
            Error::Protocol(_) => 2,
            Error::Timeout => 3,
            Error::Cancelled => 4,
            Error::NoMemory => 5,
            Error::Unsupported => 6,
            Error::Invalid(_) => 7,
            Error::RetryScan(RetryHint::TooShort) => 8,
            Error::RetryScan(RetryHint::OffCenter) => 9,
            Error::RetryScan(RetryHint::RemoveFinger) => 10,
            Error::RetryScan(RetryHint::Generic) => 11,
            Error::NotFound => 12,
        }
    }

    /// Reconstructs an `Error` from a code produced by `code()`, for SSM
    /// completion paths that only carry a `u32`. Panics on `0` since that
    /// means "no error" and should never be converted.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Error::Io("transport failure".into()),
            2 => Error::Protocol("unexpected reply".into()),
            3 => Error::Timeout,
            4 => Error::Cancelled,
            5 => Error::NoMemory,
            6 => Error::Unsupported,
            7 => Error::Invalid("bad argument".into()),
            8 => Error::RetryScan(RetryHint::TooShort),
            9 => Error::RetryScan(RetryHint::OffCenter),
            10 => Error::RetryScan(RetryHint::RemoveFinger),
            11 => Error::RetryScan(RetryHint::Generic),
            12 => Error::NotFound,
            other => panic!("invalid error code {other}"),
        }
    }
}

/// Result a verify operation resolves to on success (not an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    Match,
    NoMatch,
}

/// Result an identify operation resolves to on success (not an error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyResult {
    Match { finger_index: usize },
    NoMatch,
}

pub type Result<T> = std::result::Result<T, Error>;
