use std::fmt;

/// A backend (queue, counter store, idempotency store, event store)
/// was temporarily unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError(pub String);

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend unavailable: {}", self.0)
    }
}

impl std::error::Error for BackendError {}

/// Errors returned by the admission pipeline.
///
/// Every variant maps to a client-visible outcome; none of them
/// propagate past the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitError {
    /// Signature or timestamp header absent.
    MissingHeaders,

    /// Fixed-window limit exhausted for this client key.
    /// Retryable after `retry_after_secs`.
    RateLimited { retry_after_secs: u64 },

    /// Timestamp outside the freshness window, or unparsable.
    StaleTimestamp,

    /// HMAC verification failed.
    InvalidSignature,

    /// Body did not parse into the expected payload shape.
    MalformedPayload,

    Backend(BackendError),
}

impl AdmitError {
    /// Suggested HTTP status for the out-of-scope transport layer.
    pub fn http_status(&self) -> u16 {
        match self {
            AdmitError::MissingHeaders => 400,
            AdmitError::RateLimited { .. } => 429,
            AdmitError::StaleTimestamp => 400,
            AdmitError::InvalidSignature => 401,
            AdmitError::MalformedPayload => 400,
            AdmitError::Backend(_) => 500,
        }
    }
}

impl fmt::Display for AdmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmitError::MissingHeaders =>
                write!(f, "Missing required headers"),
            AdmitError::RateLimited { retry_after_secs } =>
                write!(f, "Rate limit exceeded, retry after {retry_after_secs}s"),
            AdmitError::StaleTimestamp =>
                write!(f, "Request too old"),
            AdmitError::InvalidSignature =>
                write!(f, "Invalid signature"),
            AdmitError::MalformedPayload =>
                write!(f, "Invalid payload format"),
            AdmitError::Backend(err) =>
                write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AdmitError {}

impl From<BackendError> for AdmitError {
    fn from(err: BackendError) -> Self {
        AdmitError::Backend(err)
    }
}

/// Errors returned by the replay operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// No record with the given internal id.
    NotFound,

    /// Only records in the failed state can be replayed.
    NotReplayable,

    Backend(BackendError),
}

impl ReplayError {
    pub fn http_status(&self) -> u16 {
        match self {
            ReplayError::NotFound => 404,
            ReplayError::NotReplayable => 400,
            ReplayError::Backend(_) => 500,
        }
    }
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::NotFound =>
                write!(f, "Event not found"),
            ReplayError::NotReplayable =>
                write!(f, "Only failed events can be replayed"),
            ReplayError::Backend(err) =>
                write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<BackendError> for ReplayError {
    fn from(err: BackendError) -> Self {
        ReplayError::Backend(err)
    }
}

/// A delivery attempt against the external notifier failed.
///
/// Drives the retry/dead-letter state machine; never surfaced to the
/// original webhook caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Invalid or incomplete environment configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingVar(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingVar(name) =>
                write!(f, "missing required environment variable: {name}"),
        }
    }
}

impl std::error::Error for ConfigError {}
