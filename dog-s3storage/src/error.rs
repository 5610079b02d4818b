use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while talking to the object store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Precondition failed: {reason}")]
    Precondition { reason: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Object store returned {code} (status {status:?}): {message}")]
    Service {
        code: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Transport error: {source}")]
    Transport {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Malformed or truncated response: {source}")]
    Payload {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Deleting bucket {bucket} returned status {status}")]
    DeleteBucket { bucket: String, status: u16 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

/// Closed set of error classes the engine branches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection failures, truncated payloads, 5xx and throttling
    Transient,
    NotFound,
    /// The resource already exists and is owned by the caller
    AlreadyExists,
    Denied,
    Precondition,
    Fatal,
}

impl ErrorKind {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

const TRANSIENT_CODES: &[&str] = &[
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestTimeout",
    "RequestLimitExceeded",
    "TooManyRequests",
];

const NOT_FOUND_CODES: &[&str] = &["404", "NoSuchKey", "NoSuchBucket", "NotFound"];

/// Map an error onto the closed [`ErrorKind`] set.
///
/// Service errors are judged on the HTTP status first and the provider's
/// error code second, so a bodiless `HEAD` 404 and a `GetObject` answered
/// with `NoSuchKey` land in the same bucket.
pub fn classify(error: &StorageError) -> ErrorKind {
    match error {
        StorageError::Transport { .. } | StorageError::Payload { .. } => ErrorKind::Transient,
        StorageError::NotFound { .. } => ErrorKind::NotFound,
        StorageError::Precondition { .. } => ErrorKind::Precondition,
        StorageError::Service { code, status, .. } => classify_service(code, *status),
        _ => ErrorKind::Fatal,
    }
}

fn classify_service(code: &str, status: Option<u16>) -> ErrorKind {
    let status = status.unwrap_or_default();
    if status >= 500 || status == 429 || TRANSIENT_CODES.contains(&code) {
        ErrorKind::Transient
    } else if status == 404 || NOT_FOUND_CODES.contains(&code) {
        ErrorKind::NotFound
    } else if code == "BucketAlreadyOwnedByYou" {
        ErrorKind::AlreadyExists
    } else if status == 403 || code == "AccessDenied" {
        ErrorKind::Denied
    } else if status == 412 || code == "PreconditionFailed" {
        ErrorKind::Precondition
    } else {
        ErrorKind::Fatal
    }
}

impl StorageError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        classify(self)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Create a service error from a provider code and HTTP status
    pub fn service<C: Into<String>, M: Into<String>>(
        code: C,
        status: Option<u16>,
        message: M,
    ) -> Self {
        Self::Service {
            code: code.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a transport error from any error type
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            source: Box::new(error),
        }
    }

    /// Create a payload error from any error type
    pub fn payload<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Payload {
            source: Box::new(error),
        }
    }

    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a precondition error
    pub fn precondition<S: Into<String>>(reason: S) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
