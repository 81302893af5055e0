use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// Categorizes backend errors by their semantic meaning, independent of
/// the driver which produced them.
///
/// Callers in the control plane only ever need to know whether an operation
/// against the backend succeeded. The kind exists so that logs and retry
/// decisions can be made without string matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The requested object (or the account namespace) does not exist.
    ///
    /// **Retryable:** No.
    /// **Caller action:** Treat as a missing object. `Storage::delete` maps this to success.
    NotFound,

    /// The backend refused the operation.
    ///
    /// **Retryable:** No - unless credentials are updated.
    PermissionDenied,

    /// The operation failed due to I/O errors (network, disk, etc.).
    ///
    /// **Retryable:** Maybe - depends on whether the I/O issue is transient.
    Io,

    /// The backend is temporarily unavailable.
    ///
    /// **Retryable:** Yes - the service should recover.
    ServiceUnavailable,

    /// The request was invalid (bad key, malformed data, etc.).
    ///
    /// **Retryable:** No - the request itself is invalid.
    InvalidRequest,

    /// The caller cancelled the operation before the backend answered.
    ///
    /// **Retryable:** Yes - nothing was committed on the database side.
    Cancelled,

    /// The backend did not answer within the configured timeout.
    ///
    /// **Retryable:** Yes - the outcome on the backend is unknown, but
    /// every backend operation is idempotent.
    TimedOut,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl StorageErrorKind {
    /// Returns whether this error kind typically indicates a retryable condition.
    ///
    /// This is advisory only: the sweep simply retries on its next pass, and
    /// the deletion coordinator leaves the decision to the HTTP client.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageErrorKind::ServiceUnavailable
                | StorageErrorKind::Io
                | StorageErrorKind::Cancelled
                | StorageErrorKind::TimedOut
        )
    }

    /// Returns whether the backend itself is struggling, as opposed to
    /// rejecting or failing this particular operation.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            StorageErrorKind::ServiceUnavailable | StorageErrorKind::TimedOut
        )
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::ServiceUnavailable => write!(f, "service unavailable"),
            StorageErrorKind::InvalidRequest => write!(f, "invalid request"),
            StorageErrorKind::Cancelled => write!(f, "cancelled"),
            StorageErrorKind::TimedOut => write!(f, "timed out"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

/// Error returned by a blob backend.
///
/// Carries the semantic [`StorageErrorKind`], the engine which produced it,
/// the account namespace and object key involved, and the underlying error.
///
/// # Example
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// let error = StorageError::builder(
///     "memory",
///     StorageErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "no such object"),
/// )
/// .account("acme")
/// .key("blobs/sha256/abcd")
/// .build();
///
/// assert_eq!(error.kind(), StorageErrorKind::NotFound);
/// assert_eq!(error.account(), Some("acme"));
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    account: Option<String>,
    key: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    span_trace: Box<SpanTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// Create a new storage error with the minimum required information.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(engine, kind, error).build()
    }

    /// Create a builder for constructing a storage error with full context.
    pub fn builder<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            engine,
            kind,
            source: error.into(),
            account: None,
            key: None,
            context: None,
        }
    }

    /// Returns a boxed closure that creates a storage error from a downstream error.
    ///
    /// ```rust
    /// use storage_driver::{StorageError, StorageErrorKind};
    ///
    /// fn operation() -> Result<(), StorageError> {
    ///     std::fs::File::open("does-not-exist.bin")
    ///         .map_err(StorageError::with("local", StorageErrorKind::Io))?;
    ///     Ok(())
    /// }
    /// assert!(operation().is_err());
    /// ```
    pub fn with<E>(
        engine: &'static str,
        kind: StorageErrorKind,
    ) -> Box<dyn FnOnce(E) -> StorageError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| StorageError::new(engine, kind, error))
    }

    /// The error raised when a caller cancels a backend call.
    pub fn cancelled(engine: &'static str) -> Self {
        Self::new(engine, StorageErrorKind::Cancelled, "operation cancelled")
    }

    /// The error raised when a backend call exceeds its deadline.
    pub fn timed_out(engine: &'static str, after: std::time::Duration) -> Self {
        Self::new(
            engine,
            StorageErrorKind::TimedOut,
            format!("no response after {after:?}"),
        )
    }

    /// Returns the error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Returns the storage engine name.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Returns the account namespace, if available.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Returns the object key, if available.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns additional context, if available.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether the backend reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// Returns whether this error is likely retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns whether the backend is unavailable or too slow to answer.
    pub fn is_server_fault(&self) -> bool {
        self.kind.is_server_fault()
    }

    /// The spans which were active where the error was created.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage error [{}] from {}", self.kind, self.engine)?;

        if let Some(account) = &self.account {
            write!(f, " (account: {})", account)?;
        }

        if let Some(key) = &self.key {
            write!(f, " (key: {})", key)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for constructing `StorageError` with optional context fields.
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    account: Option<String>,
    key: Option<String>,
    context: Option<String>,
}

impl StorageErrorBuilder {
    /// Set the account namespace.
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Set the object key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the `StorageError`.
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            engine: self.engine,
            account: self.account,
            key: self.key,
            context: self.context,
            source: self.source,
            span_trace: Box::new(SpanTrace::capture()),
        }
    }
}
