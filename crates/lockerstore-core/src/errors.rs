//! Structured error facility for lockerstore
//!
//! Every failure leaving the store is a [`StoreError`]. Callers classify it by
//! [`StoreErrorKind`] (or the `is_*` helpers) and decide on retry themselves;
//! nothing inside the store retries or swallows an error.

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable code usable in tests and external responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Missing required field, unknown column, invalid id. Raised before any
    /// driver call and never retryable.
    Validation,
    /// No row matched `only`, `get`, `update_one` or `delete_one`
    NotFound,
    /// More than one row matched `only`
    NotSingular,
    /// Unique or foreign-key violation reported by the backend
    Constraint,
    /// An edge was read without being requested for eager loading
    NotLoaded,
    /// A handle rooted in a committed or rolled-back transaction was used
    NotInTransaction,
    /// `begin` was called on a client that is already transactional
    TxStarted,
    /// The operation's context was cancelled
    Cancelled,
    /// The operation's context deadline passed
    DeadlineExceeded,
    /// Any other backend / transport failure
    Driver,
    Serialization,
    Migration,
    Config,
    Io,
    Internal,
}

impl StoreErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            StoreErrorKind::Validation => "ERR_VALIDATION",
            StoreErrorKind::NotFound => "ERR_NOT_FOUND",
            StoreErrorKind::NotSingular => "ERR_NOT_SINGULAR",
            StoreErrorKind::Constraint => "ERR_CONSTRAINT",
            StoreErrorKind::NotLoaded => "ERR_NOT_LOADED",
            StoreErrorKind::NotInTransaction => "ERR_NOT_IN_TRANSACTION",
            StoreErrorKind::TxStarted => "ERR_TX_STARTED",
            StoreErrorKind::Cancelled => "ERR_CANCELLED",
            StoreErrorKind::DeadlineExceeded => "ERR_DEADLINE_EXCEEDED",
            StoreErrorKind::Driver => "ERR_DRIVER",
            StoreErrorKind::Serialization => "ERR_SERIALIZATION",
            StoreErrorKind::Migration => "ERR_MIGRATION",
            StoreErrorKind::Config => "ERR_CONFIG",
            StoreErrorKind::Io => "ERR_IO",
            StoreErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether a caller may reasonably retry an operation failing with this kind
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreErrorKind::Driver | StoreErrorKind::DeadlineExceeded | StoreErrorKind::Io
        )
    }
}

/// Canonical structured error type
#[derive(Debug, Clone)]
pub struct StoreError {
    kind: StoreErrorKind,
    op: Option<String>,
    label: Option<String>,
    field: Option<String>,
    message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind) -> Self {
        Self {
            kind,
            op: None,
            label: None,
            field: None,
            message: String::new(),
        }
    }

    /// Missing or invalid input detected before any SQL was produced
    pub fn validation(field: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Validation)
            .with_field(field)
            .with_message(cause)
    }

    pub fn not_found(label: impl Into<String>) -> Self {
        let label = label.into();
        Self::new(StoreErrorKind::NotFound)
            .with_message(format!("{} not found", label))
            .with_label(label)
    }

    pub fn not_singular(label: impl Into<String>) -> Self {
        let label = label.into();
        Self::new(StoreErrorKind::NotSingular)
            .with_message(format!("{} not singular", label))
            .with_label(label)
    }

    /// Wraps the backend's constraint-violation message verbatim
    pub fn constraint(driver_message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Constraint).with_message(driver_message)
    }

    pub fn not_loaded(edge: impl Into<String>) -> Self {
        let edge = edge.into();
        Self::new(StoreErrorKind::NotLoaded)
            .with_message(format!("edge {} was not loaded", edge))
            .with_field(edge)
    }

    pub fn not_in_transaction() -> Self {
        Self::new(StoreErrorKind::NotInTransaction)
            .with_message("not in transaction: already committed or rolled back")
    }

    pub fn cancelled() -> Self {
        Self::new(StoreErrorKind::Cancelled).with_message("context cancelled")
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(StoreErrorKind::DeadlineExceeded).with_message("context deadline exceeded")
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Entity label (`account`, `identity`, ...)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Field or edge name
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_validation(&self) -> bool {
        self.kind == StoreErrorKind::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }

    pub fn is_not_singular(&self) -> bool {
        self.kind == StoreErrorKind::NotSingular
    }

    pub fn is_constraint(&self) -> bool {
        self.kind == StoreErrorKind::Constraint
    }

    pub fn is_not_loaded(&self) -> bool {
        self.kind == StoreErrorKind::NotLoaded
    }

    pub fn is_not_in_transaction(&self) -> bool {
        self.kind == StoreErrorKind::NotInTransaction
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::Cancelled | StoreErrorKind::DeadlineExceeded
        )
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(label) = &self.label {
            write!(f, " (entity: {})", label)?;
        }
        if let Some(field) = &self.field {
            write!(f, " (field: {})", field)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {}
