use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Bad key declaration: unknown prop, incomplete capacity, bad projection.
    #[error("Invalid key schema: {0}")]
    InvalidKeySchema(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Entity already registered: {0}")]
    AlreadyExists(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    /// These codes are stable and can be used by clients for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidKeySchema(_) => "INVALID_KEY_SCHEMA",
            Error::InvalidExpression(_) => "INVALID_EXPRESSION",
            Error::InvalidQuery(_) => "INVALID_QUERY",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::EntityNotFound(_) => "ENTITY_NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error is potentially retryable.
    ///
    /// Everything raised by the planning core is a configuration or
    /// compilation problem, so nothing here is worth retrying. Transport
    /// failures are classified by the batch engine instead.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Prefixes the message of a schema error with the owning entity name.
    ///
    /// The index builder only knows the declaration position (`key[i] ...`);
    /// the caller that owns the entity re-prefixes it.
    pub fn with_entity(self, entity: &str) -> Error {
        match self {
            Error::InvalidKeySchema(msg) => Error::InvalidKeySchema(format!("{} {}", entity, msg)),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
