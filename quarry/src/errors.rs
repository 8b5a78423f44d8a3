use crate::db::errors::DbError;
use thiserror::Error as ThisError;

/// Errors that fail a call before anything is dispatched to the database.
///
/// Driver failures during dispatch are not reported here: they are carried in the `error` field of
/// the result envelope so callers can branch on the outcome without error plumbing. The one
/// exception is [`Error::Database`], used where no envelope exists (pool setup).
#[derive(ThisError, Debug)]
pub enum Error {
    /// Structurally invalid clause combination, unknown column or operator
    #[error("Query compile error: {message}")]
    QueryCompile { message: String },

    /// Caller misuse, e.g. an empty insert or an unscoped update/delete
    #[error("Contract violation: {message}")]
    ContractViolation { message: String },

    /// No model is registered under the given table name
    #[error("Unknown model '{name}'")]
    UnknownModel { name: String },

    /// The model declares no relation with the given name
    #[error("Model '{model}' has no relation named '{relation}'")]
    UnknownRelation { model: String, relation: String },

    /// Schema or relation declarations are inconsistent
    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },

    /// Database operation error outside of a result envelope
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn compile(message: impl Into<String>) -> Self {
        Error::QueryCompile { message: message.into() }
    }

    pub(crate) fn contract(message: impl Into<String>) -> Self {
        Error::ContractViolation { message: message.into() }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema { message: message.into() }
    }
}

/// Type alias for fail-fast results
pub type Result<T> = std::result::Result<T, Error>;
