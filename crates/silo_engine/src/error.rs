//! Engine error type.
//!
//! Errors are classified by kind, not by implementation type; the kind
//! maps 1:1 onto the wire code the server returns. Builder errors are
//! user errors and surface unchanged; driver errors are wrapped under
//! the failing operation's kind.

use silo_proto::code;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidJoin,
    InvalidAggregation,
    InvalidWhereClause,
    InvalidHavingClause,
    QueryFailed,
    NotFound,
    InsertFailed,
    Duplicate,
    UpdateFailed,
    DeleteFailed,
    TransactionError,
    TransactionCommitFailed,
    TransactionRollbackFailed,
    InvalidTransactionId,
    ListTablesFailed,
    DescribeTableFailed,
    ExecRawSqlFailed,
}

impl ErrorKind {
    /// Wire code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => code::INVALID_ARGUMENT,
            ErrorKind::InvalidJoin => code::INVALID_JOIN,
            ErrorKind::InvalidAggregation => code::INVALID_AGGREGATION,
            ErrorKind::InvalidWhereClause => code::INVALID_WHERE_CLAUSE,
            ErrorKind::InvalidHavingClause => code::INVALID_HAVING_CLAUSE,
            ErrorKind::QueryFailed => code::QUERY_FAILED,
            ErrorKind::NotFound => code::NOT_FOUND,
            ErrorKind::InsertFailed => code::INSERT_FAILED,
            ErrorKind::Duplicate => code::DUPLICATE,
            ErrorKind::UpdateFailed => code::UPDATE_FAILED,
            ErrorKind::DeleteFailed => code::DELETE_FAILED,
            ErrorKind::TransactionError => code::TRANSACTION_ERROR,
            ErrorKind::TransactionCommitFailed => code::TRANSACTION_COMMIT_FAILED,
            ErrorKind::TransactionRollbackFailed => code::TRANSACTION_ROLLBACK_FAILED,
            ErrorKind::InvalidTransactionId => code::INVALID_TRANSACTION_ID,
            ErrorKind::ListTablesFailed => code::LIST_TABLES_FAILED,
            ErrorKind::DescribeTableFailed => code::DESCRIBE_TABLE_FAILED,
            ErrorKind::ExecRawSqlFailed => code::EXEC_RAW_SQL_FAILED,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}: {message}", self.kind.code())]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn invalid_transaction_id(transaction_id: &str) -> Self {
        Self::new(
            ErrorKind::InvalidTransactionId,
            format!("transaction {transaction_id} not found or expired"),
        )
    }

    /// Rebrand the kind, keeping the message. Used where a builder's
    /// `invalid-argument` must surface under a clause-specific kind.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_wire_code() {
        let err = EngineError::new(ErrorKind::InvalidWhereClause, "effective WHERE clause is empty");
        assert_eq!(
            err.to_string(),
            "INVALID_WHERE_CLAUSE: effective WHERE clause is empty"
        );
    }

    #[test]
    fn with_kind_preserves_message() {
        let err = EngineError::invalid_argument("condition field is required")
            .with_kind(ErrorKind::InvalidHavingClause);
        assert_eq!(err.kind, ErrorKind::InvalidHavingClause);
        assert_eq!(err.message, "condition field is required");
    }
}
