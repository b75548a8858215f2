pub mod memory;

#[cfg(feature = "sql")]
pub mod sql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Map a sqlx error to a persistence error, keeping the cause as the source.
#[cfg(any(feature = "sql", feature = "sqlite"))]
pub(crate) fn persistence_error(context: &str, err: sqlx::Error) -> crate::error::LeaderboardError {
    crate::error::LeaderboardError::PersistenceError {
        reason: format!("{context} failed: {err}"),
        source: Some(Box::new(err)),
    }
}

/// Whether a sqlx error is a foreign key violation.
#[cfg(any(feature = "sql", feature = "sqlite"))]
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Rebuild a domain value read from a row, treating invariant violations as
/// corrupt data rather than client errors.
#[cfg(any(feature = "sql", feature = "sqlite"))]
pub(crate) fn corrupt_column(
    column: &str,
    err: crate::error::LeaderboardError,
) -> crate::error::LeaderboardError {
    crate::error::LeaderboardError::PersistenceError {
        reason: format!("stored '{column}' column violates record invariants: {err}"),
        source: Some(Box::new(err)),
    }
}
