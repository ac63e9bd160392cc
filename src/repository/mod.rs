pub mod kv_repo;
pub mod tracks_repo;

pub use kv_repo::SqliteKvRepository;
pub use tracks_repo::SqliteTracksRepository;

use tracks_repo::TrackConversionError;
use crate::domain::{ExpandedFromParseError, TrackStatusParseError};

/* Database related errors */
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Item with identity <{0}> was not found.")]
    IdentityNotFound(String),

    #[error("Unknown Error occured! Have fun debugging it, here is something to help you: {0}")]
    UnknownError(String),

    #[error("Data mapping error for Track: {0}")]
    TrackDataMapping(#[from] TrackConversionError),

    #[error("Stored 'expanded_from' value is invalid: {0}")]
    ExpandedFromMapping(#[from] ExpandedFromParseError),

    #[error("Stored 'status' value is invalid: {0}")]
    StatusMapping(#[from] TrackStatusParseError),

    #[error("No rows was returned by a query that expected to return at least one row.")]
    RowNotFound,

    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Something went wrong, dude, idk what, look at this: {0}")]
    GenericDatabaseError(#[from] sqlx::Error),

    #[error("A constraint was violated: {description}")]
    ConstraintViolation { description: String },

    #[error("Failed to decode database row: {0}")]
    RowDecodingError(String),
}

impl RepositoryError {
    pub fn from_sqlx_error(sqlx_error: sqlx::Error) -> Self {
        match &sqlx_error {
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => Self::ConnectionError(sqlx_error.to_string()),
            sqlx::Error::Decode(decode_err) => Self::RowDecodingError(decode_err.to_string()),
            sqlx::Error::Database(db_error) => {
                if let Some(error_code) = db_error.code() {
                    let code_str = error_code.as_ref();

                    // SQLite specific error codes for constraints
                    // 19: General constraint violation (SQLITE_CONSTRAINT)
                    // 2067: SQLITE_CONSTRAINT_UNIQUE (specific unique constraint violation)
                    // 1555: SQLITE_CONSTRAINT_PRIMARYKEY (specific primary key violation)
                    if ["19", "2067", "1555"].contains(&code_str) {
                        return Self::ConstraintViolation {
                            description: db_error.message().to_string()
                        };
                    }
                }

                Self::GenericDatabaseError(sqlx_error)
            },

            _ => Self::GenericDatabaseError(sqlx_error)
        }
    }
}
