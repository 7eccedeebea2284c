use diesel::result::DatabaseErrorKind;
use thiserror::Error;

/// Errors surfaced by the indexing core.
///
/// The first group are integrity violations. They abort the enclosing unit
/// of work and are never retried here.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("output {outpoint} is spent twice: by input {first} and by input {second}")]
    DuplicateSpend {
        outpoint: String,
        first: String,
        second: String,
    },

    #[error("no block at height {height} to link block {successor} onto")]
    MissingPredecessor { height: u32, successor: u32 },

    #[error("{} blocks have no successor after linkage repair (heights {heights:?})", heights.len())]
    MultipleChainTips { heights: Vec<u32> },

    #[error("no block at height {0}")]
    MissingBlock(u32),

    #[error("constraint violation on {table}: {detail}")]
    ConstraintViolation { table: &'static str, detail: String },

    #[error("invalid output descriptor for {outpoint}: {source}")]
    Descriptor {
        outpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("value {0} does not fit an unsigned amount")]
    AmountOutOfRange(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("in-memory store is unusable after a unit of work panicked")]
    Poisoned,
}

impl IndexError {
    /// True for errors that indicate corrupt or inconsistent data, as opposed
    /// to transient infrastructure faults.
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            IndexError::DuplicateSpend { .. }
            | IndexError::MissingPredecessor { .. }
            | IndexError::MultipleChainTips { .. }
            | IndexError::MissingBlock(_)
            | IndexError::ConstraintViolation { .. } => true,
            IndexError::Database(diesel::result::Error::DatabaseError(kind, _)) => matches!(
                kind,
                DatabaseErrorKind::UniqueViolation | DatabaseErrorKind::ForeignKeyViolation
            ),
            _ => false,
        }
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
