/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row did not match its destination schema.
    #[error("cannot encode {table}.{column}: {reason}")]
    Encoding {
        table: String,
        column: String,
        reason: String,
    },

    /// A stored row could not be turned back into its typed form.
    #[error("cannot decode {table}.{column}: {reason}")]
    Decoding {
        table: String,
        column: String,
        reason: String,
    },

    /// A bulk-load stream could not be parsed.
    #[error("corrupt copy stream for {table} at offset {offset}: {reason}")]
    CorruptStream {
        table: String,
        offset: usize,
        reason: String,
    },

    /// A value was read as a type it does not hold.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("malformed query against {table}: {reason}")]
    MalformedQuery { table: String, reason: String },

    /// The store refused a row whose primary key already exists.
    #[error("duplicate id {id} in table {table}")]
    DuplicateKey { table: String, id: i64 },

    /// Connection or protocol failure in the backend.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
