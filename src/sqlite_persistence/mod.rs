mod versioned_schema;

pub use versioned_schema::{
    open_in_memory, open_versioned, Column, ForeignKey, SqlType, Table, VersionedSchema,
    DEFAULT_TIMESTAMP,
};

/// Offset added to every schema version stored in `PRAGMA user_version`.
pub const BASE_DB_VERSION: usize = 300;
