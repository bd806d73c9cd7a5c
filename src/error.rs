//! Error taxonomy
//!
//! Every failure a handler can report is one of these kinds. Kinds travel
//! unchanged to the client as the integer `ret` field of the response;
//! `code()`/`from_code()` define the stable mapping. Transport-layer
//! failures inside a handler are wrapped as `Transport(code)`.

use thiserror::Error;

/// Errors surfaced by databases, the provider registry, and RPC handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// Put on an existing key under no-overwrite
    #[error("key already exists")]
    KeyExists,

    /// Lookup of a key that is not in the database
    #[error("unknown key")]
    UnknownKey,

    /// Operation on a database id that is not attached
    #[error("unknown database")]
    UnknownDatabase,

    /// RPC addressed to a provider id that is not registered
    #[error("unknown provider")]
    UnknownProvider,

    /// Open by a name no attached database carries
    #[error("unknown database name")]
    DatabaseName,

    /// Backend instantiation failed
    #[error("could not create database")]
    DatabaseCreate,

    /// A provider with the same id already exists
    #[error("provider id already in use")]
    ProviderExists,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Comparison function could not be resolved or applied
    #[error("comparison function error")]
    ComparisonFunction,

    /// A caller-supplied buffer was too small
    #[error("buffer too small")]
    Size,

    /// Backend refused a put
    #[error("put failed")]
    Put,

    /// Erase of an absent key
    #[error("erase failed")]
    Erase,

    /// Cross-provider migration aborted
    #[error("migration failed")]
    Migration,

    /// The file-migration collaborator reported a failure
    #[error("fileset transfer failed (status {0})")]
    FilesetTransfer(i32),

    /// The backend does not implement this operation
    #[error("operation not implemented by this backend")]
    OpNotImpl,

    /// Allocation failure
    #[error("allocation failed")]
    Alloc,

    /// Transport-layer failure, embedding the transport's return code
    #[error("transport error (code {0})")]
    Transport(i32),
}

/// Wire code for a successful operation.
pub const CODE_OK: i32 = 0;

/// Transport errors occupy codes at and above this base; the embedded
/// transport return is added to it.
const TRANSPORT_BASE: i32 = 1000;

impl KvError {
    /// Stable integer code carried in the response `ret` field.
    pub fn code(&self) -> i32 {
        match self {
            KvError::KeyExists => 1,
            KvError::UnknownKey => 2,
            KvError::UnknownDatabase => 3,
            KvError::UnknownProvider => 4,
            KvError::DatabaseName => 5,
            KvError::DatabaseCreate => 6,
            KvError::ProviderExists => 7,
            KvError::Config(_) => 8,
            KvError::ComparisonFunction => 9,
            KvError::Size => 10,
            KvError::Put => 11,
            KvError::Erase => 12,
            KvError::Migration => 13,
            KvError::FilesetTransfer(_) => 14,
            KvError::OpNotImpl => 15,
            KvError::Alloc => 16,
            KvError::Transport(c) => TRANSPORT_BASE + c,
        }
    }

    /// Decode a wire code. `CODE_OK` has no error; callers check for it
    /// before calling this.
    pub fn from_code(code: i32) -> KvError {
        match code {
            1 => KvError::KeyExists,
            2 => KvError::UnknownKey,
            3 => KvError::UnknownDatabase,
            4 => KvError::UnknownProvider,
            5 => KvError::DatabaseName,
            6 => KvError::DatabaseCreate,
            7 => KvError::ProviderExists,
            8 => KvError::Config(String::new()),
            9 => KvError::ComparisonFunction,
            10 => KvError::Size,
            11 => KvError::Put,
            12 => KvError::Erase,
            13 => KvError::Migration,
            14 => KvError::FilesetTransfer(0),
            15 => KvError::OpNotImpl,
            16 => KvError::Alloc,
            c if c >= TRANSPORT_BASE => KvError::Transport(c - TRANSPORT_BASE),
            _ => KvError::Transport(0),
        }
    }

    /// Code of a `Result` as it goes on the wire.
    pub fn code_of(result: &Result<(), KvError>) -> i32 {
        match result {
            Ok(()) => CODE_OK,
            Err(e) => e.code(),
        }
    }
}

/// Result alias used throughout the crate.
pub type KvResult<T> = Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        let kinds = [
            KvError::KeyExists,
            KvError::UnknownKey,
            KvError::UnknownDatabase,
            KvError::UnknownProvider,
            KvError::DatabaseName,
            KvError::DatabaseCreate,
            KvError::ProviderExists,
            KvError::ComparisonFunction,
            KvError::Size,
            KvError::Put,
            KvError::Erase,
            KvError::Migration,
            KvError::OpNotImpl,
            KvError::Alloc,
        ];
        for kind in kinds {
            assert_eq!(KvError::from_code(kind.code()), kind);
        }
    }

    #[test]
    fn test_transport_codes_embed_return() {
        let e = KvError::Transport(7);
        assert_eq!(e.code(), 1007);
        assert_eq!(KvError::from_code(1007), e);
    }

    #[test]
    fn test_codes_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for code in 1..=16 {
            assert!(seen.insert(KvError::from_code(code).code()));
        }
    }
}
