//! Error types for the binding pools.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::net::IpAddr;

/// Errors that can occur while building or operating a binding pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system I/O error while loading or saving configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (configuration file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A range is misconfigured.
    ///
    /// The start and end addresses belong to different families, or the
    /// start is numerically greater than the end. The pool that carries the
    /// range cannot be activated.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Invalid pool configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) and the
    /// lifetime setters when, for example, the preferred lifetime exceeds
    /// the valid lifetime or a prefix length is out of bounds.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The pool has no free address or prefix left.
    ///
    /// Returned only after the forced reclamation sweep also found nothing.
    /// The caller should try another pool or report no-addresses-available.
    #[error("No available addresses in pool")]
    PoolExhausted,

    /// The pool has been shut down and accepts no more changes.
    #[error("Pool has been shut down")]
    PoolShutDown,

    /// The operation targets an address outside the pool bounds.
    ///
    /// The pool state is left untouched.
    #[error("Address {0} is outside the pool range")]
    AddressOutOfRange(IpAddr),

    /// A numeric value lies outside the span tracked by a
    /// [`FreeList`](crate::FreeList).
    #[error("Value {0:#x} is outside the free list span")]
    OutOfSpan(u128),
}

/// A specialized Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
