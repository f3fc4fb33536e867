//! Error types and handling for chainbuf operations.
//!
//! This module provides the error type covering the failure modes of buffer
//! allocation and chain reshaping, with proper error chaining support.

use static_assertions;
use thiserror::Error;

/// Result type alias for chainbuf operations.
///
/// This type alias simplifies function signatures throughout the crate by
/// providing a consistent error type while allowing different success types.
pub type Result<T> = std::result::Result<T, ChainBufError>;

/// Error type for chainbuf operations.
///
/// Every fallible operation in this crate fails atomically: when one of these
/// errors is returned, the chain and all descriptors are observably unchanged.
///
/// # Design Notes
///
/// - Uses `thiserror` for automatic `Error` trait implementation
/// - All variants are `Send + Sync` for use across thread boundaries
/// - Window-operation preconditions (for example `append` past the tailroom)
///   are caller contracts enforced by debug assertions, not by this type
#[derive(Debug, Error)]
pub enum ChainBufError {
    /// A backing buffer or bookkeeping allocation failed.
    ///
    /// This error occurs when the allocator refuses a backing-store block or
    /// the separately allocated refcount record for a transferred buffer.
    /// The requested size is reported for diagnostics.
    #[error("failed to allocate {bytes} bytes of buffer storage")]
    AllocationFailed {
        /// Number of bytes requested from the allocator.
        bytes: usize,
    },

    /// A coalesce or gather would exceed the 32-bit capacity width.
    ///
    /// Buffer lengths and capacities are tracked as `u32`. Fusing a chain
    /// whose combined span does not fit in that width fails up front, before
    /// any allocation or chain mutation takes place.
    #[error("chain of {total} bytes exceeds the 32-bit buffer capacity limit")]
    Overflow {
        /// Total number of data bytes the operation would have produced.
        total: u64,
    },
}

// The error type crosses thread boundaries together with buffer handles.
static_assertions::assert_impl_all!(ChainBufError: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    /// Test error message formatting for all variants
    mod error_messages {
        use super::*;

        #[test]
        fn allocation_failed() {
            let error = ChainBufError::AllocationFailed { bytes: 4096 };
            assert_eq!(
                error.to_string(),
                "failed to allocate 4096 bytes of buffer storage"
            );
        }

        #[test]
        fn overflow() {
            let error = ChainBufError::Overflow {
                total: u32::MAX as u64 + 1,
            };
            assert_eq!(
                error.to_string(),
                "chain of 4294967296 bytes exceeds the 32-bit buffer capacity limit"
            );
        }
    }

    /// Test error trait implementations
    mod error_traits {
        use super::*;

        #[test]
        fn implements_error_trait() {
            let error = ChainBufError::AllocationFailed { bytes: 16 };

            let _: &dyn std::error::Error = &error;

            // Leaf errors have no source
            assert!(error.source().is_none());
        }

        #[test]
        fn debug_formatting() {
            let error = ChainBufError::Overflow {
                total: 5_000_000_000,
            };
            let debug_str = format!("{:?}", error);

            assert!(debug_str.contains("Overflow"));
            assert!(debug_str.contains("5000000000"));
        }
    }

    /// Test the Result type alias
    mod result_alias {
        use super::*;

        #[test]
        fn success_case() {
            fn returns_success() -> Result<i32> {
                Ok(42)
            }

            assert_eq!(returns_success().unwrap(), 42);
        }

        #[test]
        fn error_case() {
            fn returns_error() -> Result<i32> {
                Err(ChainBufError::AllocationFailed { bytes: 1 })
            }

            assert!(returns_error().is_err());
            match returns_error() {
                Err(ChainBufError::AllocationFailed { bytes: 1 }) => {}
                _ => panic!("Expected AllocationFailed error"),
            }
        }
    }
}
