use thiserror::Error;

/// Errors reported by a [`NodePool`](crate::NodePool).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot the pool may hand out is in use.
    #[error("node pool exhausted: all {capacity} slots are in use")]
    Exhausted {
        /// The pool's configured capacity.
        capacity: usize,
    },
}

/// Errors reported by the skip list engines.
///
/// Lookups never fail; a missing key is reported as `None`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SkipListError {
    /// The node pool could not supply a node. Any nodes acquired for the
    /// failed operation have been released again.
    #[error("node pool exhausted: all {capacity} slots are in use")]
    PoolExhausted {
        /// The pool's configured capacity.
        capacity: usize,
    },
    /// The key is already present; the list was not modified.
    #[error("key is already present in the skip list")]
    DuplicateKey,
}

impl From<PoolError> for SkipListError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { capacity } => SkipListError::PoolExhausted { capacity },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pool_error_converts() {
        let err: SkipListError = PoolError::Exhausted { capacity: 7 }.into();
        assert_eq!(err, SkipListError::PoolExhausted { capacity: 7 });
        assert_eq!(
            err.to_string(),
            "node pool exhausted: all 7 slots are in use"
        );
    }
}
