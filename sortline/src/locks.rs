//! Per-diverter exclusive locks.
//!
//! A diverter's lock is the sole serialization point for physical actuation:
//! at most one in-flight command per diverter at a time. Locks are exclusive
//! only — actuation is inherently serialized, so there is no shared-read
//! mode — and one lock instance exists per diverter id for the process
//! lifetime, created on first use.
//!
//! # Thread Safety
//!
//! The registry is a `DashMap` keyed by diverter id, so lock lookup for
//! different diverters never contends on a global mutex. Acquisition
//! suspends the calling task (never a worker thread) and is bounded by a
//! timeout linked to the caller's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::types::DiverterId;

/// Errors from a bounded lock acquisition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockAcquireError {
    /// The wait exceeded the configured bound.
    #[error("lock timeout on {diverter}")]
    Timeout {
        /// Diverter whose lock could not be obtained in time.
        diverter: DiverterId,
    },

    /// The caller's cancellation token fired during the wait.
    #[error("lock wait cancelled for {diverter}")]
    Cancelled {
        /// Diverter whose lock was being waited on.
        diverter: DiverterId,
    },
}

/// Exclusive hold on one diverter.
///
/// The lock is released when the guard is dropped.
pub struct DiverterLockGuard {
    diverter: DiverterId,
    _guard: OwnedMutexGuard<()>,
}

impl DiverterLockGuard {
    /// The diverter this guard holds.
    pub fn diverter(&self) -> DiverterId {
        self.diverter
    }
}

impl std::fmt::Debug for DiverterLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiverterLockGuard")
            .field("diverter", &self.diverter)
            .finish()
    }
}

/// Registry of per-diverter exclusive locks, created on demand.
#[derive(Debug, Default)]
pub struct DiverterLockManager {
    locks: DashMap<DiverterId, Arc<Mutex<()>>>,
}

impl DiverterLockManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Returns the lock for a diverter, creating it on first use.
    fn lock_for(&self, diverter: DiverterId) -> Arc<Mutex<()>> {
        self.locks
            .entry(diverter)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of diverter locks created so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no lock has been created yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Acquires the exclusive lock for `diverter`, waiting at most `timeout`.
    ///
    /// The wait suspends the calling task and aborts promptly if `cancel`
    /// fires.
    ///
    /// # Errors
    ///
    /// [`LockAcquireError::Timeout`] if the bound elapses first,
    /// [`LockAcquireError::Cancelled`] if the token fires first.
    pub async fn acquire(
        &self,
        diverter: DiverterId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DiverterLockGuard, LockAcquireError> {
        let lock = self.lock_for(diverter);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(LockAcquireError::Cancelled { diverter }),

            acquired = tokio::time::timeout(timeout, lock.lock_owned()) => match acquired {
                Ok(guard) => {
                    trace!(diverter = %diverter, "diverter lock acquired");
                    Ok(DiverterLockGuard {
                        diverter,
                        _guard: guard,
                    })
                }
                Err(_) => Err(LockAcquireError::Timeout { diverter }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_uncontended() {
        let manager = DiverterLockManager::new();
        let cancel = CancellationToken::new();

        let guard = manager
            .acquire(DiverterId::new(1), Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        assert_eq!(guard.diverter(), DiverterId::new(1));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_one_instance_per_diverter() {
        let manager = DiverterLockManager::new();
        let cancel = CancellationToken::new();

        let g1 = manager
            .acquire(DiverterId::new(1), Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        let _g2 = manager
            .acquire(DiverterId::new(2), Duration::from_millis(100), &cancel)
            .await
            .unwrap();

        drop(g1);
        // Re-acquiring diverter 1 hits the same lock instance
        let _g1_again = manager
            .acquire(DiverterId::new(1), Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_acquire_times_out_while_held() {
        let manager = DiverterLockManager::new();
        let cancel = CancellationToken::new();

        let _held = manager
            .acquire(DiverterId::new(3), Duration::from_millis(100), &cancel)
            .await
            .unwrap();

        let err = manager
            .acquire(DiverterId::new(3), Duration::from_millis(20), &cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LockAcquireError::Timeout {
                diverter: DiverterId::new(3)
            }
        );
    }

    #[tokio::test]
    async fn test_acquire_aborts_on_cancellation() {
        let manager = Arc::new(DiverterLockManager::new());
        let cancel = CancellationToken::new();

        let _held = manager
            .acquire(DiverterId::new(4), Duration::from_millis(100), &cancel)
            .await
            .unwrap();

        let waiter = {
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                manager
                    .acquire(DiverterId::new(4), Duration::from_secs(10), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            LockAcquireError::Cancelled {
                diverter: DiverterId::new(4)
            }
        );
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let manager = DiverterLockManager::new();
        let cancel = CancellationToken::new();

        let guard = manager
            .acquire(DiverterId::new(5), Duration::from_millis(100), &cancel)
            .await
            .unwrap();
        drop(guard);

        // Immediately available again
        manager
            .acquire(DiverterId::new(5), Duration::from_millis(20), &cancel)
            .await
            .unwrap();
    }

    #[test]
    fn test_timeout_error_message_names_diverter() {
        let err = LockAcquireError::Timeout {
            diverter: DiverterId::new(7),
        };
        assert_eq!(err.to_string(), "lock timeout on 7");
    }
}
