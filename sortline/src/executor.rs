//! Concurrency-safe execution of switching paths.
//!
//! [`ConcurrentSwitchingPathExecutor`] wraps an externally supplied
//! [`PhysicalPathExecutor`] with two layers of coordination:
//!
//! 1. A fixed-size admission semaphore provides global backpressure: at most
//!    `max_concurrent_parcels` paths execute at once, and waiting callers
//!    suspend until a slot frees or their cancellation fires.
//! 2. Every segment's diverter lock is acquired — in segment order, with a
//!    bounded cancellable wait — **before** the physical executor is
//!    invoked. If a later lock cannot be obtained, locks already held are
//!    released in reverse acquisition order and no partial physical
//!    movement occurs.
//!
//! Lock timeouts, cancellation, and physical faults are never raised to the
//! caller: each produces a failure result whose actual chute is the path's
//! fallback chute, so an undeliverable parcel is always physically routed
//! somewhere safe.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ConcurrencyOptions;
use crate::locks::{DiverterLockGuard, DiverterLockManager, LockAcquireError};
use crate::path::SwitchingPath;
use crate::types::{BoxFuture, ChuteId};
use thiserror::Error;

/// Faults reported by the physical execution layer.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A diverter did not respond within its segment TTL.
    #[error("diverter {0} unresponsive")]
    DiverterUnresponsive(u32),

    /// The drive layer rejected or aborted the command sequence.
    #[error("device fault: {0}")]
    DeviceFault(String),
}

/// Result of executing a switching path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathExecutionResult {
    /// Whether the parcel reached the path's target chute.
    pub success: bool,

    /// Chute the parcel was physically routed to. Equals the path's
    /// fallback chute whenever `success` is false.
    pub actual_chute: ChuteId,

    /// Failure reason, if any.
    pub reason: Option<String>,

    /// Sequence number of the segment that failed, if known.
    pub failed_segment: Option<u32>,
}

impl PathExecutionResult {
    /// Successful result: the parcel reached `chute`.
    pub fn sorted(chute: ChuteId) -> Self {
        Self {
            success: true,
            actual_chute: chute,
            reason: None,
            failed_segment: None,
        }
    }

    /// Failure result routed to the fallback chute.
    pub fn fallback(chute: ChuteId, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            actual_chute: chute,
            reason: Some(reason.into()),
            failed_segment: None,
        }
    }
}

/// Physical execution of a diverter command sequence.
///
/// Implemented by the vendor-specific drive layer; consumed here as an
/// interface only. Implementations may return `Err` for hardware faults —
/// the concurrent wrapper folds those into fallback results.
pub trait PhysicalPathExecutor: Send + Sync {
    /// Executes the path's segments against the hardware.
    fn execute<'a>(
        &'a self,
        path: &'a SwitchingPath,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<PathExecutionResult, ExecutionError>>;
}

/// Admission-controlled, lock-protected path executor.
pub struct ConcurrentSwitchingPathExecutor {
    inner: Arc<dyn PhysicalPathExecutor>,
    locks: Arc<DiverterLockManager>,
    admission: Arc<Semaphore>,
    lock_timeout: Duration,
}

impl ConcurrentSwitchingPathExecutor {
    /// Creates an executor around the physical layer.
    pub fn new(
        inner: Arc<dyn PhysicalPathExecutor>,
        locks: Arc<DiverterLockManager>,
        options: &ConcurrencyOptions,
    ) -> Self {
        Self {
            inner,
            locks,
            admission: Arc::new(Semaphore::new(options.max_concurrent_parcels)),
            lock_timeout: Duration::from_millis(options.diverter_lock_timeout_ms),
        }
    }

    /// Number of admission slots currently free.
    pub fn available_slots(&self) -> usize {
        self.admission.available_permits()
    }

    /// Executes `path` under admission control and per-diverter locks.
    ///
    /// Never returns an error for lock timeouts, cancellation, or physical
    /// faults; those produce a failure result carrying the path's fallback
    /// chute.
    pub async fn execute(
        &self,
        path: &SwitchingPath,
        cancel: &CancellationToken,
    ) -> PathExecutionResult {
        let fallback = path.fallback_chute;

        // Global admission: suspend until a slot frees or cancellation fires.
        let _permit = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(target_chute = %path.target_chute, "cancelled while waiting for admission");
                return PathExecutionResult::fallback(fallback, "cancelled while waiting for admission");
            }

            permit = Arc::clone(&self.admission).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("admission semaphore closed");
                    return PathExecutionResult::fallback(fallback, "executor shut down");
                }
            },
        };

        // All segment locks are taken before any physical movement. Dropping
        // guards from the back of this vec releases in reverse acquisition
        // order.
        let mut guards: Vec<DiverterLockGuard> = Vec::with_capacity(path.segments.len());
        for segment in &path.segments {
            match self
                .locks
                .acquire(segment.diverter, self.lock_timeout, cancel)
                .await
            {
                Ok(guard) => guards.push(guard),
                Err(err) => {
                    let reason = err.to_string();
                    match err {
                        LockAcquireError::Timeout { diverter } => {
                            warn!(
                                diverter = %diverter,
                                segment = segment.sequence,
                                "lock wait timed out, routing to fallback chute"
                            );
                        }
                        LockAcquireError::Cancelled { diverter } => {
                            debug!(diverter = %diverter, "lock wait cancelled");
                        }
                    }
                    Self::release(&mut guards);
                    return PathExecutionResult {
                        success: false,
                        actual_chute: fallback,
                        reason: Some(reason),
                        failed_segment: Some(segment.sequence),
                    };
                }
            }
        }

        let mut result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(target_chute = %path.target_chute, "cancelled during physical execution");
                PathExecutionResult::fallback(fallback, "cancelled during execution")
            }

            outcome = self.inner.execute(path, cancel) => match outcome {
                Ok(result) => result,
                Err(err) => {
                    warn!(error = %err, target_chute = %path.target_chute, "physical execution failed");
                    PathExecutionResult::fallback(fallback, err.to_string())
                }
            },
        };

        // Invariant: a failed execution always reports the fallback chute,
        // whatever the physical layer claimed.
        if !result.success {
            result.actual_chute = fallback;
        }

        Self::release(&mut guards);
        result
    }

    fn release(guards: &mut Vec<DiverterLockGuard>) {
        while let Some(guard) = guards.pop() {
            drop(guard);
        }
    }
}
