//! Chute selection strategy family.
//!
//! Every parcel must get a destination: each strategy returns either an
//! assigned chute or the configured exception chute with a reason, never an
//! unhandled failure. The [`ChuteSelectionRouter`] dispatches to the active
//! mode:
//!
//! - **Fixed** — a single configured chute for every parcel.
//! - **RoundRobin** — one shared rotating cursor over a configured list.
//! - **Formal** — waits for the external decision system to deliver an
//!   assignment through the [`AssignmentDispatcher`]; timeout or
//!   cancellation falls back to the exception chute.
//!
//! An overload-forced request short-circuits to the exception chute before
//! any strategy logic runs.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SelectionOptions;
use crate::types::{ChuteId, ParcelId};

/// Active selection mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Single configured chute.
    Fixed,
    /// Rotating cursor over a configured list.
    RoundRobin,
    /// Upstream-assigned destination with a bounded wait.
    Formal,
}

/// One selection request.
#[derive(Clone, Copy, Debug)]
pub struct SelectionRequest {
    /// Parcel to route.
    pub parcel_id: ParcelId,

    /// Set when overload handling forces the parcel straight to the
    /// exception chute.
    pub overload_forced: bool,
}

impl SelectionRequest {
    /// Normal request for a parcel.
    pub fn new(parcel_id: ParcelId) -> Self {
        Self {
            parcel_id,
            overload_forced: false,
        }
    }

    /// Request flagged by overload control.
    pub fn overload_forced(parcel_id: ParcelId) -> Self {
        Self {
            parcel_id,
            overload_forced: true,
        }
    }
}

/// Result of a selection: a destination chute, always.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChuteSelection {
    /// Chute the parcel should be routed to.
    pub chute: ChuteId,

    /// True when `chute` is the exception chute rather than a real
    /// assignment.
    pub exception: bool,

    /// Why the exception chute was chosen, when it was.
    pub reason: Option<String>,
}

impl ChuteSelection {
    /// A real assignment.
    pub fn assigned(chute: ChuteId) -> Self {
        Self {
            chute,
            exception: false,
            reason: None,
        }
    }

    /// The exception chute, with the reason it was chosen.
    pub fn exception(chute: ChuteId, reason: impl Into<String>) -> Self {
        Self {
            chute,
            exception: true,
            reason: Some(reason.into()),
        }
    }
}

// =============================================================================
// Assignment dispatcher (Formal mode)
// =============================================================================

/// Routes externally delivered chute assignments to waiting parcels.
///
/// Formal selection registers a one-shot completion per parcel id; the
/// inbound callback from the decision system fulfils it via
/// [`complete`](Self::complete). A late assignment arriving after the waiter
/// timed out finds no registration and is logged as a harmless no-op — it
/// must not reopen the already-fallen-back plan.
#[derive(Debug, Default)]
pub struct AssignmentDispatcher {
    pending: DashMap<ParcelId, oneshot::Sender<ChuteId>>,
}

impl AssignmentDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Registers a one-shot completion for `parcel_id`.
    ///
    /// A duplicate registration replaces the previous one; the old waiter's
    /// channel closes and it falls back.
    fn register(&self, parcel_id: ParcelId) -> oneshot::Receiver<ChuteId> {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(parcel_id, tx).is_some() {
            warn!(parcel_id = %parcel_id, "replaced pending assignment registration");
        }
        rx
    }

    /// Removes the registration for `parcel_id`, if any.
    fn unregister(&self, parcel_id: ParcelId) {
        self.pending.remove(&parcel_id);
    }

    /// Delivers an upstream assignment.
    ///
    /// Returns true if a waiter received it. A missing registration is a
    /// late or unknown assignment and changes nothing.
    pub fn complete(&self, parcel_id: ParcelId, chute: ChuteId) -> bool {
        match self.pending.remove(&parcel_id) {
            Some((_, tx)) => match tx.send(chute) {
                Ok(()) => true,
                Err(_) => {
                    debug!(parcel_id = %parcel_id, "waiter gone before assignment delivery");
                    false
                }
            },
            None => {
                info!(
                    parcel_id = %parcel_id,
                    chute = %chute,
                    "late assignment ignored, parcel already routed"
                );
                false
            }
        }
    }

    /// Number of parcels currently awaiting an assignment.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// Fixed-chute strategy: every parcel goes to one configured chute.
#[derive(Debug)]
pub struct FixedChuteStrategy {
    fixed_chute: Option<ChuteId>,
    exception_chute: ChuteId,
}

impl FixedChuteStrategy {
    fn new(options: &SelectionOptions) -> Self {
        Self {
            fixed_chute: options.fixed_chute,
            exception_chute: options.exception_chute,
        }
    }

    fn select(&self, request: &SelectionRequest) -> ChuteSelection {
        match self.fixed_chute {
            Some(chute) if chute.is_valid() => ChuteSelection::assigned(chute),
            _ => {
                warn!(parcel_id = %request.parcel_id, "fixed chute missing or invalid");
                ChuteSelection::exception(self.exception_chute, "fixed chute not configured")
            }
        }
    }
}

/// Round-robin strategy: a shared rotating cursor over a configured list.
///
/// The cursor is scoped to this instance, so independent lines get
/// independent rotation by constructing separate routers.
#[derive(Debug)]
pub struct RoundRobinStrategy {
    chutes: Vec<ChuteId>,
    cursor: Mutex<usize>,
    exception_chute: ChuteId,
}

impl RoundRobinStrategy {
    fn new(options: &SelectionOptions) -> Self {
        Self {
            chutes: options.round_robin_chutes.clone(),
            cursor: Mutex::new(0),
            exception_chute: options.exception_chute,
        }
    }

    fn select(&self, request: &SelectionRequest) -> ChuteSelection {
        if self.chutes.is_empty() {
            warn!(parcel_id = %request.parcel_id, "round-robin chute list empty");
            return ChuteSelection::exception(
                self.exception_chute,
                "round-robin chute list not configured",
            );
        }

        let mut cursor = self.cursor.lock();
        let chute = self.chutes[*cursor];
        *cursor = (*cursor + 1) % self.chutes.len();
        ChuteSelection::assigned(chute)
    }

    /// Restores the rotation to the start of the list.
    pub fn reset(&self) {
        *self.cursor.lock() = 0;
    }
}

/// Formal strategy: waits for an upstream assignment.
///
/// The detection notice itself is assumed already sent upstream; this
/// strategy only waits for the answer.
#[derive(Debug)]
pub struct FormalStrategy {
    dispatcher: Arc<AssignmentDispatcher>,
    wait_timeout: Duration,
    exception_chute: ChuteId,
}

impl FormalStrategy {
    fn new(options: &SelectionOptions, dispatcher: Arc<AssignmentDispatcher>) -> Self {
        Self {
            dispatcher,
            wait_timeout: Duration::from_millis(options.assignment_wait_timeout_ms),
            exception_chute: options.exception_chute,
        }
    }

    async fn select(
        &self,
        request: &SelectionRequest,
        cancel: &CancellationToken,
    ) -> ChuteSelection {
        let rx = self.dispatcher.register(request.parcel_id);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                self.dispatcher.unregister(request.parcel_id);
                debug!(parcel_id = %request.parcel_id, "assignment wait cancelled");
                ChuteSelection::exception(self.exception_chute, "selection cancelled")
            }

            outcome = tokio::time::timeout(self.wait_timeout, rx) => match outcome {
                Ok(Ok(chute)) => {
                    debug!(parcel_id = %request.parcel_id, chute = %chute, "assignment received");
                    ChuteSelection::assigned(chute)
                }
                Ok(Err(_)) => {
                    // Sender dropped without an assignment (registration replaced)
                    ChuteSelection::exception(self.exception_chute, "assignment channel closed")
                }
                Err(_) => {
                    self.dispatcher.unregister(request.parcel_id);
                    warn!(
                        parcel_id = %request.parcel_id,
                        timeout_ms = self.wait_timeout.as_millis() as u64,
                        "no assignment before timeout"
                    );
                    ChuteSelection::exception(self.exception_chute, "assignment timeout")
                }
            },
        }
    }
}

// =============================================================================
// Composite router
// =============================================================================

/// Dispatches selection requests to the active strategy.
pub struct ChuteSelectionRouter {
    mode: SelectionMode,
    exception_chute: ChuteId,
    fixed: FixedChuteStrategy,
    round_robin: RoundRobinStrategy,
    formal: FormalStrategy,
}

impl ChuteSelectionRouter {
    /// Builds the router and all strategies from configuration.
    ///
    /// The dispatcher is shared with the inbound assignment callback.
    pub fn new(options: &SelectionOptions, dispatcher: Arc<AssignmentDispatcher>) -> Self {
        Self {
            mode: options.mode,
            exception_chute: options.exception_chute,
            fixed: FixedChuteStrategy::new(options),
            round_robin: RoundRobinStrategy::new(options),
            formal: FormalStrategy::new(options, dispatcher),
        }
    }

    /// Active mode.
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Selects a destination for one parcel.
    ///
    /// Always produces a chute: a real assignment or the exception chute
    /// with a reason.
    pub async fn select(
        &self,
        request: &SelectionRequest,
        cancel: &CancellationToken,
    ) -> ChuteSelection {
        if request.overload_forced {
            debug!(parcel_id = %request.parcel_id, "overload-forced to exception chute");
            return ChuteSelection::exception(self.exception_chute, "overload forced");
        }

        match self.mode {
            SelectionMode::Fixed => self.fixed.select(request),
            SelectionMode::RoundRobin => self.round_robin.select(request),
            SelectionMode::Formal => self.formal.select(request, cancel).await,
        }
    }

    /// Restores the round-robin rotation to the start of its list.
    pub fn reset_round_robin(&self) {
        self.round_robin.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(mode: SelectionMode) -> SelectionOptions {
        SelectionOptions {
            mode,
            fixed_chute: Some(ChuteId::new(5)),
            round_robin_chutes: vec![ChuteId::new(1), ChuteId::new(2), ChuteId::new(3)],
            exception_chute: ChuteId::new(99),
            assignment_wait_timeout_ms: 50,
        }
    }

    fn router(mode: SelectionMode) -> ChuteSelectionRouter {
        ChuteSelectionRouter::new(&options(mode), Arc::new(AssignmentDispatcher::new()))
    }

    #[tokio::test]
    async fn test_fixed_returns_configured_chute() {
        let router = router(SelectionMode::Fixed);
        let selection = router
            .select(&SelectionRequest::new(ParcelId::new(1)), &CancellationToken::new())
            .await;
        assert_eq!(selection, ChuteSelection::assigned(ChuteId::new(5)));
    }

    #[tokio::test]
    async fn test_fixed_missing_chute_goes_to_exception() {
        let mut opts = options(SelectionMode::Fixed);
        opts.fixed_chute = None;
        let router = ChuteSelectionRouter::new(&opts, Arc::new(AssignmentDispatcher::new()));

        let selection = router
            .select(&SelectionRequest::new(ParcelId::new(1)), &CancellationToken::new())
            .await;
        assert!(selection.exception);
        assert_eq!(selection.chute, ChuteId::new(99));
    }

    #[tokio::test]
    async fn test_fixed_zero_chute_goes_to_exception() {
        let mut opts = options(SelectionMode::Fixed);
        opts.fixed_chute = Some(ChuteId::new(0));
        let router = ChuteSelectionRouter::new(&opts, Arc::new(AssignmentDispatcher::new()));

        let selection = router
            .select(&SelectionRequest::new(ParcelId::new(1)), &CancellationToken::new())
            .await;
        assert!(selection.exception);
    }

    #[tokio::test]
    async fn test_overload_forced_short_circuits() {
        let router = router(SelectionMode::Fixed);
        let selection = router
            .select(
                &SelectionRequest::overload_forced(ParcelId::new(1)),
                &CancellationToken::new(),
            )
            .await;
        assert!(selection.exception);
        assert_eq!(selection.chute, ChuteId::new(99));
        assert_eq!(selection.reason.as_deref(), Some("overload forced"));
    }

    #[tokio::test]
    async fn test_round_robin_cycles() {
        let router = router(SelectionMode::RoundRobin);
        let cancel = CancellationToken::new();

        let mut seen = Vec::new();
        for i in 0..7 {
            let selection = router
                .select(&SelectionRequest::new(ParcelId::new(i)), &cancel)
                .await;
            assert!(!selection.exception);
            seen.push(selection.chute.value());
        }
        assert_eq!(seen, vec![1, 2, 3, 1, 2, 3, 1]);
    }

    #[tokio::test]
    async fn test_round_robin_reset_restores_cycle() {
        let router = router(SelectionMode::RoundRobin);
        let cancel = CancellationToken::new();

        for i in 0..2 {
            router
                .select(&SelectionRequest::new(ParcelId::new(i)), &cancel)
                .await;
        }
        router.reset_round_robin();

        let selection = router
            .select(&SelectionRequest::new(ParcelId::new(9)), &cancel)
            .await;
        assert_eq!(selection.chute, ChuteId::new(1));
    }

    #[tokio::test]
    async fn test_round_robin_empty_list_goes_to_exception() {
        let mut opts = options(SelectionMode::RoundRobin);
        opts.round_robin_chutes.clear();
        let router = ChuteSelectionRouter::new(&opts, Arc::new(AssignmentDispatcher::new()));

        let selection = router
            .select(&SelectionRequest::new(ParcelId::new(1)), &CancellationToken::new())
            .await;
        assert!(selection.exception);
        assert_eq!(selection.chute, ChuteId::new(99));
    }

    #[tokio::test]
    async fn test_formal_receives_assignment() {
        let dispatcher = Arc::new(AssignmentDispatcher::new());
        let router = ChuteSelectionRouter::new(&options(SelectionMode::Formal), Arc::clone(&dispatcher));

        let waiter = tokio::spawn({
            let cancel = CancellationToken::new();
            async move {
                router
                    .select(&SelectionRequest::new(ParcelId::new(7)), &cancel)
                    .await
            }
        });

        // Wait until the waiter has registered
        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.pending_count() == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        assert!(dispatcher.complete(ParcelId::new(7), ChuteId::new(12)));
        let selection = waiter.await.unwrap();
        assert_eq!(selection, ChuteSelection::assigned(ChuteId::new(12)));
    }

    #[tokio::test]
    async fn test_formal_timeout_falls_back() {
        let dispatcher = Arc::new(AssignmentDispatcher::new());
        let router = ChuteSelectionRouter::new(&options(SelectionMode::Formal), Arc::clone(&dispatcher));

        let selection = router
            .select(&SelectionRequest::new(ParcelId::new(8)), &CancellationToken::new())
            .await;
        assert!(selection.exception);
        assert_eq!(selection.reason.as_deref(), Some("assignment timeout"));

        // Late assignment after timeout is a harmless no-op
        assert!(!dispatcher.complete(ParcelId::new(8), ChuteId::new(4)));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_formal_cancellation_falls_back() {
        let dispatcher = Arc::new(AssignmentDispatcher::new());
        let router = Arc::new(ChuteSelectionRouter::new(
            &SelectionOptions {
                assignment_wait_timeout_ms: 10_000,
                ..options(SelectionMode::Formal)
            },
            Arc::clone(&dispatcher),
        ));

        let cancel = CancellationToken::new();
        let waiter = {
            let router = Arc::clone(&router);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                router
                    .select(&SelectionRequest::new(ParcelId::new(9)), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let selection = waiter.await.unwrap();
        assert!(selection.exception);
        assert_eq!(selection.reason.as_deref(), Some("selection cancelled"));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_dispatcher_unknown_parcel_is_noop() {
        let dispatcher = AssignmentDispatcher::new();
        assert!(!dispatcher.complete(ParcelId::new(1), ChuteId::new(2)));
    }
}
