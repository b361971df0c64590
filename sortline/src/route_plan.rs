//! Per-parcel routing state machine and chute-change arbitration.
//!
//! A [`RoutePlan`] is created when a parcel is detected and tracks its
//! routing lifecycle through `Created → Executing → {Completed,
//! ExceptionRouted, Failed}`. The upstream decision system may re-decide a
//! parcel's destination after local execution has begun or after the parcel
//! has physically left the line, so every destination change goes through
//! [`RoutePlan::try_apply_chute_change`], which arbitrates in a fixed
//! priority: "too late to matter" (already terminal) before "too late by
//! clock" (past the replan deadline) before default-accept.
//!
//! Every arbitration decision emits domain events for audit; callers drain
//! them with [`RoutePlan::take_events`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::{ChuteId, ParcelId};

/// Lifecycle state of a route plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RoutePlanStatus {
    /// Plan exists, physical execution has not started.
    Created,
    /// Physical path execution is in flight.
    Executing,
    /// Parcel reached its target chute. Terminal.
    Completed,
    /// Parcel was routed to the exception chute. Terminal.
    ExceptionRouted,
    /// Unrecoverable fault; further state is meaningless. Terminal.
    Failed,
}

impl RoutePlanStatus {
    /// Returns true for states that end the plan's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::ExceptionRouted | Self::Failed
        )
    }
}

/// Outcome of a chute-change request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChuteChangeDecision {
    /// The destination was updated.
    Accepted,
    /// The request changed nothing because it no longer matters.
    Ignored {
        /// Why the request was ignored.
        reason: &'static str,
    },
    /// The request was refused.
    Rejected {
        /// Why the request was refused.
        reason: &'static str,
    },
}

impl ChuteChangeDecision {
    /// Returns true if the destination was updated.
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Audit event emitted by the route plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RoutePlanEvent {
    /// A destination change was requested.
    ChuteChangeRequested {
        parcel_id: ParcelId,
        current_chute: ChuteId,
        requested_chute: ChuteId,
        requested_at: DateTime<Utc>,
    },
    /// The destination was updated.
    ChuteChangeAccepted {
        parcel_id: ParcelId,
        previous_chute: ChuteId,
        new_chute: ChuteId,
        requested_at: DateTime<Utc>,
    },
    /// The request changed nothing.
    ChuteChangeIgnored {
        parcel_id: ParcelId,
        requested_chute: ChuteId,
        reason: &'static str,
        requested_at: DateTime<Utc>,
    },
    /// The request was refused.
    ChuteChangeRejected {
        parcel_id: ParcelId,
        requested_chute: ChuteId,
        reason: &'static str,
        requested_at: DateTime<Utc>,
    },
}

/// Errors from invalid state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutePlanError {
    /// The requested transition is not allowed from the current state.
    #[error("invalid transition to {attempted} from {from:?}")]
    InvalidState {
        /// State the plan was in.
        from: RoutePlanStatus,
        /// Transition that was attempted.
        attempted: &'static str,
    },
}

/// Routing state machine for one parcel.
///
/// The current target chute mutates only via
/// [`try_apply_chute_change`](Self::try_apply_chute_change), only while the
/// plan is `Created` or `Executing`, and only before the replan deadline
/// when one is set.
#[derive(Clone, Debug)]
pub struct RoutePlan {
    parcel_id: ParcelId,
    initial_target_chute: ChuteId,
    current_target_chute: ChuteId,
    status: RoutePlanStatus,
    created_at: DateTime<Utc>,
    last_modified_at: DateTime<Utc>,
    replan_deadline: Option<DateTime<Utc>>,
    chute_change_count: u32,
    events: Vec<RoutePlanEvent>,
}

impl RoutePlan {
    /// Creates a plan in the `Created` state.
    ///
    /// `deadline`, when set, is the last instant at which a destination
    /// change will still be accepted.
    pub fn create(
        parcel_id: ParcelId,
        target_chute: ChuteId,
        created_at: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            parcel_id,
            initial_target_chute: target_chute,
            current_target_chute: target_chute,
            status: RoutePlanStatus::Created,
            created_at,
            last_modified_at: created_at,
            replan_deadline: deadline,
            chute_change_count: 0,
            events: Vec::new(),
        }
    }

    /// The parcel this plan routes.
    pub fn parcel_id(&self) -> ParcelId {
        self.parcel_id
    }

    /// Destination the plan was created with.
    pub fn initial_target_chute(&self) -> ChuteId {
        self.initial_target_chute
    }

    /// Current destination.
    pub fn current_target_chute(&self) -> ChuteId {
        self.current_target_chute
    }

    /// Current lifecycle state.
    pub fn status(&self) -> RoutePlanStatus {
        self.status
    }

    /// When the plan was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the plan last changed.
    pub fn last_modified_at(&self) -> DateTime<Utc> {
        self.last_modified_at
    }

    /// Deadline past which destination changes are rejected, if any.
    pub fn replan_deadline(&self) -> Option<DateTime<Utc>> {
        self.replan_deadline
    }

    /// Number of accepted destination changes.
    pub fn chute_change_count(&self) -> u32 {
        self.chute_change_count
    }

    /// Drains the emitted domain events.
    pub fn take_events(&mut self) -> Vec<RoutePlanEvent> {
        std::mem::take(&mut self.events)
    }

    /// Marks physical execution as started.
    ///
    /// # Errors
    ///
    /// Returns [`RoutePlanError::InvalidState`] unless the plan is `Created`.
    pub fn mark_executing(&mut self, at: DateTime<Utc>) -> Result<(), RoutePlanError> {
        if self.status != RoutePlanStatus::Created {
            return Err(RoutePlanError::InvalidState {
                from: self.status,
                attempted: "Executing",
            });
        }
        self.status = RoutePlanStatus::Executing;
        self.last_modified_at = at;
        Ok(())
    }

    /// Marks the parcel as sorted to its target. Idempotent terminal: a
    /// second call leaves the state and timestamp from the first.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        if self.status == RoutePlanStatus::Completed {
            return;
        }
        self.status = RoutePlanStatus::Completed;
        self.last_modified_at = at;
    }

    /// Marks the parcel as exception-routed. No-op if the plan is already
    /// `ExceptionRouted` or `Completed`.
    pub fn mark_exception_routed(&mut self, at: DateTime<Utc>) {
        if matches!(
            self.status,
            RoutePlanStatus::ExceptionRouted | RoutePlanStatus::Completed
        ) {
            return;
        }
        self.status = RoutePlanStatus::ExceptionRouted;
        self.last_modified_at = at;
    }

    /// Marks the plan as failed. Unconditional override from any state for
    /// conditions that make further state meaningless; not idempotent-guarded.
    pub fn mark_failed(&mut self, at: DateTime<Utc>) {
        self.status = RoutePlanStatus::Failed;
        self.last_modified_at = at;
    }

    /// Arbitrates a destination-change request.
    ///
    /// A `ChuteChangeRequested` event is always emitted first, then the
    /// request is evaluated in fixed priority:
    ///
    /// 1. `Completed` → ignored (already completed)
    /// 2. `ExceptionRouted` → ignored (already exception-routed)
    /// 3. `Failed` → rejected (invalid state)
    /// 4. past the replan deadline → rejected (too late)
    /// 5. otherwise → accepted
    pub fn try_apply_chute_change(
        &mut self,
        requested_chute: ChuteId,
        requested_at: DateTime<Utc>,
    ) -> ChuteChangeDecision {
        self.events.push(RoutePlanEvent::ChuteChangeRequested {
            parcel_id: self.parcel_id,
            current_chute: self.current_target_chute,
            requested_chute,
            requested_at,
        });

        let decision = match self.status {
            RoutePlanStatus::Completed => ChuteChangeDecision::Ignored {
                reason: "already completed",
            },
            RoutePlanStatus::ExceptionRouted => ChuteChangeDecision::Ignored {
                reason: "already exception-routed",
            },
            RoutePlanStatus::Failed => ChuteChangeDecision::Rejected {
                reason: "plan failed",
            },
            RoutePlanStatus::Created | RoutePlanStatus::Executing => {
                match self.replan_deadline {
                    Some(deadline) if requested_at > deadline => ChuteChangeDecision::Rejected {
                        reason: "too late",
                    },
                    _ => ChuteChangeDecision::Accepted,
                }
            }
        };

        match &decision {
            ChuteChangeDecision::Accepted => {
                let previous = self.current_target_chute;
                self.current_target_chute = requested_chute;
                self.chute_change_count += 1;
                self.last_modified_at = requested_at;
                self.events.push(RoutePlanEvent::ChuteChangeAccepted {
                    parcel_id: self.parcel_id,
                    previous_chute: previous,
                    new_chute: requested_chute,
                    requested_at,
                });
            }
            ChuteChangeDecision::Ignored { reason } => {
                self.events.push(RoutePlanEvent::ChuteChangeIgnored {
                    parcel_id: self.parcel_id,
                    requested_chute,
                    reason,
                    requested_at,
                });
            }
            ChuteChangeDecision::Rejected { reason } => {
                self.events.push(RoutePlanEvent::ChuteChangeRejected {
                    parcel_id: self.parcel_id,
                    requested_chute,
                    reason,
                    requested_at,
                });
            }
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn plan_at(t0: DateTime<Utc>, deadline: Option<DateTime<Utc>>) -> RoutePlan {
        RoutePlan::create(ParcelId::new(1), ChuteId::new(5), t0, deadline)
    }

    #[test]
    fn test_create_initial_state() {
        let t0 = Utc::now();
        let plan = plan_at(t0, None);

        assert_eq!(plan.status(), RoutePlanStatus::Created);
        assert_eq!(plan.initial_target_chute(), ChuteId::new(5));
        assert_eq!(plan.current_target_chute(), ChuteId::new(5));
        assert_eq!(plan.chute_change_count(), 0);
        assert_eq!(plan.created_at(), t0);
        assert_eq!(plan.last_modified_at(), t0);
    }

    #[test]
    fn test_mark_executing_requires_created() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);

        assert!(plan.mark_executing(t0).is_ok());
        assert_eq!(plan.status(), RoutePlanStatus::Executing);

        let err = plan.mark_executing(t0).unwrap_err();
        assert_eq!(
            err,
            RoutePlanError::InvalidState {
                from: RoutePlanStatus::Executing,
                attempted: "Executing",
            }
        );
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);

        let t1 = t0 + Duration::seconds(1);
        plan.mark_completed(t1);
        assert_eq!(plan.status(), RoutePlanStatus::Completed);
        assert_eq!(plan.last_modified_at(), t1);

        // Second call leaves status and timestamp from the first
        plan.mark_completed(t1 + Duration::seconds(5));
        assert_eq!(plan.status(), RoutePlanStatus::Completed);
        assert_eq!(plan.last_modified_at(), t1);
    }

    #[test]
    fn test_mark_exception_routed_noop_after_completion() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);

        let t1 = t0 + Duration::seconds(1);
        plan.mark_completed(t1);
        plan.mark_exception_routed(t1 + Duration::seconds(1));
        assert_eq!(plan.status(), RoutePlanStatus::Completed);
        assert_eq!(plan.last_modified_at(), t1);
    }

    #[test]
    fn test_mark_exception_routed_is_idempotent() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);

        let t1 = t0 + Duration::seconds(1);
        plan.mark_exception_routed(t1);
        assert_eq!(plan.status(), RoutePlanStatus::ExceptionRouted);

        plan.mark_exception_routed(t1 + Duration::seconds(2));
        assert_eq!(plan.last_modified_at(), t1);
    }

    #[test]
    fn test_mark_failed_always_overwrites() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);

        let t1 = t0 + Duration::seconds(1);
        plan.mark_completed(t1);

        let t2 = t1 + Duration::seconds(1);
        plan.mark_failed(t2);
        assert_eq!(plan.status(), RoutePlanStatus::Failed);
        assert_eq!(plan.last_modified_at(), t2);

        // Not idempotent-guarded: a repeat call stamps again
        let t3 = t2 + Duration::seconds(1);
        plan.mark_failed(t3);
        assert_eq!(plan.last_modified_at(), t3);
    }

    #[test]
    fn test_change_accepted_updates_target() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);

        let t1 = t0 + Duration::seconds(1);
        let decision = plan.try_apply_chute_change(ChuteId::new(7), t1);
        assert!(decision.accepted());
        assert_eq!(plan.current_target_chute(), ChuteId::new(7));
        assert_eq!(plan.initial_target_chute(), ChuteId::new(5));
        assert_eq!(plan.chute_change_count(), 1);
        assert_eq!(plan.last_modified_at(), t1);
    }

    #[test]
    fn test_change_accepted_while_executing() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);
        plan.mark_executing(t0).unwrap();

        let decision = plan.try_apply_chute_change(ChuteId::new(9), t0 + Duration::seconds(1));
        assert!(decision.accepted());
        assert_eq!(plan.current_target_chute(), ChuteId::new(9));
    }

    #[test]
    fn test_change_ignored_after_completed() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);
        plan.mark_completed(t0 + Duration::seconds(1));

        let decision = plan.try_apply_chute_change(ChuteId::new(7), t0 + Duration::seconds(2));
        assert_eq!(
            decision,
            ChuteChangeDecision::Ignored {
                reason: "already completed"
            }
        );
        assert_eq!(plan.current_target_chute(), ChuteId::new(5));
    }

    #[test]
    fn test_change_ignored_after_exception_routed() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);
        plan.mark_exception_routed(t0 + Duration::seconds(1));

        let decision = plan.try_apply_chute_change(ChuteId::new(7), t0 + Duration::seconds(2));
        assert_eq!(
            decision,
            ChuteChangeDecision::Ignored {
                reason: "already exception-routed"
            }
        );
        assert_eq!(plan.current_target_chute(), ChuteId::new(5));
    }

    #[test]
    fn test_change_rejected_after_failed() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);
        plan.mark_failed(t0 + Duration::seconds(1));

        let decision = plan.try_apply_chute_change(ChuteId::new(7), t0 + Duration::seconds(2));
        assert_eq!(
            decision,
            ChuteChangeDecision::Rejected {
                reason: "plan failed"
            }
        );
        assert_eq!(plan.current_target_chute(), ChuteId::new(5));
    }

    #[test]
    fn test_change_rejected_past_deadline() {
        // Spec scenario: plan(parcel=1, target=5, deadline=t0+1s),
        // change to 7 at t0+2s ⇒ rejected "too late", target still 5.
        let t0 = Utc::now();
        let mut plan = plan_at(t0, Some(t0 + Duration::seconds(1)));

        let decision = plan.try_apply_chute_change(ChuteId::new(7), t0 + Duration::seconds(2));
        assert_eq!(decision, ChuteChangeDecision::Rejected { reason: "too late" });
        assert_eq!(plan.current_target_chute(), ChuteId::new(5));
        assert_eq!(plan.chute_change_count(), 0);
    }

    #[test]
    fn test_change_at_exact_deadline_is_accepted() {
        let t0 = Utc::now();
        let deadline = t0 + Duration::seconds(1);
        let mut plan = plan_at(t0, Some(deadline));

        // requested_at > deadline rejects; equality still accepts
        assert!(plan.try_apply_chute_change(ChuteId::new(7), deadline).accepted());
    }

    #[test]
    fn test_terminal_priority_completed_before_failed_check() {
        // Completed is evaluated before Failed, so a completed-then-failed
        // plan reports "plan failed" only if status is actually Failed.
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);
        plan.mark_completed(t0);
        plan.mark_failed(t0 + Duration::seconds(1));

        let decision = plan.try_apply_chute_change(ChuteId::new(7), t0 + Duration::seconds(2));
        assert_eq!(
            decision,
            ChuteChangeDecision::Rejected {
                reason: "plan failed"
            }
        );
    }

    #[test]
    fn test_events_requested_always_first() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);
        plan.mark_completed(t0);

        plan.try_apply_chute_change(ChuteId::new(7), t0 + Duration::seconds(1));
        let events = plan.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            RoutePlanEvent::ChuteChangeRequested { .. }
        ));
        assert!(matches!(
            events[1],
            RoutePlanEvent::ChuteChangeIgnored { .. }
        ));
    }

    #[test]
    fn test_take_events_clears() {
        let t0 = Utc::now();
        let mut plan = plan_at(t0, None);

        plan.try_apply_chute_change(ChuteId::new(7), t0);
        assert_eq!(plan.take_events().len(), 2);
        assert!(plan.take_events().is_empty());
    }
}
