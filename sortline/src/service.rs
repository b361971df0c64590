//! End-to-end routing flow.
//!
//! [`RoutingService`] ties the subsystem together: a detected parcel gets a
//! tracking record and upstream notice, the selection router produces a
//! destination, the topology lookup builds a switching path, the concurrent
//! executor performs it, and the outcome is recorded on the plan and the
//! tracking record and reported upstream. Chute-change requests from the
//! decision system are arbitrated against the parcel's live plan.
//!
//! Every failure mode ends with the parcel physically routed somewhere: a
//! missing path, a selection fallback, or an execution failure all resolve
//! to the exception or fallback chute, never to an indefinite wait.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TimeoutOptions;
use crate::executor::{ConcurrentSwitchingPathExecutor, PathExecutionResult};
use crate::route_plan::{ChuteChangeDecision, RoutePlan, RoutePlanEvent};
use crate::selection::{ChuteSelectionRouter, SelectionRequest};
use crate::topology::TopologyLookup;
use crate::tracking::{ParcelTrackingRecord, ParcelTrackingStore};
use crate::types::{ChuteId, ParcelId};
use crate::upstream::{SortingOutcome, SortingReport, UpstreamClient};

/// Coordinates the detected → selected → executed → recorded flow.
pub struct RoutingService {
    selector: ChuteSelectionRouter,
    topology: Arc<dyn TopologyLookup>,
    executor: Arc<ConcurrentSwitchingPathExecutor>,
    upstream: Arc<dyn UpstreamClient>,
    store: Arc<ParcelTrackingStore>,
    clock: Arc<dyn Clock>,
    exception_chute: ChuteId,
    replan_deadline_ms: Option<u64>,
    plans: DashMap<ParcelId, RoutePlan>,
}

impl RoutingService {
    /// Wires the service from its collaborators.
    ///
    /// The replan deadline applied to new plans comes from
    /// [`TimeoutOptions::replan_deadline_ms`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        selector: ChuteSelectionRouter,
        topology: Arc<dyn TopologyLookup>,
        executor: Arc<ConcurrentSwitchingPathExecutor>,
        upstream: Arc<dyn UpstreamClient>,
        store: Arc<ParcelTrackingStore>,
        clock: Arc<dyn Clock>,
        exception_chute: ChuteId,
        timeouts: &TimeoutOptions,
    ) -> Self {
        Self {
            selector,
            topology,
            executor,
            upstream,
            store,
            clock,
            exception_chute,
            replan_deadline_ms: timeouts.replan_deadline_ms,
            plans: DashMap::new(),
        }
    }

    /// Handles one detected parcel from selection through execution.
    ///
    /// Always returns a result naming the chute the parcel physically went
    /// to, even when routing degraded to the exception or fallback chute.
    pub async fn handle_detected(
        &self,
        request: SelectionRequest,
        cancel: &CancellationToken,
    ) -> PathExecutionResult {
        let parcel_id = request.parcel_id;
        let now = self.clock.now();
        debug!(parcel_id = %parcel_id, "parcel detected");

        self.store
            .insert(ParcelTrackingRecord::detected(parcel_id, now));

        if let Err(err) = self.upstream.notify_detected(parcel_id).await {
            warn!(parcel_id = %parcel_id, error = %err, "detection notice failed");
        }

        let selection = self.selector.select(&request, cancel).await;
        if selection.exception {
            info!(
                parcel_id = %parcel_id,
                chute = %selection.chute,
                reason = selection.reason.as_deref().unwrap_or("unknown"),
                "selection fell back to exception chute"
            );
        }

        let selected_at = self.clock.now();
        self.store
            .mark_assigned(parcel_id, selection.chute, selected_at);

        let deadline = self
            .replan_deadline_ms
            .map(|ms| selected_at + ChronoDuration::milliseconds(ms as i64));
        self.plans.insert(
            parcel_id,
            RoutePlan::create(parcel_id, selection.chute, selected_at, deadline),
        );

        let target = self.current_target(parcel_id).unwrap_or(selection.chute);
        let Some(path) = self.topology.resolve(target) else {
            warn!(parcel_id = %parcel_id, target = %target, "no path to target chute");
            return self
                .finish_exception(parcel_id, self.exception_chute, "no path to target chute")
                .await;
        };

        {
            let now = self.clock.now();
            if let Some(mut plan) = self.plans.get_mut(&parcel_id) {
                if let Err(err) = plan.mark_executing(now) {
                    warn!(parcel_id = %parcel_id, error = %err, "plan not executable");
                    drop(plan);
                    return self
                        .finish_exception(parcel_id, path.fallback_chute, "plan not executable")
                        .await;
                }
            }
        }
        self.store.mark_routing(parcel_id, self.clock.now());

        let result = self.executor.execute(&path, cancel).await;
        let finished_at = self.clock.now();

        if result.success {
            if let Some(mut plan) = self.plans.get_mut(&parcel_id) {
                plan.mark_completed(finished_at);
            }
            self.store
                .mark_sorted(parcel_id, result.actual_chute, finished_at);
            self.report(SortingReport {
                parcel_id,
                outcome: SortingOutcome::Sorted,
                chute: result.actual_chute,
                reason: None,
            })
            .await;
            result
        } else {
            let reason = result
                .reason
                .clone()
                .unwrap_or_else(|| "execution failed".to_string());
            self.finish_exception(parcel_id, result.actual_chute, &reason)
                .await
        }
    }

    /// Arbitrates an upstream destination-change request against the
    /// parcel's live plan.
    ///
    /// Returns `None` when no plan exists for the parcel.
    pub fn request_chute_change(
        &self,
        parcel_id: ParcelId,
        requested_chute: ChuteId,
    ) -> Option<ChuteChangeDecision> {
        let now = self.clock.now();
        let mut plan = self.plans.get_mut(&parcel_id)?;
        let decision = plan.try_apply_chute_change(requested_chute, now);
        debug!(
            parcel_id = %parcel_id,
            requested_chute = %requested_chute,
            decision = ?decision,
            "chute change arbitrated"
        );
        Some(decision)
    }

    /// Current destination of a parcel's plan.
    pub fn current_target(&self, parcel_id: ParcelId) -> Option<ChuteId> {
        self.plans.get(&parcel_id).map(|p| p.current_target_chute())
    }

    /// Drains the audit events accumulated on a parcel's plan.
    pub fn drain_plan_events(&self, parcel_id: ParcelId) -> Vec<RoutePlanEvent> {
        self.plans
            .get_mut(&parcel_id)
            .map(|mut p| p.take_events())
            .unwrap_or_default()
    }

    async fn finish_exception(
        &self,
        parcel_id: ParcelId,
        chute: ChuteId,
        reason: &str,
    ) -> PathExecutionResult {
        let now = self.clock.now();
        if let Some(mut plan) = self.plans.get_mut(&parcel_id) {
            plan.mark_exception_routed(now);
        }
        self.store.update(parcel_id, |r| {
            r.target_chute = Some(chute);
            r.last_seen_at = now;
        });
        self.report(SortingReport {
            parcel_id,
            outcome: SortingOutcome::Exception,
            chute,
            reason: Some(reason.to_string()),
        })
        .await;
        PathExecutionResult::fallback(chute, reason)
    }

    async fn report(&self, report: SortingReport) {
        let parcel_id = report.parcel_id;
        if let Err(err) = self.upstream.notify_sorting_completed(report).await {
            warn!(parcel_id = %parcel_id, error = %err, "completion report failed");
        }
    }
}
