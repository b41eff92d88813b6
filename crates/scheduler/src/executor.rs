//! Transition executor - one cycle of query, filter and batched write.

use std::collections::HashSet;
use std::sync::Arc;

use lapse_core::{Clock, Family, LifecycleStatus, Malformed, Schedulable, Time, Verdict};
use lapse_storage::{CandidateFilter, EntityStore};
use tracing::{error, info, warn};

/// Precise due set computed from a candidate snapshot.
#[derive(Debug, Clone)]
pub struct DueSet<Id> {
    /// Entities to transition; duplicates collapse
    pub due: HashSet<Id>,
    /// Candidates that could not be evaluated
    pub malformed: Vec<(Id, Malformed)>,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Query and write (if any) succeeded
    Completed,
    /// Candidate query failed; nothing was written
    QueryFailed {
        /// Store error
        error: String,
    },
    /// Batch write failed; nothing was transitioned
    WriteFailed {
        /// Ids the batch tried to move
        attempted: Vec<String>,
        /// Store error
        error: String,
    },
}

/// Summary of one cycle, logged and returned to the caller.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Entity family
    pub family: Family,
    /// Evaluation instant
    pub at: Time,
    /// Candidates returned by the coarse filter
    pub candidates: usize,
    /// Candidates confirmed due
    pub due: usize,
    /// Entities the store actually moved
    pub transitioned: u64,
    /// Candidates skipped as malformed
    pub malformed: usize,
    /// Result
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(family: Family, at: Time) -> Self {
        Self {
            family,
            at,
            candidates: 0,
            due: 0,
            transitioned: 0,
            malformed: 0,
            outcome: CycleOutcome::Completed,
        }
    }

    /// Whether the cycle completed without a store failure.
    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Completed
    }

    /// Emit the per-cycle log line.
    pub fn log(&self) {
        match &self.outcome {
            CycleOutcome::Completed => info!(
                family = %self.family,
                at = %self.at,
                candidates = self.candidates,
                due = self.due,
                transitioned = self.transitioned,
                malformed = self.malformed,
                "cycle complete"
            ),
            CycleOutcome::QueryFailed { error } => error!(
                family = %self.family,
                at = %self.at,
                error = %error,
                "cycle aborted: candidate query failed"
            ),
            CycleOutcome::WriteFailed { attempted, error } => error!(
                family = %self.family,
                at = %self.at,
                candidates = self.candidates,
                due = self.due,
                attempted = ?attempted,
                error = %error,
                "cycle aborted: batch transition failed"
            ),
        }
    }
}

/// Runs cycles against an injected store and clock.
pub struct TransitionExecutor<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> TransitionExecutor<S> {
    /// Create an executor.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Filter a candidate snapshot down to the entities due at `now`.
    pub fn evaluate<E: Schedulable>(candidates: &[E], now: Time) -> DueSet<E::Id> {
        let mut due = HashSet::new();
        let mut malformed = Vec::new();
        for candidate in candidates {
            match candidate.verdict(now) {
                Verdict::Due => {
                    due.insert(candidate.id());
                }
                Verdict::NotDue => {}
                Verdict::Malformed(reason) => malformed.push((candidate.id(), reason)),
            }
        }
        DueSet { due, malformed }
    }

    /// Run one cycle for family `E`.
    ///
    /// Store failures end the cycle and are reported, never propagated; the
    /// next cycle re-queries and retries whatever is still due.
    pub async fn run_cycle<E>(&self) -> CycleReport
    where
        E: Schedulable,
        S: EntityStore<E>,
    {
        let now = self.clock.now();
        let mut report = CycleReport::new(E::FAMILY, now);

        let filter = CandidateFilter::<E::Status>::live_until(now);
        let candidates = match self.store.find_candidates(&filter).await {
            Ok(candidates) => candidates,
            Err(e) => {
                report.outcome = CycleOutcome::QueryFailed { error: e.to_string() };
                report.log();
                return report;
            }
        };
        report.candidates = candidates.len();

        let due_set = Self::evaluate(&candidates, now);
        report.due = due_set.due.len();
        report.malformed = due_set.malformed.len();
        for (id, reason) in &due_set.malformed {
            warn!(family = %E::FAMILY, id = %id, %reason, "skipping malformed entity");
        }

        if !due_set.due.is_empty() {
            let terminal = <E::Status as LifecycleStatus>::TERMINAL;
            match self.store.apply_transition(&due_set.due, terminal).await {
                Ok(moved) => report.transitioned = moved,
                Err(e) => {
                    let mut attempted: Vec<E::Id> = due_set.due.iter().copied().collect();
                    attempted.sort();
                    report.outcome = CycleOutcome::WriteFailed {
                        attempted: attempted.iter().map(ToString::to_string).collect(),
                        error: e.to_string(),
                    };
                }
            }
        }

        report.log();
        report
    }
}
