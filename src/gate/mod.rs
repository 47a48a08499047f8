//! The threshold gate: decides at each checkpoint whether the agent may keep
//! going, based on the review burden accumulated since the last baseline.
//!
//! Every checkpoint shares one primitive, [`ThresholdGate::advance`]: capture
//! the working tree, score the delta since `previous_ref`, fold it into the
//! running total and move the cursor forward. Any failure along the way
//! allows the action; the gate never blocks because of its own errors.

use anyhow::{Context, Result};

use crate::messages::{self, FuelTier};
use crate::reset::ResetController;
use crate::scoring::{self, WeightedScore};
use crate::snapshot::SnapshotStore;
use crate::state::{SessionState, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Before a file-modifying tool runs.
    PreEdit,
    /// After a file-modifying tool ran.
    PostEdit,
    /// The agent wants to end its turn. `reentrant` is set when the agent is
    /// already continuing because of an earlier stop block.
    Stop { reentrant: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Refuse a pre-edit tool call.
    Deny,
    /// Refuse to let the agent stop.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub message: Option<String>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            message: None,
        }
    }

    pub fn allow_with(message: String) -> Self {
        Self {
            decision: Decision::Allow,
            message: Some(message),
        }
    }

    fn deny(message: String) -> Self {
        Self {
            decision: Decision::Deny,
            message: Some(message),
        }
    }

    fn block(message: String) -> Self {
        Self {
            decision: Decision::Block,
            message: Some(message),
        }
    }
}

pub struct ThresholdGate<'a, S: SnapshotStore> {
    snapshots: &'a S,
    states: &'a StateStore,
    resets: ResetController<'a, S>,
}

impl<'a, S: SnapshotStore> ThresholdGate<'a, S> {
    pub fn new(snapshots: &'a S, states: &'a StateStore) -> Self {
        Self {
            snapshots,
            states,
            resets: ResetController::new(snapshots, states),
        }
    }

    pub fn check(&self, session_id: &str, checkpoint: Checkpoint) -> Verdict {
        tracing::debug!(?checkpoint, "gate check");
        let verdict = match checkpoint {
            Checkpoint::PreEdit => self.pre_edit(session_id),
            Checkpoint::PostEdit => self.post_edit(session_id),
            Checkpoint::Stop { reentrant } => self.stop(session_id, reentrant),
        };
        tracing::debug!(?checkpoint, decision = ?verdict.decision, "gate verdict");
        verdict
    }

    /// Load the session if it is one the gate should act on.
    fn active_session(&self, session_id: &str) -> Option<SessionState> {
        let state = match self.states.load(session_id) {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::debug!("no session state, allowing");
                return None;
            }
            Err(err) => {
                tracing::warn!("loading session state: {err:#}");
                return None;
            }
        };
        if state.paused || state.enforcement_disabled() {
            return None;
        }
        Some(state)
    }

    fn capture(&self) -> Option<String> {
        self.snapshots
            .capture()
            .map_err(|err| tracing::warn!("capturing working tree: {err:#}"))
            .ok()
    }

    /// Score `previous_ref -> current`, add it to the running total, and
    /// move `previous_ref` to `current`. Returns the updated state.
    fn advance(&self, state: &SessionState, current: &str) -> Result<SessionState> {
        if current == state.previous_ref {
            return Ok(state.clone());
        }
        let deltas = self.snapshots.diff(&state.previous_ref, current)?;
        let delta = scoring::calculate(&deltas);
        let updated = self
            .states
            .update_incremental(&state.session_id, &state.previous_ref, current, delta.score)?
            .context("session state disappeared")?;
        if updated.previous_ref != current {
            tracing::info!(delta = delta.score, "cursor moved during checkpoint, delta dropped");
        }
        tracing::debug!(
            delta = delta.score,
            files = delta.files_touched,
            total = updated.accumulated_score,
            "incremental score"
        );
        Ok(updated)
    }

    fn pre_edit(&self, session_id: &str) -> Verdict {
        let Some(state) = self.active_session(session_id) else {
            return Verdict::allow();
        };
        let Some(current) = self.capture() else {
            return Verdict::allow();
        };

        if state.stop_triggered {
            match self.resets.reset_if_committed_externally(&state, &current) {
                Ok(Some(notice)) => return Verdict::allow_with(notice),
                Ok(None) => {}
                Err(err) => tracing::warn!("external commit recovery: {err:#}"),
            }
        }

        let state = match self.advance(&state, &current) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!("scoring pre-edit: {err:#}");
                return Verdict::allow();
            }
        };

        // Edits stay allowed until the stop checkpoint has fired once.
        if state.stop_triggered && state.over_threshold() {
            Verdict::deny(messages::pre_edit_deny(
                state.accumulated_score,
                state.threshold_limit,
            ))
        } else {
            Verdict::allow()
        }
    }

    fn post_edit(&self, session_id: &str) -> Verdict {
        let Some(state) = self.active_session(session_id) else {
            return Verdict::allow();
        };
        let Some(current) = self.capture() else {
            return Verdict::allow();
        };
        let state = match self.advance(&state, &current) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!("scoring post-edit: {err:#}");
                return Verdict::allow();
            }
        };

        let pct = scoring::percentage(state.accumulated_score, state.threshold_limit);
        let tier = FuelTier::for_percentage(pct);
        match messages::fuel_gauge(tier, state.accumulated_score, state.threshold_limit) {
            Some(message) => Verdict::allow_with(message),
            None => Verdict::allow(),
        }
    }

    fn stop(&self, session_id: &str, reentrant: bool) -> Verdict {
        if reentrant {
            return Verdict::allow();
        }
        let Some(_lock) = self.states.try_stop_lock(session_id) else {
            tracing::debug!("stop checkpoint already running for this session");
            return Verdict::allow();
        };
        let Some(state) = self.active_session(session_id) else {
            return Verdict::allow();
        };
        let Some(current) = self.capture() else {
            return Verdict::allow();
        };

        match self.resets.reset_if_stale(&state, &current) {
            Ok(Some(notice)) => return Verdict::allow_with(notice),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("resetting stale baseline: {err:#}");
                return Verdict::allow();
            }
        }

        let state = match self.advance(&state, &current) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!("scoring stop: {err:#}");
                return Verdict::allow();
            }
        };
        if !state.over_threshold() {
            return Verdict::allow();
        }

        if !state.stop_triggered {
            if let Err(err) = self.states.set_stop_triggered(session_id, true) {
                tracing::warn!("recording stop trigger: {err:#}");
            }
        }
        let breakdown = self.breakdown_since_baseline(&state, &current);
        tracing::info!(
            score = state.accumulated_score,
            limit = state.threshold_limit,
            "threshold exceeded, blocking stop"
        );
        Verdict::block(messages::stop_block(
            state.accumulated_score,
            state.threshold_limit,
            breakdown.as_ref(),
        ))
    }

    /// Score of everything since the baseline, for display only.
    fn breakdown_since_baseline(
        &self,
        state: &SessionState,
        current: &str,
    ) -> Option<WeightedScore> {
        match self.snapshots.diff(&state.baseline_ref, current) {
            Ok(deltas) => Some(scoring::calculate(&deltas)),
            Err(err) => {
                tracing::debug!("breakdown diff: {err:#}");
                None
            }
        }
    }
}
