//! Baseline resets: explicit user resets, auto-resets after commits, and
//! recovery when the repository has moved out from under a baseline.

use anyhow::{Context, Result};

use crate::messages;
use crate::scoring::DiffSummary;
use crate::snapshot::SnapshotStore;
use crate::state::{SessionState, StateStore};

pub struct ResetController<'a, S: SnapshotStore> {
    snapshots: &'a S,
    states: &'a StateStore,
}

impl<'a, S: SnapshotStore> ResetController<'a, S> {
    pub fn new(snapshots: &'a S, states: &'a StateStore) -> Self {
        Self { snapshots, states }
    }

    /// Accept the current working tree as reviewed.
    ///
    /// `threshold` replaces the session's limit when given, so a changed
    /// configuration takes effect on reset. Returns the report shown to the
    /// user, or a no-op notice when there is no session.
    pub fn manual_reset(&self, session_id: &str, threshold: Option<u32>) -> Result<String> {
        let Some(state) = self.states.load(session_id)? else {
            return Ok(format!(
                "No bumper lanes session `{session_id}` in this repository; nothing to reset."
            ));
        };

        let current = self
            .snapshots
            .capture()
            .context("capturing working tree")?;

        let summary = match self.snapshots.diff(&state.baseline_ref, &current) {
            Ok(deltas) => Some(DiffSummary::from_deltas(&deltas)),
            Err(err) => {
                tracing::warn!("diffing accepted changes: {err:#}");
                None
            }
        };

        let branch = self.snapshots.current_branch();
        let head = self.snapshots.head();
        let updated = self
            .states
            .update(session_id, |s| {
                s.reset_baseline(&current, &branch, head);
                if let Some(limit) = threshold {
                    s.threshold_limit = limit;
                }
            })
            .map_err(|err| {
                tracing::error!("persisting reset: {err:#}");
                anyhow::anyhow!("failed to reset baseline, please try again")
            })?
            .context("failed to reset baseline, please try again")?;

        tracing::info!(
            old = %state.baseline_ref,
            new = %current,
            "manual baseline reset"
        );
        Ok(messages::manual_reset(
            &state.baseline_ref,
            &current,
            summary.as_ref(),
            updated.threshold_limit,
        ))
    }

    /// Reset to a freshly committed snapshot. Branch is left as is; HEAD is
    /// refreshed. Never fails: errors are logged and yield `None`.
    pub fn commit_auto_reset(&self, session_id: &str, committed_ref: &str) -> Option<SessionState> {
        match self
            .states
            .reset_baseline(session_id, committed_ref, "", self.snapshots.head())
        {
            Ok(updated) => {
                if updated.is_some() {
                    tracing::info!(committed = %committed_ref, "baseline auto-reset after commit");
                }
                updated
            }
            Err(err) => {
                tracing::warn!("auto-reset after commit: {err:#}");
                None
            }
        }
    }

    /// Auto-reset to the tree HEAD now points at.
    pub fn reset_to_head(&self, session_id: &str) -> Option<SessionState> {
        match self.snapshots.head_tree() {
            Ok(tree) => self.commit_auto_reset(session_id, &tree),
            Err(err) => {
                tracing::debug!("no HEAD tree to reset to: {err:#}");
                None
            }
        }
    }

    /// The baseline belongs to a different branch, or to history HEAD no
    /// longer contains.
    pub fn is_stale(&self, state: &SessionState) -> bool {
        let branch = self.snapshots.current_branch();
        if !state.baseline_branch.is_empty() && !branch.is_empty() && branch != state.baseline_branch
        {
            return true;
        }
        match (state.baseline_head.as_deref(), self.snapshots.head()) {
            (Some(baseline_head), Some(head)) => !self.snapshots.is_ancestor(baseline_head, &head),
            _ => false,
        }
    }

    /// Reset to `current` if the baseline is stale. Returns the notice to
    /// show when a reset happened.
    pub fn reset_if_stale(&self, state: &SessionState, current: &str) -> Result<Option<String>> {
        if !self.is_stale(state) {
            return Ok(None);
        }
        let branch = self.snapshots.current_branch();
        tracing::info!(
            old_branch = %state.baseline_branch,
            new_branch = %branch,
            "stale baseline"
        );
        self.states
            .reset_baseline(&state.session_id, current, &branch, self.snapshots.head())?;
        Ok(Some(messages::stale_baseline(&state.baseline_branch, &branch)))
    }

    /// After a stop block, the user may commit outside the agent. When the
    /// working tree `current` equals the HEAD tree there is nothing left to
    /// review, so reset and report.
    pub fn reset_if_committed_externally(
        &self,
        state: &SessionState,
        current: &str,
    ) -> Result<Option<String>> {
        let head_tree = match self.snapshots.head_tree() {
            Ok(tree) => tree,
            Err(_) => return Ok(None),
        };
        if head_tree != current {
            return Ok(None);
        }
        self.states.reset_baseline(
            &state.session_id,
            current,
            &self.snapshots.current_branch(),
            self.snapshots.head(),
        )?;
        tracing::info!("external commit detected, baseline reset");
        Ok(Some(messages::external_commit_reset()))
    }

    pub fn pause(&self, session_id: &str) -> Result<String> {
        Ok(match self.states.set_paused(session_id, true)? {
            Some(_) => "Bumper lanes paused. Changes are not scored until /bumper-resume.".into(),
            None => no_session(session_id),
        })
    }

    pub fn resume(&self, session_id: &str) -> Result<String> {
        Ok(match self.states.set_paused(session_id, false)? {
            Some(state) => format!(
                "Bumper lanes resumed. Score: {}",
                crate::scoring::format_score(state.accumulated_score, state.threshold_limit)
            ),
            None => no_session(session_id),
        })
    }
}

fn no_session(session_id: &str) -> String {
    format!("No bumper lanes session `{session_id}` in this repository.")
}
