use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::snapshot::Baseline;

/// Directory under the git dir that holds every session record.
pub const CHECKPOINT_DIR: &str = "bumper-checkpoints";

/// Session record count at which session start nags about cleanup.
pub const CHECKPOINT_WARNING_THRESHOLD: usize = 100;

/// A stop lock older than this is treated as abandoned by a killed process.
const STOP_LOCK_STALE_AFTER: Duration = Duration::from_secs(60);

/// Persisted per-session review state.
/// Stored as `<git-dir>/bumper-checkpoints/session-{session_id}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Snapshot of the last reviewed state.
    pub baseline_ref: String,
    /// Branch at baseline capture; only used to detect branch switches.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub baseline_branch: String,
    /// HEAD commit at baseline capture; only used to detect history that
    /// no longer contains the baseline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_head: Option<String>,
    /// Snapshot as of the last checkpoint.
    pub previous_ref: String,
    pub accumulated_score: u32,
    pub threshold_limit: u32,
    pub stop_triggered: bool,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: &str, baseline: Baseline, threshold_limit: u32) -> Self {
        Self {
            session_id: session_id.to_string(),
            previous_ref: baseline.tree.clone(),
            baseline_ref: baseline.tree,
            baseline_branch: baseline.branch,
            baseline_head: baseline.head,
            accumulated_score: 0,
            threshold_limit,
            stop_triggered: false,
            paused: false,
            created_at: Utc::now(),
        }
    }

    /// A zero limit switches enforcement off.
    pub fn enforcement_disabled(&self) -> bool {
        self.threshold_limit == 0
    }

    pub fn over_threshold(&self) -> bool {
        !self.enforcement_disabled() && self.accumulated_score > self.threshold_limit
    }

    /// Accept `new_ref` as reviewed. The branch is only replaced when a
    /// non-empty name is given.
    pub fn reset_baseline(&mut self, new_ref: &str, new_branch: &str, new_head: Option<String>) {
        self.baseline_ref = new_ref.to_string();
        self.previous_ref = new_ref.to_string();
        self.accumulated_score = 0;
        self.stop_triggered = false;
        if !new_branch.is_empty() {
            self.baseline_branch = new_branch.to_string();
        }
        if new_head.is_some() {
            self.baseline_head = new_head;
        }
    }
}

/// Read and deserialize a JSON file, returning `None` if it doesn't exist.
fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let val = serde_json::from_str(&s)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(Some(val))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Remove a file, ignoring "not found" errors.
fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

/// Make a session id safe to embed in a file name. Ids that had to be
/// rewritten get a short digest of the original appended, so `a/b` and
/// `a_b` never share a record.
pub fn sanitize_session_id(session_id: &str) -> String {
    if session_id.is_empty() {
        return "unknown".into();
    }
    let sanitized: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized == session_id {
        return sanitized;
    }
    let digest = format!("{:x}", Sha256::digest(session_id.as_bytes()));
    format!("{sanitized}-{}", &digest[..8])
}

/// File-backed store of session records, one JSON file per session.
///
/// Every write goes through a temp file in the same directory followed by a
/// rename, so readers never observe a partial record. Concurrent writers
/// are last-write-wins.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The store for a repository, scoped to its git dir (and therefore to
    /// the worktree).
    pub fn for_git_dir(git_dir: &Path) -> Self {
        Self::new(git_dir.join(CHECKPOINT_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("session-{}.json", sanitize_session_id(session_id)))
    }

    fn stop_lock_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("stop-{}.lock", sanitize_session_id(session_id)))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))
    }

    /// Load the record for `session_id`; `None` if there isn't one.
    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>> {
        read_json_file(&self.state_path(session_id))
    }

    /// Atomically write `state`.
    pub fn save(&self, state: &SessionState) -> Result<()> {
        self.ensure_dir()?;
        let path = self.state_path(&state.session_id);
        let json = serde_json::to_string_pretty(state).context("serializing session state")?;

        let mut tmp = tempfile::Builder::new()
            .prefix("session-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .with_context(|| format!("creating temp file in {}", self.dir.display()))?;
        tmp.write_all(json.as_bytes())
            .context("writing session state")?;
        tmp.as_file()
            .sync_all()
            .context("syncing session state")?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    /// Start a fresh record for `session_id`, replacing any existing one.
    pub fn create(
        &self,
        session_id: &str,
        baseline: Baseline,
        threshold_limit: u32,
    ) -> Result<SessionState> {
        let state = SessionState::new(session_id, baseline, threshold_limit);
        self.save(&state)?;
        Ok(state)
    }

    /// Remove the record for `session_id`, if any.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        remove_if_exists(&self.state_path(session_id))
    }

    /// Load the latest record, apply `f`, save. Returns the updated record,
    /// or `None` when there is no session to mutate.
    pub fn update(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionState),
    ) -> Result<Option<SessionState>> {
        let Some(mut state) = self.load(session_id)? else {
            return Ok(None);
        };
        f(&mut state);
        self.save(&state)?;
        Ok(Some(state))
    }

    pub fn set_stop_triggered(
        &self,
        session_id: &str,
        triggered: bool,
    ) -> Result<Option<SessionState>> {
        self.update(session_id, |s| s.stop_triggered = triggered)
    }

    pub fn set_paused(&self, session_id: &str, paused: bool) -> Result<Option<SessionState>> {
        self.update(session_id, |s| s.paused = paused)
    }

    /// Advance the incremental cursor from `diffed_from` to `new_previous_ref`,
    /// adding `delta` to the stored total. If `previous_ref` is no longer
    /// `diffed_from` (a reset or another checkpoint moved it since the diff
    /// was taken), the record is left as is and the delta is dropped.
    pub fn update_incremental(
        &self,
        session_id: &str,
        diffed_from: &str,
        new_previous_ref: &str,
        delta: u32,
    ) -> Result<Option<SessionState>> {
        let Some(mut state) = self.load(session_id)? else {
            return Ok(None);
        };
        if state.previous_ref != diffed_from {
            return Ok(Some(state));
        }
        state.previous_ref = new_previous_ref.to_string();
        state.accumulated_score = state.accumulated_score.saturating_add(delta);
        self.save(&state)?;
        Ok(Some(state))
    }

    pub fn reset_baseline(
        &self,
        session_id: &str,
        new_ref: &str,
        new_branch: &str,
        new_head: Option<String>,
    ) -> Result<Option<SessionState>> {
        self.update(session_id, |s| s.reset_baseline(new_ref, new_branch, new_head))
    }

    /// Number of session records in the store. Zero on any error.
    pub fn count_sessions(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with("session-") && name.ends_with(".json")
            })
            .count()
    }

    /// Take the per-session stop lock. `None` means another stop checkpoint
    /// holds it (or the lock could not be created).
    pub fn try_stop_lock(&self, session_id: &str) -> Option<StopLock> {
        self.ensure_dir().ok()?;
        let path = self.stop_lock_path(session_id);
        match fs::create_dir(&path) {
            Ok(()) => Some(StopLock { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && lock_is_stale(&path) => {
                let _ = fs::remove_dir(&path);
                fs::create_dir(&path).ok().map(|()| StopLock { path })
            }
            Err(_) => None,
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STOP_LOCK_STALE_AFTER)
}

/// Held for the duration of a stop checkpoint; released on drop.
#[derive(Debug)]
pub struct StopLock {
    path: PathBuf,
}

impl Drop for StopLock {
    fn drop(&mut self) {
        let _ = fs::remove_dir(&self.path);
    }
}
