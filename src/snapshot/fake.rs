//! In-memory [`SnapshotStore`] for unit tests.

use anyhow::{Result, bail};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use super::SnapshotStore;
use crate::scoring::FileDelta;

type Tree = BTreeMap<String, String>;

#[derive(Default)]
pub(crate) struct FakeStore {
    files: RefCell<Tree>,
    snapshots: RefCell<Vec<Tree>>,
    branch: RefCell<String>,
    head: RefCell<Option<String>>,
    head_tree: RefCell<Option<String>>,
    commits: Cell<u32>,
    history_rewritten: Cell<bool>,
    pub fail_capture: Cell<bool>,
    pub fail_diff: Cell<bool>,
}

impl FakeStore {
    pub fn on_branch(branch: &str) -> Self {
        let store = Self::default();
        store.set_branch(branch);
        store
    }

    pub fn set_branch(&self, branch: &str) {
        *self.branch.borrow_mut() = branch.to_string();
    }

    /// Write `lines` lines of distinct content to `path`.
    pub fn write_lines(&self, path: &str, lines: u32) {
        let body: String = (0..lines).map(|i| format!("{path} line {i}\n")).collect();
        self.files.borrow_mut().insert(path.to_string(), body);
    }

    /// Append `lines` lines to `path`, creating it if needed.
    pub fn append_lines(&self, path: &str, lines: u32) {
        let mut files = self.files.borrow_mut();
        let body = files.entry(path.to_string()).or_default();
        let start = body.lines().count();
        for i in 0..lines as usize {
            body.push_str(&format!("{path} appended {}\n", start + i));
        }
    }

    pub fn remove(&self, path: &str) {
        self.files.borrow_mut().remove(path);
    }

    /// Record the working tree as a new HEAD commit.
    pub fn commit(&self) {
        let tree = self.snapshot_id(&self.files.borrow().clone());
        let n = self.commits.get() + 1;
        self.commits.set(n);
        *self.head.borrow_mut() = Some(format!("commit-{n}"));
        *self.head_tree.borrow_mut() = Some(tree);
    }

    /// Make the current HEAD unrelated to every earlier commit.
    pub fn rewrite_history(&self) {
        self.history_rewritten.set(true);
        let n = self.commits.get() + 1;
        self.commits.set(n);
        *self.head.borrow_mut() = Some(format!("commit-{n}"));
    }

    fn snapshot_id(&self, tree: &Tree) -> String {
        let mut snapshots = self.snapshots.borrow_mut();
        let idx = match snapshots.iter().position(|t| t == tree) {
            Some(idx) => idx,
            None => {
                snapshots.push(tree.clone());
                snapshots.len() - 1
            }
        };
        format!("tree-{idx}")
    }

    fn lookup(&self, id: &str) -> Result<Tree> {
        let idx: usize = match id.strip_prefix("tree-").and_then(|n| n.parse().ok()) {
            Some(idx) => idx,
            None => bail!("unknown snapshot {id}"),
        };
        match self.snapshots.borrow().get(idx) {
            Some(tree) => Ok(tree.clone()),
            None => bail!("unknown snapshot {id}"),
        }
    }
}

fn line_counts(body: &str) -> HashMap<&str, u32> {
    let mut counts = HashMap::new();
    for line in body.lines() {
        *counts.entry(line).or_insert(0) += 1;
    }
    counts
}

/// Lines in `b` beyond what `a` already has.
fn surplus(a: &HashMap<&str, u32>, b: &HashMap<&str, u32>) -> u32 {
    b.iter()
        .map(|(line, n)| n.saturating_sub(a.get(line).copied().unwrap_or(0)))
        .sum()
}

impl SnapshotStore for FakeStore {
    fn capture(&self) -> Result<String> {
        if self.fail_capture.get() {
            bail!("capture failed");
        }
        let files = self.files.borrow().clone();
        Ok(self.snapshot_id(&files))
    }

    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileDelta>> {
        if self.fail_diff.get() {
            bail!("diff failed");
        }
        let (old, new) = (self.lookup(from)?, self.lookup(to)?);
        let mut deltas = Vec::new();
        for (path, body) in &new {
            match old.get(path) {
                Some(prev) if prev == body => {}
                Some(prev) => {
                    let (a, b) = (line_counts(prev), line_counts(body));
                    deltas.push(FileDelta {
                        path: path.clone(),
                        additions: surplus(&a, &b),
                        deletions: surplus(&b, &a),
                        is_new: false,
                        is_binary: false,
                    });
                }
                None => deltas.push(FileDelta {
                    path: path.clone(),
                    additions: body.lines().count() as u32,
                    deletions: 0,
                    is_new: true,
                    is_binary: false,
                }),
            }
        }
        for (path, body) in &old {
            if !new.contains_key(path) {
                deltas.push(FileDelta {
                    path: path.clone(),
                    additions: 0,
                    deletions: body.lines().count() as u32,
                    is_new: false,
                    is_binary: false,
                });
            }
        }
        Ok(deltas)
    }

    fn current_branch(&self) -> String {
        self.branch.borrow().clone()
    }

    fn head(&self) -> Option<String> {
        self.head.borrow().clone()
    }

    fn head_tree(&self) -> Result<String> {
        match self.head_tree.borrow().clone() {
            Some(tree) => Ok(tree),
            None => bail!("no HEAD commit"),
        }
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        ancestor == descendant || !self.history_rewritten.get()
    }
}
