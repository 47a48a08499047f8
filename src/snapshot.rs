use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::scoring::FileDelta;

/// A captured baseline: the snapshot plus the repository position it was
/// taken at, kept for staleness detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub tree: String,
    pub branch: String,
    pub head: Option<String>,
}

/// Content-addressed snapshots of a working tree.
///
/// Every method is fallible or best-effort; callers treat failure as "skip
/// scoring and allow".
pub trait SnapshotStore {
    /// Snapshot the working tree, including untracked files that are not
    /// ignored, without touching the user's staging area.
    fn capture(&self) -> Result<String>;

    /// Per-file changes between two snapshots.
    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileDelta>>;

    /// Current branch name, or "" when detached or unborn.
    fn current_branch(&self) -> String;

    /// Commit id of HEAD, if the repository has one.
    fn head(&self) -> Option<String>;

    /// Tree of the commit HEAD points at.
    fn head_tree(&self) -> Result<String>;

    /// Whether `ancestor` is `descendant` or reachable from it.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool;

    fn capture_baseline(&self) -> Result<Baseline> {
        Ok(Baseline {
            tree: self.capture()?,
            branch: self.current_branch(),
            head: self.head(),
        })
    }
}

pub struct GitSnapshotStore {
    repo: git2::Repository,
}

impl GitSnapshotStore {
    pub fn new(repo: git2::Repository) -> Self {
        Self { repo }
    }

    /// Discover the repository containing `cwd`.
    pub fn discover(cwd: &str) -> Result<Self> {
        let repo = git2::Repository::discover(cwd)
            .with_context(|| format!("finding git repo from {cwd}"))?;
        if repo.is_bare() {
            anyhow::bail!("git repo is bare, no working directory");
        }
        Ok(Self::new(repo))
    }

    /// The repository's metadata directory (`.git`, or the per-worktree
    /// git dir for linked worktrees).
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    pub fn workdir(&self) -> Option<PathBuf> {
        self.repo.workdir().map(Path::to_path_buf)
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo.head().ok().and_then(|h| h.peel_to_commit().ok())
    }

    fn tree(&self, id: &str) -> Result<git2::Tree<'_>> {
        let oid = git2::Oid::from_str(id).with_context(|| format!("parsing tree id {id}"))?;
        self.repo
            .find_tree(oid)
            .with_context(|| format!("finding tree {id}"))
    }
}

impl SnapshotStore for GitSnapshotStore {
    fn capture(&self) -> Result<String> {
        // A second handle on the same repository, pointed at a throwaway
        // index, so the real index file is never rewritten.
        let scratch_dir = tempfile::tempdir().context("creating scratch index dir")?;
        let scratch = git2::Repository::open(self.repo.path())
            .context("opening scratch repository handle")?;
        let mut index = git2::Index::open(&scratch_dir.path().join("index"))
            .context("opening scratch index")?;
        scratch
            .set_index(&mut index)
            .context("attaching scratch index")?;

        if let Some(commit) = self.head_commit() {
            let tree = commit.tree().context("reading HEAD tree")?;
            index.read_tree(&tree).context("seeding index from HEAD")?;
        }
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .context("adding working tree files")?;
        index
            .update_all(["*"].iter(), None)
            .context("recording deleted files")?;
        let oid = index.write_tree().context("writing snapshot tree")?;
        Ok(oid.to_string())
    }

    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileDelta>> {
        let old_tree = self.tree(from)?;
        let new_tree = self.tree(to)?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
            .with_context(|| format!("diffing {from}..{to}"))?;

        let mut deltas = Vec::with_capacity(diff.deltas().len());
        for idx in 0..diff.deltas().len() {
            let Some(delta) = diff.get_delta(idx) else {
                continue;
            };
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let is_new = delta.status() == git2::Delta::Added;

            let patch = git2::Patch::from_diff(&diff, idx)
                .with_context(|| format!("building patch for {path}"))?;
            let (additions, deletions, is_binary) = match patch {
                Some(patch) if !patch.delta().flags().is_binary() => {
                    let (_, adds, dels) = patch
                        .line_stats()
                        .with_context(|| format!("counting lines in {path}"))?;
                    (adds, dels, false)
                }
                _ => (0, 0, true),
            };

            deltas.push(FileDelta {
                path,
                additions: u32::try_from(additions).unwrap_or(u32::MAX),
                deletions: u32::try_from(deletions).unwrap_or(u32::MAX),
                is_new,
                is_binary,
            });
        }
        Ok(deltas)
    }

    fn current_branch(&self) -> String {
        match self.repo.head() {
            Ok(head) if head.is_branch() => head.shorthand().unwrap_or_default().to_string(),
            _ => String::new(),
        }
    }

    fn head(&self) -> Option<String> {
        self.head_commit().map(|c| c.id().to_string())
    }

    fn head_tree(&self) -> Result<String> {
        let commit = self
            .head_commit()
            .context("repository has no HEAD commit")?;
        Ok(commit.tree_id().to_string())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        if ancestor == descendant {
            return true;
        }
        let (Ok(ancestor), Ok(descendant)) =
            (git2::Oid::from_str(ancestor), git2::Oid::from_str(descendant))
        else {
            return false;
        };
        self.repo
            .graph_descendant_of(descendant, ancestor)
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod fake;
