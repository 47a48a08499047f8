use serde::{Deserialize, Serialize};

/// Weight for lines added to brand-new files, scaled x10 for integer math.
const NEW_FILE_WEIGHT: u64 = 10;
/// Weight for lines added to pre-existing files (1.3x), scaled x10.
const EDIT_FILE_WEIGHT: u64 = 13;

/// Files 1-5 are penalty-free.
const FREE_TIER_MAX: u32 = 5;
/// Upper bound of the medium scatter band.
const MEDIUM_TIER_MAX: u32 = 10;
const MEDIUM_TIER_RATE: u32 = 10;
const HIGH_TIER_RATE: u32 = 30;

/// One file's worth of change between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelta {
    pub path: String,
    pub additions: u32,
    pub deletions: u32,
    /// The file does not exist in the older snapshot.
    #[serde(default)]
    pub is_new: bool,
    #[serde(default)]
    pub is_binary: bool,
}

/// Review burden of a diff. Ephemeral: only `score` is ever folded into
/// persisted session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedScore {
    pub score: u32,
    pub new_additions: u32,
    pub edit_additions: u32,
    pub files_touched: u32,
    pub scatter_penalty: u32,
}

/// Compute the weighted score of a diff.
///
/// New-file additions count 1.0x, additions to existing files 1.3x (rounded
/// down on the subtotal). Deletions never add to the score. Every file that
/// appears in the diff counts toward `files_touched`, including binary files
/// and pure deletions, and the scatter penalty is derived from that count.
pub fn calculate(deltas: &[FileDelta]) -> WeightedScore {
    let mut new_additions: u32 = 0;
    let mut edit_additions: u32 = 0;

    for delta in deltas {
        if delta.is_binary || delta.additions == 0 {
            continue;
        }
        if delta.is_new {
            new_additions = new_additions.saturating_add(delta.additions);
        } else {
            edit_additions = edit_additions.saturating_add(delta.additions);
        }
    }

    let files_touched = u32::try_from(deltas.len()).unwrap_or(u32::MAX);
    let weighted = (u64::from(new_additions) * NEW_FILE_WEIGHT
        + u64::from(edit_additions) * EDIT_FILE_WEIGHT)
        / 10;
    let scatter_penalty = scatter_penalty(files_touched);
    let score = u32::try_from(weighted)
        .unwrap_or(u32::MAX)
        .saturating_add(scatter_penalty);

    WeightedScore {
        score,
        new_additions,
        edit_additions,
        files_touched,
        scatter_penalty,
    }
}

/// Scatter penalty for a file count. The tier rate applies to the whole
/// count, not just the files past the free tier.
pub fn scatter_penalty(files_touched: u32) -> u32 {
    match files_touched {
        0..=FREE_TIER_MAX => 0,
        n if n <= MEDIUM_TIER_MAX => n * MEDIUM_TIER_RATE,
        n => n.saturating_mul(HIGH_TIER_RATE),
    }
}

/// Plain line totals of a diff, used for the "changes accepted" report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub files: usize,
    pub insertions: u64,
    pub deletions: u64,
}

impl DiffSummary {
    pub fn from_deltas(deltas: &[FileDelta]) -> Self {
        Self {
            files: deltas.len(),
            insertions: deltas.iter().map(|d| u64::from(d.additions)).sum(),
            deletions: deltas.iter().map(|d| u64::from(d.deletions)).sum(),
        }
    }

    pub fn total_lines(&self) -> u64 {
        self.insertions + self.deletions
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let noun = if self.files == 1 { "file" } else { "files" };
        write!(
            f,
            "{} {noun}, {} insertions(+), {} deletions(-) [{} lines total]",
            self.files,
            self.insertions,
            self.deletions,
            self.total_lines()
        )
    }
}

/// `round(score / limit * 100)`. A zero limit (enforcement disabled) reads as 0%.
pub fn percentage(score: u32, limit: u32) -> u32 {
    if limit == 0 {
        return 0;
    }
    let pct = (u64::from(score) * 200 + u64::from(limit)) / (u64::from(limit) * 2);
    u32::try_from(pct).unwrap_or(u32::MAX)
}

/// `"<score>/<limit> points (<pct>%)"`
pub fn format_score(score: u32, limit: u32) -> String {
    format!("{score}/{limit} points ({}%)", percentage(score, limit))
}
