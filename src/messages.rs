//! User- and agent-facing text. Every block, deny and warning message is a
//! `minijinja` template so wording lives in one place.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use std::sync::OnceLock;

use crate::scoring::{DiffSummary, WeightedScore, format_score, percentage};

const STOP_BLOCK: &str = "\
Bumper lanes: diff threshold exceeded

Score: {{ score_line }}
{% if breakdown %}
Changes since last review:
- New file additions: {{ breakdown.new_additions }} lines (1.0x)
- Edit additions: {{ breakdown.edit_additions }} lines (1.3x)
- Files touched: {{ breakdown.files_touched }}
- Scatter penalty: {{ breakdown.scatter_penalty }} pts
{% endif %}

Stop taking on new work and ask the user whether they want to review the changes now.
After review, run /bumper-reset (or commit) to restore the budget.";

const PRE_EDIT_DENY: &str = "\
Bumper lanes: file modifications blocked.

Threshold exceeded: {{ score_line }}

The stop checkpoint has already fired. To continue:
1. Review changes with the user
2. Commit changes (baseline auto-resets), OR
3. Run /bumper-reset to restore the budget";

const FUEL_GAUGE: &str = "\
{% if tier == \"critical\" %}\
CRITICAL: Review budget at {{ pct }}% ({{ score }}/{{ limit }} pts). Stop now and ask the user to review before continuing.\
{% elif tier == \"warning\" %}\
WARNING: Review budget at {{ pct }}% ({{ score }}/{{ limit }} pts). Complete current work, then ask the user about a checkpoint.\
{% else %}\
NOTICE: {{ pct }}% of review budget used ({{ score }}/{{ limit }} pts). Wrap up the current task soon.\
{% endif %}";

const STALE_BASELINE: &str = "\
Bumper lanes: {% if old_branch and new_branch and old_branch != new_branch %}\
baseline was captured on branch `{{ old_branch }}`, now on `{{ new_branch }}`\
{% else %}history no longer contains the reviewed baseline{% endif %}. \
Baseline auto-reset, budget restored.";

const MANUAL_RESET: &str = "\
Baseline reset: {{ old_ref }} -> {{ new_ref }}
Accepted: {{ summary }}
Score: 0/{{ limit }}";

const COMMIT_RESET: &str = "\
Bumper lanes: auto-reset after commit. Fresh budget: {{ limit }} pts.";

const EXTERNAL_COMMIT_RESET: &str = "\
Bumper lanes: working tree matches HEAD (external commit detected). Baseline auto-reset, budget restored.";

fn env() -> &'static Environment<'static> {
    static ENV: OnceLock<Environment<'static>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        for (name, source) in [
            ("stop_block", STOP_BLOCK),
            ("pre_edit_deny", PRE_EDIT_DENY),
            ("fuel_gauge", FUEL_GAUGE),
            ("stale_baseline", STALE_BASELINE),
            ("manual_reset", MANUAL_RESET),
            ("commit_reset", COMMIT_RESET),
            ("external_commit_reset", EXTERNAL_COMMIT_RESET),
        ] {
            if let Err(err) = env.add_template(name, source) {
                tracing::error!("bad message template {name}: {err}");
            }
        }
        env
    })
}

fn render(name: &str, ctx: minijinja::Value) -> Result<String> {
    let tmpl = env()
        .get_template(name)
        .with_context(|| format!("loading template {name}"))?;
    tmpl.render(ctx)
        .with_context(|| format!("rendering template {name}"))
}

/// Render, falling back to `fallback` so a message is always produced.
fn render_or(name: &str, ctx: minijinja::Value, fallback: impl FnOnce() -> String) -> String {
    render(name, ctx).unwrap_or_else(|err| {
        tracing::warn!("{err:#}");
        fallback()
    })
}

/// How close the accumulated score is to the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FuelTier {
    Silent,
    Notice,
    Warning,
    Critical,
}

impl FuelTier {
    pub fn for_percentage(pct: u32) -> Self {
        match pct {
            0..=49 => FuelTier::Silent,
            50..=74 => FuelTier::Notice,
            75..=89 => FuelTier::Warning,
            _ => FuelTier::Critical,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FuelTier::Silent => "silent",
            FuelTier::Notice => "notice",
            FuelTier::Warning => "warning",
            FuelTier::Critical => "critical",
        }
    }
}

pub fn stop_block(score: u32, limit: u32, breakdown: Option<&WeightedScore>) -> String {
    let score_line = format_score(score, limit);
    render_or(
        "stop_block",
        context! { score_line => &score_line, breakdown => breakdown },
        || format!("Bumper lanes: diff threshold exceeded ({score_line}). Run /bumper-reset after review."),
    )
}

pub fn pre_edit_deny(score: u32, limit: u32) -> String {
    let score_line = format_score(score, limit);
    render_or("pre_edit_deny", context! { score_line => &score_line }, || {
        format!("Bumper lanes: file modifications blocked ({score_line}).")
    })
}

/// Fuel-gauge text for a tier; `None` for [`FuelTier::Silent`].
pub fn fuel_gauge(tier: FuelTier, score: u32, limit: u32) -> Option<String> {
    if tier == FuelTier::Silent {
        return None;
    }
    let pct = percentage(score, limit);
    Some(render_or(
        "fuel_gauge",
        context! { tier => tier.as_str(), pct => pct, score => score, limit => limit },
        || format!("Review budget at {pct}% ({score}/{limit} pts)."),
    ))
}

pub fn stale_baseline(old_branch: &str, new_branch: &str) -> String {
    render_or(
        "stale_baseline",
        context! { old_branch => old_branch, new_branch => new_branch },
        || "Bumper lanes: stale baseline auto-reset.".into(),
    )
}

/// Report for an explicit reset. `summary` is `None` when the accepted
/// changes could not be diffed.
pub fn manual_reset(
    old_ref: &str,
    new_ref: &str,
    summary: Option<&DiffSummary>,
    limit: u32,
) -> String {
    let summary = summary.map_or_else(|| "changes not measured".to_string(), |s| s.to_string());
    let (old_ref, new_ref) = (short_ref(old_ref), short_ref(new_ref));
    render_or(
        "manual_reset",
        context! { old_ref => old_ref, new_ref => new_ref, summary => &summary, limit => limit },
        || format!("Baseline reset: {old_ref} -> {new_ref} ({summary})"),
    )
}

pub fn commit_reset(limit: u32) -> String {
    render_or("commit_reset", context! { limit => limit }, || {
        format!("Bumper lanes: auto-reset after commit. Fresh budget: {limit} pts.")
    })
}

pub fn external_commit_reset() -> String {
    render_or("external_commit_reset", context! {}, || {
        "Bumper lanes: baseline auto-reset.".into()
    })
}

/// First 12 characters of an object id.
pub fn short_ref(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
