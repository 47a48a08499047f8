use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

use crate::config::{self, Config};
use crate::gate::{Checkpoint, Decision, ThresholdGate, Verdict};
use crate::messages;
use crate::reset::ResetController;
use crate::snapshot::{GitSnapshotStore, SnapshotStore};
use crate::state::{CHECKPOINT_WARNING_THRESHOLD, StateStore};
use crate::types::{
    HookOutput, PostToolUseInput, PreToolUseInput, SessionEndInput, SessionStartInput, StopInput,
    ToolCall, UserPromptSubmitInput,
};

/// `git [global flags] commit`, anywhere in a shell command line.
/// Prose such as "use git to commit" does not match.
fn git_commit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"git\s+(-{1,2}[A-Za-z-]+([ =]("[^"]*"|\S+))?\s+)*commit\b"#)
            .expect("regex for git commit commands")
    })
}

pub fn is_git_commit(command: &str) -> bool {
    git_commit_pattern().is_match(command)
}

fn slash_command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^/(?:claude-bumper-lanes:)?bumper-(reset|pause|resume|config)(?:\s+(.*))?$")
            .expect("regex for slash commands")
    })
}

/// What `config` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    Show,
    Set { value: u32, personal: bool },
}

/// A bumper-lanes slash command typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Reset,
    Pause,
    Resume,
    /// Raw arguments; validated when executed so errors reach the user.
    Config(String),
}

impl SlashCommand {
    /// `None` for anything that is not one of ours; those prompts pass through.
    pub fn parse(prompt: &str) -> Option<Self> {
        let caps = slash_command_pattern().captures(prompt.trim())?;
        let args = caps.get(2).map_or("", |m| m.as_str().trim());
        match &caps[1] {
            "reset" if args.is_empty() => Some(Self::Reset),
            "pause" if args.is_empty() => Some(Self::Pause),
            "resume" if args.is_empty() => Some(Self::Resume),
            "config" => Some(Self::Config(args.to_string())),
            _ => None,
        }
    }
}

/// Parse `/bumper-config` arguments: empty, `N`, or `personal N`.
pub fn parse_config_args(args: &str) -> Result<ConfigAction> {
    let args = args.trim();
    if args.is_empty() || args == "show" {
        return Ok(ConfigAction::Show);
    }
    let (raw, personal) = match args.strip_prefix("personal") {
        Some(rest) => (rest.trim(), true),
        None => (args, false),
    };
    Ok(ConfigAction::Set {
        value: config::parse_threshold(raw)?,
        personal,
    })
}

pub struct Session {
    snapshots: GitSnapshotStore,
    states: StateStore,
    config: Config,
    session_id: String,
}

impl Session {
    /// Open the git repo from `cwd`, locate its checkpoint directory and load
    /// configuration. Config errors fall back to defaults.
    pub fn open(cwd: &str, session_id: &str) -> Result<Self> {
        let snapshots = GitSnapshotStore::discover(cwd)?;
        let git_dir = snapshots.git_dir().to_path_buf();
        let states = StateStore::for_git_dir(&git_dir);
        let workdir = snapshots.workdir();
        let config = Config::load(workdir.as_deref(), &git_dir).unwrap_or_else(|err| {
            tracing::warn!("loading config, using defaults: {err:#}");
            Config::fallback(workdir.as_deref(), &git_dir)
        });
        Ok(Self {
            snapshots,
            states,
            config,
            session_id: session_id.to_string(),
        })
    }

    fn gate(&self) -> ThresholdGate<'_, GitSnapshotStore> {
        ThresholdGate::new(&self.snapshots, &self.states)
    }

    fn resets(&self) -> ResetController<'_, GitSnapshotStore> {
        ResetController::new(&self.snapshots, &self.states)
    }

    fn create_session(&self) -> Result<()> {
        let baseline = self
            .snapshots
            .capture_baseline()
            .context("capturing baseline")?;
        let state = self
            .states
            .create(&self.session_id, baseline, self.config.threshold)?;
        tracing::info!(
            baseline = %state.baseline_ref,
            branch = %state.baseline_branch,
            limit = state.threshold_limit,
            "session started"
        );
        Ok(())
    }

    // ---------------------------------------------------------------
    // Hook handlers
    // ---------------------------------------------------------------

    pub fn handle_session_start(&self, input: &SessionStartInput) -> Result<Option<HookOutput>> {
        let existing = if input.source.continues_session() {
            self.states.load(&self.session_id).unwrap_or_else(|err| {
                tracing::warn!("loading existing session, starting fresh: {err:#}");
                None
            })
        } else {
            None
        };
        if existing.is_some() {
            tracing::info!(source = ?input.source, "continuing session");
        } else {
            self.create_session()?;
        }

        let count = self.states.count_sessions();
        if count >= CHECKPOINT_WARNING_THRESHOLD {
            return Ok(Some(HookOutput::notice(format!(
                "Bumper lanes: {count} session records in {}. Consider deleting old ones.",
                self.states.dir().display()
            ))));
        }
        Ok(None)
    }

    pub fn handle_pre_tool_use(&self, input: &PreToolUseInput) -> Result<Option<HookOutput>> {
        let call = match input.tool_call() {
            Ok(call) => call,
            Err(err) => {
                tracing::debug!(tool = %input.tool_name, "unparsed tool input: {err}");
                return Ok(None);
            }
        };
        if !call.is_file_edit() {
            return Ok(None);
        }
        let verdict = self.gate().check(&self.session_id, Checkpoint::PreEdit);
        Ok(verdict_output(verdict))
    }

    pub fn handle_post_tool_use(&self, input: &PostToolUseInput) -> Result<Option<HookOutput>> {
        let call = match input.tool_call() {
            Ok(call) => call,
            Err(err) => {
                tracing::debug!(tool = %input.tool_name, "unparsed tool input: {err}");
                return Ok(None);
            }
        };
        match call {
            ToolCall::Bash(bash) if is_git_commit(&bash.command) => {
                let Some(state) = self.resets().reset_to_head(&self.session_id) else {
                    return Ok(None);
                };
                Ok(Some(HookOutput::notice(messages::commit_reset(
                    state.threshold_limit,
                ))))
            }
            ToolCall::FileEdit {
                tool_name,
                file_path,
            } => {
                tracing::debug!(tool = %tool_name, file = ?file_path, "post-edit");
                let verdict = self.gate().check(&self.session_id, Checkpoint::PostEdit);
                Ok(verdict.message.map(HookOutput::post_tool_context))
            }
            _ => Ok(None),
        }
    }

    pub fn handle_stop(&self, input: &StopInput) -> Result<Option<HookOutput>> {
        let verdict = self.gate().check(
            &self.session_id,
            Checkpoint::Stop {
                reentrant: input.stop_hook_active,
            },
        );
        Ok(verdict_output(verdict))
    }

    pub fn handle_session_end(&self, input: &SessionEndInput) -> Result<Option<HookOutput>> {
        if let Err(err) = self.states.delete(&self.session_id) {
            tracing::warn!("removing session state: {err:#}");
        } else {
            tracing::info!(reason = ?input.reason, "session ended");
        }
        Ok(None)
    }

    /// Run bumper-lanes slash commands directly and answer with
    /// `decision: "block"` so the prompt never reaches the model.
    pub fn handle_user_prompt_submit(
        &self,
        input: &UserPromptSubmitInput,
    ) -> Result<Option<HookOutput>> {
        let Some(command) = SlashCommand::parse(&input.prompt) else {
            return Ok(None);
        };
        tracing::info!(?command, "slash command");
        let result = match command {
            SlashCommand::Reset => self.reset(),
            SlashCommand::Pause => self.pause(),
            SlashCommand::Resume => self.resume(),
            SlashCommand::Config(args) => {
                parse_config_args(&args).and_then(|action| self.configure(action))
            }
        };
        let reason = result.unwrap_or_else(|err| format!("Error: {err:#}"));
        Ok(Some(HookOutput::block(reason)))
    }

    // ---------------------------------------------------------------
    // User commands
    // ---------------------------------------------------------------

    /// Accept all current changes and pick up the configured threshold.
    pub fn reset(&self) -> Result<String> {
        self.resets()
            .manual_reset(&self.session_id, Some(self.config.threshold))
    }

    pub fn pause(&self) -> Result<String> {
        self.resets().pause(&self.session_id)
    }

    pub fn resume(&self) -> Result<String> {
        self.resets().resume(&self.session_id)
    }

    pub fn configure(&self, action: ConfigAction) -> Result<String> {
        configure(&self.config, action)
    }
}

/// Effective configuration for the repository containing `cwd`.
pub fn load_config(cwd: &str) -> Result<Config> {
    let snapshots = GitSnapshotStore::discover(cwd)?;
    Config::load(snapshots.workdir().as_deref(), snapshots.git_dir())
}

pub fn configure(config: &Config, action: ConfigAction) -> Result<String> {
    match action {
        ConfigAction::Show => Ok(show_config(config)),
        ConfigAction::Set { value, personal } => {
            let path = config.set_threshold(value, personal)?;
            tracing::info!(value, path = %path.display(), "threshold saved");
            Ok(format!(
                "Threshold set to {value} ({}).\nRun /bumper-reset to apply to the current session.",
                path.display()
            ))
        }
    }
}

/// Config display for a repository, without binding a session.
pub fn show_config(config: &Config) -> String {
    let threshold = if config.is_disabled() {
        "0 (enforcement disabled)".to_string()
    } else {
        format!("{} points", config.threshold)
    };
    format!("Threshold: {threshold}\nSource: {}", config.source)
}

fn verdict_output(verdict: Verdict) -> Option<HookOutput> {
    let Verdict { decision, message } = verdict;
    match decision {
        Decision::Allow => message.map(HookOutput::notice),
        Decision::Deny => Some(HookOutput::deny_tool(message.unwrap_or_default())),
        Decision::Block => Some(HookOutput::block(message.unwrap_or_default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_commit_detection() {
        for cmd in [
            "git commit -m 'test'",
            r#"git commit -m "feat: add feature""#,
            "git commit -a -m 'changes'",
            "git commit --amend",
            "git -C /some/path commit -m 'msg'",
            "git --git-dir=/x commit -m 'y'",
            "git -C /path --work-tree=/other commit -m 'z'",
            "cargo fmt && git commit -am wip",
        ] {
            assert!(is_git_commit(cmd), "should match: {cmd}");
        }
        for cmd in [
            "git status",
            "git diff HEAD",
            "use git to commit your changes",
            "cz commit",
            "I will commit to this",
            "git log --oneline | grep commit",
            "",
        ] {
            assert!(!is_git_commit(cmd), "should not match: {cmd}");
        }
    }

    #[test]
    fn slash_commands_parse_with_and_without_prefix() {
        assert_eq!(SlashCommand::parse("/bumper-reset"), Some(SlashCommand::Reset));
        assert_eq!(
            SlashCommand::parse("  /claude-bumper-lanes:bumper-pause  "),
            Some(SlashCommand::Pause)
        );
        assert_eq!(SlashCommand::parse("/bumper-resume"), Some(SlashCommand::Resume));
        assert_eq!(
            SlashCommand::parse("/bumper-config personal 600"),
            Some(SlashCommand::Config("personal 600".into()))
        );
        assert_eq!(
            SlashCommand::parse("/bumper-config"),
            Some(SlashCommand::Config(String::new()))
        );
    }

    #[test]
    fn other_prompts_pass_through() {
        assert_eq!(SlashCommand::parse("please /bumper-reset"), None);
        assert_eq!(SlashCommand::parse("/bumper-reset now"), None);
        assert_eq!(SlashCommand::parse("/bumper-view tree"), None);
        assert_eq!(SlashCommand::parse("write a parser"), None);
    }

    #[test]
    fn config_args() {
        assert_eq!(parse_config_args("").unwrap(), ConfigAction::Show);
        assert_eq!(
            parse_config_args("250").unwrap(),
            ConfigAction::Set {
                value: 250,
                personal: false
            }
        );
        assert_eq!(
            parse_config_args("personal 900").unwrap(),
            ConfigAction::Set {
                value: 900,
                personal: true
            }
        );
        let err = parse_config_args("10").unwrap_err();
        assert!(format!("{err:#}").contains("between 50 and 2000"));
        assert!(parse_config_args("lots").is_err());
    }

    #[test]
    fn verdicts_map_to_hook_output() {
        assert!(verdict_output(Verdict::allow()).is_none());

        let notice = verdict_output(Verdict::allow_with("reset".into())).unwrap();
        assert_eq!(notice.system_message.as_deref(), Some("reset"));

        let stop = verdict_output(Verdict {
            decision: Decision::Block,
            message: Some("over".into()),
        })
        .unwrap();
        assert_eq!(stop.decision.as_deref(), Some("block"));
        assert_eq!(stop.reason.as_deref(), Some("over"));

        let deny = verdict_output(Verdict {
            decision: Decision::Deny,
            message: Some("blocked".into()),
        })
        .unwrap();
        let v = serde_json::to_value(&deny).unwrap();
        assert_eq!(v["hookSpecificOutput"]["permissionDecision"], "deny");
    }
}
