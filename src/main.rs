mod config;
mod gate;
mod logging;
mod messages;
mod reset;
mod scoring;
mod session;
mod snapshot;
mod state;
mod types;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use session::{ConfigAction, Session};
use std::io::{self, Read};
use std::process;
use types::{HookInput, HookOutput};

/// With no subcommand, handles one hook event read from stdin as JSON.
#[derive(Parser)]
#[command(
    name = "bumper-lanes",
    about = "Review budget for agent coding sessions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept all current changes as reviewed and restore the budget.
    Reset(SessionArgs),
    /// Stop scoring and enforcing until `resume`.
    Pause(SessionArgs),
    /// Resume scoring and enforcement.
    Resume(SessionArgs),
    /// Show or change the diff threshold.
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },
}

#[derive(Args)]
struct SessionArgs {
    /// Session to act on.
    #[arg(long, env = "CLAUDE_CODE_SESSION_ID")]
    session_id: String,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective threshold and where it comes from.
    Show,
    /// Set the repository threshold (`.bumper-lanes.toml`).
    Set { value: u32 },
    /// Set a personal threshold that is never committed.
    Personal { value: u32 },
}

impl From<Option<ConfigCommand>> for ConfigAction {
    fn from(cmd: Option<ConfigCommand>) -> Self {
        match cmd {
            None | Some(ConfigCommand::Show) => ConfigAction::Show,
            Some(ConfigCommand::Set { value }) => ConfigAction::Set {
                value,
                personal: false,
            },
            Some(ConfigCommand::Personal { value }) => ConfigAction::Set {
                value,
                personal: true,
            },
        }
    }
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("reading stdin")?;
    Ok(buffer)
}

/// Handle one hook event. Every failure yields no output: the hook must
/// never get in the way of the session it observes.
fn run_hook() -> Option<HookOutput> {
    let input = read_stdin().ok()?;
    let hook_input: HookInput = serde_json::from_str(&input).ok()?;
    let common = hook_input.common()?;

    logging::init(&common.session_id);
    tracing::debug!(
        cwd = %common.cwd,
        permission_mode = ?common.permission_mode,
        "hook event"
    );

    let session = match Session::open(&common.cwd, &common.session_id) {
        Ok(session) => session,
        Err(err) => {
            tracing::debug!("not tracking this directory: {err:#}");
            return None;
        }
    };

    let result: Result<Option<HookOutput>> = match &hook_input {
        HookInput::SessionStart(e) => session.handle_session_start(e),
        HookInput::UserPromptSubmit(e) => session.handle_user_prompt_submit(e),
        HookInput::PreToolUse(e) => session.handle_pre_tool_use(e),
        HookInput::PostToolUse(e) => session.handle_post_tool_use(e),
        HookInput::Stop(e) => session.handle_stop(e),
        HookInput::SessionEnd(e) => session.handle_session_end(e),
        HookInput::Other => Ok(None),
    };

    result.unwrap_or_else(|err| {
        tracing::warn!("hook failed, allowing: {err:#}");
        None
    })
}

fn run_command(command: Commands) -> Result<String> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    let cwd = cwd.to_string_lossy();
    let open = |args: &SessionArgs| -> Result<Session> {
        logging::init(&args.session_id);
        Session::open(&cwd, &args.session_id)
    };
    match command {
        Commands::Reset(args) => open(&args)?.reset(),
        Commands::Pause(args) => open(&args)?.pause(),
        Commands::Resume(args) => open(&args)?.resume(),
        Commands::Config { action } => {
            let config = session::load_config(&cwd)?;
            session::configure(&config, action.into())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        None => {
            let Some(output) = run_hook() else {
                return;
            };
            match serde_json::to_string(&output) {
                Ok(json) => println!("{json}"),
                Err(err) => tracing::error!("serializing hook output: {err}"),
            }
        }
        Some(command) => match run_command(command) {
            Ok(message) => println!("{message}"),
            Err(err) => {
                eprintln!("error: {err:#}");
                process::exit(1);
            }
        },
    }
}
