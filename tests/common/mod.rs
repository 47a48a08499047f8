#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const SESSION_ID: &str = "test-session";

fn bumper_lanes() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bumper-lanes"));
    cmd.env("BUMPER_LANES_LOG_DIR", std::env::temp_dir().join("bumper-lanes-test-logs"))
        .env_remove("CLAUDE_CODE_SESSION_ID")
        .env_remove("BUMPER_LANES_LOG")
        .env_remove("BUMPER_LANES_DEBUG");
    cmd
}

fn collect(output: std::process::Output) -> (i32, String, String) {
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// Run the binary in hook mode with `stdin_json` on stdin.
pub fn run_cli(stdin_json: &str) -> (i32, String, String) {
    let mut child = bumper_lanes()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn binary");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(stdin_json.as_bytes())
        .unwrap();

    collect(child.wait_with_output().unwrap())
}

/// Run a user subcommand from inside `cwd`.
pub fn run_cmd(cwd: &Path, args: &[&str]) -> (i32, String, String) {
    collect(bumper_lanes().current_dir(cwd).args(args).output().unwrap())
}

/// Like [`run_cmd`] with extra environment.
pub fn run_cmd_env(cwd: &Path, args: &[&str], env: &[(&str, &str)]) -> (i32, String, String) {
    let mut cmd = bumper_lanes();
    cmd.current_dir(cwd).args(args);
    for (k, v) in env {
        cmd.env(k, v);
    }
    collect(cmd.output().unwrap())
}

/// Create a temp dir containing a git repo with an initial commit and return it.
/// The `TempDir` must be kept alive for the duration of the test.
pub fn temp_git_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(dir.path()).unwrap();

    // Configure user identity for commits.
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test").unwrap();
    config.set_str("user.email", "test@test.com").unwrap();

    // Create an initial commit so HEAD exists.
    let sig = repo.signature().unwrap();
    let tree_oid = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_oid).unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();

    dir
}

pub fn common(cwd: &str) -> String {
    format!(
        r#"
    "session_id": "{SESSION_ID}",
    "transcript_path": "/tmp/t.jsonl",
    "cwd": "{cwd}",
    "permission_mode": "default"
"#
    )
}

/// Common fields pointing at a non-git directory.
pub fn common_no_git() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let fields = common(dir.path().to_str().unwrap());
    (dir, fields)
}

pub fn session_start(cwd: &str, source: &str) -> (i32, String, String) {
    let common = common(cwd);
    run_cli(&format!(
        r#"{{ {common}, "hook_event_name": "SessionStart", "source": "{source}" }}"#
    ))
}

pub fn stop(cwd: &str, stop_hook_active: bool) -> (i32, String, String) {
    let common = common(cwd);
    run_cli(&format!(
        r#"{{ {common}, "hook_event_name": "Stop", "stop_hook_active": {stop_hook_active} }}"#
    ))
}

pub fn pre_tool_use(cwd: &str, tool_name: &str, file_path: &str) -> (i32, String, String) {
    let common = common(cwd);
    run_cli(&format!(
        r#"{{ {common},
            "hook_event_name": "PreToolUse",
            "tool_name": "{tool_name}",
            "tool_input": {{ "file_path": "{file_path}", "content": "x" }},
            "tool_use_id": "toolu_001"
        }}"#
    ))
}

pub fn post_tool_use(cwd: &str, tool_name: &str, file_path: &str) -> (i32, String, String) {
    let common = common(cwd);
    run_cli(&format!(
        r#"{{ {common},
            "hook_event_name": "PostToolUse",
            "tool_name": "{tool_name}",
            "tool_input": {{ "file_path": "{file_path}", "content": "x" }},
            "tool_response": {{ "success": true }},
            "tool_use_id": "toolu_002"
        }}"#
    ))
}

pub fn post_bash(cwd: &str, command: &str) -> (i32, String, String) {
    let common = common(cwd);
    let command = serde_json::to_string(command).unwrap();
    run_cli(&format!(
        r#"{{ {common},
            "hook_event_name": "PostToolUse",
            "tool_name": "Bash",
            "tool_input": {{ "command": {command} }},
            "tool_response": {{ "stdout": "", "stderr": "" }},
            "tool_use_id": "toolu_003"
        }}"#
    ))
}

pub fn prompt(cwd: &str, prompt: &str) -> (i32, String, String) {
    let common = common(cwd);
    let prompt = serde_json::to_string(prompt).unwrap();
    run_cli(&format!(
        r#"{{ {common}, "hook_event_name": "UserPromptSubmit", "prompt": {prompt} }}"#
    ))
}

pub fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {stdout:?}"))
}

pub fn checkpoint_dir(repo: &Path) -> PathBuf {
    repo.join(".git").join("bumper-checkpoints")
}

pub fn state_path(repo: &Path) -> PathBuf {
    checkpoint_dir(repo).join(format!("session-{SESSION_ID}.json"))
}

/// The persisted session record, if any.
pub fn read_state(repo: &Path) -> Option<serde_json::Value> {
    let contents = fs::read_to_string(state_path(repo)).ok()?;
    Some(serde_json::from_str(&contents).unwrap())
}

/// Write a file of `lines` distinct lines into the worktree.
pub fn write_lines(repo: &Path, name: &str, lines: usize) {
    let body: String = (0..lines).map(|i| format!("{name} line {i}\n")).collect();
    fs::write(repo.join(name), body).unwrap();
}

/// Stage everything and commit on top of HEAD.
pub fn commit_all(repo_path: &Path, message: &str) {
    let repo = git2::Repository::open(repo_path).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_oid = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_oid).unwrap();
    let sig = repo.signature().unwrap();
    let parent = repo.head().unwrap().peel_to_commit().unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .unwrap();
}

pub fn head_tree(repo_path: &Path) -> String {
    let repo = git2::Repository::open(repo_path).unwrap();
    let commit = repo.head().unwrap().peel_to_commit().unwrap();
    commit.tree_id().to_string()
}
