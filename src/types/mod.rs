use serde::{Deserialize, Serialize};

// ===================================================================
// Shared Enums
// ===================================================================

/// Permission mode for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    Plan,
    AcceptEdits,
    DontAsk,
    BypassPermissions,
}

/// How a session was started (used by SessionStart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStartSource {
    Startup,
    Resume,
    Clear,
    Compact,
}

impl SessionStartSource {
    /// Resumed and compacted sessions carry on with their existing budget.
    pub fn continues_session(self) -> bool {
        matches!(self, Self::Resume | Self::Compact)
    }
}

// ===================================================================
// Hook Input Types (received via stdin, snake_case JSON)
// ===================================================================

/// Fields shared by all hook event inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonInput {
    pub session_id: String,
    pub cwd: String,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
}

#[derive(Debug, Deserialize)]
pub struct SessionStartInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub source: SessionStartSource,
}

#[derive(Debug, Deserialize)]
pub struct UserPromptSubmitInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct PreToolUseInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct PostToolUseInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StopInput {
    #[serde(flatten)]
    pub common: CommonInput,
    #[serde(default)]
    pub stop_hook_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct SessionEndInput {
    #[serde(flatten)]
    pub common: CommonInput,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Top-level hook input, deserialized from stdin JSON.
///
/// Tagged by the `hook_event_name` field to determine which event fired.
/// Events this binary does not act on deserialize to [`HookInput::Other`].
#[derive(Debug, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookInput {
    SessionStart(SessionStartInput),
    UserPromptSubmit(UserPromptSubmitInput),
    PreToolUse(PreToolUseInput),
    PostToolUse(PostToolUseInput),
    Stop(StopInput),
    SessionEnd(SessionEndInput),
    #[serde(other)]
    Other,
}

impl HookInput {
    /// Access the common fields shared by all hook events.
    pub fn common(&self) -> Option<&CommonInput> {
        match self {
            Self::SessionStart(e) => Some(&e.common),
            Self::UserPromptSubmit(e) => Some(&e.common),
            Self::PreToolUse(e) => Some(&e.common),
            Self::PostToolUse(e) => Some(&e.common),
            Self::Stop(e) => Some(&e.common),
            Self::SessionEnd(e) => Some(&e.common),
            Self::Other => None,
        }
    }
}

// ===================================================================
// Tool-Specific Input Types
// ===================================================================

/// Parsed tool call, reduced to what the gate cares about.
#[derive(Debug)]
pub enum ToolCall {
    Bash(BashToolInput),
    /// A tool that writes files in the working tree.
    FileEdit {
        tool_name: String,
        file_path: Option<String>,
    },
    /// Read-only, MCP or otherwise unknown tools.
    Other,
}

/// Tools whose calls modify files and are therefore gated.
pub const FILE_EDIT_TOOLS: [&str; 4] = ["Write", "Edit", "MultiEdit", "NotebookEdit"];

impl PreToolUseInput {
    pub fn tool_call(&self) -> Result<ToolCall, serde_json::Error> {
        ToolCall::parse(&self.tool_name, &self.tool_input)
    }
}

impl PostToolUseInput {
    pub fn tool_call(&self) -> Result<ToolCall, serde_json::Error> {
        ToolCall::parse(&self.tool_name, &self.tool_input)
    }
}

impl ToolCall {
    pub fn parse(
        tool_name: &str,
        tool_input: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        match tool_name {
            "Bash" => Ok(Self::Bash(serde_json::from_value(tool_input.clone())?)),
            name if FILE_EDIT_TOOLS.contains(&name) => {
                let file_path = tool_input
                    .get("file_path")
                    .or_else(|| tool_input.get("notebook_path"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string);
                Ok(Self::FileEdit {
                    tool_name: name.to_string(),
                    file_path,
                })
            }
            _ => Ok(Self::Other),
        }
    }

    pub fn is_file_edit(&self) -> bool {
        matches!(self, Self::FileEdit { .. })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BashToolInput {
    pub command: String,
}

// ===================================================================
// Hook Output Types (written to stdout as JSON, camelCase)
// ===================================================================

/// Top-level hook output written to stdout on exit code 0.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// Message shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// Set to `"block"` to prevent the action.
    /// Used here by Stop and UserPromptSubmit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    /// Explanation shown to Claude (Stop) or the user (UserPromptSubmit)
    /// when `decision` is `"block"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Event-specific output fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookOutput {
    /// Informational notice for the user.
    pub fn notice(message: String) -> Self {
        Self {
            system_message: Some(message),
            ..Default::default()
        }
    }

    /// `decision: "block"` with a reason.
    pub fn block(reason: String) -> Self {
        Self {
            decision: Some("block".into()),
            reason: Some(reason),
            ..Default::default()
        }
    }

    /// Refuse a tool call before it runs.
    pub fn deny_tool(reason: String) -> Self {
        Self {
            hook_specific_output: Some(HookSpecificOutput::PreToolUse(PreToolUseOutput {
                permission_decision: Some(PreToolUsePermissionDecision::Deny),
                permission_decision_reason: Some(reason),
            })),
            ..Default::default()
        }
    }

    /// Context fed back to the agent after a tool ran.
    pub fn post_tool_context(context: String) -> Self {
        Self {
            hook_specific_output: Some(HookSpecificOutput::PostToolUse(PostToolUseOutput {
                additional_context: Some(context),
            })),
            ..Default::default()
        }
    }
}

/// Event-specific output, tagged by `hookEventName`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "hookEventName")]
pub enum HookSpecificOutput {
    PreToolUse(PreToolUseOutput),
    PostToolUse(PostToolUseOutput),
}

/// PreToolUse permission decision values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreToolUsePermissionDecision {
    Deny,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseOutput {
    /// `"deny"` blocks the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PreToolUsePermissionDecision>,

    /// For deny: shown to Claude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostToolUseOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}
