//! Agentigraph Tools: registry, approval gate, argument repair, builtins
//!
//! Builtin tools live in src/tools/. `builtin_tools()` decides which of them
//! a run gets and whether they need approval.

pub mod approval;
pub mod args;
pub mod registry;
pub mod schema;
pub mod tools;

pub use approval::{
    approval_fn, ApprovalDecision, ApprovalGate, ApprovalHandler, ApprovalRequest, NO_HANDLER_DENIAL,
};
pub use args::{parse_tool_arguments, repair_json, ParsedArguments, RAW_ARGUMENTS_KEY};
pub use registry::{
    tool_fn, ConflictStrategy, RegisterOutcome, RegisteredTool, RegistryOptions, SourceKind, Tool,
    ToolContext, ToolError, ToolExecutor, ToolMap, ToolRegistry, ToolResult, ToolSource,
};
pub use schema::{JsonSchemaAdapter, ParameterListAdapter, SchemaAdapter};

use std::path::Path;

pub const BUILTIN_TOOL_NAMES: &[&str] = &["read", "glob", "bash"];

/// Builtin tools named in `enabled`, in name order. Read-only tools run
/// freely; `bash` requires approval.
pub fn builtin_tools(workspace_root: impl AsRef<Path>, enabled: &[String]) -> Vec<RegisteredTool> {
    let root = workspace_root.as_ref();
    let mut out = Vec::new();
    for name in enabled {
        let tool = match name.as_str() {
            "read" => RegisteredTool::from_tool(tools::ReadTool::new(root), ToolSource::builtin()),
            "glob" => RegisteredTool::from_tool(tools::GlobTool::new(root), ToolSource::builtin()),
            "bash" => RegisteredTool::from_tool(tools::BashTool::new(root), ToolSource::builtin())
                .with_approval(true),
            other => {
                tracing::warn!("Unknown builtin tool: {}", other);
                continue;
            }
        };
        out.push(tool);
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}
