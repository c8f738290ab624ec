//! Tool registry and trait definitions
//!
//! Tools arrive from four sources ranked user > skill > mcp > builtin. When two
//! sources offer the same name, the higher rank wins; equal or lower ranks are
//! skipped or rejected depending on the conflict strategy.

use crate::approval::ApprovalHandler;
use agentigraph_core::{Error, Message, Result, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum ToolResult {
    Text(String),
    Json(Value),
    Error(String),
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self { Self::Text(s.into()) }
    pub fn error(s: impl Into<String>) -> Self { Self::Error(s.into()) }

    /// Strings pass through; everything else is compact JSON.
    pub fn to_content_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(Value::String(s)) => s.clone(),
            Self::Json(v) => serde_json::to_string(v).unwrap_or_default(),
            Self::Error(e) => format!("Error: {}", e),
        }
    }

    pub fn is_error(&self) -> bool { matches!(self, Self::Error(_)) }
}

/// Tool failure. `Failed` becomes an error result the model can read;
/// `Fatal` aborts the run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

/// What a tool sees about the call it is serving.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub tool_call_id: String,
    pub messages: Vec<Message>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            messages: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// The executable half of a tool.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: Value, ctx: ToolContext) -> std::result::Result<ToolResult, ToolError>;
}

/// A self-describing tool: metadata plus execution. Builtins implement this.
pub trait Tool: ToolExecutor {
    /// Unique tool name (e.g. "bash", "read", "glob").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Whether this tool only reads state (no side effects).
    fn is_read_only(&self) -> bool { false }
}

struct FnExecutor<F>(F);

#[async_trait::async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<ToolResult, ToolError>> + Send,
{
    async fn execute(&self, args: Value, ctx: ToolContext) -> std::result::Result<ToolResult, ToolError> {
        (self.0)(args, ctx).await
    }
}

/// Wrap an async closure as an executor.
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolExecutor>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ToolResult, ToolError>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    User,
    Skill,
    Mcp,
    Builtin,
}

impl SourceKind {
    pub fn rank(self) -> u8 {
        match self {
            Self::User => 3,
            Self::Skill => 2,
            Self::Mcp => 1,
            Self::Builtin => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Skill => "skill",
            Self::Mcp => "mcp",
            Self::Builtin => "builtin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "skill" => Some(Self::Skill),
            "mcp" => Some(Self::Mcp),
            "builtin" => Some(Self::Builtin),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSource {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ToolSource {
    pub fn new(kind: SourceKind, namespace: Option<String>) -> Self {
        Self { kind, namespace }
    }

    pub fn user() -> Self { Self::new(SourceKind::User, None) }
    pub fn builtin() -> Self { Self::new(SourceKind::Builtin, None) }
    pub fn skill(ns: impl Into<String>) -> Self { Self::new(SourceKind::Skill, Some(ns.into())) }
    pub fn mcp(ns: impl Into<String>) -> Self { Self::new(SourceKind::Mcp, Some(ns.into())) }

    pub fn outranks(&self, other: &ToolSource) -> bool {
        self.kind.rank() > other.kind.rank()
    }

    /// Match `type`, `type:*` or `type:namespace`.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        let (kind, ns) = match pattern.split_once(':') {
            Some((k, ns)) => (k, Some(ns)),
            None => (pattern, None),
        };
        if SourceKind::parse(kind) != Some(self.kind) {
            return false;
        }
        match ns {
            None | Some("*") => true,
            Some(ns) => self.namespace.as_deref() == Some(ns),
        }
    }
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}:{}", self.kind.as_str(), ns),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub source: ToolSource,
    pub execute: Option<Arc<dyn ToolExecutor>>,
    pub requires_approval: bool,
    pub approval_handler: Option<Arc<dyn ApprovalHandler>>,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("executable", &self.execute.is_some())
            .field("requires_approval", &self.requires_approval)
            .finish()
    }
}

impl RegisteredTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        source: ToolSource,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            source,
            execute: None,
            requires_approval: false,
            approval_handler: None,
        }
    }

    /// Register a self-describing tool under `source`.
    pub fn from_tool<T: Tool + 'static>(tool: T, source: ToolSource) -> Self {
        let tool = Arc::new(tool);
        Self::new(tool.name(), tool.description(), tool.input_schema(), source)
            .with_executor(tool)
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.execute = Some(executor);
        self
    }

    pub fn with_approval(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }

    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.requires_approval = true;
        self.approval_handler = Some(handler);
        self
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.parameters.clone(),
        }
    }
}

/// Name-sorted, immutable snapshot of the registry shared by a run.
pub type ToolMap = Arc<BTreeMap<String, RegisteredTool>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    #[default]
    FirstWins,
    Error,
}

#[derive(Clone, Debug, Default)]
pub struct RegistryOptions {
    pub conflict_strategy: ConflictStrategy,
    /// Source patterns never admitted: `type`, `type:*`, `type:namespace`.
    pub exclude: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    Updated,
    Replaced { previous: ToolSource },
    Skipped { existing: ToolSource },
    Excluded,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    options: RegistryOptions,
}

impl ToolRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn with_options(options: RegistryOptions) -> Self {
        Self { tools: BTreeMap::new(), options }
    }

    pub fn register(&mut self, tool: RegisteredTool) -> Result<RegisterOutcome> {
        if self.options.exclude.iter().any(|p| tool.source.matches_pattern(p)) {
            debug!(tool = %tool.name, source = %tool.source, "tool excluded");
            return Ok(RegisterOutcome::Excluded);
        }

        let Some(existing) = self.tools.get(&tool.name) else {
            debug!(tool = %tool.name, source = %tool.source, "tool registered");
            self.tools.insert(tool.name.clone(), tool);
            return Ok(RegisterOutcome::Added);
        };

        if existing.source == tool.source {
            self.tools.insert(tool.name.clone(), tool);
            return Ok(RegisterOutcome::Updated);
        }

        if tool.source.outranks(&existing.source) {
            let previous = existing.source.clone();
            warn!(
                tool = %tool.name,
                previous = %previous,
                incoming = %tool.source,
                "higher-ranked source replaces registered tool"
            );
            self.tools.insert(tool.name.clone(), tool);
            return Ok(RegisterOutcome::Replaced { previous });
        }

        match self.options.conflict_strategy {
            ConflictStrategy::FirstWins => {
                warn!(tool = %tool.name, existing = %existing.source, incoming = %tool.source, "tool skipped");
                Ok(RegisterOutcome::Skipped { existing: existing.source.clone() })
            }
            ConflictStrategy::Error => Err(Error::ToolConflict {
                name: tool.name.clone(),
                existing: existing.source.to_string(),
                incoming: tool.source.to_string(),
            }),
        }
    }

    /// Register a batch in name order so the outcome never depends on input order.
    pub fn register_all(&mut self, mut tools: Vec<RegisteredTool>) -> Result<Vec<RegisterOutcome>> {
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools.into_iter().map(|t| self.register(t)).collect()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// All tools, sorted by name.
    pub fn get_all(&self) -> Vec<&RegisteredTool> {
        self.tools.values().collect()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize { self.tools.len() }
    pub fn is_empty(&self) -> bool { self.tools.is_empty() }

    pub fn to_tool_map(&self) -> ToolMap {
        Arc::new(self.tools.clone())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(RegisteredTool::definition).collect()
    }
}
