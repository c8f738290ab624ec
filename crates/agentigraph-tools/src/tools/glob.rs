//! Glob tool: file pattern matching under the workspace

use crate::registry::{Tool, ToolContext, ToolError, ToolExecutor, ToolResult};
use globset::GlobBuilder;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

const MAX_MATCHES: usize = 1000;
const IGNORED_DIRS: &[&str] = &["node_modules", "target"];

pub struct GlobTool {
    workspace_root: PathBuf,
}

impl GlobTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self { workspace_root: workspace_root.as_ref().to_path_buf() }
    }

    fn search(&self, root: &Path, pattern: &str) -> Result<Vec<PathBuf>, ToolError> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .map_err(|e| ToolError::Failed(format!("Invalid glob pattern: {}", e)))?
            .compile_matcher();

        let mut hits = Vec::new();
        let walker = WalkDir::new(root).follow_links(true).into_iter();
        for entry in walker.filter_entry(|e| e.depth() == 0 || !is_ignored(e)).flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if matcher.is_match(relative) {
                hits.push(Hit::from_entry(&entry));
            }
        }

        hits.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
        hits.truncate(MAX_MATCHES);
        Ok(hits.into_iter().map(|h| h.path).collect())
    }
}

/// Hidden entries and build output never match.
fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
}

struct Hit {
    path: PathBuf,
    modified: SystemTime,
}

impl Hit {
    fn from_entry(entry: &DirEntry) -> Self {
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Self { path: entry.path().to_path_buf(), modified }
    }
}

impl Tool for GlobTool {
    fn name(&self) -> &str { "glob" }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. Supports ** for recursive matching. \
         Returns file paths sorted by modification time (newest first)."
    }

    fn is_read_only(&self) -> bool { true }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern (e.g. '**/*.rs', 'src/**/*.ts')"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (default: workspace root)"
                }
            },
            "required": ["pattern"]
        })
    }
}

#[async_trait::async_trait]
impl ToolExecutor for GlobTool {
    async fn execute(&self, args: Value, _ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let pattern = args["pattern"]
            .as_str()
            .ok_or_else(|| ToolError::Failed("Missing required parameter: pattern".into()))?;

        let root = args["path"]
            .as_str()
            .map(|p| if Path::new(p).is_absolute() { PathBuf::from(p) } else { self.workspace_root.join(p) })
            .unwrap_or_else(|| self.workspace_root.clone());

        let matches = self.search(&root, pattern)?;
        debug!(pattern, count = matches.len(), "glob");

        if matches.is_empty() {
            return Ok(ToolResult::text("No files found"));
        }
        let lines: Vec<String> = matches.iter().map(|p| p.to_string_lossy().to_string()).collect();
        Ok(ToolResult::text(lines.join("\n")))
    }
}
