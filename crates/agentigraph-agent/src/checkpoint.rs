//! Checkpoint persistence and the pending-approval resume path.
//!
//! Every `save` appends; `load` returns the newest checkpoint of a thread.

use crate::nodes::tools::{record_result, run_executor};
use crate::state::{AgentState, AgentStateSnapshot, PendingApproval};
use agentigraph_core::{Error, Result};
use agentigraph_tools::{ToolContext, ToolExecutor, ToolMap};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    #[default]
    Active,
    PendingApproval,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    pub id: String,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub step_count: usize,
    #[serde(default)]
    pub status: CheckpointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<PendingApproval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub state: AgentStateSnapshot,
}

impl Checkpoint {
    pub fn restore_state(&self, tools: ToolMap) -> AgentState {
        self.state.restore(tools)
    }

    pub fn is_pending_approval(&self) -> bool {
        self.metadata.status == CheckpointStatus::PendingApproval
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SaveOptions {
    pub status: CheckpointStatus,
    pub pending_approval: Option<PendingApproval>,
    pub custom: Option<Map<String, Value>>,
}

impl SaveOptions {
    pub fn pending(approval: PendingApproval) -> Self {
        Self {
            status: CheckpointStatus::PendingApproval,
            pending_approval: Some(approval),
            custom: None,
        }
    }
}

/// The flat map shape: everything is custom metadata, status stays active.
impl From<Map<String, Value>> for SaveOptions {
    fn from(custom: Map<String, Value>) -> Self {
        Self { custom: Some(custom), ..Default::default() }
    }
}

fn new_checkpoint(thread_id: &str, state: &AgentState, options: SaveOptions) -> Checkpoint {
    Checkpoint {
        metadata: CheckpointMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            created_at: Utc::now(),
            step_count: state.step_count,
            status: options.status,
            pending_approval: options.pending_approval,
            custom: options.custom,
        },
        state: state.snapshot(),
    }
}

#[async_trait::async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, thread_id: &str, state: &AgentState, options: SaveOptions) -> Result<CheckpointMetadata>;

    /// Most recent checkpoint of the thread.
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Newest first.
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>>;

    async fn delete(&self, checkpoint_id: &str) -> Result<bool>;

    /// Remove every checkpoint of the thread; returns how many went.
    async fn clear(&self, thread_id: &str) -> Result<usize>;
}

#[derive(Default)]
pub struct MemoryCheckpointer {
    threads: DashMap<String, Vec<Checkpoint>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, thread_id: &str, state: &AgentState, options: SaveOptions) -> Result<CheckpointMetadata> {
        let checkpoint = new_checkpoint(thread_id, state, options);
        let metadata = checkpoint.metadata.clone();
        self.threads.entry(thread_id.to_string()).or_default().push(checkpoint);
        Ok(metadata)
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.threads.get(thread_id).and_then(|cps| cps.last().cloned()))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        Ok(self
            .threads
            .get(thread_id)
            .map(|cps| cps.iter().rev().map(|c| c.metadata.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        for mut entry in self.threads.iter_mut() {
            let before = entry.len();
            entry.retain(|c| c.metadata.id != checkpoint_id);
            if entry.len() != before {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn clear(&self, thread_id: &str) -> Result<usize> {
        Ok(self.threads.remove(thread_id).map(|(_, cps)| cps.len()).unwrap_or(0))
    }
}

/// Directory name for a thread: ASCII letters, digits and `-` pass through,
/// every other byte becomes `_XX`. Distinct ids never share a directory.
fn encode_thread_id(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for b in thread_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{:02X}", b));
        }
    }
    out
}

/// One JSON file per checkpoint: `<dir>/<encoded thread>/<created nanos>-<id>.json`.
/// Files are written to a temp name and renamed into place.
pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn thread_dir(&self, thread_id: &str) -> PathBuf {
        self.dir.join(encode_thread_id(thread_id))
    }

    /// Checkpoint files of a thread, newest first.
    async fn files(&self, thread_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(thread_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        // Zero-padded nanosecond prefixes sort chronologically.
        files.sort();
        files.reverse();
        Ok(files)
    }

    async fn read(&self, path: &Path) -> Result<Checkpoint> {
        let bytes = fs::read(path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Checkpoint(format!("corrupt checkpoint {}: {}", path.display(), e)))
    }
}

#[async_trait::async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, thread_id: &str, state: &AgentState, options: SaveOptions) -> Result<CheckpointMetadata> {
        let checkpoint = new_checkpoint(thread_id, state, options);
        let dir = self.thread_dir(thread_id);
        fs::create_dir_all(&dir).await?;

        let nanos = checkpoint.metadata.created_at.timestamp_nanos_opt().unwrap_or_default();
        let name = format!("{:020}-{}.json", nanos, checkpoint.metadata.id);
        let tmp = dir.join(format!(".{}.tmp", checkpoint.metadata.id));
        fs::write(&tmp, serde_json::to_vec_pretty(&checkpoint)?).await?;
        fs::rename(&tmp, dir.join(&name)).await?;

        debug!(thread = %thread_id, id = %checkpoint.metadata.id, "checkpoint written");
        Ok(checkpoint.metadata)
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        match self.files(&self.thread_dir(thread_id)).await?.first() {
            Some(path) => Ok(Some(self.read(path).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        let mut out = Vec::new();
        for path in self.files(&self.thread_dir(thread_id)).await? {
            out.push(self.read(&path).await?.metadata);
        }
        Ok(out)
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<bool> {
        let suffix = format!("-{}.json", checkpoint_id);
        let mut threads = match fs::read_dir(&self.dir).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        while let Some(thread) = threads.next_entry().await? {
            if !thread.file_type().await?.is_dir() {
                continue;
            }
            for path in self.files(&thread.path()).await? {
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(&suffix))
                    .unwrap_or(false);
                if matches {
                    fs::remove_file(&path).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn clear(&self, thread_id: &str) -> Result<usize> {
        let dir = self.thread_dir(thread_id);
        let count = self.files(&dir).await?.len();
        if count > 0 {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(count)
    }
}

#[derive(Clone, Debug)]
pub struct ResumeOutcome {
    pub state: AgentState,
    pub tool_executed: bool,
}

/// Answer the pending tool call of `checkpoint`.
///
/// Rejected: one rejection result, nothing runs. Approved with an executor:
/// the tool runs exactly once. Approved without one: a placeholder result.
pub async fn resume_with_approval(
    checkpoint: &Checkpoint,
    tools: ToolMap,
    approved: bool,
    executor: Option<Arc<dyn ToolExecutor>>,
) -> Result<ResumeOutcome> {
    let pending = match (&checkpoint.metadata.pending_approval, checkpoint.is_pending_approval()) {
        (Some(p), true) => p.clone(),
        _ => return Err(Error::NotPendingApproval(checkpoint.metadata.id.clone())),
    };

    let mut state = checkpoint.restore_state(tools);
    let call = pending.tool_call;

    let (content, is_error, tool_executed) = match (approved, executor) {
        (false, _) => {
            info!(tool = %pending.tool_name, "pending tool call rejected");
            (format!("Tool execution rejected by user: {}", pending.tool_name), true, false)
        }
        (true, Some(executor)) => {
            info!(tool = %pending.tool_name, "pending tool call approved, executing");
            let ctx = ToolContext {
                tool_call_id: call.id.clone(),
                messages: state.wire_messages(),
                cancel: state.cancel.clone(),
            };
            let (content, is_error) = run_executor(&executor, &pending.tool_name, pending.args, ctx).await?;
            (content, is_error, true)
        }
        (true, None) => (format!("Tool execution approved: {}", pending.tool_name), false, false),
    };

    record_result(&mut state, &call, content, is_error);
    Ok(ResumeOutcome { state, tool_executed })
}
