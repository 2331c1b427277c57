//! Execution records: attempts, stage nodes, and the DAG returned to
//! callers.
//!
//! The DAG is a tree in practice: Classify parents either Execute or
//! Plan, and Plan parents its Step nodes. Nodes reference children by id
//! so operators can address any stage directly.

use aurarouter_abstraction::{GenerateOutput, ProviderError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const PREVIEW_CHARS: usize = 160;

/// How the classifier shaped the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Direct,
    MultiStep,
}

/// Outcome of one provider invocation (or skip decision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Ok,
    SkippedBudget,
    SkippedPrivacy,
    SkippedUnhealthy,
    Error,
}

/// One invocation record inside a stage node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub model_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// Stable error-kind string for `Error` outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Human-readable skip reason or error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl Attempt {
    /// A skip decision; starts and ends at the same instant.
    pub fn skipped(model_id: &str, outcome: AttemptOutcome, detail: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            model_id: model_id.to_string(),
            started_at: now,
            ended_at: now,
            outcome,
            error_kind: None,
            detail: Some(detail.into()),
            tokens_in: None,
            tokens_out: None,
            preview: None,
        }
    }

    /// A successful invocation.
    pub fn ok(model_id: &str, started_at: DateTime<Utc>, output: &GenerateOutput) -> Self {
        Self {
            model_id: model_id.to_string(),
            started_at,
            ended_at: Utc::now(),
            outcome: AttemptOutcome::Ok,
            error_kind: None,
            detail: None,
            tokens_in: output.usage.map(|u| u.input_tokens),
            tokens_out: output.usage.map(|u| u.output_tokens),
            preview: Some(preview(&output.text)),
        }
    }

    /// A failed invocation, classified by the provider error.
    pub fn error(model_id: &str, started_at: DateTime<Utc>, error: &ProviderError) -> Self {
        Self {
            model_id: model_id.to_string(),
            started_at,
            ended_at: Utc::now(),
            outcome: AttemptOutcome::Error,
            error_kind: Some(error.kind().to_string()),
            detail: Some(error.to_string()),
            tokens_in: None,
            tokens_out: None,
            preview: None,
        }
    }

    /// A synthetic annotation (e.g. `plan_parse_failed`) attached after a
    /// model attempt.
    pub fn annotation(model_id: &str, error_kind: &str, detail: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            model_id: model_id.to_string(),
            started_at: now,
            ended_at: now,
            outcome: AttemptOutcome::Error,
            error_kind: Some(error_kind.to_string()),
            detail: Some(detail.into()),
            tokens_in: None,
            tokens_out: None,
            preview: None,
        }
    }
}

/// Stage node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// One stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    pub label: String,
    pub role: String,
    pub attempts: Vec<Attempt>,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
    pub children: Vec<String>,
}

impl DagNode {
    pub fn new(id: &str, label: &str, role: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            role: role.to_string(),
            attempts: Vec::new(),
            status: NodeStatus::Pending,
            result_preview: None,
            children: Vec::new(),
        }
    }
}

/// The tree of stage nodes recorded for one `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDag {
    /// Id of the entry node, when any stage ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// All nodes, in creation order.
    pub nodes: Vec<DagNode>,
}

impl ExecutionDag {
    /// Adds a node; the first node added becomes the root.
    pub fn push(&mut self, node: DagNode) {
        if self.root.is_none() {
            self.root = Some(node.id.clone());
        }
        self.nodes.push(node);
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut DagNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Records a parent -> child edge.
    pub fn add_child(&mut self, parent: &str, child: &str) {
        if let Some(node) = self.node_mut(parent) {
            node.children.push(child.to_string());
        }
    }
}

/// What `Fabric::execute` hands back on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub classification: Classification,
    /// The parsed plan, for multi-step runs that planned successfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<String>>,
    pub final_output: String,
    pub dag: ExecutionDag,
}

/// Truncates text for attempt/node previews.
pub(crate) fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}
