//! Relay context: a textual digest of completed upstream work injected into
//! downstream task prompts.

use serde_json::Value;

use crate::plan::{Task, TaskStatus};
use crate::prompts::{RELAY_CLOSING, RELAY_HEADER, RELAY_SEPARATOR};

/// Builds the digest a downstream agent receives about earlier phases.
#[derive(Debug, Clone)]
pub struct RelayContextBuilder {
    /// Result excerpts longer than this are omitted to keep downstream
    /// prompts lean.
    excerpt_max: usize,
}

impl RelayContextBuilder {
    pub fn new(excerpt_max: usize) -> Self {
        Self { excerpt_max }
    }

    /// Digest every `Completed` task with a phase order strictly below
    /// `current_phase`. Returns an empty string (no header) when nothing
    /// qualifies.
    pub fn build(&self, snapshot: &[Task], current_phase: u32) -> String {
        let upstream: Vec<&Task> = snapshot
            .iter()
            .filter(|t| t.status == TaskStatus::Completed && t.phase_order < current_phase)
            .collect();
        if upstream.is_empty() {
            return String::new();
        }

        let mut lines = vec![RELAY_HEADER.to_string(), String::new()];
        for task in upstream {
            lines.push(format!("[done] {} - {} ({})", task.role, task.title, task.id));
            if let Some(url) = &task.pr_url {
                lines.push(format!("   PR: {url}"));
            }
            if let Some(result) = &task.result {
                let rendered = render_result(result);
                if rendered.len() < self.excerpt_max {
                    lines.push(format!("   Output: {rendered}"));
                }
            }
            lines.push(String::new());
        }
        lines.push(RELAY_CLOSING.to_string());
        lines.join("\n")
    }
}

/// Final prompt for one dispatched task: context + separator + task prompt,
/// or the task prompt alone when there is no context.
pub fn compose_prompt(relay_context: &str, task_prompt: &str) -> String {
    if relay_context.is_empty() {
        task_prompt.to_string()
    } else {
        format!("{relay_context}{RELAY_SEPARATOR}{task_prompt}")
    }
}

fn render_result(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
